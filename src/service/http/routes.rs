//! HTTP API 路由配置

use actix_web::web;

use super::handlers;

/// 配置所有路由
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        // 探针
        .route("/healthz", web::get().to(handlers::liveness))
        .route("/live", web::get().to(handlers::liveness))
        .route("/readyz", web::get().to(handlers::readiness))
        .route("/ready", web::get().to(handlers::readiness))

        // authors
        .service(
            web::resource("/authors")
                .route(web::post().to(handlers::create_author))
                .route(web::get().to(handlers::list_authors)),
        )
        .service(
            web::resource("/authors/{id}")
                .route(web::put().to(handlers::update_author))
                .route(web::delete().to(handlers::delete_author)),
        );
}
