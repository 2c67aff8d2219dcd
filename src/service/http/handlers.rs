//! HTTP 请求处理器

use actix_web::error::InternalError;
use actix_web::{http::header, web, HttpResponse};

use super::models::*;
use crate::storage::{AuthorRepository, Database, StorageError};

/// 请求体上限
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// 应用状态
pub struct AppState {
    pub instance: String,
    pub db: Database,
    pub authors: AuthorRepository,
}

impl AppState {
    pub fn new(instance: impl Into<String>, db: Database) -> Self {
        Self {
            instance: instance.into(),
            authors: AuthorRepository::new(db.clone()),
            db,
        }
    }
}

/// JSON 解析失败统一返回 400 + `{"error": ...}`
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(MAX_BODY_BYTES)
        .error_handler(|err, _req| {
            let response = HttpResponse::BadRequest().json(ErrorResponse::new(err.to_string()));
            InternalError::from_response(err, response).into()
        })
}

fn parse_id(raw: &str) -> Result<i64, HttpResponse> {
    raw.parse::<i64>().map_err(|_| {
        HttpResponse::BadRequest().json(ErrorResponse::new(format!("invalid author id: {}", raw)))
    })
}

fn missing_name() -> HttpResponse {
    HttpResponse::UnprocessableEntity().json(ErrorResponse::new("name is required"))
}

fn not_found(id: i64) -> HttpResponse {
    HttpResponse::NotFound().json(ErrorResponse::new(format!("author {} not found", id)))
}

/// 存储错误只写日志，响应里不带内部细节
fn storage_failure(action: &str, err: StorageError) -> HttpResponse {
    log::error!("Failed to {}: {}", action, err);
    HttpResponse::InternalServerError().json(ErrorResponse::new("internal server error"))
}

// ═══════════════════════════════════════════════════════════════════════════
// 探针
// ═══════════════════════════════════════════════════════════════════════════

pub async fn liveness(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(LivenessResponse {
        instance: state.instance.clone(),
        alive: true,
    })
}

pub async fn readiness(state: web::Data<AppState>) -> HttpResponse {
    match state.db.ping().await {
        Ok(()) => HttpResponse::Ok().json(ReadinessResponse {
            instance: state.instance.clone(),
            ready: true,
        }),
        Err(e) => {
            log::error!("Readiness probe failed: {}", e);
            HttpResponse::ServiceUnavailable().json(ReadinessResponse {
                instance: state.instance.clone(),
                ready: false,
            })
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// authors
// ═══════════════════════════════════════════════════════════════════════════

pub async fn create_author(
    state: web::Data<AppState>,
    body: web::Json<AuthorInput>,
) -> HttpResponse {
    let input = body.into_inner();
    if !input.has_name() {
        return missing_name();
    }

    match state.authors.create(&input).await {
        Ok(author) => HttpResponse::Created()
            .insert_header((header::LOCATION, format!("/authors/{}", author.id)))
            .json(author),
        Err(e) => storage_failure("create author", e),
    }
}

pub async fn list_authors(state: web::Data<AppState>) -> HttpResponse {
    match state.authors.list().await {
        Ok(authors) => HttpResponse::Ok().json(authors),
        Err(e) => storage_failure("list authors", e),
    }
}

pub async fn update_author(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<AuthorInput>,
) -> HttpResponse {
    let id = match parse_id(&path) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let input = body.into_inner();
    if !input.has_name() {
        return missing_name();
    }

    match state.authors.update(id, &input).await {
        Ok(true) => HttpResponse::NoContent().finish(),
        Ok(false) => not_found(id),
        Err(e) => storage_failure("update author", e),
    }
}

pub async fn delete_author(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let id = match parse_id(&path) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match state.authors.delete(id).await {
        Ok(true) => HttpResponse::NoContent().finish(),
        Ok(false) => not_found(id),
        Err(e) => storage_failure("delete author", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::http::routes;
    use crate::storage::migrate;
    use actix_web::{http::StatusCode, test, App};

    async fn state() -> web::Data<AppState> {
        let db = Database::open_in_memory("app").await.unwrap();
        migrate(&db).await.unwrap();
        web::Data::new(AppState::new("db-0", db))
    }

    macro_rules! app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data($state.clone())
                    .app_data(json_config())
                    .configure(routes::configure),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn test_liveness_routes() {
        let state = state().await;
        let app = app!(state);

        for path in ["/healthz", "/live"] {
            let req = test::TestRequest::get().uri(path).to_request();
            let body: LivenessResponse = test::call_and_read_body_json(&app, req).await;
            assert_eq!(
                body,
                LivenessResponse {
                    instance: "db-0".to_string(),
                    alive: true
                }
            );
        }
    }

    #[actix_web::test]
    async fn test_readiness_follows_database() {
        let state = state().await;
        let app = app!(state);

        let req = test::TestRequest::get().uri("/readyz").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        state.db.close().await;

        let req = test::TestRequest::get().uri("/ready").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body: ReadinessResponse = test::read_body_json(resp).await;
        assert!(!body.ready);
        assert_eq!(body.instance, "db-0");
    }

    #[actix_web::test]
    async fn test_create_and_list() {
        let state = state().await;
        let app = app!(state);

        let req = test::TestRequest::post()
            .uri("/authors")
            .set_json(serde_json::json!({"name": "Ada", "bio": "first programmer"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let location = resp
            .headers()
            .get(header::LOCATION)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        let created: Author = test::read_body_json(resp).await;
        assert_eq!(location, format!("/authors/{}", created.id));
        assert_eq!(created.name, "Ada");

        let req = test::TestRequest::get().uri("/authors").to_request();
        let all: Vec<Author> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(all, vec![created]);
    }

    #[actix_web::test]
    async fn test_create_validation() {
        let state = state().await;
        let app = app!(state);

        let req = test::TestRequest::post()
            .uri("/authors")
            .insert_header((header::CONTENT_TYPE, "application/json"))
            .set_payload("{not json")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: ErrorResponse = test::read_body_json(resp).await;
        assert!(!body.error.is_empty());

        let req = test::TestRequest::post()
            .uri("/authors")
            .set_json(serde_json::json!({"bio": "no name"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: ErrorResponse = test::read_body_json(resp).await;
        assert_eq!(body.error, "name is required");
    }

    #[actix_web::test]
    async fn test_update_and_delete() {
        let state = state().await;
        let app = app!(state);
        let author = state
            .authors
            .create(&AuthorInput::new("Ada", None))
            .await
            .unwrap();

        let req = test::TestRequest::put()
            .uri(&format!("/authors/{}", author.id))
            .set_json(serde_json::json!({"name": "Ada Lovelace", "bio": "analyst"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert_eq!(state.authors.list().await.unwrap()[0].name, "Ada Lovelace");

        let req = test::TestRequest::delete()
            .uri(&format!("/authors/{}", author.id))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let req = test::TestRequest::delete()
            .uri(&format!("/authors/{}", author.id))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::put()
            .uri("/authors/999")
            .set_json(serde_json::json!({"name": "nobody"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_invalid_id() {
        let state = state().await;
        let app = app!(state);

        let req = test::TestRequest::delete().uri("/authors/abc").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: ErrorResponse = test::read_body_json(resp).await;
        assert_eq!(body.error, "invalid author id: abc");
    }

    #[actix_web::test]
    async fn test_storage_failure_is_generic() {
        let state = state().await;
        let app = app!(state);
        state.db.close().await;

        let req = test::TestRequest::get().uri("/authors").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: ErrorResponse = test::read_body_json(resp).await;
        assert_eq!(body.error, "internal server error");
    }
}
