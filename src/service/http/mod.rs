//! HTTP API 服务模块
//!
//! 探针与 authors 资源的 CRUD 接口

pub mod handlers;
pub mod models;
pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use actix_web::{middleware, web, App, HttpServer};
use async_trait::async_trait;
use parking_lot::Mutex;

use super::{DrainOutcome, ServeContext, ServeError, ServiceFront};
use crate::utils::config::NodeConfig;
use handlers::AppState;

/// HTTP 服务前端
pub struct HttpFront {
    /// 监听地址
    bind_address: String,

    /// worker 数量
    workers: usize,

    /// 实际绑定的地址（绑定端口 0 时由系统分配）
    local_addrs: Arc<Mutex<Vec<SocketAddr>>>,
}

impl HttpFront {
    pub fn new(bind_address: impl Into<String>) -> Self {
        Self {
            bind_address: bind_address.into(),
            workers: 2,
            local_addrs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn from_config(config: &NodeConfig) -> Self {
        Self::new(config.http_bind_address()).workers(config.http_workers)
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn bind_address(&self) -> &str {
        &self.bind_address
    }

    /// 服务启动后实际监听的第一个地址
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addrs.lock().first().copied()
    }
}

/// actix 的排空时限只接受整秒，不足一秒向上取整
fn shutdown_secs(drain_timeout: Duration) -> u64 {
    let secs = drain_timeout.as_secs();
    if drain_timeout.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

#[async_trait(?Send)]
impl ServiceFront for HttpFront {
    async fn serve(&self, ctx: ServeContext) -> Result<DrainOutcome, ServeError> {
        let state = web::Data::new(AppState::new(ctx.instance.clone(), ctx.db.clone()));

        let server = HttpServer::new(move || {
            App::new()
                .app_data(state.clone())
                .app_data(handlers::json_config())
                .wrap(middleware::Logger::default())
                .configure(routes::configure)
        })
        .workers(self.workers)
        .disable_signals()
        .shutdown_timeout(shutdown_secs(ctx.drain_timeout))
        .bind(&self.bind_address)
        .map_err(|source| ServeError::Bind {
            address: self.bind_address.clone(),
            source,
        })?;

        let addrs = server.addrs();
        log::info!("HTTP server for {} listening on {:?}", ctx.instance, addrs);
        *self.local_addrs.lock() = addrs;

        let server = server.run();
        let handle = server.handle();
        tokio::pin!(server);

        tokio::select! {
            result = &mut server => {
                result?;
                log::warn!("HTTP server stopped before shutdown was requested");
                return Ok(DrainOutcome::Drained);
            }
            _ = ctx.cancel.cancelled() => {}
        }

        log::info!("Draining HTTP server (timeout {:?})", ctx.drain_timeout);
        let started = Instant::now();
        let (_, result) = tokio::join!(handle.stop(true), &mut server);
        result?;

        let elapsed = started.elapsed();
        if elapsed >= ctx.drain_timeout && !ctx.drain_timeout.is_zero() {
            log::warn!("HTTP drain hit the {:?} timeout", ctx.drain_timeout);
            Ok(DrainOutcome::TimedOut)
        } else {
            log::info!("HTTP server drained in {:?}", elapsed);
            Ok(DrainOutcome::Drained)
        }
    }
}
