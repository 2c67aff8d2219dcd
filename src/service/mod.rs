//! 对外服务层
//!
//! 编排器把已打开（种子节点上已迁移）的数据库借给 [`ServiceFront`]，
//! 服务前端一直运行到取消令牌触发，然后在排空时限内停止。

pub mod http;

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::storage::Database;

pub use http::HttpFront;

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("server error: {0}")]
    Server(#[from] io::Error),
}

/// 排空结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// 在时限内处理完在途请求
    Drained,

    /// 超时，剩余连接被强制关闭
    TimedOut,
}

/// 服务上下文
#[derive(Debug, Clone)]
pub struct ServeContext {
    /// 数据库句柄（前端只读写数据，不负责关闭）
    pub db: Database,

    /// 实例名，出现在健康检查响应中
    pub instance: String,

    /// 排空时限
    pub drain_timeout: Duration,

    /// 停止服务的信号
    pub cancel: CancellationToken,
}

impl ServeContext {
    /// 就绪探针：`SELECT 1`
    pub async fn probe(&self) -> bool {
        self.db.ping().await.is_ok()
    }
}

/// 服务前端
///
/// `serve` 在取消前持续接受请求；取消后停止接受新请求，等待在途请求
/// 最多 `drain_timeout`，再返回排空结果。
#[async_trait(?Send)]
pub trait ServiceFront {
    async fn serve(&self, ctx: ServeContext) -> Result<DrainOutcome, ServeError>;
}
