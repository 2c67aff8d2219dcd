//! 集群引擎抽象
//!
//! 编排器只通过 [`ClusterEngine`] 与复制存储/共识引擎交互：
//! 就绪等待、打开逻辑数据库、移交角色、关闭。引擎内部实现对编排器不透明。

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use super::tls::TlsError;
use crate::storage::{Database, StorageError};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),

    #[error("join failed: {0}")]
    Join(String),

    #[error("handover failed: {0}")]
    Handover(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("invalid cluster address: {0}")]
    InvalidAddress(String),

    #[error("invalid database name: {0}")]
    InvalidName(String),

    #[error("engine is not ready")]
    NotReady,

    #[error("engine is closed")]
    Closed,
}

/// 集群引擎
#[async_trait]
pub trait ClusterEngine: Send + Sync {
    /// 本节点对外的集群地址
    fn address(&self) -> &str;

    /// 启动（引导或加入集群）并阻塞到本节点就绪
    ///
    /// 调用方负责施加超时。
    async fn ready(&self) -> Result<(), EngineError>;

    /// 打开一个逻辑数据库
    async fn open(&self, name: &str) -> Result<Database, EngineError>;

    /// 把本节点持有的领导/投票职责移交给其他成员
    async fn handover(&self) -> Result<(), EngineError>;

    /// 释放引擎资源
    async fn close(&self) -> Result<(), EngineError>;
}

// ═══════════════════════════════════════════════════════════════════════════
// 引擎日志
// ═══════════════════════════════════════════════════════════════════════════

/// 引擎内部日志级别
///
/// 引擎只使用这个枚举，具体日志库的映射集中在 [`EngineLogLevel::as_log_level`]。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EngineLogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl EngineLogLevel {
    pub fn as_log_level(self) -> log::Level {
        match self {
            EngineLogLevel::Debug => log::Level::Debug,
            EngineLogLevel::Info => log::Level::Info,
            EngineLogLevel::Warn => log::Level::Warn,
            EngineLogLevel::Error => log::Level::Error,
        }
    }
}

impl fmt::Display for EngineLogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineLogLevel::Debug => "DEBUG",
            EngineLogLevel::Info => "INFO",
            EngineLogLevel::Warn => "WARN",
            EngineLogLevel::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// 引擎日志回调
pub type LogFunc = Arc<dyn Fn(EngineLogLevel, fmt::Arguments<'_>) + Send + Sync>;

/// 默认回调：转发到 `log` 门面
pub fn log_adapter() -> LogFunc {
    Arc::new(|level: EngineLogLevel, args: fmt::Arguments<'_>| {
        log::log!(target: "kubesql::engine", level.as_log_level(), "{}", args);
    })
}
