//! # KUBE-SQL-NODE
//!
//! 运行在 Kubernetes StatefulSet 中的 SQL 集群节点
//!
//! ## 核心能力
//!
//! - **集群引导**: 由 Pod 名称推导本节点地址与种子节点地址 (`-0` 为种子)
//! - **双向 TLS**: 全部节点共享同一张证书，证书自身即信任根
//! - **生命周期编排**: 加入集群 → 等待就绪 → 打开存储 → (种子节点) 迁移 → 服务
//! - **优雅退出**: 停止接收请求 → 排空 → 移交角色 → 释放资源
//! - **对外服务**: 健康检查 + authors CRUD (基于 Actix-web)
//!
//! ## 架构设计
//!
//! ```text
//! 环境变量 (utils/config)
//!     ↓
//! PodIdentity / ClusterTopology (cluster/identity) + ClusterTls (cluster/tls)
//!     ↓
//! ClusterEngine (cluster/engine) ← LocalNode (cluster/node)
//!     ↓
//! Orchestrator (lifecycle/) ← RunContext (lifecycle/signals)
//!     ↓
//! Database (storage/) → HttpFront (service/http)
//! ```

pub mod cluster;
pub mod lifecycle;
pub mod service;
pub mod storage;
pub mod utils;

// ============================================================================
// 重导出常用类型
// ============================================================================

pub use cluster::engine::{ClusterEngine, EngineError};
pub use cluster::identity::{ClusterTopology, PodIdentity};
pub use cluster::role::NodeRole;
pub use cluster::tls::{ClusterTls, TlsError};
pub use lifecycle::orchestrator::{Orchestrator, OrchestratorOptions};
pub use lifecycle::signals::RunContext;
pub use lifecycle::state::LifecycleState;
pub use storage::{Database, StorageError};
pub use utils::config::NodeConfig;

// ============================================================================
// 全局错误类型
// ============================================================================

/// 节点错误类型
///
/// 致命错误一路冒泡到顶层 `run`，由 main 记录日志并以非零码退出；
/// 排空超时与移交失败只记录日志，不出现在这里。
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Join error: {0}")]
    JoinError(String),

    #[error("Storage open error: {0}")]
    StorageOpenError(String),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("Serve error: {0}")]
    ServeError(String),

    #[error("Lifecycle error: {0}")]
    LifecycleError(String),

    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
}

impl From<utils::config::ConfigError> for NodeError {
    fn from(e: utils::config::ConfigError) -> Self {
        NodeError::ConfigError(e.to_string())
    }
}

impl From<TlsError> for NodeError {
    fn from(e: TlsError) -> Self {
        NodeError::ConfigError(e.to_string())
    }
}

impl From<lifecycle::state::TransitionError> for NodeError {
    fn from(e: lifecycle::state::TransitionError) -> Self {
        NodeError::LifecycleError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, NodeError>;
