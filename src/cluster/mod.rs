//! 集群管理模块
//!
//! 提供 StatefulSet 集群引导能力：
//! - Pod 身份解析与地址推导
//! - 种子/加入节点角色
//! - 共享证书的双向 TLS
//! - 集群引擎抽象与本地实现

pub mod engine;
pub mod identity;
pub mod membership;
pub mod node;
pub mod role;
pub mod tls;

pub use engine::{ClusterEngine, EngineError, EngineLogLevel};
pub use identity::{ClusterTopology, PodIdentity};
pub use node::{LocalNode, LocalNodeOptions};
pub use role::NodeRole;
pub use tls::{CertificateGenerator, ClusterTls, TlsError};
