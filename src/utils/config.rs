//! 配置管理模块
//!
//! 启动时从环境变量（可选叠加一个 TOML 文件）构建一次不可变的 [`NodeConfig`]，
//! 之后显式传给各个组件，不再读取进程环境。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::cluster::identity::PodIdentity;

/// 可选 TOML 配置文件路径的环境变量名
pub const CONFIG_FILE_ENV: &str = "NODE_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// 节点配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// 证书目录（tls.crt / tls.key）
    #[serde(default = "default_cert_dir")]
    pub cert_dir: PathBuf,

    /// 本地持久化根目录
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// 是否以 Pod 名称为子目录隔离数据
    #[serde(default = "default_true")]
    pub data_dir_per_pod: bool,

    /// 集群上打开的逻辑数据库名
    #[serde(default = "default_db_name")]
    pub db_name: String,

    #[serde(default = "default_http_host")]
    pub http_host: String,

    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// 节点间集群通信端口
    #[serde(default = "default_sql_port")]
    pub sql_port: u16,

    #[serde(default = "default_http_workers")]
    pub http_workers: usize,

    // Kubernetes DNS 信息
    #[serde(default)]
    pub pod_name: String,

    #[serde(default)]
    pub service_name: String,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_cluster_domain")]
    pub cluster_domain: String,

    /// 使用完整域名，否则只用 `<pod>.<service>` 依赖 resolv.conf 的 search
    #[serde(default = "default_true")]
    pub use_fqdn: bool,

    // 超时（秒）
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,

    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,

    #[serde(default = "default_handover_timeout")]
    pub handover_timeout_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            cert_dir: default_cert_dir(),
            data_dir: default_data_dir(),
            data_dir_per_pod: true,
            db_name: default_db_name(),
            http_host: default_http_host(),
            http_port: default_http_port(),
            sql_port: default_sql_port(),
            http_workers: default_http_workers(),
            pod_name: String::new(),
            service_name: String::new(),
            namespace: default_namespace(),
            cluster_domain: default_cluster_domain(),
            use_fqdn: true,
            ready_timeout_secs: default_ready_timeout(),
            drain_timeout_secs: default_drain_timeout(),
            handover_timeout_secs: default_handover_timeout(),
        }
    }
}

impl NodeConfig {
    /// 从进程环境加载
    pub fn from_env() -> Result<Self, ConfigError> {
        let file = std::env::var(CONFIG_FILE_ENV).ok();
        Self::build(None, file)
    }

    /// 从给定的变量表加载（不读取进程环境，便于测试）
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self, ConfigError> {
        let file = vars.get(CONFIG_FILE_ENV).cloned();
        Self::build(Some(vars), file)
    }

    fn build(
        vars: Option<HashMap<String, String>>,
        file: Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        // 文件在下，环境变量在上
        if let Some(path) = file.filter(|p| !p.is_empty()) {
            builder = builder.add_source(
                config::File::new(&path, config::FileFormat::Toml).required(true),
            );
        }

        let cfg: NodeConfig = builder
            .add_source(config::Environment::default().source(vars))
            .build()?
            .try_deserialize()?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// 校验必填项
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pod_name.trim().is_empty() {
            return Err(ConfigError::Missing("POD_NAME"));
        }
        if self.service_name.trim().is_empty() {
            return Err(ConfigError::Missing("SERVICE_NAME"));
        }
        if self.namespace.trim().is_empty() {
            return Err(ConfigError::Missing("NAMESPACE"));
        }
        if self.db_name.trim().is_empty() {
            return Err(ConfigError::Missing("DB_NAME"));
        }
        if self.sql_port == 0 {
            return Err(ConfigError::Invalid {
                key: "SQL_PORT",
                reason: "port must be non-zero".to_string(),
            });
        }
        if self.http_workers == 0 {
            return Err(ConfigError::Invalid {
                key: "HTTP_WORKERS",
                reason: "at least one worker is required".to_string(),
            });
        }
        Ok(())
    }

    /// 本节点的 Pod 身份
    pub fn identity(&self) -> PodIdentity {
        PodIdentity::new(
            &self.pod_name,
            &self.service_name,
            &self.namespace,
            &self.cluster_domain,
            self.use_fqdn,
        )
    }

    /// 引擎数据目录
    pub fn data_path(&self) -> PathBuf {
        if self.data_dir_per_pod {
            self.data_dir.join(&self.pod_name)
        } else {
            self.data_dir.clone()
        }
    }

    pub fn cert_dir(&self) -> &Path {
        &self.cert_dir
    }

    pub fn http_bind_address(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub fn handover_timeout(&self) -> Duration {
        Duration::from_secs(self.handover_timeout_secs)
    }
}

// 默认值函数
fn default_cert_dir() -> PathBuf {
    PathBuf::from("./certs")
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_db_name() -> String {
    "test".to_string()
}
fn default_http_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_sql_port() -> u16 {
    9000
}
fn default_http_workers() -> usize {
    2
}
fn default_namespace() -> String {
    "default".to_string()
}
fn default_cluster_domain() -> String {
    "cluster.local".to_string()
}
fn default_true() -> bool {
    true
}
fn default_ready_timeout() -> u64 {
    5 * 60
}
fn default_drain_timeout() -> u64 {
    5
}
fn default_handover_timeout() -> u64 {
    30
}
