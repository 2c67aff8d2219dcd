//! Pod 身份与集群地址推导
//!
//! StatefulSet 中的 Pod 名称形如 `<base>-<ordinal>`，稳定网络标识为
//!
//! ```text
//! $(POD_NAME).$(SERVICE_NAME).$(NAMESPACE).svc.$(CLUSTER_DOMAIN):$(SQL_PORT)
//! ```
//!
//! 以 `-0` 结尾的 Pod 是种子节点，负责引导集群并执行迁移；其余带序号的
//! 节点加入 `-0`。没有序号的名称不改写，也没有可加入的节点。
//! 这里只拼接字符串，不做 DNS 解析。

use std::fmt;

use super::role::NodeRole;

/// Pod 身份（启动时构建一次，之后不可变）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodIdentity {
    name: String,
    service: String,
    namespace: String,
    domain: String,
    use_fqdn: bool,
    /// 名称拆分结果：(base, ordinal)
    ordinal: Option<(usize, u64)>,
}

impl PodIdentity {
    pub fn new(name: &str, service: &str, namespace: &str, domain: &str, use_fqdn: bool) -> Self {
        Self {
            name: name.to_string(),
            service: service.to_string(),
            namespace: namespace.to_string(),
            domain: domain.to_string(),
            use_fqdn,
            ordinal: parse_ordinal(name),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn use_fqdn(&self) -> bool {
        self.use_fqdn
    }

    /// 序号后缀，名称不以 `-<digits>` 结尾时为 `None`
    pub fn ordinal(&self) -> Option<u64> {
        self.ordinal.map(|(_, n)| n)
    }

    /// 去掉 `-<digits>` 后缀的名称；无序号时为完整名称
    pub fn base(&self) -> &str {
        match self.ordinal {
            Some((split, _)) => &self.name[..split],
            None => &self.name,
        }
    }

    pub fn has_ordinal(&self) -> bool {
        self.ordinal.is_some()
    }

    /// 种子节点：名称恰好以 `-0` 结尾（`pod-00` 不是）
    pub fn is_seed(&self) -> bool {
        match self.ordinal {
            Some((split, _)) => &self.name[split + 1..] == "0",
            None => false,
        }
    }

    /// 是否自行引导集群：种子节点，或无序号因而无处可加入
    pub fn bootstraps(&self) -> bool {
        self.is_seed() || !self.has_ordinal()
    }

    pub fn role(&self) -> NodeRole {
        NodeRole::from_identity(self)
    }

    /// 同一 StatefulSet 中序号为 `ordinal` 的兄弟 Pod
    ///
    /// 无序号的名称不改写，返回自身。
    pub fn sibling(&self, ordinal: u64) -> PodIdentity {
        let name = if self.has_ordinal() {
            format!("{}-{}", self.base(), ordinal)
        } else {
            self.name.clone()
        };
        PodIdentity {
            ordinal: parse_ordinal(&name),
            name,
            ..self.clone()
        }
    }

    /// 地址后缀：`<svc>.<ns>.svc.<domain>` 或仅 `<svc>`
    pub fn dns_suffix(&self) -> String {
        if self.use_fqdn {
            format!("{}.{}.svc.{}", self.service, self.namespace, self.domain)
        } else {
            // 只用 pod.service，依赖 /etc/resolv.conf 的 search 选项
            self.service.clone()
        }
    }

    /// 本 Pod 的主机名
    pub fn host(&self) -> String {
        format!("{}.{}", self.name, self.dns_suffix())
    }

    /// 本 Pod 在给定端口上的地址
    pub fn address(&self, port: u16) -> String {
        join_host_port(&self.host(), port)
    }
}

impl fmt::Display for PodIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// 拆分尾部 `-<digits>`，返回 (base 长度, 序号)
fn parse_ordinal(name: &str) -> Option<(usize, u64)> {
    let dash = name.rfind('-')?;
    let digits = &name[dash + 1..];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // 超出 u64 的序号按无序号处理
    let ordinal = digits.parse().ok()?;
    Some((dash, ordinal))
}

/// `host:port`，IPv6 字面量加方括号
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// 集群拓扑：本节点地址与需要联系的加入地址
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterTopology {
    pub self_address: String,
    pub join_addresses: Vec<String>,
}

impl ClusterTopology {
    /// 由 Pod 身份与 SQL 端口推导拓扑（纯函数）
    ///
    /// 带序号的非种子节点 `join_addresses` 恰好包含一个地址：把尾部
    /// `-<digits>` 替换为 `-0`。
    pub fn resolve(identity: &PodIdentity, sql_port: u16) -> Self {
        let self_address = identity.address(sql_port);
        let join_addresses = if identity.bootstraps() {
            Vec::new()
        } else {
            vec![identity.sibling(0).address(sql_port)]
        };

        Self {
            self_address,
            join_addresses,
        }
    }

    pub fn is_bootstrap(&self) -> bool {
        self.join_addresses.is_empty()
    }
}
