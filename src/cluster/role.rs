//! 节点角色
//!
//! 角色由 Pod 身份推导，不单独存储；它只决定是否执行 schema 迁移。
//! 无序号的名称虽然自行引导（见 [`PodIdentity::bootstraps`]），但不是种子，不迁移。

use std::fmt;

use serde::{Deserialize, Serialize};

use super::identity::PodIdentity;

/// 节点角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// 种子节点（序号 -0，引导集群，唯一允许迁移的节点）
    Seed,

    /// 加入节点（连接种子节点加入集群）
    Joiner,
}

impl NodeRole {
    pub fn from_identity(identity: &PodIdentity) -> Self {
        if identity.is_seed() {
            NodeRole::Seed
        } else {
            NodeRole::Joiner
        }
    }

    /// 是否是种子节点
    pub fn is_seed(&self) -> bool {
        *self == NodeRole::Seed
    }

    /// 只有种子节点执行迁移，避免并发 DDL
    pub fn runs_migrations(&self) -> bool {
        self.is_seed()
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Seed => f.write_str("seed"),
            NodeRole::Joiner => f.write_str("joiner"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_from_identity() {
        let seed = PodIdentity::new("db-0", "db", "default", "cluster.local", true);
        let joiner = PodIdentity::new("db-4", "db", "default", "cluster.local", true);

        assert_eq!(seed.role(), NodeRole::Seed);
        assert!(seed.role().runs_migrations());
        assert_eq!(joiner.role(), NodeRole::Joiner);
        assert!(!joiner.role().runs_migrations());
    }

    #[test]
    fn test_only_dash_zero_migrates() {
        for name in ["standalone", "pod-", "pod-00", "pod-10"] {
            let id = PodIdentity::new(name, "db", "default", "cluster.local", true);
            assert_eq!(id.role(), NodeRole::Joiner, "{}", name);
            assert!(!id.role().runs_migrations(), "{}", name);
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(NodeRole::Seed.to_string(), "seed");
        assert_eq!(NodeRole::Joiner.to_string(), "joiner");
    }
}
