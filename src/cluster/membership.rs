//! 成员协议与本地成员视图
//!
//! 节点之间在共享证书的双向 TLS 连接上交换按行分隔的 JSON 消息。
//! 成员视图与节点信息以 JSON 文件保存在节点数据目录中，重启后恢复。

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::engine::EngineError;
use super::role::NodeRole;

/// 单条消息上限
pub const MAX_MESSAGE_BYTES: u64 = 64 * 1024;

/// 成员视图文件名
pub const MEMBERSHIP_FILE: &str = "cluster.json";

/// 节点信息文件名
pub const NODE_INFO_FILE: &str = "node.json";

/// 成员协议消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MembershipMessage {
    /// 请求加入集群
    Join { address: String },

    /// 通知离开集群（移交）
    Leave { address: String },

    /// 查询成员列表
    Members,

    /// 成员列表响应
    MembersResponse { members: Vec<String> },

    /// 确认
    Ack,

    /// 请求被拒绝
    Error { message: String },
}

/// 写一条消息（JSON + 换行）
pub async fn write_message<W>(writer: &mut W, message: &MembershipMessage) -> Result<(), EngineError>
where
    W: AsyncWrite + Unpin,
{
    let mut bytes = serde_json::to_vec(message)
        .map_err(|e| EngineError::Protocol(format!("encode failed: {}", e)))?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// 读一条消息；对端关闭连接时返回 `None`
pub async fn read_message<R>(reader: &mut R) -> Result<Option<MembershipMessage>, EngineError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let read = reader.take(MAX_MESSAGE_BYTES).read_line(&mut line).await?;
    if read == 0 {
        return Ok(None);
    }
    if !line.ends_with('\n') {
        return Err(EngineError::Protocol(format!(
            "message exceeds {} bytes or is truncated",
            MAX_MESSAGE_BYTES
        )));
    }

    serde_json::from_str(line.trim_end())
        .map(Some)
        .map_err(|e| EngineError::Protocol(format!("decode failed: {}", e)))
}

// ═══════════════════════════════════════════════════════════════════════════
// 本地成员视图
// ═══════════════════════════════════════════════════════════════════════════

/// 集群成员（按地址去重、有序）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    members: BTreeSet<String>,
}

impl Membership {
    pub fn new(self_address: &str) -> Self {
        let mut members = BTreeSet::new();
        members.insert(self_address.to_string());
        Self { members }
    }

    /// 添加成员，返回是否是新成员
    pub fn add(&mut self, address: &str) -> bool {
        self.members.insert(address.to_string())
    }

    /// 移除成员，返回成员是否存在
    pub fn remove(&mut self, address: &str) -> bool {
        self.members.remove(address)
    }

    pub fn merge<I, S>(&mut self, addresses: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for address in addresses {
            self.add(address.as_ref());
        }
    }

    pub fn members(&self) -> Vec<String> {
        self.members.iter().cloned().collect()
    }

    /// 除 `address` 之外的成员
    pub fn peers_of(&self, address: &str) -> Vec<String> {
        self.members
            .iter()
            .filter(|m| m.as_str() != address)
            .cloned()
            .collect()
    }

    pub fn load(dir: &Path) -> Result<Option<Self>, EngineError> {
        read_json(&dir.join(MEMBERSHIP_FILE))
    }

    pub fn save(&self, dir: &Path) -> Result<(), EngineError> {
        write_json(&dir.join(MEMBERSHIP_FILE), self)
    }
}

/// 节点启动信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub address: String,
    pub role: NodeRole,
    #[serde(default)]
    pub join: Vec<String>,
}

impl NodeInfo {
    pub fn load(dir: &Path) -> Result<Option<Self>, EngineError> {
        read_json(&dir.join(NODE_INFO_FILE))
    }

    pub fn save(&self, dir: &Path) -> Result<(), EngineError> {
        write_json(&dir.join(NODE_INFO_FILE), self)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, EngineError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| EngineError::Protocol(format!("{}: {}", path.display(), e)))
}

/// 先写临时文件再重命名，避免留下半个文件
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), EngineError> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| EngineError::Protocol(format!("{}: {}", path.display(), e)))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
