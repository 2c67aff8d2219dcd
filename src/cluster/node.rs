//! 本地集群节点
//!
//! [`LocalNode`] 是 [`ClusterEngine`] 的进程内实现：
//! - 在集群端口上以双向 TLS 提供成员协议（加入/离开/查询成员）
//! - 加入节点反复连接种子节点直到被接纳
//! - 逻辑数据库为数据目录下的 libsql 文件
//!
//! 节点之间不复制数据；成员视图只用于引导、移交与重启恢复。

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

use super::engine::{log_adapter, ClusterEngine, EngineError, EngineLogLevel, LogFunc};
use super::identity::ClusterTopology;
use super::membership::{read_message, write_message, Membership, MembershipMessage, NodeInfo};
use super::role::NodeRole;
use super::tls::ClusterTls;
use crate::storage::Database;

macro_rules! emit {
    ($log_fn:expr, $level:ident, $($arg:tt)+) => {
        ($log_fn)(EngineLogLevel::$level, format_args!($($arg)+))
    };
}

/// 节点选项
#[derive(Clone)]
pub struct LocalNodeOptions {
    /// 节点数据目录（数据库文件、node.json、cluster.json）
    pub data_dir: PathBuf,

    /// 对外通告的集群地址
    pub address: String,

    /// 种子地址；为空时引导新集群
    pub join: Vec<String>,

    /// 共享证书 TLS 材料
    pub tls: ClusterTls,

    /// 监听地址，默认 `0.0.0.0:<address 端口>`
    pub listen_addr: Option<SocketAddr>,

    /// 加入失败后的重试间隔
    pub retry_interval: Duration,

    /// 单次成员请求超时
    pub request_timeout: Duration,

    pub log_fn: LogFunc,
}

impl LocalNodeOptions {
    pub fn new(data_dir: impl Into<PathBuf>, topology: &ClusterTopology, tls: ClusterTls) -> Self {
        Self {
            data_dir: data_dir.into(),
            address: topology.self_address.clone(),
            join: topology.join_addresses.clone(),
            tls,
            listen_addr: None,
            retry_interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(5),
            log_fn: log_adapter(),
        }
    }

    pub fn with_listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = Some(addr);
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// 引擎视角的角色：没有加入地址即引导集群
    pub fn role(&self) -> NodeRole {
        if self.join.is_empty() {
            NodeRole::Seed
        } else {
            NodeRole::Joiner
        }
    }

    fn bind_addr(&self) -> Result<SocketAddr, EngineError> {
        if let Some(addr) = self.listen_addr {
            return Ok(addr);
        }
        let port = self
            .address
            .rsplit_once(':')
            .and_then(|(_, port)| port.parse::<u16>().ok())
            .ok_or_else(|| EngineError::InvalidAddress(self.address.clone()))?;
        Ok(SocketAddr::from(([0, 0, 0, 0], port)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Created,
    Ready,
    Closed,
}

/// 本地集群节点
pub struct LocalNode {
    options: LocalNodeOptions,
    membership: Arc<RwLock<Membership>>,
    state: Mutex<NodeState>,
    local_addr: Mutex<Option<SocketAddr>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl LocalNode {
    pub fn new(options: LocalNodeOptions) -> Self {
        let membership = Membership::new(&options.address);
        Self {
            options,
            membership: Arc::new(RwLock::new(membership)),
            state: Mutex::new(NodeState::Created),
            local_addr: Mutex::new(None),
            listener: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn role(&self) -> NodeRole {
        self.options.role()
    }

    /// 实际监听地址（监听启动后可用）
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// 当前已知成员
    pub fn members(&self) -> Vec<String> {
        self.membership.read().members()
    }

    fn ensure_state(&self, expected: NodeState) -> Result<(), EngineError> {
        match *self.state.lock() {
            state if state == expected => Ok(()),
            NodeState::Closed => Err(EngineError::Closed),
            _ => Err(EngineError::NotReady),
        }
    }

    fn persist_membership(&self) -> Result<(), EngineError> {
        let snapshot = self.membership.read().clone();
        snapshot.save(&self.options.data_dir)
    }

    async fn start_listener(&self) -> Result<(), EngineError> {
        if self.listener.lock().is_some() {
            return Ok(());
        }

        let bind = self.options.bind_addr()?;
        let listener = TcpListener::bind(bind).await?;
        let local = listener.local_addr()?;
        *self.local_addr.lock() = Some(local);

        let session = Arc::new(PeerSession {
            acceptor: self.options.tls.acceptor(),
            membership: self.membership.clone(),
            data_dir: self.options.data_dir.clone(),
            log_fn: self.options.log_fn.clone(),
            shutdown: self.shutdown.clone(),
            request_timeout: self.options.request_timeout,
        });
        let handle = tokio::spawn(accept_loop(listener, session));
        *self.listener.lock() = Some(handle);

        emit!(self.options.log_fn, Info, "membership listener on {}", local);
        Ok(())
    }

    async fn join_cluster(&self) -> Result<(), EngineError> {
        let log_fn = &self.options.log_fn;
        let mut attempt: u32 = 0;

        loop {
            for seed in &self.options.join {
                attempt += 1;
                let join = MembershipMessage::Join {
                    address: self.options.address.clone(),
                };
                match self.request(seed, &join).await {
                    Ok(MembershipMessage::MembersResponse { members }) => {
                        self.membership.write().merge(members);
                        emit!(
                            log_fn,
                            Info,
                            "joined cluster via {} after {} attempt(s)",
                            seed,
                            attempt
                        );
                        return Ok(());
                    }
                    Ok(MembershipMessage::Error { message }) => {
                        return Err(EngineError::Join(format!("{} rejected join: {}", seed, message)));
                    }
                    Ok(other) => {
                        emit!(log_fn, Warn, "unexpected reply from {}: {:?}", seed, other);
                    }
                    Err(e) => {
                        emit!(log_fn, Warn, "join via {} failed (attempt {}): {}", seed, attempt, e);
                    }
                }
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => return Err(EngineError::Closed),
                _ = tokio::time::sleep(self.options.retry_interval) => {}
            }
        }
    }

    async fn request(
        &self,
        address: &str,
        message: &MembershipMessage,
    ) -> Result<MembershipMessage, EngineError> {
        let connector = self.options.tls.connector();
        let server_name = self.options.tls.server_name();

        let exchange = async {
            let tcp = TcpStream::connect(address).await?;
            let stream = connector.connect(server_name, tcp).await?;
            let (read, mut write) = tokio::io::split(stream);
            let mut reader = BufReader::new(read);

            write_message(&mut write, message).await?;
            read_message(&mut reader)
                .await?
                .ok_or_else(|| EngineError::Protocol(format!("{} closed the connection", address)))
        };

        tokio::time::timeout(self.options.request_timeout, exchange)
            .await
            .map_err(|_| EngineError::Protocol(format!("request to {} timed out", address)))?
    }
}

#[async_trait]
impl ClusterEngine for LocalNode {
    fn address(&self) -> &str {
        &self.options.address
    }

    async fn ready(&self) -> Result<(), EngineError> {
        match *self.state.lock() {
            NodeState::Ready => return Ok(()),
            NodeState::Closed => return Err(EngineError::Closed),
            NodeState::Created => {}
        }

        let data_dir = &self.options.data_dir;
        std::fs::create_dir_all(data_dir)?;

        if let Some(previous) = NodeInfo::load(data_dir)? {
            if previous.address == self.options.address {
                emit!(self.options.log_fn, Info, "restarting node {}", previous.address);
            } else {
                emit!(
                    self.options.log_fn,
                    Warn,
                    "data directory {} belonged to {}, now used by {}",
                    data_dir.display(),
                    previous.address,
                    self.options.address
                );
            }
        }

        if let Some(saved) = Membership::load(data_dir)? {
            let members = saved.members();
            emit!(
                self.options.log_fn,
                Info,
                "restored {} member(s) from {}",
                members.len(),
                data_dir.display()
            );
            self.membership.write().merge(members);
        }

        NodeInfo {
            address: self.options.address.clone(),
            role: self.role(),
            join: self.options.join.clone(),
        }
        .save(data_dir)?;

        self.start_listener().await?;

        if self.options.join.is_empty() {
            emit!(self.options.log_fn, Info, "bootstrapping cluster at {}", self.options.address);
        } else {
            self.join_cluster().await?;
        }

        self.persist_membership()?;
        *self.state.lock() = NodeState::Ready;

        emit!(
            self.options.log_fn,
            Info,
            "node {} ready with {} member(s)",
            self.options.address,
            self.membership.read().members().len()
        );
        Ok(())
    }

    async fn open(&self, name: &str) -> Result<Database, EngineError> {
        self.ensure_state(NodeState::Ready)?;

        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(EngineError::InvalidName(name.to_string()));
        }

        let path = self.options.data_dir.join(format!("{}.db", name));
        let db = Database::open_local(name, &path).await?;
        emit!(self.options.log_fn, Debug, "opened database {} at {}", name, path.display());
        Ok(db)
    }

    async fn handover(&self) -> Result<(), EngineError> {
        self.ensure_state(NodeState::Ready)?;

        let log_fn = &self.options.log_fn;
        let peers = self.membership.read().peers_of(&self.options.address);
        if peers.is_empty() {
            emit!(log_fn, Info, "no peers to hand over to");
            return Ok(());
        }

        let leave = MembershipMessage::Leave {
            address: self.options.address.clone(),
        };
        let mut failed = Vec::new();
        for peer in &peers {
            match self.request(peer, &leave).await {
                Ok(MembershipMessage::Ack) => {
                    emit!(log_fn, Info, "handed over to {}", peer);
                }
                Ok(other) => {
                    emit!(log_fn, Warn, "unexpected handover reply from {}: {:?}", peer, other);
                    failed.push(peer.clone());
                }
                Err(e) => {
                    emit!(log_fn, Warn, "handover to {} failed: {}", peer, e);
                    failed.push(peer.clone());
                }
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(EngineError::Handover(format!(
                "not acknowledged by {}",
                failed.join(", ")
            )))
        }
    }

    async fn close(&self) -> Result<(), EngineError> {
        let previous = std::mem::replace(&mut *self.state.lock(), NodeState::Closed);
        if previous == NodeState::Closed {
            return Ok(());
        }

        self.shutdown.cancel();
        let listener = self.listener.lock().take();
        if let Some(handle) = listener {
            if let Err(e) = handle.await {
                emit!(self.options.log_fn, Warn, "membership listener ended abnormally: {}", e);
            }
        }

        if self.options.data_dir.exists() {
            self.persist_membership()?;
        }

        emit!(self.options.log_fn, Info, "node {} closed", self.options.address);
        Ok(())
    }
}

impl Drop for LocalNode {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// 成员协议服务端
// ═══════════════════════════════════════════════════════════════════════════

struct PeerSession {
    acceptor: TlsAcceptor,
    membership: Arc<RwLock<Membership>>,
    data_dir: PathBuf,
    log_fn: LogFunc,
    shutdown: CancellationToken,
    /// 握手与每条请求的读取时限，沉默的连接到期即断开
    request_timeout: Duration,
}

impl PeerSession {
    fn handle(&self, message: MembershipMessage) -> MembershipMessage {
        match message {
            MembershipMessage::Join { address } => {
                let added = self.membership.write().add(&address);
                if added {
                    emit!(self.log_fn, Info, "member joined: {}", address);
                    self.persist();
                }
                MembershipMessage::MembersResponse {
                    members: self.membership.read().members(),
                }
            }
            MembershipMessage::Leave { address } => {
                if self.membership.write().remove(&address) {
                    emit!(self.log_fn, Info, "member left: {}", address);
                    self.persist();
                }
                MembershipMessage::Ack
            }
            MembershipMessage::Members => MembershipMessage::MembersResponse {
                members: self.membership.read().members(),
            },
            other => MembershipMessage::Error {
                message: format!("unexpected request: {:?}", other),
            },
        }
    }

    fn persist(&self) {
        let snapshot = self.membership.read().clone();
        if let Err(e) = snapshot.save(&self.data_dir) {
            emit!(self.log_fn, Warn, "failed to persist membership: {}", e);
        }
    }

    async fn serve(&self, stream: TcpStream) -> Result<(), EngineError> {
        let stream = tokio::time::timeout(self.request_timeout, self.acceptor.accept(stream))
            .await
            .map_err(|_| EngineError::Protocol("TLS handshake timed out".to_string()))??;
        let (read, mut write) = tokio::io::split(stream);
        let mut reader = BufReader::new(read);

        loop {
            let message = tokio::time::timeout(self.request_timeout, read_message(&mut reader))
                .await
                .map_err(|_| EngineError::Protocol("peer sent no request in time".to_string()))??;
            let Some(message) = message else {
                return Ok(());
            };
            let reply = self.handle(message);
            write_message(&mut write, &reply).await?;
        }
    }
}

async fn accept_loop(listener: TcpListener, session: Arc<PeerSession>) {
    loop {
        tokio::select! {
            _ = session.shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let session = session.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = session.shutdown.cancelled() => {}
                            result = session.serve(stream) => {
                                if let Err(e) = result {
                                    emit!(session.log_fn, Warn, "membership session with {} failed: {}", peer, e);
                                }
                            }
                        }
                    });
                }
                Err(e) => {
                    emit!(session.log_fn, Warn, "accept failed: {}", e);
                }
            }
        }
    }
    emit!(session.log_fn, Debug, "membership listener stopped");
}
