//! 节点生命周期编排
//!
//! 启动顺序：等待引擎就绪 → 打开数据库并探测 → （种子节点）迁移 → 提供服务。
//! 关闭顺序：排空 HTTP → 关闭数据库 → 移交 → 关闭引擎。
//!
//! 编排器独占引擎和状态机；服务前端只借用数据库句柄。

use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::state::{LifecycleState, StateMachine, TransitionError};
use crate::cluster::{ClusterEngine, ClusterTls, ClusterTopology, LocalNode, LocalNodeOptions, NodeRole};
use crate::service::{DrainOutcome, HttpFront, ServeContext, ServiceFront};
use crate::storage::{migrate, Database};
use crate::utils::config::NodeConfig;
use crate::NodeError;

/// 排空超时之外，等待服务前端返回的额外宽限
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// 编排参数
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Pod 名称（日志与健康检查中的实例名）
    pub instance: String,
    pub role: NodeRole,
    pub db_name: String,
    pub ready_timeout: Duration,
    pub drain_timeout: Duration,
    pub handover_timeout: Duration,
}

impl OrchestratorOptions {
    pub fn from_config(config: &NodeConfig) -> Self {
        Self {
            instance: config.pod_name.clone(),
            role: config.identity().role(),
            db_name: config.db_name.clone(),
            ready_timeout: config.ready_timeout(),
            drain_timeout: config.drain_timeout(),
            handover_timeout: config.handover_timeout(),
        }
    }
}

/// 生命周期编排器
pub struct Orchestrator<E, F> {
    options: OrchestratorOptions,
    engine: E,
    front: F,
    lifecycle: Mutex<StateMachine>,
}

impl Orchestrator<LocalNode, HttpFront> {
    /// Starting 阶段：推导身份与地址、加载 TLS、准备数据目录、构造引擎
    ///
    /// 这里失败不会产生任何集群副作用。
    pub fn from_config(config: &NodeConfig) -> Result<Self, NodeError> {
        let identity = config.identity();
        if !identity.has_ordinal() {
            log::warn!(
                "Pod name '{}' has no ordinal suffix, bootstrapping alone without migrations",
                identity.name()
            );
        }

        let topology = ClusterTopology::resolve(&identity, config.sql_port);
        log::info!(
            "[{}] role={} address={} join={:?}",
            identity,
            identity.role(),
            topology.self_address,
            topology.join_addresses
        );

        let tls = ClusterTls::load(config.cert_dir())?;
        let data_dir = config.data_path();
        std::fs::create_dir_all(&data_dir)?;

        let engine = LocalNode::new(LocalNodeOptions::new(data_dir, &topology, tls));
        let front = HttpFront::from_config(config);
        Ok(Self::new(OrchestratorOptions::from_config(config), engine, front))
    }
}

impl<E, F> Orchestrator<E, F>
where
    E: ClusterEngine,
    F: ServiceFront,
{
    pub fn new(options: OrchestratorOptions, engine: E, front: F) -> Self {
        let lifecycle = Mutex::new(StateMachine::new(options.instance.clone()));
        Self {
            options,
            engine,
            front,
            lifecycle,
        }
    }

    pub fn options(&self) -> &OrchestratorOptions {
        &self.options
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn front(&self) -> &F {
        &self.front
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.lock().current()
    }

    pub fn history(&self) -> Vec<LifecycleState> {
        self.lifecycle.lock().history().to_vec()
    }

    fn transition(&self, next: LifecycleState) -> Result<(), TransitionError> {
        self.lifecycle.lock().transition(next)
    }

    /// 关闭路径上的迁移：失败只记日志，不中断后续清理
    fn advance(&self, next: LifecycleState) {
        if let Err(e) = self.transition(next) {
            log::error!("[{}] {}", self.options.instance, e);
        }
    }

    /// 运行到取消或致命错误
    ///
    /// 在进入 Serving 前取消视为干净退出；一旦引擎启动，返回前一定关闭引擎。
    pub async fn run(&self, cancel: &CancellationToken) -> Result<(), NodeError> {
        self.transition(LifecycleState::AwaitingReady)?;

        let outcome = match self.start(cancel).await {
            Ok(Some(db)) => self.serve(db, cancel).await,
            Ok(None) => {
                log::info!(
                    "[{}] shutdown requested during startup, aborting",
                    self.options.instance
                );
                Ok(())
            }
            Err(e) => Err(e),
        };

        if let Err(e) = self.engine.close().await {
            log::warn!("[{}] engine close failed: {}", self.options.instance, e);
        }

        match outcome {
            Ok(()) => {
                self.transition(LifecycleState::Closed)?;
                Ok(())
            }
            Err(e) => {
                log::error!("[{}] {}", self.options.instance, e);
                self.lifecycle.lock().fail();
                Err(e)
            }
        }
    }

    /// 就绪 → 打开 → 迁移；取消时返回 `Ok(None)`
    async fn start(&self, cancel: &CancellationToken) -> Result<Option<Database>, NodeError> {
        let ready = tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            ready = tokio::time::timeout(self.options.ready_timeout, self.engine.ready()) => ready,
        };
        match ready {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(NodeError::JoinError(e.to_string())),
            Err(_) => {
                return Err(NodeError::JoinError(format!(
                    "engine at {} not ready after {:?}",
                    self.engine.address(),
                    self.options.ready_timeout
                )))
            }
        }
        if cancel.is_cancelled() {
            return Ok(None);
        }

        self.transition(LifecycleState::Open)?;
        let db = self
            .engine
            .open(&self.options.db_name)
            .await
            .map_err(|e| NodeError::StorageOpenError(e.to_string()))?;

        if let Err(e) = db.ping().await {
            db.close().await;
            return Err(NodeError::StorageOpenError(format!(
                "probe of '{}' failed: {}",
                self.options.db_name, e
            )));
        }

        if self.options.role.runs_migrations() {
            self.transition(LifecycleState::Migrating)?;
            if let Err(e) = migrate(&db).await {
                db.close().await;
                return Err(NodeError::MigrationError(e.to_string()));
            }
        } else {
            log::info!(
                "[{}] {} node, skipping migration",
                self.options.instance,
                self.options.role
            );
        }

        if cancel.is_cancelled() {
            db.close().await;
            return Ok(None);
        }
        Ok(Some(db))
    }

    /// Serving → Draining → HandingOver
    async fn serve(&self, db: Database, cancel: &CancellationToken) -> Result<(), NodeError> {
        if let Err(e) = self.transition(LifecycleState::Serving) {
            db.close().await;
            return Err(e.into());
        }

        let ctx = ServeContext {
            db: db.clone(),
            instance: self.options.instance.clone(),
            drain_timeout: self.options.drain_timeout,
            cancel: cancel.clone(),
        };
        let serving = self.front.serve(ctx);
        tokio::pin!(serving);

        let finished = tokio::select! {
            result = &mut serving => Some(result),
            _ = cancel.cancelled() => None,
        };

        self.advance(LifecycleState::Draining);
        let served = match finished {
            Some(result) => result,
            None => {
                let bound = self.options.drain_timeout + DRAIN_GRACE;
                match tokio::time::timeout(bound, &mut serving).await {
                    Ok(result) => result,
                    Err(_) => Ok(DrainOutcome::TimedOut),
                }
            }
        };
        if let Ok(DrainOutcome::TimedOut) = served {
            log::warn!(
                "[{}] drain timed out after {:?}",
                self.options.instance,
                self.options.drain_timeout
            );
        }

        db.close().await;

        self.advance(LifecycleState::HandingOver);
        self.handover().await;

        served
            .map(|_| ())
            .map_err(|e| NodeError::ServeError(e.to_string()))
    }

    /// 只调用一次，有时限；失败只记日志
    async fn handover(&self) {
        let instance = &self.options.instance;
        match tokio::time::timeout(self.options.handover_timeout, self.engine.handover()).await {
            Ok(Ok(())) => log::info!("[{}] handover complete", instance),
            Ok(Err(e)) => log::warn!("[{}] handover failed: {}", instance, e),
            Err(_) => log::warn!(
                "[{}] handover timed out after {:?}",
                instance,
                self.options.handover_timeout
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::EngineError;
    use crate::service::ServeError;
    use async_trait::async_trait;
    use std::sync::Arc;
    use LifecycleState::*;

    /// 记录调用顺序的假引擎
    #[derive(Default)]
    struct FakeEngine {
        calls: Arc<Mutex<Vec<&'static str>>>,
        ready_delay: Option<Duration>,
        ready_error: bool,
        handover_error: bool,
        handover_hangs: bool,
        opened: Mutex<Option<Database>>,
    }

    impl FakeEngine {
        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().clone()
        }

        fn count(&self, name: &str) -> usize {
            self.calls.lock().iter().filter(|c| **c == name).count()
        }
    }

    #[async_trait]
    impl ClusterEngine for FakeEngine {
        fn address(&self) -> &str {
            "fake:9000"
        }

        async fn ready(&self) -> Result<(), EngineError> {
            self.calls.lock().push("ready");
            if let Some(delay) = self.ready_delay {
                tokio::time::sleep(delay).await;
            }
            if self.ready_error {
                return Err(EngineError::Join("seed unreachable".to_string()));
            }
            Ok(())
        }

        async fn open(&self, name: &str) -> Result<Database, EngineError> {
            self.calls.lock().push("open");
            let db = Database::open_in_memory(name).await?;
            *self.opened.lock() = Some(db.clone());
            Ok(db)
        }

        async fn handover(&self) -> Result<(), EngineError> {
            self.calls.lock().push("handover");
            if self.handover_hangs {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.handover_error {
                return Err(EngineError::Handover("no peers answered".to_string()));
            }
            Ok(())
        }

        async fn close(&self) -> Result<(), EngineError> {
            self.calls.lock().push("close");
            Ok(())
        }
    }

    /// 可配置行为的假服务前端
    #[derive(Default)]
    struct FakeFront {
        fail: bool,
        ignore_cancel: bool,
        cancel_on_start: bool,
        served: Mutex<Vec<ServeContext>>,
    }

    #[async_trait(?Send)]
    impl ServiceFront for FakeFront {
        async fn serve(&self, ctx: ServeContext) -> Result<DrainOutcome, ServeError> {
            self.served.lock().push(ctx.clone());
            if self.fail {
                return Err(ServeError::Server(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "listener died",
                )));
            }
            if self.cancel_on_start {
                ctx.cancel.cancel();
            }
            ctx.cancel.cancelled().await;
            if self.ignore_cancel {
                std::future::pending::<()>().await;
            }
            Ok(DrainOutcome::Drained)
        }
    }

    fn options(role: NodeRole) -> OrchestratorOptions {
        OrchestratorOptions {
            instance: match role {
                NodeRole::Seed => "db-0".to_string(),
                NodeRole::Joiner => "db-1".to_string(),
            },
            role,
            db_name: "app".to_string(),
            ready_timeout: Duration::from_secs(5),
            drain_timeout: Duration::from_millis(100),
            handover_timeout: Duration::from_millis(200),
        }
    }

    async fn authors_table_exists(db: &Database) -> bool {
        !db.query(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'authors'",
            (),
        )
        .await
        .unwrap()
        .is_empty()
    }

    #[test]
    fn test_options_role_from_pod_name() {
        let role = |pod: &str| {
            let vars = [("POD_NAME", pod), ("SERVICE_NAME", "db")]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            OrchestratorOptions::from_config(&NodeConfig::from_vars(vars).unwrap()).role
        };

        assert_eq!(role("db-0"), NodeRole::Seed);
        assert_eq!(role("db-3"), NodeRole::Joiner);
        assert_eq!(role("db-00"), NodeRole::Joiner);
        // 无序号：自行引导但不迁移
        assert_eq!(role("standalone"), NodeRole::Joiner);
    }

    #[tokio::test]
    async fn test_seed_full_lifecycle() {
        let front = FakeFront {
            cancel_on_start: true,
            ..Default::default()
        };
        let orchestrator = Orchestrator::new(options(NodeRole::Seed), FakeEngine::default(), front);
        let cancel = CancellationToken::new();

        orchestrator.run(&cancel).await.unwrap();

        assert_eq!(
            orchestrator.history(),
            vec![Starting, AwaitingReady, Open, Migrating, Serving, Draining, HandingOver, Closed]
        );
        assert_eq!(
            orchestrator.engine().calls(),
            vec!["ready", "open", "handover", "close"]
        );

        let served = orchestrator.front().served.lock();
        assert_eq!(served.len(), 1);
        assert_eq!(served[0].instance, "db-0");
        assert!(served[0].db.is_closed().await);
    }

    #[tokio::test]
    async fn test_joiner_skips_migration() {
        let front = FakeFront {
            cancel_on_start: true,
            ..Default::default()
        };
        let orchestrator =
            Orchestrator::new(options(NodeRole::Joiner), FakeEngine::default(), front);

        orchestrator.run(&CancellationToken::new()).await.unwrap();

        assert!(!orchestrator.history().contains(&Migrating));
        assert!(orchestrator.history().contains(&Serving));

        let db = orchestrator.engine().opened.lock().clone().unwrap();
        assert!(db.is_closed().await);
    }

    #[tokio::test]
    async fn test_seed_migrates_before_serving() {
        let orchestrator = Arc::new(Orchestrator::new(
            options(NodeRole::Seed),
            FakeEngine::default(),
            FakeFront::default(),
        ));
        let cancel = CancellationToken::new();

        let run = orchestrator.run(&cancel);
        let check = async {
            loop {
                if orchestrator.state() == Serving {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            let db = orchestrator.engine().opened.lock().clone().unwrap();
            let migrated = authors_table_exists(&db).await;
            cancel.cancel();
            migrated
        };

        let (result, migrated) = tokio::join!(run, check);
        result.unwrap();
        assert!(migrated);
    }

    #[tokio::test]
    async fn test_ready_failure_never_serves() {
        let engine = FakeEngine {
            ready_error: true,
            ..Default::default()
        };
        let orchestrator = Orchestrator::new(options(NodeRole::Joiner), engine, FakeFront::default());

        let err = orchestrator.run(&CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, NodeError::JoinError(_)));
        assert_eq!(orchestrator.state(), Failed);
        assert!(!orchestrator.history().contains(&Serving));
        assert_eq!(orchestrator.engine().calls(), vec!["ready", "close"]);
        assert!(orchestrator.front().served.lock().is_empty());
    }

    #[tokio::test]
    async fn test_ready_timeout_never_serves() {
        let engine = FakeEngine {
            ready_delay: Some(Duration::from_secs(3600)),
            ..Default::default()
        };
        let mut opts = options(NodeRole::Joiner);
        opts.ready_timeout = Duration::from_millis(50);
        let orchestrator = Orchestrator::new(opts, engine, FakeFront::default());

        let err = orchestrator.run(&CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, NodeError::JoinError(msg) if msg.contains("not ready")));
        assert!(!orchestrator.history().contains(&Open));
        assert_eq!(orchestrator.engine().count("open"), 0);
        assert_eq!(orchestrator.engine().count("handover"), 0);
        assert_eq!(orchestrator.engine().count("close"), 1);
    }

    #[tokio::test]
    async fn test_cancel_while_awaiting_ready_is_clean() {
        let engine = FakeEngine {
            ready_delay: Some(Duration::from_secs(3600)),
            ..Default::default()
        };
        let orchestrator = Orchestrator::new(options(NodeRole::Joiner), engine, FakeFront::default());
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        orchestrator.run(&cancel).await.unwrap();

        assert_eq!(orchestrator.history(), vec![Starting, AwaitingReady, Closed]);
        assert_eq!(orchestrator.engine().calls(), vec!["ready", "close"]);
    }

    #[tokio::test]
    async fn test_handover_once_even_when_drain_times_out() {
        let front = FakeFront {
            cancel_on_start: true,
            ignore_cancel: true,
            ..Default::default()
        };
        let orchestrator = Orchestrator::new(options(NodeRole::Seed), FakeEngine::default(), front);

        orchestrator.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(orchestrator.engine().count("handover"), 1);
        assert_eq!(orchestrator.state(), Closed);
    }

    #[tokio::test]
    async fn test_handover_errors_are_not_fatal() {
        for engine in [
            FakeEngine {
                handover_error: true,
                ..Default::default()
            },
            FakeEngine {
                handover_hangs: true,
                ..Default::default()
            },
        ] {
            let front = FakeFront {
                cancel_on_start: true,
                ..Default::default()
            };
            let orchestrator = Orchestrator::new(options(NodeRole::Seed), engine, front);

            orchestrator.run(&CancellationToken::new()).await.unwrap();

            assert_eq!(orchestrator.engine().count("handover"), 1);
            assert_eq!(orchestrator.engine().count("close"), 1);
            assert_eq!(orchestrator.state(), Closed);
        }
    }

    #[tokio::test]
    async fn test_serve_error_still_shuts_down_in_order() {
        let front = FakeFront {
            fail: true,
            ..Default::default()
        };
        let orchestrator = Orchestrator::new(options(NodeRole::Seed), FakeEngine::default(), front);

        let err = orchestrator.run(&CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, NodeError::ServeError(msg) if msg.contains("listener died")));
        assert_eq!(
            orchestrator.engine().calls(),
            vec!["ready", "open", "handover", "close"]
        );
        assert_eq!(
            orchestrator.history(),
            vec![Starting, AwaitingReady, Open, Migrating, Serving, Draining, HandingOver, Failed]
        );
    }

    #[tokio::test]
    async fn test_run_twice_is_rejected() {
        let front = FakeFront {
            cancel_on_start: true,
            ..Default::default()
        };
        let orchestrator = Orchestrator::new(options(NodeRole::Seed), FakeEngine::default(), front);
        orchestrator.run(&CancellationToken::new()).await.unwrap();

        let err = orchestrator.run(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, NodeError::LifecycleError(_)));
        assert_eq!(orchestrator.engine().count("ready"), 1);
    }
}
