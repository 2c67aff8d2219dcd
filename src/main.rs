//! StatefulSet 集群节点
//!
//! 从环境变量读取配置，按 Pod 序号引导或加入集群，迁移（仅种子节点）后
//! 提供 HTTP CRUD 服务；收到终止信号后排空、移交、关闭。
//!
//! 运行: POD_NAME=db-0 SERVICE_NAME=db cargo run --bin kube-sql-node

use anyhow::Context;
use kubesql::lifecycle::{Orchestrator, RunContext};
use kubesql::NodeConfig;
use tokio_util::sync::CancellationToken;

async fn run() -> anyhow::Result<()> {
    let config = NodeConfig::from_env().context("failed to load configuration")?;
    log::info!(
        "Starting {} (service={}, namespace={}, sql_port={}, http={})",
        config.pod_name,
        config.service_name,
        config.namespace,
        config.sql_port,
        config.http_bind_address()
    );

    let ctx = RunContext::new(&CancellationToken::new()).context("failed to install signal handlers")?;
    let orchestrator = Orchestrator::from_config(&config)?;
    orchestrator.run(&ctx.token()).await?;

    log::info!("{} shut down cleanly", config.pod_name);
    Ok(())
}

#[actix_web::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run().await {
        log::error!("Fatal: {:#}", e);
        std::process::exit(1);
    }
}
