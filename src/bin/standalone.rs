//! 单机 CRUD 服务
//!
//! 不加入集群，直接打开本地数据库（默认内存库），启动时迁移，收到信号后排空退出。
//!
//! 运行: cargo run --bin standalone -- --db ./data/app.db

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use kubesql::lifecycle::RunContext;
use kubesql::service::{HttpFront, ServeContext, ServiceFront};
use kubesql::storage::{migrate, Database};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about = "Standalone CRUD service on a local database", long_about = None)]
struct Args {
    /// 数据库文件，`:memory:` 表示内存库
    #[arg(long, default_value = ":memory:")]
    db: String,

    /// HTTP 监听地址
    #[arg(long, default_value = "0.0.0.0:8080")]
    addr: String,

    /// actix worker 数量
    #[arg(long, default_value_t = 2)]
    workers: usize,

    /// 排空时限（秒）
    #[arg(long, default_value_t = 5)]
    drain_timeout: u64,
}

async fn open(path: &str) -> anyhow::Result<Database> {
    let db = if path == ":memory:" {
        Database::open_in_memory("standalone").await?
    } else {
        Database::open_local("standalone", path).await?
    };
    Ok(db)
}

async fn run(args: Args) -> anyhow::Result<()> {
    let db = open(&args.db)
        .await
        .with_context(|| format!("failed to open {}", args.db))?;
    migrate(&db).await.context("failed to migrate")?;
    log::info!("Standalone service on {} (db={})", args.addr, args.db);

    let ctx = RunContext::new(&CancellationToken::new())?;
    let front = HttpFront::new(args.addr).workers(args.workers);
    let served = front
        .serve(ServeContext {
            db: db.clone(),
            instance: "standalone".to_string(),
            drain_timeout: Duration::from_secs(args.drain_timeout),
            cancel: ctx.token(),
        })
        .await;
    db.close().await;

    let outcome = served?;
    log::info!("Stopped ({:?})", outcome);
    Ok(())
}

#[actix_web::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run(Args::parse()).await {
        log::error!("Fatal: {:#}", e);
        std::process::exit(1);
    }
}
