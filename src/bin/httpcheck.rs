//! 容器健康检查
//!
//! 请求 URL，状态码落在 [min-status, max-status] 内时退出码为 0，否则为 1。
//!
//! 运行: httpcheck --timeout 2 http://127.0.0.1:8080/readyz

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use reqwest::Method;

#[derive(Parser, Debug)]
#[command(author, version, about = "Exit 0 iff the URL answers with an acceptable status", long_about = None)]
struct Args {
    /// 超时（秒）
    #[arg(long, default_value_t = 1.0)]
    timeout: f64,

    /// 请求方法
    #[arg(long, default_value = "GET")]
    method: String,

    /// 最小可接受状态码
    #[arg(long, default_value_t = 200)]
    min_status: u16,

    /// 最大可接受状态码
    #[arg(long, default_value_t = 299)]
    max_status: u16,

    url: String,
}

async fn check(args: &Args) -> anyhow::Result<()> {
    let method = Method::from_bytes(args.method.to_uppercase().as_bytes())?;
    let timeout = Duration::try_from_secs_f64(args.timeout)?;
    let client = reqwest::Client::builder().timeout(timeout).build()?;

    let status = client
        .request(method, &args.url)
        .send()
        .await?
        .status()
        .as_u16();

    if status < args.min_status || status > args.max_status {
        anyhow::bail!("bad status: {}: not healthy", status);
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();
    match check(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
