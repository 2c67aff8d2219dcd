//! 生成集群共享证书
//!
//! 所有 Pod 挂载同一份 `tls.crt`/`tls.key`，证书同时作为信任根。
//!
//! 运行: gencert --dir ./certs --name db --dns '*.db.default.svc.cluster.local'

use std::path::PathBuf;

use clap::Parser;
use kubesql::cluster::CertificateGenerator;

#[derive(Parser, Debug)]
#[command(author, version, about = "Write a shared cluster certificate", long_about = None)]
struct Args {
    /// 输出目录
    #[arg(long, default_value = "./certs")]
    dir: PathBuf,

    /// 主名称（CN，同时是节点间拨号使用的服务器名）
    #[arg(long)]
    name: String,

    /// 额外 DNS 名称，可重复
    #[arg(long)]
    dns: Vec<String>,

    /// 有效期（天）
    #[arg(long, default_value_t = 365)]
    days: u32,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut names = vec![args.name];
    names.extend(args.dns);

    let (cert, key) = CertificateGenerator::new(names)
        .validity_days(args.days)
        .generate_and_save(&args.dir)?;
    println!("{}\n{}", cert.display(), key.display());
    Ok(())
}
