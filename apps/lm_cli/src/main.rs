// apps/lm_cli/src/main.rs

//! LatMD 命令行界面
//!
//! 并行空间分解核心的演示与配置校验入口。
//!
//! # 架构层级
//!
//! 本模块属于应用层：只消费核心 crate 的公有 API，积分与力核
//! 作为宿主侧示例实现。

mod commands;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// LatMD 空间分解核心命令行工具
#[derive(Parser)]
#[command(name = "lm_cli")]
#[command(author = "LatMD Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "LatMD parallel spatial-decomposition core", long_about = None)]
struct Cli {
    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 运行单 rank 演示模拟
    Run(commands::run::RunArgs),
    /// 显示核心信息
    Info(commands::info::InfoArgs),
    /// 验证配置文件
    Validate(commands::validate::ValidateArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 初始化日志
    let level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run(args) => commands::run::execute(args),
        Commands::Info(args) => commands::info::execute(args),
        Commands::Validate(args) => commands::validate::execute(args),
    }
}
