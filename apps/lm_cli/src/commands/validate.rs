// apps/lm_cli/src/commands/validate.rs

//! 配置校验

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use tracing::info;

use lm_config::CoreConfig;

/// 校验参数
#[derive(Args)]
pub struct ValidateArgs {
    /// 配置文件路径（JSON）
    pub config: PathBuf,
}

pub fn execute(args: ValidateArgs) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(&args.config)
        .with_context(|| format!("读取配置失败: {}", args.config.display()))?;
    let cfg: CoreConfig = serde_json::from_str(&text).context("配置解析失败")?;
    cfg.validate().context("配置校验失败")?;

    info!(path = %args.config.display(), "配置有效");
    println!("配置有效: box_l = {:?}", cfg.box_l);
    if let Some(adapt) = &cfg.adapt {
        println!(
            "自适应网格: 层级 [{}, {}]",
            adapt.base_level, adapt.max_level
        );
    }
    if let Some(fft) = &cfg.fft {
        println!("FFT 网格: {:?}", fft.mesh);
    }
    Ok(())
}
