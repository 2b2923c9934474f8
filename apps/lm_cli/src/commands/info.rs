// apps/lm_cli/src/commands/info.rs

//! 核心信息

use clap::Args;

/// 信息参数
#[derive(Args)]
pub struct InfoArgs {
    /// 输出 JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

pub fn execute(args: InfoArgs) -> anyhow::Result<()> {
    let fields = [
        ("version", env!("CARGO_PKG_VERSION").to_string()),
        ("octree_max_level", lm_octree::MAX_LEVEL.to_string()),
        ("round_error_prec", lm_foundation::ROUND_ERROR_PREC.to_string()),
    ];

    if args.json {
        let map: serde_json::Map<String, serde_json::Value> = fields
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.clone())))
            .collect();
        println!("{}", serde_json::to_string_pretty(&map)?);
    } else {
        for (k, v) in &fields {
            println!("{:<18} {}", k, v);
        }
    }
    Ok(())
}
