// crates/lm_config/src/lib.rs

//! 配置层
//!
//! 核心各子系统的配置类型，全部可经 serde 反序列化并提供
//! `validate()` 检查。无效的选项组合是配置错误，而非运行时回退。
//!
//! # 模块概览
//!
//! - [`error`]: 配置错误类型
//! - [`cell_grid`]: 连接单元网格（正规域分解）配置
//! - [`adapt`]: 自适应细化 / 粗化阈值配置
//! - [`fft`]: 分布式 FFT 网格配置

pub mod adapt;
pub mod cell_grid;
pub mod error;
pub mod fft;

pub use adapt::AdaptConfig;
pub use cell_grid::{CellGridConfig, ShearConfig};
pub use error::ConfigError;
pub use fft::FftConfig;

/// 核心总配置
///
/// CLI `validate` 子命令加载的顶层结构。
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CoreConfig {
    /// 盒子边长
    pub box_l: [f64; 3],
    /// 各方向周期性
    #[serde(default = "default_periodic")]
    pub periodic: [bool; 3],
    /// 连接单元网格配置
    pub cell_grid: CellGridConfig,
    /// 自适应网格配置（可选：纯 MD 运行不需要）
    #[serde(default)]
    pub adapt: Option<AdaptConfig>,
    /// FFT 配置（可选：不启用静电时不需要）
    #[serde(default)]
    pub fft: Option<FftConfig>,
}

fn default_periodic() -> [bool; 3] {
    [true; 3]
}

impl CoreConfig {
    /// 校验整体配置
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (d, &l) in self.box_l.iter().enumerate() {
            if l <= 0.0 {
                return Err(ConfigError::InvalidValue {
                    key: format!("box_l[{}]", d),
                    value: l.to_string(),
                    reason: "盒长必须为正".into(),
                });
            }
        }
        self.cell_grid.validate()?;
        if let Some(adapt) = &self.adapt {
            adapt.validate()?;
        }
        if let Some(fft) = &self.fft {
            fft.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_roundtrip() {
        let json = r#"{
            "box_l": [10.0, 10.0, 10.0],
            "cell_grid": { "max_range": 2.0, "max_cut": 1.8 }
        }"#;
        let cfg: CoreConfig = serde_json::from_str(json).unwrap();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.periodic, [true, true, true]);
        assert!(cfg.adapt.is_none());
    }

    #[test]
    fn test_negative_box_rejected() {
        let json = r#"{
            "box_l": [10.0, -1.0, 10.0],
            "cell_grid": { "max_range": 2.0, "max_cut": 1.8 }
        }"#;
        let cfg: CoreConfig = serde_json::from_str(json).unwrap();
        assert!(cfg.validate().is_err());
    }
}
