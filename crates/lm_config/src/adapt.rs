// crates/lm_config/src/adapt.rs

//! 自适应网格配置
//!
//! 细化 / 粗化判据的阈值与层级界限。阈值以全局 min/max 归一：
//! 某象限满足 `value - min >= tau_refine * (max - min)` 时标记细化，
//! `value - min <= tau_coarsen * (max - min)` 时标记粗化。

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// 自适应网格配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptConfig {
    /// 基础层级（粗化下限）
    pub base_level: u8,
    /// 最大细化层级
    pub max_level: u8,
    /// 速度判据细化阈值
    #[serde(default = "default_vel_refine")]
    pub vel_refine: f64,
    /// 速度判据粗化阈值
    #[serde(default = "default_vel_coarsen")]
    pub vel_coarsen: f64,
    /// 涡量判据细化阈值
    #[serde(default = "default_vort_refine")]
    pub vort_refine: f64,
    /// 涡量判据粗化阈值
    #[serde(default = "default_vort_coarsen")]
    pub vort_coarsen: f64,
}

fn default_vel_refine() -> f64 {
    0.15
}
fn default_vel_coarsen() -> f64 {
    0.05
}
fn default_vort_refine() -> f64 {
    0.05
}
fn default_vort_coarsen() -> f64 {
    0.02
}

impl AdaptConfig {
    /// 以默认阈值创建
    pub fn new(base_level: u8, max_level: u8) -> Self {
        Self {
            base_level,
            max_level,
            vel_refine: default_vel_refine(),
            vel_coarsen: default_vel_coarsen(),
            vort_refine: default_vort_refine(),
            vort_coarsen: default_vort_coarsen(),
        }
    }

    /// 校验
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_level < self.base_level {
            return Err(ConfigError::InvalidValue {
                key: "max_level".into(),
                value: self.max_level.to_string(),
                reason: format!("小于 base_level = {}", self.base_level),
            });
        }
        for (key, lo, hi) in [
            ("vel", self.vel_coarsen, self.vel_refine),
            ("vort", self.vort_coarsen, self.vort_refine),
        ] {
            if !(0.0..=1.0).contains(&lo) || !(0.0..=1.0).contains(&hi) {
                return Err(ConfigError::InvalidValue {
                    key: format!("{}_threshold", key),
                    value: format!("({}, {})", lo, hi),
                    reason: "阈值必须落在 [0, 1]".into(),
                });
            }
            if lo > hi {
                return Err(ConfigError::InvalidValue {
                    key: format!("{}_coarsen", key),
                    value: lo.to_string(),
                    reason: "粗化阈值不能超过细化阈值".into(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_valid() {
        assert!(AdaptConfig::new(3, 5).validate().is_ok());
    }

    #[test]
    fn test_inverted_levels_rejected() {
        assert!(AdaptConfig::new(5, 3).validate().is_err());
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let mut cfg = AdaptConfig::new(0, 4);
        cfg.vel_coarsen = 0.5;
        cfg.vel_refine = 0.1;
        assert!(cfg.validate().is_err());
    }
}
