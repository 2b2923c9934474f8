// crates/lm_config/src/cell_grid.rs

//! 连接单元网格配置
//!
//! 正规域分解的单元网格尺寸约束。`max_range` 是短程相互作用的
//! 最大作用距离（含 skin），`max_cut` 是纯截断距离，二者之差
//! 决定 Verlet skin 的可用上限。

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// 默认单元数上限（每 rank）
pub const DEFAULT_MAX_NUM_CELLS: usize = 32768;

/// 剪切（Lees-Edwards 型）边界配置
///
/// 剪切轴的幽灵层厚度为 2 而非 1，且该轴至少需要 2 个内部单元。
/// 原先隐藏在网格构造里的 "+1" 分支在这里成为显式配置。
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ShearConfig {
    /// 剪切轴（0 = x, 1 = y, 2 = z）
    pub axis: usize,
}

/// 连接单元网格配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellGridConfig {
    /// 最大作用距离（截断 + skin）
    pub max_range: f64,
    /// 最大截断距离
    pub max_cut: f64,
    /// 每 rank 单元数上限
    #[serde(default = "default_max_num_cells")]
    pub max_num_cells: usize,
    /// 每 rank 单元数下限
    #[serde(default = "default_min_num_cells")]
    pub min_num_cells: usize,
    /// 剪切边界（可选）
    #[serde(default)]
    pub shear: Option<ShearConfig>,
}

fn default_max_num_cells() -> usize {
    DEFAULT_MAX_NUM_CELLS
}

fn default_min_num_cells() -> usize {
    1
}

impl CellGridConfig {
    /// 以默认上下限创建
    pub fn new(max_range: f64, max_cut: f64) -> Self {
        Self {
            max_range,
            max_cut,
            max_num_cells: DEFAULT_MAX_NUM_CELLS,
            min_num_cells: 1,
            shear: None,
        }
    }

    /// 校验
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_range < 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "max_range".into(),
                value: self.max_range.to_string(),
                reason: "不能为负".into(),
            });
        }
        if self.max_cut > self.max_range {
            return Err(ConfigError::InvalidValue {
                key: "max_cut".into(),
                value: self.max_cut.to_string(),
                reason: format!("截断距离不能超过 max_range = {}", self.max_range),
            });
        }
        if self.max_num_cells < self.min_num_cells {
            return Err(ConfigError::InvalidValue {
                key: "max_num_cells".into(),
                value: self.max_num_cells.to_string(),
                reason: format!("小于 min_num_cells = {}", self.min_num_cells),
            });
        }
        if let Some(shear) = &self.shear {
            if shear.axis > 2 {
                return Err(ConfigError::InvalidValue {
                    key: "shear.axis".into(),
                    value: shear.axis.to_string(),
                    reason: "坐标轴必须为 0/1/2".into(),
                });
            }
        }
        Ok(())
    }

    /// 各轴幽灵层厚度
    ///
    /// 非剪切轴为 1，剪切轴为 2。
    pub fn ghost_thickness(&self) -> [i32; 3] {
        let mut t = [1; 3];
        if let Some(shear) = &self.shear {
            t[shear.axis] = 2;
        }
        t
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_default() {
        let cfg = CellGridConfig::new(2.0, 1.8);
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.ghost_thickness(), [1, 1, 1]);
    }

    #[test]
    fn test_cut_beyond_range_rejected() {
        let cfg = CellGridConfig::new(2.0, 2.5);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_shear_axis_thickness() {
        let mut cfg = CellGridConfig::new(2.0, 1.8);
        cfg.shear = Some(ShearConfig { axis: 1 });
        assert_eq!(cfg.ghost_thickness(), [1, 2, 1]);
    }
}
