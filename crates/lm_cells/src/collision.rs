// crates/lm_cells/src/collision.rs

//! 碰撞概率插值表
//!
//! 外部碰撞检测模块的数据载体。核心只负责存储、序列化与插值；
//! 何时判定碰撞（距离门限 `CollisionParams::distance`）由外部
//! 模块决定。
//!
//! `maxval` 既是插值表的（含端点）上界，也是概率求值的截断：
//! 超出 `maxval` 的距离概率为零。外部的碰撞距离门限是独立的、
//! 更严格的闸门，二者不互相推导。

use serde::{Deserialize, Serialize};

/// 按距离分档的碰撞概率表
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TabulatedCollisionProbability {
    /// 插值下界
    pub minval: f64,
    /// 插值上界（含），同时是概率截断
    pub maxval: f64,
    /// 等距概率采样
    pub values: Vec<f64>,
}

impl TabulatedCollisionProbability {
    /// 由等距采样构造
    pub fn from_samples(minval: f64, maxval: f64, values: Vec<f64>) -> Self {
        Self {
            minval,
            maxval,
            values,
        }
    }

    /// 截断距离（= `maxval`）
    #[inline]
    pub fn cutoff(&self) -> f64 {
        self.maxval
    }

    /// 距离 `x` 处的线性插值概率
    ///
    /// `x > maxval` 返回 0；`x < minval` 返回首个采样值。
    pub fn probability(&self, x: f64) -> f64 {
        if self.values.is_empty() || x > self.maxval {
            return 0.0;
        }
        if self.values.len() == 1 || x <= self.minval {
            return self.values[0];
        }
        let inv_step = (self.values.len() - 1) as f64 / (self.maxval - self.minval);
        let t = (x - self.minval) * inv_step;
        let i = (t.floor() as usize).min(self.values.len() - 2);
        let frac = t - i as f64;
        self.values[i] * (1.0 - frac) + self.values[i + 1] * frac
    }
}

/// 碰撞检测参数
///
/// 显式上下文对象：由拓扑初始化构造并随调用传递，不做进程级
/// 全局。字段语义属于外部碰撞模块。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollisionParams {
    /// 碰撞判定距离
    pub distance: f64,
    /// 粒子中心间使用的键型
    pub bond_centers: i32,
    /// 基础碰撞概率
    pub collision_probability: f64,
    /// 按距离插值的概率表（可选）
    pub probability_table: Option<TabulatedCollisionProbability>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolation_endpoints() {
        let tab = TabulatedCollisionProbability::from_samples(0.0, 1.0, vec![1.0, 0.0]);
        assert_eq!(tab.probability(0.0), 1.0);
        assert_eq!(tab.probability(1.0), 0.0);
        assert!((tab.probability(0.25) - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_beyond_cutoff_is_zero() {
        let tab = TabulatedCollisionProbability::from_samples(0.0, 1.0, vec![1.0, 0.5]);
        assert_eq!(tab.probability(1.0 + 1e-9), 0.0);
        assert_eq!(tab.cutoff(), 1.0);
    }

    #[test]
    fn test_below_min_clamps() {
        let tab = TabulatedCollisionProbability::from_samples(0.5, 1.0, vec![0.8, 0.2]);
        assert_eq!(tab.probability(0.1), 0.8);
    }
}
