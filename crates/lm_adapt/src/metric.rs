// crates/lm_adapt/src/metric.rs

//! 负载权重度量
//!
//! 单项度量的线性组合，如 `"2.0*ncells +1.7*nghostpart"`。
//! 因子、乘号与加号均必填（负常数只允许出现在首项，其后用
//! 减号），单独的度量名按 `1.0*名` 解释。

use rayon::prelude::*;

/// 每象限（或每单元）的负载快照
#[derive(Debug, Clone, Copy, Default)]
pub struct CellLoad {
    /// 本地粒子数
    pub n_particles: usize,
    /// 相邻幽灵单元数
    pub n_ghost_cells: usize,
    /// 幽灵粒子数
    pub n_ghost_particles: usize,
}

/// 单项度量
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// 单元计数（常数 1）
    NCells,
    /// 粒子数
    NPart,
    /// 幽灵单元数
    NGhostCells,
    /// 幽灵粒子数
    NGhostPart,
    /// 确定性伪随机权重
    Rand,
}

impl MetricKind {
    fn parse(name: &str) -> Result<Self, MetricParseError> {
        match name {
            "ncells" | "uniform" => Ok(Self::NCells),
            "npart" => Ok(Self::NPart),
            "nghostcells" => Ok(Self::NGhostCells),
            "nghostpart" => Ok(Self::NGhostPart),
            "rand" => Ok(Self::Rand),
            other => Err(MetricParseError::UnknownMetric(other.to_string())),
        }
    }

    fn eval(self, idx: usize, load: &CellLoad) -> f64 {
        match self {
            Self::NCells => 1.0,
            Self::NPart => load.n_particles as f64,
            Self::NGhostCells => load.n_ghost_cells as f64,
            Self::NGhostPart => load.n_ghost_particles as f64,
            Self::Rand => xorshift_unit(idx as u64),
        }
    }
}

/// 度量描述解析错误
#[derive(Debug, thiserror::Error)]
pub enum MetricParseError {
    /// 未知的度量名
    #[error("未知的度量名: {0}")]
    UnknownMetric(String),
    /// 数字解析失败
    #[error("非法的因子: {0}")]
    BadFactor(String),
    /// 空描述
    #[error("度量描述为空")]
    Empty,
}

/// 线性组合度量
#[derive(Debug, Clone, Default)]
pub struct Metric {
    terms: Vec<(f64, MetricKind)>,
}

impl Metric {
    /// 解析度量描述
    pub fn parse(desc: &str) -> Result<Self, MetricParseError> {
        let mut terms = Vec::new();
        for token in desc.split_whitespace() {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            let (factor, name) = match token.split_once('*') {
                Some((f, name)) => {
                    let factor: f64 = f
                        .parse()
                        .map_err(|_| MetricParseError::BadFactor(f.to_string()))?;
                    (factor, name)
                }
                None => (1.0, token),
            };
            terms.push((factor, MetricKind::parse(name)?));
        }
        if terms.is_empty() {
            return Err(MetricParseError::Empty);
        }
        Ok(Self { terms })
    }

    /// 对每个负载快照求权重
    pub fn evaluate(&self, loads: &[CellLoad]) -> Vec<f64> {
        loads
            .par_iter()
            .enumerate()
            .map(|(idx, load)| {
                self.terms
                    .iter()
                    .map(|(factor, kind)| factor * kind.eval(idx, load))
                    .sum()
            })
            .collect()
    }
}

/// 由索引确定的 (0,1] 伪随机数
fn xorshift_unit(seed: u64) -> f64 {
    let mut x = seed.wrapping_add(0x9e3779b97f4a7c15);
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    (x >> 11) as f64 / (1u64 << 53) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loads() -> Vec<CellLoad> {
        vec![
            CellLoad {
                n_particles: 10,
                n_ghost_cells: 2,
                n_ghost_particles: 4,
            },
            CellLoad {
                n_particles: 0,
                n_ghost_cells: 1,
                n_ghost_particles: 0,
            },
        ]
    }

    #[test]
    fn test_linear_combination() {
        let m = Metric::parse("2.0*ncells +1.5*nghostpart").unwrap();
        let w = m.evaluate(&loads());
        assert_eq!(w, vec![2.0 + 6.0, 2.0]);
    }

    #[test]
    fn test_bare_name_is_unit_factor() {
        let m = Metric::parse("npart").unwrap();
        assert_eq!(m.evaluate(&loads()), vec![10.0, 0.0]);
    }

    #[test]
    fn test_negative_leading_factor() {
        let m = Metric::parse("-1.0*ncells").unwrap();
        assert_eq!(m.evaluate(&loads()), vec![-1.0, -1.0]);
    }

    #[test]
    fn test_unknown_metric_rejected() {
        assert!(Metric::parse("3.0*bogus").is_err());
        assert!(Metric::parse("").is_err());
    }

    #[test]
    fn test_rand_is_deterministic() {
        let m = Metric::parse("rand").unwrap();
        let a = m.evaluate(&loads());
        let b = m.evaluate(&loads());
        assert_eq!(a, b);
        assert_ne!(a[0], a[1]);
    }
}
