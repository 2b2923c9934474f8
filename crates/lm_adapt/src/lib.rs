// crates/lm_adapt/src/lib.rs

//! 自适应层
//!
//! 随流场演化调整八叉树分解：由流动指标决定细化 / 粗化标记，
//! 在新旧森林间映射每象限负载，再做保持双森林对齐的加权重分配。
//!
//! # 模块概览
//!
//! - [`payload`]: D3Q19 流体负载（分布、模式、流体场）与层间映射
//! - [`criteria`]: 速度 / 涡量判据的标记收集
//! - [`controller`]: 网格变更全流程（标记→变形→映射→重分配→重插入）
//! - [`metric`]: 负载权重的线性组合度量解析
//! - [`repart`]: 最细公共树与双森林加权重分配

pub mod controller;
pub mod criteria;
pub mod metric;
pub mod payload;
pub mod repart;

pub use controller::AdaptController;
pub use criteria::{collect_flags, Flag};
pub use metric::{CellLoad, Metric};
pub use payload::LbPayload;
pub use repart::weighted_partition;
