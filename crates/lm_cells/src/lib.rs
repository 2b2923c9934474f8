// crates/lm_cells/src/lib.rs

//! 粒子存储层
//!
//! 短程相互作用的粒子容器与正规域分解的单元结构。
//!
//! # 模块概览
//!
//! - [`particle`]: 粒子（定长本体 + 动态尾部）
//! - [`cell`]: 单元（稠密粒子序列）
//! - [`store`]: 进程级单元集合与粒子 id 索引
//! - [`linked`]: 连接单元网格（网格尺寸算法、邻居表、配对遍历）
//! - [`collision`]: 碰撞概率插值表（外部碰撞模块的数据载体）
//!
//! # 所有权设计
//!
//! 单元持有粒子本体；邻居表与粒子索引只存储**索引**，不存引用，
//! 从结构上消除 单元↔粒子↔邻居 的循环引用。

pub mod cell;
pub mod collision;
pub mod linked;
pub mod particle;
pub mod store;

pub use cell::Cell;
pub use collision::{CollisionParams, TabulatedCollisionProbability};
pub use linked::{LinkedCells, VerletLists};
pub use particle::{BondList, Particle, ParticleBody, ParticleId};
pub use store::{CellStore, ResortLevel};
