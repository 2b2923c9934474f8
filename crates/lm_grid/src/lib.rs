// crates/lm_grid/src/lib.rs

//! 几何层
//!
//! 全局盒子几何、周期折叠、rank 与笛卡尔坐标映射。
//!
//! # 模块概览
//!
//! - [`sim_box`]: 盒子边长、周期性、坐标折叠
//! - [`node_grid`]: 笛卡尔进程网格与 26 邻居表
//! - [`local_box`]: 每 rank 的局部子盒

pub mod local_box;
pub mod node_grid;
pub mod sim_box;

pub use local_box::LocalBox;
pub use node_grid::NodeGrid;
pub use sim_box::SimBox;

use glam::IVec3;

/// 三维索引的行主序线性化（x 变化最快）
#[inline]
pub fn linear_index(i: IVec3, dims: IVec3) -> usize {
    debug_assert!(i.cmpge(IVec3::ZERO).all() && i.cmplt(dims).all());
    (i.x + dims.x * (i.y + dims.y * i.z)) as usize
}

/// [`linear_index`] 的逆映射
#[inline]
pub fn unlinear_index(idx: usize, dims: IVec3) -> IVec3 {
    let idx = idx as i32;
    IVec3::new(
        idx % dims.x,
        (idx / dims.x) % dims.y,
        idx / (dims.x * dims.y),
    )
}
