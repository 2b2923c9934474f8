// crates/lm_octree/src/lib.rs

//! 八叉树层
//!
//! 砖块树网格：笛卡尔树网格中每个单位砖根植一棵独立八叉树。
//! 每 rank 拥有全局 Morton 序中一段连续的叶子（象限）。
//!
//! # 模块概览
//!
//! - [`quadrant`]: 象限坐标代数（子代 / 父代 / 邻居 / 包含）
//! - [`forest`]: 线性化叶子数组、细化 / 粗化 / 2:1 平衡
//! - [`info`]: 跨 rank 同步的森林信息与位置查询
//! - [`ghost`]: 幽灵层（邻接远端子域的叶子镜像与负载交换）
//! - [`mesh`]: 网格视图（面 / 棱邻居 qid 表）
//! - [`virtual_view`]: 虚拟子象限视图（层级混合邻居遍历）
//! - [`partition`]: 给定配额的象限与负载搬运
//!
//! # 两套编号
//!
//! - **qid**：全局 Morton 序叶子编号，`[0, N_global)`，rank 区间
//!   `[first_qid[r], first_qid[r+1])` 互不重叠且覆盖全域；
//! - **fkey**：最细层 Morton 键 `tree·8^F + morton(坐标)`，对
//!   位置查询与区间搜索单调。二者经 [`info::ForestInfo`] 互换。

pub mod forest;
pub mod ghost;
pub mod info;
pub mod mesh;
pub mod partition;
pub mod quadrant;
pub mod virtual_view;

pub use forest::Forest;
pub use ghost::GhostLayer;
pub use info::ForestInfo;
pub use mesh::MeshView;
pub use partition::partition_given;
pub use quadrant::{Quadrant, MAX_LEVEL};
pub use virtual_view::VirtualView;
