// crates/lm_octree/src/virtual_view.rs

//! 虚拟子象限视图
//!
//! 任一面 / 棱邻居比自身更细的叶子携带 8 个虚拟子象限
//! （细一层的逻辑细分），供层级混合的邻居遍历以统一粒度进行，
//! 不改变所有权。

use crate::forest::Forest;
use crate::mesh::MeshView;
use crate::quadrant::{Quadrant, MAX_LEVEL};

/// 虚拟子象限视图
#[derive(Debug, Clone)]
pub struct VirtualView {
    /// 每个本地叶子的虚拟子象限（无更细邻居时为 `None`）
    pub virtuals: Vec<Option<[Quadrant; 8]>>,
    /// 携带虚拟细分的叶子数
    pub n_virtual: usize,
}

impl VirtualView {
    /// 由网格视图判定并构建
    ///
    /// 一个面 / 棱出现多个邻居即说明对侧更细。
    pub fn build(forest: &Forest, mesh: &MeshView) -> Self {
        let mut virtuals = Vec::with_capacity(forest.n_local());
        let mut n_virtual = 0;

        for (slot, leaf) in forest.leaves.iter().enumerate() {
            let finer_face = mesh.face_neighbors[slot].iter().any(|nb| nb.len() > 1);
            let finer_edge = mesh
                .edge_neighbors
                .as_ref()
                .map(|e| e[slot].iter().any(|nb| nb.len() > 1))
                .unwrap_or(false);

            if (finer_face || finer_edge) && leaf.level < MAX_LEVEL {
                let mut subs = [*leaf; 8];
                for (c, sub) in subs.iter_mut().enumerate() {
                    *sub = leaf.child(c as u8);
                }
                virtuals.push(Some(subs));
                n_virtual += 1;
            } else {
                virtuals.push(None);
            }
        }

        Self {
            virtuals,
            n_virtual,
        }
    }
}
