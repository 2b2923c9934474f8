// crates/lm_octree/src/mesh.rs

//! 网格视图
//!
//! 本地叶子的面（可选棱）邻居表，邻居可以是本地叶子或幽灵
//! 叶子。层级混合时一个面可能对应一个更粗邻居或至多 4 个更细
//! 邻居。视图在每次网格变更后重建。

use crate::forest::Forest;
use crate::ghost::GhostLayer;
use crate::info::ForestInfo;
use crate::quadrant::Quadrant;

/// 面方向（x-/x+/y-/y+/z-/z+）
pub const FACE_DIRS: [[i32; 3]; 6] = [
    [-1, 0, 0],
    [1, 0, 0],
    [0, -1, 0],
    [0, 1, 0],
    [0, 0, -1],
    [0, 0, 1],
];

/// 棱方向（12）
pub const EDGE_DIRS: [[i32; 3]; 12] = [
    [-1, -1, 0],
    [-1, 1, 0],
    [1, -1, 0],
    [1, 1, 0],
    [-1, 0, -1],
    [-1, 0, 1],
    [1, 0, -1],
    [1, 0, 1],
    [0, -1, -1],
    [0, -1, 1],
    [0, 1, -1],
    [0, 1, 1],
];

/// 邻居引用
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighborRef {
    /// 本地叶子槽位
    Local(u32),
    /// 幽灵叶子槽位
    Ghost(u32),
}

/// 网格视图
#[derive(Debug, Clone)]
pub struct MeshView {
    /// 每个本地叶子的 6 个面邻居集
    pub face_neighbors: Vec<[Vec<NeighborRef>; 6]>,
    /// 每个本地叶子的 12 个棱邻居集（启用时）
    pub edge_neighbors: Option<Vec<[Vec<NeighborRef>; 12]>>,
}

impl MeshView {
    /// 构建网格视图
    pub fn build(
        forest: &Forest,
        ghost: &GhostLayer,
        with_edges: bool,
    ) -> Self {
        let mut face_neighbors = Vec::with_capacity(forest.n_local());
        let mut edge_neighbors = with_edges.then(|| Vec::with_capacity(forest.n_local()));

        for leaf in &forest.leaves {
            let faces: [Vec<NeighborRef>; 6] = FACE_DIRS
                .map(|dir| neighbors_in_region(forest, ghost, &forest.neighbor_region(leaf, dir), dir));
            face_neighbors.push(faces);

            if let Some(edges) = edge_neighbors.as_mut() {
                let e: [Vec<NeighborRef>; 12] = EDGE_DIRS
                    .map(|dir| neighbors_in_region(forest, ghost, &forest.neighbor_region(leaf, dir), dir));
                edges.push(e);
            }
        }

        Self {
            face_neighbors,
            edge_neighbors,
        }
    }

    /// 邻居引用的全局 qid
    pub fn qid_of(&self, nref: NeighborRef, info: &ForestInfo, ghost: &GhostLayer) -> i64 {
        match nref {
            NeighborRef::Local(slot) => info.qid_of(info.rank, slot as usize),
            NeighborRef::Ghost(slot) => {
                let s = slot as usize;
                info.qid_of(ghost.owner[s], ghost.remote_slot[s] as usize)
            }
        }
    }
}

/// 与共享面 / 棱实际接触的叶子（本地 ∪ 幽灵）
///
/// 更粗或同层邻居以包含搜索命中，更细邻居以区间扫描命中；
/// 命中后按接触判定过滤（区域中贴向原叶子的一层最细单元板）。
fn neighbors_in_region(
    forest: &Forest,
    ghost: &GhostLayer,
    region: &Quadrant,
    dir: [i32; 3],
) -> Vec<NeighborRef> {
    let (lo, hi) = (region.fkey(), region.fkey_end());
    let slab = touch_slab(region, dir);
    let mut out = Vec::new();

    // 包含区域起点的更粗叶子（fkey 落在区间之前，必然接触）
    if let Some(slot) = forest.find_leaf(lo) {
        if forest.leaves[slot].fkey() < lo && forest.leaves[slot].overlaps(region) {
            out.push(NeighborRef::Local(slot as u32));
        }
    }
    if let Some(slot) = ghost.find_leaf(lo) {
        if ghost.leaves[slot].fkey() < lo && ghost.leaves[slot].overlaps(region) {
            out.push(NeighborRef::Ghost(slot as u32));
        }
    }

    // 区间内的同层或更细叶子
    for slot in forest.leaves_in_range(lo, hi) {
        if touches(&forest.leaves[slot], &slab) {
            out.push(NeighborRef::Local(slot as u32));
        }
    }
    for slot in ghost.leaves_in_range(lo, hi) {
        if touches(&ghost.leaves[slot], &slab) {
            out.push(NeighborRef::Ghost(slot as u32));
        }
    }
    out
}

/// 区域中贴向原叶子的接触板（树内坐标半开区间）
fn touch_slab(region: &Quadrant, dir: [i32; 3]) -> [(u32, u32); 3] {
    let len = region.len();
    let origin = [region.x, region.y, region.z];
    let mut slab = [(0u32, 0u32); 3];
    for d in 0..3 {
        slab[d] = match dir[d] {
            // 邻居区域在原叶子的 dir 方向：接触面在区域靠回原叶子的一侧
            1 => (origin[d], origin[d] + 1),
            -1 => (origin[d] + len - 1, origin[d] + len),
            _ => (origin[d], origin[d] + len),
        };
    }
    slab
}

fn touches(q: &Quadrant, slab: &[(u32, u32); 3]) -> bool {
    let l = q.len();
    let lo = [q.x, q.y, q.z];
    (0..3).all(|d| lo[d] < slab[d].1 && slab[d].0 < lo[d] + l)
}
