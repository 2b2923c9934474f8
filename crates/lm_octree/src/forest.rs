// crates/lm_octree/src/forest.rs

//! 线性化森林
//!
//! 每 rank 持有 fkey 有序的本地叶子数组。细化与粗化是纯谓词
//! 驱动的单层扫描；任何网格变更后必须恢复 2:1 平衡
//! （[`balance_2_to_1`]）并重新同步 [`crate::ForestInfo`]。
//!
//! 粗化只作用于完整的本地家族（8 个兄弟都在本 rank），跨 rank
//! 家族留待下一次重分配后自然可粗化。

use glam::{DVec3, IVec3};
use tracing::debug;

use lm_comm::{Communicator, ReduceOp};
use lm_foundation::{LmError, LmResult};

use crate::ghost::GhostLayer;
use crate::info::ForestInfo;
use crate::quadrant::{level_len, Quadrant, MAX_LEVEL, TREE_FKEY_SPAN};

/// 面与棱方向（6 + 12），2:1 平衡的邻接关系
pub const FACE_EDGE_DIRS: [[i32; 3]; 18] = [
    [-1, 0, 0],
    [1, 0, 0],
    [0, -1, 0],
    [0, 1, 0],
    [0, 0, -1],
    [0, 0, 1],
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

/// 分布式砖块树森林（本地视图）
#[derive(Debug, Clone)]
pub struct Forest {
    /// 树网格（每个单位砖一棵树）
    pub tree_grid: IVec3,
    /// 本地叶子，按 fkey 升序
    pub leaves: Vec<Quadrant>,
}

impl Forest {
    /// 树总数
    #[inline]
    pub fn n_trees(&self) -> usize {
        (self.tree_grid.x * self.tree_grid.y * self.tree_grid.z) as usize
    }

    /// 本地叶子数
    #[inline]
    pub fn n_local(&self) -> usize {
        self.leaves.len()
    }

    /// 以统一层级创建并按叶子数均匀分布
    pub fn new_uniform(tree_grid: IVec3, level: u8, rank: usize, size: usize) -> Self {
        let per_tree = 1i64 << (3 * level as i64);
        let n_trees = (tree_grid.x * tree_grid.y * tree_grid.z) as i64;
        let total = n_trees * per_tree;
        let lo = total * rank as i64 / size as i64;
        let hi = total * (rank as i64 + 1) / size as i64;

        let shift = MAX_LEVEL - level;
        let mut leaves = Vec::with_capacity((hi - lo) as usize);
        for idx in lo..hi {
            let tree = (idx / per_tree) as u32;
            let m = idx % per_tree;
            let [cx, cy, cz] = lm_foundation::morton::decode(m);
            leaves.push(Quadrant {
                tree,
                x: (cx as u32) << shift,
                y: (cy as u32) << shift,
                z: (cz as u32) << shift,
                level,
            });
        }
        Self { tree_grid, leaves }
    }

    // ========================================================
    // 坐标
    // ========================================================

    /// 各轴全局最细单元数
    #[inline]
    pub fn global_extent(&self) -> [i64; 3] {
        let span = level_len(0) as i64;
        [
            self.tree_grid.x as i64 * span,
            self.tree_grid.y as i64 * span,
            self.tree_grid.z as i64 * span,
        ]
    }

    /// 象限的全局最细坐标（树网格展开）
    pub fn global_coords(&self, q: &Quadrant) -> [i64; 3] {
        let t = lm_grid_unlinear(q.tree as i64, self.tree_grid);
        let span = level_len(0) as i64;
        [
            t[0] * span + q.x as i64,
            t[1] * span + q.y as i64,
            t[2] * span + q.z as i64,
        ]
    }

    /// 由全局坐标（周期回绕后）与层级重建象限
    pub fn quad_from_global(&self, g: [i64; 3], level: u8) -> Quadrant {
        let ext = self.global_extent();
        let span = level_len(0) as i64;
        let mut tree = [0i64; 3];
        let mut local = [0u32; 3];
        for d in 0..3 {
            let w = g[d].rem_euclid(ext[d]);
            tree[d] = w / span;
            local[d] = (w % span) as u32;
        }
        let tid = tree[0] + self.tree_grid.x as i64 * (tree[1] + self.tree_grid.y as i64 * tree[2]);
        Quadrant {
            tree: tid as u32,
            x: local[0],
            y: local[1],
            z: local[2],
            level,
        }
    }

    /// `dir` 方向的同层邻居象限（周期回绕）
    pub fn neighbor_region(&self, q: &Quadrant, dir: [i32; 3]) -> Quadrant {
        let len = q.len() as i64;
        let mut g = self.global_coords(q);
        for d in 0..3 {
            g[d] += dir[d] as i64 * len;
        }
        self.quad_from_global(g, q.level)
    }

    /// 盒内位置的最细层 Morton 键
    ///
    /// 树查找（位置按树网格缩放取整）后对截断的分数坐标按
    /// `2^MAX_LEVEL` 缩放做 Morton 交织。
    pub fn fkey_of_position(&self, pos: DVec3, box_l: DVec3) -> i64 {
        let span = level_len(0) as f64;
        let mut tree = [0i64; 3];
        let mut local = [0i64; 3];
        for d in 0..3 {
            let s = (pos[d] / box_l[d]) * self.tree_grid[d] as f64;
            let t = (s.floor() as i64).clamp(0, self.tree_grid[d] as i64 - 1);
            let frac = (s - t as f64).clamp(0.0, 1.0);
            tree[d] = t;
            local[d] = ((frac * span) as i64).clamp(0, span as i64 - 1);
        }
        let tid = tree[0] + self.tree_grid.x as i64 * (tree[1] + self.tree_grid.y as i64 * tree[2]);
        tid * TREE_FKEY_SPAN + lm_foundation::morton::encode(local[0], local[1], local[2])
    }

    /// 包含 `fkey` 的本地叶子槽位
    pub fn find_leaf(&self, fkey: i64) -> Option<usize> {
        let i = self.leaves.partition_point(|l| l.fkey() <= fkey);
        if i == 0 {
            return None;
        }
        let leaf = &self.leaves[i - 1];
        (fkey < leaf.fkey_end()).then_some(i - 1)
    }

    /// fkey 区间 `[lo, hi)` 内的本地叶子槽位范围
    pub fn leaves_in_range(&self, lo: i64, hi: i64) -> std::ops::Range<usize> {
        let a = self.leaves.partition_point(|l| l.fkey() < lo);
        let b = self.leaves.partition_point(|l| l.fkey() < hi);
        a..b
    }

    // ========================================================
    // 细化 / 粗化 / 平衡
    // ========================================================

    /// 单层细化扫描
    ///
    /// 谓词返回真且未达 `max_level` 的叶子替换为 8 个子象限。
    /// 返回被细化的叶子数。
    pub fn refine(&mut self, max_level: u8, mut pred: impl FnMut(usize, &Quadrant) -> bool) -> usize {
        let mut out = Vec::with_capacity(self.leaves.len());
        let mut refined = 0;
        for (slot, leaf) in self.leaves.iter().enumerate() {
            if leaf.level < max_level && pred(slot, leaf) {
                refined += 1;
                for c in 0..8 {
                    out.push(leaf.child(c));
                }
            } else {
                out.push(*leaf);
            }
        }
        self.leaves = out;
        refined
    }

    /// 单层粗化扫描
    ///
    /// 只合并完整的本地家族；谓词收到家族首叶槽位与 8 个兄弟。
    /// 返回被合并的家族数。
    pub fn coarsen(
        &mut self,
        min_level: u8,
        mut pred: impl FnMut(usize, &[Quadrant]) -> bool,
    ) -> usize {
        let mut out = Vec::with_capacity(self.leaves.len());
        let mut merged = 0;
        let mut i = 0;
        while i < self.leaves.len() {
            let family = &self.leaves[i..(i + 8).min(self.leaves.len())];
            if family.len() == 8
                && family[0].level > min_level
                && Quadrant::is_family(family)
                && pred(i, family)
            {
                out.push(family[0].parent());
                merged += 1;
                i += 8;
            } else {
                out.push(self.leaves[i]);
                i += 1;
            }
        }
        self.leaves = out;
        merged
    }

    /// 恢复面 / 棱方向的 2:1 平衡
    ///
    /// 涟漪迭代：细化所有与比自身细两层以上叶子相邻的叶子，
    /// 交换边界镜像，直到全局无变化。收敛步数受层级差上界约束。
    pub fn balance_2_to_1(&mut self, comm: &dyn Communicator) -> LmResult<()> {
        let mut rounds = 0usize;
        loop {
            let info = ForestInfo::gather(self, comm)?;
            let ghost = GhostLayer::build(self, &info, comm)?;

            let mut marks = vec![false; self.leaves.len()];
            for (slot, leaf) in self.leaves.iter().enumerate() {
                if leaf.level + 1 >= MAX_LEVEL {
                    continue;
                }
                'dirs: for dir in FACE_EDGE_DIRS {
                    let region = self.neighbor_region(leaf, dir);
                    let (lo, hi) = (region.fkey(), region.fkey_end());
                    for r in self.leaves_in_range(lo, hi) {
                        if self.leaves[r].level > leaf.level + 1 {
                            marks[slot] = true;
                            break 'dirs;
                        }
                    }
                    for g in ghost.leaves_in_range(lo, hi) {
                        if ghost.leaves[g].level > leaf.level + 1 {
                            marks[slot] = true;
                            break 'dirs;
                        }
                    }
                }
            }

            let changed = marks.iter().any(|&m| m);
            if changed {
                self.refine(MAX_LEVEL, |slot, _| marks[slot]);
            }
            rounds += 1;
            let global_changed = comm.all_reduce_i64(changed as i64, ReduceOp::Max) != 0;
            if !global_changed {
                break;
            }
            if rounds > MAX_LEVEL as usize * 2 {
                return Err(LmError::internal("2:1 平衡未在层级上界内收敛"));
            }
        }
        debug!(rounds, n_local = self.n_local(), "2:1 平衡完成");
        Ok(())
    }

    /// 校验本地叶子有序且互不重叠
    pub fn check_sorted(&self) -> LmResult<()> {
        for w in self.leaves.windows(2) {
            if w[0].fkey_end() > w[1].fkey() {
                return Err(LmError::inconsistency(format!(
                    "叶子乱序或重叠: {:?} 与 {:?}",
                    w[0], w[1]
                )));
            }
        }
        Ok(())
    }
}

fn lm_grid_unlinear(idx: i64, dims: IVec3) -> [i64; 3] {
    [
        idx % dims.x as i64,
        (idx / dims.x as i64) % dims.y as i64,
        idx / (dims.x as i64 * dims.y as i64),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use lm_comm::SerialComm;

    #[test]
    fn test_uniform_forest_counts() {
        let f = Forest::new_uniform(IVec3::ONE, 2, 0, 1);
        assert_eq!(f.n_local(), 64);
        f.check_sorted().unwrap();
    }

    #[test]
    fn test_uniform_split_covers_all() {
        let a = Forest::new_uniform(IVec3::new(2, 1, 1), 1, 0, 2);
        let b = Forest::new_uniform(IVec3::new(2, 1, 1), 1, 1, 2);
        assert_eq!(a.n_local() + b.n_local(), 16);
        assert!(a.leaves.last().unwrap().fkey() < b.leaves[0].fkey());
    }

    #[test]
    fn test_refine_then_coarsen_roundtrip() {
        let mut f = Forest::new_uniform(IVec3::ONE, 1, 0, 1);
        let n0 = f.n_local();
        f.refine(MAX_LEVEL, |slot, _| slot == 0);
        assert_eq!(f.n_local(), n0 + 7);
        f.check_sorted().unwrap();

        let merged = f.coarsen(0, |_, family| family[0].level == 2);
        assert_eq!(merged, 1);
        assert_eq!(f.n_local(), n0);
        f.check_sorted().unwrap();
    }

    #[test]
    fn test_neighbor_region_wraps() {
        let f = Forest::new_uniform(IVec3::ONE, 1, 0, 1);
        let corner = f.leaves[0]; // (0,0,0) at level 1
        let left = f.neighbor_region(&corner, [-1, 0, 0]);
        // 周期回绕到 +x 端
        assert_eq!(left.x, level_len(0) - level_len(1));
        assert_eq!(left.level, 1);
    }

    #[test]
    fn test_balance_single_rank() {
        // 一角细化三层, 平衡后面/棱邻居层差 ≤ 1
        let comm = SerialComm::new();
        let mut f = Forest::new_uniform(IVec3::ONE, 1, 0, 1);
        f.refine(MAX_LEVEL, |slot, _| slot == 0);
        f.refine(MAX_LEVEL, |_, q| q.level == 2 && q.x == 0 && q.y == 0 && q.z == 0);
        f.refine(MAX_LEVEL, |_, q| q.level == 3 && q.x == 0 && q.y == 0 && q.z == 0);
        f.balance_2_to_1(&comm).unwrap();
        f.check_sorted().unwrap();

        // 全量校验 P5
        for leaf in &f.leaves {
            for dir in FACE_EDGE_DIRS {
                let region = f.neighbor_region(leaf, dir);
                for r in f.leaves_in_range(region.fkey(), region.fkey_end()) {
                    assert!(
                        f.leaves[r].level <= leaf.level + 1,
                        "{:?} 与 {:?} 层差超过 1",
                        leaf,
                        f.leaves[r]
                    );
                }
            }
        }
    }

    #[test]
    fn test_fkey_of_position() {
        let f = Forest::new_uniform(IVec3::ONE, 0, 0, 1);
        let box_l = DVec3::splat(8.0);
        let k0 = f.fkey_of_position(DVec3::new(0.1, 0.1, 0.1), box_l);
        let k1 = f.fkey_of_position(DVec3::new(7.9, 7.9, 7.9), box_l);
        assert!(k0 < k1);
        assert_eq!(f.find_leaf(k0), Some(0));
        assert_eq!(f.find_leaf(k1), Some(0));
    }
}
