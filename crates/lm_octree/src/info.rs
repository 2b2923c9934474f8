// crates/lm_octree/src/info.rs

//! 同步的森林信息
//!
//! 每次网格变更后刷新：rank 区间表（qid 与 fkey 两套）、
//! 每树象限偏移、全局最粗 / 最细层级。任何幽灵或通信调用
//! 之前这些数组必须是新鲜的。

use glam::DVec3;

use lm_comm::tag::REQ_FOREST_SYNC;
use lm_comm::{Communicator, ReduceOp};
use lm_foundation::{LmError, LmResult, ROUND_ERROR_PREC};

use crate::forest::Forest;
use crate::quadrant::{MAX_LEVEL, TREE_FKEY_SPAN};

/// 跨 rank 同步的森林信息
#[derive(Debug, Clone)]
pub struct ForestInfo {
    /// 本 rank
    pub rank: usize,
    /// rank 总数
    pub size: usize,
    /// 全局叶子数
    pub n_global: i64,
    /// 各 rank 首叶的全局 Morton 序编号（长度 size+1，末位哨兵）
    pub first_qid: Vec<i64>,
    /// 各 rank 首叶的 fkey（长度 size+1，空 rank 回填后值等于后继）
    pub first_fkey: Vec<i64>,
    /// 各树首叶的全局编号（单调非减）
    pub tree_leaf_offset: Vec<i64>,
    /// 本地最细层级
    pub finest_level_local: u8,
    /// 本地最粗层级
    pub coarsest_level_local: u8,
    /// 全局最细层级
    pub finest_level_global: u8,
    /// 全局最粗层级
    pub coarsest_level_global: u8,
}

impl ForestInfo {
    /// 同步并构造
    pub fn gather(forest: &Forest, comm: &dyn Communicator) -> LmResult<Self> {
        let rank = comm.rank();
        let size = comm.size();
        let n_trees = forest.n_trees();

        // 每 rank 叶子数 → 前缀 = first_qid
        let mut counts = vec![0i64; size];
        counts[rank] = forest.n_local() as i64;
        comm.all_reduce_i64_vec(&mut counts, ReduceOp::Sum);
        let mut first_qid = Vec::with_capacity(size + 1);
        let mut acc = 0i64;
        for &c in &counts {
            first_qid.push(acc);
            acc += c;
        }
        first_qid.push(acc);
        let n_global = acc;

        // 各 rank 首叶 fkey；空 rank 回填为后继值
        let fkey_sentinel = n_trees as i64 * TREE_FKEY_SPAN;
        let mut first_fkey = vec![i64::MIN; size];
        first_fkey[rank] = forest.leaves.first().map(|l| l.fkey()).unwrap_or(i64::MIN);
        comm.all_reduce_i64_vec(&mut first_fkey, ReduceOp::Max);
        first_fkey.push(fkey_sentinel);
        for r in (0..size).rev() {
            if first_fkey[r] == i64::MIN {
                first_fkey[r] = first_fkey[r + 1];
            }
        }

        // 层级界
        let (mut lo, mut hi) = (MAX_LEVEL as i64, 0i64);
        for l in &forest.leaves {
            lo = lo.min(l.level as i64);
            hi = hi.max(l.level as i64);
        }
        let finest_level_global = comm.all_reduce_i64(hi, ReduceOp::Max) as u8;
        let coarsest_level_global = comm.all_reduce_i64(lo, ReduceOp::Min) as u8;

        // 每树偏移：首树若延续自前一 rank 则不由本 rank 填写。
        // 前一 rank 的末树沿环传递一跳。
        let my_last_tree = forest.leaves.last().map(|l| l.tree as i64).unwrap_or(-1);
        let mut prev_last_tree = -1i64;
        if size > 1 {
            if rank > 0 {
                let bytes = comm.recv_bytes(rank - 1, REQ_FOREST_SYNC)?;
                prev_last_tree = i64::from_le_bytes(
                    bytes
                        .get(..8)
                        .ok_or_else(|| LmError::inconsistency("树同步消息不足 8 字节"))?
                        .try_into()
                        .unwrap(),
                );
            }
            if rank < size - 1 {
                let forward = if my_last_tree >= 0 { my_last_tree } else { prev_last_tree };
                comm.send_bytes(rank + 1, REQ_FOREST_SYNC, &forward.to_le_bytes())?;
            }
        }

        let mut tree_leaf_offset = vec![0i64; n_trees];
        let mut seen_first = false;
        for (slot, leaf) in forest.leaves.iter().enumerate() {
            let t = leaf.tree as i64;
            let is_tree_first = slot == 0 || forest.leaves[slot - 1].tree != leaf.tree;
            if !is_tree_first {
                continue;
            }
            if !seen_first {
                seen_first = true;
                // 首树与前一 rank 的末树相同时, 偏移由前一 rank 填写
                if t == prev_last_tree {
                    continue;
                }
            }
            tree_leaf_offset[t as usize] = first_qid[rank] + slot as i64;
        }
        comm.all_reduce_i64_vec(&mut tree_leaf_offset, ReduceOp::Max);

        if !tree_leaf_offset.windows(2).all(|w| w[0] <= w[1]) {
            return Err(LmError::inconsistency("每树象限偏移数组非单调"));
        }

        Ok(Self {
            rank,
            size,
            n_global,
            first_qid,
            first_fkey,
            tree_leaf_offset,
            finest_level_local: hi as u8,
            coarsest_level_local: lo as u8,
            finest_level_global,
            coarsest_level_global,
        })
    }

    /// 本 rank 的 qid 区间
    #[inline]
    pub fn my_range(&self) -> (i64, i64) {
        (self.first_qid[self.rank], self.first_qid[self.rank + 1])
    }

    /// fkey 的归属 rank（上界搜索）
    pub fn rank_of_fkey(&self, fkey: i64) -> usize {
        let idx = self.first_fkey.partition_point(|&v| v <= fkey);
        idx.saturating_sub(1).min(self.size - 1)
    }

    /// 远端 `(rank, 槽位)` 的全局 qid
    #[inline]
    pub fn qid_of(&self, rank: usize, slot: usize) -> i64 {
        self.first_qid[rank] + slot as i64
    }

    /// 盒内位置的归属 rank
    pub fn pos_to_rank(&self, forest: &Forest, pos: DVec3, box_l: DVec3) -> usize {
        self.rank_of_fkey(forest.fkey_of_position(pos, box_l))
    }

    /// 盒内位置的本地叶子槽位
    pub fn pos_to_local_slot(&self, forest: &Forest, pos: DVec3, box_l: DVec3) -> Option<usize> {
        forest.find_leaf(forest.fkey_of_position(pos, box_l))
    }

    /// 位置查询的 ±ε 重试版本
    ///
    /// 直接查询失败后对 8 个角点施加 `±ε·box_l` 扰动重试。
    pub fn pos_to_local_slot_ext(
        &self,
        forest: &Forest,
        pos: DVec3,
        box_l: DVec3,
    ) -> Option<usize> {
        if let Some(slot) = self.pos_to_local_slot(forest, pos, box_l) {
            return Some(slot);
        }
        for i in [-1.0, 1.0] {
            for j in [-1.0, 1.0] {
                for k in [-1.0, 1.0] {
                    let eps = DVec3::new(i, j, k) * box_l * ROUND_ERROR_PREC;
                    if let Some(slot) = self.pos_to_local_slot(forest, pos + eps, box_l) {
                        return Some(slot);
                    }
                }
            }
        }
        None
    }
}
