// crates/lm_octree/src/ghost.rs

//! 八叉树幽灵层
//!
//! 与远端子域相邻的本地叶子镜像。构建时每对 rank 交换一条
//! （可为空的）镜像消息；负载交换按构建时记下的镜像清单复用，
//! 双方的顺序都由 fkey 排序决定，无需额外协商。

use std::collections::BTreeSet;

use bytemuck::{Pod, Zeroable};

use lm_comm::tag::{NEIGHBOR_DISPS, REQ_OCTREE_GHOST};
use lm_comm::Communicator;
use lm_foundation::{LmError, LmResult};

use crate::forest::Forest;
use crate::info::ForestInfo;
use crate::quadrant::{Quadrant, WireQuadrant};

/// 幽灵层
#[derive(Debug, Clone, Default)]
pub struct GhostLayer {
    /// 幽灵叶子，按 fkey 升序
    pub leaves: Vec<Quadrant>,
    /// 每个幽灵叶子的所有者 rank
    pub owner: Vec<usize>,
    /// 所有者处的本地槽位
    pub remote_slot: Vec<u32>,
    /// 每 rank 的本地镜像槽位（升序），负载交换复用
    mirrors: Vec<Vec<u32>>,
}

impl GhostLayer {
    /// 构建幽灵层
    ///
    /// 对每个本地叶子检查 26 个方向的同层邻居区域，区域与远端
    /// rank 的 fkey 区间相交时把该叶子登记为那个 rank 的镜像。
    pub fn build(
        forest: &Forest,
        info: &ForestInfo,
        comm: &dyn Communicator,
    ) -> LmResult<Self> {
        let me = info.rank;
        let size = info.size;

        let mut mirror_sets: Vec<BTreeSet<u32>> = vec![BTreeSet::new(); size];
        for (slot, leaf) in forest.leaves.iter().enumerate() {
            for disp in NEIGHBOR_DISPS {
                let region = forest.neighbor_region(leaf, disp);
                let lo = info.rank_of_fkey(region.fkey());
                let hi = info.rank_of_fkey(region.fkey_end() - 1);
                for r in lo..=hi {
                    if r != me {
                        mirror_sets[r].insert(slot as u32);
                    }
                }
            }
        }
        let mirrors: Vec<Vec<u32>> = mirror_sets.into_iter().map(|s| s.into_iter().collect()).collect();

        // 对称交换：每对 rank 恰好一条消息（可为空）
        for r in 0..size {
            if r == me {
                continue;
            }
            let msg: Vec<WireQuadrant> = mirrors[r]
                .iter()
                .map(|&s| WireQuadrant::pack(&forest.leaves[s as usize], s as usize))
                .collect();
            comm.send_bytes(r, REQ_OCTREE_GHOST, bytemuck::cast_slice(&msg))?;
        }

        let mut entries: Vec<(Quadrant, usize, u32)> = Vec::new();
        for r in 0..size {
            if r == me {
                continue;
            }
            let bytes = comm.recv_bytes(r, REQ_OCTREE_GHOST)?;
            let wires: Vec<WireQuadrant> = bytemuck::pod_collect_to_vec(&bytes);
            for w in wires {
                entries.push((w.unpack(), r, w.slot));
            }
        }
        entries.sort_by_key(|(q, _, _)| q.fkey());

        let mut layer = Self {
            leaves: Vec::with_capacity(entries.len()),
            owner: Vec::with_capacity(entries.len()),
            remote_slot: Vec::with_capacity(entries.len()),
            mirrors,
        };
        for (q, r, s) in entries {
            layer.leaves.push(q);
            layer.owner.push(r);
            layer.remote_slot.push(s);
        }
        Ok(layer)
    }

    /// 幽灵叶子数
    #[inline]
    pub fn n_ghost(&self) -> usize {
        self.leaves.len()
    }

    /// fkey 区间 `[lo, hi)` 内的幽灵叶子槽位范围
    pub fn leaves_in_range(&self, lo: i64, hi: i64) -> std::ops::Range<usize> {
        let a = self.leaves.partition_point(|l| l.fkey() < lo);
        let b = self.leaves.partition_point(|l| l.fkey() < hi);
        a..b
    }

    /// 包含 `fkey` 的幽灵叶子槽位
    pub fn find_leaf(&self, fkey: i64) -> Option<usize> {
        let i = self.leaves.partition_point(|l| l.fkey() <= fkey);
        if i == 0 {
            return None;
        }
        (fkey < self.leaves[i - 1].fkey_end()).then_some(i - 1)
    }

    /// 交换幽灵负载
    ///
    /// `local` 与所有者的本地叶子对齐；返回与 [`Self::leaves`]
    /// 对齐的幽灵负载。
    pub fn exchange_payloads<T: Pod>(
        &self,
        comm: &dyn Communicator,
        me: usize,
        local: &[T],
    ) -> LmResult<Vec<T>> {
        let size = self.mirrors.len();

        for r in 0..size {
            if r == me {
                continue;
            }
            let buf: Vec<T> = self.mirrors[r]
                .iter()
                .map(|&s| {
                    local.get(s as usize).copied().ok_or_else(|| {
                        LmError::inconsistency(format!("镜像槽位 {} 超出负载数组", s))
                    })
                })
                .collect::<LmResult<_>>()?;
            comm.send_bytes(r, REQ_OCTREE_GHOST, bytemuck::cast_slice(&buf))?;
        }

        let mut ghost_data: Vec<T> = vec![T::zeroed(); self.leaves.len()];
        for r in 0..size {
            if r == me {
                continue;
            }
            let bytes = comm.recv_bytes(r, REQ_OCTREE_GHOST)?;
            let incoming: Vec<T> = bytemuck::pod_collect_to_vec(&bytes);
            // 来自 r 的幽灵叶子按 fkey 序即发送方槽位序
            let mut it = incoming.into_iter();
            for i in 0..self.leaves.len() {
                if self.owner[i] == r {
                    ghost_data[i] = it.next().ok_or_else(|| {
                        LmError::inconsistency(format!("rank {} 的幽灵负载数量不足", r))
                    })?;
                }
            }
        }
        Ok(ghost_data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::IVec3;
    use lm_comm::SerialComm;

    #[test]
    fn test_single_rank_has_no_ghosts() {
        let comm = SerialComm::new();
        let f = Forest::new_uniform(IVec3::ONE, 2, 0, 1);
        let info = ForestInfo::gather(&f, &comm).unwrap();
        let ghost = GhostLayer::build(&f, &info, &comm).unwrap();
        assert_eq!(ghost.n_ghost(), 0);
    }
}
