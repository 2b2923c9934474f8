// crates/lm_adapt/src/repart.rs

//! 双森林加权重分配
//!
//! 给定连接性兼容且 rank 对齐的两片森林（短程粒子域与 LB
//! 流体域）、各自的叶子权重与缩放系数：
//!
//! 1. 构造**最细公共树**（FCT）：逐点取两片森林中较粗的叶子，
//!    每个 FCT 叶恰与一片森林的一个叶子、另一片的一个或多个
//!    叶子重叠；
//! 2. 聚合 FCT 叶权重 `a1·Σw1 + a2·Σw2`；
//! 3. 全局求和与独占前缀扫描，按 `min(⌊前缀/目标⌋, P-1)` 指派
//!    FCT 叶；
//! 4. 折回两片森林各自的每 rank 配额，`Allreduce(SUM)` 后分别
//!    调用给定配额的象限搬运。
//!
//! 完成后两片森林保持 rank 对齐：同一 rank 的首叶在公共树坐标
//! 中重合。

use bytemuck::Pod;
use tracing::{debug, info};

use lm_comm::{Communicator, ReduceOp};
use lm_foundation::{LmError, LmResult};
use lm_octree::{partition_given, Forest, ForestInfo};

/// 检查两片森林的连接性与 rank 对齐
///
/// 树网格必须一致，且每个 rank 的首叶 fkey 必须重合。
pub fn check_alignment(
    t1: &Forest,
    info1: &ForestInfo,
    t2: &Forest,
    info2: &ForestInfo,
) -> LmResult<()> {
    if t1.tree_grid != t2.tree_grid {
        return Err(LmError::config(format!(
            "森林连接性不兼容: 树网格 {:?} 与 {:?}",
            t1.tree_grid, t2.tree_grid
        )));
    }
    if info1.first_fkey != info2.first_fkey {
        return Err(LmError::config("两片森林未保持 rank 对齐"));
    }
    Ok(())
}

/// FCT 叶聚合结果
struct FctAggregate {
    w_fct: Vec<f64>,
    t1_per_fct: Vec<i64>,
    t2_per_fct: Vec<i64>,
}

/// 构造本地 FCT 段并聚合权重
fn build_fct(
    t1: &Forest,
    w1: &[f64],
    a1: f64,
    t2: &Forest,
    w2: &[f64],
    a2: f64,
) -> LmResult<FctAggregate> {
    LmError::check_size("w1", t1.n_local(), w1.len())?;
    LmError::check_size("w2", t2.n_local(), w2.len())?;

    let mut agg = FctAggregate {
        w_fct: Vec::new(),
        t1_per_fct: Vec::new(),
        t2_per_fct: Vec::new(),
    };

    let (mut i1, mut i2) = (0usize, 0usize);
    while i1 < t1.n_local() && i2 < t2.n_local() {
        let q1 = &t1.leaves[i1];
        let q2 = &t2.leaves[i2];
        // FCT 叶 = 两片中较粗者
        let end = if q1.level <= q2.level {
            q1.fkey_end()
        } else {
            q2.fkey_end()
        };

        let mut w = 0.0;
        let mut c1 = 0i64;
        let mut c2 = 0i64;
        while i1 < t1.n_local() && t1.leaves[i1].fkey() < end {
            w += a1 * w1[i1];
            c1 += 1;
            i1 += 1;
        }
        while i2 < t2.n_local() && t2.leaves[i2].fkey() < end {
            w += a2 * w2[i2];
            c2 += 1;
            i2 += 1;
        }
        agg.w_fct.push(w);
        agg.t1_per_fct.push(c1);
        agg.t2_per_fct.push(c2);
    }

    if i1 != t1.n_local() || i2 != t2.n_local() {
        return Err(LmError::inconsistency(
            "FCT 遍历未同时耗尽两片森林: 叶子未对齐",
        ));
    }
    Ok(agg)
}

/// 双森林加权重分配
///
/// `payload1`/`payload2` 与各自森林的本地叶子对齐，随象限搬运。
#[allow(clippy::too_many_arguments)]
pub fn weighted_partition<TA: Pod, TB: Pod>(
    comm: &dyn Communicator,
    t1: &mut Forest,
    info1: &ForestInfo,
    w1: &[f64],
    a1: f64,
    payload1: &mut Vec<TA>,
    t2: &mut Forest,
    info2: &ForestInfo,
    w2: &[f64],
    a2: f64,
    payload2: &mut Vec<TB>,
) -> LmResult<(ForestInfo, ForestInfo)> {
    check_alignment(t1, info1, t2, info2)?;
    let size = info1.size;

    // FCT 聚合
    let agg = build_fct(t1, w1, a1, t2, w2, a2)?;

    // 全局目标与前缀
    let local_sum: f64 = agg.w_fct.iter().sum();
    let sum = comm.all_reduce_f64(local_sum, ReduceOp::Sum);
    let mut prefix = comm.exscan_f64_sum(local_sum);
    let target = sum / size as f64;

    // FCT 叶指派 → 双森林配额
    let mut t1_per_proc = vec![0i64; size];
    let mut t2_per_proc = vec![0i64; size];
    for (idx, &w) in agg.w_fct.iter().enumerate() {
        let proc = if target > 0.0 {
            ((prefix / target) as usize).min(size - 1)
        } else {
            0
        };
        t1_per_proc[proc] += agg.t1_per_fct[idx];
        t2_per_proc[proc] += agg.t2_per_fct[idx];
        prefix += w;
    }

    comm.all_reduce_i64_vec(&mut t1_per_proc, ReduceOp::Sum);
    comm.all_reduce_i64_vec(&mut t2_per_proc, ReduceOp::Sum);
    debug!(?t1_per_proc, ?t2_per_proc, "加权重分配配额");

    let shipped1 = partition_given(t1, info1, comm, &t1_per_proc, payload1)?;
    let shipped2 = partition_given(t2, info2, comm, &t2_per_proc, payload2)?;

    let new_info1 = ForestInfo::gather(t1, comm)?;
    let new_info2 = ForestInfo::gather(t2, comm)?;
    check_alignment(t1, &new_info1, t2, &new_info2)?;

    info!(shipped1, shipped2, "双森林重分配完成");
    Ok((new_info1, new_info2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::IVec3;
    use lm_comm::SerialComm;

    #[test]
    fn test_single_rank_alignment_holds() {
        let comm = SerialComm::new();
        let mut t1 = Forest::new_uniform(IVec3::new(2, 2, 1), 0, 0, 1);
        let mut t2 = Forest::new_uniform(IVec3::new(2, 2, 1), 0, 0, 1);
        let info1 = ForestInfo::gather(&t1, &comm).unwrap();
        let info2 = ForestInfo::gather(&t2, &comm).unwrap();

        let w1 = vec![1.0; 4];
        let w2 = vec![10.0, 0.0, 0.0, 0.0];
        let mut p1: Vec<u64> = vec![0, 1, 2, 3];
        let mut p2: Vec<u64> = vec![10, 11, 12, 13];

        weighted_partition(
            &comm, &mut t1, &info1, &w1, 1.0, &mut p1, &mut t2, &info2, &w2, 1.0, &mut p2,
        )
        .unwrap();
        assert_eq!(p1, vec![0, 1, 2, 3]);
        assert_eq!(p2, vec![10, 11, 12, 13]);
    }

    #[test]
    fn test_fct_takes_coarser_leaf() {
        // t1 均匀 level 0, t2 其中一棵树细化到 level 1:
        // FCT 叶 = t1 的粗叶, 该叶下聚合 t2 的 8 个细叶
        let mut t2 = Forest::new_uniform(IVec3::new(2, 1, 1), 0, 0, 1);
        t2.refine(lm_octree::MAX_LEVEL, |slot, _| slot == 0);
        let t1 = Forest::new_uniform(IVec3::new(2, 1, 1), 0, 0, 1);

        let w1 = vec![1.0; 2];
        let w2 = vec![0.5; 9];
        let agg = build_fct(&t1, &w1, 1.0, &t2, &w2, 2.0).unwrap();
        assert_eq!(agg.w_fct.len(), 2);
        assert_eq!(agg.t2_per_fct, vec![8, 1]);
        assert!((agg.w_fct[0] - (1.0 + 2.0 * 4.0)).abs() < 1e-12);
    }

    #[test]
    fn test_incompatible_grids_rejected() {
        let comm = SerialComm::new();
        let t1 = Forest::new_uniform(IVec3::new(2, 1, 1), 0, 0, 1);
        let t2 = Forest::new_uniform(IVec3::new(1, 2, 1), 0, 0, 1);
        let info1 = ForestInfo::gather(&t1, &comm).unwrap();
        let info2 = ForestInfo::gather(&t2, &comm).unwrap();
        assert!(check_alignment(&t1, &info1, &t2, &info2).is_err());
    }
}
