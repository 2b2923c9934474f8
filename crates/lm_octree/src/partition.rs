// crates/lm_octree/src/partition.rs

//! 给定配额的象限搬运
//!
//! 每个 rank 由旧 / 新所有权区间的重叠计算对每个其他 rank 的
//! 收发长度，成对交换叶子与原始负载字节，按 rank 升序重组即得
//! 新的 Morton 连续本地段。

use bytemuck::Pod;
use tracing::debug;

use lm_comm::tag::REQ_QUAD_TRANSFER;
use lm_comm::Communicator;
use lm_foundation::{LmError, LmResult};

use crate::forest::Forest;
use crate::info::ForestInfo;
use crate::quadrant::{Quadrant, WireQuadrant};

/// 区间 `[a_lo, a_hi)` 与 `[b_lo, b_hi)` 的重叠长度
#[inline]
fn overlap(a_lo: i64, a_hi: i64, b_lo: i64, b_hi: i64) -> i64 {
    (a_hi.min(b_hi) - a_lo.max(b_lo)).max(0)
}

/// 按给定每 rank 配额重分配森林与负载
///
/// `counts` 是目标每 rank 叶子数，总和必须等于全局叶子数。
/// 返回被搬运（换了 owner）的叶子总数。
pub fn partition_given<T: Pod>(
    forest: &mut Forest,
    info: &ForestInfo,
    comm: &dyn Communicator,
    counts: &[i64],
    payload: &mut Vec<T>,
) -> LmResult<i64> {
    let me = info.rank;
    let size = info.size;
    LmError::check_size("partition counts", size, counts.len())?;

    let total: i64 = counts.iter().sum();
    if total != info.n_global {
        return Err(LmError::inconsistency(format!(
            "重分配配额总数 {} 与全局象限数 {} 不符: 有象限丢失",
            total, info.n_global
        )));
    }
    LmError::check_size("partition payload", forest.n_local(), payload.len())?;

    let old_first = &info.first_qid;
    let mut new_first = Vec::with_capacity(size + 1);
    let mut acc = 0i64;
    for &c in counts {
        new_first.push(acc);
        acc += c;
    }
    new_first.push(acc);

    let (ol, _ou) = (old_first[me], old_first[me + 1]);
    let (nl, nu) = (new_first[me], new_first[me + 1]);

    // 发送：旧本地段与每个 rank 新区间的重叠
    for p in 0..size {
        let n = overlap(old_first[me], old_first[me + 1], new_first[p], new_first[p + 1]);
        if n > 0 && p != me {
            let begin = (new_first[p].max(ol) - ol) as usize;
            let quads: Vec<WireQuadrant> = forest.leaves[begin..begin + n as usize]
                .iter()
                .map(|q| WireQuadrant::pack(q, 0))
                .collect();
            comm.send_bytes(p, REQ_QUAD_TRANSFER, bytemuck::cast_slice(&quads))?;
            comm.send_bytes(
                p,
                REQ_QUAD_TRANSFER,
                bytemuck::cast_slice(&payload[begin..begin + n as usize]),
            )?;
        }
    }

    // 接收：每个 rank 旧区间与本 rank 新区间的重叠，按 rank 序重组
    let mut new_leaves: Vec<Quadrant> = Vec::with_capacity((nu - nl).max(0) as usize);
    let mut new_payload: Vec<T> = Vec::with_capacity(new_leaves.capacity());
    let mut shipped = 0i64;

    for p in 0..size {
        let n = overlap(old_first[p], old_first[p + 1], nl, nu);
        if n == 0 {
            continue;
        }
        if p == me {
            let begin = (nl.max(ol) - ol) as usize;
            new_leaves.extend_from_slice(&forest.leaves[begin..begin + n as usize]);
            new_payload.extend_from_slice(&payload[begin..begin + n as usize]);
        } else {
            shipped += n;
            let quad_bytes = comm.recv_bytes(p, REQ_QUAD_TRANSFER)?;
            let quads: Vec<WireQuadrant> = bytemuck::pod_collect_to_vec(&quad_bytes);
            LmError::check_size("迁入象限", n as usize, quads.len())?;
            let data_bytes = comm.recv_bytes(p, REQ_QUAD_TRANSFER)?;
            let data: Vec<T> = bytemuck::pod_collect_to_vec(&data_bytes);
            LmError::check_size("迁入负载", n as usize, data.len())?;
            new_leaves.extend(quads.iter().map(WireQuadrant::unpack));
            new_payload.extend_from_slice(&data);
        }
    }

    let shipped_global = comm.all_reduce_i64(shipped, lm_comm::ReduceOp::Sum);
    debug!(
        shipped = shipped_global,
        local = new_leaves.len(),
        "partition_given 完成"
    );

    forest.leaves = new_leaves;
    *payload = new_payload;
    forest.check_sorted()?;
    Ok(shipped_global)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::IVec3;
    use lm_comm::SerialComm;

    #[test]
    fn test_single_rank_partition_is_identity() {
        let comm = SerialComm::new();
        let mut f = Forest::new_uniform(IVec3::ONE, 1, 0, 1);
        let info = ForestInfo::gather(&f, &comm).unwrap();
        let mut payload: Vec<u64> = (0..8).collect();
        let shipped = partition_given(&mut f, &info, &comm, &[8], &mut payload).unwrap();
        assert_eq!(shipped, 0);
        assert_eq!(payload, (0..8).collect::<Vec<u64>>());
    }

    #[test]
    fn test_wrong_total_is_error() {
        let comm = SerialComm::new();
        let mut f = Forest::new_uniform(IVec3::ONE, 1, 0, 1);
        let info = ForestInfo::gather(&f, &comm).unwrap();
        let mut payload: Vec<u64> = (0..8).collect();
        assert!(partition_given(&mut f, &info, &comm, &[7], &mut payload).is_err());
    }
}
