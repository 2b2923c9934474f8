// crates/lm_adapt/tests/repartition.rs

//! 非对称加权重分配验证
//!
//! 双 rank、两片 rank 对齐的森林（4 个根象限），
//! `w1 = [1,1,1,1]`，`w2 = [10,0,0,0]`，`a1 = a2 = 1`：
//! rank 0 只得权重 11 的 FCT 叶 0，rank 1 得其余三个（总权 3）；
//! 负载随象限搬运，对齐保持（P6）。

use glam::IVec3;

use lm_adapt::weighted_partition;
use lm_comm::{Communicator, LocalUniverse, ReduceOp};
use lm_octree::{Forest, ForestInfo};

#[test]
fn asymmetric_weights_split_one_vs_three() {
    LocalUniverse::run(2, |comm| {
        let rank = comm.rank();
        let mut t1 = Forest::new_uniform(IVec3::new(4, 1, 1), 0, rank, 2);
        let mut t2 = Forest::new_uniform(IVec3::new(4, 1, 1), 0, rank, 2);
        assert_eq!(t1.n_local(), 2);

        let info1 = ForestInfo::gather(&t1, comm).unwrap();
        let info2 = ForestInfo::gather(&t2, comm).unwrap();

        let w1 = vec![1.0; 2];
        let w2 = if rank == 0 {
            vec![10.0, 0.0]
        } else {
            vec![0.0, 0.0]
        };
        // 负载 = 全局叶子编号, 验证搬运内容
        let mut p1: Vec<u64> = (0..2).map(|i| (rank * 2 + i) as u64).collect();
        let mut p2: Vec<u64> = (0..2).map(|i| 100 + (rank * 2 + i) as u64).collect();

        let (new_info1, new_info2) = weighted_partition(
            comm, &mut t1, &info1, &w1, 1.0, &mut p1, &mut t2, &info2, &w2, 1.0, &mut p2,
        )
        .unwrap();

        // rank 0: 1 个象限 (FCT 叶 0, 权 11); rank 1: 其余 3 个
        if rank == 0 {
            assert_eq!(t1.n_local(), 1);
            assert_eq!(t2.n_local(), 1);
            assert_eq!(p1, vec![0]);
            assert_eq!(p2, vec![100]);
        } else {
            assert_eq!(t1.n_local(), 3);
            assert_eq!(t2.n_local(), 3);
            assert_eq!(p1, vec![1, 2, 3]);
            assert_eq!(p2, vec![101, 102, 103]);
        }

        // P6: 双森林 rank 对齐（weighted_partition 已校验, 再显式断言）
        assert_eq!(new_info1.first_qid, new_info2.first_qid);
        assert_eq!(new_info1.first_fkey, new_info2.first_fkey);

        // P1 类比：象限总数不变
        let total = comm.all_reduce_i64(t1.n_local() as i64, ReduceOp::Sum);
        assert_eq!(total, 4);
    });
}

#[test]
fn uniform_weights_keep_even_split() {
    LocalUniverse::run(2, |comm| {
        let rank = comm.rank();
        let mut t1 = Forest::new_uniform(IVec3::new(4, 1, 1), 0, rank, 2);
        let mut t2 = Forest::new_uniform(IVec3::new(4, 1, 1), 0, rank, 2);
        let info1 = ForestInfo::gather(&t1, comm).unwrap();
        let info2 = ForestInfo::gather(&t2, comm).unwrap();

        let w = vec![1.0; 2];
        let mut p1: Vec<u64> = vec![0; 2];
        let mut p2: Vec<u64> = vec![0; 2];
        weighted_partition(
            comm, &mut t1, &info1, &w, 1.0, &mut p1, &mut t2, &info2, &w, 1.0, &mut p2,
        )
        .unwrap();

        assert_eq!(t1.n_local(), 2);
        assert_eq!(t2.n_local(), 2);
    });
}
