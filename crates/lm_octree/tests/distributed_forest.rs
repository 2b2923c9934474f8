// crates/lm_octree/tests/distributed_forest.rs

//! 多 rank 森林验证
//!
//! 双 rank 均匀森林：rank 区间表覆盖且单调；位置查询跨 rank
//! 一致；跨 rank 细化后 2:1 平衡恢复；给定配额搬运保持负载
//! 与叶子对齐。

use glam::{DVec3, IVec3};

use lm_comm::{Communicator, LocalUniverse, ReduceOp};
use lm_octree::forest::FACE_EDGE_DIRS;
use lm_octree::{partition_given, Forest, ForestInfo, GhostLayer, MAX_LEVEL};

#[test]
fn info_ranges_cover_and_agree() {
    LocalUniverse::run(2, |comm| {
        let forest = Forest::new_uniform(IVec3::ONE, 2, comm.rank(), 2);
        let info = ForestInfo::gather(&forest, comm).unwrap();

        assert_eq!(info.n_global, 64);
        assert_eq!(info.first_qid, vec![0, 32, 64]);
        assert!(info.first_fkey.windows(2).all(|w| w[0] <= w[1]));

        // 位置归属两个 rank 计算一致
        let box_l = DVec3::splat(8.0);
        for pos in [
            DVec3::new(0.5, 0.5, 0.5),
            DVec3::new(7.5, 7.5, 7.5),
            DVec3::new(4.0, 1.0, 6.0),
        ] {
            let owner = info.pos_to_rank(&forest, pos, box_l) as i64;
            let agreed = comm.all_reduce_i64(owner, ReduceOp::Max);
            assert_eq!(owner, agreed);
            // owner 必须真的持有该位置
            if comm.rank() == owner as usize {
                assert!(info.pos_to_local_slot(&forest, pos, box_l).is_some());
            } else {
                assert!(info.pos_to_local_slot(&forest, pos, box_l).is_none());
            }
        }
    });
}

#[test]
fn cross_rank_balance_restores_two_to_one() {
    LocalUniverse::run(2, |comm| {
        let mut forest = Forest::new_uniform(IVec3::ONE, 1, comm.rank(), 2);

        // rank 0 把其首叶连细两层, 与 rank 1 的叶子隔 rank 相邻
        if comm.rank() == 0 {
            forest.refine(MAX_LEVEL, |slot, _| slot == 0);
            forest.refine(MAX_LEVEL, |_, q| {
                q.level == 2 && q.x == 0 && q.y == 0 && q.z == 0
            });
        }
        forest.balance_2_to_1(comm).unwrap();
        forest.check_sorted().unwrap();

        let info = ForestInfo::gather(&forest, comm).unwrap();
        let ghost = GhostLayer::build(&forest, &info, comm).unwrap();

        for leaf in &forest.leaves {
            for dir in FACE_EDGE_DIRS {
                let region = forest.neighbor_region(leaf, dir);
                let (lo, hi) = (region.fkey(), region.fkey_end());
                for s in forest.leaves_in_range(lo, hi) {
                    assert!(forest.leaves[s].level <= leaf.level + 1);
                }
                for s in ghost.leaves_in_range(lo, hi) {
                    assert!(
                        ghost.leaves[s].level <= leaf.level + 1,
                        "跨 rank 2:1 违例: {:?} vs {:?}",
                        leaf,
                        ghost.leaves[s]
                    );
                }
            }
        }
    });
}

#[test]
fn partition_given_ships_leaves_with_payload() {
    LocalUniverse::run(2, |comm| {
        let rank = comm.rank();
        let mut forest = Forest::new_uniform(IVec3::ONE, 1, rank, 2);
        let info = ForestInfo::gather(&forest, comm).unwrap();
        let (lo, hi) = info.my_range();
        let mut payload: Vec<i64> = (lo..hi).collect();

        // 全部搬到 rank 1
        let shipped = partition_given(&mut forest, &info, comm, &[0, 8], &mut payload).unwrap();
        assert_eq!(shipped, 4);

        if rank == 0 {
            assert_eq!(forest.n_local(), 0);
            assert!(payload.is_empty());
        } else {
            assert_eq!(forest.n_local(), 8);
            // 负载按 Morton 序重组
            assert_eq!(payload, (0..8).collect::<Vec<i64>>());
            forest.check_sorted().unwrap();
        }
    });
}

#[test]
fn ghost_payload_exchange_matches_owner_data() {
    LocalUniverse::run(2, |comm| {
        let rank = comm.rank();
        let forest = Forest::new_uniform(IVec3::ONE, 1, rank, 2);
        let info = ForestInfo::gather(&forest, comm).unwrap();
        let ghost = GhostLayer::build(&forest, &info, comm).unwrap();

        // 负载 = 全局 qid
        let (lo, hi) = info.my_range();
        let local: Vec<i64> = (lo..hi).collect();
        let ghost_data = ghost.exchange_payloads(comm, rank, &local).unwrap();

        // 每个幽灵负载等于所有者槽位推出的全局 qid
        for (g, &data) in ghost_data.iter().enumerate() {
            let want = info.qid_of(ghost.owner[g], ghost.remote_slot[g] as usize);
            assert_eq!(data, want);
        }
        // 2x2x2 周期网格里对端的 4 个叶子全部与本 rank 相邻
        assert_eq!(ghost.n_ghost(), 4);
    });
}
