// crates/lm_halo/tests/boundary_crossing.rs

//! 周期边界迁移验证
//!
//! 双 rank 盒子，粒子越过 +x 周期边界：
//! - 迁移把粒子运到折叠后位置的 owner；
//! - 一轮收敛（NEIGHBOR 模式成功即证明）；
//! - 全局粒子数守恒，id 恰在一个 rank 上。

use glam::{DVec3, IVec3};

use lm_cells::Particle;
use lm_comm::{Communicator, LocalUniverse, ReduceOp};
use lm_config::CellGridConfig;
use lm_grid::{NodeGrid, SimBox};
use lm_halo::{DomainTopology, ExchangeMode, OptionalComms};

fn make_topology(rank: usize) -> DomainTopology {
    let sim = SimBox::periodic(DVec3::splat(10.0));
    let grid = NodeGrid::from_dims(IVec3::new(2, 1, 1), rank).unwrap();
    DomainTopology::init(
        sim,
        grid,
        CellGridConfig::new(2.0, 2.0),
        OptionalComms::default(),
    )
    .unwrap()
}

#[test]
fn particle_crosses_periodic_x_boundary() {
    LocalUniverse::run(2, |comm| {
        let topo = make_topology(comm.rank());
        let mut store = topo.make_store();

        // 粒子初始在 (9.95, 5, 5)，属于右半子域
        let start = DVec3::new(9.95, 5.0, 5.0);
        let owner0 = topo.grid.position_to_node(&topo.sim, start);
        if comm.rank() == owner0 {
            let mut p = Particle::at(7, start);
            p.body.vel = [1.0, 0.0, 0.0];
            assert!(store
                .add_local_particle(p, &|pos| topo.lc.save_position_to_cell(pos))
                .is_some());
        }

        // 一步积分：位置变为 (10.05, 5, 5)
        if let Some(p) = store.particle_mut(7) {
            p.body.pos[0] += 0.1;
        }

        // NEIGHBOR 模式迁移必须一轮收敛
        topo.exchange_particles(comm, &mut store, ExchangeMode::Neighbor)
            .unwrap();

        // 折叠后位置 (0.05, 5, 5) 的 owner 恰有一个粒子
        let folded = DVec3::new(0.05, 5.0, 5.0);
        let new_owner = topo.grid.position_to_node(&topo.sim, folded);
        if comm.rank() == new_owner {
            assert_eq!(store.n_local_particles(), 1);
            let p = store.particle(7).unwrap();
            assert!((p.position() - folded).length() < 1e-12);
            assert_eq!(p.body.image, [1, 0, 0]);
            let (cell, _) = store.lookup(7).unwrap();
            assert_eq!(cell, topo.lc.position_to_cell(folded));
        } else {
            assert_eq!(store.n_local_particles(), 0);
        }

        // P1: 全局粒子数守恒
        let total = comm.all_reduce_i64(store.n_local_particles() as i64, ReduceOp::Sum);
        assert_eq!(total, 1);
        store.check_index_consistency().unwrap();
    });
}

#[test]
fn ghost_positions_match_sender_with_shift() {
    // P3: 幽灵位置 = 发送方位置 ± 记录的周期移位
    LocalUniverse::run(2, |comm| {
        let topo = make_topology(comm.rank());
        let mut store = topo.make_store();

        // 每个 rank 在自己子域右缘放一个粒子
        let (id, pos) = if comm.rank() == 0 {
            (1, DVec3::new(4.9, 5.0, 5.0))
        } else {
            (2, DVec3::new(9.9, 5.0, 5.0))
        };
        store
            .add_local_particle(Particle::at(id, pos), &|p| topo.lc.save_position_to_cell(p))
            .unwrap();

        topo.exchange_ghosts(comm, &mut store).unwrap();

        // rank 1 应看到 id=1 的幽灵在 4.9（域间边界, 无移位）;
        // rank 0 应看到 id=2 的幽灵在 -0.1（跨盒边界, -box_l 移位）
        let (want_id, want_x) = if comm.rank() == 0 {
            (2, -0.1)
        } else {
            (1, 4.9)
        };
        let found: Vec<f64> = store
            .ghost_cells()
            .flat_map(|(_, c)| c.iter())
            .filter(|p| p.id() == want_id)
            .map(|p| p.position().x)
            .collect();
        assert!(!found.is_empty(), "缺少 id={} 的幽灵副本", want_id);
        assert!(
            found.iter().any(|&x| (x - want_x).abs() < 1e-12),
            "幽灵 x 坐标 {:?} 中没有 {}",
            found,
            want_x
        );
    });
}

#[test]
fn ghost_forces_return_to_owner() {
    // P4: 收力后所有者的力 = 本地贡献 + 全部幽灵副本上的贡献
    LocalUniverse::run(2, |comm| {
        let topo = make_topology(comm.rank());
        let mut store = topo.make_store();

        if comm.rank() == 0 {
            store
                .add_local_particle(Particle::at(1, DVec3::new(4.9, 5.0, 5.0)), &|p| {
                    topo.lc.save_position_to_cell(p)
                })
                .unwrap();
        }
        topo.exchange_ghosts(comm, &mut store).unwrap();

        // 所有者写 (1,0,0)，持有幽灵副本的 rank 在每个副本写 (0,0,2)
        let mut n_ghost_copies = 0i64;
        if comm.rank() == 0 {
            store.particle_mut(1).unwrap().body.force = [1.0, 0.0, 0.0];
        }
        for c in store.n_local_cells()..store.n_cells() {
            let ci = lm_foundation::CellIndex::from_usize(c);
            for p in store.cell_mut(ci).iter_mut() {
                if p.id() == 1 {
                    p.body.force = [0.0, 0.0, 2.0];
                    n_ghost_copies += 1;
                }
            }
        }

        topo.collect_ghost_forces(comm, &mut store).unwrap();

        let total_copies = comm.all_reduce_i64(n_ghost_copies, ReduceOp::Sum);
        if comm.rank() == 0 {
            let f = store.particle(1).unwrap().body.force;
            assert_eq!(f[0], 1.0);
            assert_eq!(f[2], 2.0 * total_copies as f64);
        }
    });
}
