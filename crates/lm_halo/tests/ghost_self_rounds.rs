// crates/lm_halo/tests/ghost_self_rounds.rs

//! 单 rank 自通信轮次验证
//!
//! 单 rank 周期盒（退化 1×1×1 单元网格）：26 个幽灵层全部来自
//! 自通信缓冲交接，不产生任何消息；每层持有粒子的周期镜像，
//! 位置在跨越的面上偏移 ±盒长。

use glam::{DVec3, IVec3};

use lm_cells::Particle;
use lm_comm::tag::NEIGHBOR_DISPS;
use lm_comm::SerialComm;
use lm_config::CellGridConfig;
use lm_grid::{NodeGrid, SimBox};
use lm_halo::{DomainTopology, OptionalComms};

#[test]
fn all_26_ghost_layers_hold_shifted_copies() {
    let comm = SerialComm::new();
    let sim = SimBox::periodic(DVec3::splat(10.0));
    let grid = NodeGrid::from_dims(IVec3::ONE, 0).unwrap();
    // 退化网格：作用距离为零 => 1x1x1 内部单元
    let topo = DomainTopology::init(
        sim,
        grid,
        CellGridConfig::new(0.0, 0.0),
        OptionalComms::default(),
    )
    .unwrap();
    assert_eq!(topo.lc.cell_grid, IVec3::ONE);

    let mut store = topo.make_store();
    store
        .add_local_particle(Particle::at(0, DVec3::splat(5.0)), &|p| {
            topo.lc.save_position_to_cell(p)
        })
        .unwrap();

    // 幽灵容量 + 全量交换, 然后走位置更新路径
    topo.exchange_ghosts(&comm, &mut store).unwrap();
    topo.update_ghost_positions(&comm, &mut store).unwrap();

    // 26 个幽灵单元每个恰有一个副本, 坐标 = 5 + 10*disp
    for disp in NEIGHBOR_DISPS {
        let geom = IVec3::new(1 + disp[0], 1 + disp[1], 1 + disp[2]);
        let ci = topo.lc.store_index(geom);
        let cell = store.cell(ci);
        assert_eq!(cell.len(), 1, "幽灵层 {:?} 副本数错误", disp);
        let p = cell.get(0).unwrap();
        assert!(p.body.is_ghost());
        for d in 0..3 {
            let want = 5.0 + 10.0 * disp[d] as f64;
            assert!(
                (p.body.pos[d] - want).abs() < 1e-12,
                "幽灵层 {:?} 轴 {} 期望 {}, 实际 {}",
                disp,
                d,
                want,
                p.body.pos[d]
            );
        }
    }

    // 本地粒子不受影响
    assert_eq!(store.n_local_particles(), 1);
}
