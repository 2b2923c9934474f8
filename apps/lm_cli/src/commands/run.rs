// apps/lm_cli/src/commands/run.rs

//! 单 rank 演示模拟
//!
//! 在周期盒里摆一团软球粒子，跑若干步：漂移 → 迁移重排 →
//! 幽灵刷新 → 配对力 → 幽灵力收集。展示核心各子系统的调用
//! 顺序；力核与积分都是宿主侧示例，不属于核心。

use anyhow::Context;
use clap::Args;
use glam::{DVec3, IVec3};
use tracing::info;

use lm_cells::Particle;
use lm_comm::SerialComm;
use lm_config::CellGridConfig;
use lm_grid::{NodeGrid, SimBox};
use lm_halo::{DomainTopology, ExchangeMode, OptionalComms};

/// 运行参数
#[derive(Args)]
pub struct RunArgs {
    /// 盒子边长
    #[arg(long, default_value_t = 10.0)]
    pub box_l: f64,
    /// 短程作用距离
    #[arg(long, default_value_t = 2.0)]
    pub range: f64,
    /// 每边粒子数（总数为其立方）
    #[arg(short, long, default_value_t = 4)]
    pub n_side: usize,
    /// 积分步数
    #[arg(short, long, default_value_t = 20)]
    pub steps: usize,
    /// 时间步长
    #[arg(long, default_value_t = 0.01)]
    pub dt: f64,
}

pub fn execute(args: RunArgs) -> anyhow::Result<()> {
    let comm = SerialComm::new();
    let sim = SimBox::periodic(DVec3::splat(args.box_l));
    let grid = NodeGrid::from_dims(IVec3::ONE, 0).context("构建进程网格失败")?;
    let topo = DomainTopology::init(
        sim,
        grid,
        CellGridConfig::new(args.range, args.range * 0.9),
        OptionalComms::default(),
    )
    .context("拓扑初始化失败")?;

    // 均匀摆点
    let mut store = topo.make_store();
    let spacing = args.box_l / args.n_side as f64;
    let mut id = 0;
    for ix in 0..args.n_side {
        for iy in 0..args.n_side {
            for iz in 0..args.n_side {
                let pos = DVec3::new(
                    (ix as f64 + 0.5) * spacing,
                    (iy as f64 + 0.5) * spacing,
                    (iz as f64 + 0.5) * spacing,
                );
                let mut p = Particle::at(id, pos);
                // 简单的确定性初速
                p.body.vel = [
                    0.1 * ((id % 7) as f64 - 3.0),
                    0.1 * ((id % 5) as f64 - 2.0),
                    0.1 * ((id % 3) as f64 - 1.0),
                ];
                store.add_particle(p, &|pos| topo.lc.save_position_to_cell(pos));
                id += 1;
            }
        }
    }
    let n_total = store.n_local_particles();
    info!(n_total, cell_grid = ?topo.lc.cell_grid, "演示体系就绪");

    let range2 = args.range * args.range;
    for step in 0..args.steps {
        // 漂移
        for c in 0..store.n_local_cells() {
            let ci = lm_foundation::CellIndex::from_usize(c);
            for p in store.cell_mut(ci).iter_mut() {
                for d in 0..3 {
                    p.body.pos[d] += args.dt * p.body.vel[d];
                }
            }
        }

        // 迁移与重排, 然后刷新幽灵
        topo.exchange_particles(&comm, &mut store, ExchangeMode::Global)
            .context("粒子迁移失败")?;
        topo.exchange_ghosts(&comm, &mut store)
            .context("幽灵交换失败")?;

        // 清力, 配对力（软球示例核）, 幽灵力收集
        for c in 0..store.n_cells() {
            let ci = lm_foundation::CellIndex::from_usize(c);
            for p in store.cell_mut(ci).iter_mut() {
                p.body.force = [0.0; 3];
            }
        }
        topo.lc.for_each_pair_force(&mut store, &|pi, pj| {
            let d = pi.position() - pj.position();
            let r2 = d.length_squared();
            if r2 >= range2 || r2 == 0.0 {
                return DVec3::ZERO;
            }
            let r = r2.sqrt();
            d * ((args.range - r) / r)
        });
        topo.collect_ghost_forces(&comm, &mut store)
            .context("幽灵力收集失败")?;

        // 踢速（示例积分）
        for c in 0..store.n_local_cells() {
            let ci = lm_foundation::CellIndex::from_usize(c);
            for p in store.cell_mut(ci).iter_mut() {
                let inv_m = 1.0 / p.body.mass;
                for d in 0..3 {
                    p.body.vel[d] += args.dt * inv_m * p.body.force[d];
                }
            }
        }

        if step % 10 == 0 {
            let ke: f64 = store
                .local_particles()
                .map(|p| {
                    0.5 * p.body.mass
                        * (p.body.vel[0].powi(2) + p.body.vel[1].powi(2) + p.body.vel[2].powi(2))
                })
                .sum();
            info!(step, n = store.n_local_particles(), kinetic = ke, "演示步");
        }
    }

    store
        .check_index_consistency()
        .context("粒子索引一致性校验失败")?;
    anyhow::ensure!(
        store.n_local_particles() == n_total,
        "粒子数不守恒: {} -> {}",
        n_total,
        store.n_local_particles()
    );
    info!("演示完成: 粒子数守恒, 索引一致");
    Ok(())
}
