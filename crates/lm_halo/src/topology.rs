// crates/lm_halo/src/topology.rs

//! 域拓扑
//!
//! 拓扑初始化装配单元数组、邻居表与四个常备幽灵通信器；释放
//! 按相反顺序进行。网格变更从调用方视角是一次原子的
//! 释放-再初始化。
//!
//! 常备通信器：
//! - `ghost_cells`: 每单元粒子数（重排后刷新幽灵容量）
//! - `exchange_ghosts`: 属性 + 移位位置（拓扑变更后的全量传输）
//! - `update_ghost_pos`: 移位位置（每积分子步）
//! - `collect_ghost_force`: 力，逆序执行（幽灵力归还所有者）
//!
//! 可选通信器按开关装配：LB 耦合速度、游动状态。

use glam::DVec3;
use tracing::{debug, info};

use lm_cells::{CellStore, LinkedCells};
use lm_comm::Communicator;
use lm_config::CellGridConfig;
use lm_foundation::{LmError, LmResult};
use lm_grid::{LocalBox, NodeGrid, SimBox};

use crate::exchange::{ExchangeMode, Exchanger};
use crate::ghost::{GhostCommunicator, TransferMask};

/// 网格变更标志
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GridChangeFlags(u32);

impl GridChangeFlags {
    /// 赶时间：跳过可选的网格优化
    pub const FAST: Self = Self(1 << 0);
    /// 网格结构已变化，必须全量重排
    pub const GRID_CHANGED: Self = Self(1 << 1);
    /// 剪切边界偏移变化
    pub const SHEAR: Self = Self(1 << 2);

    /// 是否包含 `other`
    #[inline]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for GridChangeFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// 可选通信器开关
#[derive(Debug, Clone, Copy, Default)]
pub struct OptionalComms {
    /// LB 粒子耦合（传输速度）
    pub lb_coupling: bool,
    /// 游动粒子状态
    pub swimming: bool,
}

/// 网格变更钩子
pub type GridChangeHook = Box<dyn Fn(GridChangeFlags) + Send>;

/// 域拓扑：单元结构 + 常备通信器
pub struct DomainTopology {
    /// 盒子
    pub sim: SimBox,
    /// 进程网格
    pub grid: NodeGrid,
    /// 本地子盒
    pub local: LocalBox,
    /// 连接单元网格
    pub lc: LinkedCells,
    /// 单元网格配置
    pub cfg: CellGridConfig,

    /// 幽灵粒子数通信器
    pub ghost_cells_comm: GhostCommunicator,
    /// 幽灵全量交换通信器
    pub exchange_ghosts_comm: GhostCommunicator,
    /// 幽灵位置更新通信器
    pub update_ghost_pos_comm: GhostCommunicator,
    /// 幽灵力收集通信器（逆序）
    pub collect_ghost_force_comm: GhostCommunicator,
    /// LB 耦合通信器
    pub ghost_lb_coupling_comm: Option<GhostCommunicator>,
    /// 游动状态通信器
    pub ghost_swimming_comm: Option<GhostCommunicator>,

    hooks: Vec<GridChangeHook>,
}

impl DomainTopology {
    /// 拓扑初始化
    ///
    /// 构造单元网格与全部常备通信器；旧粒子由调用方经
    /// [`Self::readopt_particles`] 迁入。
    pub fn init(
        sim: SimBox,
        grid: NodeGrid,
        cfg: CellGridConfig,
        optional: OptionalComms,
    ) -> LmResult<Self> {
        let local = LocalBox::of_rank(&sim, &grid);
        let lc = LinkedCells::new(&sim, &grid, &local, &cfg)?;

        let ghost_cells_comm =
            GhostCommunicator::plan_regular(TransferMask::PART_COUNT, &sim, &grid, &lc);
        let exchange_ghosts_comm = GhostCommunicator::plan_regular(
            TransferMask::PROPS | TransferMask::POSITION | TransferMask::POSITION_SHIFTED,
            &sim,
            &grid,
            &lc,
        );
        let update_ghost_pos_comm = GhostCommunicator::plan_regular(
            TransferMask::POSITION | TransferMask::POSITION_SHIFTED,
            &sim,
            &grid,
            &lc,
        );
        // 收力必须逆序执行
        let collect_ghost_force_comm =
            GhostCommunicator::plan_regular(TransferMask::FORCE, &sim, &grid, &lc).reverted();

        let ghost_lb_coupling_comm = optional.lb_coupling.then(|| {
            GhostCommunicator::plan_regular(TransferMask::LB_COUPLING, &sim, &grid, &lc)
        });
        let ghost_swimming_comm = optional
            .swimming
            .then(|| GhostCommunicator::plan_regular(TransferMask::SWIMMING, &sim, &grid, &lc));

        info!(cell_grid = ?lc.cell_grid, "域拓扑初始化完成");

        Ok(Self {
            sim,
            grid,
            local,
            lc,
            cfg,
            ghost_cells_comm,
            exchange_ghosts_comm,
            update_ghost_pos_comm,
            collect_ghost_force_comm,
            ghost_lb_coupling_comm,
            ghost_swimming_comm,
            hooks: Vec::new(),
        })
    }

    /// 与当前单元布局一致的空粒子存储
    pub fn make_store(&self) -> CellStore {
        self.lc.make_store()
    }

    /// 把旧存储中的粒子迁入新布局
    ///
    /// 不属于本子域的粒子暂存单元 0，随后的全局交换把它送到
    /// 正确的 rank。
    pub fn readopt_particles(&self, old: &mut CellStore) -> CellStore {
        let mut store = self.make_store();
        for c in 0..old.n_cells() {
            let ci = lm_foundation::CellIndex::from_usize(c);
            for p in old.cell_mut(ci).drain_all() {
                if p.body.is_ghost() {
                    continue;
                }
                store.add_particle(p, &|pos| self.lc.save_position_to_cell(pos));
            }
        }
        store
    }

    /// 注册网格变更钩子
    ///
    /// 外部模块在回调里收到标志掩码，可据此请求延迟重初始化。
    pub fn register_grid_change_hook(&mut self, hook: GridChangeHook) {
        self.hooks.push(hook);
    }

    /// 几何变化响应
    ///
    /// 子域对作用距离不再足够时返回配置错误；网格结构变化或
    /// 单元尺寸不再满足作用距离时整体重建（返回 `true` 告知
    /// 调用方随后做全局交换）；否则仅重设通信器移位。
    pub fn on_geometry_change(
        &mut self,
        new_box: SimBox,
        flags: GridChangeFlags,
    ) -> LmResult<bool> {
        for hook in &self.hooks {
            hook(flags);
        }

        self.sim = new_box;
        let local = LocalBox::of_rank(&self.sim, &self.grid);
        let local_l = local.local_box_l();
        for d in 0..3 {
            if local_l[d] < self.cfg.max_range {
                return Err(LmError::config_axis(
                    d,
                    format!(
                        "盒长变化后局部盒长 {} 小于作用距离 {}",
                        local_l[d], self.cfg.max_range
                    ),
                ));
            }
        }
        self.local = local;

        if flags.contains(GridChangeFlags::GRID_CHANGED) {
            debug!("网格结构变化: 整体重建");
            return self.rebuild().map(|_| true);
        }

        // 仅盒长变化：重设几何量
        let cell_size = self.local.local_box_l() / self.lc.cell_grid.as_dvec3();
        let min_cell = cell_size.min_element();
        if self.cfg.max_range > min_cell {
            debug!("单元尺寸不再满足作用距离: 整体重建");
            return self.rebuild().map(|_| true);
        }

        if !flags.contains(GridChangeFlags::FAST) {
            // 不赶时间时检查是否能用更细的单元
            for d in 0..3 {
                let possible = (self.local.local_box_l()[d] / self.cfg.max_range).floor() as i32;
                if possible > self.lc.cell_grid[d] {
                    debug!("盒长允许更细的单元网格: 整体重建");
                    return self.rebuild().map(|_| true);
                }
            }
        }

        self.lc.cell_size = cell_size;
        self.lc.inv_cell_size = DVec3::ONE / cell_size;
        self.lc.max_skin = min_cell - self.cfg.max_cut;
        self.rescale_all_shifts();
        Ok(false)
    }

    fn rebuild(&mut self) -> LmResult<()> {
        let rebuilt = Self::init(
            self.sim,
            self.grid.clone(),
            self.cfg.clone(),
            OptionalComms {
                lb_coupling: self.ghost_lb_coupling_comm.is_some(),
                swimming: self.ghost_swimming_comm.is_some(),
            },
        )?;
        let hooks = std::mem::take(&mut self.hooks);
        *self = rebuilt;
        self.hooks = hooks;
        Ok(())
    }

    fn rescale_all_shifts(&mut self) {
        let box_l = self.sim.box_l;
        self.exchange_ghosts_comm.rescale_shift(box_l);
        self.update_ghost_pos_comm.rescale_shift(box_l);
    }

    /// 迁移越界粒子（转发给交换器）
    pub fn exchange_particles(
        &self,
        comm: &dyn Communicator,
        store: &mut CellStore,
        mode: ExchangeMode,
    ) -> LmResult<()> {
        let ex = Exchanger::new(&self.sim, &self.grid, &self.local, &self.lc);
        ex.exchange_and_sort(comm, store, mode)
    }

    /// 刷新幽灵容量并做一次全量幽灵交换
    pub fn exchange_ghosts(
        &self,
        comm: &dyn Communicator,
        store: &mut CellStore,
    ) -> LmResult<()> {
        self.ghost_cells_comm.run(comm, store)?;
        self.exchange_ghosts_comm.run(comm, store)
    }

    /// 更新幽灵位置（每积分子步）
    pub fn update_ghost_positions(
        &self,
        comm: &dyn Communicator,
        store: &mut CellStore,
    ) -> LmResult<()> {
        self.update_ghost_pos_comm.run(comm, store)
    }

    /// 收集幽灵力到所有者
    pub fn collect_ghost_forces(
        &self,
        comm: &dyn Communicator,
        store: &mut CellStore,
    ) -> LmResult<()> {
        self.collect_ghost_force_comm.run(comm, store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::IVec3;
    use lm_cells::Particle;

    fn topology() -> DomainTopology {
        let sim = SimBox::periodic(DVec3::splat(6.0));
        let grid = NodeGrid::from_dims(IVec3::ONE, 0).unwrap();
        DomainTopology::init(
            sim,
            grid,
            CellGridConfig::new(2.0, 2.0),
            OptionalComms::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_init_builds_standing_comms() {
        let topo = topology();
        assert_eq!(topo.ghost_cells_comm.rounds.len(), 52);
        assert!(topo.ghost_lb_coupling_comm.is_none());
    }

    #[test]
    fn test_box_growth_without_rebuild_rescales_shift() {
        let mut topo = topology();
        let grew = SimBox::periodic(DVec3::splat(7.0));
        let rebuilt = topo
            .on_geometry_change(grew, GridChangeFlags::FAST)
            .unwrap();
        assert!(!rebuilt);
        let send = &topo.update_ghost_pos_comm.rounds[0];
        // 移位按新盒长重设
        for d in 0..3 {
            assert_eq!(send.shift[d].abs(), 7.0);
        }
    }

    #[test]
    fn test_shrink_below_range_is_config_error() {
        let mut topo = topology();
        let tiny = SimBox::periodic(DVec3::splat(1.0));
        assert!(topo
            .on_geometry_change(tiny, GridChangeFlags::FAST)
            .is_err());
    }

    #[test]
    fn test_grid_changed_triggers_rebuild_and_readopt() {
        let mut topo = topology();
        let mut store = topo.make_store();
        store.add_particle(Particle::at(1, DVec3::new(1.0, 1.0, 1.0)), &|pos| {
            topo.lc.save_position_to_cell(pos)
        });

        let rebuilt = topo
            .on_geometry_change(
                SimBox::periodic(DVec3::splat(12.0)),
                GridChangeFlags::GRID_CHANGED,
            )
            .unwrap();
        assert!(rebuilt);
        let mut old = store;
        let store = topo.readopt_particles(&mut old);
        assert_eq!(store.n_local_particles(), 1);
        store.check_index_consistency().unwrap();
    }

    #[test]
    fn test_hooks_receive_flags() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;

        let mut topo = topology();
        let seen = Arc::new(AtomicU32::new(0));
        let seen2 = Arc::clone(&seen);
        topo.register_grid_change_hook(Box::new(move |flags| {
            if flags.contains(GridChangeFlags::FAST) {
                seen2.fetch_add(1, Ordering::SeqCst);
            }
        }));
        topo.on_geometry_change(SimBox::periodic(DVec3::splat(6.5)), GridChangeFlags::FAST)
            .unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
