// crates/lm_cells/src/linked.rs

//! 连接单元网格（正规域分解）
//!
//! 每 rank 的规则三维单元网格加幽灵边框。网格尺寸在盒子或作用
//! 距离变化时重算；每个内部单元持有 自身 + 13 个上半邻居 的
//! 邻居表，配对遍历每对单元只访问一次。
//!
//! # 尺寸算法
//!
//! 1. `max_range` 接近零（初始化场景）时退化为 1×1×1；
//! 2. 否则以 `ceil(local_box_l * (max_cells/V)^(1/3))` 起步，
//!    单元尺寸小于 `max_range` 的轴压到 `floor(local/max_range)`；
//! 3. 单元总数超限时反复递减单元尺寸最小的轴（z 优先于 y）；
//! 4. 幽灵网格 = 内部网格 + 2×各轴幽灵层厚度。

use glam::{DVec3, IVec3};
use tracing::debug;

use lm_config::CellGridConfig;
use lm_foundation::{CellIndex, LmError, LmResult, ROUND_ERROR_PREC};
use lm_grid::{linear_index, LocalBox, NodeGrid, SimBox};

use crate::particle::Particle;
use crate::store::CellStore;

/// 连接单元网格
#[derive(Debug, Clone)]
pub struct LinkedCells {
    /// 内部单元网格
    pub cell_grid: IVec3,
    /// 各轴幽灵层厚度
    pub ghost_thickness: IVec3,
    /// 含幽灵边框的网格
    pub ghost_cell_grid: IVec3,
    /// 单元尺寸
    pub cell_size: DVec3,
    /// 单元尺寸倒数
    pub inv_cell_size: DVec3,
    /// 可用 skin 上限：`min(cell_size) - max_cut`
    pub max_skin: f64,

    box_l: DVec3,
    periodic: [bool; 3],
    my_left: DVec3,
    local_box_l: DVec3,
    at_lower: [bool; 3],
    at_upper: [bool; 3],

    n_local: usize,
    /// 几何线性索引 → 存储索引（本地单元在前）
    geom_to_store: Vec<CellIndex>,
    /// 每个本地单元：自身 + 13 个上半邻居（存储索引）
    neighbors: Vec<Vec<CellIndex>>,
}

impl LinkedCells {
    /// 由盒子、进程网格与配置构造
    pub fn new(
        sim: &SimBox,
        grid: &NodeGrid,
        local: &LocalBox,
        cfg: &CellGridConfig,
    ) -> LmResult<Self> {
        let local_box_l = local.local_box_l();
        let thickness = IVec3::from_array(cfg.ghost_thickness());
        let cell_grid = size_cell_grid(local_box_l, sim.box_l, cfg)?;

        let ghost_cell_grid = cell_grid + 2 * thickness;
        let cell_size = local_box_l / cell_grid.as_dvec3();
        let inv_cell_size = DVec3::ONE / cell_size;
        let max_skin = cell_size.min_element() - cfg.max_cut;

        let mut at_lower = [false; 3];
        let mut at_upper = [false; 3];
        for d in 0..3 {
            at_lower[d] = grid.pos[d] == 0;
            at_upper[d] = grid.pos[d] == grid.dims[d] - 1;
        }

        let mut lc = Self {
            cell_grid,
            ghost_thickness: thickness,
            ghost_cell_grid,
            cell_size,
            inv_cell_size,
            max_skin,
            box_l: sim.box_l,
            periodic: sim.periodic,
            my_left: local.my_left,
            local_box_l,
            at_lower,
            at_upper,
            n_local: 0,
            geom_to_store: Vec::new(),
            neighbors: Vec::new(),
        };
        lc.mark_cells();
        lc.init_cell_neighbors();
        debug!(
            ?cell_grid,
            ?ghost_cell_grid,
            max_skin,
            "连接单元网格已构造"
        );
        Ok(lc)
    }

    /// 本地单元数
    #[inline]
    pub fn n_local_cells(&self) -> usize {
        self.n_local
    }

    /// 幽灵单元数
    #[inline]
    pub fn n_ghost_cells(&self) -> usize {
        self.geom_to_store.len() - self.n_local
    }

    /// 创建与本网格布局一致的空 [`CellStore`]
    pub fn make_store(&self) -> CellStore {
        CellStore::with_layout(self.n_local, self.n_ghost_cells())
    }

    /// 本地单元的邻居表（自身 + 13 上半邻居）
    #[inline]
    pub fn neighbors_of(&self, local_cell: usize) -> &[CellIndex] {
        &self.neighbors[local_cell]
    }

    // ========================================================
    // 单元标记与邻居表
    // ========================================================

    fn is_interior(&self, c: IVec3) -> bool {
        (0..3).all(|d| c[d] >= self.ghost_thickness[d] && c[d] < self.ghost_thickness[d] + self.cell_grid[d])
    }

    fn mark_cells(&mut self) {
        let dims = self.ghost_cell_grid;
        let n_total = (dims.x * dims.y * dims.z) as usize;
        self.geom_to_store = vec![CellIndex::invalid(); n_total];

        // 本地单元在前（按几何扫描顺序），幽灵单元在后
        let mut next = 0u32;
        for geom in 0..n_total {
            let c = lm_grid::unlinear_index(geom, dims);
            if self.is_interior(c) {
                self.geom_to_store[geom] = CellIndex::new(next);
                next += 1;
            }
        }
        self.n_local = next as usize;
        for slot in self.geom_to_store.iter_mut() {
            if !slot.is_valid() {
                *slot = CellIndex::new(next);
                next += 1;
            }
        }
        debug_assert_eq!(next as usize, n_total);
    }

    /// 初始化内部单元的相互作用邻居表
    ///
    /// 每个内部单元存自身与几何线性索引不小于自身的 13 个邻居，
    /// 配对遍历因此每个单元对恰好访问一次。仅在网格变化时重建。
    fn init_cell_neighbors(&mut self) {
        let dims = self.ghost_cell_grid;
        self.neighbors = Vec::with_capacity(self.n_local);

        let t = self.ghost_thickness;
        for o in t.z..t.z + self.cell_grid.z {
            for n in t.y..t.y + self.cell_grid.y {
                for m in t.x..t.x + self.cell_grid.x {
                    let ind1 = linear_index(IVec3::new(m, n, o), dims);
                    let mut list = Vec::with_capacity(14);
                    // 自身必须排在首位（自配对的 j > i 规则依赖它）
                    list.push(self.geom_to_store[ind1]);
                    for p in o - 1..=o + 1 {
                        for q in n - 1..=n + 1 {
                            for r in m - 1..=m + 1 {
                                let ind2 = linear_index(IVec3::new(r, q, p), dims);
                                if ind2 > ind1 {
                                    list.push(self.geom_to_store[ind2]);
                                }
                            }
                        }
                    }
                    debug_assert_eq!(list.len(), 14);
                    self.neighbors.push(list);
                }
            }
        }
    }

    // ========================================================
    // 位置 → 单元
    // ========================================================

    /// 位置映射到内部单元（调用方保证位置有效）
    ///
    /// 越界分量钳到最近的内部单元。
    pub fn position_to_cell(&self, pos: DVec3) -> CellIndex {
        let mut c = IVec3::ZERO;
        for d in 0..3 {
            let lpos = pos[d] - self.my_left[d];
            let raw = (lpos * self.inv_cell_size[d]).floor() as i32 + self.ghost_thickness[d];
            c[d] = raw.clamp(
                self.ghost_thickness[d],
                self.ghost_thickness[d] + self.cell_grid[d] - 1,
            );
        }
        self.geom_to_store[linear_index(c, self.ghost_cell_grid)]
    }

    /// 位置映射到内部单元；超出容差时返回 `None`
    ///
    /// 紧贴边界（ε·盒长以内）或非周期盒边界上的位置仍被接收。
    pub fn save_position_to_cell(&self, pos: DVec3) -> Option<CellIndex> {
        let mut c = IVec3::ZERO;
        for d in 0..3 {
            let lpos = pos[d] - self.my_left[d];
            let lo = self.ghost_thickness[d];
            let hi = lo + self.cell_grid[d] - 1;
            let mut cd = (lpos * self.inv_cell_size[d]).floor() as i32 + lo;

            if cd < lo {
                if lpos > -ROUND_ERROR_PREC * self.box_l[d]
                    || (!self.periodic[d] && self.at_lower[d])
                {
                    cd = lo;
                } else {
                    return None;
                }
            } else if cd > hi {
                if lpos < self.local_box_l[d] + ROUND_ERROR_PREC * self.box_l[d]
                    || (!self.periodic[d] && self.at_upper[d])
                {
                    cd = hi;
                } else {
                    return None;
                }
            }
            c[d] = cd;
        }
        Some(self.geom_to_store[linear_index(c, self.ghost_cell_grid)])
    }

    /// 幽灵边框内任意单元的存储索引（含幽灵单元）
    ///
    /// 幽灵通信计划按几何子块收集单元时使用。
    pub fn store_index(&self, geom: IVec3) -> CellIndex {
        self.geom_to_store[linear_index(geom, self.ghost_cell_grid)]
    }

    /// 位置映射到内部单元，并报告是否仍越界
    ///
    /// 迁移接收端使用：越界分量钳到边缘单元，周期轴上发生钳制
    /// 说明粒子移动超过一个子域，需要再一轮交换。
    pub fn position_to_cell_oob(&self, pos: DVec3) -> (CellIndex, bool) {
        let mut c = IVec3::ZERO;
        let mut oob = false;
        for d in 0..3 {
            let lpos = pos[d] - self.my_left[d];
            let lo = self.ghost_thickness[d];
            let hi = lo + self.cell_grid[d] - 1;
            let raw = (lpos * self.inv_cell_size[d]).floor() as i32 + lo;
            let clamped = raw.clamp(lo, hi);
            if clamped != raw && self.periodic[d] {
                oob = true;
            }
            c[d] = clamped;
        }
        (
            self.geom_to_store[linear_index(c, self.ghost_cell_grid)],
            oob,
        )
    }

    // ========================================================
    // 配对遍历
    // ========================================================

    /// 只读遍历全部相互作用粒子对
    ///
    /// 每个本地单元产出 14 个 `(单元, 邻居)` 组合；自配对内
    /// `j > i`，跨单元配对全组合。幽灵单元作为邻居参与。
    pub fn for_each_pair(&self, store: &CellStore, f: &mut dyn FnMut(&Particle, &Particle)) {
        for c in 0..self.n_local {
            let list = &self.neighbors[c];
            let own = store.cell(list[0]);
            for (k, &nb) in list.iter().enumerate() {
                if k == 0 {
                    let parts = own.as_slice();
                    for i in 0..parts.len() {
                        for j in i + 1..parts.len() {
                            f(&parts[i], &parts[j]);
                        }
                    }
                } else {
                    for pi in own.iter() {
                        for pj in store.cell(nb).iter() {
                            f(pi, pj);
                        }
                    }
                }
            }
        }
    }

    /// 对全部相互作用粒子对施加对称力
    ///
    /// `kernel(pi, pj)` 返回作用在 `pi` 上的力，`pj` 得到反作用力。
    /// 幽灵邻居上累积的力随后由收力通信归还所有者。
    pub fn for_each_pair_force(
        &self,
        store: &mut CellStore,
        kernel: &dyn Fn(&Particle, &Particle) -> DVec3,
    ) {
        for c in 0..self.n_local {
            let list = self.neighbors[c].clone();
            let own_idx = list[0];
            for (k, &nb) in list.iter().enumerate() {
                if k == 0 {
                    let parts = store.cell_mut(own_idx).as_mut_slice();
                    for i in 0..parts.len() {
                        let (head, tail) = parts.split_at_mut(i + 1);
                        let pi = &mut head[i];
                        for pj in tail.iter_mut() {
                            let fij = kernel(pi, pj);
                            add_force(pi, fij);
                            add_force(pj, -fij);
                        }
                    }
                } else {
                    let (own, other) = store.cell_pair_mut(own_idx, nb);
                    for pi in own.iter_mut() {
                        for pj in other.iter_mut() {
                            let fij = kernel(pi, pj);
                            add_force(pi, fij);
                            add_force(pj, -fij);
                        }
                    }
                }
            }
        }
    }
}

#[inline]
fn add_force(p: &mut Particle, f: DVec3) {
    p.body.force[0] += f.x;
    p.body.force[1] += f.y;
    p.body.force[2] += f.z;
}

// ============================================================
// Verlet 配对表
// ============================================================

/// Verlet 配对表
///
/// 每个 `(单元, 邻居)` 组合配一张截断半径内的配对表，条目为
/// `(单元, 槽位)` 引用。重排或迁移会移动槽位，因此任何重排 /
/// 交换之后表必须重建；两次重建之间（位移未超过 skin）力循环
/// 直接走配对表。
#[derive(Debug, Default, Clone)]
pub struct VerletLists {
    /// 每本地单元、每邻居项一张配对表
    pairs: Vec<Vec<Vec<((CellIndex, u32), (CellIndex, u32))>>>,
    /// 构建时使用的截断半径平方
    cutoff_sq: f64,
}

impl VerletLists {
    /// 重建配对表
    ///
    /// `cutoff` 通常取 `max_cut + skin`，不得超过构网格时的
    /// `max_range`。
    pub fn rebuild(&mut self, lc: &LinkedCells, store: &CellStore, cutoff: f64) {
        self.cutoff_sq = cutoff * cutoff;
        self.pairs = Vec::with_capacity(lc.n_local_cells());

        for c in 0..lc.n_local_cells() {
            let list = lc.neighbors_of(c);
            let own_idx = list[0];
            let own = store.cell(own_idx);
            let mut per_neighbor = Vec::with_capacity(list.len());
            for (k, &nb) in list.iter().enumerate() {
                let mut entry = Vec::new();
                if k == 0 {
                    let parts = own.as_slice();
                    for i in 0..parts.len() {
                        for j in i + 1..parts.len() {
                            if within(&parts[i], &parts[j], self.cutoff_sq) {
                                entry.push(((own_idx, i as u32), (own_idx, j as u32)));
                            }
                        }
                    }
                } else {
                    for (i, pi) in own.iter().enumerate() {
                        for (j, pj) in store.cell(nb).iter().enumerate() {
                            if within(pi, pj, self.cutoff_sq) {
                                entry.push(((own_idx, i as u32), (nb, j as u32)));
                            }
                        }
                    }
                }
                per_neighbor.push(entry);
            }
            self.pairs.push(per_neighbor);
        }
    }

    /// 配对总数
    pub fn n_pairs(&self) -> usize {
        self.pairs
            .iter()
            .flat_map(|per| per.iter())
            .map(Vec::len)
            .sum()
    }

    /// 按表遍历配对
    pub fn for_each_pair(&self, store: &CellStore, f: &mut dyn FnMut(&Particle, &Particle)) {
        for per_neighbor in &self.pairs {
            for entry in per_neighbor {
                for &((ca, sa), (cb, sb)) in entry {
                    let (pa, pb) = (
                        store.cell(ca).get(sa as usize),
                        store.cell(cb).get(sb as usize),
                    );
                    if let (Some(pa), Some(pb)) = (pa, pb) {
                        f(pa, pb);
                    }
                }
            }
        }
    }
}

#[inline]
fn within(a: &Particle, b: &Particle, cutoff_sq: f64) -> bool {
    (a.position() - b.position()).length_squared() < cutoff_sq
}

// ============================================================
// 网格尺寸算法
// ============================================================

fn size_cell_grid(local_box_l: DVec3, box_l: DVec3, cfg: &CellGridConfig) -> LmResult<IVec3> {
    let max_range = cfg.max_range;
    let shear_axis = cfg.shear.map(|s| s.axis);

    if max_range < ROUND_ERROR_PREC * box_l.x {
        // 初始化场景：作用距离尚未设定
        let mut grid = IVec3::ONE;
        if let Some(axis) = shear_axis {
            grid[axis] = 2;
        }
        return Ok(grid);
    }

    let volume = local_box_l.x * local_box_l.y * local_box_l.z;
    let scale = (cfg.max_num_cells as f64 / volume).cbrt();

    let mut grid = IVec3::ZERO;
    let mut cell_range = DVec3::ZERO;
    for d in 0..3 {
        grid[d] = (local_box_l[d] * scale).ceil() as i32;
        cell_range[d] = local_box_l[d] / grid[d] as f64;

        if cell_range[d] < max_range {
            // 该方向单元过多，压到作用距离允许的最少数量
            grid[d] = (local_box_l[d] / max_range).floor() as i32;
            if grid[d] < 1 {
                return Err(LmError::config_axis(
                    d,
                    format!(
                        "作用距离 {} 大于局部盒长 {}",
                        max_range, local_box_l[d]
                    ),
                ));
            }
            if shear_axis == Some(d) && grid[d] < 2 {
                return Err(LmError::config_axis(
                    d,
                    format!(
                        "作用距离 {} 大于剪切方向局部盒长 {} 的一半",
                        max_range, local_box_l[d]
                    ),
                ));
            }
            cell_range[d] = local_box_l[d] / grid[d] as f64;
        }
    }

    // 上限裁剪：反复递减单元尺寸最小的轴（z 优先于 y 优先于 x）
    loop {
        let n_local = (grid.x * grid.y * grid.z) as usize;
        if n_local <= cfg.max_num_cells {
            break;
        }

        let mut min_d = None;
        let mut min_size = f64::MAX;
        for d in [2usize, 1, 0] {
            let floor = if shear_axis == Some(d) { 2 } else { 1 };
            if grid[d] > floor && cell_range[d] < min_size {
                min_d = Some(d);
                min_size = cell_range[d];
            }
        }
        let Some(d) = min_d else {
            return Err(LmError::config(format!(
                "在 max_num_cells = {} 限制下找不到可用单元网格",
                cfg.max_num_cells
            )));
        };
        grid[d] -= 1;
        cell_range[d] = local_box_l[d] / grid[d] as f64;
    }

    let n_local = (grid.x * grid.y * grid.z) as usize;
    if n_local < cfg.min_num_cells {
        return Err(LmError::config(format!(
            "单元数 {} 低于下限 {} (作用距离过大或 min_num_cells 过大)",
            n_local, cfg.min_num_cells
        )));
    }

    Ok(grid)
}
