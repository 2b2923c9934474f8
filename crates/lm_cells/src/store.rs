// crates/lm_cells/src/store.rs

//! 进程级单元集合
//!
//! 扁平单元数组（本地单元在前，幽灵单元在后）加
//! 粒子 id → (单元, 槽位) 索引。键合查找与迁移都依赖该索引。
//!
//! # 不变量
//!
//! 每个完成的公有变更之后索引保持一致（迁移内部的中间步骤
//! 允许短暂失效）；任一 id 在索引中最多出现一次。

use glam::DVec3;
use tracing::debug;

use lm_foundation::{CellIndex, LmError, LmResult};

use crate::cell::Cell;
use crate::particle::{Particle, ParticleId};

/// 重排请求级别
///
/// 粘滞标志：`add_particle` 发起请求，交换完成后清除。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum ResortLevel {
    /// 无需重排
    #[default]
    None,
    /// 局部重排（粒子仍在本子域内）
    Local,
    /// 全局重排（粒子可能属于其他 rank）
    Global,
}

/// 进程级单元集合
#[derive(Debug, Default)]
pub struct CellStore {
    cells: Vec<Cell>,
    n_local: usize,
    index: Vec<Option<(CellIndex, u32)>>,
    resort: ResortLevel,
}

impl CellStore {
    /// 以 `n_local` 个本地单元与 `n_ghost` 个幽灵单元创建
    pub fn with_layout(n_local: usize, n_ghost: usize) -> Self {
        Self {
            cells: (0..n_local + n_ghost).map(|_| Cell::default()).collect(),
            n_local,
            index: Vec::new(),
            resort: ResortLevel::None,
        }
    }

    /// 单元总数（本地 + 幽灵）
    #[inline]
    pub fn n_cells(&self) -> usize {
        self.cells.len()
    }

    /// 本地单元数
    #[inline]
    pub fn n_local_cells(&self) -> usize {
        self.n_local
    }

    /// 单元访问
    #[inline]
    pub fn cell(&self, idx: CellIndex) -> &Cell {
        &self.cells[idx.index()]
    }

    /// 单元可变访问
    #[inline]
    pub fn cell_mut(&mut self, idx: CellIndex) -> &mut Cell {
        &mut self.cells[idx.index()]
    }

    /// 是否为本地单元
    #[inline]
    pub fn is_local_cell(&self, idx: CellIndex) -> bool {
        idx.index() < self.n_local
    }

    /// 同时可变借用两个不同单元
    ///
    /// # Panics
    ///
    /// `a == b` 时 panic；自配对用 [`Cell::as_mut_slice`] 内部切分。
    pub fn cell_pair_mut(&mut self, a: CellIndex, b: CellIndex) -> (&mut Cell, &mut Cell) {
        let (a, b) = (a.index(), b.index());
        assert_ne!(a, b, "自配对不经过 cell_pair_mut");
        if a < b {
            let (lo, hi) = self.cells.split_at_mut(b);
            (&mut lo[a], &mut hi[0])
        } else {
            let (lo, hi) = self.cells.split_at_mut(a);
            (&mut hi[0], &mut lo[b])
        }
    }

    /// 本地单元遍历
    pub fn local_cells(&self) -> impl Iterator<Item = (CellIndex, &Cell)> {
        self.cells[..self.n_local]
            .iter()
            .enumerate()
            .map(|(i, c)| (CellIndex::from_usize(i), c))
    }

    /// 幽灵单元遍历
    pub fn ghost_cells(&self) -> impl Iterator<Item = (CellIndex, &Cell)> {
        self.cells[self.n_local..]
            .iter()
            .enumerate()
            .map(move |(i, c)| (CellIndex::from_usize(self.n_local + i), c))
    }

    /// 本地粒子总数
    pub fn n_local_particles(&self) -> usize {
        self.cells[..self.n_local].iter().map(Cell::len).sum()
    }

    /// 遍历全部本地粒子
    pub fn local_particles(&self) -> impl Iterator<Item = &Particle> {
        self.cells[..self.n_local].iter().flat_map(Cell::iter)
    }

    // ========================================================
    // 重排标志
    // ========================================================

    /// 当前重排请求
    #[inline]
    pub fn resort_level(&self) -> ResortLevel {
        self.resort
    }

    /// 提升重排请求（只升不降）
    #[inline]
    pub fn request_resort(&mut self, level: ResortLevel) {
        self.resort = self.resort.max(level);
    }

    /// 清除重排请求（由交换器在完成后调用）
    #[inline]
    pub fn clear_resort(&mut self) {
        self.resort = ResortLevel::None;
    }

    // ========================================================
    // 索引维护
    // ========================================================

    /// 索引查询
    #[inline]
    pub fn lookup(&self, id: ParticleId) -> Option<(CellIndex, usize)> {
        self.index
            .get(id as usize)
            .copied()
            .flatten()
            .map(|(c, s)| (c, s as usize))
    }

    /// 按 id 取粒子
    pub fn particle(&self, id: ParticleId) -> Option<&Particle> {
        let (cell, slot) = self.lookup(id)?;
        self.cells[cell.index()].get(slot)
    }

    /// 按 id 取可变粒子
    pub fn particle_mut(&mut self, id: ParticleId) -> Option<&mut Particle> {
        let (cell, slot) = self.lookup(id)?;
        self.cells[cell.index()].get_mut(slot)
    }

    fn set_index(&mut self, id: ParticleId, entry: Option<(CellIndex, u32)>) {
        let id = id as usize;
        if self.index.len() <= id {
            self.index.resize(id + 1, None);
        }
        self.index[id] = entry;
    }

    /// 重建单元 `idx` 内全部粒子的索引条目
    pub fn update_index_for_cell(&mut self, idx: CellIndex) {
        let entries: Vec<(ParticleId, u32)> = self.cells[idx.index()]
            .iter()
            .enumerate()
            .map(|(slot, p)| (p.id(), slot as u32))
            .collect();
        for (id, slot) in entries {
            self.set_index(id, Some((idx, slot)));
        }
    }

    /// 已占用索引中的最大粒子 id；无粒子时 `-1`
    pub fn max_local_particle_id(&self) -> ParticleId {
        self.index
            .iter()
            .rposition(Option::is_some)
            .map(|i| i as ParticleId)
            .unwrap_or(-1)
    }

    // ========================================================
    // 粒子增删
    // ========================================================

    /// 插入粒子
    ///
    /// `placer` 把位置映射到本地单元；映射失败时粒子暂存单元 0
    /// 并请求全局重排，映射成功时请求局部重排。总是成功。
    pub fn add_particle(
        &mut self,
        p: Particle,
        placer: &dyn Fn(DVec3) -> Option<CellIndex>,
    ) -> CellIndex {
        match placer(p.position()) {
            Some(cell) => {
                self.request_resort(ResortLevel::Local);
                self.insert_into(cell, p);
                cell
            }
            None => {
                debug!(id = p.id(), "粒子不在本子域, 暂存单元 0");
                self.request_resort(ResortLevel::Global);
                let cell = CellIndex::new(0);
                self.insert_into(cell, p);
                cell
            }
        }
    }

    /// 仅当粒子属于本子域时插入
    ///
    /// 返回 `None` 表示未放置（位置不在本子域）。
    pub fn add_local_particle(
        &mut self,
        p: Particle,
        placer: &dyn Fn(DVec3) -> Option<CellIndex>,
    ) -> Option<CellIndex> {
        let cell = placer(p.position())?;
        self.insert_into(cell, p);
        Some(cell)
    }

    /// 把粒子插入指定单元并登记索引
    pub fn insert_into(&mut self, cell: CellIndex, p: Particle) {
        let id = p.id();
        let slot = self.cells[cell.index()].push(p);
        self.set_index(id, Some((cell, slot as u32)));
    }

    /// 抽出指定槽位的粒子，维护被交换粒子的索引
    pub fn extract_from(&mut self, cell: CellIndex, slot: usize) -> Particle {
        let p = self.cells[cell.index()].extract(slot);
        self.set_index(p.id(), None);
        // 末尾交换：若槽位仍有粒子，它刚从末尾搬来
        if let Some(moved) = self.cells[cell.index()].get(slot) {
            let moved_id = moved.id();
            self.set_index(moved_id, Some((cell, slot as u32)));
        }
        p
    }

    /// 删除 id 对应的粒子
    ///
    /// 同时删除其他本地粒子上引用该 id 的键合条目（arity 由外部
    /// 键合目录提供）。id 不在本地时为无操作。
    pub fn remove_particle(&mut self, id: ParticleId, arity: &dyn Fn(i32) -> usize) {
        if let Some((cell, slot)) = self.lookup(id) {
            self.extract_from(cell, slot);
        }
        for cell in &mut self.cells[..self.n_local] {
            for p in cell.iter_mut() {
                p.bonds.remove_entries_with_partner(id, arity);
            }
        }
    }

    /// 销毁全部粒子并清空索引
    pub fn remove_all_particles(&mut self) {
        for cell in &mut self.cells {
            cell.drain_all();
        }
        self.index.clear();
    }

    /// 校验索引一致性（P2 辅助）
    ///
    /// 每个本地粒子的索引条目指回其实际单元与槽位。
    pub fn check_index_consistency(&self) -> LmResult<()> {
        for (ci, cell) in self.local_cells() {
            for (slot, p) in cell.iter().enumerate() {
                match self.lookup(p.id()) {
                    Some(entry) if entry == (ci, slot) => {}
                    other => {
                        return Err(LmError::inconsistency(format!(
                            "粒子 {} 实际位于 ({:?},{}), 索引为 {:?}",
                            p.id(),
                            ci,
                            slot,
                            other
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn placer_all_to(cell: u32) -> impl Fn(DVec3) -> Option<CellIndex> {
        move |_| Some(CellIndex::new(cell))
    }

    #[test]
    fn test_add_and_lookup() {
        let mut store = CellStore::with_layout(2, 0);
        store.add_particle(Particle::at(5, DVec3::ZERO), &placer_all_to(1));
        assert_eq!(store.lookup(5), Some((CellIndex::new(1), 0)));
        assert_eq!(store.resort_level(), ResortLevel::Local);
        store.check_index_consistency().unwrap();
    }

    #[test]
    fn test_unplaceable_goes_to_cell_zero_with_global_resort() {
        let mut store = CellStore::with_layout(2, 0);
        store.add_particle(Particle::at(3, DVec3::ZERO), &|_| None);
        assert_eq!(store.lookup(3), Some((CellIndex::new(0), 0)));
        assert_eq!(store.resort_level(), ResortLevel::Global);
    }

    #[test]
    fn test_add_local_rejects_foreign() {
        let mut store = CellStore::with_layout(1, 0);
        assert!(store
            .add_local_particle(Particle::at(1, DVec3::ZERO), &|_| None)
            .is_none());
        assert_eq!(store.n_local_particles(), 0);
    }

    #[test]
    fn test_extract_updates_swapped_index() {
        let mut store = CellStore::with_layout(1, 0);
        let placer = placer_all_to(0);
        for id in 0..3 {
            store.add_particle(Particle::at(id, DVec3::ZERO), &placer);
        }
        let p = store.extract_from(CellIndex::new(0), 0);
        assert_eq!(p.id(), 0);
        assert_eq!(store.lookup(0), None);
        // 粒子 2 被交换进槽位 0
        assert_eq!(store.lookup(2), Some((CellIndex::new(0), 0)));
        store.check_index_consistency().unwrap();
    }

    #[test]
    fn test_remove_particle_strips_bonds_on_others() {
        let arity = |_t: i32| 1usize;
        let mut store = CellStore::with_layout(1, 0);
        let placer = placer_all_to(0);
        let mut a = Particle::at(1, DVec3::ZERO);
        a.bonds.push(0, &[2]);
        store.add_particle(a, &placer);
        store.add_particle(Particle::at(2, DVec3::ZERO), &placer);

        store.remove_particle(2, &arity);
        assert_eq!(store.lookup(2), None);
        assert!(store.particle(1).unwrap().bonds.is_empty());
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let mut store = CellStore::with_layout(1, 0);
        store.remove_particle(42, &|_| 1);
        assert_eq!(store.n_local_particles(), 0);
    }

    #[test]
    fn test_max_local_particle_id() {
        let mut store = CellStore::with_layout(1, 0);
        assert_eq!(store.max_local_particle_id(), -1);
        let placer = placer_all_to(0);
        store.add_particle(Particle::at(9, DVec3::ZERO), &placer);
        store.add_particle(Particle::at(4, DVec3::ZERO), &placer);
        assert_eq!(store.max_local_particle_id(), 9);
        store.remove_particle(9, &|_| 1);
        assert_eq!(store.max_local_particle_id(), 4);
    }

    #[test]
    fn test_remove_all() {
        let mut store = CellStore::with_layout(2, 1);
        let placer = placer_all_to(1);
        store.add_particle(Particle::at(1, DVec3::ZERO), &placer);
        store.remove_all_particles();
        assert_eq!(store.n_local_particles(), 0);
        assert_eq!(store.max_local_particle_id(), -1);
    }
}
