// crates/lm_cells/src/cell.rs

//! 单元
//!
//! 粒子的稠密容器。插入顺序无意义；删除采用与末尾交换后弹出，
//! 因此删除会改变被交换粒子的槽位，索引维护由上层
//! [`crate::CellStore`] 负责。

use crate::particle::Particle;

/// 粒子单元
#[derive(Debug, Default, Clone)]
pub struct Cell {
    parts: Vec<Particle>,
}

impl Cell {
    /// 粒子数
    #[inline]
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// 是否为空
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// 追加粒子，返回其槽位
    #[inline]
    pub fn push(&mut self, p: Particle) -> usize {
        self.parts.push(p);
        self.parts.len() - 1
    }

    /// 抽出槽位 `slot` 的粒子（末尾交换 + 弹出）
    ///
    /// 若有粒子被交换进 `slot`，其索引条目需要更新。
    #[inline]
    pub fn extract(&mut self, slot: usize) -> Particle {
        self.parts.swap_remove(slot)
    }

    /// 清空并返回全部粒子
    #[inline]
    pub fn drain_all(&mut self) -> Vec<Particle> {
        std::mem::take(&mut self.parts)
    }

    /// 槽位访问
    #[inline]
    pub fn get(&self, slot: usize) -> Option<&Particle> {
        self.parts.get(slot)
    }

    /// 槽位可变访问
    #[inline]
    pub fn get_mut(&mut self, slot: usize) -> Option<&mut Particle> {
        self.parts.get_mut(slot)
    }

    /// 遍历
    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, Particle> {
        self.parts.iter()
    }

    /// 可变遍历
    #[inline]
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Particle> {
        self.parts.iter_mut()
    }

    /// 内部切片
    #[inline]
    pub fn as_slice(&self) -> &[Particle] {
        &self.parts
    }

    /// 内部可变切片
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [Particle] {
        &mut self.parts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec3;

    #[test]
    fn test_extract_swaps_last_into_slot() {
        let mut cell = Cell::default();
        cell.push(Particle::at(1, DVec3::ZERO));
        cell.push(Particle::at(2, DVec3::ZERO));
        cell.push(Particle::at(3, DVec3::ZERO));

        let removed = cell.extract(0);
        assert_eq!(removed.id(), 1);
        assert_eq!(cell.len(), 2);
        // 末尾粒子 3 被交换进槽位 0
        assert_eq!(cell.get(0).unwrap().id(), 3);
    }
}
