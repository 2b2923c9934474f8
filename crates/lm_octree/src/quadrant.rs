// crates/lm_octree/src/quadrant.rs

//! 象限坐标代数
//!
//! 象限以最细层整数坐标表示：树内坐标 ∈ `[0, 2^MAX_LEVEL)`，
//! 层级 `l` 的象限边长为 `2^(MAX_LEVEL - l)` 个最细单元，坐标
//! 对齐到边长的整数倍。

use bytemuck::{Pod, Zeroable};

use lm_foundation::morton;

/// 最大细化层级（树内坐标位宽）
pub const MAX_LEVEL: u8 = 16;

/// 层级 `l` 的象限边长（最细单元数）
#[inline]
pub const fn level_len(level: u8) -> u32 {
    1 << (MAX_LEVEL - level)
}

/// 层级 `l` 的象限覆盖的最细单元总数
#[inline]
pub const fn level_volume(level: u8) -> i64 {
    1 << (3 * (MAX_LEVEL - level) as i64)
}

/// 单棵树的最细层 Morton 键空间大小
pub const TREE_FKEY_SPAN: i64 = 1 << (3 * MAX_LEVEL as i64);

/// 象限的线格式（附发送方本地槽位）
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct WireQuadrant {
    /// 所属树
    pub tree: u32,
    /// 树内坐标
    pub x: u32,
    /// 树内坐标
    pub y: u32,
    /// 树内坐标
    pub z: u32,
    /// 层级
    pub level: u32,
    /// 发送方本地槽位
    pub slot: u32,
}

impl WireQuadrant {
    /// 打包
    pub fn pack(q: &Quadrant, slot: usize) -> Self {
        Self {
            tree: q.tree,
            x: q.x,
            y: q.y,
            z: q.z,
            level: q.level as u32,
            slot: slot as u32,
        }
    }

    /// 解包
    pub fn unpack(&self) -> Quadrant {
        Quadrant {
            tree: self.tree,
            x: self.x,
            y: self.y,
            z: self.z,
            level: self.level as u8,
        }
    }
}

/// 八叉树叶子（象限）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quadrant {
    /// 所属树（树网格线性索引）
    pub tree: u32,
    /// 树内坐标（最细单元单位，对齐到 `level_len(level)`）
    pub x: u32,
    /// 树内坐标
    pub y: u32,
    /// 树内坐标
    pub z: u32,
    /// 层级
    pub level: u8,
}

impl Quadrant {
    /// 树根象限
    pub fn root(tree: u32) -> Self {
        Self {
            tree,
            x: 0,
            y: 0,
            z: 0,
            level: 0,
        }
    }

    /// 边长（最细单元数）
    #[inline]
    pub fn len(&self) -> u32 {
        level_len(self.level)
    }

    /// 最细层 Morton 键（树偏移 + 树内 Morton）
    ///
    /// 叶子互不重叠时按 fkey 排序即全局 Morton 序。
    #[inline]
    pub fn fkey(&self) -> i64 {
        self.tree as i64 * TREE_FKEY_SPAN
            + morton::encode(self.x as i64, self.y as i64, self.z as i64)
    }

    /// fkey 区间终点（不含）：后代覆盖 `[fkey, fkey_end)`
    #[inline]
    pub fn fkey_end(&self) -> i64 {
        self.fkey() + level_volume(self.level)
    }

    /// 第 `c` 个子象限（`c ∈ [0,8)`，Morton 子序）
    pub fn child(&self, c: u8) -> Self {
        debug_assert!(self.level < MAX_LEVEL);
        let half = self.len() >> 1;
        Self {
            tree: self.tree,
            x: self.x + (c as u32 & 1) * half,
            y: self.y + ((c as u32 >> 1) & 1) * half,
            z: self.z + ((c as u32 >> 2) & 1) * half,
            level: self.level + 1,
        }
    }

    /// 父象限
    pub fn parent(&self) -> Self {
        debug_assert!(self.level > 0);
        let mask = !(level_len(self.level - 1) - 1);
        Self {
            tree: self.tree,
            x: self.x & mask,
            y: self.y & mask,
            z: self.z & mask,
            level: self.level - 1,
        }
    }

    /// 在父象限中的子序号
    #[inline]
    pub fn child_id(&self) -> u8 {
        debug_assert!(self.level > 0);
        let bit = MAX_LEVEL - self.level;
        (((self.x >> bit) & 1) | (((self.y >> bit) & 1) << 1) | (((self.z >> bit) & 1) << 2)) as u8
    }

    /// 是否包含同树坐标点
    #[inline]
    pub fn contains_point(&self, px: u32, py: u32, pz: u32) -> bool {
        let l = self.len();
        self.x <= px && px < self.x + l && self.y <= py && py < self.y + l && self.z <= pz && pz < self.z + l
    }

    /// 是否与同树象限相交
    pub fn overlaps(&self, other: &Self) -> bool {
        if self.tree != other.tree {
            return false;
        }
        let (a, b) = (self.len(), other.len());
        self.x < other.x + b
            && other.x < self.x + a
            && self.y < other.y + b
            && other.y < self.y + a
            && self.z < other.z + b
            && other.z < self.z + a
    }

    /// 8 个连续叶子是否构成完整家族（同父、同层、Morton 连续）
    pub fn is_family(leaves: &[Self]) -> bool {
        if leaves.len() != 8 || leaves[0].level == 0 {
            return false;
        }
        let parent = leaves[0].parent();
        (0..8).all(|c| {
            leaves[c].level == leaves[0].level && leaves[c] == parent.child(c as u8)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_children_cover_parent_in_order() {
        let q = Quadrant::root(0);
        let children: Vec<_> = (0..8).map(|c| q.child(c)).collect();
        assert!(Quadrant::is_family(&children));
        // fkey 连续
        for c in 0..8 {
            assert_eq!(
                children[c].fkey(),
                q.fkey() + c as i64 * level_volume(1)
            );
        }
        assert_eq!(children[7].fkey_end(), q.fkey_end());
    }

    #[test]
    fn test_parent_child_roundtrip() {
        let q = Quadrant::root(2).child(5).child(3);
        assert_eq!(q.level, 2);
        assert_eq!(q.child_id(), 3);
        assert_eq!(q.parent().child_id(), 5);
        assert_eq!(q.parent().parent(), Quadrant::root(2));
    }

    #[test]
    fn test_containment_and_overlap() {
        let q = Quadrant::root(0).child(0);
        let deep = q.child(7).child(7);
        assert!(q.overlaps(&deep));
        assert!(deep.overlaps(&q));
        assert!(q.contains_point(deep.x, deep.y, deep.z));
        let other = Quadrant::root(0).child(1);
        assert!(!q.overlaps(&other));
        assert!(!q.overlaps(&Quadrant::root(1).child(0)));
    }

    #[test]
    fn test_incomplete_family_rejected() {
        let q = Quadrant::root(0);
        let mut leaves: Vec<_> = (0..8).map(|c| q.child(c)).collect();
        leaves[3] = leaves[3].child(0);
        assert!(!Quadrant::is_family(&leaves));
    }
}
