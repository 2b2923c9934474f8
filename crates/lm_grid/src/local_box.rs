// crates/lm_grid/src/local_box.rs

//! 每 rank 的局部子盒

use glam::DVec3;

use crate::{NodeGrid, SimBox};

/// 本 rank 拥有的矩形子域
#[derive(Debug, Clone, Copy)]
pub struct LocalBox {
    /// 子域下界（含）
    pub my_left: DVec3,
    /// 子域上界（不含）
    pub my_right: DVec3,
}

impl LocalBox {
    /// 由盒子与进程网格计算本 rank 的子域
    pub fn of_rank(sim: &SimBox, grid: &NodeGrid) -> Self {
        let local_l = sim.box_l / grid.dims.as_dvec3();
        let my_left = grid.pos.as_dvec3() * local_l;
        Self {
            my_left,
            my_right: my_left + local_l,
        }
    }

    /// 子域边长
    #[inline]
    pub fn local_box_l(&self) -> DVec3 {
        self.my_right - self.my_left
    }

    /// 位置是否在子域内（左闭右开）
    #[inline]
    pub fn contains(&self, pos: DVec3) -> bool {
        pos.cmpge(self.my_left).all() && pos.cmplt(self.my_right).all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::IVec3;

    #[test]
    fn test_two_rank_split() {
        let sim = SimBox::periodic(DVec3::splat(10.0));
        let g0 = NodeGrid::from_dims(IVec3::new(2, 1, 1), 0).unwrap();
        let g1 = NodeGrid::from_dims(IVec3::new(2, 1, 1), 1).unwrap();
        let b0 = LocalBox::of_rank(&sim, &g0);
        let b1 = LocalBox::of_rank(&sim, &g1);
        assert_eq!(b0.my_left, DVec3::ZERO);
        assert_eq!(b0.my_right, DVec3::new(5.0, 10.0, 10.0));
        assert_eq!(b1.my_left, DVec3::new(5.0, 0.0, 0.0));
        assert!(b1.contains(DVec3::new(5.0, 0.0, 0.0)));
        assert!(!b0.contains(DVec3::new(5.0, 0.0, 0.0)));
    }
}
