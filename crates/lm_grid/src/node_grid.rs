// crates/lm_grid/src/node_grid.rs

//! 笛卡尔进程网格
//!
//! rank 与三维进程坐标的映射、26 邻居 rank 表，以及
//! `position_to_node`。位置映射对盒内任意位置总是给出确定 rank。

use glam::{DVec3, IVec3};

use lm_foundation::{LmError, LmResult};

use crate::sim_box::SimBox;

/// 笛卡尔进程网格
#[derive(Debug, Clone)]
pub struct NodeGrid {
    /// 各方向进程数
    pub dims: IVec3,
    /// 本 rank 的网格坐标
    pub pos: IVec3,
    /// 本 rank
    pub rank: usize,
}

impl NodeGrid {
    /// 按给定维度创建
    pub fn from_dims(dims: IVec3, rank: usize) -> LmResult<Self> {
        let n = (dims.x * dims.y * dims.z) as usize;
        if dims.cmplt(IVec3::ONE).any() {
            return Err(LmError::config(format!("非法进程网格 {:?}", dims)));
        }
        LmError::check_index("Rank", rank, n)?;
        Ok(Self {
            dims,
            pos: coords_of(rank, dims),
            rank,
        })
    }

    /// 为 `n_ranks` 个进程选择尽量接近立方的网格
    ///
    /// 在所有因子三元组中选取表面积最小者（确定性：并列时取
    /// 字典序最小）。
    pub fn for_size(n_ranks: usize, rank: usize) -> LmResult<Self> {
        if n_ranks == 0 {
            return Err(LmError::config("进程数不能为零"));
        }
        let n = n_ranks as i32;
        let mut best = IVec3::new(1, 1, n);
        let mut best_surface = i64::MAX;
        for x in 1..=n {
            if n % x != 0 {
                continue;
            }
            let rest = n / x;
            for y in 1..=rest {
                if rest % y != 0 {
                    continue;
                }
                let z = rest / y;
                let surface = 2 * (x as i64 * y as i64 + y as i64 * z as i64 + x as i64 * z as i64);
                let cand = IVec3::new(x, y, z);
                if surface < best_surface {
                    best_surface = surface;
                    best = cand;
                }
            }
        }
        Self::from_dims(best, rank)
    }

    /// rank 总数
    #[inline]
    pub fn size(&self) -> usize {
        (self.dims.x * self.dims.y * self.dims.z) as usize
    }

    /// 网格坐标对应的 rank（坐标按周期回绕）
    pub fn rank_of_coords(&self, coords: IVec3) -> usize {
        let wrapped = IVec3::new(
            coords.x.rem_euclid(self.dims.x),
            coords.y.rem_euclid(self.dims.y),
            coords.z.rem_euclid(self.dims.z),
        );
        crate::linear_index(wrapped, self.dims)
    }

    /// 位移 `d ∈ {-1,0,1}^3` 方向的邻居 rank
    #[inline]
    pub fn neighbor_rank(&self, disp: [i32; 3]) -> usize {
        self.rank_of_coords(self.pos + IVec3::from_array(disp))
    }

    /// 位移方向上本 rank 是否跨越 `axis` 轴的盒边界
    ///
    /// 决定幽灵位置传输是否需要加 ±盒长的周期移位。
    #[inline]
    pub fn crosses_boundary(&self, disp: [i32; 3], axis: usize) -> bool {
        let d = disp[axis];
        let p = self.pos[axis];
        (d < 0 && p == 0) || (d > 0 && p == self.dims[axis] - 1)
    }

    /// 盒内位置归属的 rank
    ///
    /// 对任意盒内位置全定义且确定；盒外坐标先按周期折叠。
    pub fn position_to_node(&self, sim: &SimBox, pos: DVec3) -> usize {
        let folded = sim.folded(pos);
        let mut coords = IVec3::ZERO;
        for d in 0..3 {
            let c = (folded[d] / sim.box_l[d] * self.dims[d] as f64).floor() as i32;
            coords[d] = c.clamp(0, self.dims[d] - 1);
        }
        crate::linear_index(coords, self.dims)
    }

    /// 本 rank 的 26 个邻居 rank（与位移表同序）
    pub fn neighbor_ranks(&self) -> [usize; 26] {
        let mut out = [0usize; 26];
        for (i, disp) in NEIGHBOR_DISPS_LOCAL.iter().enumerate() {
            out[i] = self.neighbor_rank(*disp);
        }
        out
    }
}

// 与 lm_comm::tag::NEIGHBOR_DISPS 相同的表；本 crate 位于其下层，
// 表以网格几何为准，tag 层的副本经测试保持一致。
pub(crate) const NEIGHBOR_DISPS_LOCAL: [[i32; 3]; 26] = [
    [-1, -1, -1],
    [-1, -1, 0],
    [-1, -1, 1],
    [-1, 0, -1],
    [-1, 0, 0],
    [-1, 0, 1],
    [-1, 1, -1],
    [-1, 1, 0],
    [-1, 1, 1],
    [0, -1, -1],
    [0, -1, 0],
    [0, -1, 1],
    [0, 0, -1],
    [0, 0, 1],
    [0, 1, -1],
    [0, 1, 0],
    [0, 1, 1],
    [1, -1, -1],
    [1, -1, 0],
    [1, -1, 1],
    [1, 0, -1],
    [1, 0, 0],
    [1, 0, 1],
    [1, 1, -1],
    [1, 1, 0],
    [1, 1, 1],
];

fn coords_of(rank: usize, dims: IVec3) -> IVec3 {
    crate::unlinear_index(rank, dims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_size_prefers_cubic() {
        let g = NodeGrid::for_size(8, 0).unwrap();
        assert_eq!(g.dims, IVec3::new(2, 2, 2));
    }

    #[test]
    fn test_for_size_four_ranks() {
        let g = NodeGrid::for_size(4, 0).unwrap();
        // 表面积最小的分解是 1x2x2（及其排列中字典序最小者）
        assert_eq!(
            g.dims.x * g.dims.y * g.dims.z,
            4,
        );
        assert_eq!(g.dims.max_element(), 2);
    }

    #[test]
    fn test_position_to_node_two_ranks() {
        let sim = SimBox::periodic(DVec3::splat(10.0));
        let g = NodeGrid::from_dims(IVec3::new(2, 1, 1), 0).unwrap();
        assert_eq!(g.position_to_node(&sim, DVec3::new(2.0, 5.0, 5.0)), 0);
        assert_eq!(g.position_to_node(&sim, DVec3::new(7.0, 5.0, 5.0)), 1);
        // 盒外坐标先折叠
        assert_eq!(g.position_to_node(&sim, DVec3::new(10.05, 5.0, 5.0)), 0);
        assert_eq!(g.position_to_node(&sim, DVec3::new(-0.05, 5.0, 5.0)), 1);
    }

    #[test]
    fn test_neighbor_wraps_periodically() {
        let g = NodeGrid::from_dims(IVec3::new(2, 1, 1), 0).unwrap();
        assert_eq!(g.neighbor_rank([1, 0, 0]), 1);
        assert_eq!(g.neighbor_rank([-1, 0, 0]), 1);
        assert_eq!(g.neighbor_rank([0, 1, 0]), 0);
    }

    #[test]
    fn test_crosses_boundary() {
        let g = NodeGrid::from_dims(IVec3::new(2, 1, 1), 0).unwrap();
        assert!(g.crosses_boundary([-1, 0, 0], 0));
        assert!(!g.crosses_boundary([1, 0, 0], 0));
        // 单进程方向：任何位移都跨边界
        assert!(g.crosses_boundary([0, 1, 0], 1));
        assert!(g.crosses_boundary([0, -1, 0], 1));
    }

    #[test]
    fn test_single_rank_all_neighbors_self() {
        let g = NodeGrid::from_dims(IVec3::ONE, 0).unwrap();
        assert!(g.neighbor_ranks().iter().all(|&r| r == 0));
    }
}
