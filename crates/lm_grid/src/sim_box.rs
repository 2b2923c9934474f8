// crates/lm_grid/src/sim_box.rs

//! 模拟盒
//!
//! 全局盒子边长与周期性标志，以及把坐标折回主盒的操作。
//! 折叠同时维护粒子的镜像计数，保证展开轨迹连续。

use glam::{DVec3, IVec3};
use serde::{Deserialize, Serialize};

/// 周期性模拟盒
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SimBox {
    /// 盒子边长
    pub box_l: DVec3,
    /// 各方向周期性
    pub periodic: [bool; 3],
}

impl SimBox {
    /// 创建全周期盒子
    pub fn periodic(box_l: DVec3) -> Self {
        Self {
            box_l,
            periodic: [true; 3],
        }
    }

    /// 盒长倒数
    #[inline]
    pub fn inv_box_l(&self) -> DVec3 {
        DVec3::ONE / self.box_l
    }

    /// 把坐标折回 `[0, L)`，并按折叠次数调整镜像计数
    ///
    /// 周期方向：每跨一个盒长镜像计数 ±1；非周期方向不动
    /// （越界处理由调用方的钳制逻辑负责）。
    pub fn fold_position(&self, pos: &mut DVec3, image: &mut IVec3) {
        for d in 0..3 {
            if !self.periodic[d] {
                continue;
            }
            let l = self.box_l[d];
            let shift = (pos[d] / l).floor();
            if shift != 0.0 {
                pos[d] -= shift * l;
                image[d] += shift as i32;
                // 浮点边界：折叠结果可能落在 L 上，回绕到 0
                if pos[d] >= l {
                    pos[d] -= l;
                    image[d] += 1;
                }
            } else if pos[d] >= l {
                pos[d] -= l;
                image[d] += 1;
            }
        }
    }

    /// 折叠单个坐标分量（无镜像计数时的便捷入口）
    pub fn folded(&self, mut pos: DVec3) -> DVec3 {
        let mut image = IVec3::ZERO;
        self.fold_position(&mut pos, &mut image);
        pos
    }

    /// 最小镜像距离向量 `a - b`
    pub fn min_image_vec(&self, a: DVec3, b: DVec3) -> DVec3 {
        let mut d = a - b;
        for k in 0..3 {
            if self.periodic[k] {
                let l = self.box_l[k];
                d[k] -= (d[k] / l).round() * l;
            }
        }
        d
    }
}
