// crates/lm_adapt/src/payload.rs

//! D3Q19 流体负载
//!
//! 无论层级，负载布局一致：19 个分布、19 个模式、流体场
//! （密度、动量、压力张量、外力）；层级存在所属叶子上。
//! 象限搬运按原始字节整体拷贝。
//!
//! 层间映射：
//! - 父 → 8 子（插值）：动量与压力模式清零，密度与力按 1/8
//!   缩放，再由流体场重算分布；
//! - 8 子 → 父（限制）：等权累加后重算分布。

use bytemuck::{Pod, Zeroable};

/// D3Q19 每象限负载
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LbPayload {
    /// 分布函数
    pub populations: [f64; 19],
    /// 碰撞模式
    pub modes: [f64; 19],
    /// 密度（格子单位，相对平均密度的偏差存于分布）
    pub rho: f64,
    /// 动量密度
    pub j: [f64; 3],
    /// 压力张量（对称，6 分量）
    pub pi: [f64; 6],
    /// 外力密度
    pub force: [f64; 3],
    /// 边界标志
    pub boundary: u32,
    /// 场重算标志
    pub recalc_fields: u32,
}

impl Default for LbPayload {
    fn default() -> Self {
        Zeroable::zeroed()
    }
}

impl LbPayload {
    /// 是否为边界象限
    #[inline]
    pub fn is_boundary(&self) -> bool {
        self.boundary != 0
    }

    /// 流速（`j / rho`，密度为零时为零）
    pub fn velocity(&self) -> [f64; 3] {
        if self.rho == 0.0 {
            return [0.0; 3];
        }
        [
            self.j[0] / self.rho,
            self.j[1] / self.rho,
            self.j[2] / self.rho,
        ]
    }

    /// 由流体场重算平衡分布
    ///
    /// `avg_rho` 是该层级的平均密度（格子单位）。分布存储相对
    /// 平均密度的偏差。
    pub fn populations_from_fields(&mut self, avg_rho: f64) {
        let rho = self.rho;
        let j = self.j;
        let pi = self.pi;
        let trace = pi[0] + pi[2] + pi[5];
        let n = &mut self.populations;

        // 静止子格
        n[0] = (rho - avg_rho) / 3.0 - 0.5 * trace;

        // 速度 1 子格（面方向）
        let rc = (rho - avg_rho) / 18.0;
        n[1] = rc + j[0] / 6.0 + 0.25 * pi[0] - trace / 12.0;
        n[2] = rc - j[0] / 6.0 + 0.25 * pi[0] - trace / 12.0;
        n[3] = rc + j[1] / 6.0 + 0.25 * pi[2] - trace / 12.0;
        n[4] = rc - j[1] / 6.0 + 0.25 * pi[2] - trace / 12.0;
        n[5] = rc + j[2] / 6.0 + 0.25 * pi[5] - trace / 12.0;
        n[6] = rc - j[2] / 6.0 + 0.25 * pi[5] - trace / 12.0;

        // 速度 √2 子格（棱方向）
        let rc = (rho - avg_rho) / 36.0;

        let tmp1 = pi[0] + pi[2];
        let tmp2 = 2.0 * pi[1];
        n[7] = rc + (j[0] + j[1]) / 12.0 + 0.125 * (tmp1 + tmp2) - trace / 24.0;
        n[8] = rc - (j[0] + j[1]) / 12.0 + 0.125 * (tmp1 + tmp2) - trace / 24.0;
        n[9] = rc + (j[0] - j[1]) / 12.0 + 0.125 * (tmp1 - tmp2) - trace / 24.0;
        n[10] = rc - (j[0] - j[1]) / 12.0 + 0.125 * (tmp1 - tmp2) - trace / 24.0;

        let tmp1 = pi[0] + pi[5];
        let tmp2 = 2.0 * pi[3];
        n[11] = rc + (j[0] + j[2]) / 12.0 + 0.125 * (tmp1 + tmp2) - trace / 24.0;
        n[12] = rc - (j[0] + j[2]) / 12.0 + 0.125 * (tmp1 + tmp2) - trace / 24.0;
        n[13] = rc + (j[0] - j[2]) / 12.0 + 0.125 * (tmp1 - tmp2) - trace / 24.0;
        n[14] = rc - (j[0] - j[2]) / 12.0 + 0.125 * (tmp1 - tmp2) - trace / 24.0;

        let tmp1 = pi[2] + pi[5];
        let tmp2 = 2.0 * pi[4];
        n[15] = rc + (j[1] + j[2]) / 12.0 + 0.125 * (tmp1 + tmp2) - trace / 24.0;
        n[16] = rc - (j[1] + j[2]) / 12.0 + 0.125 * (tmp1 + tmp2) - trace / 24.0;
        n[17] = rc + (j[1] - j[2]) / 12.0 + 0.125 * (tmp1 - tmp2) - trace / 24.0;
        n[18] = rc - (j[1] - j[2]) / 12.0 + 0.125 * (tmp1 - tmp2) - trace / 24.0;
    }

    /// 父 → 子插值（可跨多层）
    ///
    /// 每细一层密度与力缩放 1/8，动量与压力清零。
    pub fn interpolate_down(&self, levels: u8, avg_rho: f64) -> Self {
        let scale = (0.125f64).powi(levels as i32);
        let mut child = Self {
            rho: self.rho * scale,
            force: [
                self.force[0] * scale,
                self.force[1] * scale,
                self.force[2] * scale,
            ],
            boundary: self.boundary,
            recalc_fields: 1,
            ..Self::default()
        };
        child.populations_from_fields(avg_rho * scale);
        child
    }

    /// 子 → 父限制：等权累加后重算分布
    pub fn restrict_from(children: &[Self], avg_rho: f64) -> Self {
        let mut parent = Self::default();
        for c in children {
            parent.rho += c.rho;
            for d in 0..3 {
                parent.j[d] += c.j[d];
                parent.force[d] += c.force[d];
            }
            for d in 0..6 {
                parent.pi[d] += c.pi[d];
            }
            parent.boundary |= c.boundary;
        }
        parent.recalc_fields = 1;
        parent.populations_from_fields(avg_rho);
        parent
    }
}
