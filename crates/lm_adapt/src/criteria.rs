// crates/lm_adapt/src/criteria.rs

//! 细化 / 粗化判据
//!
//! 纯函数：输入本地流场（速度取欧氏范数，涡量取最大范数），
//! 先跨 rank 归约全局 min/max，再按归一化阈值逐象限打标。
//! 两个判据都触发时细化优先。

use glam::DVec3;
use tracing::debug;

use lm_comm::{Communicator, ReduceOp};
use lm_config::AdaptConfig;

/// 象限标记
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flag {
    /// 保持
    #[default]
    Keep,
    /// 细化
    Refine,
    /// 粗化
    Coarsen,
}

/// 收集细化 / 粗化标记
///
/// `vel`、`vort` 与本地象限对齐。返回与其等长的标记数组。
pub fn collect_flags(
    comm: &dyn Communicator,
    vel: &[DVec3],
    vort: &[DVec3],
    cfg: &AdaptConfig,
) -> Vec<Flag> {
    assert_eq!(vel.len(), vort.len());

    // 速度欧氏范数的全局界
    let mut v_min = f64::MAX;
    let mut v_max = f64::MIN;
    for v in vel {
        let m = v.length();
        v_min = v_min.min(m);
        v_max = v_max.max(m);
    }
    let v_min = comm.all_reduce_f64(v_min, ReduceOp::Min);
    let v_max = comm.all_reduce_f64(v_max, ReduceOp::Max);

    // 涡量最大范数的全局界
    let mut w_min = f64::MAX;
    let mut w_max = f64::MIN;
    for w in vort {
        for d in 0..3 {
            let m = w[d].abs();
            w_min = w_min.min(m);
            w_max = w_max.max(m);
        }
    }
    let w_min = comm.all_reduce_f64(w_min, ReduceOp::Min);
    let w_max = comm.all_reduce_f64(w_max, ReduceOp::Max);

    let v_span = v_max - v_min;
    let w_span = w_max - w_min;

    let mut flags = Vec::with_capacity(vel.len());
    for (v, w) in vel.iter().zip(vort) {
        let vn = v.length();
        let wn = w.x.abs().max(w.y.abs()).max(w.z.abs());

        let mut flag = Flag::Keep;
        if v_span > 0.0 {
            if vn - v_min >= cfg.vel_refine * v_span {
                flag = Flag::Refine;
            } else if vn - v_min <= cfg.vel_coarsen * v_span {
                flag = Flag::Coarsen;
            }
        }
        if w_span > 0.0 && flag != Flag::Refine {
            if wn - w_min >= cfg.vort_refine * w_span {
                flag = Flag::Refine;
            } else if flag == Flag::Keep && wn - w_min < cfg.vort_coarsen * w_span {
                flag = Flag::Coarsen;
            }
        }
        flags.push(flag);
    }

    let n_refine = flags.iter().filter(|f| **f == Flag::Refine).count();
    let n_coarsen = flags.iter().filter(|f| **f == Flag::Coarsen).count();
    debug!(n_refine, n_coarsen, total = flags.len(), "细化标记收集完成");

    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use lm_comm::SerialComm;

    fn cfg() -> AdaptConfig {
        AdaptConfig::new(0, 4)
    }

    #[test]
    fn test_velocity_spike_marks_refine() {
        let comm = SerialComm::new();
        let mut vel = vec![DVec3::ZERO; 8];
        vel[3] = DVec3::new(1.0, 0.0, 0.0);
        let vort = vec![DVec3::ZERO; 8];
        let flags = collect_flags(&comm, &vel, &vort, &cfg());
        assert_eq!(flags[3], Flag::Refine);
        // 静止象限落在粗化阈值之下
        assert_eq!(flags[0], Flag::Coarsen);
    }

    #[test]
    fn test_uniform_field_keeps_everything() {
        // 全局无跨度时不打任何标
        let comm = SerialComm::new();
        let vel = vec![DVec3::splat(0.5); 4];
        let vort = vec![DVec3::ZERO; 4];
        let flags = collect_flags(&comm, &vel, &vort, &cfg());
        assert!(flags.iter().all(|f| *f == Flag::Keep));
    }

    #[test]
    fn test_vorticity_refine_wins_over_velocity_coarsen() {
        let comm = SerialComm::new();
        let mut vel = vec![DVec3::ZERO; 4];
        vel[1] = DVec3::new(1.0, 0.0, 0.0); // 形成速度跨度
        let mut vort = vec![DVec3::ZERO; 4];
        vort[0] = DVec3::new(0.0, 0.0, 2.0); // 静止但高涡量
        let flags = collect_flags(&comm, &vel, &vort, &cfg());
        assert_eq!(flags[0], Flag::Refine);
    }
}
