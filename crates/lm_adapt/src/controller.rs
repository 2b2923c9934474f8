// crates/lm_adapt/src/controller.rs

//! 网格变更控制器
//!
//! 一次网格变更的完整流程：
//!
//! 1. 以标记数组驱动复制森林的细化与粗化（标记以旧槽位索引，
//!    经变形后通过来源映射存活）；
//! 2. 2:1 平衡；
//! 3. 在旧 / 新森林的 Morton 对齐遍历中按三种情形映射本地负载
//!    （同层拷贝 / 父→子插值 / 子→父限制）；
//! 4. 重分配新森林；
//! 5. 负载按新旧所有权区间成对搬运并按 Morton 序重插入；
//! 6. 重建幽灵 / 网格 / 虚拟视图。

use tracing::{debug, info};

use lm_comm::Communicator;
use lm_config::AdaptConfig;
use lm_foundation::{LmError, LmResult};
use lm_octree::{partition_given, Forest, ForestInfo, GhostLayer, MeshView, Quadrant, VirtualView};

use crate::criteria::Flag;
use crate::payload::LbPayload;

/// 网格变更后的视图集合
pub struct AdaptOutcome {
    /// 新森林信息
    pub info: ForestInfo,
    /// 幽灵层
    pub ghost: GhostLayer,
    /// 网格视图
    pub mesh: MeshView,
    /// 虚拟子象限视图
    pub virtuals: VirtualView,
}

/// 自适应网格控制器
#[derive(Debug, Clone)]
pub struct AdaptController {
    /// 阈值与层级配置
    pub cfg: AdaptConfig,
    /// 平均密度（格子单位，插值 / 限制的参考）
    pub avg_rho: f64,
}

impl AdaptController {
    /// 创建控制器
    pub fn new(cfg: AdaptConfig, avg_rho: f64) -> Self {
        Self { cfg, avg_rho }
    }

    /// 执行一次网格变更
    ///
    /// `flags` 与 `payload` 按旧本地象限对齐；完成后 `forest` 与
    /// `payload` 替换为新网格内容。
    pub fn adapt_grid(
        &self,
        comm: &dyn Communicator,
        forest: &mut Forest,
        payload: &mut Vec<LbPayload>,
        flags: &[Flag],
    ) -> LmResult<AdaptOutcome> {
        LmError::check_size("标记数组", forest.n_local(), flags.len())?;
        LmError::check_size("负载数组", forest.n_local(), payload.len())?;

        // 1. 复制森林, 细化→粗化; 来源槽位在两次扫描间传播
        let mut new_forest = self.apply_flags(forest, payload, flags);

        // 2. 平衡
        new_forest.balance_2_to_1(comm)?;

        // 3. 本地负载映射（Morton 对齐三情形遍历）
        let mut mapped = map_payloads(forest, payload, &new_forest, self.avg_rho)?;

        // 4. 重分配：按叶子数均匀
        let info_before = ForestInfo::gather(&new_forest, comm)?;
        let size = info_before.size;
        let total = info_before.n_global;
        let counts: Vec<i64> = (0..size)
            .map(|r| total * (r as i64 + 1) / size as i64 - total * r as i64 / size as i64)
            .collect();

        // 5. 负载随象限搬运
        let shipped = partition_given(&mut new_forest, &info_before, comm, &counts, &mut mapped)?;

        // 6. 重建视图
        let info = ForestInfo::gather(&new_forest, comm)?;
        let ghost = GhostLayer::build(&new_forest, &info, comm)?;
        let mesh = MeshView::build(&new_forest, &ghost, true);
        let virtuals = VirtualView::build(&new_forest, &mesh);

        info!(
            old = forest.n_local(),
            new = new_forest.n_local(),
            shipped,
            "网格变更完成"
        );

        *forest = new_forest;
        *payload = mapped;
        Ok(AdaptOutcome {
            info,
            ghost,
            mesh,
            virtuals,
        })
    }

    /// 细化与粗化扫描，返回新森林与每叶来源（旧槽位）
    ///
    /// 细化产生的子叶无来源；粗化要求 8 个兄弟全部标记粗化、
    /// 无边界象限且高于基础层级。
    fn apply_flags(&self, forest: &Forest, payload: &[LbPayload], flags: &[Flag]) -> Forest {
        // 细化
        let mut refined = forest.clone();
        let mut origin: Vec<Option<usize>> = Vec::with_capacity(forest.n_local());
        {
            let mut leaves = Vec::with_capacity(forest.n_local());
            for (slot, leaf) in forest.leaves.iter().enumerate() {
                if flags[slot] == Flag::Refine && leaf.level < self.cfg.max_level {
                    for c in 0..8 {
                        leaves.push(leaf.child(c));
                        origin.push(None);
                    }
                } else {
                    leaves.push(*leaf);
                    origin.push(Some(slot));
                }
            }
            refined.leaves = leaves;
        }

        // 粗化
        let mut coarsened = refined.clone();
        {
            let mut leaves = Vec::new();
            let mut i = 0;
            while i < refined.leaves.len() {
                let family = &refined.leaves[i..(i + 8).min(refined.leaves.len())];
                let mergeable = family.len() == 8
                    && family[0].level > self.cfg.base_level
                    && Quadrant::is_family(family)
                    && (i..i + 8).all(|k| {
                        origin[k]
                            .map(|old| {
                                flags[old] == Flag::Coarsen && !payload[old].is_boundary()
                            })
                            .unwrap_or(false)
                    });
                if mergeable {
                    leaves.push(family[0].parent());
                    i += 8;
                } else {
                    leaves.push(refined.leaves[i]);
                    i += 1;
                }
            }
            coarsened.leaves = leaves;
        }

        debug!(
            refined = refined.n_local(),
            coarsened = coarsened.n_local(),
            "标记应用完成"
        );
        coarsened
    }
}

/// 本地负载映射：旧 / 新森林的 Morton 对齐遍历
///
/// 同层拷贝；新叶更细时全部落在旧叶范围内，逐叶按层差插值；
/// 新叶更粗时等权累加范围内全部旧叶。
pub fn map_payloads(
    old: &Forest,
    old_payload: &[LbPayload],
    new: &Forest,
    avg_rho: f64,
) -> LmResult<Vec<LbPayload>> {
    let mut mapped = Vec::with_capacity(new.n_local());
    let mut i = 0usize;
    let mut j = 0usize;

    while i < old.n_local() && j < new.n_local() {
        let lo = &old.leaves[i];
        let ln = &new.leaves[j];

        if lo.level == ln.level {
            mapped.push(old_payload[i]);
            i += 1;
            j += 1;
        } else if ln.level > lo.level {
            // 旧叶被细化：消费旧叶范围内全部新叶
            let end = lo.fkey_end();
            while j < new.n_local() && new.leaves[j].fkey() < end {
                let d = new.leaves[j].level - lo.level;
                mapped.push(old_payload[i].interpolate_down(d, avg_rho));
                j += 1;
            }
            i += 1;
        } else {
            // 旧叶被粗化：等权累加新叶范围内全部旧叶
            let end = ln.fkey_end();
            let begin = i;
            while i < old.n_local() && old.leaves[i].fkey() < end {
                i += 1;
            }
            mapped.push(LbPayload::restrict_from(&old_payload[begin..i], avg_rho));
            j += 1;
        }
    }

    if i != old.n_local() || j != new.n_local() {
        return Err(LmError::inconsistency(format!(
            "负载映射未对齐: 旧 {}/{}, 新 {}/{}",
            i,
            old.n_local(),
            j,
            new.n_local()
        )));
    }
    Ok(mapped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::IVec3;
    use lm_comm::SerialComm;

    fn payloads(n: usize, rho: f64) -> Vec<LbPayload> {
        (0..n)
            .map(|_| {
                let mut p = LbPayload {
                    rho,
                    ..Default::default()
                };
                p.populations_from_fields(rho);
                p
            })
            .collect()
    }

    #[test]
    fn test_refine_then_coarsen_restores_count() {
        // 速度尖峰触发局部细化, 回零后粗化还原
        let comm = SerialComm::new();
        let cfg = AdaptConfig::new(2, 3);
        let ctl = AdaptController::new(cfg, 1.0);

        let mut forest = Forest::new_uniform(IVec3::ONE, 2, 0, 1);
        let n0 = forest.n_local();
        let mut payload = payloads(n0, 1.0);

        // 细化槽位 0
        let mut flags = vec![Flag::Keep; n0];
        flags[0] = Flag::Refine;
        ctl.adapt_grid(&comm, &mut forest, &mut payload, &flags)
            .unwrap();
        assert_eq!(forest.n_local(), n0 + 7);
        assert_eq!(payload.len(), forest.n_local());

        // 密度守恒：插值后总密度不变
        let total: f64 = payload.iter().map(|p| p.rho).sum();
        assert!((total - n0 as f64).abs() < 1e-9);

        // 全部标记粗化, 退回均匀网格
        let flags = vec![Flag::Coarsen; forest.n_local()];
        ctl.adapt_grid(&comm, &mut forest, &mut payload, &flags)
            .unwrap();
        assert_eq!(forest.n_local(), n0);
        let total: f64 = payload.iter().map(|p| p.rho).sum();
        assert!((total - n0 as f64).abs() < 1e-9);
    }

    #[test]
    fn test_boundary_quadrant_never_coarsens() {
        let comm = SerialComm::new();
        let cfg = AdaptConfig::new(0, 3);
        let ctl = AdaptController::new(cfg, 1.0);

        let mut forest = Forest::new_uniform(IVec3::ONE, 1, 0, 1);
        let n0 = forest.n_local();
        let mut payload = payloads(n0, 1.0);
        payload[0].boundary = 1;

        let flags = vec![Flag::Coarsen; n0];
        ctl.adapt_grid(&comm, &mut forest, &mut payload, &flags)
            .unwrap();
        // 首个家族含边界象限, 不得合并
        assert_eq!(forest.n_local(), n0);
    }

    #[test]
    fn test_base_level_floor() {
        let comm = SerialComm::new();
        let cfg = AdaptConfig::new(1, 3);
        let ctl = AdaptController::new(cfg, 1.0);

        let mut forest = Forest::new_uniform(IVec3::ONE, 1, 0, 1);
        let n0 = forest.n_local();
        let mut payload = payloads(n0, 1.0);
        let flags = vec![Flag::Coarsen; n0];
        ctl.adapt_grid(&comm, &mut forest, &mut payload, &flags)
            .unwrap();
        // base_level = 1 禁止粗化到 0 层
        assert_eq!(forest.n_local(), n0);
    }
}
