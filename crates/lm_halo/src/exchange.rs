// crates/lm_halo/src/exchange.rs

//! 异步粒子迁移
//!
//! 每隔若干积分步调用：把越出本子域的粒子运到新 owner。
//!
//! 协议（每个邻居一条通道，tag 由位移决定）：
//!
//! 1. 发送粒子数；
//! 2. 数量非零时发送本体数组（原始字节）；
//! 3. 动态尾部非空时发送串接的 `i32` 流。
//!
//! 同一 `(源, tag)` 通道上的三段消息按序交付，接收端据此依次
//! 接收。收到的粒子折回本地坐标后插入；仍越界的粒子触发下一轮
//! （`Allreduce MAX` 同步），`NEIGHBOR` 模式下一轮未收敛即致命。

use bytemuck::{Pod, Zeroable};
use glam::DVec3;
use tracing::{debug, trace};

use lm_cells::particle::{Particle, ParticleBody, ParticleId, FLAG_GHOST};
use lm_cells::{CellStore, LinkedCells};
use lm_comm::tag::{displacement_tag, neighbor_index, NEIGHBOR_DISPS};
use lm_comm::{Communicator, ReduceOp};
use lm_foundation::tolerance::bin_between;
use lm_foundation::{CellIndex, LmError, LmResult, ROUND_ERROR_PREC};
use lm_grid::{LocalBox, NodeGrid, SimBox};

/// 迁移触发模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeMode {
    /// 仅与直接邻居交换；一轮后仍有越界粒子是致命错误
    Neighbor,
    /// 全局交换；迭代至收敛（至多进程网格直径轮）
    Global,
}

/// 迁移消息中的单粒子记录：本体 + 动态尾部长度
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct ParticleMsg {
    body: ParticleBody,
    n_bonds: u32,
    n_excl: u32,
}

/// 异步粒子迁移器
pub struct Exchanger<'a> {
    sim: &'a SimBox,
    grid: &'a NodeGrid,
    local: &'a LocalBox,
    lc: &'a LinkedCells,
}

impl<'a> Exchanger<'a> {
    /// 绑定几何上下文
    pub fn new(
        sim: &'a SimBox,
        grid: &'a NodeGrid,
        local: &'a LocalBox,
        lc: &'a LinkedCells,
    ) -> Self {
        Self {
            sim,
            grid,
            local,
            lc,
        }
    }

    /// 迁移越界粒子并重排本地单元
    ///
    /// 收敛后清除 [`CellStore`] 的重排请求。
    pub fn exchange_and_sort(
        &self,
        comm: &dyn Communicator,
        store: &mut CellStore,
        mode: ExchangeMode,
    ) -> LmResult<()> {
        let ranks = self.grid.neighbor_ranks();
        let mut pass = 0usize;

        loop {
            let (sendbuf, senddyn) = self.fill_send_buffers(store);

            for i in 0..NEIGHBOR_DISPS.len() {
                let tag = displacement_tag(false, NEIGHBOR_DISPS[i]);
                let count = sendbuf[i].len() as u32;
                comm.send_bytes(ranks[i], tag, &count.to_le_bytes())?;
                if count > 0 {
                    comm.send_bytes(ranks[i], tag, bytemuck::cast_slice(&sendbuf[i]))?;
                    if !senddyn[i].is_empty() {
                        comm.send_bytes(ranks[i], tag, bytemuck::cast_slice(&senddyn[i]))?;
                    }
                }
                trace!(neighbor = ranks[i], tag, count, "迁移发送");
            }

            // 本地重排只在第一轮：此时剩余粒子都确定属于本子域
            if pass == 0 {
                self.resort_local(comm.rank(), store)?;
            }

            let mut oob_local = false;
            for i in 0..NEIGHBOR_DISPS.len() {
                oob_local |= self.receive_from(comm, ranks[i], NEIGHBOR_DISPS[i], store)?;
            }

            if mode == ExchangeMode::Neighbor && oob_local {
                return Err(LmError::convergence(
                    comm.rank(),
                    "NEIGHBOR 交换模式收到仍越界的粒子",
                ));
            }

            let oob_global = comm.all_reduce_i64(oob_local as i64, ReduceOp::Max) != 0;
            if !oob_global {
                break;
            }
            pass += 1;
            debug!(pass, "存在越界粒子, 追加一轮交换");
        }

        store.clear_resort();
        Ok(())
    }

    // ========================================================
    // 发送侧
    // ========================================================

    /// 把越出子域的粒子从单元中抽出并装入发送缓冲
    #[allow(clippy::type_complexity)]
    fn fill_send_buffers(
        &self,
        store: &mut CellStore,
    ) -> (Vec<Vec<ParticleMsg>>, Vec<Vec<i32>>) {
        let n = NEIGHBOR_DISPS.len();
        let mut sendbuf: Vec<Vec<ParticleMsg>> = vec![Vec::new(); n];
        let mut senddyn: Vec<Vec<i32>> = vec![Vec::new(); n];

        let errmargin = [
            0.5 * ROUND_ERROR_PREC * self.sim.box_l.x,
            0.5 * ROUND_ERROR_PREC * self.sim.box_l.y,
            0.5 * ROUND_ERROR_PREC * self.sim.box_l.z,
        ];

        for c in 0..store.n_local_cells() {
            let ci = CellIndex::from_usize(c);
            let mut slot = 0;
            while slot < store.cell(ci).len() {
                let pos = store.cell(ci).get(slot).unwrap().position();
                let mut disp = [0i32; 3];
                for d in 0..3 {
                    disp[d] = bin_between(
                        pos[d],
                        self.local.my_left[d],
                        self.local.my_right[d],
                        errmargin[d],
                    );
                }
                if disp == [0; 3] {
                    slot += 1;
                    continue;
                }

                let p = store.extract_from(ci, slot);
                let li = neighbor_index(disp);
                p.append_dyn_to(&mut senddyn[li]);
                sendbuf[li].push(ParticleMsg {
                    body: p.body,
                    n_bonds: p.bonds.len() as u32,
                    n_excl: p.exclusions.len() as u32,
                });
            }
        }
        (sendbuf, senddyn)
    }

    /// 重排本地粒子：位置不再匹配所在单元的搬到正确单元
    ///
    /// 只能在所有剩余粒子确属本子域时调用。映射失败说明单元
    /// 指派不一致，按致命错误上报。
    fn resort_local(&self, rank: usize, store: &mut CellStore) -> LmResult<()> {
        for c in 0..store.n_local_cells() {
            let ci = CellIndex::from_usize(c);
            let mut slot = 0;
            while slot < store.cell(ci).len() {
                let pos = store.cell(ci).get(slot).unwrap().position();
                let target = self.lc.save_position_to_cell(pos).ok_or_else(|| {
                    LmError::inconsistency(format!(
                        "[rank {}] 粒子位于 ({:.6}, {:.6}, {:.6}), 不在本子域内",
                        rank, pos.x, pos.y, pos.z
                    ))
                })?;
                if target != ci {
                    let p = store.extract_from(ci, slot);
                    store.insert_into(target, p);
                } else {
                    slot += 1;
                }
            }
        }
        Ok(())
    }

    // ========================================================
    // 接收侧
    // ========================================================

    /// 接收一个邻居的迁移消息并插入粒子
    ///
    /// 返回是否有粒子在折叠后仍越界。
    fn receive_from(
        &self,
        comm: &dyn Communicator,
        from: usize,
        disp: [i32; 3],
        store: &mut CellStore,
    ) -> LmResult<bool> {
        let tag = displacement_tag(true, disp);
        let count_bytes = comm.recv_bytes(from, tag)?;
        let count = u32::from_le_bytes(
            count_bytes
                .get(..4)
                .ok_or_else(|| LmError::inconsistency("迁移计数消息不足 4 字节"))?
                .try_into()
                .unwrap(),
        ) as usize;
        if count == 0 {
            return Ok(false);
        }

        let body_bytes = comm.recv_bytes(from, tag)?;
        let msgs: Vec<ParticleMsg> = bytemuck::pod_collect_to_vec(&body_bytes);
        LmError::check_size("迁移本体", count, msgs.len())?;

        let total_dyn: usize = msgs.iter().map(|m| (m.n_bonds + m.n_excl) as usize).sum();

        let mut oob = false;
        let mut inserted: Vec<ParticleId> = Vec::with_capacity(count);
        for m in &msgs {
            let mut p = Particle {
                body: m.body,
                ..Default::default()
            };
            p.body.flags &= !FLAG_GHOST;

            let mut pos = p.position();
            let mut image = p.body.image_count();
            self.sim.fold_position(&mut pos, &mut image);
            p.body.set_position(pos);
            p.body.set_image_count(image);

            let (cell, still_oob) = self.lc.position_to_cell_oob(pos);
            oob |= still_oob;
            inserted.push(p.id());
            store.insert_into(cell, p);
        }

        if total_dyn > 0 {
            let dyn_bytes = comm.recv_bytes(from, tag)?;
            let stream: Vec<i32> = bytemuck::pod_collect_to_vec(&dyn_bytes);
            LmError::check_size("迁移动态尾部", total_dyn, stream.len())?;
            let mut at = 0usize;
            for (m, id) in msgs.iter().zip(&inserted) {
                let p = store.particle_mut(*id).ok_or_else(|| {
                    LmError::inconsistency(format!("刚插入的粒子 {} 不在索引中", id))
                })?;
                p.take_dyn_from(&stream, &mut at, m.n_bonds as usize, m.n_excl as usize);
            }
        }

        Ok(oob)
    }
}

// ============================================================
// 测试
// ============================================================
