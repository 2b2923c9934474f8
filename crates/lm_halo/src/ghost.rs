// crates/lm_halo/src/ghost.rs

//! 幽灵单元通信
//!
//! 通信器是一份脚本化的轮次序列：每个轮次指定方向（发 / 收）、
//! 对端 rank、参与单元子块、以及可选的周期移位。正规网格的计划
//! 对 26 个位移各生成一对发送 / 接收轮次；tag 由位移唯一决定，
//! 发送方与匹配接收方无需握手即一致。
//!
//! 执行分两遍：先完成全部发送轮次（缓冲发送），再按列出顺序
//! 处理接收轮次，保证同一次执行内轮次按列出顺序完成。对端为
//! 自身的轮次不产生任何消息，改为缓冲指针交接。

use glam::DVec3;
use tracing::trace;

use lm_cells::particle::{Particle, FLAG_GHOST};
use lm_cells::{CellStore, LinkedCells};
use lm_comm::tag::{displacement_tag, NEIGHBOR_DISPS};
use lm_comm::Communicator;
use lm_foundation::{CellIndex, LmError, LmResult};
use lm_grid::{NodeGrid, SimBox};

use crate::wire::{Reader, Writer};

// ============================================================
// 传输掩码
// ============================================================

/// 粒子字段传输掩码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferMask(u32);

impl TransferMask {
    /// 每单元粒子数
    pub const PART_COUNT: Self = Self(1 << 0);
    /// 静态属性（id、类型、电荷、质量、标志）
    pub const PROPS: Self = Self(1 << 1);
    /// 位置与镜像计数
    pub const POSITION: Self = Self(1 << 2);
    /// 位置按周期移位后发送
    pub const POSITION_SHIFTED: Self = Self(1 << 3);
    /// 力（解包时累加）
    pub const FORCE: Self = Self(1 << 4);
    /// LB 耦合所需的速度
    pub const LB_COUPLING: Self = Self(1 << 5);
    /// 游动状态
    pub const SWIMMING: Self = Self(1 << 6);

    /// 是否包含 `other` 的全部位
    #[inline]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for TransferMask {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

// ============================================================
// 轮次与通信器
// ============================================================

/// 轮次方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundKind {
    /// 打包并发送
    Send,
    /// 接收并解包
    Recv,
    /// 广播：`node` 打包发给所有其他 rank，其余接收解包
    Bcst,
    /// 归约：所有其他 rank 打包发给 `node`，`node` 逐一累加解包
    Rdce,
}

/// 单个通信轮次
#[derive(Debug, Clone)]
pub struct GhostRound {
    /// 方向
    pub kind: RoundKind,
    /// 对端 rank
    pub node: usize,
    /// 消息 tag
    pub tag: i32,
    /// 参与单元（存储索引，顺序即打包顺序）
    pub cells: Vec<CellIndex>,
    /// 发送侧位置移位（仅 POSITION_SHIFTED 传输使用）
    pub shift: DVec3,
}

/// 幽灵通信器
#[derive(Debug, Clone)]
pub struct GhostCommunicator {
    /// 传输掩码
    pub mask: TransferMask,
    /// 轮次序列
    pub rounds: Vec<GhostRound>,
    /// 解包是否累加（收力通信）
    accumulate: bool,
}

impl GhostCommunicator {
    /// 为正规网格构造通信计划
    ///
    /// 对每个位移 `d ∈ {-1,0,1}³ \ {0}`：发送轮次覆盖 `d` 方向的
    /// 内部子板，接收轮次覆盖对侧幽灵子板。发送侧在跨越周期面
    /// 的方向记下 `-d·box_l` 的位置移位。
    pub fn plan_regular(
        mask: TransferMask,
        sim: &SimBox,
        grid: &NodeGrid,
        lc: &LinkedCells,
    ) -> Self {
        let mut rounds = Vec::with_capacity(2 * NEIGHBOR_DISPS.len());

        for disp in NEIGHBOR_DISPS {
            let node = grid.neighbor_rank(disp);
            for recv in [false, true] {
                let cells = comm_cell_block(lc, disp, recv);
                let mut shift = DVec3::ZERO;
                if !recv && mask.contains(TransferMask::POSITION_SHIFTED) {
                    for d in 0..3 {
                        if sim.periodic[d] && grid.crosses_boundary(disp, d) {
                            shift[d] = -disp[d] as f64 * sim.box_l[d];
                        }
                    }
                }
                rounds.push(GhostRound {
                    kind: if recv { RoundKind::Recv } else { RoundKind::Send },
                    node,
                    tag: displacement_tag(recv, disp),
                    cells,
                    shift,
                });
            }
        }

        Self {
            mask,
            rounds,
            accumulate: false,
        }
    }

    /// 把通信器翻转为收集方向（幽灵 → 所有者）
    ///
    /// 交换每个轮次的收发方向；解包改为累加。收力通信器由
    /// 普通计划翻转而来。
    pub fn reverted(mut self) -> Self {
        for round in &mut self.rounds {
            round.kind = match round.kind {
                RoundKind::Send => RoundKind::Recv,
                RoundKind::Recv => RoundKind::Send,
                other => other,
            };
        }
        self.accumulate = true;
        self
    }

    /// 盒长变化后重设移位
    ///
    /// 只按符号重乘新盒长，无需重算进程位移。
    pub fn rescale_shift(&mut self, box_l: DVec3) {
        for round in &mut self.rounds {
            for d in 0..3 {
                round.shift[d] = lm_foundation::tolerance::sign(round.shift[d]) * box_l[d];
            }
        }
    }

    /// 执行一次通信
    ///
    /// 第一遍缓冲发出全部发送轮次（对端为自身时按 tag 暂存，
    /// 不产生消息），第二遍按列出顺序完成接收轮次。接收轮次的
    /// tag 与其配对发送轮次一致，自通信因此天然对上正确缓冲。
    pub fn run(&self, comm: &dyn Communicator, store: &mut CellStore) -> LmResult<()> {
        let me = comm.rank();
        let mut self_stash: std::collections::HashMap<i32, std::collections::VecDeque<Vec<u8>>> =
            Default::default();

        for round in &self.rounds {
            match round.kind {
                RoundKind::Send => {
                    let bytes = self.pack(store, round);
                    if round.node == me {
                        self_stash.entry(round.tag).or_default().push_back(bytes);
                    } else {
                        trace!(node = round.node, tag = round.tag, n = bytes.len(), "幽灵发送");
                        comm.send_bytes(round.node, round.tag, &bytes)?;
                    }
                }
                // 广播源 / 归约贡献方在发送阶段发出
                RoundKind::Bcst if round.node == me => {
                    let bytes = self.pack(store, round);
                    for r in 0..comm.size() {
                        if r != me {
                            comm.send_bytes(r, round.tag, &bytes)?;
                        }
                    }
                }
                RoundKind::Rdce if round.node != me => {
                    let bytes = self.pack(store, round);
                    comm.send_bytes(round.node, round.tag, &bytes)?;
                }
                _ => {}
            }
        }

        for round in &self.rounds {
            match round.kind {
                RoundKind::Recv => {
                    let bytes = if round.node == me {
                        self_stash
                            .get_mut(&round.tag)
                            .and_then(std::collections::VecDeque::pop_front)
                            .ok_or_else(|| LmError::internal("自通信轮次缺少配对的发送缓冲"))?
                    } else {
                        comm.recv_bytes(round.node, round.tag)?
                    };
                    self.unpack(store, round, &bytes)?;
                }
                RoundKind::Bcst if round.node != me => {
                    let bytes = comm.recv_bytes(round.node, round.tag)?;
                    self.unpack(store, round, &bytes)?;
                }
                RoundKind::Rdce if round.node == me => {
                    for r in 0..comm.size() {
                        if r != me {
                            let bytes = comm.recv_bytes(r, round.tag)?;
                            self.unpack(store, round, &bytes)?;
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    // ========================================================
    // 打包 / 解包
    // ========================================================

    fn pack(&self, store: &CellStore, round: &GhostRound) -> Vec<u8> {
        let mut w = Writer::new();
        for &ci in &round.cells {
            let cell = store.cell(ci);
            if self.mask.contains(TransferMask::PART_COUNT) {
                w.put_u32(cell.len() as u32);
            }
            for p in cell.iter() {
                self.pack_particle(&mut w, p, round.shift);
            }
        }
        w.into_bytes()
    }

    fn pack_particle(&self, w: &mut Writer, p: &Particle, shift: DVec3) {
        let b = &p.body;
        if self.mask.contains(TransferMask::PROPS) {
            w.put_i32(b.id);
            w.put_i32(b.type_id);
            w.put_f64(b.charge);
            w.put_f64(b.mass);
            w.put_u32(b.flags);
        }
        if self.mask.contains(TransferMask::POSITION) {
            let pos = if self.mask.contains(TransferMask::POSITION_SHIFTED) {
                b.position() + shift
            } else {
                b.position()
            };
            w.put_f64s(&pos.to_array());
            w.put_i32s(&b.image);
        }
        if self.mask.contains(TransferMask::FORCE) {
            w.put_f64s(&b.force);
        }
        if self.mask.contains(TransferMask::LB_COUPLING) {
            w.put_f64s(&b.vel);
        }
        if self.mask.contains(TransferMask::SWIMMING) {
            w.put_f64s(&b.swim);
        }
    }

    fn unpack(&self, store: &mut CellStore, round: &GhostRound, bytes: &[u8]) -> LmResult<()> {
        // 归约轮次无条件累加
        let accumulate = self.accumulate || round.kind == RoundKind::Rdce;
        let mut r = Reader::new(bytes);
        for &ci in &round.cells {
            if self.mask.contains(TransferMask::PART_COUNT) {
                let count = r.get_u32()? as usize;
                let cell = store.cell_mut(ci);
                cell.drain_all();
                for _ in 0..count {
                    let mut ghost = Particle::default();
                    ghost.body.flags |= FLAG_GHOST;
                    cell.push(ghost);
                }
            }
            let n = store.cell(ci).len();
            for slot in 0..n {
                self.unpack_particle(&mut r, store, ci, slot, accumulate)?;
            }
        }
        if r.remaining() != 0 {
            return Err(LmError::inconsistency(format!(
                "幽灵消息多出 {} 字节: 单元数或粒子数不匹配",
                r.remaining()
            )));
        }
        Ok(())
    }

    fn unpack_particle(
        &self,
        r: &mut Reader<'_>,
        store: &mut CellStore,
        ci: CellIndex,
        slot: usize,
        accumulate: bool,
    ) -> LmResult<()> {
        // 先读后写，避免借用交错
        let mask = self.mask;

        let props = if mask.contains(TransferMask::PROPS) {
            Some((r.get_i32()?, r.get_i32()?, r.get_f64()?, r.get_f64()?, r.get_u32()?))
        } else {
            None
        };
        let position = if mask.contains(TransferMask::POSITION) {
            Some((r.get_f64_array::<3>()?, r.get_i32_vec(3)?))
        } else {
            None
        };
        let force = if mask.contains(TransferMask::FORCE) {
            Some(r.get_f64_array::<3>()?)
        } else {
            None
        };
        let coupling = if mask.contains(TransferMask::LB_COUPLING) {
            Some(r.get_f64_array::<3>()?)
        } else {
            None
        };
        let swim = if mask.contains(TransferMask::SWIMMING) {
            Some(r.get_f64_array::<2>()?)
        } else {
            None
        };

        let p = store
            .cell_mut(ci)
            .get_mut(slot)
            .ok_or_else(|| LmError::inconsistency("幽灵单元槽位缺失"))?;
        if let Some((id, type_id, charge, mass, flags)) = props {
            p.body.id = id;
            p.body.type_id = type_id;
            p.body.charge = charge;
            p.body.mass = mass;
            p.body.flags = flags | FLAG_GHOST;
        }
        if let Some((pos, image)) = position {
            p.body.pos = pos;
            p.body.image = [image[0], image[1], image[2]];
        }
        if let Some(f) = force {
            if accumulate {
                for d in 0..3 {
                    p.body.force[d] += f[d];
                }
            } else {
                p.body.force = f;
            }
        }
        if let Some(v) = coupling {
            p.body.vel = v;
        }
        if let Some(s) = swim {
            p.body.swim = s;
        }
        Ok(())
    }
}

// ============================================================
// 子块选择
// ============================================================

/// 位移 `disp` 对应的通信单元子块
///
/// 发送子块取内部网格贴近 `disp` 面的 `thickness` 层；接收子块
/// 取对应幽灵层。位移为零的轴覆盖整个内部范围。
fn comm_cell_block(lc: &LinkedCells, disp: [i32; 3], recv: bool) -> Vec<CellIndex> {
    let t = lc.ghost_thickness;
    let cg = lc.cell_grid;
    let mut lo = [0i32; 3];
    let mut hi = [0i32; 3];

    for d in 0..3 {
        (lo[d], hi[d]) = match (recv, disp[d].signum()) {
            // 发送：贴边内部层
            (false, -1) => (t[d], 2 * t[d] - 1),
            (false, 0) => (t[d], t[d] + cg[d] - 1),
            (false, _) => (cg[d], t[d] + cg[d] - 1),
            // 接收：幽灵层
            (true, -1) => (0, t[d] - 1),
            (true, 0) => (t[d], t[d] + cg[d] - 1),
            (true, _) => (t[d] + cg[d], t[d] + cg[d] + t[d] - 1),
        };
    }

    let mut cells = Vec::new();
    for z in lo[2]..=hi[2] {
        for y in lo[1]..=hi[1] {
            for x in lo[0]..=hi[0] {
                cells.push(lc.store_index(glam::IVec3::new(x, y, z)));
            }
        }
    }
    cells
}
