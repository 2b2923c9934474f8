// crates/lm_fft/src/fft3d.rs

//! 分布式三维 FFT 执行器
//!
//! 前向：D0 实数块 → D1 行分解（复数化）→ 一维 FFT → D2 →
//! FFT → D3 → FFT。逆向以逆 FFT 与对调的收发块镜像前向，末趟
//! 丢弃（应为数值零的）虚部。
//!
//! 自通信（伙伴为本 rank）交换收发缓冲指针，不产生任何消息；
//! 单 rank 运行因此不发出任何发送。

use std::sync::Arc;

use num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use tracing::debug;

use lm_comm::tag::{REQ_FFT_BACK, REQ_FFT_FORW};
use lm_comm::Communicator;
use lm_config::FftConfig;
use lm_foundation::{LmError, LmResult};

use crate::pack::{pack, unpack_block, PackKind};
use crate::plan::{
    calc_2d_grid, calc_local_mesh, calc_send_block, find_comm_groups, map_3d_to_2d_grid, permute3,
    StagePlan,
};

/// 分布式三维 FFT 上下文
///
/// 收发缓冲与工作数组按运行最大值一次分配，进程内各 FFT 调用
/// 共享本上下文，不并发使用。
pub struct Fft3d {
    rank: usize,
    /// 阶段 1–3 计划
    pub stages: [StagePlan; 3],
    /// 实空间本地网格（含电荷指派边距）
    pub ca_mesh: [usize; 3],

    ffts_forw: [Arc<dyn Fft<f64>>; 3],
    ffts_back: [Arc<dyn Fft<f64>>; 3],
    scratch: Vec<Complex64>,

    send_f: Vec<f64>,
    recv_f: Vec<f64>,
    send_c: Vec<Complex64>,
    recv_c: Vec<Complex64>,
    data_c: Vec<Complex64>,
    buf_c: Vec<Complex64>,
    rbuf: Vec<f64>,
}

impl Fft3d {
    /// 构建四阶段计划并分配缓冲
    ///
    /// `node_grid`/`node_pos` 是实空间块分解（与粒子网格一致），
    /// `ca_mesh_dim`/`ca_mesh_margin` 描述调用方实数组的布局
    /// （本地网格外可带边距）。
    pub fn new(
        comm: &dyn Communicator,
        node_grid: [i32; 3],
        node_pos: [i32; 3],
        cfg: &FftConfig,
        ca_mesh_dim: [usize; 3],
        ca_mesh_margin: [usize; 6],
    ) -> LmResult<Self> {
        let me = comm.rank();
        let n_nodes = comm.size();
        let mesh = cfg.mesh;
        let off = cfg.mesh_off;

        // 四套节点网格
        let mut n_grid = [[0i32; 3]; 4];
        n_grid[0] = node_grid;
        let g2d = calc_2d_grid(n_nodes);
        let (mapped, row_dir) = map_3d_to_2d_grid(n_grid[0], g2d);
        n_grid[1] = mapped;
        for i in 0..3 {
            n_grid[2][i] = n_grid[1][(i + 1) % 3];
            n_grid[3][i] = n_grid[1][(i + 2) % 3];
        }
        let row_dirs = [
            row_dir,
            (row_dir + 2) % 3, // row_dir - 1
            (row_dir + 1) % 3, // row_dir - 2
        ];
        let n_permute = [0usize, (row_dir + 1) % 3, (row_dir + 2) % 3, row_dir % 3];

        // 逐阶段通信组与块
        let mut n_id: Vec<Vec<usize>> = vec![(0..n_nodes).collect()];
        let mut n_pos: Vec<Vec<[i32; 3]>> = vec![(0..n_nodes)
            .map(|n| {
                let n = n as i32;
                [
                    n % n_grid[0][0],
                    (n / n_grid[0][0]) % n_grid[0][1],
                    n / (n_grid[0][0] * n_grid[0][1]),
                ]
            })
            .collect()];
        let mut my_pos = vec![node_pos];

        let mut stages: Vec<StagePlan> = Vec::with_capacity(3);
        let mut max_comm = 0usize;
        let mut old_mesh = ca_mesh_dim;

        for i in 1..4 {
            let (group, id2, pos2, mp2) =
                find_comm_groups(n_grid[i - 1], n_grid[i], &n_id[i - 1], me)?;
            n_id.push(id2);
            n_pos.push(pos2);
            my_pos.push(mp2);

            let (raw_mesh, raw_start, new_size) =
                calc_local_mesh(my_pos[i], n_grid[i], mesh, off);
            let new_mesh = permute3(raw_mesh, -(n_permute[i] as i32));
            let start = permute3(raw_start, -(n_permute[i] as i32));

            let mut send_block = Vec::with_capacity(group.len());
            let mut send_size = Vec::with_capacity(group.len());
            let mut recv_block = Vec::with_capacity(group.len());
            let mut recv_size = Vec::with_capacity(group.len());

            for &node in &group {
                let (mut sb, ss) = calc_send_block(
                    my_pos[i - 1],
                    n_grid[i - 1],
                    n_pos[i][node],
                    n_grid[i],
                    mesh,
                    off,
                );
                let lo = permute3([sb[0], sb[1], sb[2]], -(n_permute[i - 1] as i32));
                let sz = permute3([sb[3], sb[4], sb[5]], -(n_permute[i - 1] as i32));
                sb = [lo[0], lo[1], lo[2], sz[0], sz[1], sz[2]];
                if i == 1 {
                    // 首阶段发送块须跳过电荷指派边距
                    for k in 0..3 {
                        sb[k] += ca_mesh_margin[2 * k];
                    }
                }
                max_comm = max_comm.max(ss);
                send_block.push(sb);
                send_size.push(ss);

                let (rb, rs) = calc_send_block(
                    my_pos[i],
                    n_grid[i],
                    n_pos[i - 1][node],
                    n_grid[i - 1],
                    mesh,
                    off,
                );
                let lo = permute3([rb[0], rb[1], rb[2]], -(n_permute[i] as i32));
                let sz = permute3([rb[3], rb[4], rb[5]], -(n_permute[i] as i32));
                max_comm = max_comm.max(rs);
                recv_block.push([lo[0], lo[1], lo[2], sz[0], sz[1], sz[2]]);
                recv_size.push(rs);
            }

            let pack_kind = if i == 1 {
                match row_dir {
                    2 => PackKind::Plain,
                    1 => PackKind::Permute1,
                    _ => PackKind::Permute2,
                }
            } else {
                PackKind::Permute2
            };
            let back_pack = if i == 1 {
                match row_dir {
                    2 => PackKind::Plain,
                    1 => PackKind::Permute2,
                    _ => PackKind::Permute1,
                }
            } else {
                PackKind::Permute1
            };

            stages.push(StagePlan {
                row_dir: row_dirs[i - 1],
                n_permute: n_permute[i],
                group,
                send_block,
                send_size,
                recv_block,
                recv_size,
                old_mesh,
                new_mesh,
                start,
                new_size,
                n_ffts: new_mesh[0] * new_mesh[1],
                pack: pack_kind,
                back_pack,
            });
            old_mesh = new_mesh;
        }

        let stages: [StagePlan; 3] = stages.try_into().expect("恰好三个行阶段");

        // 工作数组取实空间网格与三个行阶段本地网格的最大值
        let ca_size = ca_mesh_dim[0] * ca_mesh_dim[1] * ca_mesh_dim[2];
        let mut max_mesh = ca_size;
        for s in &stages {
            max_mesh = max_mesh.max(s.new_size);
        }

        // 一维平面（wisdom 预热）
        let mut planner = FftPlanner::<f64>::new();
        let make = |planner: &mut FftPlanner<f64>, n: usize, forward: bool| {
            if cfg.use_wisdom && !crate::wisdom::load(forward, n) {
                crate::wisdom::store(forward, n);
            }
            if forward {
                planner.plan_fft_forward(n)
            } else {
                planner.plan_fft_inverse(n)
            }
        };
        let ffts_forw = [
            make(&mut planner, stages[0].new_mesh[2], true),
            make(&mut planner, stages[1].new_mesh[2], true),
            make(&mut planner, stages[2].new_mesh[2], true),
        ];
        let ffts_back = [
            make(&mut planner, stages[0].new_mesh[2], false),
            make(&mut planner, stages[1].new_mesh[2], false),
            make(&mut planner, stages[2].new_mesh[2], false),
        ];
        let scratch_len = ffts_forw
            .iter()
            .chain(ffts_back.iter())
            .map(|f| f.get_inplace_scratch_len())
            .max()
            .unwrap_or(0);

        debug!(
            ?node_grid,
            row_dir,
            max_comm,
            max_mesh,
            "FFT 计划构建完成"
        );

        Ok(Self {
            rank: me,
            stages,
            ca_mesh: ca_mesh_dim,
            ffts_forw,
            ffts_back,
            scratch: vec![Complex64::default(); scratch_len],
            send_f: vec![0.0; max_comm],
            recv_f: vec![0.0; max_comm],
            send_c: vec![Complex64::default(); max_comm],
            recv_c: vec![Complex64::default(); max_comm],
            data_c: vec![Complex64::default(); max_mesh],
            buf_c: vec![Complex64::default(); max_mesh],
            rbuf: vec![0.0; max_mesh],
        })
    }

    /// 频域本地元素数（第 3 阶段本地网格）
    #[inline]
    pub fn spectrum_len(&self) -> usize {
        self.stages[2].new_size
    }

    // ========================================================
    // 前向 / 逆向
    // ========================================================

    /// 前向变换
    ///
    /// `input` 为 `ca_mesh` 布局的本地实数块；返回 D3 行分解下
    /// 的本地复数谱（长度 [`Self::spectrum_len`]）。
    pub fn forward(
        &mut self,
        comm: &dyn Communicator,
        input: &[f64],
    ) -> LmResult<Vec<Complex64>> {
        let ca_size = self.ca_mesh[0] * self.ca_mesh[1] * self.ca_mesh[2];
        LmError::check_size("FFT 实数输入", ca_size, input.len())?;

        // D0 → D1（实数）, 复数化
        self.grid_comm_f64(comm, 0, REQ_FFT_FORW, input)?;
        let n1 = self.stages[0].new_size;
        for i in 0..n1 {
            self.data_c[i] = Complex64::new(self.rbuf[i], 0.0);
        }
        self.run_rows(0, true);

        // D1 → D2, FFT
        grid_comm_c(
            comm,
            self.rank,
            &self.stages[1],
            REQ_FFT_FORW,
            &self.data_c,
            &mut self.buf_c,
            &mut self.send_c,
            &mut self.recv_c,
            CommDir::FORWARD,
        )?;
        self.run_rows_on_buf(1, true);

        // D2 → D3, FFT
        grid_comm_c(
            comm,
            self.rank,
            &self.stages[2],
            REQ_FFT_FORW,
            &self.buf_c,
            &mut self.data_c,
            &mut self.send_c,
            &mut self.recv_c,
            CommDir::FORWARD,
        )?;
        self.run_rows(2, true);

        Ok(self.data_c[..self.spectrum_len()].to_vec())
    }

    /// 逆向变换
    ///
    /// `spectrum` 为前向输出布局的本地复数谱；返回 `ca_mesh`
    /// 布局的本地实数块。未归一化（与前向复合后放大全局网格
    /// 体积倍）。
    pub fn backward(
        &mut self,
        comm: &dyn Communicator,
        spectrum: &[Complex64],
    ) -> LmResult<Vec<f64>> {
        LmError::check_size("FFT 谱输入", self.spectrum_len(), spectrum.len())?;
        self.data_c[..spectrum.len()].copy_from_slice(spectrum);

        // 逆 FFT, D3 → D2
        self.run_rows(2, false);
        grid_comm_c(
            comm,
            self.rank,
            &self.stages[2],
            REQ_FFT_BACK,
            &self.data_c,
            &mut self.buf_c,
            &mut self.send_c,
            &mut self.recv_c,
            CommDir::BACKWARD,
        )?;

        // 逆 FFT, D2 → D1
        self.run_rows_on_buf(1, false);
        grid_comm_c(
            comm,
            self.rank,
            &self.stages[1],
            REQ_FFT_BACK,
            &self.buf_c,
            &mut self.data_c,
            &mut self.send_c,
            &mut self.recv_c,
            CommDir::BACKWARD,
        )?;

        // 逆 FFT, 丢弃虚部, D1 → D0
        self.run_rows(0, false);
        let n1 = self.stages[0].new_size;
        for i in 0..n1 {
            self.rbuf[i] = self.data_c[i].re;
        }

        let ca_size = self.ca_mesh[0] * self.ca_mesh[1] * self.ca_mesh[2];
        let mut out = vec![0.0f64; ca_size];
        back_grid_comm_f64(
            comm,
            self.rank,
            &self.stages[0],
            REQ_FFT_BACK,
            &self.rbuf[..n1],
            &mut out,
            &mut self.send_f,
            &mut self.recv_f,
        )?;
        Ok(out)
    }

    // ========================================================
    // 内部
    // ========================================================

    /// 沿存储第 2 轴执行本阶段全部一维 FFT（data_c 上）
    fn run_rows(&mut self, stage: usize, forward: bool) {
        let len = self.stages[stage].new_mesh[2];
        let rows = self.stages[stage].n_ffts;
        let fft = if forward {
            &self.ffts_forw[stage]
        } else {
            &self.ffts_back[stage]
        };
        for r in 0..rows {
            fft.process_with_scratch(&mut self.data_c[r * len..(r + 1) * len], &mut self.scratch);
        }
    }

    /// 同上, 但作用于 buf_c
    fn run_rows_on_buf(&mut self, stage: usize, forward: bool) {
        let len = self.stages[stage].new_mesh[2];
        let rows = self.stages[stage].n_ffts;
        let fft = if forward {
            &self.ffts_forw[stage]
        } else {
            &self.ffts_back[stage]
        };
        for r in 0..rows {
            fft.process_with_scratch(&mut self.buf_c[r * len..(r + 1) * len], &mut self.scratch);
        }
    }

    /// 实数阶段的前向网格重分布（input → rbuf）
    fn grid_comm_f64(
        &mut self,
        comm: &dyn Communicator,
        stage: usize,
        tag: i32,
        input: &[f64],
    ) -> LmResult<()> {
        let plan = &self.stages[stage];
        let me = self.rank;
        for j in 0..plan.group.len() {
            let partner = plan.group[j];
            let (pk, pb, pm, ub, um, n_send, n_recv) = CommDir::FORWARD.select(plan, j);
            pack(
                pk,
                input,
                &mut self.send_f[..n_send],
                [pb[0], pb[1], pb[2]],
                [pb[3], pb[4], pb[5]],
                pm,
            );
            if partner == me {
                std::mem::swap(&mut self.send_f, &mut self.recv_f);
            } else {
                comm.send_bytes(partner, tag, bytemuck::cast_slice(&self.send_f[..n_send]))?;
                let bytes = comm.recv_bytes(partner, tag)?;
                let incoming: Vec<f64> = bytemuck::pod_collect_to_vec(&bytes);
                LmError::check_size("FFT 实数接收", n_recv, incoming.len())?;
                self.recv_f[..n_recv].copy_from_slice(&incoming);
            }
            unpack_block(
                &self.recv_f[..n_recv],
                &mut self.rbuf,
                [ub[0], ub[1], ub[2]],
                [ub[3], ub[4], ub[5]],
                um,
            );
        }
        Ok(())
    }
}

/// 网格重分布方向选择器：前向用 发送块/旧网格 → 接收块/新网格，
/// 逆向对调两组块
#[derive(Clone, Copy)]
struct CommDir {
    backward: bool,
}

impl CommDir {
    const FORWARD: Self = Self { backward: false };
    const BACKWARD: Self = Self { backward: true };

    #[allow(clippy::type_complexity)]
    fn select<'p>(
        &self,
        plan: &'p StagePlan,
        j: usize,
    ) -> (
        PackKind,
        &'p [usize; 6],
        [usize; 3],
        &'p [usize; 6],
        [usize; 3],
        usize,
        usize,
    ) {
        if self.backward {
            (
                plan.back_pack,
                &plan.recv_block[j],
                plan.new_mesh,
                &plan.send_block[j],
                plan.old_mesh,
                plan.recv_size[j],
                plan.send_size[j],
            )
        } else {
            (
                plan.pack,
                &plan.send_block[j],
                plan.old_mesh,
                &plan.recv_block[j],
                plan.new_mesh,
                plan.send_size[j],
                plan.recv_size[j],
            )
        }
    }
}

/// 复数阶段的网格重分布
#[allow(clippy::too_many_arguments)]
fn grid_comm_c(
    comm: &dyn Communicator,
    me: usize,
    plan: &StagePlan,
    tag: i32,
    input: &[Complex64],
    out: &mut [Complex64],
    send_buf: &mut Vec<Complex64>,
    recv_buf: &mut Vec<Complex64>,
    dir: CommDir,
) -> LmResult<()> {
    for j in 0..plan.group.len() {
        let partner = plan.group[j];
        let (pk, pb, pm, ub, um, n_send, n_recv) = dir.select(plan, j);
        pack(
            pk,
            input,
            &mut send_buf[..n_send],
            [pb[0], pb[1], pb[2]],
            [pb[3], pb[4], pb[5]],
            pm,
        );
        if partner == me {
            std::mem::swap(send_buf, recv_buf);
        } else {
            comm.send_bytes(partner, tag, bytemuck::cast_slice(&send_buf[..n_send]))?;
            let bytes = comm.recv_bytes(partner, tag)?;
            let incoming: Vec<Complex64> = bytemuck::pod_collect_to_vec(&bytes);
            LmError::check_size("FFT 复数接收", n_recv, incoming.len())?;
            recv_buf[..n_recv].copy_from_slice(&incoming);
        }
        unpack_block(
            &recv_buf[..n_recv],
            out,
            [ub[0], ub[1], ub[2]],
            [ub[3], ub[4], ub[5]],
            um,
        );
    }
    Ok(())
}

/// 实数阶段的逆向网格重分布（rbuf → 调用方数组）
#[allow(clippy::too_many_arguments)]
fn back_grid_comm_f64(
    comm: &dyn Communicator,
    me: usize,
    plan: &StagePlan,
    tag: i32,
    input: &[f64],
    out: &mut [f64],
    send_buf: &mut Vec<f64>,
    recv_buf: &mut Vec<f64>,
) -> LmResult<()> {
    let dir = CommDir::BACKWARD;
    for j in 0..plan.group.len() {
        let partner = plan.group[j];
        let (pk, pb, pm, ub, um, n_send, n_recv) = dir.select(plan, j);
        pack(
            pk,
            input,
            &mut send_buf[..n_send],
            [pb[0], pb[1], pb[2]],
            [pb[3], pb[4], pb[5]],
            pm,
        );
        if partner == me {
            std::mem::swap(send_buf, recv_buf);
        } else {
            comm.send_bytes(partner, tag, bytemuck::cast_slice(&send_buf[..n_send]))?;
            let bytes = comm.recv_bytes(partner, tag)?;
            let incoming: Vec<f64> = bytemuck::pod_collect_to_vec(&bytes);
            LmError::check_size("FFT 实数接收", n_recv, incoming.len())?;
            recv_buf[..n_recv].copy_from_slice(&incoming);
        }
        unpack_block(
            &recv_buf[..n_recv],
            out,
            [ub[0], ub[1], ub[2]],
            [ub[3], ub[4], ub[5]],
            um,
        );
    }
    Ok(())
}
