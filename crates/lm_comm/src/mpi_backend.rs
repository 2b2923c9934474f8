// crates/lm_comm/src/mpi_backend.rs

//! MPI 通信后端（cargo feature `mpi`）
//!
//! 依赖 rsmpi 与系统 MPI 实现。调用方必须先完成
//! `mpi::initialize()`，并为缓冲发送附加足够大的缓冲区：
//!
//! ```ignore
//! let universe = mpi::initialize().expect("MPI 初始化失败");
//! universe.set_buffer_size(64 * 1024 * 1024);
//! let comm = MpiComm::new();
//! ```
//!
//! `send_bytes` 使用缓冲模式（MPI_Bsend），满足 trait 的
//! "发送不等待匹配接收" 语义；接收使用匹配 probe 的阻塞接收。

use mpi::collective::SystemOperation;
use mpi::topology::SimpleCommunicator;
use mpi::traits::*;

use lm_foundation::{LmError, LmResult};

use crate::backend::{Communicator, ReduceOp};

/// MPI 通信后端
///
/// 包装 world communicator。rank 间字节消息使用调用方附加的
/// MPI 发送缓冲区。
pub struct MpiComm;

impl MpiComm {
    /// 创建 MPI 后端
    ///
    /// # Panics
    ///
    /// MPI 未经 `mpi::initialize()` 初始化时 panic。
    pub fn new() -> Self {
        Self
    }
}

impl Default for MpiComm {
    fn default() -> Self {
        Self::new()
    }
}

fn op_of(op: ReduceOp) -> SystemOperation {
    match op {
        ReduceOp::Min => SystemOperation::min(),
        ReduceOp::Max => SystemOperation::max(),
        ReduceOp::Sum => SystemOperation::sum(),
    }
}

impl Communicator for MpiComm {
    fn rank(&self) -> usize {
        SimpleCommunicator::world().rank() as usize
    }

    fn size(&self) -> usize {
        SimpleCommunicator::world().size() as usize
    }

    fn send_bytes(&self, dest: usize, tag: i32, data: &[u8]) -> LmResult<()> {
        let world = SimpleCommunicator::world();
        world
            .process_at_rank(dest as i32)
            .buffered_send_with_tag(data, tag);
        Ok(())
    }

    fn recv_bytes(&self, src: usize, tag: i32) -> LmResult<Vec<u8>> {
        let world = SimpleCommunicator::world();
        let (data, status) = world
            .process_at_rank(src as i32)
            .receive_vec_with_tag::<u8>(tag);
        if status.source_rank() != src as i32 {
            return Err(LmError::communication(
                self.rank(),
                format!(
                    "期望来自 rank {} 的消息, 实际来自 rank {}",
                    src,
                    status.source_rank()
                ),
            ));
        }
        Ok(data)
    }

    fn all_reduce_f64(&self, value: f64, op: ReduceOp) -> f64 {
        let world = SimpleCommunicator::world();
        let mut global = 0.0f64;
        world.all_reduce_into(&value, &mut global, op_of(op));
        global
    }

    fn all_reduce_i64(&self, value: i64, op: ReduceOp) -> i64 {
        let world = SimpleCommunicator::world();
        let mut global = 0i64;
        world.all_reduce_into(&value, &mut global, op_of(op));
        global
    }

    fn all_reduce_i64_vec(&self, values: &mut [i64], op: ReduceOp) {
        let world = SimpleCommunicator::world();
        let send = values.to_vec();
        world.all_reduce_into(&send[..], values, op_of(op));
    }

    fn exscan_f64_sum(&self, value: f64) -> f64 {
        let world = SimpleCommunicator::world();
        let mut prefix = 0.0f64;
        world.exclusive_scan_into(&value, &mut prefix, SystemOperation::sum());
        prefix
    }

    fn barrier(&self) {
        SimpleCommunicator::world().barrier();
    }
}
