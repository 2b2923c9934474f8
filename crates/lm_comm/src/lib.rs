// crates/lm_comm/src/lib.rs

//! 通信层
//!
//! 核心所有 rank 间流量都经过 [`Communicator`] trait，上层代码不直接
//! 接触任何具体消息库。三个后端：
//!
//! - [`SerialComm`]: 单 rank，自发自收走内部信箱（默认）
//! - [`LocalComm`]: N 个进程内 rank（线程 + 信箱），供多 rank 测试
//! - `MpiComm`: rsmpi 后端，cargo feature `mpi`
//!
//! # 语义约定
//!
//! - `send_bytes` 从调用方视角非阻塞（缓冲发送，绝不等待匹配接收）
//! - `recv_bytes` 阻塞到匹配消息到达；固定 `(src, dst, tag)` 三元组
//!   上的消息按发送顺序交付
//! - 归约 / 扫描 / 栅栏是集合操作，所有 rank 必须以相同顺序调用
//!
//! # 挂起点
//!
//! 核心的挂起点恰好是本 trait 的阻塞调用（接收与集合操作），
//! 两次挂起点之间单 rank 内部无并发。

pub mod backend;
pub mod local;
pub mod tag;

#[cfg(feature = "mpi")]
pub mod mpi_backend;

pub use backend::{Communicator, ReduceOp, SerialComm};
pub use local::{LocalComm, LocalUniverse};

#[cfg(feature = "mpi")]
pub use mpi_backend::MpiComm;
