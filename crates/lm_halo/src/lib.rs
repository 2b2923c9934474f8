// crates/lm_halo/src/lib.rs

//! 晕区层
//!
//! 子域边界状态在 rank 间的两类流动：
//!
//! - [`ghost`]: 幽灵单元通信。按通信计划把单元子块打包成连续
//!   字节缓冲并成对收发；周期面上位置加 ±盒长移位。
//! - [`exchange`]: 异步粒子迁移。把越出子域的粒子运到新 owner，
//!   多轮收敛；`NEIGHBOR` 模式一轮未收敛即致命。
//! - [`topology`]: 拓扑装配。单元网格、常备通信器与几何变更
//!   响应的生命周期管理。
//!
//! 线格式：粒子子结构的紧凑连续表示，除消息信封外无任何封帧。

pub mod exchange;
pub mod ghost;
pub mod topology;
pub mod wire;

pub use exchange::{ExchangeMode, Exchanger};
pub use ghost::{GhostCommunicator, RoundKind, TransferMask};
pub use topology::{DomainTopology, GridChangeFlags, OptionalComms};
