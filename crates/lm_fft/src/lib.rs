// crates/lm_fft/src/lib.rs

//! FFT 层
//!
//! 全局分布网格的三维实数→复数 FFT。四套分解：D0 为与粒子
//! 笛卡尔网格一致的三维块分解，D1–D3 为按行方向轮换的一维行
//! 分解，每趟沿存储第 2 轴做连续的一维 FFT。
//!
//! # 模块概览
//!
//! - [`plan`]: 通信组发现、局部网格与收发块矩形、缓冲尺寸
//! - [`pack`]: 三种行轴轮换的打包 / 解包核
//! - [`fft3d`]: 前向 / 逆向执行（网格重分布 + 一维 FFT 趟）
//! - [`wisdom`]: 一维平面长度的 wisdom 文件持久化
//!
//! 收发缓冲与 `data`/`data_buf` 工作数组由 [`Fft3d`] 上下文
//! 独占持有，按运行最大值一次分配。

pub mod fft3d;
pub mod pack;
pub mod plan;
pub mod wisdom;

pub use fft3d::Fft3d;
pub use pack::PackKind;
pub use plan::StagePlan;
