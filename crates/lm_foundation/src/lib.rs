// crates/lm_foundation/src/lib.rs

//! LatMD Foundation Layer
//!
//! 零依赖基础层，提供整个项目的基础抽象。
//!
//! # 模块概览
//!
//! - [`error`]: 统一错误类型（配置 / 不一致 / 通信 / 收敛）
//! - [`tolerance`]: 数值容差常量与边界判定工具
//! - [`index`]: 强类型索引系统（Cell / Quad / Tree / Rank）
//! - [`morton`]: Morton 编码（三维坐标交织）
//!
//! # 设计原则
//!
//! 1. **最小依赖**: 仅依赖 serde（索引序列化）
//! 2. **类型安全**: 编译期防止索引误用
//! 3. **零开销抽象**: `Idx<Tag>` 与 `u32` 内存布局完全相同
//! 4. **错误分层**: 高层 crate 的错误最终可转换为 [`LmError`]
//!
//! # 示例
//!
//! ```
//! use lm_foundation::{
//!     index::{CellIndex, Idx},
//!     morton,
//!     error::{LmError, LmResult},
//! };
//!
//! let idx = CellIndex::new(3);
//! assert_eq!(idx.index(), 3);
//!
//! let code = morton::encode(1, 2, 3);
//! assert_eq!(morton::decode(code), [1, 2, 3]);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod index;
pub mod morton;
pub mod tolerance;

// 重导出常用类型
pub use error::{LmError, LmResult};
pub use index::{CellIndex, Idx, QuadIndex, RankIndex, TreeIndex};
pub use tolerance::ROUND_ERROR_PREC;

/// Prelude 模块，包含常用类型
pub mod prelude {
    pub use crate::ensure;
    pub use crate::error::{LmError, LmResult};
    pub use crate::index::{CellIndex, Idx, QuadIndex, RankIndex, TreeIndex};
    pub use crate::tolerance::ROUND_ERROR_PREC;
}

/// 条件检查宏：条件不满足时提前返回错误
///
/// # 示例
///
/// ```
/// use lm_foundation::{ensure, error::{LmError, LmResult}};
///
/// fn divide(a: f64, b: f64) -> LmResult<f64> {
///     ensure!(b != 0.0, LmError::invalid_input("除数不能为零"));
///     Ok(a / b)
/// }
/// ```
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $err:expr) => {
        if !$cond {
            return Err($err);
        }
    };
}
