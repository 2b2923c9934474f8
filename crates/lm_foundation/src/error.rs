// crates/lm_foundation/src/error.rs

//! 基础错误类型
//!
//! 定义整个项目的基础错误类型，对应核心抬升的四类失败语义：
//!
//! - **配置错误** ([`LmError::Config`])：请求的网格 / 范围组合无法构造
//! - **不一致** ([`LmError::Inconsistency`])：内部不变量被破坏（粒子落入非法单元等）
//! - **通信失败** ([`LmError::Communication`])：底层消息传输返回非成功
//! - **收敛失败** ([`LmError::Convergence`])：NEIGHBOR 交换模式下一轮未收敛
//!
//! # 传播策略
//!
//! 配置错误与不一致通过 `Result` 通道上抛，由宿主应用决定中止或恢复；
//! 通信失败与收敛失败为致命错误，调用方打印带 rank 标记的诊断后终止进程组。
//!
//! # 设计原则
//!
//! 1. **纯净性**：仅包含核心级别的错误，不引入网格 / 物理等高层概念
//! 2. **可转换性**：高层错误（`lm_config::ConfigError` 等）可转换为本类型
//! 3. **零依赖**：不依赖项目内其他 crate

use std::{fmt, io};

/// 统一结果类型别名
///
/// 等价于 `Result<T, LmError>`，用于简化函数签名。
pub type LmResult<T> = Result<T, LmError>;

/// Foundation 层基础错误
///
/// 错误体系的根基。高层错误通过转换为本类型向下兼容。
#[derive(Debug)]
pub enum LmError {
    /// 配置无法满足
    ///
    /// 单元网格在给定 `max_range` 与单元数上限下无法构造、
    /// 盒子边长小于作用距离、两棵森林连接性不兼容等。
    Config {
        /// 出错的坐标轴（若与某一轴相关）
        axis: Option<usize>,
        /// 人类可读的错误描述
        message: String,
    },

    /// 内部不变量被破坏
    ///
    /// 已知 id 的粒子迁移到 `position_to_cell` 拒绝的单元、
    /// 八叉树子节点数量非法等。通常表示 bug。
    Inconsistency {
        /// 不一致描述
        message: String,
    },

    /// 底层通信调用失败
    ///
    /// 致命错误：携带出错 rank，由调用方终止进程组。
    Communication {
        /// 出错的 rank
        rank: usize,
        /// 通信错误描述
        message: String,
    },

    /// 交换未收敛
    ///
    /// `NEIGHBOR` 模式下一轮交换后仍存在越界粒子。致命错误。
    Convergence {
        /// 出错的 rank
        rank: usize,
        /// 收敛失败描述
        message: String,
    },

    /// 索引访问越界
    IndexOutOfBounds {
        /// 索引类别（如 "Cell", "Quad"）
        index_type: &'static str,
        /// 访问的索引值
        index: usize,
        /// 容器长度（上界）
        len: usize,
    },

    /// 数组或集合大小不匹配
    SizeMismatch {
        /// 数据名称（用于调试）
        name: &'static str,
        /// 期望大小
        expected: usize,
        /// 实际大小
        actual: usize,
    },

    /// 输入数据验证失败
    InvalidInput {
        /// 说明无效原因
        message: String,
    },

    /// IO 操作失败
    Io {
        /// 描述性错误信息
        message: String,
        /// 底层 IO 错误源
        source: Option<io::Error>,
    },

    /// 内部实现错误
    ///
    /// 程序进入不应到达的状态。
    Internal {
        /// 内部错误描述
        message: String,
    },
}

// ============================================================================
// 便捷构造方法
// ============================================================================

impl LmError {
    /// 创建配置错误（不关联坐标轴）
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            axis: None,
            message: message.into(),
        }
    }

    /// 创建与坐标轴相关的配置错误
    ///
    /// # 参数
    ///
    /// - `axis`：出错的坐标轴（0 = x, 1 = y, 2 = z）
    /// - `message`：可读的错误描述
    #[inline]
    pub fn config_axis(axis: usize, message: impl Into<String>) -> Self {
        Self::Config {
            axis: Some(axis),
            message: message.into(),
        }
    }

    /// 创建不一致错误
    #[inline]
    pub fn inconsistency(message: impl Into<String>) -> Self {
        Self::Inconsistency {
            message: message.into(),
        }
    }

    /// 创建通信失败错误
    #[inline]
    pub fn communication(rank: usize, message: impl Into<String>) -> Self {
        Self::Communication {
            rank,
            message: message.into(),
        }
    }

    /// 创建收敛失败错误
    #[inline]
    pub fn convergence(rank: usize, message: impl Into<String>) -> Self {
        Self::Convergence {
            rank,
            message: message.into(),
        }
    }

    /// 创建索引越界错误
    #[inline]
    pub fn index_out_of_bounds(index_type: &'static str, index: usize, len: usize) -> Self {
        Self::IndexOutOfBounds {
            index_type,
            index,
            len,
        }
    }

    /// 创建大小不匹配错误
    #[inline]
    pub fn size_mismatch(name: &'static str, expected: usize, actual: usize) -> Self {
        Self::SizeMismatch {
            name,
            expected,
            actual,
        }
    }

    /// 创建无效输入错误
    #[inline]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// 创建内部错误
    #[inline]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// 是否为致命错误（通信失败 / 收敛失败）
    ///
    /// 致命错误要求调用方打印 rank 标记诊断后终止进程组，
    /// 其余错误交由宿主应用决定。
    #[inline]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Communication { .. } | Self::Convergence { .. })
    }
}

// ============================================================================
// 验证辅助方法
// ============================================================================

impl LmError {
    /// 验证索引是否在有效范围内，越界则返回 [`LmError::IndexOutOfBounds`]
    #[inline]
    pub fn check_index(index_type: &'static str, index: usize, len: usize) -> LmResult<()> {
        if index >= len {
            Err(Self::index_out_of_bounds(index_type, index, len))
        } else {
            Ok(())
        }
    }

    /// 验证数组大小是否匹配，不匹配则返回 [`LmError::SizeMismatch`]
    #[inline]
    pub fn check_size(name: &'static str, expected: usize, actual: usize) -> LmResult<()> {
        if expected != actual {
            Err(Self::size_mismatch(name, expected, actual))
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// 标准库错误转换实现
// ============================================================================

impl From<io::Error> for LmError {
    /// 将 [`std::io::Error`] 转换为 [`LmError::Io`]
    fn from(err: io::Error) -> Self {
        Self::Io {
            message: "IO 操作失败".to_string(),
            source: Some(err),
        }
    }
}

// ============================================================================
// 核心 Trait 实现
// ============================================================================

impl fmt::Display for LmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { axis, message } => match axis {
                Some(d) => write!(f, "配置错误 (方向 {}): {}", d, message),
                None => write!(f, "配置错误: {}", message),
            },
            Self::Inconsistency { message } => write!(f, "内部不一致: {}", message),
            Self::Communication { rank, message } => {
                write!(f, "[rank {}] 通信失败: {}", rank, message)
            }
            Self::Convergence { rank, message } => {
                write!(f, "[rank {}] 交换未收敛: {}", rank, message)
            }
            Self::IndexOutOfBounds {
                index_type,
                index,
                len,
            } => {
                write!(f, "索引越界: {} 索引{} 超出范围 0..{}", index_type, index, len)
            }
            Self::SizeMismatch {
                name,
                expected,
                actual,
            } => {
                write!(f, "数组大小不匹配: {} 期望{}, 实际{}", name, expected, actual)
            }
            Self::InvalidInput { message } => write!(f, "无效的输入数据: {}", message),
            Self::Io { message, .. } => write!(f, "IO错误: {}", message),
            Self::Internal { message } => write!(f, "内部错误: {}", message),
        }
    }
}

impl std::error::Error for LmError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => source.as_ref().map(|e| e as _),
            _ => None,
        }
    }
}

// ============================================================================
// 测试
// ============================================================================
