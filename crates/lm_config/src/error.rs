// crates/lm_config/src/error.rs

//! 配置层错误类型

use lm_foundation::LmError;

/// 配置错误
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 解析错误
    #[error("解析错误: {0}")]
    Parse(#[from] serde_json::Error),

    /// 无效值
    #[error("无效值 '{key}': {value} - {reason}")]
    InvalidValue {
        /// 配置键
        key: String,
        /// 配置值
        value: String,
        /// 原因
        reason: String,
    },

    /// 不兼容的选项组合
    ///
    /// 无效组合是致命配置错误，核心不提供单节点回退。
    #[error("不兼容的选项组合: {0}")]
    Incompatible(String),
}

impl From<ConfigError> for LmError {
    fn from(err: ConfigError) -> Self {
        LmError::config(err.to_string())
    }
}
