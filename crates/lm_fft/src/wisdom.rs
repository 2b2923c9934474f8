// crates/lm_fft/src/wisdom.rs

//! 一维 FFT wisdom 文件
//!
//! 平面器按长度缓存一维平面；wisdom 文件记录既往规划过的长度，
//! 启动时用于预热平面器。文件缺失或不可读不是错误，只是触发
//! 重新规划并回写。

use std::fs;
use std::path::PathBuf;

use tracing::debug;

/// wisdom 文件名
///
/// 格式：`fftw_1d_wisdom_{forw|back}_n<N>.file`，位于工作目录。
pub fn wisdom_file_name(forward: bool, n: usize) -> PathBuf {
    let dir = if forward { "forw" } else { "back" };
    PathBuf::from(format!("fftw_1d_wisdom_{}_n{}.file", dir, n))
}

/// 读 wisdom：长度 `n` 的平面此前是否规划过
pub fn load(forward: bool, n: usize) -> bool {
    fs::read_to_string(wisdom_file_name(forward, n))
        .map(|content| content.contains(&format!("n={}", n)))
        .unwrap_or(false)
}

/// 写 wisdom：记录长度 `n` 已规划
///
/// 写失败只记日志，不向上传播。
pub fn store(forward: bool, n: usize) {
    let path = wisdom_file_name(forward, n);
    if let Err(err) = fs::write(&path, format!("n={}\n", n)) {
        debug!(?path, %err, "wisdom 文件写入失败");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_format() {
        assert_eq!(
            wisdom_file_name(true, 8),
            PathBuf::from("fftw_1d_wisdom_forw_n8.file")
        );
        assert_eq!(
            wisdom_file_name(false, 32),
            PathBuf::from("fftw_1d_wisdom_back_n32.file")
        );
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        assert!(!load(true, 982451653));
    }
}
