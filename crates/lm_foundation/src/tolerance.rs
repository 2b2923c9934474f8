// crates/lm_foundation/src/tolerance.rs

//! 数值容差
//!
//! 周期折叠、单元归属判定与交换分类共享的舍入容差常量。
//! 所有容差均为编译期常量，不读取环境变量。

/// 浮点舍入容差
///
/// 判断粒子是否"刚好"落在子域边界上时使用的相对精度，
/// 以盒长为尺度（即实际余量为 `ROUND_ERROR_PREC * box_l[d]`）。
pub const ROUND_ERROR_PREC: f64 = 1.0e-14;

/// 返回 `p` 相对区间 `[a, b)` 的位置
///
/// 带容差 `errmargin` 比较：`-1` 表示在 `a` 左侧，`0` 表示在区间内，
/// `1` 表示在 `b` 右侧或等于 `b`。传入 `errmargin = 0.0` 得到精确比较。
#[inline]
pub fn bin_between(p: f64, a: f64, b: f64, errmargin: f64) -> i32 {
    if p - a < -errmargin {
        -1
    } else if p - b >= errmargin {
        1
    } else {
        0
    }
}

/// 符号函数
///
/// 正数返回 `1.0`，负数返回 `-1.0`，零返回 `0.0`。
#[inline]
pub fn sign(n: f64) -> f64 {
    if n > 0.0 {
        1.0
    } else if n < 0.0 {
        -1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bin_between_exact() {
        assert_eq!(bin_between(-0.1, 0.0, 1.0, 0.0), -1);
        assert_eq!(bin_between(0.0, 0.0, 1.0, 0.0), 0);
        assert_eq!(bin_between(0.5, 0.0, 1.0, 0.0), 0);
        assert_eq!(bin_between(1.0, 0.0, 1.0, 0.0), 1);
    }

    #[test]
    fn test_bin_between_with_margin() {
        // 边界附近 margin 内的点视作区间内
        let m = 1e-9;
        assert_eq!(bin_between(-0.5e-9, 0.0, 1.0, m), 0);
        assert_eq!(bin_between(1.0 + 0.5e-9, 0.0, 1.0, m), 0);
        assert_eq!(bin_between(1.0 + 2e-9, 0.0, 1.0, m), 1);
    }

    #[test]
    fn test_sign() {
        assert_eq!(sign(3.5), 1.0);
        assert_eq!(sign(-0.1), -1.0);
        assert_eq!(sign(0.0), 0.0);
    }
}
