// crates/lm_fft/src/pack.rs

//! 网格块打包 / 解包核
//!
//! 块矩形被当作 `(慢, 中, 快)` 三重嵌套循环遍历，元素单位由
//! 泛型参数承担（实数趟 `f64`，复数趟 `Complex64`）。三个排列
//! 变体实现三种可能的行轴轮换；判别式在建计划时定一次，热循环
//! 里按枚举匹配。

/// 打包变体
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackKind {
    /// 不换轴，整行拷贝
    Plain,
    /// 行轴轮换一次
    Permute1,
    /// 行轴轮换两次
    Permute2,
}

/// 按变体打包
pub fn pack<T: Copy>(
    kind: PackKind,
    input: &[T],
    out: &mut [T],
    start: [usize; 3],
    size: [usize; 3],
    dim: [usize; 3],
) {
    match kind {
        PackKind::Plain => pack_block(input, out, start, size, dim),
        PackKind::Permute1 => pack_block_permute1(input, out, start, size, dim),
        PackKind::Permute2 => pack_block_permute2(input, out, start, size, dim),
    }
}

/// 整行拷贝打包
pub fn pack_block<T: Copy>(
    input: &[T],
    out: &mut [T],
    start: [usize; 3],
    size: [usize; 3],
    dim: [usize; 3],
) {
    let copy = size[2];
    let m_in_offset = dim[2];
    let s_in_offset = dim[2] * (dim[1] - size[1]);
    let mut li_in = start[2] + dim[2] * (start[1] + dim[1] * start[0]);
    let mut li_out = 0;

    for _s in 0..size[0] {
        for _m in 0..size[1] {
            out[li_out..li_out + copy].copy_from_slice(&input[li_in..li_in + copy]);
            li_in += m_in_offset;
            li_out += copy;
        }
        li_in += s_in_offset;
    }
}

/// 行轴轮换一次的打包
///
/// 输入 `(慢, 中, 快)` 在输出中按 `(快, 慢, 中)` 布置。
pub fn pack_block_permute1<T: Copy>(
    input: &[T],
    out: &mut [T],
    start: [usize; 3],
    size: [usize; 3],
    dim: [usize; 3],
) {
    let m_in_offset = dim[2] - size[2];
    let s_in_offset = dim[2] * (dim[1] - size[1]);
    let m_out_step = size[0];
    let mut li_in = start[2] + dim[2] * (start[1] + dim[1] * start[0]);

    for s in 0..size[0] {
        let mut li_out = s;
        for _m in 0..size[1] {
            for _f in 0..size[2] {
                out[li_out] = input[li_in];
                li_in += 1;
                li_out += m_out_step;
            }
            li_in += m_in_offset;
        }
        li_in += s_in_offset;
    }
}

/// 行轴轮换两次的打包
///
/// 输入 `(慢, 中, 快)` 在输出中按 `(中, 快, 慢)` 布置。
pub fn pack_block_permute2<T: Copy>(
    input: &[T],
    out: &mut [T],
    start: [usize; 3],
    size: [usize; 3],
    dim: [usize; 3],
) {
    let m_in_offset = dim[2] - size[2];
    let s_in_offset = dim[2] * (dim[1] - size[1]);
    let s_out_step = size[0] * size[1];
    let mut li_in = start[2] + dim[2] * (start[1] + dim[1] * start[0]);

    for s in 0..size[0] {
        let m_out_start = s * size[1];
        for m in 0..size[1] {
            let mut li_out = m_out_start + m;
            for _f in 0..size[2] {
                out[li_out] = input[li_in];
                li_in += 1;
                li_out += s_out_step;
            }
            li_in += m_in_offset;
        }
        li_in += s_in_offset;
    }
}

/// 整行拷贝解包
pub fn unpack_block<T: Copy>(
    input: &[T],
    out: &mut [T],
    start: [usize; 3],
    size: [usize; 3],
    dim: [usize; 3],
) {
    let copy = size[2];
    let m_out_offset = dim[2];
    let s_out_offset = dim[2] * (dim[1] - size[1]);
    let mut li_in = 0;
    let mut li_out = start[2] + dim[2] * (start[1] + dim[1] * start[0]);

    for _s in 0..size[0] {
        for _m in 0..size[1] {
            out[li_out..li_out + copy].copy_from_slice(&input[li_in..li_in + copy]);
            li_in += copy;
            li_out += m_out_offset;
        }
        li_out += s_out_offset;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(dim: [usize; 3]) -> Vec<i32> {
        (0..dim[0] * dim[1] * dim[2]).map(|v| v as i32).collect()
    }

    #[test]
    fn test_pack_unpack_roundtrip() {
        let dim = [4, 4, 4];
        let input = grid(dim);
        let start = [1, 0, 2];
        let size = [2, 3, 2];
        let mut packed = vec![0; 12];
        pack_block(&input, &mut packed, start, size, dim);

        let mut out = vec![-1; 64];
        unpack_block(&packed, &mut out, start, size, dim);
        // 块内等值, 块外未触碰
        for s in 0..size[0] {
            for m in 0..size[1] {
                for f in 0..size[2] {
                    let idx = (start[0] + s) * 16 + (start[1] + m) * 4 + (start[2] + f);
                    assert_eq!(out[idx], input[idx]);
                }
            }
        }
        assert_eq!(out[0], -1);
    }

    #[test]
    fn test_permute1_layout() {
        // (s,m,f) -> 输出线性序 f 最慢? 验证与定义一致:
        // li_out = s + size[0]*(m*size[2]+f) 的逆推
        let dim = [2, 2, 2];
        let input = grid(dim);
        let size = [2, 2, 2];
        let mut out = vec![-1; 8];
        pack_block_permute1(&input, &mut out, [0, 0, 0], size, dim);
        for s in 0..2 {
            for m in 0..2 {
                for f in 0..2 {
                    let li_in = s * 4 + m * 2 + f;
                    let li_out = s + size[0] * (m * size[2] + f);
                    assert_eq!(out[li_out], input[li_in]);
                }
            }
        }
    }

    #[test]
    fn test_permute2_layout() {
        let dim = [2, 2, 2];
        let input = grid(dim);
        let size = [2, 2, 2];
        let mut out = vec![-1; 8];
        pack_block_permute2(&input, &mut out, [0, 0, 0], size, dim);
        for s in 0..2 {
            for m in 0..2 {
                for f in 0..2 {
                    let li_in = s * 4 + m * 2 + f;
                    let li_out = s * size[1] + m + size[0] * size[1] * f;
                    assert_eq!(out[li_out], input[li_in]);
                }
            }
        }
    }
}
