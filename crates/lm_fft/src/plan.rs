// crates/lm_fft/src/plan.rs

//! FFT 通信计划
//!
//! 每个 源→目标 阶段：通信组（与目标块相交的全部 rank，组内
//! 旋转使本 rank 位置在前）、每伙伴一对收发块矩形、轴排列与
//! 一维 FFT 行数。块矩形计算后按阶段排列数旋转到存储坐标。

use lm_foundation::{LmError, LmResult};

use crate::pack::PackKind;

/// 单阶段计划
#[derive(Debug, Clone)]
pub struct StagePlan {
    /// 行方向（全局网格轴）
    pub row_dir: usize,
    /// 存储轴排列数
    pub n_permute: usize,
    /// 通信组（rank 序列，本 rank 位置经旋转对齐）
    pub group: Vec<usize>,
    /// 发送块（每伙伴 `[lo; 3] + [size; 3]`，存储坐标）
    pub send_block: Vec<[usize; 6]>,
    /// 发送元素数
    pub send_size: Vec<usize>,
    /// 接收块
    pub recv_block: Vec<[usize; 6]>,
    /// 接收元素数
    pub recv_size: Vec<usize>,
    /// 上一阶段的本地网格（存储坐标）
    pub old_mesh: [usize; 3],
    /// 本阶段的本地网格（存储坐标）
    pub new_mesh: [usize; 3],
    /// 本地网格在全局网格中的起点（存储坐标）
    pub start: [i32; 3],
    /// 本地网格元素数
    pub new_size: usize,
    /// 一维 FFT 行数
    pub n_ffts: usize,
    /// 前向打包变体
    pub pack: PackKind,
    /// 逆向打包变体
    pub back_pack: PackKind,
}

/// 把 `n` 个 rank 摆成尽量方的二维网格（第三维为 1）
pub fn calc_2d_grid(n: usize) -> [i32; 3] {
    let mut a = (n as f64).sqrt() as usize;
    while a > 1 && n % a != 0 {
        a -= 1;
    }
    [a.max(1) as i32, (n / a.max(1)) as i32, 1]
}

/// 把二维 FFT 网格映射到三维块网格上，返回行方向与排好的网格
///
/// 行方向是 FFT 网格中维度为 1 的轴；优先选三维网格同样为 1
/// 的轴（两套网格完全一致），否则取 z。
pub fn map_3d_to_2d_grid(g3d: [i32; 3], g2d: [i32; 3]) -> ([i32; 3], usize) {
    let (a, b) = (g2d[0], g2d[1]);
    // 候选行轴按优先级：与 g3d 完全吻合者优先, 其次 z
    let mut best: Option<([i32; 3], usize)> = None;
    for row in [2usize, 1, 0] {
        for swap in [false, true] {
            let (p, q) = if swap { (b, a) } else { (a, b) };
            let mut g = [0i32; 3];
            g[row] = 1;
            let others: Vec<usize> = (0..3).filter(|&d| d != row).collect();
            g[others[0]] = p;
            g[others[1]] = q;
            if !grids_compatible(g3d, g) {
                continue;
            }
            let exact = g == g3d;
            match &best {
                Some((bg, _)) if !exact && *bg == g3d => {}
                _ => {
                    if exact || best.is_none() {
                        best = Some((g, row));
                    }
                }
            }
        }
    }
    best.expect("二维 FFT 网格无法映射到块网格")
}

/// 两套网格是否逐分量互为整倍数
pub fn grids_compatible(g1: [i32; 3], g2: [i32; 3]) -> bool {
    (0..3).all(|i| {
        (g1[i] >= g2[i] && g1[i] % g2[i] == 0) || (g2[i] > g1[i] && g2[i] % g1[i] == 0)
    })
}

/// 数组循环排列：`out[i] = field[(i + n) mod 3]`
#[inline]
pub fn permute3<T: Copy>(field: [T; 3], n: i32) -> [T; 3] {
    let n = n.rem_euclid(3) as usize;
    [field[n % 3], field[(1 + n) % 3], field[(2 + n) % 3]]
}

/// 计算节点在给定网格中的本地网格
///
/// 返回（尺寸, 起点, 元素数）。
pub fn calc_local_mesh(
    n_pos: [i32; 3],
    n_grid: [i32; 3],
    mesh: [usize; 3],
    mesh_off: [f64; 3],
) -> ([usize; 3], [i32; 3], usize) {
    let mut loc = [0usize; 3];
    let mut start = [0i32; 3];
    let mut size = 1usize;
    for i in 0..3 {
        let per = mesh[i] as f64 / n_grid[i] as f64;
        let first = (per * n_pos[i] as f64 - mesh_off[i]).ceil() as i32;
        // 上界取 ceil-1: 区间端点恰为整数时归属下一节点, 保证互不重叠
        let last = (per * (n_pos[i] + 1) as f64 - mesh_off[i]).ceil() as i32 - 1;
        start[i] = first;
        loc[i] = (last - first + 1) as usize;
        size *= loc[i];
    }
    (loc, start, size)
}

/// 计算发送（或接收）块
///
/// `pos1/grid1` 节点的本地网格与 `pos2/grid2` 节点本地网格的
/// 交集矩形，相对 `pos1` 本地网格起点表示。返回（块, 元素数）。
pub fn calc_send_block(
    pos1: [i32; 3],
    grid1: [i32; 3],
    pos2: [i32; 3],
    grid2: [i32; 3],
    mesh: [usize; 3],
    mesh_off: [f64; 3],
) -> ([usize; 6], usize) {
    let (mesh1, first1, _) = calc_local_mesh(pos1, grid1, mesh, mesh_off);
    let (mesh2, first2, _) = calc_local_mesh(pos2, grid2, mesh, mesh_off);

    let mut block = [0usize; 6];
    let mut size = 1usize;
    for i in 0..3 {
        let last1 = first1[i] + mesh1[i] as i32 - 1;
        let last2 = first2[i] + mesh2[i] as i32 - 1;
        let lo = first1[i].max(first2[i]) - first1[i];
        let len = (last1.min(last2) - first1[i]) - lo + 1;
        block[i] = lo.max(0) as usize;
        block[i + 3] = len.max(0) as usize;
        size *= block[i + 3];
    }
    (block, size)
}

/// 通信组发现
///
/// 分解变更要求通信：给定两套（逐分量互为整倍数的）节点网格
/// 与 grid1 的线性节点表，计算 grid2 的节点表、各节点在 grid2
/// 中的位置，以及本 rank 的通信组。组按本 rank 在组内的位置
/// 旋转，保证收发配对无需额外会合。
#[allow(clippy::type_complexity)]
pub fn find_comm_groups(
    grid1: [i32; 3],
    grid2: [i32; 3],
    node_list1: &[usize],
    me: usize,
) -> LmResult<(Vec<usize>, Vec<usize>, Vec<[i32; 3]>, [i32; 3])> {
    let n_nodes = node_list1.len();
    if grid1.iter().product::<i32>() != grid2.iter().product::<i32>() {
        return Err(LmError::config("两套节点网格的节点数不一致"));
    }

    let mut s1 = [0i32; 3];
    let mut s2 = [0i32; 3];
    let mut ds = [0i32; 3];
    let mut g_size = 1i32;
    for i in 0..3 {
        s1[i] = grid1[i] / grid2[i];
        if s1[i] == 0 {
            s1[i] = 1;
        } else if grid1[i] != grid2[i] * s1[i] {
            return Err(LmError::config("FFT 节点网格逐分量不兼容"));
        }
        s2[i] = grid2[i] / grid1[i];
        if s2[i] == 0 {
            s2[i] = 1;
        } else if grid2[i] != grid1[i] * s2[i] {
            return Err(LmError::config("FFT 节点网格逐分量不兼容"));
        }
        ds[i] = grid2[i] / s2[i];
        g_size *= s2[i];
    }
    let g_size = g_size as usize;

    let mut node_list2 = vec![0usize; n_nodes];
    let mut pos = vec![[0i32; 3]; n_nodes];
    let mut my_pos = [0i32; 3];
    let mut group = vec![0usize; g_size];
    let mut c_pos: i32 = -1;

    let lin = |p: [i32; 3], g: [i32; 3]| (p[0] + g[0] * (p[1] + g[1] * p[2])) as usize;

    for gz in 0..ds[2] {
        for gy in 0..ds[1] {
            for gx in 0..ds[0] {
                let mut my_group = false;
                let mut i = 0usize;
                while i < g_size {
                    let ii = i as i32;
                    let p1 = [
                        gx * s1[0] + ii % s1[0],
                        gy * s1[1] + (ii / s1[0]) % s1[1],
                        gz * s1[2] + ii / (s1[0] * s1[1]),
                    ];
                    let p2 = [
                        gx * s2[0] + ii % s2[0],
                        gy * s2[1] + (ii / s2[0]) % s2[1],
                        gz * s2[2] + ii / (s2[0] * s2[1]),
                    ];
                    let n = node_list1[lin(p1, grid1)];
                    node_list2[lin(p2, grid2)] = n;
                    pos[n] = p2;
                    if my_group {
                        group[i] = n;
                    }
                    if n == me && !my_group {
                        my_group = true;
                        c_pos = ii;
                        my_pos = p2;
                        i = 0;
                        continue;
                    }
                    i += 1;
                }
            }
        }
    }

    // 组内旋转对齐通信配对
    while c_pos > 0 {
        group.rotate_right(1);
        c_pos -= 1;
    }

    Ok((group, node_list2, pos, my_pos))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calc_2d_grid() {
        assert_eq!(calc_2d_grid(4), [2, 2, 1]);
        assert_eq!(calc_2d_grid(6), [2, 3, 1]);
        assert_eq!(calc_2d_grid(1), [1, 1, 1]);
        assert_eq!(calc_2d_grid(7), [1, 7, 1]);
    }

    #[test]
    fn test_map_grid_exact_match_preferred() {
        let (g, row) = map_3d_to_2d_grid([2, 2, 1], [2, 2, 1]);
        assert_eq!(g, [2, 2, 1]);
        assert_eq!(row, 2);
    }

    #[test]
    fn test_permute3() {
        assert_eq!(permute3([10, 20, 30], 0), [10, 20, 30]);
        assert_eq!(permute3([10, 20, 30], 1), [20, 30, 10]);
        assert_eq!(permute3([10, 20, 30], -1), [30, 10, 20]);
        // 逆排列复合为恒等
        let f = [7, 8, 9];
        assert_eq!(permute3(permute3(f, 2), -2), f);
    }

    #[test]
    fn test_local_mesh_partitions_globally() {
        let mesh = [8, 8, 8];
        let grid = [2, 2, 1];
        let mut total = 0;
        for x in 0..2 {
            for y in 0..2 {
                let (_loc, _start, size) = calc_local_mesh([x, y, 0], grid, mesh, [0.0; 3]);
                total += size;
            }
        }
        assert_eq!(total, 512);
    }

    #[test]
    fn test_send_block_full_overlap_on_self() {
        let mesh = [8, 8, 8];
        let grid = [2, 2, 1];
        let (block, size) = calc_send_block([0, 0, 0], grid, [0, 0, 0], grid, mesh, [0.0; 3]);
        assert_eq!(size, 4 * 4 * 8);
        assert_eq!(&block[..3], &[0, 0, 0]);
        assert_eq!(&block[3..], &[4, 4, 8]);
    }

    #[test]
    fn test_comm_groups_identity() {
        let nodes: Vec<usize> = (0..4).collect();
        let (group, list2, _pos, my_pos) =
            find_comm_groups([2, 2, 1], [2, 2, 1], &nodes, 3).unwrap();
        assert_eq!(group, vec![3]);
        assert_eq!(list2, nodes);
        assert_eq!(my_pos, [1, 1, 0]);
    }

    #[test]
    fn test_comm_groups_block_to_rows() {
        // (2,2,1) → (2,1,2): 每 rank 的组两名成员且包含自身
        let nodes: Vec<usize> = (0..4).collect();
        for me in 0..4 {
            let (group, _l2, _pos, _mp) =
                find_comm_groups([2, 2, 1], [2, 1, 2], &nodes, me).unwrap();
            assert_eq!(group.len(), 2);
            assert!(group.contains(&me));
        }
    }
}
