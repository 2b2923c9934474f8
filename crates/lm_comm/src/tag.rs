// crates/lm_comm/src/tag.rs

//! 消息 tag 约定
//!
//! 幽灵交换与粒子迁移的 tag 由三维位移向量唯一决定；发送方与其
//! 匹配的接收方对同一位移得到相同 tag，无需握手。FFT 与象限搬运
//! 使用独立的固定 tag 空间，不与位移 tag 冲突。

/// 26 个邻居位移，顺序与通信器轮次顺序一致
///
/// (0,0,0) 不是边界，无需发送。
pub const NEIGHBOR_DISPS: [[i32; 3]; 26] = [
    [-1, -1, -1],
    [-1, -1, 0],
    [-1, -1, 1],
    [-1, 0, -1],
    [-1, 0, 0],
    [-1, 0, 1],
    [-1, 1, -1],
    [-1, 1, 0],
    [-1, 1, 1],
    [0, -1, -1],
    [0, -1, 0],
    [0, -1, 1],
    [0, 0, -1],
    [0, 0, 1],
    [0, 1, -1],
    [0, 1, 0],
    [0, 1, 1],
    [1, -1, -1],
    [1, -1, 0],
    [1, -1, 1],
    [1, 0, -1],
    [1, 0, 0],
    [1, 0, 1],
    [1, 1, -1],
    [1, 1, 0],
    [1, 1, 1],
];

/// FFT 前向网格重分布 tag
pub const REQ_FFT_FORW: i32 = 301;
/// FFT 逆向网格重分布 tag
pub const REQ_FFT_BACK: i32 = 302;
/// 八叉树象限负载搬运 tag
pub const REQ_QUAD_TRANSFER: i32 = 400;
/// 八叉树幽灵层镜像交换 tag
pub const REQ_OCTREE_GHOST: i32 = 401;
/// 森林信息同步（树归属环形传递）tag
pub const REQ_FOREST_SYNC: i32 = 402;

/// 位移向量的唯一 tag
///
/// 发送方以位移 `d` 计算，接收方以 `recv = true`（等价于对 `-d`
/// 计算发送 tag），双方得到相同值。值域为 `[0, 222]`。
#[inline]
pub fn displacement_tag(recv: bool, disp: [i32; 3]) -> i32 {
    let sign = if recv { -1 } else { 1 };
    let mut tag = 0;
    for d in disp {
        tag = tag * 10 + (d * sign + 1);
    }
    tag
}

/// 位移在 [`NEIGHBOR_DISPS`] 中的序号
#[inline]
pub fn neighbor_index(disp: [i32; 3]) -> usize {
    NEIGHBOR_DISPS
        .iter()
        .position(|d| *d == disp)
        .expect("位移必须取自 {-1,0,1}^3 且非零")
}
