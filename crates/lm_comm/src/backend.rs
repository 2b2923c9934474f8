// crates/lm_comm/src/backend.rs

//! 通信后端抽象与单进程实现

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use lm_foundation::{LmError, LmResult};

/// 归约操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    /// 最小值
    Min,
    /// 最大值
    Max,
    /// 求和
    Sum,
}

impl ReduceOp {
    #[inline]
    fn fold_f64(self, a: f64, b: f64) -> f64 {
        match self {
            Self::Min => a.min(b),
            Self::Max => a.max(b),
            Self::Sum => a + b,
        }
    }

    #[inline]
    fn fold_i64(self, a: i64, b: i64) -> i64 {
        match self {
            Self::Min => a.min(b),
            Self::Max => a.max(b),
            Self::Sum => a + b,
        }
    }
}

/// 进程间通信抽象
///
/// 实现必须保证：同一 `(src, dst, tag)` 三元组上的消息按发送顺序
/// 交付；`send_bytes` 不等待匹配接收。
pub trait Communicator: Send + Sync {
    /// 本进程 rank
    fn rank(&self) -> usize;

    /// rank 总数
    fn size(&self) -> usize;

    /// 缓冲发送一段字节到 `dest`
    fn send_bytes(&self, dest: usize, tag: i32, data: &[u8]) -> LmResult<()>;

    /// 阻塞接收来自 `src` 的匹配消息
    fn recv_bytes(&self, src: usize, tag: i32) -> LmResult<Vec<u8>>;

    /// 标量浮点全归约
    fn all_reduce_f64(&self, value: f64, op: ReduceOp) -> f64;

    /// 标量整数全归约
    fn all_reduce_i64(&self, value: i64, op: ReduceOp) -> i64;

    /// 就地向量整数全归约
    fn all_reduce_i64_vec(&self, values: &mut [i64], op: ReduceOp);

    /// 浮点求和独占前缀扫描（rank 0 得 0）
    fn exscan_f64_sum(&self, value: f64) -> f64;

    /// 同步栅栏
    fn barrier(&self);
}

// ============================================================
// 单进程实现
// ============================================================

/// 单进程通信后端
///
/// 归约与扫描按单 rank 语义原样返回；自发自收经内部信箱，
/// 因此"先发后收"的协议在单 rank 下同样成立。
#[derive(Default)]
pub struct SerialComm {
    mailbox: Mutex<HashMap<i32, VecDeque<Vec<u8>>>>,
}

impl SerialComm {
    /// 创建单进程后端
    pub fn new() -> Self {
        Self::default()
    }
}

impl Communicator for SerialComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn send_bytes(&self, dest: usize, tag: i32, data: &[u8]) -> LmResult<()> {
        if dest != 0 {
            return Err(LmError::communication(
                0,
                format!("单进程后端收到发往 rank {} 的消息", dest),
            ));
        }
        self.mailbox
            .lock()
            .entry(tag)
            .or_default()
            .push_back(data.to_vec());
        Ok(())
    }

    fn recv_bytes(&self, src: usize, tag: i32) -> LmResult<Vec<u8>> {
        if src != 0 {
            return Err(LmError::communication(
                0,
                format!("单进程后端请求接收 rank {} 的消息", src),
            ));
        }
        self.mailbox
            .lock()
            .get_mut(&tag)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| {
                LmError::communication(0, format!("tag {} 上没有待接收的自发消息", tag))
            })
    }

    fn all_reduce_f64(&self, value: f64, _op: ReduceOp) -> f64 {
        value
    }

    fn all_reduce_i64(&self, value: i64, _op: ReduceOp) -> i64 {
        value
    }

    fn all_reduce_i64_vec(&self, _values: &mut [i64], _op: ReduceOp) {
        // 单 rank：向量已是全局值
    }

    fn exscan_f64_sum(&self, _value: f64) -> f64 {
        0.0
    }

    fn barrier(&self) {}
}

pub(crate) use fold_impl::*;

mod fold_impl {
    use super::ReduceOp;

    /// 按 rank 顺序折叠各 rank 的标量贡献
    pub fn reduce_f64_slice(values: &[f64], op: ReduceOp) -> f64 {
        let mut acc = values[0];
        for &v in &values[1..] {
            acc = op.fold_f64(acc, v);
        }
        acc
    }

    /// 按 rank 顺序折叠各 rank 的整数贡献
    pub fn reduce_i64_slice(values: &[i64], op: ReduceOp) -> i64 {
        let mut acc = values[0];
        for &v in &values[1..] {
            acc = op.fold_i64(acc, v);
        }
        acc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_identity_reductions() {
        let comm = SerialComm::new();
        assert_eq!(comm.all_reduce_f64(42.0, ReduceOp::Max), 42.0);
        assert_eq!(comm.all_reduce_i64(-3, ReduceOp::Sum), -3);
        assert_eq!(comm.exscan_f64_sum(5.0), 0.0);
    }

    #[test]
    fn test_serial_self_messaging_in_order() {
        let comm = SerialComm::new();
        comm.send_bytes(0, 7, &[1, 2]).unwrap();
        comm.send_bytes(0, 7, &[3]).unwrap();
        assert_eq!(comm.recv_bytes(0, 7).unwrap(), vec![1, 2]);
        assert_eq!(comm.recv_bytes(0, 7).unwrap(), vec![3]);
    }

    #[test]
    fn test_serial_recv_without_send_is_error() {
        let comm = SerialComm::new();
        assert!(comm.recv_bytes(0, 9).is_err());
    }

    #[test]
    fn test_serial_rejects_remote_rank() {
        let comm = SerialComm::new();
        assert!(comm.send_bytes(1, 0, &[0]).is_err());
    }
}
