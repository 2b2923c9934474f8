// crates/lm_comm/src/local.rs

//! 进程内多 rank 通信后端
//!
//! 用线程模拟 rank，信箱模拟点对点消息，供多 rank 场景在
//! `cargo test` 内运行。集合操作通过共享的轮次状态实现：
//! 所有 rank 先贡献，凑齐后统一取走结果，最后一个离开的 rank
//! 复位状态供下一轮使用。

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use lm_foundation::LmResult;

use crate::backend::{reduce_f64_slice, reduce_i64_slice, Communicator, ReduceOp};

type MailKey = (usize, usize, i32); // (src, dst, tag)

struct CollectiveState {
    contrib: Vec<Option<Vec<u8>>>,
    ready: usize,
    result: Option<Arc<Vec<Vec<u8>>>>,
    leaving: usize,
}

struct Shared {
    n: usize,
    mail: Mutex<HashMap<MailKey, VecDeque<Vec<u8>>>>,
    mail_cv: Condvar,
    coll: Mutex<CollectiveState>,
    coll_cv: Condvar,
}

/// 进程内 rank 组
///
/// `LocalUniverse::run(n, f)` 启动 `n` 个线程，每个线程获得一个
/// [`LocalComm`] 并执行 `f`；返回各 rank 的结果（按 rank 排序）。
pub struct LocalUniverse;

impl LocalUniverse {
    /// 以 `n` 个 rank 运行 `f`
    ///
    /// # Panics
    ///
    /// 任一 rank panic 时传播 panic（测试中即断言失败）。
    pub fn run<F, T>(n: usize, f: F) -> Vec<T>
    where
        F: Fn(&LocalComm) -> T + Sync,
        T: Send,
    {
        assert!(n > 0);
        let shared = Arc::new(Shared {
            n,
            mail: Mutex::new(HashMap::new()),
            mail_cv: Condvar::new(),
            coll: Mutex::new(CollectiveState {
                contrib: (0..n).map(|_| None).collect(),
                ready: 0,
                result: None,
                leaving: 0,
            }),
            coll_cv: Condvar::new(),
        });

        let mut out: Vec<Option<T>> = (0..n).map(|_| None).collect();
        std::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(n);
            for rank in 0..n {
                let comm = LocalComm {
                    rank,
                    shared: Arc::clone(&shared),
                };
                let f = &f;
                handles.push(scope.spawn(move || f(&comm)));
            }
            for (rank, h) in handles.into_iter().enumerate() {
                out[rank] = Some(h.join().expect("rank 线程 panic"));
            }
        });
        out.into_iter().map(|v| v.unwrap()).collect()
    }
}

/// 进程内通信后端（单个 rank 的句柄）
pub struct LocalComm {
    rank: usize,
    shared: Arc<Shared>,
}

impl LocalComm {
    /// 全收集：所有 rank 贡献一段字节，返回按 rank 排序的全部贡献
    ///
    /// 所有集合操作（归约 / 扫描 / 栅栏）都建立在本原语之上。
    fn gather_all(&self, bytes: Vec<u8>) -> Arc<Vec<Vec<u8>>> {
        let shared = &self.shared;
        let mut st = shared.coll.lock();

        // 等待上一轮完全清场
        while st.result.is_some() {
            shared.coll_cv.wait(&mut st);
        }

        st.contrib[self.rank] = Some(bytes);
        st.ready += 1;
        if st.ready == shared.n {
            let all: Vec<Vec<u8>> = st.contrib.iter_mut().map(|c| c.take().unwrap()).collect();
            st.result = Some(Arc::new(all));
            shared.coll_cv.notify_all();
        } else {
            while st.result.is_none() {
                shared.coll_cv.wait(&mut st);
            }
        }

        let result = Arc::clone(st.result.as_ref().unwrap());
        st.leaving += 1;
        if st.leaving == shared.n {
            st.ready = 0;
            st.leaving = 0;
            st.result = None;
            shared.coll_cv.notify_all();
        }
        result
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.n
    }

    fn send_bytes(&self, dest: usize, tag: i32, data: &[u8]) -> LmResult<()> {
        let key = (self.rank, dest, tag);
        self.shared
            .mail
            .lock()
            .entry(key)
            .or_default()
            .push_back(data.to_vec());
        self.shared.mail_cv.notify_all();
        Ok(())
    }

    fn recv_bytes(&self, src: usize, tag: i32) -> LmResult<Vec<u8>> {
        let key = (src, self.rank, tag);
        let mut mail = self.shared.mail.lock();
        loop {
            if let Some(msg) = mail.get_mut(&key).and_then(VecDeque::pop_front) {
                return Ok(msg);
            }
            self.shared.mail_cv.wait(&mut mail);
        }
    }

    fn all_reduce_f64(&self, value: f64, op: ReduceOp) -> f64 {
        let all = self.gather_all(value.to_le_bytes().to_vec());
        let values: Vec<f64> = all
            .iter()
            .map(|b| f64::from_le_bytes(b[..8].try_into().unwrap()))
            .collect();
        reduce_f64_slice(&values, op)
    }

    fn all_reduce_i64(&self, value: i64, op: ReduceOp) -> i64 {
        let all = self.gather_all(value.to_le_bytes().to_vec());
        let values: Vec<i64> = all
            .iter()
            .map(|b| i64::from_le_bytes(b[..8].try_into().unwrap()))
            .collect();
        reduce_i64_slice(&values, op)
    }

    fn all_reduce_i64_vec(&self, values: &mut [i64], op: ReduceOp) {
        let mut bytes = Vec::with_capacity(values.len() * 8);
        for v in values.iter() {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let all = self.gather_all(bytes);
        for (i, slot) in values.iter_mut().enumerate() {
            let column: Vec<i64> = all
                .iter()
                .map(|b| i64::from_le_bytes(b[8 * i..8 * i + 8].try_into().unwrap()))
                .collect();
            *slot = reduce_i64_slice(&column, op);
        }
    }

    fn exscan_f64_sum(&self, value: f64) -> f64 {
        let all = self.gather_all(value.to_le_bytes().to_vec());
        all.iter()
            .take(self.rank)
            .map(|b| f64::from_le_bytes(b[..8].try_into().unwrap()))
            .sum()
    }

    fn barrier(&self) {
        self.gather_all(Vec::new());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_to_point_ring() {
        let sums = LocalUniverse::run(4, |comm| {
            let next = (comm.rank() + 1) % 4;
            let prev = (comm.rank() + 3) % 4;
            comm.send_bytes(next, 1, &[comm.rank() as u8]).unwrap();
            let got = comm.recv_bytes(prev, 1).unwrap();
            got[0] as usize
        });
        assert_eq!(sums, vec![3, 0, 1, 2]);
    }

    #[test]
    fn test_message_order_preserved() {
        LocalUniverse::run(2, |comm| {
            if comm.rank() == 0 {
                for i in 0..10u8 {
                    comm.send_bytes(1, 5, &[i]).unwrap();
                }
            } else {
                for i in 0..10u8 {
                    assert_eq!(comm.recv_bytes(0, 5).unwrap(), vec![i]);
                }
            }
        });
    }

    #[test]
    fn test_all_reduce_max() {
        let results = LocalUniverse::run(3, |comm| {
            comm.all_reduce_f64(comm.rank() as f64 * 1.5, ReduceOp::Max)
        });
        assert!(results.iter().all(|&v| v == 3.0));
    }

    #[test]
    fn test_all_reduce_vec_sum() {
        LocalUniverse::run(3, |comm| {
            let mut v = vec![comm.rank() as i64, 1];
            comm.all_reduce_i64_vec(&mut v, ReduceOp::Sum);
            assert_eq!(v, vec![3, 3]);
        });
    }

    #[test]
    fn test_exscan() {
        let prefixes = LocalUniverse::run(4, |comm| comm.exscan_f64_sum(2.0));
        assert_eq!(prefixes, vec![0.0, 2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_repeated_collectives() {
        LocalUniverse::run(3, |comm| {
            for round in 0..20 {
                let s = comm.all_reduce_i64(round, ReduceOp::Sum);
                assert_eq!(s, round * 3);
                comm.barrier();
            }
        });
    }
}
