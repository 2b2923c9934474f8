// crates/lm_halo/src/wire.rs

//! 线格式读写游标
//!
//! 幽灵与迁移消息的字节缓冲顺序读写。所有多字节值为小端序，
//! 写入顺序即读取顺序，无对齐要求。

use lm_foundation::{LmError, LmResult};

/// 顺序写游标
#[derive(Debug, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    /// 新建空缓冲
    pub fn new() -> Self {
        Self::default()
    }

    /// 取出缓冲
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// 写 u32
    #[inline]
    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// 写 i32
    #[inline]
    pub fn put_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// 写 f64
    #[inline]
    pub fn put_f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// 写 f64 序列
    #[inline]
    pub fn put_f64s(&mut self, vs: &[f64]) {
        for &v in vs {
            self.put_f64(v);
        }
    }

    /// 写 i32 序列
    #[inline]
    pub fn put_i32s(&mut self, vs: &[i32]) {
        for &v in vs {
            self.put_i32(v);
        }
    }

    /// 写原始字节
    #[inline]
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }
}

/// 顺序读游标
pub struct Reader<'a> {
    buf: &'a [u8],
    at: usize,
}

impl<'a> Reader<'a> {
    /// 包装字节缓冲
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, at: 0 }
    }

    /// 剩余字节数
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.at
    }

    fn take(&mut self, n: usize) -> LmResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(LmError::inconsistency(format!(
                "消息过短: 需要 {} 字节, 剩余 {}",
                n,
                self.remaining()
            )));
        }
        let slice = &self.buf[self.at..self.at + n];
        self.at += n;
        Ok(slice)
    }

    /// 读 u32
    #[inline]
    pub fn get_u32(&mut self) -> LmResult<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    /// 读 i32
    #[inline]
    pub fn get_i32(&mut self) -> LmResult<i32> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    /// 读 f64
    #[inline]
    pub fn get_f64(&mut self) -> LmResult<f64> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    /// 读 `N` 个 f64
    pub fn get_f64_array<const N: usize>(&mut self) -> LmResult<[f64; N]> {
        let mut out = [0.0; N];
        for slot in out.iter_mut() {
            *slot = self.get_f64()?;
        }
        Ok(out)
    }

    /// 读 `n` 个 i32
    pub fn get_i32_vec(&mut self, n: usize) -> LmResult<Vec<i32>> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(self.get_i32()?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let mut w = Writer::new();
        w.put_u32(7);
        w.put_f64s(&[1.5, -2.0]);
        w.put_i32(-3);
        let bytes = w.into_bytes();

        let mut r = Reader::new(&bytes);
        assert_eq!(r.get_u32().unwrap(), 7);
        assert_eq!(r.get_f64_array::<2>().unwrap(), [1.5, -2.0]);
        assert_eq!(r.get_i32().unwrap(), -3);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_short_read_is_error() {
        let mut r = Reader::new(&[0, 1]);
        assert!(r.get_u32().is_err());
    }
}
