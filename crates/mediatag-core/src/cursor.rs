//! 带边界检查的字节游标.
//!
//! 所有解码器都通过 [`ByteCursor`] 读取多字节字段. 任何越界读取都返回
//! [`TagError::Truncated`], 绝不 panic, 也不会产生回绕的长度.
//!
//! [`RawBuffer`] 是一次解析调用独占的不可变输入缓冲区.

use std::ops::Range;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use bytes::Bytes;

use crate::{TagError, TagResult};

/// 不可变输入缓冲区
///
/// 克隆只增加引用计数, 便于解同步后的数据再交给其他解码器.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBuffer {
    data: Bytes,
}

impl RawBuffer {
    /// 从已有数据创建
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    /// 复制切片创建
    pub fn copy_from_slice(data: &[u8]) -> Self {
        Self {
            data: Bytes::copy_from_slice(data),
        }
    }

    /// 数据长度
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 底层字节
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// 截取子缓冲区 (越界部分被裁掉)
    pub fn slice(&self, range: Range<usize>) -> Self {
        let end = range.end.min(self.data.len());
        let start = range.start.min(end);
        Self {
            data: self.data.slice(start..end),
        }
    }

    /// 创建游标
    pub fn cursor(&self) -> ByteCursor<'_> {
        ByteCursor::new(&self.data)
    }
}

impl AsRef<[u8]> for RawBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

/// 字节游标
///
/// `base` 记录切片在原始文件中的偏移, 错误信息中的偏移均为绝对偏移.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    /// 源数据
    data: &'a [u8],
    /// 当前读取位置
    pos: usize,
    /// 源数据在文件中的起始偏移
    base: usize,
}

impl<'a> ByteCursor<'a> {
    /// 创建游标
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            base: 0,
        }
    }

    /// 创建带文件偏移的游标
    pub fn with_base(data: &'a [u8], base: usize) -> Self {
        Self { data, pos: 0, base }
    }

    /// 当前位置 (相对本游标)
    pub fn position(&self) -> usize {
        self.pos
    }

    /// 当前位置在文件中的绝对偏移
    pub fn absolute_position(&self) -> usize {
        self.base + self.pos
    }

    /// 数据总长度
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 剩余可读字节数
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// 是否已读完
    pub fn is_eof(&self) -> bool {
        self.remaining() == 0
    }

    /// 底层数据
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// 剩余数据 (不移动位置)
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.pos.min(self.data.len())..]
    }

    fn truncated(&self, needed: usize) -> TagError {
        TagError::Truncated {
            offset: self.absolute_position(),
            needed,
            available: self.remaining(),
        }
    }

    /// 确认至少还有 `n` 字节
    pub fn ensure(&self, n: usize) -> TagResult<()> {
        if n > self.remaining() {
            return Err(self.truncated(n));
        }
        Ok(())
    }

    /// 定位到相对位置
    pub fn seek(&mut self, pos: usize) -> TagResult<()> {
        if pos > self.data.len() {
            return Err(TagError::Truncated {
                offset: self.base + pos,
                needed: pos - self.data.len(),
                available: 0,
            });
        }
        self.pos = pos;
        Ok(())
    }

    /// 跳过指定字节数
    pub fn skip(&mut self, count: usize) -> TagResult<()> {
        self.ensure(count)?;
        self.pos += count;
        Ok(())
    }

    /// 跳过至多 `count` 字节, 返回实际跳过数
    pub fn skip_saturating(&mut self, count: usize) -> usize {
        let n = count.min(self.remaining());
        self.pos += n;
        n
    }

    // ========================
    // 读取方法
    // ========================

    /// 读取指定数量的字节 (零拷贝)
    pub fn read_bytes(&mut self, count: usize) -> TagResult<&'a [u8]> {
        self.ensure(count)?;
        let slice = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    /// 读取至多 `count` 字节
    pub fn read_bytes_saturating(&mut self, count: usize) -> &'a [u8] {
        let n = count.min(self.remaining());
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        slice
    }

    /// 窥视指定数量的字节 (不移动位置)
    pub fn peek_bytes(&self, count: usize) -> TagResult<&'a [u8]> {
        self.ensure(count)?;
        Ok(&self.data[self.pos..self.pos + count])
    }

    /// 读取定长数组
    pub fn read_array<const N: usize>(&mut self) -> TagResult<[u8; N]> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.read_bytes(N)?);
        Ok(buf)
    }

    /// 读取 4 字节标签 (FourCC)
    pub fn read_tag(&mut self) -> TagResult<[u8; 4]> {
        self.read_array::<4>()
    }

    /// 读取子游标: 取出接下来的 `count` 字节, 自身前进
    pub fn sub_cursor(&mut self, count: usize) -> TagResult<ByteCursor<'a>> {
        let base = self.absolute_position();
        let slice = self.read_bytes(count)?;
        Ok(ByteCursor::with_base(slice, base))
    }

    /// 读取以 NUL 结尾的字节串 (不含 NUL); 无 NUL 时读到末尾
    pub fn read_cstr(&mut self) -> &'a [u8] {
        let rest = self.rest();
        match rest.iter().position(|&b| b == 0) {
            Some(idx) => {
                self.pos += idx + 1;
                &rest[..idx]
            }
            None => {
                self.pos += rest.len();
                rest
            }
        }
    }

    /// 读取 1 个字节
    pub fn read_u8(&mut self) -> TagResult<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    /// 读取 i8
    pub fn read_i8(&mut self) -> TagResult<i8> {
        Ok(self.read_u8()? as i8)
    }

    /// 读取 u16 大端
    pub fn read_u16_be(&mut self) -> TagResult<u16> {
        Ok(BigEndian::read_u16(self.read_bytes(2)?))
    }

    /// 读取 u16 小端
    pub fn read_u16_le(&mut self) -> TagResult<u16> {
        Ok(LittleEndian::read_u16(self.read_bytes(2)?))
    }

    /// 读取 i16 大端
    pub fn read_i16_be(&mut self) -> TagResult<i16> {
        Ok(BigEndian::read_i16(self.read_bytes(2)?))
    }

    /// 读取 i16 小端
    pub fn read_i16_le(&mut self) -> TagResult<i16> {
        Ok(LittleEndian::read_i16(self.read_bytes(2)?))
    }

    /// 读取 u24 大端 (3 字节无符号整数)
    pub fn read_u24_be(&mut self) -> TagResult<u32> {
        Ok(BigEndian::read_u24(self.read_bytes(3)?))
    }

    /// 读取 u32 大端
    pub fn read_u32_be(&mut self) -> TagResult<u32> {
        Ok(BigEndian::read_u32(self.read_bytes(4)?))
    }

    /// 读取 u32 小端
    pub fn read_u32_le(&mut self) -> TagResult<u32> {
        Ok(LittleEndian::read_u32(self.read_bytes(4)?))
    }

    /// 读取 i32 大端
    pub fn read_i32_be(&mut self) -> TagResult<i32> {
        Ok(BigEndian::read_i32(self.read_bytes(4)?))
    }

    /// 读取 i32 小端
    pub fn read_i32_le(&mut self) -> TagResult<i32> {
        Ok(LittleEndian::read_i32(self.read_bytes(4)?))
    }

    /// 读取 u64 大端
    pub fn read_u64_be(&mut self) -> TagResult<u64> {
        Ok(BigEndian::read_u64(self.read_bytes(8)?))
    }

    /// 读取 u64 小端
    pub fn read_u64_le(&mut self) -> TagResult<u64> {
        Ok(LittleEndian::read_u64(self.read_bytes(8)?))
    }

    /// 读取 i64 小端
    pub fn read_i64_le(&mut self) -> TagResult<i64> {
        Ok(LittleEndian::read_i64(self.read_bytes(8)?))
    }

    /// 读取 i64 大端
    pub fn read_i64_be(&mut self) -> TagResult<i64> {
        Ok(BigEndian::read_i64(self.read_bytes(8)?))
    }

    /// 读取 f32 大端
    pub fn read_f32_be(&mut self) -> TagResult<f32> {
        Ok(BigEndian::read_f32(self.read_bytes(4)?))
    }

    /// 读取 f32 小端
    pub fn read_f32_le(&mut self) -> TagResult<f32> {
        Ok(LittleEndian::read_f32(self.read_bytes(4)?))
    }

    /// 读取 f64 大端
    pub fn read_f64_be(&mut self) -> TagResult<f64> {
        Ok(BigEndian::read_f64(self.read_bytes(8)?))
    }

    /// 读取 f64 小端
    pub fn read_f64_le(&mut self) -> TagResult<f64> {
        Ok(LittleEndian::read_f64(self.read_bytes(8)?))
    }

    /// 读取 syncsafe 整数 (4 字节, 每字节低 7 位)
    pub fn read_syncsafe_u32(&mut self) -> TagResult<u32> {
        let bytes = self.read_array::<4>()?;
        Ok(decode_syncsafe(bytes))
    }
}

/// 解码 syncsafe 整数
///
/// 每字节的最高位被忽略, 结果不超过 2^28-1.
pub fn decode_syncsafe(bytes: [u8; 4]) -> u32 {
    bytes
        .iter()
        .fold(0u32, |acc, &b| (acc << 7) | u32::from(b & 0x7F))
}

/// 编码 syncsafe 整数 (高于 2^28-1 的位被丢弃)
pub fn encode_syncsafe(value: u32) -> [u8; 4] {
    [
        ((value >> 21) & 0x7F) as u8,
        ((value >> 14) & 0x7F) as u8,
        ((value >> 7) & 0x7F) as u8,
        (value & 0x7F) as u8,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_大小端读取() {
        let data = [0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC, 0xDE, 0xF0];
        let mut c = ByteCursor::new(&data);
        assert_eq!(c.read_u16_be().unwrap(), 0x1234);
        assert_eq!(c.read_u16_le().unwrap(), 0x7856);
        assert_eq!(c.read_u32_be().unwrap(), 0x9ABCDEF0);
        assert!(c.is_eof());

        let mut c = ByteCursor::new(&data);
        assert_eq!(c.read_u24_be().unwrap(), 0x123456);
        assert_eq!(c.remaining(), 5);
    }

    #[test]
    fn test_越界返回截断错误() {
        let data = [1u8, 2, 3];
        let mut c = ByteCursor::with_base(&data, 100);
        c.read_u8().unwrap();
        let err = c.read_u32_le().unwrap_err();
        match err {
            TagError::Truncated {
                offset,
                needed,
                available,
            } => {
                assert_eq!(offset, 101);
                assert_eq!(needed, 4);
                assert_eq!(available, 2);
            }
            other => panic!("意外的错误: {other:?}"),
        }
        // 失败的读取不移动位置
        assert_eq!(c.position(), 1);
    }

    #[test]
    fn test_子游标与绝对偏移() {
        let data = [0u8, 1, 2, 3, 4, 5];
        let mut c = ByteCursor::with_base(&data, 10);
        c.skip(2).unwrap();
        let mut sub = c.sub_cursor(3).unwrap();
        assert_eq!(sub.absolute_position(), 12);
        assert_eq!(sub.read_u8().unwrap(), 2);
        assert_eq!(c.position(), 5);
        assert!(c.sub_cursor(2).is_err());
    }

    #[test]
    fn test_cstr_读取() {
        let data = b"abc\0def";
        let mut c = ByteCursor::new(data);
        assert_eq!(c.read_cstr(), b"abc");
        assert_eq!(c.read_cstr(), b"def");
        assert!(c.is_eof());
    }

    #[test]
    fn test_syncsafe_编解码() {
        assert_eq!(decode_syncsafe([0x00, 0x00, 0x02, 0x01]), 257);
        assert_eq!(decode_syncsafe([0xFF, 0xFF, 0xFF, 0xFF]), (1 << 28) - 1);
        assert_eq!(encode_syncsafe(257), [0x00, 0x00, 0x02, 0x01]);
        assert_eq!(decode_syncsafe(encode_syncsafe(0x0ABC_DEF)), 0x0ABC_DEF);
    }

    #[test]
    fn test_raw_buffer_切片() {
        let buf = RawBuffer::new(vec![1u8, 2, 3, 4]);
        let sub = buf.slice(1..10);
        assert_eq!(sub.as_slice(), &[2, 3, 4]);
        assert_eq!(buf.slice(5..8).len(), 0);
        let mut c = sub.cursor();
        assert_eq!(c.read_u8().unwrap(), 2);
    }
}
