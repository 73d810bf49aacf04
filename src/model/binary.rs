//! 带边界检查的二进制读取
//!
//! 每次定长读取前都先检查剩余长度，失败时返回 `Truncated`，
//! 不会越过缓冲区末尾。

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};
use glam::{Vec2, Vec3};

use crate::DecodeError;

pub(crate) struct ByteReader<'a> {
    cursor: Cursor<&'a [u8]>,
    section: &'static str,
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(bytes),
            section: "header",
        }
    }

    /// 切换当前段名（用于错误信息）
    #[inline]
    pub fn section(&mut self, section: &'static str) {
        self.section = section;
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.cursor.position() as usize
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.cursor.get_ref().len().saturating_sub(self.position())
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn truncated(&self) -> DecodeError {
        DecodeError::Truncated {
            section: self.section,
            offset: self.position(),
        }
    }

    /// 确认剩余长度足够
    #[inline]
    pub fn ensure(&self, len: usize) -> Result<(), DecodeError> {
        if self.remaining() < len {
            Err(self.truncated())
        } else {
            Ok(())
        }
    }

    /// 确认 `count` 个 `stride` 字节的记录都在缓冲区内（分配前调用）
    pub fn ensure_records(&self, count: usize, stride: usize) -> Result<(), DecodeError> {
        match count.checked_mul(stride) {
            Some(total) => self.ensure(total),
            None => Err(self.truncated()),
        }
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        self.ensure(1)?;
        self.cursor.read_u8().map_err(|_| self.truncated())
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        self.ensure(2)?;
        self.cursor
            .read_u16::<LittleEndian>()
            .map_err(|_| self.truncated())
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        self.ensure(4)?;
        self.cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| self.truncated())
    }

    pub fn read_f32(&mut self) -> Result<f32, DecodeError> {
        self.ensure(4)?;
        self.cursor
            .read_f32::<LittleEndian>()
            .map_err(|_| self.truncated())
    }

    pub fn read_vec2(&mut self) -> Result<Vec2, DecodeError> {
        self.ensure(8)?;
        Ok(Vec2::new(self.read_f32()?, self.read_f32()?))
    }

    pub fn read_vec3(&mut self) -> Result<Vec3, DecodeError> {
        self.ensure(12)?;
        Ok(Vec3::new(self.read_f32()?, self.read_f32()?, self.read_f32()?))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        self.ensure(len)?;
        let start = self.position();
        let bytes = &self.cursor.get_ref()[start..start + len];
        self.cursor.set_position((start + len) as u64);
        Ok(bytes)
    }

    pub fn skip(&mut self, len: usize) -> Result<(), DecodeError> {
        self.read_bytes(len).map(|_| ())
    }

    /// 读取定长 Shift-JIS 字符串
    pub fn read_fixed_string(&mut self, len: usize) -> Result<String, DecodeError> {
        let bytes = self.read_bytes(len)?;
        Ok(decode_shift_jis(bytes))
    }
}

/// 解码 Shift-JIS 字符串（截断到第一个 NUL）
pub(crate) fn decode_shift_jis(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    let (decoded, _, _) = encoding_rs::SHIFT_JIS.decode(&bytes[..end]);
    decoded.into_owned()
}

/// 编码为定长 Shift-JIS（测试夹具用）
#[cfg(test)]
pub(crate) fn encode_shift_jis_fixed(text: &str, len: usize) -> Vec<u8> {
    let (encoded, _, _) = encoding_rs::SHIFT_JIS.encode(text);
    let mut out = vec![0u8; len];
    let n = encoded.len().min(len);
    out[..n].copy_from_slice(&encoded[..n]);
    out
}
