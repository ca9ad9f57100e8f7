//! A small stepwise byte consumer, generalized from the teacher's
//! `FromBytes`/`require_bytes` idiom (`internal::block`) to a cursor that
//! threads the remaining slice through each step rather than re-deriving
//! sub-slices by hand at every call site.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};

pub struct Cursor<'a> {
    buf: &'a [u8],
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Cursor<'a> {
        Cursor { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() < n {
            return Err(Error::Truncated { wanted: n, available: self.buf.len() });
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    pub fn take_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn take_u16_le(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    pub fn take_u32_le(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub fn take_f32_le(&mut self) -> Result<f32> {
        Ok(LittleEndian::read_f32(self.take(4)?))
    }

    /// Takes a fixed-width text field and strips trailing whitespace and any
    /// trailing NUL bytes, per the channel-descriptor naming rule.
    pub fn take_fixed_str(&mut self, n: usize) -> Result<String> {
        let raw = self.take(n)?;
        Ok(trim_fixed_str(raw))
    }
}

pub fn trim_fixed_str(raw: &[u8]) -> String {
    let end = raw
        .iter()
        .rposition(|&b| b != 0 && !b.is_ascii_whitespace())
        .map(|i| i + 1)
        .unwrap_or(0);
    String::from_utf8_lossy(&raw[..end]).into_owned()
}
