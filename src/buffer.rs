//! Buffer codec (component B).
//!
//! Little-endian primitive reads/writes over bounded byte buffers. Every
//! read is checked against the remaining length so a truncated source
//! produces `PredictError::Truncated` rather than a panic.

use crate::error::{PredictError, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

pub struct Reader<'a> {
    cursor: Cursor<&'a [u8]>,
    len: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Reader {
            len: data.len(),
            cursor: Cursor::new(data),
        }
    }

    pub fn position(&self) -> u64 {
        self.cursor.position()
    }

    pub fn remaining(&self) -> usize {
        self.len.saturating_sub(self.cursor.position() as usize)
    }

    pub fn is_at_end(&self) -> bool {
        self.remaining() == 0
    }

    fn need(&self, n: usize) -> Result<()> {
        if self.remaining() < n {
            return Err(PredictError::Truncated(format!(
                "need {} bytes, only {} remain",
                n,
                self.remaining()
            )));
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.need(1)?;
        Ok(self.cursor.read_u8()?)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.need(2)?;
        Ok(self.cursor.read_u16::<LittleEndian>()?)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.need(4)?;
        Ok(self.cursor.read_u32::<LittleEndian>()?)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.need(8)?;
        Ok(self.cursor.read_u64::<LittleEndian>()?)
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        self.need(n)?;
        let mut buf = vec![0u8; n];
        std::io::Read::read_exact(&mut self.cursor, &mut buf)?;
        Ok(buf)
    }

    /// Returns `true` without consuming input when no bytes remain.
    pub fn eof(&self) -> bool {
        self.remaining() == 0
    }
}

pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Writer { buf: Vec::new() }
    }

    pub fn write_u16(&mut self, v: u16) {
        let _ = self.buf.write_u16::<LittleEndian>(v);
    }

    pub fn write_u32(&mut self, v: u32) {
        let _ = self.buf.write_u32::<LittleEndian>(v);
    }

    pub fn write_u64(&mut self, v: u64) {
        let _ = self.buf.write_u64::<LittleEndian>(v);
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

impl Default for Writer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_match_writes() {
        let mut w = Writer::new();
        w.write_u16(0xabcd);
        w.write_u32(0xdead_beef);
        w.write_bytes(b"hello");
        let bytes = w.into_vec();

        let mut r = Reader::new(&bytes);
        assert_eq!(r.read_u16().unwrap(), 0xabcd);
        assert_eq!(r.read_u32().unwrap(), 0xdead_beef);
        assert_eq!(r.read_bytes(5).unwrap(), b"hello");
        assert!(r.is_at_end());
    }

    #[test]
    fn short_read_is_truncated_error() {
        let bytes = [0u8; 2];
        let mut r = Reader::new(&bytes);
        assert!(matches!(r.read_u32(), Err(PredictError::Truncated(_))));
    }
}
