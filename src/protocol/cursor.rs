use bytes::{Buf, Bytes};

use crate::core::{FramingError, Result};

/// Bounds-checked reader over a received payload
///
/// Every read either returns the requested field and advances, or fails with
/// [`FramingError::Truncated`] and leaves the cursor where it was.
#[derive(Debug, Clone)]
pub struct FieldReader {
    buf: Bytes,
}

impl FieldReader {
    /// Creates a reader over the given bytes
    pub fn new(buf: impl Into<Bytes>) -> Self {
        FieldReader { buf: buf.into() }
    }

    /// Number of unread bytes
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn ensure(&self, needed: usize) -> Result<()> {
        if self.buf.remaining() < needed {
            return Err(FramingError::Truncated {
                needed,
                remaining: self.buf.remaining(),
            }
            .into());
        }
        Ok(())
    }

    /// Reads one byte
    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    /// Reads a big-endian 16-bit value
    pub fn read_u16(&mut self) -> Result<u16> {
        self.ensure(2)?;
        Ok(self.buf.get_u16())
    }

    /// Reads exactly `len` bytes
    pub fn read_bytes(&mut self, len: usize) -> Result<Bytes> {
        self.ensure(len)?;
        Ok(self.buf.split_to(len))
    }

    /// Skips `len` bytes
    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.ensure(len)?;
        self.buf.advance(len);
        Ok(())
    }

    /// Reads a field preceded by its big-endian 16-bit length
    pub fn read_length_prefixed(&mut self) -> Result<Bytes> {
        self.ensure(2)?;
        let len = u16::from_be_bytes([self.buf[0], self.buf[1]]) as usize;
        self.ensure(2 + len)?;
        self.buf.advance(2);
        Ok(self.buf.split_to(len))
    }

    /// Reads bytes up to a NUL byte and consumes the terminator
    pub fn read_nul_terminated(&mut self) -> Result<Bytes> {
        let end = self
            .buf
            .iter()
            .position(|&b| b == 0)
            .ok_or(FramingError::Unterminated)?;
        let field = self.buf.split_to(end);
        self.buf.advance(1);
        Ok(field)
    }

    /// Reads an unsigned LEB128 varint of at most 32 bits
    pub fn read_varint(&mut self) -> Result<u32> {
        let mut value: u32 = 0;
        for (i, &byte) in self.buf.iter().enumerate().take(5) {
            let bits = (byte & 0x7f) as u32;
            if i == 4 && bits > 0x0f {
                return Err(FramingError::BadVarint.into());
            }
            value |= bits << (7 * i);
            if byte & 0x80 == 0 {
                self.buf.advance(i + 1);
                return Ok(value);
            }
        }
        if self.buf.remaining() < 5 {
            return Err(FramingError::Truncated {
                needed: self.buf.remaining() + 1,
                remaining: self.buf.remaining(),
            }
            .into());
        }
        Err(FramingError::BadVarint.into())
    }

    /// Takes every unread byte
    pub fn read_remainder(&mut self) -> Bytes {
        self.buf.split_off(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Error;

    #[test]
    fn test_fixed_width_reads() {
        let mut reader = FieldReader::new(vec![0x03, 0x02, 0xdc, 0x08]);
        assert_eq!(reader.read_u8().unwrap(), 0x03);
        assert_eq!(reader.read_u16().unwrap(), 0x02dc);
        assert_eq!(reader.remaining(), 1);

        let err = reader.read_u16().unwrap_err();
        assert!(matches!(
            err,
            Error::Framing(FramingError::Truncated { needed: 2, remaining: 1 })
        ));
        // a failed read does not consume anything
        assert_eq!(reader.read_u8().unwrap(), 0x08);
    }

    #[test]
    fn test_length_prefixed() {
        let mut reader = FieldReader::new(&b"\x00\x03abc\x00\x00rest"[..]);
        assert_eq!(&reader.read_length_prefixed().unwrap()[..], b"abc");
        assert!(reader.read_length_prefixed().unwrap().is_empty());
        assert_eq!(&reader.read_remainder()[..], b"rest");
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_length_prefixed_overrun() {
        let mut reader = FieldReader::new(&b"\x00\x09abc"[..]);
        assert!(reader.read_length_prefixed().is_err());
        assert_eq!(reader.remaining(), 5);
    }

    #[test]
    fn test_nul_terminated() {
        let mut reader = FieldReader::new(&b"api.gizwits.com:80\x004.0.8\x00"[..]);
        assert_eq!(&reader.read_nul_terminated().unwrap()[..], b"api.gizwits.com:80");
        assert_eq!(&reader.read_nul_terminated().unwrap()[..], b"4.0.8");
        assert!(matches!(
            reader.read_nul_terminated(),
            Err(Error::Framing(FramingError::Unterminated))
        ));
    }

    #[test]
    fn test_varint() {
        assert_eq!(FieldReader::new(vec![0x68]).read_varint().unwrap(), 0x68);
        assert_eq!(FieldReader::new(vec![0xac, 0x02]).read_varint().unwrap(), 300);

        let mut reader = FieldReader::new(vec![0x80]);
        assert!(matches!(
            reader.read_varint(),
            Err(Error::Framing(FramingError::Truncated { .. }))
        ));
        assert_eq!(reader.remaining(), 1);
    }
}
