//! Bounds-checked cursor over a byte slice.
//!
//! [`BinaryReader`] is used for the fixed-layout headers in the archive
//! formats (GFLXPACK, the ONEFILE storage header, the binary hash cache).
//! FlatBuffer data goes through [`crate::flatbuffer`] instead.

use byteorder::{ByteOrder, LittleEndian};
use zerocopy::FromBytes;

use crate::{Error, Result};

/// Little-endian reader over a borrowed byte slice.
///
/// # Example
///
/// ```
/// use veles_common::BinaryReader;
///
/// let data = [0x4F, 0x4E, 0x45, 0x00, 0x10, 0x00, 0x00, 0x00];
/// let mut reader = BinaryReader::new(&data);
///
/// reader.expect_magic(b"ONE\0").unwrap();
/// assert_eq!(reader.read_u32().unwrap(), 16);
/// assert!(reader.is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct BinaryReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> BinaryReader<'a> {
    #[inline]
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Create a reader positioned at `position`.
    #[inline]
    pub const fn new_at(data: &'a [u8], position: usize) -> Self {
        Self { data, position }
    }

    #[inline]
    pub const fn position(&self) -> usize {
        self.position
    }

    #[inline]
    pub const fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub const fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.position >= self.data.len()
    }

    /// Seek to an absolute position. Reads past the end fail with EOF.
    #[inline]
    pub fn seek(&mut self, position: usize) {
        self.position = position;
    }

    #[inline]
    pub fn advance(&mut self, count: usize) {
        self.position = self.position.saturating_add(count);
    }

    /// Borrow `count` bytes without moving the cursor.
    #[inline]
    pub fn peek_bytes(&self, count: usize) -> Result<&'a [u8]> {
        let available = self.remaining();
        if available < count {
            return Err(Error::UnexpectedEof {
                needed: count,
                available,
            });
        }
        Ok(&self.data[self.position..self.position + count])
    }

    #[inline]
    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        let bytes = self.peek_bytes(count)?;
        self.position += count;
        Ok(bytes)
    }

    #[inline]
    pub fn read_u8(&mut self) -> Result<u8> {
        self.read_bytes(1).map(|b| b[0])
    }

    #[inline]
    pub fn read_i8(&mut self) -> Result<i8> {
        self.read_u8().map(|b| b as i8)
    }

    #[inline]
    pub fn read_u16(&mut self) -> Result<u16> {
        self.read_bytes(2).map(LittleEndian::read_u16)
    }

    #[inline]
    pub fn read_u32(&mut self) -> Result<u32> {
        self.read_bytes(4).map(LittleEndian::read_u32)
    }

    #[inline]
    pub fn read_i32(&mut self) -> Result<i32> {
        self.read_bytes(4).map(LittleEndian::read_i32)
    }

    #[inline]
    pub fn read_u64(&mut self) -> Result<u64> {
        self.read_bytes(8).map(LittleEndian::read_u64)
    }

    /// Read a 7-bit-encoded variable-length integer (LEB128, max 5 bytes).
    pub fn read_varint_u32(&mut self) -> Result<u32> {
        let mut value = 0u32;
        for shift in (0..35).step_by(7) {
            let byte = self.read_u8()?;
            value |= u32::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(Error::ExpectedValue {
            expected: "varint of at most 5 bytes".to_string(),
            actual: "unterminated varint".to_string(),
        })
    }

    /// Read a UTF-8 string of exactly `length` bytes.
    pub fn read_string(&mut self, length: usize) -> Result<&'a str> {
        let bytes = self.read_bytes(length)?;
        std::str::from_utf8(bytes).map_err(Error::Utf8)
    }

    /// Read a fixed-layout struct via zerocopy.
    #[inline]
    pub fn read_struct<T: FromBytes>(&mut self) -> Result<T> {
        let size = std::mem::size_of::<T>();
        let bytes = self.read_bytes(size)?;
        T::read_from_bytes(bytes).map_err(|_| Error::UnexpectedEof {
            needed: size,
            available: bytes.len(),
        })
    }

    /// Consume `expected.len()` bytes and fail unless they equal `expected`.
    pub fn expect_magic(&mut self, expected: &[u8]) -> Result<()> {
        let actual = self.read_bytes(expected.len())?;
        if actual != expected {
            return Err(Error::InvalidMagic {
                expected: expected.to_vec(),
                actual: actual.to_vec(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_primitives() {
        let data = [
            0x01u8, 0x02, // u16
            0xFF, 0xFF, 0xFF, 0xFF, // i32 -1
            0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01, // u64
        ];
        let mut reader = BinaryReader::new(&data);

        assert_eq!(reader.read_u16().unwrap(), 0x0201);
        assert_eq!(reader.read_i32().unwrap(), -1);
        assert_eq!(reader.read_u64().unwrap(), 0x0102030405060708);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_varint() {
        let data = [0x05, 0xAC, 0x02, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
        let mut reader = BinaryReader::new(&data);

        assert_eq!(reader.read_varint_u32().unwrap(), 5);
        assert_eq!(reader.read_varint_u32().unwrap(), 300);
        assert!(reader.read_varint_u32().is_err());
    }

    #[test]
    fn test_magic_mismatch() {
        let mut reader = BinaryReader::new(b"GFLXPACX");
        assert!(matches!(
            reader.expect_magic(b"GFLXPACK"),
            Err(Error::InvalidMagic { .. })
        ));
    }

    #[test]
    fn test_eof_error() {
        let data = [0x01, 0x02];
        let mut reader = BinaryReader::new(&data);

        assert!(matches!(
            reader.read_u32(),
            Err(Error::UnexpectedEof { needed: 4, available: 2 })
        ));
    }
}
