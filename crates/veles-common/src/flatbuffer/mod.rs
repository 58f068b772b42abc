//! Minimal FlatBuffer table reader.
//!
//! Only the subset used by the archive and model schemas is supported:
//! tables located through a vtable, inline scalars, strings, byte vectors,
//! scalar vectors, and vectors of strings or tables. There is no generated
//! code; callers address fields by their schema index.
//!
//! Every offset is bounds-checked. A field whose vtable slot is missing or
//! zero is absent and reads as the caller's default (or `None` / empty).

mod builder;

pub use builder::{FlatBufferBuilder, TableBuilder};

use std::ops::Range;

use byteorder::{ByteOrder, LittleEndian};

use crate::{Error, Result};

fn malformed(msg: impl Into<String>) -> Error {
    Error::MalformedFlatBuffer(msg.into())
}

fn slice_at(buf: &[u8], pos: usize, len: usize) -> Result<&[u8]> {
    pos.checked_add(len)
        .and_then(|end| buf.get(pos..end))
        .ok_or_else(|| malformed(format!("read of {len} bytes at {pos:#x} past end {:#x}", buf.len())))
}

fn u32_at(buf: &[u8], pos: usize) -> Result<u32> {
    slice_at(buf, pos, 4).map(LittleEndian::read_u32)
}

/// Follow the unsigned relative offset stored at `pos`.
fn follow(buf: &[u8], pos: usize) -> Result<usize> {
    let rel = u32_at(buf, pos)? as usize;
    let target = pos
        .checked_add(rel)
        .ok_or_else(|| malformed("offset overflow"))?;
    if target >= buf.len() {
        return Err(malformed(format!("offset {target:#x} outside buffer")));
    }
    Ok(target)
}

/// A table inside a FlatBuffer.
#[derive(Debug, Clone, Copy)]
pub struct Table<'a> {
    buf: &'a [u8],
    pos: usize,
    vtable: usize,
    vtable_len: usize,
}

impl<'a> Table<'a> {
    /// Open the root table: the u32 at offset 0 points to it.
    pub fn root(buf: &'a [u8]) -> Result<Self> {
        let pos = follow(buf, 0)?;
        Self::at(buf, pos)
    }

    /// Open the table starting at absolute position `pos`.
    pub fn at(buf: &'a [u8], pos: usize) -> Result<Self> {
        let soffset = LittleEndian::read_i32(slice_at(buf, pos, 4)?);
        let vtable = (pos as i64) - i64::from(soffset);
        if vtable < 0 {
            return Err(malformed(format!("vtable before buffer start for table at {pos:#x}")));
        }
        let vtable = vtable as usize;
        let header = slice_at(buf, vtable, 4)?;
        let vtable_len = LittleEndian::read_u16(header) as usize;
        if vtable_len < 4 {
            return Err(malformed(format!("vtable at {vtable:#x} too short ({vtable_len})")));
        }
        slice_at(buf, vtable, vtable_len)?;
        Ok(Self {
            buf,
            pos,
            vtable,
            vtable_len,
        })
    }

    /// Absolute position of the table in the buffer.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// The whole buffer this table lives in.
    pub fn buffer(&self) -> &'a [u8] {
        self.buf
    }

    /// Absolute position of field `index`, if present.
    fn field(&self, index: usize) -> Option<usize> {
        let slot = 4 + 2 * index;
        if slot + 2 > self.vtable_len {
            return None;
        }
        let voffset = LittleEndian::read_u16(&self.buf[self.vtable + slot..]) as usize;
        (voffset != 0).then_some(self.pos + voffset)
    }

    pub fn has_field(&self, index: usize) -> bool {
        self.field(index).is_some()
    }

    fn scalar<const N: usize, T>(&self, index: usize, default: T, read: fn(&[u8]) -> T) -> Result<T> {
        match self.field(index) {
            Some(pos) => slice_at(self.buf, pos, N).map(read),
            None => Ok(default),
        }
    }

    pub fn u8(&self, index: usize, default: u8) -> Result<u8> {
        self.scalar::<1, _>(index, default, |b| b[0])
    }

    pub fn i8(&self, index: usize, default: i8) -> Result<i8> {
        self.scalar::<1, _>(index, default, |b| b[0] as i8)
    }

    pub fn u16(&self, index: usize, default: u16) -> Result<u16> {
        self.scalar::<2, _>(index, default, LittleEndian::read_u16)
    }

    pub fn u32(&self, index: usize, default: u32) -> Result<u32> {
        self.scalar::<4, _>(index, default, LittleEndian::read_u32)
    }

    pub fn i32(&self, index: usize, default: i32) -> Result<i32> {
        self.scalar::<4, _>(index, default, LittleEndian::read_i32)
    }

    pub fn u64(&self, index: usize, default: u64) -> Result<u64> {
        self.scalar::<8, _>(index, default, LittleEndian::read_u64)
    }

    pub fn f32(&self, index: usize, default: f32) -> Result<f32> {
        self.scalar::<4, _>(index, default, LittleEndian::read_f32)
    }

    /// Position of the object an offset field points to.
    fn target(&self, index: usize) -> Result<Option<usize>> {
        self.field(index).map(|pos| follow(self.buf, pos)).transpose()
    }

    /// Read a string field.
    pub fn string(&self, index: usize) -> Result<Option<&'a str>> {
        self.target(index)?
            .map(|pos| read_string(self.buf, pos))
            .transpose()
    }

    /// Read a `[ubyte]` field as a borrowed slice.
    pub fn bytes(&self, index: usize) -> Result<Option<&'a [u8]>> {
        Ok(self.bytes_range(index)?.map(|r| &self.buf[r]))
    }

    /// Read a `[ubyte]` field as an absolute range into the buffer.
    pub fn bytes_range(&self, index: usize) -> Result<Option<Range<usize>>> {
        match self.target(index)? {
            Some(pos) => {
                let len = u32_at(self.buf, pos)? as usize;
                slice_at(self.buf, pos + 4, len)?;
                Ok(Some(pos + 4..pos + 4 + len))
            }
            None => Ok(None),
        }
    }

    /// Read a sub-table field.
    pub fn table(&self, index: usize) -> Result<Option<Table<'a>>> {
        self.target(index)?
            .map(|pos| Table::at(self.buf, pos))
            .transpose()
    }

    /// Read a vector field. Absent vectors read as empty.
    pub fn vector(&self, index: usize) -> Result<Vector<'a>> {
        match self.target(index)? {
            Some(pos) => Vector::at(self.buf, pos),
            None => Ok(Vector::empty(self.buf)),
        }
    }

    /// Read a `[ulong]` field.
    pub fn vector_u64(&self, index: usize) -> Result<Vec<u64>> {
        self.vector(index)?.scalars::<8, _>(LittleEndian::read_u64)
    }

    /// Read a `[uint]` field.
    pub fn vector_u32(&self, index: usize) -> Result<Vec<u32>> {
        self.vector(index)?.scalars::<4, _>(LittleEndian::read_u32)
    }

    /// Read a `[string]` field.
    pub fn vector_strings(&self, index: usize) -> Result<Vec<&'a str>> {
        let vector = self.vector(index)?;
        (0..vector.len()).map(|i| vector.string(i)).collect()
    }

    /// Read a `[Table]` field.
    pub fn vector_tables(&self, index: usize) -> Result<Vec<Table<'a>>> {
        let vector = self.vector(index)?;
        (0..vector.len()).map(|i| vector.table(i)).collect()
    }
}

fn read_string(buf: &[u8], pos: usize) -> Result<&str> {
    let len = u32_at(buf, pos)? as usize;
    let bytes = slice_at(buf, pos + 4, len)?;
    std::str::from_utf8(bytes).map_err(Error::Utf8)
}

/// A length-prefixed vector inside a FlatBuffer.
#[derive(Debug, Clone, Copy)]
pub struct Vector<'a> {
    buf: &'a [u8],
    start: usize,
    len: usize,
}

impl<'a> Vector<'a> {
    fn at(buf: &'a [u8], pos: usize) -> Result<Self> {
        let len = u32_at(buf, pos)? as usize;
        // Every element is at least one byte.
        slice_at(buf, pos + 4, len)?;
        Ok(Self {
            buf,
            start: pos + 4,
            len,
        })
    }

    fn empty(buf: &'a [u8]) -> Self {
        Self { buf, start: 0, len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn scalars<const N: usize, T>(&self, read: fn(&[u8]) -> T) -> Result<Vec<T>> {
        let bytes = slice_at(self.buf, self.start, self.len * N)?;
        Ok(bytes.chunks_exact(N).map(read).collect())
    }

    /// Element `i` of a vector of strings.
    pub fn string(&self, i: usize) -> Result<&'a str> {
        let pos = follow(self.buf, self.element(i)?)?;
        read_string(self.buf, pos)
    }

    /// Element `i` of a vector of tables.
    pub fn table(&self, i: usize) -> Result<Table<'a>> {
        let pos = follow(self.buf, self.element(i)?)?;
        Table::at(self.buf, pos)
    }

    fn element(&self, i: usize) -> Result<usize> {
        if i >= self.len {
            return Err(malformed(format!("vector index {i} out of range ({})", self.len)));
        }
        Ok(self.start + 4 * i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        let mut child = TableBuilder::new();
        child.add_u64(0, 7).add_u32(1, 3);

        let mut root = TableBuilder::new();
        root.add_vector_u64(0, &[1, 2, 3])
            .add_vector_strings(1, &["a.trpak", "b.trpak"])
            .add_vector_tables(2, vec![child])
            .add_i8(4, -1)
            .add_bytes(5, b"payload")
            .add_string(6, "name");
        FlatBufferBuilder::finish(&root)
    }

    #[test]
    fn test_reads_built_table() {
        let buf = sample();
        let root = Table::root(&buf).unwrap();

        assert_eq!(root.vector_u64(0).unwrap(), vec![1, 2, 3]);
        assert_eq!(root.vector_strings(1).unwrap(), vec!["a.trpak", "b.trpak"]);
        let children = root.vector_tables(2).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].u64(0, 0).unwrap(), 7);
        assert_eq!(children[0].u32(1, 0).unwrap(), 3);
        assert_eq!(root.i8(4, 0).unwrap(), -1);
        assert_eq!(root.bytes(5).unwrap(), Some(&b"payload"[..]));
        assert_eq!(root.string(6).unwrap(), Some("name"));
    }

    #[test]
    fn test_absent_fields_use_defaults() {
        let buf = sample();
        let root = Table::root(&buf).unwrap();

        assert!(!root.has_field(3));
        assert_eq!(root.u64(3, 42).unwrap(), 42);
        assert!(root.vector_u64(3).unwrap().is_empty());
        assert_eq!(root.string(3).unwrap(), None);
        // Past the end of the vtable
        assert_eq!(root.i32(40, -5).unwrap(), -5);
        assert!(root.table(40).unwrap().is_none());
    }

    #[test]
    fn test_out_of_bounds_root() {
        let buf = [0xFFu8, 0, 0, 0];
        assert!(matches!(Table::root(&buf), Err(Error::MalformedFlatBuffer(_))));
        assert!(Table::root(&[]).is_err());
    }

    #[test]
    fn test_truncated_buffer_errors() {
        let buf = sample();
        let truncated = &buf[..buf.len() - 6];
        let result = Table::root(truncated).and_then(|root| root.string(6));
        assert!(result.is_err());
    }
}
