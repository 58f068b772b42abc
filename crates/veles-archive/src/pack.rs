//! Packs: serialized bundles of file entries stored inside `data.trpfs`.

use std::ops::Range;

use rustc_hash::FxHashMap;
use veles_common::flatbuffer::Table;

use crate::decompress::Decompressor;
use crate::{Error, Result};

/// `encryption_type` value for entries stored without compression.
pub const STORED_RAW: i8 = -1;

/// One file entry inside a pack. The buffer lives in the pack's byte image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedFile {
    pub field_00: u32,
    pub encryption_type: i8,
    pub level: u8,
    /// Decoded size of the file.
    pub file_size: u64,
    buffer: Range<usize>,
}

impl PackedFile {
    #[inline]
    pub fn is_compressed(&self) -> bool {
        self.encryption_type != STORED_RAW
    }

    /// Length of the stored (possibly compressed) buffer.
    #[inline]
    pub fn stored_size(&self) -> usize {
        self.buffer.len()
    }
}

/// A deserialized pack. Entry buffers borrow from the owned byte image.
#[derive(Debug)]
pub struct PackedArchive {
    data: Vec<u8>,
    file_hashes: Vec<u64>,
    entries: Vec<PackedFile>,
    index: FxHashMap<u64, usize>,
}

impl PackedArchive {
    /// Parse a pack from its serialized bytes, taking ownership of them.
    pub fn parse(data: Vec<u8>) -> Result<Self> {
        let (file_hashes, entries) = {
            let root = Table::root(&data)?;
            let file_hashes = root.vector_u64(0)?;
            let entries = root
                .vector_tables(1)?
                .iter()
                .map(|t| {
                    let buffer = t.bytes_range(4)?.unwrap_or(0..0);
                    Ok(PackedFile {
                        field_00: t.u32(0, 0)?,
                        encryption_type: t.i8(1, 0)?,
                        level: t.u8(2, 0)?,
                        file_size: t.u64(3, 0)?,
                        buffer,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            (file_hashes, entries)
        };

        if file_hashes.len() != entries.len() {
            return Err(Error::malformed(
                "pack",
                format!(
                    "{} hashes but {} entries",
                    file_hashes.len(),
                    entries.len()
                ),
            ));
        }

        let mut index = FxHashMap::with_capacity_and_hasher(file_hashes.len(), Default::default());
        for (i, &hash) in file_hashes.iter().enumerate() {
            index.entry(hash).or_insert(i);
        }

        Ok(Self {
            data,
            file_hashes,
            entries,
            index,
        })
    }

    #[inline]
    pub fn file_hashes(&self) -> &[u64] {
        &self.file_hashes
    }

    #[inline]
    pub fn entries(&self) -> &[PackedFile] {
        &self.entries
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an entry by file hash.
    pub fn entry(&self, hash: u64) -> Option<&PackedFile> {
        self.index.get(&hash).map(|&i| &self.entries[i])
    }

    /// Stored bytes of an entry.
    #[inline]
    pub fn buffer(&self, entry: &PackedFile) -> &[u8] {
        &self.data[entry.buffer.clone()]
    }

    /// Return the decoded bytes for `hash`, or `None` if the pack lacks it.
    ///
    /// Compressed entries go through `decompressor`; a codec failure is
    /// [`Error::Decompression`], never the stored bytes.
    pub fn read(&self, hash: u64, decompressor: &dyn Decompressor) -> Result<Option<Vec<u8>>> {
        let Some(entry) = self.entry(hash) else {
            return Ok(None);
        };
        let stored = self.buffer(entry);
        if !entry.is_compressed() {
            return Ok(Some(stored.to_vec()));
        }

        decompressor
            .decompress(stored, entry.file_size as usize)
            .map(Some)
            .ok_or(Error::Decompression {
                hash,
                kind: i32::from(entry.encryption_type),
                expected_size: entry.file_size,
            })
    }
}
