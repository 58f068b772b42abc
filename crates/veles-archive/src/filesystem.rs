//! The storage file (`data.trpfs`) and its embedded pack index.
//!
//! Layout: a 16-byte ONEFILE header (`magic`, little-endian `u64` offset),
//! packed data, then from that offset to EOF a FlatBuffer `FileSystem`
//! mapping each pack's own hash to its offset in the same file.

use rustc_hash::FxHashMap;
use veles_common::flatbuffer::Table;
use veles_common::BinaryReader;

use crate::{Error, Result};

/// Storage file name inside an archive directory.
pub const STORAGE_FILE_NAME: &str = "data.trpfs";

/// Magic at the start of the storage file.
pub const ONEFILE_MAGIC: &[u8; 8] = b"ONEFILE\0";

/// Size of the ONEFILE header.
pub const ONEFILE_HEADER_SIZE: usize = 16;

/// Parsed storage header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OneFileHeader {
    pub filesystem_offset: u64,
}

impl OneFileHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = BinaryReader::new(data);
        let magic = reader.read_bytes(ONEFILE_MAGIC.len())?;
        if magic != ONEFILE_MAGIC {
            return Err(Error::InvalidMagic {
                expected: String::from_utf8_lossy(ONEFILE_MAGIC).into_owned(),
                actual: String::from_utf8_lossy(magic).into_owned(),
            });
        }
        Ok(Self {
            filesystem_offset: reader.read_u64()?,
        })
    }
}

/// Pack hash to storage offset index.
#[derive(Debug, Clone)]
pub struct ArchiveFileSystem {
    file_hashes: Vec<u64>,
    file_offsets: Vec<u64>,
    index: FxHashMap<u64, usize>,
}

impl ArchiveFileSystem {
    /// Parse the index from a whole storage file image.
    pub fn from_storage(storage: &[u8]) -> Result<Self> {
        let header = OneFileHeader::parse(storage)?;
        let offset = header.filesystem_offset;
        if offset < ONEFILE_HEADER_SIZE as u64 || offset >= storage.len() as u64 {
            return Err(Error::OutOfRange {
                offset,
                size: 0,
                len: storage.len() as u64,
            });
        }
        Self::parse(&storage[offset as usize..])
    }

    /// Parse the FlatBuffer `FileSystem` table.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let root = Table::root(data)?;
        let file_hashes = root.vector_u64(0)?;
        let file_offsets = root.vector_u64(1)?;

        if file_hashes.len() != file_offsets.len() {
            return Err(Error::malformed(
                "filesystem",
                format!(
                    "{} pack hashes but {} offsets",
                    file_hashes.len(),
                    file_offsets.len()
                ),
            ));
        }

        let mut index = FxHashMap::with_capacity_and_hasher(file_hashes.len(), Default::default());
        for (i, &hash) in file_hashes.iter().enumerate() {
            if index.insert(hash, i).is_some() {
                return Err(Error::malformed(
                    "filesystem",
                    format!("duplicate pack hash {hash:#018x}"),
                ));
            }
        }

        Ok(Self {
            file_hashes,
            file_offsets,
            index,
        })
    }

    /// Storage offset of the pack whose name hashes to `pack_hash`.
    #[inline]
    pub fn offset_of(&self, pack_hash: u64) -> Option<u64> {
        self.index.get(&pack_hash).map(|&i| self.file_offsets[i])
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.file_hashes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.file_hashes.is_empty()
    }

    pub fn pack_hashes(&self) -> &[u64] {
        &self.file_hashes
    }
}
