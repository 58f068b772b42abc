//! The file descriptor (`data.trpfd`).
//!
//! Maps every file hash in the archive to the pack that holds it. Files
//! outside the primary live set sit in a parallel "unused" table and are
//! still extractable.

use std::path::Path;

use rustc_hash::FxHashMap;
use veles_common::flatbuffer::Table;

use crate::{Error, Result};

/// Descriptor file name inside an archive directory.
pub const DESCRIPTOR_FILE_NAME: &str = "data.trpfd";

/// Per-file record: which pack holds the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
    pub pack_index: u64,
    pub unused_table: u32,
}

/// Per-pack record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackInfo {
    /// Size of the serialized pack inside the storage file.
    pub file_size: u64,
    pub file_count: u64,
}

/// Where a file hash was found in the descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileLocation {
    Primary(usize),
    Unused(usize),
}

/// Parsed and validated `data.trpfd`.
#[derive(Debug, Clone)]
pub struct ArchiveDescriptor {
    file_hashes: Vec<u64>,
    pack_names: Vec<String>,
    file_info: Vec<FileInfo>,
    pack_info: Vec<PackInfo>,
    unused_hashes: Vec<u64>,
    unused_file_info: Vec<FileInfo>,
    primary_index: FxHashMap<u64, usize>,
    unused_index: FxHashMap<u64, usize>,
}

impl ArchiveDescriptor {
    /// Read and parse a descriptor file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::parse(&data)
    }

    /// Parse a descriptor from its FlatBuffer bytes.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let root = Table::root(data)?;

        let file_hashes = root.vector_u64(0)?;
        let pack_names = root
            .vector_strings(1)?
            .into_iter()
            .map(str::to_string)
            .collect();
        let file_info = read_file_info(&root, 2)?;
        let pack_info = root
            .vector_tables(3)?
            .iter()
            .map(|t| {
                Ok(PackInfo {
                    file_size: t.u64(0, 0)?,
                    file_count: t.u64(1, 0)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let unused_hashes = root.vector_u64(4)?;
        let unused_file_info = read_file_info(&root, 5)?;

        Self::from_parts(
            file_hashes,
            pack_names,
            file_info,
            pack_info,
            unused_hashes,
            unused_file_info,
        )
    }

    /// Assemble a descriptor from decoded tables, validating cross-references.
    pub fn from_parts(
        file_hashes: Vec<u64>,
        pack_names: Vec<String>,
        file_info: Vec<FileInfo>,
        pack_info: Vec<PackInfo>,
        unused_hashes: Vec<u64>,
        unused_file_info: Vec<FileInfo>,
    ) -> Result<Self> {
        if file_hashes.len() != file_info.len() {
            return Err(Error::malformed(
                "descriptor",
                format!(
                    "{} file hashes but {} file info records",
                    file_hashes.len(),
                    file_info.len()
                ),
            ));
        }
        if unused_hashes.len() != unused_file_info.len() {
            return Err(Error::malformed(
                "descriptor",
                format!(
                    "{} unused hashes but {} unused file info records",
                    unused_hashes.len(),
                    unused_file_info.len()
                ),
            ));
        }
        if pack_info.len() != pack_names.len() {
            return Err(Error::malformed(
                "descriptor",
                format!(
                    "{} pack names but {} pack info records",
                    pack_names.len(),
                    pack_info.len()
                ),
            ));
        }
        let pack_count = pack_names.len() as u64;
        if let Some(bad) = file_info
            .iter()
            .chain(&unused_file_info)
            .find(|info| info.pack_index >= pack_count)
        {
            return Err(Error::malformed(
                "descriptor",
                format!("pack index {} out of {pack_count} packs", bad.pack_index),
            ));
        }

        Ok(Self {
            primary_index: index_hashes(&file_hashes),
            unused_index: index_hashes(&unused_hashes),
            file_hashes,
            pack_names,
            file_info,
            pack_info,
            unused_hashes,
            unused_file_info,
        })
    }

    #[inline]
    pub fn file_hashes(&self) -> &[u64] {
        &self.file_hashes
    }

    #[inline]
    pub fn unused_hashes(&self) -> &[u64] {
        &self.unused_hashes
    }

    #[inline]
    pub fn pack_names(&self) -> &[String] {
        &self.pack_names
    }

    #[inline]
    pub fn pack_info(&self) -> &[PackInfo] {
        &self.pack_info
    }

    #[inline]
    pub fn file_info(&self) -> &[FileInfo] {
        &self.file_info
    }

    #[inline]
    pub fn unused_file_info(&self) -> &[FileInfo] {
        &self.unused_file_info
    }

    /// Number of files in the primary set.
    #[inline]
    pub fn file_count(&self) -> usize {
        self.file_hashes.len()
    }

    /// Find a hash, trying the primary set before the unused set.
    pub fn locate(&self, hash: u64) -> Option<FileLocation> {
        self.primary_index
            .get(&hash)
            .map(|&i| FileLocation::Primary(i))
            .or_else(|| self.unused_index.get(&hash).map(|&i| FileLocation::Unused(i)))
    }

    /// Pack index holding `hash`, if the descriptor knows the hash.
    pub fn pack_index_of(&self, hash: u64) -> Option<usize> {
        let info = match self.locate(hash)? {
            FileLocation::Primary(i) => self.file_info[i],
            FileLocation::Unused(i) => self.unused_file_info[i],
        };
        Some(info.pack_index as usize)
    }

    /// Primary-set hashes stored in `pack_index`, in descriptor order.
    pub fn files_in_pack(&self, pack_index: usize) -> Vec<u64> {
        self.file_hashes
            .iter()
            .zip(&self.file_info)
            .filter(|(_, info)| info.pack_index as usize == pack_index)
            .map(|(&hash, _)| hash)
            .collect()
    }

    /// Primary hashes followed by unused hashes.
    pub fn all_hashes(&self) -> impl Iterator<Item = u64> + '_ {
        self.file_hashes
            .iter()
            .chain(&self.unused_hashes)
            .copied()
    }
}

fn read_file_info(root: &Table<'_>, index: usize) -> Result<Vec<FileInfo>> {
    root.vector_tables(index)?
        .iter()
        .map(|t| {
            Ok(FileInfo {
                pack_index: t.u64(0, 0)?,
                unused_table: t.u32(1, 0)?,
            })
        })
        .collect()
}

/// First occurrence wins for duplicate hashes.
fn index_hashes(hashes: &[u64]) -> FxHashMap<u64, usize> {
    let mut index = FxHashMap::with_capacity_and_hasher(hashes.len(), Default::default());
    for (i, &hash) in hashes.iter().enumerate() {
        index.entry(hash).or_insert(i);
    }
    index
}
