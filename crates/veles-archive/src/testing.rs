//! Fixture writer for tests: produces real `data.trpfd`/`data.trpfs` pairs.
//!
//! Compressed entries are stored byte-reversed; pair them with
//! [`reverse_codec`] as the store's decompressor.

use std::path::Path;

use veles_common::flatbuffer::{FlatBufferBuilder, TableBuilder};
use veles_common::fnv;

use crate::descriptor::{FileInfo, PackInfo, DESCRIPTOR_FILE_NAME};
use crate::filesystem::{ONEFILE_HEADER_SIZE, ONEFILE_MAGIC, STORAGE_FILE_NAME};
use crate::pack::STORED_RAW;
use crate::Result;

/// Test codec matching [`ArchiveBuilder::compressed_file`]: reverses the bytes.
pub fn reverse_codec(data: &[u8], expected_size: usize) -> Option<Vec<u8>> {
    (data.len() == expected_size).then(|| data.iter().rev().copied().collect())
}

/// One entry of a pack under construction.
#[derive(Debug, Clone)]
pub struct PackEntry {
    pub hash: u64,
    pub encryption_type: i8,
    pub file_size: u64,
    pub buffer: Vec<u8>,
}

impl PackEntry {
    pub fn raw(hash: u64, data: Vec<u8>) -> Self {
        Self {
            hash,
            encryption_type: STORED_RAW,
            file_size: data.len() as u64,
            buffer: data,
        }
    }

    pub fn compressed(hash: u64, stored: Vec<u8>, decoded_size: u64) -> Self {
        Self {
            hash,
            encryption_type: 0,
            file_size: decoded_size,
            buffer: stored,
        }
    }
}

/// Encode a `FileDescriptor` table.
pub fn encode_descriptor<S: AsRef<str>>(
    file_hashes: &[u64],
    pack_names: &[S],
    file_info: &[FileInfo],
    pack_info: &[PackInfo],
    unused_hashes: &[u64],
    unused_file_info: &[FileInfo],
) -> Vec<u8> {
    let info_tables = |infos: &[FileInfo]| {
        infos
            .iter()
            .map(|info| {
                let mut t = TableBuilder::new();
                t.add_u64(0, info.pack_index).add_u32(1, info.unused_table);
                t
            })
            .collect::<Vec<_>>()
    };
    let pack_tables = pack_info
        .iter()
        .map(|info| {
            let mut t = TableBuilder::new();
            t.add_u64(0, info.file_size).add_u64(1, info.file_count);
            t
        })
        .collect();

    let mut root = TableBuilder::new();
    root.add_vector_u64(0, file_hashes)
        .add_vector_strings(1, pack_names)
        .add_vector_tables(2, info_tables(file_info))
        .add_vector_tables(3, pack_tables)
        .add_vector_u64(4, unused_hashes)
        .add_vector_tables(5, info_tables(unused_file_info));
    FlatBufferBuilder::finish(&root)
}

/// Encode a `FileSystem` table.
pub fn encode_filesystem(pack_hashes: &[u64], offsets: &[u64]) -> Vec<u8> {
    let mut root = TableBuilder::new();
    root.add_vector_u64(0, pack_hashes).add_vector_u64(1, offsets);
    FlatBufferBuilder::finish(&root)
}

/// Encode a `PackedArchive` table.
pub fn encode_pack(entries: &[PackEntry]) -> Vec<u8> {
    let hashes: Vec<u64> = entries.iter().map(|e| e.hash).collect();
    let files = entries
        .iter()
        .map(|e| {
            let mut t = TableBuilder::new();
            t.add_u32(0, 0)
                .add_i8(1, e.encryption_type)
                .add_u8(2, 0)
                .add_u64(3, e.file_size)
                .add_bytes(4, &e.buffer);
            t
        })
        .collect();

    let mut root = TableBuilder::new();
    root.add_vector_u64(0, &hashes).add_vector_tables(1, files);
    FlatBufferBuilder::finish(&root)
}

#[derive(Debug, Default)]
struct PendingPack {
    name: String,
    entries: Vec<(PackEntry, bool)>,
}

/// Builds an archive directory with one or more packs.
#[derive(Debug, Default)]
pub struct ArchiveBuilder {
    packs: Vec<PendingPack>,
    size_overrides: Vec<(usize, u64)>,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new pack; following files go into it.
    pub fn pack(mut self, name: &str) -> Self {
        self.packs.push(PendingPack {
            name: name.to_string(),
            entries: Vec::new(),
        });
        self
    }

    fn current(&mut self) -> &mut PendingPack {
        if self.packs.is_empty() {
            self.packs.push(PendingPack {
                name: "arc/default.trpak".to_string(),
                entries: Vec::new(),
            });
        }
        let last = self.packs.len() - 1;
        &mut self.packs[last]
    }

    /// Add a raw file addressed by path.
    pub fn file(self, path: &str, data: Vec<u8>) -> Self {
        self.file_with_hash(fnv::hash_path(path), data)
    }

    /// Add a raw file addressed only by hash.
    pub fn file_with_hash(mut self, hash: u64, data: Vec<u8>) -> Self {
        self.current().entries.push((PackEntry::raw(hash, data), false));
        self
    }

    /// Add a file stored compressed (byte-reversed).
    pub fn compressed_file(mut self, path: &str, data: Vec<u8>) -> Self {
        let size = data.len() as u64;
        let stored = data.into_iter().rev().collect();
        self.current()
            .entries
            .push((PackEntry::compressed(fnv::hash_path(path), stored, size), false));
        self
    }

    /// Add a file listed in the descriptor's unused table.
    pub fn unused_file(mut self, path: &str, data: Vec<u8>) -> Self {
        self.current()
            .entries
            .push((PackEntry::raw(fnv::hash_path(path), data), true));
        self
    }

    /// Record a wrong size for pack `index` in the descriptor.
    pub fn pack_size_override(mut self, index: usize, size: u64) -> Self {
        self.size_overrides.push((index, size));
        self
    }

    /// Write `data.trpfd` and `data.trpfs` into `directory`.
    pub fn write(&self, directory: &Path) -> Result<()> {
        let mut storage = ONEFILE_MAGIC.to_vec();
        storage.resize(ONEFILE_HEADER_SIZE, 0);

        let mut pack_hashes = Vec::new();
        let mut offsets = Vec::new();
        let mut pack_info = Vec::new();
        let mut file_hashes = Vec::new();
        let mut file_info = Vec::new();
        let mut unused_hashes = Vec::new();
        let mut unused_info = Vec::new();

        for (index, pack) in self.packs.iter().enumerate() {
            let entries: Vec<PackEntry> = pack.entries.iter().map(|(e, _)| e.clone()).collect();
            let bytes = encode_pack(&entries);

            pack_hashes.push(fnv::hash_str(&pack.name));
            offsets.push(storage.len() as u64);
            let file_size = self
                .size_overrides
                .iter()
                .find(|(i, _)| *i == index)
                .map_or(bytes.len() as u64, |(_, size)| *size);
            pack_info.push(PackInfo {
                file_size,
                file_count: entries.len() as u64,
            });
            storage.extend_from_slice(&bytes);

            for (entry, unused) in &pack.entries {
                let info = FileInfo {
                    pack_index: index as u64,
                    unused_table: 0,
                };
                if *unused {
                    unused_hashes.push(entry.hash);
                    unused_info.push(info);
                } else {
                    file_hashes.push(entry.hash);
                    file_info.push(info);
                }
            }
        }

        let fs_offset = storage.len() as u64;
        storage[8..16].copy_from_slice(&fs_offset.to_le_bytes());
        storage.extend_from_slice(&encode_filesystem(&pack_hashes, &offsets));

        let pack_names: Vec<&str> = self.packs.iter().map(|p| p.name.as_str()).collect();
        let descriptor = encode_descriptor(
            &file_hashes,
            &pack_names,
            &file_info,
            &pack_info,
            &unused_hashes,
            &unused_info,
        );

        std::fs::create_dir_all(directory)?;
        std::fs::write(directory.join(DESCRIPTOR_FILE_NAME), descriptor)?;
        std::fs::write(directory.join(STORAGE_FILE_NAME), storage)?;
        Ok(())
    }
}
