//! Standalone GFLXPACK (`.trpak`) archives.
//!
//! Unlike packs inside `data.trpfs`, a GFLXPACK file carries its own folder
//! tree of hashed names and compresses entries with zlib, LZ4 or Oodle.

use std::path::Path;

use veles_common::BinaryReader;
use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::decompress::{self, Decompressor};
use crate::names::HashNames;
use crate::{Error, Result};

/// Magic at the start of a GFLXPACK file.
pub const GFLXPACK_MAGIC: &[u8; 8] = b"GFLXPACK";

/// Header after the magic.
#[derive(Debug, Clone, Copy, FromBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct GfpakHeader {
    pub version: u32,
    pub relocated: u32,
    pub file_count: u32,
    pub folder_count: u32,
}

/// Per-file header (0x18 bytes).
#[derive(Debug, Clone, Copy, FromBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct GfpakFileHeader {
    pub level: u16,
    pub compression: u16,
    /// Decoded size.
    pub buffer_size: u32,
    /// Stored size.
    pub file_size: u32,
    pub reserved: u32,
    pub file_pointer: u64,
}

/// Folder header, followed by `content_count` [`GfpakFolderEntry`]s.
#[derive(Debug, Clone, Copy, FromBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct GfpakFolderHeader {
    pub hash: u64,
    pub content_count: u32,
    pub reserved: u32,
}

#[derive(Debug, Clone, Copy, FromBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct GfpakFolderEntry {
    pub hash: u64,
    pub index: u32,
    pub reserved: u32,
}

/// Compression scheme of a GFLXPACK entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GfpakCompression {
    None,
    Zlib,
    Lz4,
    Oodle,
}

impl TryFrom<u16> for GfpakCompression {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Zlib),
            2 => Ok(Self::Lz4),
            3 => Ok(Self::Oodle),
            other => Err(Error::UnsupportedCompression(other)),
        }
    }
}

/// A decoded file of a GFLXPACK archive.
#[derive(Debug, Clone)]
pub struct GfpakFile {
    /// Name within its folder.
    pub name: String,
    /// Full archive path.
    pub full_name: String,
    /// Hash of the full path.
    pub hash: u64,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct GfpakFolder {
    pub path: String,
    pub files: Vec<GfpakFile>,
}

/// A fully decoded GFLXPACK archive.
#[derive(Debug, Clone, Default)]
pub struct GfpakArchive {
    pub folders: Vec<GfpakFolder>,
}

impl GfpakArchive {
    /// Read and decode a `.trpak` file.
    pub fn open<P: AsRef<Path>>(
        path: P,
        names: &mut HashNames,
        decompressor: &dyn Decompressor,
    ) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::parse(&data, names, decompressor)
    }

    /// Decode an archive image.
    ///
    /// Names come from `names`, falling back to the folder path plus the
    /// file name, then to the hex hash. Full paths that were not known
    /// before are registered into `names`.
    pub fn parse(data: &[u8], names: &mut HashNames, decompressor: &dyn Decompressor) -> Result<Self> {
        let mut reader = BinaryReader::new(data);
        reader
            .expect_magic(GFLXPACK_MAGIC)
            .map_err(|_| Error::InvalidMagic {
                expected: "GFLXPACK".to_string(),
                actual: String::from_utf8_lossy(&data[..data.len().min(8)]).into_owned(),
            })?;
        let header: GfpakHeader = reader.read_struct()?;
        let file_table = reader.read_u64()?;
        let hash_table = reader.read_u64()?;
        let folder_offsets = (0..header.folder_count)
            .map(|_| reader.read_u64())
            .collect::<veles_common::Result<Vec<_>>>()?;

        let file_count = header.file_count as usize;
        reader.seek(to_offset(hash_table, data)?);
        let file_hashes = (0..file_count)
            .map(|_| reader.read_u64())
            .collect::<veles_common::Result<Vec<_>>>()?;

        reader.seek(to_offset(file_table, data)?);
        let file_headers = (0..file_count)
            .map(|_| reader.read_struct::<GfpakFileHeader>())
            .collect::<veles_common::Result<Vec<_>>>()?;

        let files = file_headers
            .iter()
            .zip(&file_hashes)
            .map(|(fh, &hash)| decode_file(data, fh, hash, decompressor))
            .collect::<Result<Vec<_>>>()?;

        let mut archive = GfpakArchive::default();
        for &offset in &folder_offsets {
            reader.seek(to_offset(offset, data)?);
            let folder: GfpakFolderHeader = reader.read_struct()?;
            let folder_path = names
                .get(folder.hash)
                .map(str::to_string)
                .unwrap_or_else(|| format!("{:016X}", folder.hash));

            let mut files_out = Vec::with_capacity(folder.content_count as usize);
            for _ in 0..folder.content_count {
                let entry: GfpakFolderEntry = reader.read_struct()?;
                let index = entry.index as usize;
                let Some(&hash) = file_hashes.get(index) else {
                    return Err(Error::malformed(
                        "gflxpack",
                        format!("folder entry index {index} out of {file_count} files"),
                    ));
                };
                let name = names
                    .get(entry.hash)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{:016X}", entry.hash));
                let full_name = match names.get(hash) {
                    Some(known) => known.to_string(),
                    None => {
                        let synthesized = format!("{folder_path}{name}");
                        names.insert(hash, synthesized.clone());
                        synthesized
                    }
                };
                files_out.push(GfpakFile {
                    name,
                    full_name,
                    hash,
                    data: files[index].clone(),
                });
            }
            archive.folders.push(GfpakFolder {
                path: folder_path,
                files: files_out,
            });
        }

        Ok(archive)
    }

    /// Iterate every file in folder order.
    pub fn files(&self) -> impl Iterator<Item = &GfpakFile> + '_ {
        self.folders.iter().flat_map(|f| f.files.iter())
    }

    /// Files whose full name ends with `extension` (case-insensitive).
    pub fn find_files_by_extension<'a>(
        &'a self,
        extension: &'a str,
    ) -> impl Iterator<Item = &'a GfpakFile> + 'a {
        self.files().filter(move |f| {
            let name = f.full_name.as_bytes();
            name.len() >= extension.len()
                && name[name.len() - extension.len()..].eq_ignore_ascii_case(extension.as_bytes())
        })
    }
}

fn to_offset(offset: u64, data: &[u8]) -> Result<usize> {
    if offset > data.len() as u64 {
        return Err(Error::OutOfRange {
            offset,
            size: 0,
            len: data.len() as u64,
        });
    }
    Ok(offset as usize)
}

fn decode_file(
    data: &[u8],
    header: &GfpakFileHeader,
    hash: u64,
    decompressor: &dyn Decompressor,
) -> Result<Vec<u8>> {
    let start = header.file_pointer;
    let size = u64::from(header.file_size);
    let stored = start
        .checked_add(size)
        .filter(|&end| end <= data.len() as u64)
        .map(|end| &data[start as usize..end as usize])
        .ok_or(Error::OutOfRange {
            offset: start,
            size,
            len: data.len() as u64,
        })?;

    let expected = header.buffer_size as usize;
    match GfpakCompression::try_from(header.compression)? {
        GfpakCompression::None => Ok(stored.to_vec()),
        GfpakCompression::Zlib => decompress::decompress_zlib(stored, expected),
        GfpakCompression::Lz4 => decompress::decompress_lz4(stored, expected),
        GfpakCompression::Oodle => decompressor
            .decompress(stored, expected)
            .ok_or(Error::Decompression {
                hash,
                kind: i32::from(header.compression),
                expected_size: expected as u64,
            }),
    }
}
