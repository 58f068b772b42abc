//! Hash to path table.
//!
//! Archive files are addressed only by hash; this table holds the paths
//! recovered for them. It is loaded from a text hash list
//! (`0x<16 hex> <path>` per line) or the binary hash cache, and written back
//! as a text list sorted by path.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::OnceLock;

use rustc_hash::FxHashMap;
use veles_common::{fnv, path, BinaryReader};

use crate::{Error, Result};

/// Conventional hash list file name next to an archive.
pub const HASH_LIST_FILE_NAME: &str = "hashes_inside_fd.txt";

/// Resolved hash to path mapping.
#[derive(Debug, Clone, Default)]
pub struct HashNames {
    names: FxHashMap<u64, String>,
    /// Lazily built file-name index; reset on every mutation.
    by_file_name: OnceLock<FxHashMap<String, Vec<u64>>>,
}

impl HashNames {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a text hash list.
    pub fn from_hash_list(text: &str) -> Result<Self> {
        let mut names = Self::new();
        names.load_hash_list(text)?;
        Ok(names)
    }

    /// Read a text hash list file.
    pub fn read_hash_list<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_hash_list(&std::fs::read_to_string(path)?)
    }

    /// Add entries from a text hash list, overwriting existing hashes.
    ///
    /// Each non-blank line is split on whitespace. The first token is the hash
    /// in hex (`0x` optional); when it is not hex, the hash is computed from
    /// the path. Lines with fewer than two tokens are skipped. Returns the
    /// number of entries read.
    pub fn load_hash_list(&mut self, text: &str) -> Result<usize> {
        let mut loaded = 0;
        for line in text.lines() {
            let mut tokens = line.split_whitespace();
            let (Some(first), Some(name)) = (tokens.next(), tokens.next()) else {
                continue;
            };
            let hash = parse_hex(first).unwrap_or_else(|| fnv::hash_str(name));
            self.insert(hash, name);
            loaded += 1;
        }
        Ok(loaded)
    }

    /// Add entries from the binary hash cache format: `u64` count, then
    /// `u64` hash and a 7-bit-length-prefixed UTF-8 string per entry.
    pub fn load_binary_cache(&mut self, data: &[u8]) -> Result<usize> {
        let mut reader = BinaryReader::new(data);
        let count = reader.read_u64()?;
        for i in 0..count {
            let entry = (|| {
                let hash = reader.read_u64()?;
                let len = reader.read_varint_u32()? as usize;
                let name = reader.read_string(len)?;
                Ok::<_, veles_common::Error>((hash, name))
            })();
            let (hash, name) = entry.map_err(|e| Error::HashList {
                line: i as usize + 1,
                reason: e.to_string(),
            })?;
            self.insert(hash, name);
        }
        Ok(count as usize)
    }

    /// Insert a mapping, returning the previous path for the hash.
    pub fn insert(&mut self, hash: u64, name: impl Into<String>) -> Option<String> {
        self.by_file_name.take();
        self.names.insert(hash, name.into())
    }

    /// Add every entry of `other` whose hash is not already present.
    pub fn merge(&mut self, other: &HashNames) -> usize {
        let mut added = 0;
        for (&hash, name) in &other.names {
            if !self.names.contains_key(&hash) {
                self.names.insert(hash, name.clone());
                added += 1;
            }
        }
        if added > 0 {
            self.by_file_name.take();
        }
        added
    }

    #[inline]
    pub fn get(&self, hash: u64) -> Option<&str> {
        self.names.get(&hash).map(String::as_str)
    }

    #[inline]
    pub fn contains(&self, hash: u64) -> bool {
        self.names.contains_key(&hash)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Iterate `(hash, path)` pairs in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &str)> + '_ {
        self.names.iter().map(|(&h, n)| (h, n.as_str()))
    }

    /// Distinct paths, sorted.
    pub fn all_paths(&self) -> Vec<&str> {
        self.names
            .values()
            .map(String::as_str)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Find a resolved path whose file name equals `file_name` exactly.
    ///
    /// When several paths share the name, the lexicographically smallest
    /// path wins so the choice is stable across runs.
    pub fn find_by_file_name(&self, file_name: &str) -> Option<(u64, &str)> {
        let index = self.by_file_name.get_or_init(|| self.build_file_name_index());
        index
            .get(file_name)?
            .iter()
            .filter_map(|&h| self.get(h).map(|n| (h, n)))
            .min_by(|a, b| a.1.cmp(b.1))
    }

    fn build_file_name_index(&self) -> FxHashMap<String, Vec<u64>> {
        let mut index: FxHashMap<String, Vec<u64>> = FxHashMap::default();
        for (&hash, name) in &self.names {
            index
                .entry(path::file_name(name).to_string())
                .or_default()
                .push(hash);
        }
        index
    }

    /// Render as a text hash list sorted by path.
    pub fn to_hash_list_string(&self) -> String {
        let mut entries: Vec<(&str, u64)> = self.names.iter().map(|(&h, n)| (n.as_str(), h)).collect();
        entries.sort_unstable();

        let mut out = String::with_capacity(entries.len() * 64);
        for (name, hash) in entries {
            // Writing to a String cannot fail.
            let _ = writeln!(out, "0x{hash:016X} {name}");
        }
        out
    }

    /// Write the text hash list to `path`.
    pub fn write_hash_list<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_hash_list_string())?;
        Ok(())
    }
}

impl FromIterator<(u64, String)> for HashNames {
    fn from_iter<I: IntoIterator<Item = (u64, String)>>(iter: I) -> Self {
        Self {
            names: iter.into_iter().collect(),
            by_file_name: OnceLock::new(),
        }
    }
}

impl Extend<(u64, String)> for HashNames {
    fn extend<I: IntoIterator<Item = (u64, String)>>(&mut self, iter: I) {
        self.by_file_name.take();
        self.names.extend(iter);
    }
}

fn parse_hex(token: &str) -> Option<u64> {
    let digits = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .unwrap_or(token);
    u64::from_str_radix(digits, 16).ok()
}
