//! Content-hash addressed access to a TRPFD/TRPFS archive pair.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use memmap2::Mmap;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, info};
use veles_common::{fnv, path};

use crate::decompress::{Decompressor, MissingCodec};
use crate::descriptor::{ArchiveDescriptor, DESCRIPTOR_FILE_NAME};
use crate::filesystem::{ArchiveFileSystem, STORAGE_FILE_NAME};
use crate::names::HashNames;
use crate::pack::PackedArchive;
use crate::{Error, Result};

/// Read-only view of an archive directory.
///
/// The storage file is memory-mapped and only the byte range of a pack is
/// touched when it is first needed. Parsed packs are cached by pack hash for
/// the life of the store; the cache is safe for concurrent readers and a
/// racing double load simply replaces an identical entry.
pub struct PackedArchiveStore {
    directory: PathBuf,
    descriptor: ArchiveDescriptor,
    filesystem: ArchiveFileSystem,
    storage: Mmap,
    names: HashNames,
    decompressor: Arc<dyn Decompressor>,
    cache: RwLock<FxHashMap<u64, Arc<PackedArchive>>>,
    pack_loads: AtomicUsize,
}

impl PackedArchiveStore {
    /// Open `data.trpfd` and `data.trpfs` in `directory`.
    pub fn open<P: AsRef<Path>>(directory: P) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        let descriptor_path = directory.join(DESCRIPTOR_FILE_NAME);
        let storage_path = directory.join(STORAGE_FILE_NAME);

        if !descriptor_path.is_file() {
            return Err(Error::MissingDescriptor(descriptor_path));
        }
        if !storage_path.is_file() {
            return Err(Error::MissingFileSystem(storage_path));
        }

        let descriptor = ArchiveDescriptor::open(&descriptor_path)?;
        let file = File::open(&storage_path)?;
        // SAFETY: the archive is opened read-only and not modified while mapped.
        let storage = unsafe { Mmap::map(&file)? };
        let filesystem = ArchiveFileSystem::from_storage(&storage)?;

        info!(
            directory = %directory.display(),
            files = descriptor.file_count(),
            packs = descriptor.pack_names().len(),
            "opened archive"
        );

        Ok(Self {
            directory,
            descriptor,
            filesystem,
            storage,
            names: HashNames::new(),
            decompressor: Arc::new(MissingCodec),
            cache: RwLock::new(FxHashMap::default()),
            pack_loads: AtomicUsize::new(0),
        })
    }

    /// Use `decompressor` for compressed pack entries.
    pub fn with_decompressor(mut self, decompressor: Arc<dyn Decompressor>) -> Self {
        self.decompressor = decompressor;
        self
    }

    /// Attach a resolved hash to path table.
    pub fn with_names(mut self, names: HashNames) -> Self {
        self.names = names;
        self
    }

    pub fn set_names(&mut self, names: HashNames) {
        self.names = names;
    }

    #[inline]
    pub fn names(&self) -> &HashNames {
        &self.names
    }

    #[inline]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    #[inline]
    pub fn descriptor(&self) -> &ArchiveDescriptor {
        &self.descriptor
    }

    #[inline]
    pub fn decompressor(&self) -> &dyn Decompressor {
        self.decompressor.as_ref()
    }

    /// Extract a file by archive path.
    pub fn extract_by_path(&self, archive_path: &str) -> Result<Option<Vec<u8>>> {
        self.extract_by_hash(fnv::hash_str(&path::normalize(archive_path)))
    }

    /// Extract a file by content hash.
    ///
    /// `Ok(None)` means the archive does not contain the hash. Corrupt packs,
    /// out-of-range reads and codec failures are errors for this call only.
    pub fn extract_by_hash(&self, hash: u64) -> Result<Option<Vec<u8>>> {
        let Some(pack_index) = self.descriptor.pack_index_of(hash) else {
            return Ok(None);
        };
        let pack = self.pack(pack_index)?;
        let data = pack.read(hash, self.decompressor.as_ref())?;
        if data.is_none() {
            debug!(hash = %format!("{hash:016x}"), pack = pack_index, "hash missing from its pack");
        }
        Ok(data)
    }

    /// Whether the descriptor knows `hash` (primary or unused set).
    pub fn contains(&self, hash: u64) -> bool {
        self.descriptor.locate(hash).is_some()
    }

    /// Fetch a pack from the cache or load it from storage.
    pub fn pack(&self, pack_index: usize) -> Result<Arc<PackedArchive>> {
        let name = self
            .descriptor
            .pack_names()
            .get(pack_index)
            .ok_or_else(|| Error::malformed("descriptor", format!("no pack {pack_index}")))?;
        let pack_hash = fnv::hash_str(name);

        if let Some(pack) = self.cache.read().get(&pack_hash) {
            return Ok(Arc::clone(pack));
        }

        let offset = self
            .filesystem
            .offset_of(pack_hash)
            .ok_or_else(|| Error::PackNotFound {
                name: name.clone(),
                hash: pack_hash,
            })?;
        let size = self.descriptor.pack_info()[pack_index].file_size;
        let bytes = self.read_range(offset, size)?;

        // Parse outside the lock; only a fully parsed pack is inserted.
        let pack = Arc::new(PackedArchive::parse(bytes.to_vec())?);
        self.pack_loads.fetch_add(1, Ordering::Relaxed);
        debug!(pack = %name, offset, size, entries = pack.len(), "loaded pack");

        self.cache.write().insert(pack_hash, Arc::clone(&pack));
        Ok(pack)
    }

    fn read_range(&self, offset: u64, size: u64) -> Result<&[u8]> {
        let len = self.storage.len() as u64;
        match offset.checked_add(size) {
            Some(end) if end <= len => Ok(&self.storage[offset as usize..end as usize]),
            _ => Err(Error::OutOfRange { offset, size, len }),
        }
    }

    /// Resolved files whose name matches `predicate`, in descriptor order.
    ///
    /// Only primary-set hashes with a known name are visited. The returned
    /// iterator borrows the store, so it can be recreated at will.
    pub fn find_files<'a, F>(&'a self, mut predicate: F) -> impl Iterator<Item = (u64, &'a str)> + 'a
    where
        F: FnMut(&str) -> bool + 'a,
    {
        self.descriptor
            .file_hashes()
            .iter()
            .filter_map(move |&hash| {
                let name = self.names.get(hash)?;
                predicate(name).then_some((hash, name))
            })
    }

    /// Resolved files whose name ends with `extension` (case-insensitive).
    pub fn find_files_by_extension<'a>(&'a self, extension: &str) -> impl Iterator<Item = (u64, &'a str)> + 'a {
        let extension = extension.to_ascii_lowercase();
        self.find_files(move |name| name.to_ascii_lowercase().ends_with(&extension))
    }

    #[inline]
    pub fn file_count(&self) -> usize {
        self.descriptor.file_count()
    }

    #[inline]
    pub fn pack_names(&self) -> &[String] {
        self.descriptor.pack_names()
    }

    #[inline]
    pub fn file_hashes(&self) -> &[u64] {
        self.descriptor.file_hashes()
    }

    /// Every hash in the archive, primary set first.
    pub fn all_hashes(&self) -> impl Iterator<Item = u64> + '_ {
        self.descriptor.all_hashes()
    }

    #[inline]
    pub fn pack_index_of(&self, hash: u64) -> Option<usize> {
        self.descriptor.pack_index_of(hash)
    }

    #[inline]
    pub fn files_in_pack(&self, pack_index: usize) -> Vec<u64> {
        self.descriptor.files_in_pack(pack_index)
    }

    /// Number of packs read from storage so far.
    #[inline]
    pub fn pack_loads(&self) -> usize {
        self.pack_loads.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn cached_pack_count(&self) -> usize {
        self.cache.read().len()
    }

    /// Drop every cached pack. The cache is never cleared implicitly.
    pub fn clear_pack_cache(&self) {
        self.cache.write().clear();
    }
}

impl std::fmt::Debug for PackedArchiveStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackedArchiveStore")
            .field("directory", &self.directory)
            .field("files", &self.descriptor.file_count())
            .field("packs", &self.descriptor.pack_names().len())
            .field("cached_packs", &self.cached_pack_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ArchiveBuilder;

    fn two_pack_archive(dir: &Path) {
        ArchiveBuilder::new()
            .pack("arc/pack_a.trpak")
            .file("pokemon/a/one.trmdl", b"one".to_vec())
            .file("pokemon/a/two.trmtr", b"two".to_vec())
            .pack("arc/pack_b.trpak")
            .compressed_file("pokemon/b/three.bntx", b"three".to_vec())
            .unused_file("pokemon/b/old.bntx", b"old".to_vec())
            .write(dir)
            .unwrap();
    }

    #[test]
    fn test_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            PackedArchiveStore::open(dir.path()),
            Err(Error::MissingDescriptor(_))
        ));

        std::fs::write(dir.path().join(DESCRIPTOR_FILE_NAME), b"").unwrap();
        assert!(matches!(
            PackedArchiveStore::open(dir.path()),
            Err(Error::MissingFileSystem(_))
        ));
    }

    #[test]
    fn test_extract_by_path_and_hash() {
        let dir = tempfile::tempdir().unwrap();
        two_pack_archive(dir.path());
        let store = PackedArchiveStore::open(dir.path()).unwrap();

        assert_eq!(store.file_count(), 3);
        assert_eq!(
            store.extract_by_path("romfs://pokemon\\a\\one.trmdl").unwrap(),
            Some(b"one".to_vec())
        );
        assert_eq!(
            store.extract_by_hash(fnv::hash_str("pokemon/b/old.bntx")).unwrap(),
            Some(b"old".to_vec())
        );
        assert_eq!(store.extract_by_path("pokemon/nope.trmdl").unwrap(), None);
    }

    #[test]
    fn test_same_pack_loads_once() {
        let dir = tempfile::tempdir().unwrap();
        two_pack_archive(dir.path());
        let store = PackedArchiveStore::open(dir.path()).unwrap();

        store.extract_by_path("pokemon/a/one.trmdl").unwrap();
        store.extract_by_path("pokemon/a/two.trmtr").unwrap();
        assert_eq!(store.pack_loads(), 1);
        assert_eq!(store.cached_pack_count(), 1);

        store.clear_pack_cache();
        store.extract_by_path("pokemon/a/one.trmdl").unwrap();
        assert_eq!(store.pack_loads(), 2);
    }

    #[test]
    fn test_concurrent_readers_share_cache() {
        let dir = tempfile::tempdir().unwrap();
        two_pack_archive(dir.path());
        let store = Arc::new(PackedArchiveStore::open(dir.path()).unwrap());

        std::thread::scope(|scope| {
            for _ in 0..8 {
                let store = Arc::clone(&store);
                scope.spawn(move || {
                    let data = store.extract_by_path("pokemon/a/two.trmtr").unwrap();
                    assert_eq!(data, Some(b"two".to_vec()));
                });
            }
        });

        assert_eq!(store.cached_pack_count(), 1);
        assert!(store.pack_loads() >= 1);
    }

    #[test]
    fn test_compressed_entry_requires_codec() {
        let dir = tempfile::tempdir().unwrap();
        two_pack_archive(dir.path());
        let store = PackedArchiveStore::open(dir.path()).unwrap();

        assert!(matches!(
            store.extract_by_path("pokemon/b/three.bntx"),
            Err(Error::Decompression { .. })
        ));

        let store = store.with_decompressor(Arc::new(crate::testing::reverse_codec));
        assert_eq!(
            store.extract_by_path("pokemon/b/three.bntx").unwrap(),
            Some(b"three".to_vec())
        );
    }

    #[test]
    fn test_inspection_and_find_files() {
        let dir = tempfile::tempdir().unwrap();
        two_pack_archive(dir.path());
        let names = HashNames::from_hash_list(&format!(
            "0x{:016X} pokemon/a/one.trmdl\n0x{:016X} pokemon/a/two.trmtr\n",
            fnv::hash_str("pokemon/a/one.trmdl"),
            fnv::hash_str("pokemon/a/two.trmtr"),
        ))
        .unwrap();
        let store = PackedArchiveStore::open(dir.path()).unwrap().with_names(names);

        let one = fnv::hash_str("pokemon/a/one.trmdl");
        assert_eq!(store.pack_names().len(), 2);
        assert_eq!(store.pack_index_of(one), Some(0));
        assert_eq!(store.files_in_pack(0).len(), 2);
        assert_eq!(store.all_hashes().count(), 4);

        let models: Vec<_> = store.find_files_by_extension(".TRMDL").collect();
        assert_eq!(models, vec![(one, "pokemon/a/one.trmdl")]);
        // Restartable
        assert_eq!(store.find_files(|n| n.starts_with("pokemon/a/")).count(), 2);
        assert_eq!(store.find_files(|n| n.starts_with("pokemon/a/")).count(), 2);
    }

    #[test]
    fn test_out_of_range_pack() {
        let dir = tempfile::tempdir().unwrap();
        ArchiveBuilder::new()
            .pack("arc/pack_a.trpak")
            .file("x.bin", b"x".to_vec())
            .pack_size_override(0, 1 << 30)
            .write(dir.path())
            .unwrap();
        let store = PackedArchiveStore::open(dir.path()).unwrap();

        assert!(matches!(
            store.extract_by_path("x.bin"),
            Err(Error::OutOfRange { .. })
        ));
        assert_eq!(store.cached_pack_count(), 0);
    }
}
