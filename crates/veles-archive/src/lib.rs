//! Reader for TRPFD/TRPFS game archives.
//!
//! An archive directory holds two files:
//!
//! - `data.trpfd` - the descriptor: file hash to pack index, pack names and
//!   sizes, plus an "unused" table of files outside the live set
//! - `data.trpfs` - the storage file: an ONEFILE header, the serialized
//!   packs, and an embedded index from pack hash to offset
//!
//! Files are addressed by the FNV-1a 64 hash of their normalized path.
//! Names are recovered separately and kept in a [`HashNames`] table.
//!
//! # Example
//!
//! ```no_run
//! use veles_archive::{HashNames, PackedArchiveStore};
//!
//! let names = HashNames::read_hash_list("arc/hashes_inside_fd.txt")?;
//! let store = PackedArchiveStore::open("arc")?.with_names(names);
//!
//! for (hash, name) in store.find_files_by_extension(".trmdl") {
//!     if let Some(data) = store.extract_by_hash(hash)? {
//!         println!("{name}: {} bytes", data.len());
//!     }
//! }
//! # Ok::<(), veles_archive::Error>(())
//! ```

mod error;

pub mod decompress;
pub mod descriptor;
pub mod filesystem;
pub mod gfpak;
pub mod names;
pub mod pack;
pub mod store;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use decompress::{Decompressor, MissingCodec, OodleCodec};
pub use descriptor::ArchiveDescriptor;
pub use error::{Error, Result};
pub use filesystem::ArchiveFileSystem;
pub use gfpak::GfpakArchive;
pub use names::HashNames;
pub use pack::{PackedArchive, PackedFile};
pub use store::PackedArchiveStore;
