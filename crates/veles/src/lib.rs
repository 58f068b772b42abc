//! Veles - archive resolution and model extraction for TRPFD/TRPFS game
//! archives.
//!
//! # Crates
//!
//! - [`veles_common`] - Binary reading, FNV-1a path hashing, path
//!   normalization, FlatBuffer tables
//! - [`veles_archive`] - Descriptor, storage file, packs, hash names and
//!   standalone `.trpak` archives
//! - [`veles_trinity`] - Model, mesh and material schemas
//! - [`veles_extract`] - Hash list generation, dependency walking and the
//!   parallel extraction pipeline
//!
//! # Example
//!
//! ```no_run
//! use veles::prelude::*;
//!
//! let names = HashNames::read_hash_list("arc/hashes_inside_fd.txt")?;
//! let store = PackedArchiveStore::open("arc")?.with_names(names);
//!
//! let closure = DependencyWalker::new(&store, "tmp").walk("pokemon/pm0025/pm0025.trmdl")?;
//! println!("{} files, {} missing", closure.len(), closure.missing.len());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub use veles_archive as archive;
pub use veles_common as common;
pub use veles_extract as extract;
pub use veles_trinity as trinity;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use veles_archive::{ArchiveDescriptor, Decompressor, GfpakArchive, HashNames, PackedArchiveStore};
    pub use veles_common::{fnv, path, BinaryReader};
    pub use veles_extract::{
        CancellationToken, DependencyWalker, ExportService, ExtractionOptions, ExtractionPipeline,
        ExtractionSummary, FileGroupExtractor, HashListGenerator, ModelGroupExtractor, RawAssetExporter,
    };
    pub use veles_trinity::{TrinityMaterialSet, TrinityMeshSet, TrinityModel};
}

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
