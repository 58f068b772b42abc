//! Hash resolution, dependency walking and parallel extraction.
//!
//! The pieces, leaf first:
//!
//! - [`HashListGenerator`] recovers paths for the archive's hashes
//! - [`DependencyWalker`] extracts an asset and everything it references
//! - [`ExtractionWorkspace`] owns temp and output directories of a run
//! - [`ExtractionPipeline`] runs the jobs of a [`FileGroupExtractor`] in
//!   parallel with progress, cancellation and validation
//! - [`ModelGroupExtractor`] is the extractor for `.trmdl` models
//! - [`ExportService`] runs exports in the background for a host to poll
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use veles_archive::{HashNames, PackedArchiveStore};
//! use veles_extract::{
//!     CancellationToken, ExtractionOptions, ExtractionPipeline, ModelGroupExtractor,
//!     RawAssetExporter,
//! };
//!
//! let names = HashNames::read_hash_list("arc/hashes_inside_fd.txt")?;
//! let store = Arc::new(PackedArchiveStore::open("arc")?.with_names(names));
//! let options = ExtractionOptions::default();
//!
//! let extractor = ModelGroupExtractor::new(store, Arc::new(RawAssetExporter::default()), options.clone());
//! let pipeline = ExtractionPipeline::new(extractor, "out", options)?;
//! let summary = pipeline.run(&CancellationToken::new(), None)?;
//! println!("{} of {} models exported", summary.success, summary.total);
//! # Ok::<(), veles_extract::ExtractError>(())
//! ```

mod cancel;
mod error;

pub mod exporter;
pub mod hashgen;
pub mod job;
pub mod manifest;
pub mod model_extractor;
pub mod options;
pub mod pipeline;
pub mod service;
pub mod walker;
pub mod workspace;

pub use cancel::CancellationToken;
pub use error::{ExtractError, Result};
pub use exporter::{AssetExporter, ClipExport, ModelExport, RawAssetExporter};
pub use hashgen::{GenerationPhase, GenerationProgress, HashListGenerator};
pub use job::{ExtractionJob, ExtractionProgress, ExtractionResult, ExtractionSummary};
pub use manifest::{ClipEntry, ExportManifest};
pub use model_extractor::ModelGroupExtractor;
pub use options::{AnimationMode, ExtractionOptions};
pub use pipeline::{ExtractionPipeline, FileGroupExtractor, ProgressCallback};
pub use service::{ExportRequest, ExportService, JobPhase, JobStats, JobStatus, ServiceEvent};
pub use walker::{resolve_reference, DependencyClosure, DependencyWalker};
pub use workspace::ExtractionWorkspace;
