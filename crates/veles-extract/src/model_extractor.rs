//! One job per model: walk, export, manifest.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};
use veles_archive::PackedArchiveStore;
use veles_common::path;
use veles_trinity::{ext, TrinityModel};

use crate::exporter::AssetExporter;
use crate::manifest::{ClipEntry, ExportManifest, MANIFEST_FILE_NAME};
use crate::walker::DependencyWalker;
use crate::workspace::validate_output;
use crate::{
    AnimationMode, CancellationToken, ExtractError, ExtractionJob, ExtractionOptions, ExtractionResult,
    FileGroupExtractor, Result,
};

pub const TEXTURES_DIR: &str = "textures";

/// Extracts every resolved `.trmdl` in an archive as its own job.
pub struct ModelGroupExtractor {
    store: Arc<PackedArchiveStore>,
    exporter: Arc<dyn AssetExporter>,
    options: ExtractionOptions,
    max_models: Option<usize>,
}

impl ModelGroupExtractor {
    pub fn new(store: Arc<PackedArchiveStore>, exporter: Arc<dyn AssetExporter>, options: ExtractionOptions) -> Self {
        Self {
            store,
            exporter,
            options,
            max_models: None,
        }
    }

    /// Enumerate at most `max_models` jobs (in path order).
    pub fn with_max_models(mut self, max_models: Option<usize>) -> Self {
        self.max_models = max_models;
        self
    }

    pub fn store(&self) -> &PackedArchiveStore {
        &self.store
    }

    fn model_file_name(&self) -> String {
        format!("model.{}", self.exporter.model_format())
    }

    fn export_textures(&self, job: &ExtractionJob, cancel: &CancellationToken) -> Result<Vec<String>> {
        let textures_dir = job.output_path.join(TEXTURES_DIR);
        let pattern = format!(
            "{}/**/*{}",
            glob::Pattern::escape(&job.temp_path.to_string_lossy()),
            ext::TEXTURE
        );
        let entries = glob::glob(&pattern).map_err(|e| ExtractError::Export(e.to_string()))?;

        let mut textures = Vec::new();
        for source in entries.filter_map(|e| e.ok()) {
            cancel.check()?;
            match self.exporter.export_texture(&source, &textures_dir) {
                Ok(files) => textures.extend(files.into_iter().map(|f| format!("{TEXTURES_DIR}/{f}"))),
                Err(e) => warn!(job = %job.id, texture = %source.display(), error = %e, "texture export failed"),
            }
        }
        textures.sort();
        textures.dedup();
        Ok(textures)
    }

    fn export_clips(&self, job: &ExtractionJob, model_path: &str, cancel: &CancellationToken) -> Result<Vec<ClipEntry>> {
        let model_dir = path::directory_of(model_path);
        let mut sources: Vec<(u64, &str)> = self
            .store
            .find_files(|name| name.starts_with(model_dir) && path::extension(name) == ext::ANIMATION)
            .collect();
        sources.sort_by(|a, b| a.1.cmp(b.1));

        let mode = self.options.animation_mode;
        let clip_dir = mode.clip_dir();
        let model_file = job.output_path.join(self.model_file_name());
        let mut clips = Vec::new();

        for (hash, name) in sources {
            cancel.check()?;
            let data = match self.store.extract_by_hash(hash) {
                Ok(Some(data)) => data,
                Ok(None) => continue,
                Err(e) => {
                    warn!(job = %job.id, clip = %name, error = %e, "clip extraction failed");
                    continue;
                }
            };
            let raw = job.temp_path.join(path::join("", name));
            if let Some(parent) = raw.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&raw, data)?;

            let index = clips.len();
            let file = format!("{clip_dir}/clip_{index:03}.{}", self.exporter.clip_format());
            match self.exporter.export_clip(&raw, &model_file, &job.output_path.join(&file), mode) {
                Ok(export) => clips.push(ClipEntry {
                    index,
                    id: format!("{hash:016x}"),
                    source_name: path::file_stem(name).to_string(),
                    file,
                    frame_count: export.frame_count,
                    fps: export.fps,
                }),
                Err(e) => warn!(job = %job.id, clip = %name, error = %e, "clip export failed"),
            }
        }
        Ok(clips)
    }

    /// Baked clips reference their textures next to them.
    fn copy_textures_for_baked(&self, job: &ExtractionJob, textures: &[String]) -> Result<()> {
        let target = job
            .output_path
            .join(AnimationMode::Baked.clip_dir())
            .join(TEXTURES_DIR);
        std::fs::create_dir_all(&target)?;
        for texture in textures {
            let source = job.output_path.join(texture);
            if let Some(name) = source.file_name() {
                std::fs::copy(&source, target.join(name))?;
            }
        }
        Ok(())
    }
}

impl FileGroupExtractor for ModelGroupExtractor {
    fn enumerate_jobs(&self) -> Result<Vec<ExtractionJob>> {
        let mut models: Vec<(u64, &str)> = self.store.find_files_by_extension(ext::MODEL).collect();
        models.sort_by(|a, b| a.1.cmp(b.1));
        if let Some(max) = self.max_models {
            models.truncate(max);
        }

        Ok(models
            .into_iter()
            .map(|(hash, model_path)| {
                let model_path = path::normalize(model_path);
                let metadata = BTreeMap::from([
                    ("hash".to_string(), format!("{hash:016x}")),
                    ("model_dir".to_string(), path::directory_of(&model_path).to_string()),
                    ("model_path".to_string(), model_path.clone()),
                ]);
                ExtractionJob {
                    id: format!("{hash:016x}"),
                    name: path::file_stem(&model_path).to_string(),
                    source_files: vec![model_path],
                    metadata,
                    ..Default::default()
                }
            })
            .collect())
    }

    fn process_job(&self, job: &ExtractionJob, cancel: &CancellationToken) -> Result<ExtractionResult> {
        cancel.check()?;
        let model_path = job
            .metadata("model_path")
            .or_else(|| job.source_files.first().map(String::as_str))
            .ok_or_else(|| ExtractError::RootNotFound(job.id.clone()))?;

        let closure = DependencyWalker::new(&self.store, &job.temp_path)
            .with_archive_roots(self.options.archive_roots.iter().cloned())
            .with_cancellation(cancel)
            .walk(model_path)?;
        debug!(job = %job.id, files = closure.len(), missing = closure.missing.len(), "dependencies extracted");

        cancel.check()?;
        let model_file = self.model_file_name();
        let model_export = self
            .exporter
            .export_model(&job.temp_path, &closure.root, &job.output_path.join(&model_file))?;

        let textures = self.export_textures(job, cancel)?;

        let model = TrinityModel::parse(&std::fs::read(job.temp_path.join(&closure.root))?)?;
        let clips = if model.skeleton.is_some() {
            self.export_clips(job, &closure.root, cancel)?
        } else {
            Vec::new()
        };
        if self.options.animation_mode == AnimationMode::Baked && !clips.is_empty() {
            self.copy_textures_for_baked(job, &textures)?;
        }

        let mut manifest = ExportManifest::new(self.exporter.model_format(), &model_file, self.options.animation_mode);
        manifest.raw_files = closure.extracted.clone();
        manifest.textures = textures;
        manifest.clips = clips;
        manifest.write(job.output_path.join(MANIFEST_FILE_NAME))?;

        let mut result = ExtractionResult::succeeded(job);
        result.output_files.push(model_file);
        result.output_files.extend(manifest.textures.iter().cloned());
        result.output_files.extend(manifest.clips.iter().map(|c| c.file.clone()));
        result.output_files.push(MANIFEST_FILE_NAME.to_string());
        result.stats = BTreeMap::from([
            ("submeshes".to_string(), model_export.submeshes),
            ("materials".to_string(), model_export.materials),
            ("bones".to_string(), model_export.bones),
            ("textures".to_string(), manifest.textures.len() as u64),
            ("animations".to_string(), manifest.clips.len() as u64),
            ("dependencies".to_string(), closure.len() as u64),
            ("missing_dependencies".to_string(), closure.missing.len() as u64),
        ]);
        Ok(result)
    }

    fn validate_job_output(&self, job: &ExtractionJob) -> bool {
        validate_output(&job.output_path, &[&self.model_file_name(), MANIFEST_FILE_NAME])
            && ExportManifest::read(job.output_path.join(MANIFEST_FILE_NAME)).is_ok()
    }

    fn primary_output(&self, job: &ExtractionJob) -> Option<PathBuf> {
        Some(job.output_path.join(self.model_file_name()))
    }
}

impl std::fmt::Debug for ModelGroupExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelGroupExtractor")
            .field("store", &self.store.directory())
            .field("model_format", &self.exporter.model_format())
            .field("max_models", &self.max_models)
            .finish()
    }
}
