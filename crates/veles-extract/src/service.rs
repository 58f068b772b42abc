//! Job control for hosts (CLI, UI backends) that run exports in the
//! background and poll them.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use veles_archive::PackedArchiveStore;

use crate::exporter::AssetExporter;
use crate::{
    CancellationToken, ExtractError, ExtractionOptions, ExtractionPipeline, ExtractionProgress,
    ExtractionResult, FileGroupExtractor, ModelGroupExtractor, ProgressCallback, Result,
};

/// Upper bound on `max_parallelism` for service-started exports.
pub const MAX_PARALLEL_JOBS: usize = 16;

/// Log lines retained per export.
const MAX_LOG_LINES: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPhase {
    Scanning,
    Exporting,
    Complete,
    Cancelled,
    Error,
}

impl JobPhase {
    pub fn is_running(self) -> bool {
        matches!(self, JobPhase::Scanning | JobPhase::Exporting)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Snapshot returned by [`ExportService::status`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub id: String,
    pub phase: JobPhase,
    pub stats: JobStats,
    pub log_lines: Vec<String>,
    pub elapsed_seconds: f64,
    pub complete: bool,
    pub error: Option<String>,
}

/// What to export and how.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequest {
    pub output_dir: PathBuf,
    #[serde(default)]
    pub options: ExtractionOptions,
    #[serde(default)]
    pub max_models: Option<usize>,
}

/// Pushed to subscribers as exports advance.
#[derive(Debug, Clone)]
pub enum ServiceEvent {
    Phase { job_id: String, phase: JobPhase },
    Progress { job_id: String, progress: ExtractionProgress },
}

struct ExportState {
    phase: JobPhase,
    stats: JobStats,
    log_lines: Vec<String>,
    started: Instant,
    elapsed: Option<Duration>,
    results: Vec<ExtractionResult>,
    cancel: CancellationToken,
    error: Option<String>,
}

impl ExportState {
    fn new(cancel: CancellationToken) -> Self {
        Self {
            phase: JobPhase::Scanning,
            stats: JobStats::default(),
            log_lines: Vec::new(),
            started: Instant::now(),
            elapsed: None,
            results: Vec::new(),
            cancel,
            error: None,
        }
    }

    fn log(&mut self, line: String) {
        if self.log_lines.len() >= MAX_LOG_LINES {
            self.log_lines.remove(0);
        }
        self.log_lines.push(line);
    }
}

#[derive(Default)]
struct Shared {
    exports: Mutex<FxHashMap<String, ExportState>>,
    subscribers: Mutex<Vec<Sender<ServiceEvent>>>,
}

impl Shared {
    fn broadcast(&self, event: ServiceEvent) {
        self.subscribers.lock().retain(|s| s.send(event.clone()).is_ok());
    }

    fn update<F: FnOnce(&mut ExportState)>(&self, job_id: &str, f: F) {
        if let Some(state) = self.exports.lock().get_mut(job_id) {
            f(state);
        }
    }

    fn set_phase(&self, job_id: &str, phase: JobPhase, line: String) {
        self.update(job_id, |state| {
            state.phase = phase;
            if !phase.is_running() {
                state.elapsed = Some(state.started.elapsed());
            }
            state.log(line);
        });
        info!(job = %job_id, ?phase, "export phase changed");
        self.broadcast(ServiceEvent::Phase {
            job_id: job_id.to_string(),
            phase,
        });
    }
}

/// Runs one model export at a time on a background thread.
pub struct ExportService {
    store: Arc<PackedArchiveStore>,
    exporter: Arc<dyn AssetExporter>,
    shared: Arc<Shared>,
    handles: Mutex<FxHashMap<String, JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl ExportService {
    pub fn new(store: Arc<PackedArchiveStore>, exporter: Arc<dyn AssetExporter>) -> Self {
        Self {
            store,
            exporter,
            shared: Arc::new(Shared::default()),
            handles: Mutex::new(FxHashMap::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Start an export. Fails with [`ExtractError::Busy`] while another
    /// export is scanning or exporting.
    pub fn start(&self, request: ExportRequest) -> Result<String> {
        let job_id = format!("export-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let cancel = CancellationToken::new();
        {
            let mut exports = self.shared.exports.lock();
            if exports.values().any(|s| s.phase.is_running()) {
                return Err(ExtractError::Busy);
            }
            exports.insert(job_id.clone(), ExportState::new(cancel.clone()));
        }

        let shared = Arc::clone(&self.shared);
        let store = Arc::clone(&self.store);
        let exporter = Arc::clone(&self.exporter);
        let id = job_id.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("veles-{job_id}"))
            .spawn(move || run_export(&shared, &id, store, exporter, request, &cancel));
        self.register_thread(&job_id, spawned)?;
        Ok(job_id)
    }

    /// Track a spawned export thread. A failed spawn drops the export entry
    /// so it cannot hold the service busy.
    fn register_thread(&self, job_id: &str, spawned: std::io::Result<JoinHandle<()>>) -> Result<()> {
        match spawned {
            Ok(handle) => {
                self.handles.lock().insert(job_id.to_string(), handle);
                Ok(())
            }
            Err(e) => {
                self.shared.exports.lock().remove(job_id);
                warn!(job = %job_id, error = %e, "failed to spawn export thread");
                Err(e.into())
            }
        }
    }

    pub fn status(&self, job_id: &str) -> Option<JobStatus> {
        let exports = self.shared.exports.lock();
        let state = exports.get(job_id)?;
        Some(JobStatus {
            id: job_id.to_string(),
            phase: state.phase,
            stats: state.stats,
            log_lines: state.log_lines.clone(),
            elapsed_seconds: state.elapsed.unwrap_or_else(|| state.started.elapsed()).as_secs_f64(),
            complete: !state.phase.is_running(),
            error: state.error.clone(),
        })
    }

    /// Request cancellation. Returns false for unknown or finished exports.
    pub fn cancel(&self, job_id: &str) -> bool {
        let mut exports = self.shared.exports.lock();
        match exports.get_mut(job_id) {
            Some(state) if state.phase.is_running() => {
                state.cancel.cancel();
                state.log("Cancellation requested".to_string());
                true
            }
            _ => false,
        }
    }

    /// Per-model results recorded so far.
    pub fn results(&self, job_id: &str) -> Option<Vec<ExtractionResult>> {
        self.shared.exports.lock().get(job_id).map(|s| s.results.clone())
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> Receiver<ServiceEvent> {
        let (sender, receiver) = unbounded();
        self.shared.subscribers.lock().push(sender);
        receiver
    }

    /// Block until the export's thread finishes, then return its status.
    pub fn wait(&self, job_id: &str) -> Option<JobStatus> {
        let handle = self.handles.lock().remove(job_id);
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!(job = %job_id, "export thread panicked");
            }
        }
        self.status(job_id)
    }
}

impl std::fmt::Debug for ExportService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportService")
            .field("store", &self.store.directory())
            .field("exports", &self.shared.exports.lock().len())
            .finish()
    }
}

fn run_export(
    shared: &Shared,
    job_id: &str,
    store: Arc<PackedArchiveStore>,
    exporter: Arc<dyn AssetExporter>,
    request: ExportRequest,
    cancel: &CancellationToken,
) {
    let mut options = request.options;
    options.max_parallelism = options.max_parallelism.clamp(1, MAX_PARALLEL_JOBS);

    let extractor = ModelGroupExtractor::new(store, exporter, options.clone()).with_max_models(request.max_models);
    let outcome = ExtractionPipeline::new(extractor, &request.output_dir, options).and_then(|pipeline| {
        let jobs = pipeline.prepare_jobs()?;
        let total = jobs.len();
        shared.update(job_id, |state| state.stats.total = total);
        shared.set_phase(job_id, JobPhase::Exporting, format!("Exporting {total} models"));

        let on_progress = |progress: &ExtractionProgress| {
            shared.update(job_id, |state| {
                if progress.success {
                    state.stats.success += 1;
                } else if progress.skipped {
                    state.stats.skipped += 1;
                } else {
                    state.stats.failed += 1;
                }
                let outcome = match (&progress.error_message, progress.success) {
                    (_, true) => "ok".to_string(),
                    (Some(message), false) => message.clone(),
                    (None, false) => "skipped".to_string(),
                };
                state.log(format!(
                    "[{}/{}] {}: {outcome}",
                    progress.current, progress.total, progress.job_name
                ));
            });
            shared.broadcast(ServiceEvent::Progress {
                job_id: job_id.to_string(),
                progress: progress.clone(),
            });
        };
        let sink: ProgressCallback<'_> = &on_progress;
        pipeline.run_jobs(jobs, cancel, Some(sink))
    });

    match outcome {
        Ok(summary) => {
            let cancelled = summary.cancelled;
            shared.update(job_id, |state| state.results = summary.results);
            let (phase, line) = if cancelled {
                (JobPhase::Cancelled, "Export cancelled".to_string())
            } else {
                (JobPhase::Complete, "Export complete".to_string())
            };
            shared.set_phase(job_id, phase, line);
        }
        Err(e) if e.is_cancelled() => shared.set_phase(job_id, JobPhase::Cancelled, "Export cancelled".to_string()),
        Err(ExtractError::JobFailed {
            job_id: failed_job,
            message,
            summary,
        }) => {
            warn!(job = %job_id, failed_job = %failed_job, error = %message, "export stopped on error");
            let message = format!("job {failed_job} failed: {message}");
            shared.update(job_id, |state| {
                state.results = summary.results;
                state.error = Some(message.clone());
            });
            shared.set_phase(job_id, JobPhase::Error, format!("Export failed: {message}"));
        }
        Err(e) => {
            warn!(job = %job_id, error = %e, "export failed");
            let message = e.to_string();
            shared.update(job_id, |state| state.error = Some(message.clone()));
            shared.set_phase(job_id, JobPhase::Error, format!("Export failed: {message}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::{ClipExport, ModelExport, RawAssetExporter};
    use crate::AnimationMode;
    use std::path::Path;
    use veles_archive::testing::ArchiveBuilder;
    use veles_common::fnv;
    use veles_trinity::TrinityModel;

    const MODELS: [&str; 2] = ["pokemon/pm0001/pm0001.trmdl", "pokemon/pm0004/pm0004.trmdl"];

    fn store(dir: &Path) -> Arc<PackedArchiveStore> {
        let mut builder = ArchiveBuilder::new();
        for model in MODELS {
            builder = builder.file(model, TrinityModel::default().to_bytes());
        }
        builder.write(dir).unwrap();
        let names = MODELS.iter().map(|p| (fnv::hash_path(p), p.to_string())).collect();
        Arc::new(PackedArchiveStore::open(dir).unwrap().with_names(names))
    }

    /// Blocks every model export until the test releases it.
    struct GatedExporter {
        gate: Receiver<()>,
    }

    impl AssetExporter for GatedExporter {
        fn model_format(&self) -> &str {
            "trmdl"
        }

        fn clip_format(&self) -> &str {
            "tranm"
        }

        fn export_model(&self, temp_root: &Path, model_path: &str, output: &Path) -> Result<ModelExport> {
            self.gate.recv().ok();
            RawAssetExporter::default().export_model(temp_root, model_path, output)
        }

        fn export_texture(&self, source: &Path, output_dir: &Path) -> Result<Vec<String>> {
            RawAssetExporter::default().export_texture(source, output_dir)
        }

        fn export_clip(&self, clip: &Path, model: &Path, output: &Path, mode: AnimationMode) -> Result<ClipExport> {
            RawAssetExporter::default().export_clip(clip, model, output, mode)
        }
    }

    fn request(dir: &Path) -> ExportRequest {
        ExportRequest {
            output_dir: dir.join("out"),
            options: ExtractionOptions {
                max_parallelism: 64,
                ..Default::default()
            },
            max_models: None,
        }
    }

    #[test]
    fn test_export_completes() {
        let dir = tempfile::tempdir().unwrap();
        let service = ExportService::new(store(&dir.path().join("archive")), Arc::new(RawAssetExporter::default()));
        let events = service.subscribe();

        let id = service.start(request(dir.path())).unwrap();
        let status = service.wait(&id).unwrap();

        assert_eq!(status.phase, JobPhase::Complete);
        assert!(status.complete);
        assert_eq!(status.stats, JobStats { total: 2, success: 2, failed: 0, skipped: 0 });
        assert_eq!(service.results(&id).unwrap().len(), 2);

        let progress = events
            .try_iter()
            .filter(|e| matches!(e, ServiceEvent::Progress { .. }))
            .count();
        assert_eq!(progress, 2);
        assert!(!service.cancel(&id));
    }

    #[test]
    fn test_filtered_export_counts_only_matching_models() {
        let dir = tempfile::tempdir().unwrap();
        let service = ExportService::new(store(&dir.path().join("archive")), Arc::new(RawAssetExporter::default()));
        let mut req = request(dir.path());
        req.options.filter = Some("pm0001".to_string());

        let id = service.start(req).unwrap();
        let status = service.wait(&id).unwrap();

        assert_eq!(status.phase, JobPhase::Complete);
        assert_eq!(status.stats, JobStats { total: 1, success: 1, failed: 0, skipped: 0 });
        assert_eq!(service.results(&id).unwrap().len(), 1);
    }

    #[test]
    fn test_stop_on_error_keeps_finished_results() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("archive");
        ArchiveBuilder::new()
            .file(MODELS[0], vec![0xFF; 8])
            .file(MODELS[1], TrinityModel::default().to_bytes())
            .write(&archive)
            .unwrap();
        let names = MODELS.iter().map(|p| (fnv::hash_path(p), p.to_string())).collect();
        let store = Arc::new(PackedArchiveStore::open(&archive).unwrap().with_names(names));
        let service = ExportService::new(store, Arc::new(RawAssetExporter::default()));
        let mut req = request(dir.path());
        req.options.continue_on_error = false;
        req.options.max_parallelism = 1;

        let id = service.start(req).unwrap();
        let status = service.wait(&id).unwrap();

        assert_eq!(status.phase, JobPhase::Error);
        assert!(status.error.is_some());
        let results = service.results(&id).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results.iter().filter(|r| r.is_failed()).count(), 1);

        let next = service.start(request(dir.path())).unwrap();
        assert_ne!(next, id);
        service.wait(&next);
    }

    #[test]
    fn test_failed_spawn_releases_service() {
        let dir = tempfile::tempdir().unwrap();
        let service = ExportService::new(store(&dir.path().join("archive")), Arc::new(RawAssetExporter::default()));
        service
            .shared
            .exports
            .lock()
            .insert("export-x".to_string(), ExportState::new(CancellationToken::new()));

        let spawned = Err(std::io::Error::new(std::io::ErrorKind::Other, "no threads left"));
        assert!(matches!(service.register_thread("export-x", spawned), Err(ExtractError::Io(_))));
        assert!(service.status("export-x").is_none());

        let id = service.start(request(dir.path())).unwrap();
        assert_eq!(service.wait(&id).unwrap().phase, JobPhase::Complete);
    }

    #[test]
    fn test_busy_and_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let (release, gate) = unbounded();
        let service = ExportService::new(store(&dir.path().join("archive")), Arc::new(GatedExporter { gate }));
        let mut req = request(dir.path());
        req.options.max_parallelism = 1;

        let id = service.start(req.clone()).unwrap();
        assert!(matches!(service.start(req), Err(ExtractError::Busy)));

        assert!(service.cancel(&id));
        release.send(()).unwrap();
        release.send(()).unwrap();
        let status = service.wait(&id).unwrap();

        assert_eq!(status.phase, JobPhase::Cancelled);
        let stats = status.stats;
        assert_eq!(stats.success + stats.failed + stats.skipped, stats.total);
        assert_eq!(stats.success, 0);
    }
}
