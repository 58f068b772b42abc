//! Temp and output directory lifecycle for a run.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::Result;

/// Subdirectory of the output root holding raw files in keep mode.
pub const RAW_DIR_NAME: &str = ".raw";

/// Owns the temp root and output root of one pipeline run.
///
/// Temp paths are addressed by job id. Output folders use the job's display
/// name; when two jobs share a display name the later claimant gets
/// `<name>_<jobId>`, with a counter appended if that is taken as well.
#[derive(Debug)]
pub struct ExtractionWorkspace {
    output_root: PathBuf,
    temp_root: PathBuf,
    keep_temp: bool,
    validated: AtomicBool,
    closed: AtomicBool,
    output_folders: Mutex<OutputFolders>,
}

#[derive(Debug, Default)]
struct OutputFolders {
    by_job: FxHashMap<String, String>,
    owners: FxHashMap<String, String>,
}

impl ExtractionWorkspace {
    /// Create the output root and the temp root.
    ///
    /// With `keep_temp`, temp lives under `<output_root>/.raw`; otherwise in a
    /// fresh directory under the system temp location.
    pub fn open<P: AsRef<Path>>(output_root: P, keep_temp: bool) -> Result<Self> {
        let output_root = output_root.as_ref().to_path_buf();
        std::fs::create_dir_all(&output_root)?;

        let temp_root = if keep_temp {
            let raw = output_root.join(RAW_DIR_NAME);
            std::fs::create_dir_all(&raw)?;
            raw
        } else {
            tempfile::Builder::new().prefix("veles-").tempdir()?.keep()
        };
        debug!(output = %output_root.display(), temp = %temp_root.display(), keep_temp, "opened workspace");

        Ok(Self {
            output_root,
            temp_root,
            keep_temp,
            validated: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            output_folders: Mutex::new(OutputFolders::default()),
        })
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub fn temp_root(&self) -> &Path {
        &self.temp_root
    }

    pub fn keeps_temp(&self) -> bool {
        self.keep_temp
    }

    /// Temp directory of a job, created on first access.
    pub fn job_temp_path(&self, job_id: &str) -> Result<PathBuf> {
        let path = self.temp_root.join(sanitize(job_id));
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Output directory of a job, created on first access.
    ///
    /// Repeated calls for the same job return the same directory.
    pub fn job_output_path(&self, job_id: &str, display_name: Option<&str>) -> Result<PathBuf> {
        let folder = self.claim_output_folder(job_id, display_name);
        let path = self.output_root.join(folder);
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }

    fn claim_output_folder(&self, job_id: &str, display_name: Option<&str>) -> String {
        let mut folders = self.output_folders.lock();
        if let Some(folder) = folders.by_job.get(job_id) {
            return folder.clone();
        }

        let base = sanitize(display_name.filter(|n| !n.trim().is_empty()).unwrap_or(job_id));
        let suffixed = format!("{base}_{}", sanitize(job_id));
        let taken = |name: &str| folders.owners.get(name).is_some_and(|owner| owner != job_id);
        let folder = if !taken(&base) {
            base
        } else if !taken(&suffixed) {
            suffixed
        } else {
            let mut n = 2;
            while taken(&format!("{suffixed}_{n}")) {
                n += 1;
            }
            format!("{suffixed}_{n}")
        };
        folders.owners.insert(folder.clone(), job_id.to_string());
        folders.by_job.insert(job_id.to_string(), folder.clone());
        folder
    }

    /// Record that every job of the run succeeded.
    pub fn mark_validated(&self) {
        self.validated.store(true, Ordering::SeqCst);
    }

    pub fn is_validated(&self) -> bool {
        self.validated.load(Ordering::SeqCst)
    }

    /// Release the workspace. Ephemeral temp is removed unless the run was
    /// validated. Removal errors are logged, never returned.
    ///
    /// Safe to call more than once; also runs on drop.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.keep_temp || self.is_validated() {
            return;
        }
        match std::fs::remove_dir_all(&self.temp_root) {
            Ok(()) => debug!(temp = %self.temp_root.display(), "removed temp directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(temp = %self.temp_root.display(), error = %e, "failed to remove temp directory"),
        }
    }
}

impl Drop for ExtractionWorkspace {
    fn drop(&mut self) {
        self.close();
    }
}

/// Check a job's output directory for the files it must contain.
///
/// Every entry of `expected` must exist under `job_output` and be non-empty.
pub fn validate_output(job_output: &Path, expected: &[&str]) -> bool {
    expected.iter().all(|name| {
        std::fs::metadata(job_output.join(name))
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    })
}

fn sanitize(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}
