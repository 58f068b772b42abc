//! Bounded-parallel job driver.
//!
//! [`ExtractionPipeline`] runs the jobs of any [`FileGroupExtractor`] on a
//! dedicated rayon pool sized by [`ExtractionOptions::max_parallelism`].
//! Every enumerated job produces exactly one [`ExtractionResult`] and one
//! progress event, whatever happens to it.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::job::{CANCELLED, VALIDATION_FAILED};
use crate::{
    CancellationToken, ExtractError, ExtractionJob, ExtractionOptions, ExtractionProgress,
    ExtractionResult, ExtractionSummary, ExtractionWorkspace, Result,
};

/// Message of jobs skipped because an earlier job failed with
/// `continue_on_error` off.
pub const ABORTED: &str = "Skipped after an earlier failure";

/// Progress sink invoked once per finished job, from worker threads.
pub type ProgressCallback<'a> = &'a (dyn Fn(&ExtractionProgress) + Sync);

/// A source of jobs and the work to do for each.
pub trait FileGroupExtractor: Sync {
    /// All jobs this extractor can run. Paths are assigned later.
    fn enumerate_jobs(&self) -> Result<Vec<ExtractionJob>>;

    /// Produce the job's output under `job.output_path`, using
    /// `job.temp_path` as scratch space.
    fn process_job(&self, job: &ExtractionJob, cancel: &CancellationToken) -> Result<ExtractionResult>;

    /// Check the output of a job that reported success.
    fn validate_job_output(&self, job: &ExtractionJob) -> bool;

    /// File whose presence means the job already ran (used by `skip_existing`).
    fn primary_output(&self, _job: &ExtractionJob) -> Option<PathBuf> {
        None
    }
}

/// Runs an extractor's jobs inside one workspace.
#[derive(Debug)]
pub struct ExtractionPipeline<E> {
    extractor: E,
    workspace: ExtractionWorkspace,
    options: ExtractionOptions,
}

impl<E: FileGroupExtractor> ExtractionPipeline<E> {
    /// Open the workspace under `output_root`.
    pub fn new<P: AsRef<Path>>(extractor: E, output_root: P, options: ExtractionOptions) -> Result<Self> {
        let workspace = ExtractionWorkspace::open(output_root, options.keep_raw_files)?;
        Ok(Self {
            extractor,
            workspace,
            options,
        })
    }

    pub fn extractor(&self) -> &E {
        &self.extractor
    }

    pub fn workspace(&self) -> &ExtractionWorkspace {
        &self.workspace
    }

    pub fn options(&self) -> &ExtractionOptions {
        &self.options
    }

    /// Enumerate, filter and assign paths to every job.
    pub fn prepare_jobs(&self) -> Result<Vec<ExtractionJob>> {
        let mut jobs = self.extractor.enumerate_jobs()?;
        if let Some(filter) = self.options.filter.as_deref().filter(|f| !f.is_empty()) {
            jobs.retain(|job| job.matches_filter(filter));
        }
        for job in &mut jobs {
            self.assign_paths(job)?;
        }
        Ok(jobs)
    }

    fn assign_paths(&self, job: &mut ExtractionJob) -> Result<()> {
        job.temp_path = self.workspace.job_temp_path(&job.id)?;
        job.output_path = self.workspace.job_output_path(&job.id, Some(&job.name))?;
        Ok(())
    }

    /// Run every job.
    ///
    /// With `continue_on_error` off, the first failure that is not a
    /// cancellation stops the run: remaining jobs are skipped and the
    /// failure is returned as [`ExtractError::JobFailed`], carrying the
    /// summary of the jobs that did run.
    pub fn run(
        &self,
        cancel: &CancellationToken,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<ExtractionSummary> {
        let jobs = self.prepare_jobs()?;
        self.run_jobs(jobs, cancel, progress)
    }

    /// Run jobs already returned by [`prepare_jobs`](Self::prepare_jobs).
    pub fn run_jobs(
        &self,
        jobs: Vec<ExtractionJob>,
        cancel: &CancellationToken,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<ExtractionSummary> {
        let start = Instant::now();
        let total = jobs.len();
        info!(jobs = total, parallelism = self.options.max_parallelism, "starting extraction run");

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.max_parallelism.max(1))
            .thread_name(|i| format!("veles-extract-{i}"))
            .build()?;

        let completed = AtomicUsize::new(0);
        let aborted = AtomicBool::new(false);
        let first_failure: Mutex<Option<(String, ExtractError)>> = Mutex::new(None);
        let results: Mutex<Vec<(usize, ExtractionResult)>> = Mutex::new(Vec::with_capacity(total));

        pool.install(|| {
            jobs.par_iter().enumerate().for_each(|(index, job)| {
                let result = if cancel.is_cancelled() {
                    ExtractionResult::skipped(job, Some(CANCELLED.to_string()))
                } else if aborted.load(Ordering::SeqCst) {
                    ExtractionResult::skipped(job, Some(ABORTED.to_string()))
                } else {
                    match self.run_job(job, cancel) {
                        Ok(result) => result,
                        Err(e) => {
                            aborted.store(true, Ordering::SeqCst);
                            let result = ExtractionResult::failed(job, e.to_string());
                            first_failure.lock().get_or_insert((job.id.clone(), e));
                            result
                        }
                    }
                };

                let current = completed.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(callback) = progress {
                    callback(&ExtractionProgress::from_result(&result, current, total));
                }
                results.lock().push((index, result));
            });
        });

        let mut results = results.into_inner();
        results.sort_unstable_by_key(|(index, _)| *index);
        let results = results.into_iter().map(|(_, r)| r).collect();
        let summary = ExtractionSummary::from_results(results, cancel.is_cancelled(), start.elapsed());

        if summary.failed == 0 {
            self.workspace.mark_validated();
        }
        info!(
            total = summary.total,
            success = summary.success,
            failed = summary.failed,
            skipped = summary.skipped,
            cancelled = summary.cancelled,
            seconds = summary.duration.as_secs_f64(),
            "extraction run finished"
        );

        if let Some((job_id, error)) = first_failure.into_inner() {
            return Err(ExtractError::JobFailed {
                job_id,
                message: error.to_string(),
                summary: Box::new(summary),
            });
        }
        Ok(summary)
    }

    /// Run one job by id with the same per-job handling as [`run`](Self::run).
    pub fn run_single(&self, job_id: &str, cancel: &CancellationToken) -> Result<ExtractionResult> {
        let mut job = self
            .extractor
            .enumerate_jobs()?
            .into_iter()
            .find(|job| job.id == job_id)
            .ok_or_else(|| ExtractError::JobNotFound(job_id.to_string()))?;
        self.assign_paths(&mut job)?;

        let result = self.run_job(&job, cancel)?;
        if result.success {
            self.workspace.mark_validated();
        }
        Ok(result)
    }

    /// Process and validate one job.
    ///
    /// Errors come back as failed results, except when `continue_on_error`
    /// is off and the error is not a cancellation.
    fn run_job(&self, job: &ExtractionJob, cancel: &CancellationToken) -> Result<ExtractionResult> {
        if self.options.skip_existing {
            if let Some(existing) = self.extractor.primary_output(job).filter(|p| p.is_file()) {
                debug!(job = %job.id, output = %existing.display(), "output exists, skipping");
                return Ok(ExtractionResult::skipped(job, None));
            }
        }

        let start = Instant::now();
        let mut result = match self.extractor.process_job(job, cancel) {
            Ok(result) if result.success && !self.extractor.validate_job_output(job) => {
                warn!(job = %job.id, "output validation failed");
                ExtractionResult {
                    success: false,
                    error_message: Some(VALIDATION_FAILED.to_string()),
                    ..result
                }
            }
            Ok(result) => result,
            Err(e) if e.is_cancelled() => ExtractionResult::failed(job, CANCELLED),
            Err(e) if self.options.continue_on_error => {
                warn!(job = %job.id, error = %e, "job failed");
                ExtractionResult::failed(job, e.to_string())
            }
            Err(e) => return Err(e),
        };
        result.duration = start.elapsed();
        Ok(result)
    }

    /// Release the workspace (removes ephemeral temp unless validated).
    pub fn close(&self) {
        self.workspace.close();
    }
}
