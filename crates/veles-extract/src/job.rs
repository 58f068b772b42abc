//! Jobs, per-job results and run summaries.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::Result;

/// Error message recorded for jobs stopped by cancellation.
pub const CANCELLED: &str = "Cancelled";

/// Error message recorded when processing succeeded but validation did not.
pub const VALIDATION_FAILED: &str = "Output validation failed";

/// One unit of work: a root asset and everything it pulls in.
///
/// `temp_path` and `output_path` are assigned by the workspace before the
/// job is processed and belong to this job alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionJob {
    pub id: String,
    pub name: String,
    pub source_files: Vec<String>,
    pub temp_path: PathBuf,
    pub output_path: PathBuf,
    pub metadata: BTreeMap<String, String>,
}

impl ExtractionJob {
    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Case-insensitive substring match against the source files.
    pub fn matches_filter(&self, filter: &str) -> bool {
        let needle = filter.to_lowercase();
        self.source_files
            .iter()
            .any(|f| f.to_lowercase().contains(&needle))
    }
}

/// Outcome of one job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    pub job_id: String,
    pub job_name: String,
    pub success: bool,
    /// Not processed (existing output or cancellation before start).
    pub skipped: bool,
    pub error_message: Option<String>,
    /// Paths relative to the job's output directory.
    pub output_files: Vec<String>,
    pub stats: BTreeMap<String, u64>,
    pub duration: Duration,
}

impl ExtractionResult {
    pub fn succeeded(job: &ExtractionJob) -> Self {
        Self {
            job_id: job.id.clone(),
            job_name: job.name.clone(),
            success: true,
            ..Default::default()
        }
    }

    pub fn failed(job: &ExtractionJob, message: impl Into<String>) -> Self {
        Self {
            job_id: job.id.clone(),
            job_name: job.name.clone(),
            error_message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn skipped(job: &ExtractionJob, reason: Option<String>) -> Self {
        Self {
            job_id: job.id.clone(),
            job_name: job.name.clone(),
            skipped: true,
            error_message: reason,
            ..Default::default()
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.error_message.as_deref() == Some(CANCELLED)
    }

    pub fn is_failed(&self) -> bool {
        !self.success && !self.skipped
    }
}

/// Emitted once per finished job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionProgress {
    /// Jobs finished so far, including this one.
    pub current: usize,
    pub total: usize,
    pub job_id: String,
    pub job_name: String,
    pub success: bool,
    pub skipped: bool,
    pub error_message: Option<String>,
    pub stats: BTreeMap<String, u64>,
}

impl ExtractionProgress {
    pub fn from_result(result: &ExtractionResult, current: usize, total: usize) -> Self {
        Self {
            current,
            total,
            job_id: result.job_id.clone(),
            job_name: result.job_name.clone(),
            success: result.success,
            skipped: result.skipped,
            error_message: result.error_message.clone(),
            stats: result.stats.clone(),
        }
    }

    pub fn percent_complete(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.current as f64 / self.total as f64 * 100.0
        }
    }
}

/// Aggregate of a pipeline run. `total == success + failed + skipped`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionSummary {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Cancellation was requested during the run.
    pub cancelled: bool,
    pub duration: Duration,
    pub results: Vec<ExtractionResult>,
}

impl ExtractionSummary {
    /// Count outcomes of `results`.
    pub fn from_results(results: Vec<ExtractionResult>, cancelled: bool, duration: Duration) -> Self {
        let success = results.iter().filter(|r| r.success).count();
        let skipped = results.iter().filter(|r| r.skipped).count();
        Self {
            total: results.len(),
            success,
            failed: results.len() - success - skipped,
            skipped,
            cancelled,
            duration,
            results,
        }
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &ExtractionResult> + '_ {
        self.results.iter().filter(|r| r.success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ExtractionResult> + '_ {
        self.results.iter().filter(|r| r.is_failed())
    }

    /// Write a JSON run report.
    pub fn write_report<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let models: Vec<_> = self
            .succeeded()
            .map(|r| {
                json!({
                    "id": r.job_id,
                    "name": r.job_name,
                    "stats": r.stats,
                    "durationMs": r.duration.as_millis() as u64,
                })
            })
            .collect();
        let failures: Vec<_> = self
            .failures()
            .map(|r| {
                json!({
                    "id": r.job_id,
                    "name": r.job_name,
                    "error": r.error_message,
                })
            })
            .collect();

        let report = json!({
            "durationSeconds": self.duration.as_secs_f64(),
            "succeeded": self.success,
            "failed": self.failed,
            "skipped": self.skipped,
            "total": self.total,
            "cancelled": self.cancelled,
            "models": models,
            "failures": failures,
        });
        std::fs::write(path, serde_json::to_string_pretty(&report)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: &str) -> ExtractionJob {
        ExtractionJob {
            id: id.to_string(),
            name: format!("name_{id}"),
            source_files: vec![format!("pokemon/{id}/{id}.trmdl")],
            ..Default::default()
        }
    }

    #[test]
    fn test_summary_accounting() {
        let results = vec![
            ExtractionResult::succeeded(&job("a")),
            ExtractionResult::failed(&job("b"), "boom"),
            ExtractionResult::skipped(&job("c"), Some(CANCELLED.to_string())),
        ];
        let summary = ExtractionSummary::from_results(results, true, Duration::from_secs(1));

        assert_eq!(summary.total, 3);
        assert_eq!(summary.success, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failures().count(), 1);
        assert!(summary.results[2].is_cancelled());
    }

    #[test]
    fn test_filter_is_case_insensitive() {
        assert!(job("pm0025").matches_filter("PM0025"));
        assert!(!job("pm0025").matches_filter("pm0026"));
    }

    #[test]
    fn test_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("extraction_summary.json");
        let mut ok = ExtractionResult::succeeded(&job("a"));
        ok.stats.insert("textures".into(), 4);
        let summary = ExtractionSummary::from_results(
            vec![ok, ExtractionResult::failed(&job("b"), "boom")],
            false,
            Duration::from_millis(1500),
        );
        summary.write_report(&path).unwrap();

        let report: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(report["succeeded"], 1);
        assert_eq!(report["failed"], 1);
        assert_eq!(report["models"][0]["stats"]["textures"], 4);
        assert_eq!(report["failures"][0]["error"], "boom");
        assert_eq!(report["durationSeconds"], 1.5);
    }
}
