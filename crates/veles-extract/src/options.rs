//! Run configuration.

use std::fmt;
use std::num::NonZeroUsize;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Result;

/// How animation clips are exported next to a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnimationMode {
    /// One file per clip under `clips/`, skeleton only.
    #[default]
    Split,
    /// One file per clip under `animations/`, with the model baked in.
    Baked,
}

impl AnimationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AnimationMode::Split => "split",
            AnimationMode::Baked => "baked",
        }
    }

    /// Output subdirectory for clips.
    pub fn clip_dir(self) -> &'static str {
        match self {
            AnimationMode::Split => "clips",
            AnimationMode::Baked => "animations",
        }
    }
}

impl fmt::Display for AnimationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnimationMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "split" => Ok(AnimationMode::Split),
            "baked" => Ok(AnimationMode::Baked),
            other => Err(format!("unknown animation mode '{other}' (expected split or baked)")),
        }
    }
}

/// Options for an extraction run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionOptions {
    /// Maximum number of jobs processed at once.
    pub max_parallelism: usize,
    /// Keep extracted raw files under `<output>/.raw` instead of system temp.
    pub keep_raw_files: bool,
    /// Record a failed job and keep going instead of stopping the run.
    pub continue_on_error: bool,
    /// Case-insensitive substring a job's source files must contain.
    pub filter: Option<String>,
    /// Skip jobs whose primary output already exists.
    pub skip_existing: bool,
    pub animation_mode: AnimationMode,
    /// Top-level archive directories that mark a reference as absolute.
    pub archive_roots: Vec<String>,
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            max_parallelism: default_parallelism(),
            keep_raw_files: true,
            continue_on_error: true,
            filter: None,
            skip_existing: false,
            animation_mode: AnimationMode::Split,
            archive_roots: vec!["pokemon".to_string()],
        }
    }
}

impl ExtractionOptions {
    /// Load options from a JSON file. Missing keys take their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Host core count, or 1 when it cannot be determined.
pub fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ExtractionOptions::default();
        assert!(options.max_parallelism >= 1);
        assert!(options.keep_raw_files);
        assert!(options.continue_on_error);
        assert!(!options.skip_existing);
        assert_eq!(options.animation_mode, AnimationMode::Split);
        assert_eq!(options.archive_roots, vec!["pokemon"]);
    }

    #[test]
    fn test_partial_json() {
        let options: ExtractionOptions =
            serde_json::from_str(r#"{"max_parallelism": 3, "animation_mode": "baked"}"#).unwrap();
        assert_eq!(options.max_parallelism, 3);
        assert_eq!(options.animation_mode, AnimationMode::Baked);
        assert!(options.keep_raw_files);
    }

    #[test]
    fn test_animation_mode_parse() {
        assert_eq!("BAKED".parse::<AnimationMode>().unwrap(), AnimationMode::Baked);
        assert_eq!(AnimationMode::Split.clip_dir(), "clips");
        assert!("looped".parse::<AnimationMode>().is_err());
    }
}
