//! Per-model `manifest.json`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{AnimationMode, Result};

/// File name of the manifest inside a job's output directory.
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

pub const MANIFEST_VERSION: u32 = 1;

/// One exported animation clip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipEntry {
    pub index: usize,
    /// Archive hash of the source clip, 16 hex digits.
    pub id: String,
    pub source_name: String,
    /// Path relative to the job's output directory.
    pub file: String,
    pub frame_count: u32,
    pub fps: u32,
}

/// What a job produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportManifest {
    pub version: u32,
    pub format: String,
    pub model_file: String,
    pub animation_mode: AnimationMode,
    /// Archive paths extracted into the job's temp directory.
    pub raw_files: Vec<String>,
    /// Paths relative to the job's output directory.
    pub textures: Vec<String>,
    pub clips: Vec<ClipEntry>,
}

impl ExportManifest {
    pub fn new(format: impl Into<String>, model_file: impl Into<String>, animation_mode: AnimationMode) -> Self {
        Self {
            version: MANIFEST_VERSION,
            format: format.into(),
            model_file: model_file.into(),
            animation_mode,
            raw_files: Vec::new(),
            textures: Vec::new(),
            clips: Vec::new(),
        }
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
