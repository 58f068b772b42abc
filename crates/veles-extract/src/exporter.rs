//! Conversion of extracted raw files into deliverables.
//!
//! Decoding meshes, textures and animations is out of this crate's hands;
//! [`AssetExporter`] is the seam where a decoder plugs in.
//! [`RawAssetExporter`] copies the raw files and reports counts from the
//! model schemas.

use std::path::Path;

use veles_trinity::{TrinityMaterialSet, TrinityMeshSet, TrinityModel};

use crate::walker::resolve_reference;
use crate::{AnimationMode, ExtractError, ExtractionOptions, Result};

/// Frame rate assumed for clips whose exporter does not decode timing.
pub const DEFAULT_FPS: u32 = 30;

/// Counts reported for an exported model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModelExport {
    pub submeshes: u64,
    pub materials: u64,
    pub bones: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClipExport {
    pub frame_count: u32,
    pub fps: u32,
}

impl Default for ClipExport {
    fn default() -> Self {
        Self {
            frame_count: 0,
            fps: DEFAULT_FPS,
        }
    }
}

/// Turns raw archive files from a job's temp tree into output files.
pub trait AssetExporter: Send + Sync {
    /// Extension (without dot) of exported model files.
    fn model_format(&self) -> &str;

    /// Extension (without dot) of exported clips.
    fn clip_format(&self) -> &str;

    /// Export the model at archive path `model_path` below `temp_root` to
    /// `output`.
    fn export_model(&self, temp_root: &Path, model_path: &str, output: &Path) -> Result<ModelExport>;

    /// Export a texture file into `output_dir`. Returns the names of the
    /// files written, relative to `output_dir`.
    fn export_texture(&self, source: &Path, output_dir: &Path) -> Result<Vec<String>>;

    /// Export one animation clip to `output`.
    fn export_clip(&self, clip: &Path, model: &Path, output: &Path, mode: AnimationMode) -> Result<ClipExport>;
}

/// Exporter that copies raw files unchanged.
///
/// Mesh and material references are resolved against `archive_roots` the
/// same way the dependency walker resolves them.
#[derive(Debug, Clone)]
pub struct RawAssetExporter {
    archive_roots: Vec<String>,
}

impl Default for RawAssetExporter {
    fn default() -> Self {
        Self {
            archive_roots: ExtractionOptions::default().archive_roots,
        }
    }
}

impl RawAssetExporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Top-level directories whose references are taken as absolute.
    pub fn with_archive_roots<I, S>(mut self, roots: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.archive_roots = roots.into_iter().map(Into::into).collect();
        self
    }
}

impl AssetExporter for RawAssetExporter {
    fn model_format(&self) -> &str {
        "trmdl"
    }

    fn clip_format(&self) -> &str {
        "tranm"
    }

    fn export_model(&self, temp_root: &Path, model_path: &str, output: &Path) -> Result<ModelExport> {
        let data = std::fs::read(temp_root.join(model_path))?;
        let model = TrinityModel::parse(&data)?;
        let resolve = |reference: &str| resolve_reference(&self.archive_roots, model_path, reference);

        let mut export = ModelExport::default();
        for mesh in &model.meshes {
            let mesh_path = resolve(mesh);
            export.submeshes += std::fs::read(temp_root.join(&mesh_path))
                .ok()
                .and_then(|d| TrinityMeshSet::parse(&d).ok())
                .map_or(1, |set| set.meshes.len() as u64);
        }
        for material in &model.materials {
            let material_path = resolve(material);
            export.materials += std::fs::read(temp_root.join(&material_path))
                .ok()
                .and_then(|d| TrinityMaterialSet::parse(&d).ok())
                .map_or(1, |set| set.materials.len() as u64);
        }

        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(output, &data)?;
        Ok(export)
    }

    fn export_texture(&self, source: &Path, output_dir: &Path) -> Result<Vec<String>> {
        let name = source
            .file_name()
            .ok_or_else(|| ExtractError::Export(format!("not a file: {}", source.display())))?;
        std::fs::create_dir_all(output_dir)?;
        std::fs::copy(source, output_dir.join(name))?;
        Ok(vec![name.to_string_lossy().into_owned()])
    }

    fn export_clip(&self, clip: &Path, _model: &Path, output: &Path, _mode: AnimationMode) -> Result<ClipExport> {
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(clip, output)?;
        Ok(ClipExport::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veles_trinity::{TrinityMaterial, TrinityMesh};

    #[test]
    fn test_raw_model_counts() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("tmp");
        let model_dir = root.join("pokemon/pm0001");
        std::fs::create_dir_all(&model_dir).unwrap();

        let model = TrinityModel {
            meshes: vec!["pm0001.trmsh".into()],
            materials: vec!["pm0001.trmtr".into(), "missing.trmtr".into()],
            ..Default::default()
        };
        let mesh = TrinityMeshSet {
            meshes: vec![TrinityMesh { name: "body".into() }, TrinityMesh { name: "eyes".into() }],
            ..Default::default()
        };
        let material = TrinityMaterialSet {
            materials: vec![TrinityMaterial::default(); 3],
            ..Default::default()
        };
        std::fs::write(model_dir.join("pm0001.trmdl"), model.to_bytes()).unwrap();
        std::fs::write(model_dir.join("pm0001.trmsh"), mesh.to_bytes()).unwrap();
        std::fs::write(model_dir.join("pm0001.trmtr"), material.to_bytes()).unwrap();

        let output = dir.path().join("out/model.trmdl");
        let export = RawAssetExporter::default()
            .export_model(&root, "pokemon/pm0001/pm0001.trmdl", &output)
            .unwrap();

        assert_eq!(export.submeshes, 2);
        assert_eq!(export.materials, 4);
        assert_eq!(std::fs::read(output).unwrap(), model.to_bytes());
    }

    #[test]
    fn test_rooted_references_counted() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("tmp");
        let model_dir = root.join("pokemon/pm0001");
        let shared_dir = root.join("pokemon/shared");
        std::fs::create_dir_all(&model_dir).unwrap();
        std::fs::create_dir_all(&shared_dir).unwrap();

        let model = TrinityModel {
            meshes: vec!["romfs://pokemon/shared/body.trmsh".into()],
            materials: vec!["pokemon/shared/body.trmtr".into()],
            ..Default::default()
        };
        let mesh = TrinityMeshSet {
            meshes: vec![TrinityMesh::default(); 3],
            ..Default::default()
        };
        let material = TrinityMaterialSet {
            materials: vec![TrinityMaterial::default(); 2],
            ..Default::default()
        };
        std::fs::write(model_dir.join("pm0001.trmdl"), model.to_bytes()).unwrap();
        std::fs::write(shared_dir.join("body.trmsh"), mesh.to_bytes()).unwrap();
        std::fs::write(shared_dir.join("body.trmtr"), material.to_bytes()).unwrap();

        let export = RawAssetExporter::default()
            .export_model(&root, "pokemon/pm0001/pm0001.trmdl", &dir.path().join("out/model.trmdl"))
            .unwrap();
        assert_eq!((export.submeshes, export.materials), (3, 2));

        let unrooted = RawAssetExporter::new()
            .with_archive_roots(Vec::<String>::new())
            .export_model(&root, "pokemon/pm0001/pm0001.trmdl", &dir.path().join("out2/model.trmdl"))
            .unwrap();
        assert_eq!((unrooted.submeshes, unrooted.materials), (1, 1));
    }

    #[test]
    fn test_raw_texture_copy() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("body.bntx");
        std::fs::write(&source, b"BNTX").unwrap();

        let files = RawAssetExporter::default()
            .export_texture(&source, &dir.path().join("textures"))
            .unwrap();

        assert_eq!(files, vec!["body.bntx"]);
        assert!(dir.path().join("textures/body.bntx").is_file());
    }
}
