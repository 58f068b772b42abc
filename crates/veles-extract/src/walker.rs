//! Dependency closure discovery.
//!
//! Starting from one root asset, the walker extracts the asset, parses it
//! when its extension names a known schema, and queues every path it
//! references. Traversal is breadth-first over an explicit work queue with a
//! visited set of normalized paths, so each file is written once per walk.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashSet;
use tracing::{debug, warn};
use veles_archive::PackedArchiveStore;
use veles_common::path;
use veles_trinity::{ext, TrinityMaterialSet, TrinityMeshSet, TrinityModel};

use crate::{CancellationToken, ExtractError, Result};

/// Files written by one walk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyClosure {
    /// Normalized archive path of the root asset.
    pub root: String,
    /// Archive paths written under the temp root, in extraction order.
    pub extracted: Vec<String>,
    /// References that could not be found by path or by file name.
    pub missing: Vec<String>,
}

impl DependencyClosure {
    pub fn len(&self) -> usize {
        self.extracted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extracted.is_empty()
    }

    /// Extracted paths with the given extension (e.g. `.bntx`).
    pub fn with_extension<'a>(&'a self, extension: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.extracted
            .iter()
            .map(String::as_str)
            .filter(move |p| path::extension(p) == extension)
    }
}

/// Walks the reference graph of an asset into a temp directory.
#[derive(Debug)]
pub struct DependencyWalker<'a> {
    store: &'a PackedArchiveStore,
    temp_root: PathBuf,
    archive_roots: Vec<String>,
    cancel: CancellationToken,
}

impl<'a> DependencyWalker<'a> {
    pub fn new<P: AsRef<Path>>(store: &'a PackedArchiveStore, temp_root: P) -> Self {
        Self {
            store,
            temp_root: temp_root.as_ref().to_path_buf(),
            archive_roots: vec!["pokemon".to_string()],
            cancel: CancellationToken::new(),
        }
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

    pub fn with_cancellation(mut self, token: &CancellationToken) -> Self {
        self.cancel = token.clone();
        self
    }

    pub fn temp_root(&self) -> &Path {
        &self.temp_root
    }

    /// Extract `root` and everything it transitively references.
    ///
    /// A missing root is [`ExtractError::RootNotFound`]. Missing or unreadable
    /// dependencies are logged and listed in [`DependencyClosure::missing`].
    pub fn walk(&self, root: &str) -> Result<DependencyClosure> {
        let root = path::join("", &path::normalize(root));
        let mut closure = DependencyClosure {
            root: root.clone(),
            ..Default::default()
        };

        let mut visited: FxHashSet<String> = FxHashSet::default();
        let mut queue: VecDeque<String> = VecDeque::from([root.clone()]);

        while let Some(current) = queue.pop_front() {
            self.cancel.check()?;
            if !visited.insert(current.clone()) {
                continue;
            }

            let is_root = current == root;
            let (resolved, data) = match self.resolve(&current) {
                Ok(Some(found)) => found,
                Ok(None) if is_root => return Err(ExtractError::RootNotFound(root)),
                Ok(None) => {
                    warn!(path = %current, root = %root, "dependency not found, skipping");
                    closure.missing.push(current);
                    continue;
                }
                Err(e) if is_root => return Err(e),
                Err(e) => {
                    warn!(path = %current, root = %root, error = %e, "failed to extract dependency, skipping");
                    closure.missing.push(current);
                    continue;
                }
            };

            // A file-name fallback can land on a file another reference already produced.
            if resolved != current && !visited.insert(resolved.clone()) {
                continue;
            }

            self.persist(&resolved, &data)?;
            debug!(path = %resolved, size = data.len(), "extracted");

            for reference in references(&resolved, &data) {
                let next = self.resolve_reference(&resolved, &reference);
                if !next.is_empty() && !visited.contains(&next) {
                    queue.push_back(next);
                }
            }
            closure.extracted.push(resolved);
        }

        Ok(closure)
    }

    /// Look `archive_path` up by path, then by file name among resolved names.
    fn resolve(&self, archive_path: &str) -> Result<Option<(String, Vec<u8>)>> {
        if let Some(data) = self.store.extract_by_path(archive_path)? {
            return Ok(Some((archive_path.to_string(), data)));
        }

        let wanted = path::file_name(archive_path);
        let Some((hash, name)) = self.store.names().find_by_file_name(wanted) else {
            return Ok(None);
        };
        let resolved = path::join("", &path::normalize(name));
        debug!(requested = %archive_path, resolved = %resolved, "resolved by file name");
        Ok(self.store.extract_by_hash(hash)?.map(|data| (resolved, data)))
    }

    fn resolve_reference(&self, referrer: &str, reference: &str) -> String {
        resolve_reference(&self.archive_roots, referrer, reference)
    }

    fn persist(&self, archive_path: &str, data: &[u8]) -> Result<()> {
        let target = self.temp_root.join(archive_path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(target, data)?;
        Ok(())
    }
}

/// Paths referenced by a file of a known schema. Unknown extensions and
/// unparseable files reference nothing.
fn references(archive_path: &str, data: &[u8]) -> Vec<String> {
    let extension = path::extension(archive_path);
    let parsed = match extension.as_str() {
        ext::MODEL => TrinityModel::parse(data).map(|m| m.references().map(str::to_string).collect()),
        ext::MESH => TrinityMeshSet::parse(data).map(|m| m.buffer_file_path.into_iter().collect()),
        ext::MATERIAL => {
            TrinityMaterialSet::parse(data).map(|m| m.texture_files().map(str::to_string).collect())
        }
        _ => return Vec::new(),
    };

    parsed.unwrap_or_else(|e| {
        debug!(path = %archive_path, error = %e, "schema parse failed, no references followed");
        Vec::new()
    })
}

/// Archive path a reference inside `referrer` points at.
///
/// References rooted at one of `archive_roots` pass through; others are
/// joined to the referring file's directory.
pub fn resolve_reference<S: AsRef<str>>(archive_roots: &[S], referrer: &str, reference: &str) -> String {
    let reference = path::normalize(reference);
    if is_absolute(archive_roots, &reference) {
        path::join("", &reference)
    } else {
        path::join(path::directory_of(referrer), &reference)
    }
}

fn is_absolute<S: AsRef<str>>(archive_roots: &[S], reference: &str) -> bool {
    reference.contains('/')
        && archive_roots.iter().any(|root| {
            let root = root.as_ref().trim_matches('/');
            reference.len() > root.len()
                && reference.as_bytes()[root.len()] == b'/'
                && reference[..root.len()].eq_ignore_ascii_case(root)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use veles_archive::testing::ArchiveBuilder;
    use veles_archive::HashNames;
    use veles_common::fnv;
    use veles_trinity::{TrinityMaterial, TrinityTexture};

    fn material(files: &[&str]) -> Vec<u8> {
        TrinityMaterialSet {
            materials: vec![TrinityMaterial {
                name: "body".into(),
                textures: files
                    .iter()
                    .enumerate()
                    .map(|(slot, f)| TrinityTexture {
                        name: format!("Map{slot}"),
                        file: f.to_string(),
                        slot: slot as u32,
                    })
                    .collect(),
            }],
            ..Default::default()
        }
        .to_bytes()
    }

    #[test]
    fn test_resolve_reference() {
        let roots = ["pokemon"];
        let referrer = "pokemon/pm0001/pm0001.trmdl";

        assert_eq!(resolve_reference(&roots, referrer, "pm0001.trmsh"), "pokemon/pm0001/pm0001.trmsh");
        assert_eq!(resolve_reference(&roots, referrer, "../shared/a.trmtr"), "pokemon/shared/a.trmtr");
        assert_eq!(resolve_reference(&roots, referrer, "Pokemon/common/b.trmtr"), "Pokemon/common/b.trmtr");
        assert_eq!(resolve_reference(&roots, referrer, "pokemonx/c.trmtr"), "pokemon/pm0001/pokemonx/c.trmtr");
        assert_eq!(resolve_reference(&[] as &[&str], referrer, "pokemon/d.trmtr"), "pokemon/pm0001/pokemon/d.trmtr");
    }

    #[test]
    fn test_relative_and_absolute_references() {
        let dir = tempfile::tempdir().unwrap();
        let model = TrinityModel {
            meshes: vec!["pm0001.trmsh".into()],
            materials: vec!["../shared/pm0001.trmtr".into()],
            skeleton: Some("romfs://pokemon/common/base.trskl".into()),
            ..Default::default()
        };
        let mesh = TrinityMeshSet {
            buffer_file_path: Some("pm0001.trmbf".into()),
            ..Default::default()
        };
        ArchiveBuilder::new()
            .file("pokemon/pm0001/pm0001.trmdl", model.to_bytes())
            .file("pokemon/pm0001/pm0001.trmsh", mesh.to_bytes())
            .file("pokemon/pm0001/pm0001.trmbf", b"buffers".to_vec())
            .file("pokemon/shared/pm0001.trmtr", material(&["tex/body.bntx"]))
            .file("pokemon/shared/tex/body.bntx", b"BNTX".to_vec())
            .file("pokemon/common/base.trskl", b"skel".to_vec())
            .write(dir.path())
            .unwrap();
        let store = PackedArchiveStore::open(dir.path()).unwrap();
        let temp = dir.path().join("temp");

        let closure = DependencyWalker::new(&store, &temp)
            .walk("pokemon/pm0001/pm0001.trmdl")
            .unwrap();

        assert_eq!(closure.len(), 6);
        assert!(closure.missing.is_empty());
        assert!(temp.join("pokemon/shared/tex/body.bntx").is_file());
        assert!(temp.join("pokemon/common/base.trskl").is_file());
        assert_eq!(closure.with_extension(".bntx").count(), 1);
    }

    #[test]
    fn test_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        ArchiveBuilder::new()
            .file("pokemon/a.bin", vec![1])
            .write(dir.path())
            .unwrap();
        let store = PackedArchiveStore::open(dir.path()).unwrap();

        let err = DependencyWalker::new(&store, dir.path().join("t"))
            .walk("pokemon/none.trmdl")
            .unwrap_err();
        assert!(matches!(err, ExtractError::RootNotFound(p) if p == "pokemon/none.trmdl"));
    }

    #[test]
    fn test_file_name_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let model = TrinityModel {
            materials: vec!["pm0002.trmtr".into()],
            meshes: vec!["pm0002.trmsh".into()],
            ..Default::default()
        };
        ArchiveBuilder::new()
            .file("pokemon/pm0002/pm0002.trmdl", model.to_bytes())
            .file("pokemon/pm0002/pm0002.trmsh", TrinityMeshSet::default().to_bytes())
            .file("pokemon/pm0002/pm0002.trmtr", material(&["eye.bntx", "../eye.bntx"]))
            .file("pokemon/common/eye.bntx", b"eye".to_vec())
            .write(dir.path())
            .unwrap();
        let names: HashNames = [(fnv::hash_path("pokemon/common/eye.bntx"), "pokemon/common/eye.bntx".to_string())]
            .into_iter()
            .collect();
        let store = PackedArchiveStore::open(dir.path()).unwrap().with_names(names);
        let temp = dir.path().join("t");

        let closure = DependencyWalker::new(&store, &temp)
            .walk("pokemon/pm0002/pm0002.trmdl")
            .unwrap();

        // Both texture references resolve to the same archive file.
        assert_eq!(closure.with_extension(".bntx").collect::<Vec<_>>(), vec!["pokemon/common/eye.bntx"]);
        assert_eq!(closure.len(), 4);
        assert!(temp.join("pokemon/common/eye.bntx").is_file());
    }

    #[test]
    fn test_cancelled_walk() {
        let dir = tempfile::tempdir().unwrap();
        ArchiveBuilder::new()
            .file("pokemon/a.trmdl", TrinityModel::default().to_bytes())
            .write(dir.path())
            .unwrap();
        let store = PackedArchiveStore::open(dir.path()).unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let err = DependencyWalker::new(&store, dir.path().join("t"))
            .with_cancellation(&token)
            .walk("pokemon/a.trmdl")
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
