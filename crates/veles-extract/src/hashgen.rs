//! Recovery of hash-to-path mappings.
//!
//! Archive files are addressed only by the FNV-1a hash of their path. Two
//! phases recover names:
//!
//! 1. Template matching: hash every candidate path from a known file list and
//!    keep those the archive contains.
//! 2. Content scan: parse every hash still unresolved as a `.trmdl` and
//!    synthesize a path under `_unresolved/` from the model's first mesh.
//!
//! Phase 2 excludes everything phase 1 resolved, so [`HashListGenerator::generate`]
//! returns a disjoint union of both.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use rustc_hash::FxHashSet;
use tracing::{debug, info};
use veles_archive::{HashNames, PackedArchiveStore};
use veles_common::{fnv, path};
use veles_trinity::TrinityModel;

use crate::Result;

/// Namespace of paths synthesized by the content scan.
pub const UNRESOLVED_PREFIX: &str = "_unresolved";

/// Template candidates between progress reports.
pub const TEMPLATE_PROGRESS_INTERVAL: usize = 50_000;

/// Scanned hashes between progress reports.
pub const SCAN_PROGRESS_INTERVAL: usize = 10_000;

/// Files shorter than this cannot hold a model table.
const MIN_MODEL_SIZE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationPhase {
    Templates,
    ContentScan,
}

/// Running counts reported during generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationProgress {
    pub phase: GenerationPhase,
    pub processed: usize,
    pub total: usize,
    pub matched: usize,
}

type ProgressFn<'a> = dyn Fn(&GenerationProgress) + Sync + 'a;

/// Builds a hash list for the archive behind a store.
pub struct HashListGenerator<'a> {
    store: &'a PackedArchiveStore,
    progress: Option<Box<ProgressFn<'a>>>,
}

impl<'a> HashListGenerator<'a> {
    pub fn new(store: &'a PackedArchiveStore) -> Self {
        Self { store, progress: None }
    }

    /// Report progress every fixed batch and at the end of each phase.
    pub fn with_progress<F>(mut self, progress: F) -> Self
    where
        F: Fn(&GenerationProgress) + Sync + 'a,
    {
        self.progress = Some(Box::new(progress));
        self
    }

    fn report(&self, progress: GenerationProgress) {
        if let Some(callback) = &self.progress {
            callback(&progress);
        }
    }

    /// Hash each candidate path and keep those present in the archive.
    ///
    /// The first candidate producing a hash wins.
    pub fn generate_from_templates<I, S>(&self, candidates: I) -> BTreeMap<u64, String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let known: FxHashSet<u64> = self.store.all_hashes().collect();
        let candidates: Vec<S> = candidates.into_iter().collect();
        let total = candidates.len();
        let mut matched = BTreeMap::new();

        for (index, candidate) in candidates.iter().enumerate() {
            let normalized = path::normalize(candidate.as_ref());
            if !normalized.is_empty() {
                let hash = fnv::hash_str(&normalized);
                if known.contains(&hash) {
                    matched.entry(hash).or_insert(normalized);
                }
            }

            let processed = index + 1;
            if processed % TEMPLATE_PROGRESS_INTERVAL == 0 {
                self.report(GenerationProgress {
                    phase: GenerationPhase::Templates,
                    processed,
                    total,
                    matched: matched.len(),
                });
            }
        }

        self.report(GenerationProgress {
            phase: GenerationPhase::Templates,
            processed: total,
            total,
            matched: matched.len(),
        });
        info!(candidates = total, matched = matched.len(), "template matching finished");
        matched
    }

    /// Parse every hash not in `exclude` as a model and name the ones that
    /// have content.
    ///
    /// When two hashes synthesize the same path, the first in descriptor
    /// order keeps it and later ones get their hash appended.
    pub fn generate_by_content_scan(&self, exclude: &FxHashSet<u64>) -> BTreeMap<u64, String> {
        let mut seen = FxHashSet::default();
        let pending: Vec<u64> = self
            .store
            .all_hashes()
            .filter(|h| !exclude.contains(h) && seen.insert(*h))
            .collect();
        let total = pending.len();
        let processed = AtomicUsize::new(0);
        let found = AtomicUsize::new(0);

        let mut models: Vec<(usize, u64, String)> = pending
            .par_iter()
            .enumerate()
            .filter_map(|(index, &hash)| {
                let name = self.scan_one(hash);
                if name.is_some() {
                    found.fetch_add(1, Ordering::Relaxed);
                }
                let done = processed.fetch_add(1, Ordering::Relaxed) + 1;
                if done % SCAN_PROGRESS_INTERVAL == 0 {
                    self.report(GenerationProgress {
                        phase: GenerationPhase::ContentScan,
                        processed: done,
                        total,
                        matched: found.load(Ordering::Relaxed),
                    });
                }
                name.map(|n| (index, hash, n))
            })
            .collect();
        models.sort_unstable_by_key(|(index, _, _)| *index);

        let mut used = FxHashSet::default();
        let mut resolved = BTreeMap::new();
        for (_, hash, name) in models {
            let base = format!("{UNRESOLVED_PREFIX}/{name}/{name}.trmdl");
            let synthesized = if used.contains(&base) {
                format!("{UNRESOLVED_PREFIX}/{name}/{name}_{hash:016x}.trmdl")
            } else {
                base
            };
            used.insert(synthesized.clone());
            resolved.insert(hash, synthesized);
        }

        self.report(GenerationProgress {
            phase: GenerationPhase::ContentScan,
            processed: total,
            total,
            matched: resolved.len(),
        });
        info!(scanned = total, models = resolved.len(), "content scan finished");
        resolved
    }

    /// Stem of the model's first mesh when `hash` holds a model with content.
    fn scan_one(&self, hash: u64) -> Option<String> {
        let data = match self.store.extract_by_hash(hash) {
            Ok(Some(data)) if data.len() >= MIN_MODEL_SIZE => data,
            Ok(_) => return None,
            Err(e) => {
                debug!(hash = %format!("{hash:016x}"), error = %e, "skipping unreadable file");
                return None;
            }
        };
        let model = TrinityModel::parse(&data).ok()?;
        if !model.has_content() {
            return None;
        }
        let name = model
            .meshes
            .first()
            .map(|m| path::file_stem(m).to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "unknown".to_string());
        Some(name)
    }

    /// Template matching (when candidates are given) followed by a content
    /// scan of everything left.
    pub fn generate<S: AsRef<str>>(&self, templates: Option<&[S]>) -> BTreeMap<u64, String> {
        let mut resolved = match templates {
            Some(candidates) => self.generate_from_templates(candidates),
            None => BTreeMap::new(),
        };
        let exclude: FxHashSet<u64> = resolved.keys().copied().collect();
        resolved.extend(self.generate_by_content_scan(&exclude));
        resolved
    }

    /// Write `map` as a text hash list sorted by path.
    pub fn write_hash_list<P: AsRef<Path>>(path: P, map: &BTreeMap<u64, String>) -> Result<()> {
        let names: HashNames = map.iter().map(|(&h, p)| (h, p.clone())).collect();
        names.write_hash_list(path)?;
        Ok(())
    }
}
