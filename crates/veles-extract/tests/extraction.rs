//! End-to-end behavior over archives written by `ArchiveBuilder`.

use std::sync::Arc;

use veles_archive::testing::ArchiveBuilder;
use veles_archive::{HashNames, PackedArchiveStore};
use veles_common::fnv;
use veles_extract::{
    CancellationToken, DependencyWalker, ExtractError, ExtractionJob, ExtractionOptions,
    ExtractionPipeline, ExtractionResult, FileGroupExtractor, HashListGenerator,
    ModelGroupExtractor, RawAssetExporter,
};
use veles_trinity::{TrinityMaterial, TrinityMaterialSet, TrinityModel, TrinityTexture};

fn names(paths: &[&str]) -> HashNames {
    paths.iter().map(|p| (fnv::hash_path(p), p.to_string())).collect()
}

fn material(files: &[&str]) -> Vec<u8> {
    TrinityMaterialSet {
        materials: vec![TrinityMaterial {
            name: "body".into(),
            textures: files
                .iter()
                .enumerate()
                .map(|(slot, file)| TrinityTexture {
                    name: format!("Map{slot}"),
                    file: file.to_string(),
                    slot: slot as u32,
                })
                .collect(),
        }],
        ..Default::default()
    }
    .to_bytes()
}

#[test]
fn walker_drops_unresolvable_reference() {
    let dir = tempfile::tempdir().unwrap();
    let model_hash = 0xAABB_CCDD_EEFF_0011;
    let model = TrinityModel {
        materials: vec!["tex/a.png".into(), "tex/missing.png".into()],
        ..Default::default()
    };
    ArchiveBuilder::new()
        .file_with_hash(model_hash, model.to_bytes())
        .file("pokemon/pm0100/tex/a.png", b"PNG".to_vec())
        .write(dir.path())
        .unwrap();
    let names: HashNames = [(model_hash, "pokemon/pm0100/pm0100.trmdl".to_string())]
        .into_iter()
        .collect();
    let store = PackedArchiveStore::open(dir.path()).unwrap().with_names(names);
    let temp = dir.path().join("temp");

    let closure = DependencyWalker::new(&store, &temp)
        .walk("pokemon/pm0100/pm0100.trmdl")
        .unwrap();

    assert_eq!(
        closure.extracted,
        vec!["pokemon/pm0100/pm0100.trmdl", "pokemon/pm0100/tex/a.png"]
    );
    assert_eq!(closure.missing, vec!["pokemon/pm0100/tex/missing.png"]);
    assert!(temp.join("pokemon/pm0100/tex/a.png").is_file());
}

#[test]
fn missing_dependency_does_not_fail_the_job() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("archive");
    let model_path = "pokemon/pm0100/pm0100.trmdl";
    let model = TrinityModel {
        materials: vec!["pm0100.trmtr".into()],
        ..Default::default()
    };
    ArchiveBuilder::new()
        .file(model_path, model.to_bytes())
        .file("pokemon/pm0100/pm0100.trmtr", material(&["body.bntx", "eye.bntx"]))
        .file("pokemon/pm0100/body.bntx", b"body".to_vec())
        .write(&archive)
        .unwrap();
    let store = PackedArchiveStore::open(&archive).unwrap().with_names(names(&[model_path]));
    let options = ExtractionOptions {
        max_parallelism: 1,
        ..Default::default()
    };
    let extractor = ModelGroupExtractor::new(Arc::new(store), Arc::new(RawAssetExporter::default()), options.clone());
    let out = dir.path().join("out");
    let pipeline = ExtractionPipeline::new(extractor, &out, options).unwrap();

    let summary = pipeline.run(&CancellationToken::new(), None).unwrap();

    assert_eq!((summary.total, summary.success, summary.failed), (1, 1, 0), "{:?}", summary.results);
    let result = &summary.results[0];
    assert_eq!(result.job_id, format!("{:016x}", fnv::hash_path(model_path)));
    assert!(result.success, "{:?}", result.error_message);
    assert_eq!(result.stats["missing_dependencies"], 1);
    assert_eq!(result.stats["dependencies"], 3);
    assert_eq!(result.stats["textures"], 1);
    assert!(out.join("pm0100/textures/body.bntx").is_file());
    assert!(pipeline.workspace().is_validated());
}

#[test]
fn walker_extracts_each_dependency_once() {
    let dir = tempfile::tempdir().unwrap();
    let model = TrinityModel {
        materials: vec!["pm0001.trmtr".into()],
        skeleton: Some("pm0001.trskl".into()),
        ..Default::default()
    };
    // The last two entries name the same file.
    let textures = ["t0.bntx", "t1.bntx", "t2.bntx", "./t2.bntx", "sub/../t2.bntx"];
    ArchiveBuilder::new()
        .file("pokemon/pm0001/pm0001.trmdl", model.to_bytes())
        .file("pokemon/pm0001/pm0001.trmtr", material(&textures))
        .file("pokemon/pm0001/pm0001.trskl", b"skel".to_vec())
        .file("pokemon/pm0001/t0.bntx", b"0".to_vec())
        .file("pokemon/pm0001/t1.bntx", b"1".to_vec())
        .file("pokemon/pm0001/t2.bntx", b"2".to_vec())
        .write(dir.path())
        .unwrap();
    let store = PackedArchiveStore::open(dir.path()).unwrap();

    let closure = DependencyWalker::new(&store, dir.path().join("temp"))
        .walk("pokemon/pm0001/pm0001.trmdl")
        .unwrap();

    let mut extracted = closure.extracted.clone();
    extracted.sort();
    extracted.dedup();
    assert_eq!(extracted.len(), closure.len());
    assert_eq!(closure.with_extension(".bntx").count(), 3);
    assert_eq!(closure.len(), 3 + 3);
    assert!(closure.missing.is_empty());
    assert_eq!(store.pack_loads(), 1);
}

#[test]
fn jobs_sharing_a_texture_get_their_own_copy() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("archive");
    let first = TrinityModel {
        materials: vec!["pm0001.trmtr".into()],
        ..Default::default()
    };
    let second = TrinityModel {
        materials: vec!["pm0002.trmtr".into()],
        ..Default::default()
    };
    ArchiveBuilder::new()
        .file("pokemon/pm0001/pm0001.trmdl", first.to_bytes())
        .file("pokemon/pm0001/pm0001.trmtr", material(&["../common/eye.bntx"]))
        .file("pokemon/pm0002/pm0002.trmdl", second.to_bytes())
        .file("pokemon/pm0002/pm0002.trmtr", material(&["pokemon/common/eye.bntx"]))
        .file("pokemon/common/eye.bntx", b"eye".to_vec())
        .write(&archive)
        .unwrap();
    let store = PackedArchiveStore::open(&archive)
        .unwrap()
        .with_names(names(&["pokemon/pm0001/pm0001.trmdl", "pokemon/pm0002/pm0002.trmdl"]));
    let store = Arc::new(store);
    let options = ExtractionOptions {
        max_parallelism: 1,
        ..Default::default()
    };
    let extractor = ModelGroupExtractor::new(Arc::clone(&store), Arc::new(RawAssetExporter::default()), options.clone());
    let out = dir.path().join("out");
    let pipeline = ExtractionPipeline::new(extractor, &out, options).unwrap();

    let summary = pipeline.run(&CancellationToken::new(), None).unwrap();

    assert_eq!(summary.success, 2, "{:?}", summary.results);
    for model in ["pokemon/pm0001/pm0001.trmdl", "pokemon/pm0002/pm0002.trmdl"] {
        let job_id = format!("{:016x}", fnv::hash_path(model));
        let copy = out.join(".raw").join(job_id).join("pokemon/common/eye.bntx");
        assert!(copy.is_file(), "{}", copy.display());
    }
    assert!(out.join("pm0001/textures/eye.bntx").is_file());
    assert!(out.join("pm0002/textures/eye.bntx").is_file());
    assert_eq!(store.pack_loads(), 1);
    assert!(pipeline.workspace().is_validated());
}

/// Cancels the run from inside the third job it processes.
struct CancellingExtractor {
    count: usize,
    cancel_at: usize,
    token: CancellationToken,
    processed: std::sync::atomic::AtomicUsize,
}

impl FileGroupExtractor for CancellingExtractor {
    fn enumerate_jobs(&self) -> veles_extract::Result<Vec<ExtractionJob>> {
        Ok((0..self.count)
            .map(|i| ExtractionJob {
                id: format!("{i:04}"),
                name: format!("job{i}"),
                source_files: vec![format!("pokemon/job{i}.trmdl")],
                ..Default::default()
            })
            .collect())
    }

    fn process_job(
        &self,
        job: &ExtractionJob,
        cancel: &CancellationToken,
    ) -> veles_extract::Result<ExtractionResult> {
        cancel.check()?;
        let n = self.processed.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
        if n == self.cancel_at {
            self.token.cancel();
        }
        cancel.check()?;
        std::fs::write(job.output_path.join("out.bin"), b"x")?;
        Ok(ExtractionResult::succeeded(job))
    }

    fn validate_job_output(&self, job: &ExtractionJob) -> bool {
        job.output_path.join("out.bin").is_file()
    }
}

#[test]
fn cancelling_mid_run_resolves_every_job() {
    let dir = tempfile::tempdir().unwrap();
    let token = CancellationToken::new();
    let extractor = CancellingExtractor {
        count: 20,
        cancel_at: 3,
        token: token.clone(),
        processed: Default::default(),
    };
    let options = ExtractionOptions {
        max_parallelism: 2,
        ..Default::default()
    };
    let pipeline = ExtractionPipeline::new(extractor, dir.path(), options).unwrap();

    let summary = pipeline.run(&token, None).unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.total, 20);
    assert_eq!(summary.total, summary.success + summary.failed + summary.skipped);
    assert!(summary.skipped > 0);
    for result in &summary.results {
        assert!(result.success || result.is_cancelled(), "{result:?}");
    }
    assert!(summary.failed >= 1);
    assert!(!pipeline.workspace().is_validated());
}

#[test]
fn stop_on_error_reports_the_failing_job() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("archive");
    let broken = "pokemon/pm0000/pm0000.trmdl";
    let healthy = "pokemon/pm0001/pm0001.trmdl";
    ArchiveBuilder::new()
        .file(broken, vec![0xFF; 8])
        .file(healthy, TrinityModel::default().to_bytes())
        .write(&archive)
        .unwrap();
    let store = PackedArchiveStore::open(&archive).unwrap().with_names(names(&[broken, healthy]));
    let options = ExtractionOptions {
        continue_on_error: false,
        max_parallelism: 1,
        ..Default::default()
    };
    let extractor = ModelGroupExtractor::new(Arc::new(store), Arc::new(RawAssetExporter::default()), options.clone());
    let pipeline = ExtractionPipeline::new(extractor, dir.path().join("out"), options).unwrap();

    let err = pipeline.run(&CancellationToken::new(), None).unwrap_err();
    let broken_id = format!("{:016x}", fnv::hash_path(broken));
    assert!(matches!(err, ExtractError::JobFailed { ref job_id, .. } if *job_id == broken_id));

    let err = pipeline
        .run_single("ffffffffffffffff", &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(err, ExtractError::JobNotFound(_)));
}

#[test]
fn generated_hash_list_is_disjoint_and_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let model = |mesh: &str| {
        TrinityModel {
            meshes: vec![mesh.to_string()],
            ..Default::default()
        }
        .to_bytes()
    };
    ArchiveBuilder::new()
        .file("pokemon/pm0001/pm0001.trmdl", model("pm0001.trmsh"))
        .file_with_hash(0x1234, model("pokemon/pm0777/pm0777.trmsh"))
        .file("pokemon/pm0001/pm0001.trmsh", vec![0; 4])
        .write(dir.path())
        .unwrap();
    let store = PackedArchiveStore::open(dir.path()).unwrap();
    let generator = HashListGenerator::new(&store);
    let templates = ["pokemon/pm0001/pm0001.trmdl", "pokemon/pm0001/pm0001.trmsh"];

    let map = generator.generate(Some(&templates[..]));

    assert_eq!(map.len(), 3);
    assert_eq!(map[&fnv::hash_path("pokemon/pm0001/pm0001.trmdl")], "pokemon/pm0001/pm0001.trmdl");
    assert_eq!(map[&0x1234], "_unresolved/pm0777/pm0777.trmdl");

    let path = dir.path().join("hashes_inside_fd.txt");
    HashListGenerator::write_hash_list(&path, &map).unwrap();
    let loaded = HashNames::read_hash_list(&path).unwrap();
    assert_eq!(loaded.len(), 3);
    assert_eq!(loaded.get(0x1234), Some("_unresolved/pm0777/pm0777.trmdl"));
}
