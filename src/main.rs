//! Veles CLI - Command-line tool for TRPFD/TRPFS archive extraction.
//!
//! This is the main entry point for the Veles command-line application.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use tracing_subscriber::EnvFilter;

use veles::archive::names::HASH_LIST_FILE_NAME;
use veles::archive::{MissingCodec, OodleCodec};
use veles::extract::hashgen::GenerationProgress;
use veles::extract::{AnimationMode, ExtractionProgress, ProgressCallback};
use veles::prelude::*;

/// Veles - TRPFD/TRPFS archive extraction tool
#[derive(Parser)]
#[command(name = "veles")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log more (-v info, -vv debug). RUST_LOG applies when not given.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ArchiveArgs {
    /// Archive directory holding data.trpfd and data.trpfs
    #[arg(short, long, env = "VELES_ARCHIVE")]
    archive: PathBuf,

    /// Hash list file (default: hashes_inside_fd.txt in the archive directory)
    #[arg(long, env = "VELES_HASH_LIST")]
    hashes: Option<PathBuf>,

    /// Oodle core library used for compressed pack entries
    #[arg(long, env = "VELES_OODLE")]
    oodle: Option<PathBuf>,
}

#[derive(Args)]
struct RunArgs {
    /// Output directory
    #[arg(short, long, env = "VELES_OUTPUT")]
    output: PathBuf,

    /// JSON file with extraction options (flags override it)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Maximum number of models processed at once
    #[arg(short = 'j', long)]
    parallel: Option<usize>,

    /// Extract raw files to system temp instead of <output>/.raw
    #[arg(long)]
    discard_raw: bool,

    /// Stop at the first failed model
    #[arg(long)]
    stop_on_error: bool,

    /// Skip models whose output already exists
    #[arg(long)]
    skip_existing: bool,

    /// Animation export mode (split or baked)
    #[arg(long)]
    animation_mode: Option<AnimationMode>,

    /// Top-level archive directory marking absolute references (repeatable)
    #[arg(long = "archive-root")]
    archive_roots: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List resolved models
    List {
        #[command(flatten)]
        archive: ArchiveArgs,

        /// Filter pattern (glob-style, case-insensitive)
        #[arg(short, long)]
        filter: Option<String>,
    },

    /// List packs with their sizes and file counts
    ListPacks {
        #[command(flatten)]
        archive: ArchiveArgs,
    },

    /// Show descriptor statistics
    Info {
        #[command(flatten)]
        archive: ArchiveArgs,
    },

    /// Extract a single model and its dependencies
    Extract {
        #[command(flatten)]
        archive: ArchiveArgs,

        #[command(flatten)]
        run: RunArgs,

        /// Model archive path or 16-digit job id
        model: String,
    },

    /// Extract every resolved model in parallel
    ExtractAll {
        #[command(flatten)]
        archive: ArchiveArgs,

        #[command(flatten)]
        run: RunArgs,

        /// Only models whose path contains this text (case-insensitive)
        #[arg(short, long)]
        filter: Option<String>,

        /// Stop after this many models
        #[arg(long)]
        max_models: Option<usize>,
    },

    /// Recover a hash list by template matching and content scanning
    GenerateHashes {
        #[command(flatten)]
        archive: ArchiveArgs,

        /// Candidate paths, one per line (hash lists are accepted too)
        #[arg(short, long)]
        templates: Option<PathBuf>,

        /// Output hash list (default: hashes_inside_fd.txt in the archive directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Report unresolved hashes that parse as models
    Scan {
        #[command(flatten)]
        archive: ArchiveArgs,
    },

    /// List the contents of a standalone .trpak archive
    TrpakList {
        /// Path to the .trpak file
        #[arg(short, long)]
        input: PathBuf,

        /// Hash list used to name files
        #[arg(long, env = "VELES_HASH_LIST")]
        hashes: Option<PathBuf>,

        /// Oodle core library used for compressed entries
        #[arg(long, env = "VELES_OODLE")]
        oodle: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::List { archive, filter } => cmd_list(&archive, filter.as_deref())?,
        Commands::ListPacks { archive } => cmd_list_packs(&archive)?,
        Commands::Info { archive } => cmd_info(&archive)?,
        Commands::Extract { archive, run, model } => cmd_extract(&archive, &run, &model)?,
        Commands::ExtractAll {
            archive,
            run,
            filter,
            max_models,
        } => cmd_extract_all(&archive, &run, filter, max_models)?,
        Commands::GenerateHashes {
            archive,
            templates,
            output,
        } => cmd_generate_hashes(&archive, templates.as_deref(), output)?,
        Commands::Scan { archive } => cmd_scan(&archive)?,
        Commands::TrpakList { input, hashes, oodle } => {
            cmd_trpak_list(&input, hashes.as_deref(), oodle.as_deref())?
        }
    }

    Ok(())
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        _ => EnvFilter::new("debug"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn progress_bar(len: u64) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

/// Without a library every compressed entry fails to extract.
fn load_codec(oodle: Option<&Path>) -> Result<Arc<dyn Decompressor>> {
    match oodle {
        Some(path) => {
            let codec = OodleCodec::load(path)
                .with_context(|| format!("Failed to load Oodle library {}", path.display()))?;
            Ok(Arc::new(codec))
        }
        None => {
            info!("no Oodle library given (--oodle or VELES_OODLE), compressed entries will fail");
            Ok(Arc::new(MissingCodec))
        }
    }
}

fn open_store(args: &ArchiveArgs) -> Result<PackedArchiveStore> {
    let start = Instant::now();
    let mut store = PackedArchiveStore::open(&args.archive)
        .with_context(|| format!("Failed to open archive {}", args.archive.display()))?
        .with_decompressor(load_codec(args.oodle.as_deref())?);

    let hash_list = args.hashes.clone().or_else(|| {
        let default = args.archive.join(HASH_LIST_FILE_NAME);
        default.is_file().then_some(default)
    });
    if let Some(path) = hash_list {
        let names = HashNames::read_hash_list(&path)
            .with_context(|| format!("Failed to read hash list {}", path.display()))?;
        info!(names = names.len(), path = %path.display(), "loaded hash list");
        store.set_names(names);
    }

    info!(
        files = store.file_count(),
        packs = store.pack_names().len(),
        elapsed = ?start.elapsed(),
        "opened archive"
    );
    Ok(store)
}

fn build_options(run: &RunArgs) -> Result<ExtractionOptions> {
    let mut options = match &run.config {
        Some(path) => ExtractionOptions::from_json_file(path)
            .with_context(|| format!("Failed to read options {}", path.display()))?,
        None => ExtractionOptions::default(),
    };

    if let Some(parallel) = run.parallel {
        options.max_parallelism = parallel.max(1);
    }
    if run.discard_raw {
        options.keep_raw_files = false;
    }
    if run.stop_on_error {
        options.continue_on_error = false;
    }
    if run.skip_existing {
        options.skip_existing = true;
    }
    if let Some(mode) = run.animation_mode {
        options.animation_mode = mode;
    }
    if !run.archive_roots.is_empty() {
        options.archive_roots = run.archive_roots.clone();
    }
    Ok(options)
}

fn cmd_list(args: &ArchiveArgs, filter: Option<&str>) -> Result<()> {
    let store = open_store(args)?;
    let pattern = filter
        .map(|f| glob::Pattern::new(&f.to_lowercase()))
        .transpose()
        .context("Invalid filter pattern")?;

    let mut models: Vec<(u64, &str)> = store
        .find_files_by_extension(".trmdl")
        .filter(|(_, name)| pattern.as_ref().map_or(true, |p| p.matches(&name.to_lowercase())))
        .collect();
    models.sort_by(|a, b| a.1.cmp(b.1));

    for (hash, name) in &models {
        println!("{hash:016x}  {name}");
    }
    println!("\nTotal: {} models", models.len());

    Ok(())
}

fn cmd_list_packs(args: &ArchiveArgs) -> Result<()> {
    let store = open_store(args)?;
    let descriptor = store.descriptor();

    for (index, (name, info)) in descriptor
        .pack_names()
        .iter()
        .zip(descriptor.pack_info())
        .enumerate()
    {
        println!("{index:>6} {:>12} {:>8} {name}", info.file_size, info.file_count);
    }
    println!("\nTotal: {} packs", descriptor.pack_names().len());

    Ok(())
}

fn cmd_info(args: &ArchiveArgs) -> Result<()> {
    let store = open_store(args)?;
    let descriptor = store.descriptor();

    let resolved = store.file_hashes().iter().filter(|h| store.names().contains(**h)).count();
    let models = store.find_files_by_extension(".trmdl").count();
    let stored: u64 = descriptor.pack_info().iter().map(|p| p.file_size).sum();

    println!("Archive:        {}", store.directory().display());
    println!("Files:          {}", descriptor.file_hashes().len());
    println!("Unused files:   {}", descriptor.unused_hashes().len());
    println!("Packs:          {}", descriptor.pack_names().len());
    println!("Pack bytes:     {stored}");
    println!("Resolved names: {resolved}");
    println!("Models:         {models}");

    Ok(())
}

fn model_extractor(store: PackedArchiveStore, options: &ExtractionOptions) -> ModelGroupExtractor {
    let exporter = RawAssetExporter::new().with_archive_roots(options.archive_roots.clone());
    ModelGroupExtractor::new(Arc::new(store), Arc::new(exporter), options.clone())
}

fn cmd_extract(args: &ArchiveArgs, run: &RunArgs, model: &str) -> Result<()> {
    let store = open_store(args)?;
    let options = build_options(run)?;

    let job_id = if model.len() == 16 && model.chars().all(|c| c.is_ascii_hexdigit()) {
        model.to_lowercase()
    } else {
        format!("{:016x}", fnv::hash_path(model))
    };

    let pipeline = ExtractionPipeline::new(model_extractor(store, &options), &run.output, options)
        .context("Failed to prepare output directory")?;
    let result = pipeline
        .run_single(&job_id, &CancellationToken::new())
        .with_context(|| format!("Failed to extract {model}"))?;

    if result.success {
        println!("Extracted {} in {:?}", result.job_name, result.duration);
        for file in &result.output_files {
            println!("  {file}");
        }
        for (key, value) in &result.stats {
            println!("  {key}: {value}");
        }
    } else {
        anyhow::bail!(
            "Extraction of {} failed: {}",
            result.job_name,
            result.error_message.as_deref().unwrap_or("unknown error")
        );
    }

    Ok(())
}

fn cmd_extract_all(
    args: &ArchiveArgs,
    run: &RunArgs,
    filter: Option<String>,
    max_models: Option<usize>,
) -> Result<()> {
    let store = open_store(args)?;
    let mut options = build_options(run)?;
    if filter.is_some() {
        options.filter = filter;
    }

    let extractor = model_extractor(store, &options).with_max_models(max_models);
    let pipeline = ExtractionPipeline::new(extractor, &run.output, options)
        .context("Failed to prepare output directory")?;

    println!("Extracting models to {}...", run.output.display());
    let pb = progress_bar(0)?;
    let on_progress = |progress: &ExtractionProgress| {
        pb.set_length(progress.total as u64);
        pb.set_position(progress.current as u64);
        pb.set_message(progress.job_name.clone());
        if let Some(error) = progress.error_message.as_deref().filter(|_| !progress.success && !progress.skipped) {
            pb.println(format!("Error extracting {}: {}", progress.job_name, error));
        }
    };
    let sink: ProgressCallback<'_> = &on_progress;
    let summary = pipeline.run(&CancellationToken::new(), Some(sink))?;
    pb.finish_with_message("Done");

    let report = run.output.join("extraction_summary.json");
    summary.write_report(&report).context("Failed to write summary")?;

    println!(
        "Extracted {} of {} models in {:?} ({} failed, {} skipped)",
        summary.success, summary.total, summary.duration, summary.failed, summary.skipped
    );
    println!("Summary written to {}", report.display());

    Ok(())
}

fn read_templates(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read templates {}", path.display()))?;
    Ok(text
        .lines()
        .filter_map(|line| line.split_whitespace().last())
        .map(str::to_string)
        .collect())
}

fn cmd_generate_hashes(args: &ArchiveArgs, templates: Option<&Path>, output: Option<PathBuf>) -> Result<()> {
    let store = PackedArchiveStore::open(&args.archive)
        .with_context(|| format!("Failed to open archive {}", args.archive.display()))?;
    let templates = templates.map(read_templates).transpose()?;

    let pb = progress_bar(0)?;
    let on_progress = |progress: &GenerationProgress| {
        pb.set_length(progress.total as u64);
        pb.set_position(progress.processed as u64);
        pb.set_message(format!("{:?}: {} matched", progress.phase, progress.matched));
    };

    let start = Instant::now();
    let map = HashListGenerator::new(&store)
        .with_progress(on_progress)
        .generate(templates.as_deref());
    pb.finish_and_clear();

    let output = output.unwrap_or_else(|| args.archive.join(HASH_LIST_FILE_NAME));
    HashListGenerator::write_hash_list(&output, &map).context("Failed to write hash list")?;

    println!(
        "Resolved {} of {} hashes in {:?}",
        map.len(),
        store.all_hashes().count(),
        start.elapsed()
    );
    println!("Hash list written to {}", output.display());

    Ok(())
}

fn cmd_scan(args: &ArchiveArgs) -> Result<()> {
    let store = open_store(args)?;
    let exclude = store.names().iter().map(|(hash, _)| hash).collect();

    let found = HashListGenerator::new(&store).generate_by_content_scan(&exclude);
    for (hash, path) in &found {
        println!("{hash:016x}  {path}");
    }
    println!("\nTotal: {} probable models", found.len());

    Ok(())
}

fn cmd_trpak_list(input: &Path, hashes: Option<&Path>, oodle: Option<&Path>) -> Result<()> {
    let mut names = match hashes {
        Some(path) => HashNames::read_hash_list(path)
            .with_context(|| format!("Failed to read hash list {}", path.display()))?,
        None => HashNames::new(),
    };

    let codec = load_codec(oodle)?;
    let archive = GfpakArchive::open(input, &mut names, codec.as_ref())
        .with_context(|| format!("Failed to read {}", input.display()))?;

    let mut count = 0;
    for file in archive.files() {
        println!("{:016x} {:>12} {}", file.hash, file.data.len(), file.full_name);
        count += 1;
    }
    println!("\nTotal: {} files in {} folders", count, archive.folders.len());

    Ok(())
}
