//! Snapshot command - Build and inspect binary snapshots
//!
//! `build` streams an interchange file through the chunk parser and writes a
//! checksummed snapshot next to it (or to `--output`). A snapshot newer than its
//! source is preferred by the loader regardless of source size.
//!
//! `inspect` reads the header only, or decodes and verifies the whole body with
//! `--verify`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use causeway_config::MAX_COMPRESSION_LEVEL;
use causeway_core::codec::{encode_compact, encode_ultra_compact, write_atomic, SNAPSHOT_EXTENSION};
use causeway_core::{
    compact, encode, inspect_snapshot, read_snapshot, snapshot_path_for, ultra_compact,
    AssertionRecord, ChunkParser, Compression, SnapshotHeader,
};
use clap::{Subcommand, ValueEnum};
use serde::Serialize;
use tracing::info;

use super::{format_bytes, print_json, print_warning, Workspace};
use crate::progress;

/// Snapshot commands
#[derive(Subcommand, Debug)]
pub enum SnapshotCommand {
    /// Parse an interchange file and write a binary snapshot
    Build(BuildArgs),

    /// Show a snapshot's header
    Inspect(InspectArgs),
}

/// Snapshot body layout
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SnapshotFormat {
    /// Full records (lossless)
    Records,
    /// Deduplicated sentences and citations (resets predicate and degree)
    Compact,
    /// Compact plus an interned entity table (resets predicate and degree)
    UltraCompact,
}

/// Arguments for the build command
#[derive(clap::Args, Debug)]
pub struct BuildArgs {
    /// Interchange (JSON) source file
    pub source: PathBuf,

    /// Output path (defaults to the source path with a .cwsnap extension)
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,

    /// zstd level, 0 for uncompressed (defaults to loader.snapshot_compression_level)
    #[arg(long, short = 'l')]
    pub level: Option<i32>,

    /// Body layout
    #[arg(long, value_enum, default_value_t = SnapshotFormat::Records)]
    pub format: SnapshotFormat,
}

/// Arguments for the inspect command
#[derive(clap::Args, Debug)]
pub struct InspectArgs {
    /// Snapshot file, or an interchange file whose sibling snapshot to inspect
    pub path: PathBuf,

    /// Decode the whole body and verify its checksum
    #[arg(long)]
    pub verify: bool,
}

/// What `snapshot build` produced
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub source: PathBuf,
    pub output: PathBuf,
    pub format: SnapshotFormat,
    pub compression_level: i32,
    pub records: usize,
    pub skipped_records: usize,
    pub source_bytes: u64,
    pub snapshot_bytes: u64,
}

/// What `snapshot inspect` found
#[derive(Debug, Clone, Serialize)]
pub struct InspectReport {
    pub path: PathBuf,
    pub version: u8,
    pub kind: String,
    pub compressed: bool,
    pub level: u8,
    pub body_bytes: u64,
    pub raw_bytes: u64,
    pub file_bytes: u64,
    /// Record count, when verified
    pub records: Option<usize>,
    pub lossy: Option<bool>,
}

/// Execute the snapshot command
pub fn execute(cmd: SnapshotCommand, workspace: &Workspace) -> Result<()> {
    match cmd {
        SnapshotCommand::Build(args) => execute_build(args, workspace),
        SnapshotCommand::Inspect(args) => execute_inspect(args, workspace),
    }
}

/// Stream an interchange file into memory, rendering parser progress
pub fn stream_records(
    source: &Path,
    chunk_size: usize,
    quiet: bool,
) -> Result<(Vec<AssertionRecord>, usize)> {
    let size = std::fs::metadata(source)
        .with_context(|| format!("Failed to read {}", source.display()))?
        .len();

    let mut parser = ChunkParser::open(source, chunk_size)
        .with_context(|| format!("Failed to open {}", source.display()))?;
    let pb = progress::bytes_bar(size, "Parsing", quiet);
    let mut records = Vec::new();
    let summary = parser
        .process(None, |chunk, position| {
            records.extend(chunk.records);
            progress::update_stream(pb.as_ref(), &position);
        })
        .with_context(|| format!("Failed to parse {}", source.display()))?;
    progress::finish_progress(pb);

    Ok((records, summary.skipped()))
}

/// Parse a compression level argument
pub fn compression_for(level: i32) -> Result<Compression> {
    if !(0..=MAX_COMPRESSION_LEVEL).contains(&level) {
        anyhow::bail!(
            "Compression level {} is outside 0..={}",
            level,
            MAX_COMPRESSION_LEVEL
        );
    }
    Ok(Compression::from_level(level))
}

/// Encode records in the requested layout
pub fn encode_as(
    records: &[AssertionRecord],
    format: SnapshotFormat,
    compression: Compression,
) -> Result<Vec<u8>> {
    let bytes = match format {
        SnapshotFormat::Records => encode(records, compression)?,
        SnapshotFormat::Compact => encode_compact(&compact(records), compression)?,
        SnapshotFormat::UltraCompact => {
            encode_ultra_compact(&ultra_compact(records), compression)?
        }
    };
    Ok(bytes)
}

/// Build a snapshot for `args.source`
pub fn build(args: &BuildArgs, workspace: &Workspace) -> Result<BuildReport> {
    let level = args
        .level
        .unwrap_or(workspace.config.loader.snapshot_compression_level);
    let compression = compression_for(level)?;

    let (records, skipped) = stream_records(
        &args.source,
        workspace.config.loader.chunk_size,
        workspace.quiet(),
    )?;
    if records.is_empty() {
        anyhow::bail!("No valid records in {}", args.source.display());
    }

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| snapshot_path_for(&args.source));
    let bytes = encode_as(&records, args.format, compression)?;
    write_atomic(&output, &bytes)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    info!(
        "Wrote {:?} snapshot of {:?} ({} records) to {:?}",
        args.format,
        args.source,
        records.len(),
        output
    );

    Ok(BuildReport {
        source: args.source.clone(),
        output,
        format: args.format,
        compression_level: level,
        records: records.len(),
        skipped_records: skipped,
        source_bytes: std::fs::metadata(&args.source)?.len(),
        snapshot_bytes: bytes.len() as u64,
    })
}

fn execute_build(args: BuildArgs, workspace: &Workspace) -> Result<()> {
    let report = build(&args, workspace)?;

    if workspace.global.json {
        return print_json(&report);
    }

    println!(
        "Wrote {} records to {} ({} from {})",
        report.records,
        report.output.display(),
        format_bytes(report.snapshot_bytes),
        format_bytes(report.source_bytes)
    );
    if report.skipped_records > 0 {
        print_warning(&format!("skipped {} malformed record(s)", report.skipped_records));
    }
    if report.format != SnapshotFormat::Records {
        print_warning("compact snapshots do not keep predicate or relationship degree");
    }
    Ok(())
}

/// Inspect (and optionally verify) a snapshot
pub fn inspect(path: &Path, verify: bool) -> Result<InspectReport> {
    let path = if path.extension().is_some_and(|ext| ext == SNAPSHOT_EXTENSION) {
        path.to_path_buf()
    } else {
        snapshot_path_for(path)
    };

    let header: SnapshotHeader = inspect_snapshot(&path)
        .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
    let file_bytes = std::fs::metadata(&path)?.len();

    let (records, lossy) = if verify {
        let (records, lossy) = read_snapshot(&path)
            .and_then(|snapshot| snapshot.into_records())
            .with_context(|| format!("Snapshot {} failed verification", path.display()))?;
        (Some(records.len()), Some(lossy))
    } else {
        (None, None)
    };

    Ok(InspectReport {
        path,
        version: header.version,
        kind: format!("{:?}", header.kind),
        compressed: header.compressed,
        level: header.level,
        body_bytes: header.body_len,
        raw_bytes: header.raw_len,
        file_bytes,
        records,
        lossy,
    })
}

fn execute_inspect(args: InspectArgs, workspace: &Workspace) -> Result<()> {
    let report = inspect(&args.path, args.verify)?;

    if workspace.global.json {
        return print_json(&report);
    }

    println!("Snapshot {}", report.path.display());
    println!("  version:     {}", report.version);
    println!("  payload:     {}", report.kind);
    if report.compressed {
        println!("  compression: zstd (level {})", report.level);
    } else {
        println!("  compression: none");
    }
    println!(
        "  body:        {} ({} uncompressed)",
        format_bytes(report.body_bytes),
        format_bytes(report.raw_bytes)
    );
    println!("  file:        {}", format_bytes(report.file_bytes));
    if let Some(records) = report.records {
        println!("  verified:    {} records", records);
    }
    Ok(())
}
