//! Compact and expand commands - Convert between interchange and compact forms
//!
//! The compact form deduplicates sentences and citation ids into shared tables;
//! the ultra-compact form also interns subject/object entities. Both drop the
//! predicate and relationship degree, so `expand` warns about the reset fields.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use causeway_core::codec::{write_atomic, SNAPSHOT_EXTENSION};
use causeway_core::interchange::to_json;
use causeway_core::{
    compact, read_snapshot, CompactRecordSet, CompactStats, Expansion, UltraCompactRecordSet,
};
use serde::Serialize;

use super::snapshot::stream_records;
use super::{format_bytes, print_json, print_warning, Workspace};

/// Arguments for the compact command
#[derive(clap::Args, Debug)]
pub struct CompactArgs {
    /// Interchange (JSON) source file
    pub source: PathBuf,

    /// Output path (defaults to `<source>.compact.json`)
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,

    /// Also intern subject/object entities
    #[arg(long)]
    pub ultra: bool,

    /// Pretty-print the output
    #[arg(long)]
    pub pretty: bool,
}

/// Arguments for the expand command
#[derive(clap::Args, Debug)]
pub struct ExpandArgs {
    /// Compact JSON file or compact snapshot
    pub input: PathBuf,

    /// Output path (defaults to `<input>.expanded.json`)
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,

    /// Pretty-print the output
    #[arg(long)]
    pub pretty: bool,
}

/// What `compact` produced
#[derive(Debug, Clone, Serialize)]
pub struct CompactReport {
    pub source: PathBuf,
    pub output: PathBuf,
    pub ultra: bool,
    pub stats: CompactStats,
    pub sentence_dedup_ratio: f64,
    pub citation_dedup_ratio: f64,
    /// Interned entities (ultra-compact only)
    pub entities: Option<usize>,
    pub skipped_records: usize,
    pub source_bytes: u64,
    pub output_bytes: u64,
}

/// What `expand` produced
#[derive(Debug, Clone, Serialize)]
pub struct ExpandReport {
    pub input: PathBuf,
    pub output: PathBuf,
    pub records: usize,
    pub lossy: bool,
    pub lossy_fields: Vec<&'static str>,
    pub output_bytes: u64,
}

/// `dir/stem.<suffix>` next to `path`
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "records".to_string());
    path.with_file_name(format!("{}.{}", stem, suffix))
}

fn to_bytes<T: Serialize>(value: &T, pretty: bool) -> Result<Vec<u8>> {
    let bytes = if pretty {
        serde_json::to_vec_pretty(value)?
    } else {
        serde_json::to_vec(value)?
    };
    Ok(bytes)
}

/// Convert an interchange file to compact JSON
pub fn compact_file(args: &CompactArgs, workspace: &Workspace) -> Result<CompactReport> {
    let (records, skipped) = stream_records(
        &args.source,
        workspace.config.loader.chunk_size,
        workspace.quiet(),
    )?;
    if records.is_empty() {
        anyhow::bail!("No valid records in {}", args.source.display());
    }

    let set = compact(&records);
    let stats = set.stats();
    let (bytes, entities) = if args.ultra {
        let ultra = set.to_ultra();
        let entities = ultra.entities.len();
        (to_bytes(&ultra, args.pretty)?, Some(entities))
    } else {
        (to_bytes(&set, args.pretty)?, None)
    };

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| sibling(&args.source, "compact.json"));
    write_atomic(&output, &bytes)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    Ok(CompactReport {
        source: args.source.clone(),
        output,
        ultra: args.ultra,
        sentence_dedup_ratio: stats.sentence_dedup_ratio(),
        citation_dedup_ratio: stats.citation_dedup_ratio(),
        stats,
        entities,
        skipped_records: skipped,
        source_bytes: std::fs::metadata(&args.source)?.len(),
        output_bytes: bytes.len() as u64,
    })
}

/// Read a compact or ultra-compact JSON document and expand it
fn expand_json(path: &Path) -> Result<Expansion> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_slice(&bytes)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;

    let expansion = if value.get("entities").is_some() {
        let set: UltraCompactRecordSet = serde_json::from_value(value)
            .with_context(|| format!("{} is not an ultra-compact record set", path.display()))?;
        set.expand()?
    } else {
        let set: CompactRecordSet = serde_json::from_value(value)
            .with_context(|| format!("{} is not a compact record set", path.display()))?;
        set.expand()?
    };
    Ok(expansion)
}

/// Expand a compact file or snapshot to interchange JSON
pub fn expand_file(args: &ExpandArgs) -> Result<ExpandReport> {
    let is_snapshot = args
        .input
        .extension()
        .is_some_and(|ext| ext == SNAPSHOT_EXTENSION);

    let (records, lossy, lossy_fields) = if is_snapshot {
        let snapshot = read_snapshot(&args.input)
            .with_context(|| format!("Failed to read snapshot {}", args.input.display()))?;
        let (records, lossy) = snapshot.into_records()?;
        let fields = if lossy {
            causeway_core::compact::LOSSY_FIELDS.to_vec()
        } else {
            Vec::new()
        };
        (records, lossy, fields)
    } else {
        let expansion = expand_json(&args.input)?;
        (
            expansion.records,
            expansion.lossy,
            expansion.lossy_fields.to_vec(),
        )
    };

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| sibling(&args.input, "expanded.json"));
    let bytes = to_json(&records, args.pretty)?;
    write_atomic(&output, &bytes)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    Ok(ExpandReport {
        input: args.input.clone(),
        output,
        records: records.len(),
        lossy,
        lossy_fields,
        output_bytes: bytes.len() as u64,
    })
}

/// Execute the compact command
pub fn execute_compact(args: CompactArgs, workspace: &Workspace) -> Result<()> {
    let report = compact_file(&args, workspace)?;

    if workspace.global.json {
        return print_json(&report);
    }

    println!(
        "Wrote {} compact records to {} ({} from {})",
        report.stats.records,
        report.output.display(),
        format_bytes(report.output_bytes),
        format_bytes(report.source_bytes)
    );
    println!(
        "  sentences: {} unique ({:.2}x reuse)",
        report.stats.unique_sentences, report.sentence_dedup_ratio
    );
    println!(
        "  citations: {} unique ({:.2}x reuse)",
        report.stats.unique_citations, report.citation_dedup_ratio
    );
    if let Some(entities) = report.entities {
        println!("  entities:  {}", entities);
    }
    if report.skipped_records > 0 {
        print_warning(&format!("skipped {} malformed record(s)", report.skipped_records));
    }
    Ok(())
}

/// Execute the expand command
pub fn execute_expand(args: ExpandArgs, workspace: &Workspace) -> Result<()> {
    let report = expand_file(&args)?;

    if workspace.global.json {
        return print_json(&report);
    }

    println!(
        "Wrote {} records to {} ({})",
        report.records,
        report.output.display(),
        format_bytes(report.output_bytes)
    );
    if report.lossy {
        print_warning(&format!(
            "{} were reset to defaults by the compact form",
            report.lossy_fields.join(", ")
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GlobalOptions;
    use causeway_config::CausewayConfig;
    use causeway_core::{read_records, write_records, AssertionRecord, RelationshipDegree};
    use tempfile::TempDir;

    fn records() -> Vec<AssertionRecord> {
        (0..4)
            .map(|i| {
                AssertionRecord::new("Smoking", "C0037369", format!("Disease {}", i), format!("d{}", i))
                    .with_predicate("PREDISPOSES")
                    .with_degree(RelationshipDegree::Second)
                    .with_citation("999", ["Shared sentence."])
                    .with_citation(format!("{}", i), [format!("Own sentence {}.", i)])
            })
            .collect()
    }

    fn setup() -> (TempDir, Workspace, PathBuf) {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("smoking.json");
        write_records(&source, &records(), false).unwrap();
        let global = GlobalOptions {
            quiet: true,
            ..Default::default()
        };
        let ws = Workspace::new(temp.path().to_path_buf(), CausewayConfig::default(), global);
        (temp, ws, source)
    }

    #[test]
    fn test_sibling_paths() {
        assert_eq!(
            sibling(Path::new("/data/asthma.json"), "compact.json"),
            PathBuf::from("/data/asthma.compact.json")
        );
    }

    #[test]
    fn test_compact_then_expand() {
        let (_temp, ws, source) = setup();
        let args = CompactArgs {
            source: source.clone(),
            output: None,
            ultra: false,
            pretty: false,
        };

        let report = compact_file(&args, &ws).unwrap();
        assert_eq!(report.stats.records, 4);
        // One shared sentence plus one per record
        assert_eq!(report.stats.unique_sentences, 5);
        assert!(report.entities.is_none());

        let expanded = expand_file(&ExpandArgs {
            input: report.output.clone(),
            output: None,
            pretty: true,
        })
        .unwrap();
        assert_eq!(expanded.records, 4);
        assert!(expanded.lossy);
        assert_eq!(expanded.lossy_fields, vec!["predicate", "relationship_degree"]);

        let back = read_records(&expanded.output).unwrap().records;
        let original = records();
        assert_eq!(back.len(), original.len());
        for (restored, original) in back.iter().zip(&original) {
            assert_eq!(restored.object_id, original.object_id);
            assert_eq!(restored.citations, original.citations);
            assert_eq!(restored.degree, RelationshipDegree::Unknown);
        }
    }

    #[test]
    fn test_ultra_compact_then_expand() {
        let (temp, ws, source) = setup();
        let output = temp.path().join("ultra.json");
        let report = compact_file(
            &CompactArgs {
                source,
                output: Some(output.clone()),
                ultra: true,
                pretty: false,
            },
            &ws,
        )
        .unwrap();
        // Smoking plus four diseases
        assert_eq!(report.entities, Some(5));

        let expanded = expand_file(&ExpandArgs {
            input: output,
            output: None,
            pretty: false,
        })
        .unwrap();
        assert_eq!(expanded.records, 4);
    }

    #[test]
    fn test_expand_rejects_unrelated_json() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("other.json");
        std::fs::write(&input, r#"{"hello": "world"}"#).unwrap();
        assert!(expand_file(&ExpandArgs {
            input,
            output: None,
            pretty: false,
        })
        .is_err());
    }
}
