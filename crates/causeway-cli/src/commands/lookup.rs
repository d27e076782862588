//! Lookup command - Find the record for a (subject, object) edge
//!
//! Loads the record set, resolves the pair through its edge index (names are
//! normalized, synonyms apply when enabled; without an index the loaded metadata
//! is scanned) and prints the matching record with its citations.

use anyhow::{Context, Result};
use causeway_core::{AssertionRecord, EdgeIndexEntry, LoadResult, RelationshipDegree};
use serde::Serialize;

use super::load::load_params;
use super::{parse_degree, print_json, Workspace};
use crate::progress;

/// Arguments for the lookup command
#[derive(clap::Args, Debug)]
pub struct LookupArgs {
    /// Record set file path or identity (see `[sources]`)
    pub target: String,

    /// Subject name
    pub subject: String,

    /// Object name
    pub object: String,

    /// Relationship degree substituted into identity templates (1, 2 or 3)
    #[arg(long, short = 'd', value_parser = parse_degree)]
    pub degree: Option<RelationshipDegree>,

    /// Treat the source as this many MB when choosing a strategy
    #[arg(long, value_name = "MB")]
    pub size_hint_mb: Option<u64>,

    /// Print supporting sentences, not just citation ids
    #[arg(long, short = 's')]
    pub sentences: bool,
}

/// An edge match with its full record
#[derive(Debug, Clone, Serialize)]
pub struct LookupMatch {
    pub entry: EdgeIndexEntry,
    pub record: AssertionRecord,
}

/// Resolve an edge in a successful load result
pub fn find_edge(result: &LoadResult, subject: &str, object: &str) -> Result<LookupMatch> {
    let entry = result.lookup_edge(subject, object)?;

    let record = match result.records() {
        Some(records) => records.get(entry.position).cloned().with_context(|| {
            format!("Index points past the end of the record set ({})", entry.position)
        })?,
        None => {
            let detail = result
                .detail
                .as_ref()
                .context("Load result has neither records nor a detail loader")?;
            detail
                .fetch(entry.position)
                .context("Failed to read record detail")?
        }
    };

    Ok(LookupMatch { entry, record })
}

fn print_match(found: &LookupMatch, sentences: bool) {
    let record = &found.record;
    println!(
        "{} ({}) -[{}]-> {} ({})",
        record.subject_name,
        record.subject_id,
        record.predicate,
        record.object_name,
        record.object_id
    );
    println!("  position: {}", found.entry.position);
    println!("  degree:   {}", record.degree);
    println!("  evidence: {}", record.evidence_count);
    println!("  citations ({}):", record.citation_count());
    for (citation, texts) in &record.citations {
        if sentences {
            println!("    {}", citation);
            for text in texts {
                println!("      - {}", text);
            }
        } else {
            println!("    {} ({} sentences)", citation, texts.len());
        }
    }
}

/// Execute the lookup command
pub fn execute(args: LookupArgs, workspace: &Workspace) -> Result<()> {
    let cache = workspace.open_cache();
    let loader = workspace.record_loader(cache.clone())?;
    let params = load_params(args.degree, args.size_hint_mb);

    let pb = progress::spinner(&format!("Loading {}", args.target), workspace.quiet());
    let result = loader.load(workspace.target(&args.target), &params);
    cache.close();
    progress::finish_progress(pb);

    if !result.success {
        anyhow::bail!("{}", result.message);
    }

    let found = find_edge(&result, &args.subject, &args.object)?;
    if workspace.global.json {
        print_json(&found)?;
    } else {
        print_match(&found, args.sentences);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use causeway_core::{write_records, LoadParams, RecordLoader, SynonymIndexProvider};
    use std::sync::Arc;
    use tempfile::TempDir;

    const MB: u64 = 1024 * 1024;

    fn setup() -> (TempDir, std::path::PathBuf) {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("asthma.json");
        let records = vec![
            AssertionRecord::new("Smoking", "C0037369", "Asthma", "C0004096")
                .with_citation("111", ["Smoking worsens asthma."]),
            AssertionRecord::new("Obesity", "C0028754", "Asthma", "C0004096")
                .with_citation("222", ["Obesity is linked to asthma."]),
        ];
        write_records(&path, &records, true).unwrap();
        (temp, path)
    }

    fn loader() -> RecordLoader {
        RecordLoader::default().with_index_provider(Arc::new(SynonymIndexProvider::plain()))
    }

    #[test]
    fn test_find_edge_in_full_result() {
        let (_temp, path) = setup();
        let result = loader().load(path.as_path(), &LoadParams::new());

        let found = find_edge(&result, "  OBESITY ", "asthma").unwrap();
        assert_eq!(found.entry.position, 1);
        assert_eq!(found.record.subject_id, "C0028754");
        assert!(found.record.citations.contains_key("222"));
    }

    #[test]
    fn test_find_edge_through_streamed_spans() {
        let (_temp, path) = setup();
        let params = LoadParams::new().with_size_hint(2000 * MB);
        let result = loader().load(path.as_path(), &params);
        assert!(result.records().is_none());

        let found = find_edge(&result, "smoking", "asthma").unwrap();
        assert_eq!(found.record.subject_name, "Smoking");
        assert_eq!(found.record.citation_count(), 1);
    }

    #[test]
    fn test_find_edge_without_index() {
        let (_temp, path) = setup();
        for hint in [MB, 2000 * MB] {
            let params = LoadParams::new().with_size_hint(hint);
            let result = RecordLoader::default().load(path.as_path(), &params);
            assert!(result.index.is_none());

            let found = find_edge(&result, "Obesity", "ASTHMA").unwrap();
            assert_eq!(found.entry.position, 1);
            assert_eq!(found.record.subject_id, "C0028754");
        }
    }

    #[test]
    fn test_missing_edge_is_error() {
        let (_temp, path) = setup();
        let result = loader().load(path.as_path(), &LoadParams::new());
        assert!(find_edge(&result, "Pollen", "Asthma").is_err());
    }
}
