//! Load command - Load a record set and report how it was served
//!
//! Runs the record loader with the workspace's cache and index provider and prints
//! the chosen strategy, record counts, cache origin and warnings.

use std::path::PathBuf;

use anyhow::Result;
use causeway_core::cache::CacheOrigin;
use causeway_core::{LoadErrorKind, LoadParams, LoadResult, RecordMetadata, RelationshipDegree};
use serde::Serialize;

use super::{parse_degree, print_json, print_warning, Workspace};
use crate::progress;

const MB: u64 = 1024 * 1024;

/// Arguments for the load command
#[derive(clap::Args, Debug)]
pub struct LoadArgs {
    /// Record set file path or identity (see `[sources]`)
    pub target: String,

    /// Relationship degree substituted into identity templates (1, 2 or 3)
    #[arg(long, short = 'd', value_parser = parse_degree)]
    pub degree: Option<RelationshipDegree>,

    /// Treat the source as this many MB when choosing a strategy
    #[arg(long, value_name = "MB")]
    pub size_hint_mb: Option<u64>,

    /// Print the first N records
    #[arg(long, short = 'n', default_value_t = 0)]
    pub show: usize,
}

/// Build load parameters from shared command-line flags
pub fn load_params(degree: Option<RelationshipDegree>, size_hint_mb: Option<u64>) -> LoadParams {
    let mut params = LoadParams::new();
    if let Some(degree) = degree {
        params = params.with_degree(degree);
    }
    if let Some(mb) = size_hint_mb {
        params = params.with_size_hint(mb.saturating_mul(MB));
    }
    params
}

/// Printable outcome of a load
#[derive(Debug, Clone, Serialize)]
pub struct LoadSummary {
    pub target: String,
    pub source: Option<PathBuf>,
    pub success: bool,
    pub error: Option<LoadErrorKind>,
    pub message: String,
    pub strategy: Option<&'static str>,
    pub records: usize,
    /// False for metadata-only strategies
    pub full_records: bool,
    pub from_cache: Option<CacheOrigin>,
    pub skipped_records: usize,
    pub lossy_fields: Vec<&'static str>,
    pub cache_io_warnings: u64,
    pub index_keys: Option<usize>,
    pub elapsed_ms: f64,
    pub preview: Vec<RecordMetadata>,
}

impl LoadSummary {
    pub fn from_result(target: &str, result: &LoadResult, show: usize) -> Self {
        Self {
            target: target.to_string(),
            source: result.source.clone(),
            success: result.success,
            error: result.error,
            message: result.message.clone(),
            strategy: result.strategy.map(|s| s.as_str()),
            records: result.record_count(),
            full_records: result.records().is_some(),
            from_cache: result.from_cache,
            skipped_records: result.warnings.skipped_records,
            lossy_fields: result.warnings.lossy_fields.clone(),
            cache_io_warnings: result.warnings.cache_io_warnings,
            index_keys: result.index.as_ref().map(|index| index.len()),
            elapsed_ms: result.timing.total.as_secs_f64() * 1000.0,
            preview: result.metadata().iter().take(show).cloned().collect(),
        }
    }

    fn cache_line(&self) -> String {
        match self.from_cache {
            Some(CacheOrigin::Memory) => "hit (memory)".to_string(),
            Some(CacheOrigin::Disk) => "hit (disk)".to_string(),
            Some(CacheOrigin::Loaded) | None => "miss (source read)".to_string(),
        }
    }

    fn print(&self) {
        let source = self
            .source
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| self.target.clone());
        println!("Loaded {} records from {}", self.records, source);
        if let Some(strategy) = self.strategy {
            let detail = if self.full_records {
                "full records"
            } else {
                "metadata, detail on demand"
            };
            println!("  strategy: {} ({})", strategy, detail);
        }
        println!("  cache:    {}", self.cache_line());
        if let Some(keys) = self.index_keys {
            println!("  index:    {} keys", keys);
        }
        println!("  elapsed:  {:.1} ms", self.elapsed_ms);

        for meta in &self.preview {
            println!(
                "  [{}] {} ({}) -[{}]-> {} ({})  degree={} evidence={}",
                meta.position,
                meta.subject_name,
                meta.subject_id,
                meta.predicate,
                meta.object_name,
                meta.object_id,
                meta.degree,
                meta.evidence_count
            );
        }
    }

    fn print_warnings(&self) {
        if self.skipped_records > 0 {
            print_warning(&format!("skipped {} malformed record(s)", self.skipped_records));
        }
        if !self.lossy_fields.is_empty() {
            print_warning(&format!(
                "loaded from a compact snapshot; {} were reset to defaults",
                self.lossy_fields.join(", ")
            ));
        }
        if self.cache_io_warnings > 0 {
            print_warning(&format!(
                "{} cache I/O problem(s); see logs",
                self.cache_io_warnings
            ));
        }
    }
}

/// Execute the load command
pub fn execute(args: LoadArgs, workspace: &Workspace) -> Result<()> {
    let cache = workspace.open_cache();
    let loader = workspace.record_loader(cache.clone())?;
    let params = load_params(args.degree, args.size_hint_mb);

    let pb = progress::spinner(&format!("Loading {}", args.target), workspace.quiet());
    let result = loader.load(workspace.target(&args.target), &params);
    cache.close();

    let summary = LoadSummary::from_result(&args.target, &result, args.show);
    if summary.success {
        progress::finish_spinner(pb, &format!("Loaded {}", args.target));
    } else {
        progress::finish_spinner_warn(pb, &format!("Could not load {}", args.target));
    }

    if workspace.global.json {
        print_json(&summary)?;
    } else if summary.success {
        summary.print();
        summary.print_warnings();
    }

    if !summary.success {
        anyhow::bail!("{}", summary.message);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use causeway_core::{write_records, AssertionRecord, RecordLoader};
    use tempfile::TempDir;

    fn records() -> Vec<AssertionRecord> {
        vec![
            AssertionRecord::new("Smoking", "C0037369", "Asthma", "C0004096")
                .with_citation("111", ["Smoking worsens asthma."]),
            AssertionRecord::new("Obesity", "C0028754", "Asthma", "C0004096")
                .with_citation("222", ["Obesity is linked to asthma."]),
        ]
    }

    #[test]
    fn test_load_params_from_flags() {
        let params = load_params(Some(RelationshipDegree::Second), Some(80));
        assert_eq!(params.degree, Some(RelationshipDegree::Second));
        assert_eq!(params.size_hint, Some(80 * MB));

        let params = load_params(None, None);
        assert!(params.degree.is_none());
        assert!(params.size_hint.is_none());
    }

    #[test]
    fn test_summary_of_successful_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("asthma.json");
        write_records(&path, &records(), true).unwrap();

        let result = RecordLoader::default().load(path.as_path(), &LoadParams::new());
        let summary = LoadSummary::from_result("asthma.json", &result, 1);

        assert!(summary.success);
        assert_eq!(summary.records, 2);
        assert_eq!(summary.strategy, Some("full-eager"));
        assert!(summary.full_records);
        assert_eq!(summary.preview.len(), 1);
        assert_eq!(summary.preview[0].subject_name, "Smoking");
        assert_eq!(summary.cache_line(), "miss (source read)");

        let json = serde_json::to_string(&summary).unwrap();
        assert!(json.contains("\"strategy\":\"full-eager\""));
    }

    #[test]
    fn test_summary_of_failed_load() {
        let temp = TempDir::new().unwrap();
        let result = RecordLoader::default()
            .load(temp.path().join("missing.json"), &LoadParams::new());
        let summary = LoadSummary::from_result("missing.json", &result, 5);

        assert!(!summary.success);
        assert_eq!(summary.error, Some(LoadErrorKind::NotFound));
        assert_eq!(summary.records, 0);
        assert!(summary.preview.is_empty());
    }
}
