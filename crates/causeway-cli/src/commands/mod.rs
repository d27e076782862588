//! CLI command implementations
//!
//! This module contains all Causeway CLI command implementations and the workspace
//! wiring they share: configuration → cache, loader and index provider.

pub mod cache;
pub mod compact;
pub mod config;
pub mod load;
pub mod lookup;
pub mod snapshot;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use causeway_config::{CausewayConfig, ConfigLoader};
use causeway_core::{
    CacheManager, CacheSettings, Compression, LoadTarget, LoadedData, LoaderSettings,
    RecordLoader, RelationshipDegree, SourceResolver, SynonymIndexProvider, SynonymTable,
};
use serde::Serialize;
use tracing::debug;

use crate::GlobalOptions;

/// Resolve the workspace path from options or current directory.
pub fn resolve_workspace(global: &GlobalOptions) -> Result<PathBuf> {
    if let Some(ref ws) = global.workspace {
        if !ws.is_dir() {
            anyhow::bail!("Workspace '{}' is not a directory", ws.display());
        }
        return ws
            .canonicalize()
            .with_context(|| format!("Failed to resolve workspace {}", ws.display()));
    }

    std::env::current_dir().context("Failed to get current directory")
}

/// Load configuration: global → local → `--config` file → CLI overrides.
pub fn load_config(global: &GlobalOptions, workspace: &Path) -> Result<CausewayConfig> {
    let mut loader = ConfigLoader::new();
    let overrides = global.to_config_overrides();
    loader
        .load_with_file(workspace, global.config.as_deref(), Some(&overrides))
        .context("Failed to load configuration")
}

/// Parse a relationship degree argument (1, 2 or 3)
pub fn parse_degree(s: &str) -> Result<RelationshipDegree, String> {
    match RelationshipDegree::parse(s) {
        RelationshipDegree::Unknown => Err(format!("invalid degree '{}', expected 1, 2 or 3", s)),
        degree => Ok(degree),
    }
}

/// A resolved workspace with its effective configuration
pub struct Workspace {
    pub root: PathBuf,
    pub config: CausewayConfig,
    pub global: GlobalOptions,
}

impl Workspace {
    pub fn new(root: PathBuf, config: CausewayConfig, global: GlobalOptions) -> Self {
        Self {
            root,
            config,
            global,
        }
    }

    pub fn quiet(&self) -> bool {
        self.global.is_quiet()
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.config.cache_dir(&self.root)
    }

    pub fn cache_settings(&self) -> CacheSettings {
        let cache = &self.config.cache;
        if !cache.enabled {
            return CacheSettings::disabled();
        }

        let mut settings = CacheSettings::default()
            .with_max_items(cache.max_items)
            .with_max_memory_bytes(self.config.max_memory_bytes())
            .with_max_disk_bytes(self.config.max_disk_bytes())
            .with_persist_to_disk(cache.persist_to_disk);
        if cache.persist_to_disk {
            settings = settings.with_dir(self.cache_dir());
        }
        settings.compression = Compression::from_level(cache.compression_level);
        settings
    }

    pub fn open_cache(&self) -> Arc<CacheManager<LoadedData>> {
        Arc::new(CacheManager::new(self.cache_settings()))
    }

    pub fn loader_settings(&self) -> LoaderSettings {
        LoaderSettings::default()
            .with_thresholds(
                self.config.lazy_threshold_bytes(),
                self.config.stream_threshold_bytes(),
            )
            .with_chunk_size(self.config.loader.chunk_size)
            .with_prefer_snapshot(self.config.loader.prefer_snapshot)
    }

    pub fn resolver(&self) -> SourceResolver {
        let mut resolver = SourceResolver::new(self.config.data_dir(&self.root))
            .with_template(self.config.sources.file_template.clone());
        for (identity, path) in &self.config.sources.named {
            let path = if path.is_absolute() {
                path.clone()
            } else {
                self.root.join(path)
            };
            resolver = resolver.with_named(identity.clone(), path);
        }
        resolver
    }

    /// Index provider per `[index]`: plain keys, or synonym keys from the configured table
    pub fn index_provider(&self) -> Result<SynonymIndexProvider> {
        if !self.config.index.expand_synonyms {
            return Ok(SynonymIndexProvider::plain());
        }

        match self.config.synonyms_file(&self.root) {
            Some(path) => {
                let table = SynonymTable::from_file(&path)
                    .with_context(|| format!("Failed to load synonyms from {}", path.display()))?;
                debug!(
                    "Loaded {} synonym groups from {:?}",
                    table.group_count(),
                    path
                );
                Ok(SynonymIndexProvider::with_table(Arc::new(table)))
            }
            None => Ok(SynonymIndexProvider::with_builtin_synonyms()),
        }
    }

    /// Loader wired with this workspace's cache, resolver and index provider
    pub fn record_loader(&self, cache: Arc<CacheManager<LoadedData>>) -> Result<RecordLoader> {
        Ok(RecordLoader::new(self.loader_settings())
            .with_resolver(self.resolver())
            .with_cache(cache)
            .with_index_provider(Arc::new(self.index_provider()?)))
    }

    /// Interpret a command-line target as a file path or a record set identity.
    ///
    /// Existing files and anything that looks like a path are paths; everything else
    /// is resolved through `[sources]`. Relative paths not found from the current
    /// directory are taken relative to the workspace root.
    pub fn target(&self, raw: &str) -> LoadTarget {
        let path = Path::new(raw);
        if path.exists() {
            return LoadTarget::Path(path.to_path_buf());
        }
        let in_root = self.root.join(path);
        let looks_like_path = path.components().count() > 1 || path.extension().is_some();
        if in_root.exists() || looks_like_path {
            LoadTarget::Path(in_root)
        } else {
            LoadTarget::Identity(raw.to_string())
        }
    }
}

/// Print a value as pretty JSON on stdout
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a warning message to stderr.
pub fn print_warning(message: &str) {
    eprintln!("warning: {}", message);
}

/// Print an info message (respects quiet flag).
pub fn print_info(message: &str, quiet: bool) {
    if !quiet {
        eprintln!("{}", message);
    }
}

/// Human-readable byte count
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
