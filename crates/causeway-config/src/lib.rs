//! Causeway Configuration Management
//!
//! Provides configuration loading with support for:
//! - Global config: `~/.causeway/config.toml`
//! - Local config: `.causeway/config.toml` (in workspace)
//! - An explicit config file passed on the command line
//! - CLI overrides via `ConfigOverrides`
//!
//! Configuration is merged in order: global → local → explicit file → CLI overrides.

mod error;
mod loader;

pub use error::ConfigError;
pub use loader::ConfigLoader;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const MB: u64 = 1024 * 1024;

/// Highest zstd level accepted for cache and snapshot compression
pub const MAX_COMPRESSION_LEVEL: i32 = 22;

/// Root configuration for Causeway.
///
/// Represents the fully merged configuration from all sources.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct CausewayConfig {
    /// Tiered cache configuration
    pub cache: CacheConfig,

    /// Loading strategy configuration
    pub loader: LoaderConfig,

    /// Edge index configuration
    pub index: IndexConfig,

    /// Where record sets live
    pub sources: SourcesConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Tiered cache configuration.
///
/// # Example TOML
///
/// ```toml
/// [cache]
/// enabled = true
/// dir = ".causeway/cache"
/// max_items = 16
/// max_memory_mb = 1024
/// max_disk_mb = 4096
/// compression_level = 3
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Disable to make every lookup a miss
    pub enabled: bool,

    /// Disk tier directory, relative to the workspace unless absolute
    pub dir: PathBuf,

    /// Memory tier item ceiling
    pub max_items: usize,

    /// Memory tier budget in MB
    pub max_memory_mb: u64,

    /// Disk tier budget in MB
    pub max_disk_mb: u64,

    /// Write loaded record sets to the disk tier
    pub persist_to_disk: bool,

    /// zstd level for disk entries (0 = uncompressed)
    pub compression_level: i32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from(".causeway/cache"),
            max_items: 16,
            max_memory_mb: 1024,
            max_disk_mb: 4096,
            persist_to_disk: true,
            compression_level: 3,
        }
    }
}

/// Loading strategy configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoaderConfig {
    /// Sources up to this size are parsed eagerly
    pub lazy_threshold_mb: u64,

    /// Sources up to this size return metadata with lazy detail; larger ones stream
    pub stream_threshold_mb: u64,

    /// Records per chunk when streaming
    pub chunk_size: usize,

    /// Use a fresh binary snapshot next to the source when present
    pub prefer_snapshot: bool,

    /// zstd level for snapshots written by `snapshot build`
    pub snapshot_compression_level: i32,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            lazy_threshold_mb: 50,
            stream_threshold_mb: 100,
            chunk_size: 1000,
            prefer_snapshot: true,
            snapshot_compression_level: 3,
        }
    }
}

/// Edge index configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct IndexConfig {
    /// Add synonym-derived keys to edge indexes
    pub expand_synonyms: bool,

    /// Synonym table file; the built-in table is used when unset
    pub synonyms_file: Option<PathBuf>,
}

/// Record set locations.
///
/// Identities resolve through `named` first, then `data_dir` + `file_template`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SourcesConfig {
    /// Directory holding record sets, relative to the workspace unless absolute
    pub data_dir: PathBuf,

    /// File name template; `{name}` and `{degree}` are substituted
    pub file_template: String,

    /// Identity → file path
    pub named: BTreeMap<String, PathBuf>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            file_template: "{name}.json".to_string(),
            named: BTreeMap::new(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: LogFormat,

    /// Log file path (optional)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
            file: None,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON structured logging
    Json,
}

/// CLI overrides for configuration values.
///
/// Used to apply command-line arguments over file-based config.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override workspace root directory
    pub workspace_root: Option<PathBuf>,

    /// Override cache directory
    pub cache_dir: Option<PathBuf>,

    /// Force the cache on or off
    pub cache_enabled: Option<bool>,

    /// Override data directory
    pub data_dir: Option<PathBuf>,

    /// Override streaming chunk size
    pub chunk_size: Option<usize>,

    /// Force synonym expansion on or off
    pub expand_synonyms: Option<bool>,

    /// Override log level
    pub log_level: Option<String>,
}

/// Resolve `path` against `root` unless it is absolute
fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Placeholders a file template may use
const TEMPLATE_PLACEHOLDERS: [&str; 2] = ["name", "degree"];

fn check_template(template: &str) -> Result<(), ConfigError> {
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            return Err(ConfigError::invalid_value(
                "sources.file_template",
                format!("unclosed '{{' in '{}'", template),
            ));
        };
        let placeholder = &after[..close];
        if !TEMPLATE_PLACEHOLDERS.contains(&placeholder) {
            return Err(ConfigError::UnknownPlaceholder {
                template: template.to_string(),
                placeholder: placeholder.to_string(),
            });
        }
        rest = &after[close + 1..];
    }
    if !template.contains("{name}") {
        return Err(ConfigError::TemplateWithoutName {
            template: template.to_string(),
        });
    }
    Ok(())
}

impl CausewayConfig {
    /// Apply CLI overrides to this configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref dir) = overrides.cache_dir {
            self.cache.dir = dir.clone();
        }

        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = enabled;
        }

        if let Some(ref dir) = overrides.data_dir {
            self.sources.data_dir = dir.clone();
        }

        if let Some(chunk_size) = overrides.chunk_size {
            self.loader.chunk_size = chunk_size;
        }

        if let Some(expand) = overrides.expand_synonyms {
            self.index.expand_synonyms = expand;
        }

        if let Some(ref level) = overrides.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.loader.stream_threshold_mb < self.loader.lazy_threshold_mb {
            return Err(ConfigError::ThresholdOrder {
                lazy_mb: self.loader.lazy_threshold_mb,
                stream_mb: self.loader.stream_threshold_mb,
            });
        }
        if self.loader.chunk_size == 0 {
            return Err(ConfigError::invalid_value(
                "loader.chunk_size",
                "must be at least 1",
            ));
        }
        if self.cache.max_items == 0 {
            return Err(ConfigError::invalid_value(
                "cache.max_items",
                "must be at least 1",
            ));
        }
        for (key, level) in [
            ("cache.compression_level", self.cache.compression_level),
            (
                "loader.snapshot_compression_level",
                self.loader.snapshot_compression_level,
            ),
        ] {
            if !(0..=MAX_COMPRESSION_LEVEL).contains(&level) {
                return Err(ConfigError::invalid_value(
                    key,
                    format!("{} is outside 0..={}", level, MAX_COMPRESSION_LEVEL),
                ));
            }
        }
        check_template(&self.sources.file_template)?;
        Ok(())
    }

    /// Check settings that refer to files under `workspace_root`.
    pub fn validate_paths(&self, workspace_root: &Path) -> Result<(), ConfigError> {
        if !self.index.expand_synonyms {
            return Ok(());
        }
        match self.synonyms_file(workspace_root) {
            Some(path) if !path.is_file() => Err(ConfigError::MissingSynonymsFile { path }),
            _ => Ok(()),
        }
    }

    /// Effective cache directory for a workspace.
    pub fn cache_dir(&self, workspace_root: &Path) -> PathBuf {
        resolve(workspace_root, &self.cache.dir)
    }

    /// Effective data directory for a workspace.
    pub fn data_dir(&self, workspace_root: &Path) -> PathBuf {
        resolve(workspace_root, &self.sources.data_dir)
    }

    /// Effective synonym table path, if one is configured.
    pub fn synonyms_file(&self, workspace_root: &Path) -> Option<PathBuf> {
        self.index
            .synonyms_file
            .as_deref()
            .map(|path| resolve(workspace_root, path))
    }

    pub fn lazy_threshold_bytes(&self) -> u64 {
        self.loader.lazy_threshold_mb.saturating_mul(MB)
    }

    pub fn stream_threshold_bytes(&self) -> u64 {
        self.loader.stream_threshold_mb.saturating_mul(MB)
    }

    pub fn max_memory_bytes(&self) -> usize {
        usize::try_from(self.cache.max_memory_mb.saturating_mul(MB)).unwrap_or(usize::MAX)
    }

    pub fn max_disk_bytes(&self) -> u64 {
        self.cache.max_disk_mb.saturating_mul(MB)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = CausewayConfig::default();
        assert!(config.cache.enabled);
        assert_eq!(config.cache.dir, PathBuf::from(".causeway/cache"));
        assert_eq!(config.cache.max_items, 16);
        assert_eq!(config.loader.lazy_threshold_mb, 50);
        assert_eq!(config.loader.stream_threshold_mb, 100);
        assert!(!config.index.expand_synonyms);
        assert_eq!(config.sources.file_template, "{name}.json");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_apply_overrides() {
        let mut config = CausewayConfig::default();
        let overrides = ConfigOverrides {
            cache_dir: Some(PathBuf::from("/custom/cache")),
            cache_enabled: Some(false),
            chunk_size: Some(50),
            log_level: Some("debug".to_string()),
            ..Default::default()
        };

        config.apply_overrides(&overrides);

        assert_eq!(config.cache.dir, PathBuf::from("/custom/cache"));
        assert!(!config.cache.enabled);
        assert_eq!(config.loader.chunk_size, 50);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_dir_resolution() {
        let mut config = CausewayConfig::default();
        let workspace = PathBuf::from("/home/user/project");

        assert_eq!(
            config.cache_dir(&workspace),
            PathBuf::from("/home/user/project/.causeway/cache")
        );
        assert_eq!(config.data_dir(&workspace), PathBuf::from("/home/user/project/."));

        config.cache.dir = PathBuf::from("/var/cache/causeway");
        assert_eq!(config.cache_dir(&workspace), PathBuf::from("/var/cache/causeway"));
        assert_eq!(config.synonyms_file(&workspace), None);
    }

    #[test]
    fn test_byte_conversions() {
        let config = CausewayConfig::default();
        assert_eq!(config.lazy_threshold_bytes(), 50 * 1024 * 1024);
        assert_eq!(config.stream_threshold_bytes(), 100 * 1024 * 1024);
        assert_eq!(config.max_disk_bytes(), 4096 * 1024 * 1024);
    }

    #[test]
    fn test_validate_thresholds() {
        let mut config = CausewayConfig::default();
        config.loader.stream_threshold_mb = 10;
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ThresholdOrder {
                lazy_mb: 50,
                stream_mb: 10
            }
        ));
        assert!(err.to_string().contains("stream_threshold_mb"));
    }

    #[test]
    fn test_validate_file_template() {
        let mut config = CausewayConfig::default();
        config.sources.file_template = "{name}_degree_{degree}.json".to_string();
        assert!(config.validate().is_ok());

        config.sources.file_template = "asthma.json".to_string();
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::TemplateWithoutName { .. }
        ));

        config.sources.file_template = String::new();
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::TemplateWithoutName { .. }
        ));

        config.sources.file_template = "{name}_{year}.json".to_string();
        match config.validate().unwrap_err() {
            ConfigError::UnknownPlaceholder { placeholder, .. } => assert_eq!(placeholder, "year"),
            other => panic!("expected unknown placeholder, got {:?}", other),
        }

        config.sources.file_template = "{name.json".to_string();
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }

    #[test]
    fn test_validate_paths_requires_synonyms_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut config = CausewayConfig::default();
        config.index.synonyms_file = Some(PathBuf::from("synonyms.toml"));

        // Unused while expansion is off
        assert!(config.validate_paths(temp.path()).is_ok());

        config.index.expand_synonyms = true;
        match config.validate_paths(temp.path()).unwrap_err() {
            ConfigError::MissingSynonymsFile { path } => {
                assert_eq!(path, temp.path().join("synonyms.toml"))
            }
            other => panic!("expected missing synonyms file, got {:?}", other),
        }

        std::fs::write(temp.path().join("synonyms.toml"), "").unwrap();
        assert!(config.validate_paths(temp.path()).is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        let mut config = CausewayConfig::default();
        config.loader.chunk_size = 0;
        assert!(config.validate().is_err());

        let mut config = CausewayConfig::default();
        config.cache.max_items = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_compression_level() {
        let mut config = CausewayConfig::default();
        config.cache.compression_level = 30;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cache.compression_level"));

        config.cache.compression_level = 0;
        config.loader.snapshot_compression_level = -1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: CausewayConfig = toml::from_str(
            r#"
            [loader]
            chunk_size = 250

            [sources.named]
            asthma = "data/asthma.json"
            "#,
        )
        .unwrap();

        assert_eq!(config.loader.chunk_size, 250);
        assert_eq!(config.loader.lazy_threshold_mb, 50);
        assert_eq!(
            config.sources.named.get("asthma"),
            Some(&PathBuf::from("data/asthma.json"))
        );
        assert!(config.cache.enabled);
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let mut config = CausewayConfig::default();
        config.index.expand_synonyms = true;
        config.logging.format = LogFormat::Json;
        config
            .sources
            .named
            .insert("copd".to_string(), PathBuf::from("copd.json"));

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: CausewayConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }
}
