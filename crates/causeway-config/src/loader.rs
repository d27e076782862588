//! Configuration loader with inheritance support.
//!
//! Loads configuration from multiple sources and merges them:
//! 1. Global config: `~/.causeway/config.toml`
//! 2. Local config: `.causeway/config.toml` (in workspace)
//! 3. Explicit config file (`--config`)
//! 4. CLI overrides
//!
//! Later sources override earlier ones. A field in a later file only wins when it
//! differs from the default, so partial files never reset values set earlier.

use crate::error::ConfigError;
use crate::{
    CacheConfig, CausewayConfig, ConfigOverrides, IndexConfig, LoaderConfig, LoggingConfig,
    SourcesConfig,
};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Global configuration directory name.
const GLOBAL_CONFIG_DIR: &str = ".causeway";

/// Local configuration directory name.
const LOCAL_CONFIG_DIR: &str = ".causeway";

/// Configuration loader with caching and inheritance support.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Global config directory (e.g., `~/.causeway`)
    global_config_dir: Option<PathBuf>,

    /// Cached global config
    global_config: Option<CausewayConfig>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a new configuration loader.
    ///
    /// Automatically detects the global config directory (`~/.causeway`).
    pub fn new() -> Self {
        let global_config_dir = dirs::home_dir().map(|h| h.join(GLOBAL_CONFIG_DIR));

        Self {
            global_config_dir,
            global_config: None,
        }
    }

    /// Create a loader with a custom global config directory.
    ///
    /// Useful for testing.
    pub fn with_global_dir(global_dir: impl Into<PathBuf>) -> Self {
        Self {
            global_config_dir: Some(global_dir.into()),
            global_config: None,
        }
    }

    /// Get the global config file path.
    pub fn global_config_path(&self) -> Option<PathBuf> {
        self.global_config_dir
            .as_ref()
            .map(|d| d.join(CONFIG_FILE_NAME))
    }

    /// Get the local config file path for a workspace.
    pub fn local_config_path(&self, workspace_root: &Path) -> PathBuf {
        workspace_root.join(LOCAL_CONFIG_DIR).join(CONFIG_FILE_NAME)
    }

    /// Load configuration for a workspace with optional CLI overrides.
    ///
    /// Merges config in order: global → local → overrides.
    pub fn load(
        &mut self,
        workspace_root: &Path,
        overrides: Option<&ConfigOverrides>,
    ) -> Result<CausewayConfig, ConfigError> {
        self.load_with_file(workspace_root, None, overrides)
    }

    /// Like [`load`](Self::load), with an explicit config file merged after the local one.
    ///
    /// The explicit file must exist.
    pub fn load_with_file(
        &mut self,
        workspace_root: &Path,
        config_file: Option<&Path>,
        overrides: Option<&ConfigOverrides>,
    ) -> Result<CausewayConfig, ConfigError> {
        let mut config = CausewayConfig::default();

        if let Some(global_config) = self.load_global()? {
            config = merge_configs(config, global_config);
        }

        if let Some(local_config) = self.load_local(workspace_root)? {
            config = merge_configs(config, local_config);
        }

        if let Some(path) = config_file {
            debug!("Loading config from {:?}", path);
            config = merge_configs(config, load_config_file(path)?);
        }

        if let Some(ovr) = overrides {
            config.apply_overrides(ovr);
        }

        config.validate()?;
        config.validate_paths(workspace_root)?;
        Ok(config)
    }

    /// Load only the global configuration.
    pub fn load_global(&mut self) -> Result<Option<CausewayConfig>, ConfigError> {
        if let Some(ref config) = self.global_config {
            return Ok(Some(config.clone()));
        }

        let Some(global_path) = self.global_config_path() else {
            debug!("No home directory found, skipping global config");
            return Ok(None);
        };

        if !global_path.exists() {
            trace!("Global config not found at {:?}", global_path);
            return Ok(None);
        }

        debug!("Loading global config from {:?}", global_path);
        let config = load_config_file(&global_path)?;

        self.global_config = Some(config.clone());

        Ok(Some(config))
    }

    /// Load only the local configuration for a workspace.
    pub fn load_local(&self, workspace_root: &Path) -> Result<Option<CausewayConfig>, ConfigError> {
        let local_path = self.local_config_path(workspace_root);

        if !local_path.exists() {
            trace!("Local config not found at {:?}", local_path);
            return Ok(None);
        }

        debug!("Loading local config from {:?}", local_path);
        load_config_file(&local_path).map(Some)
    }

    /// Save configuration to the global config file.
    pub fn save_global(&self, config: &CausewayConfig) -> Result<(), ConfigError> {
        let Some(ref global_dir) = self.global_config_dir else {
            return Err(ConfigError::NoHomeDir);
        };

        save_config_file(&global_dir.join(CONFIG_FILE_NAME), config)
    }

    /// Save configuration to the local config file for a workspace.
    pub fn save_local(
        &self,
        workspace_root: &Path,
        config: &CausewayConfig,
    ) -> Result<(), ConfigError> {
        save_config_file(&self.local_config_path(workspace_root), config)
    }

    /// Initialize global configuration directory.
    ///
    /// Creates `~/.causeway/config.toml` with default configuration.
    pub fn init_global(&self) -> Result<PathBuf, ConfigError> {
        let Some(ref global_dir) = self.global_config_dir else {
            return Err(ConfigError::NoHomeDir);
        };
        init_config_dir(global_dir)
    }

    /// Initialize local configuration for a workspace.
    ///
    /// Creates `.causeway/config.toml` with default configuration.
    pub fn init_local(&self, workspace_root: &Path) -> Result<PathBuf, ConfigError> {
        init_config_dir(&workspace_root.join(LOCAL_CONFIG_DIR))
    }

    /// Clear cached global configuration.
    ///
    /// Forces reload on next `load_global()` call.
    pub fn clear_cache(&mut self) {
        self.global_config = None;
    }
}

/// Create `dir/config.toml` with defaults unless it already exists
fn init_config_dir(dir: &Path) -> Result<PathBuf, ConfigError> {
    if !dir.exists() {
        std::fs::create_dir_all(dir).map_err(|e| ConfigError::create_dir(dir, e))?;
    }

    let config_path = dir.join(CONFIG_FILE_NAME);
    if !config_path.exists() {
        save_config_file(&config_path, &CausewayConfig::default())?;
    }

    Ok(config_path)
}

/// Load a configuration file from disk.
fn load_config_file(path: &Path) -> Result<CausewayConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;

    toml::from_str(&content).map_err(|e| ConfigError::parse_toml(path, e))
}

/// Save a configuration file to disk.
fn save_config_file(path: &Path, config: &CausewayConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::create_dir(parent, e))?;
        }
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|e| ConfigError::write_file(path, e))
}

/// Pick `overlay` when it differs from the default, otherwise keep `base`
fn pick<T: PartialEq>(base: T, overlay: T, default: T) -> T {
    if overlay != default {
        overlay
    } else {
        base
    }
}

/// Merge two configurations, with `overlay` taking precedence.
///
/// This performs a field-by-field merge, allowing partial configs.
fn merge_configs(base: CausewayConfig, overlay: CausewayConfig) -> CausewayConfig {
    CausewayConfig {
        cache: merge_cache(base.cache, overlay.cache),
        loader: merge_loader(base.loader, overlay.loader),
        index: merge_index(base.index, overlay.index),
        sources: merge_sources(base.sources, overlay.sources),
        logging: merge_logging(base.logging, overlay.logging),
    }
}

fn merge_cache(base: CacheConfig, overlay: CacheConfig) -> CacheConfig {
    let d = CacheConfig::default();
    CacheConfig {
        enabled: pick(base.enabled, overlay.enabled, d.enabled),
        dir: pick(base.dir, overlay.dir, d.dir),
        max_items: pick(base.max_items, overlay.max_items, d.max_items),
        max_memory_mb: pick(base.max_memory_mb, overlay.max_memory_mb, d.max_memory_mb),
        max_disk_mb: pick(base.max_disk_mb, overlay.max_disk_mb, d.max_disk_mb),
        persist_to_disk: pick(base.persist_to_disk, overlay.persist_to_disk, d.persist_to_disk),
        compression_level: pick(
            base.compression_level,
            overlay.compression_level,
            d.compression_level,
        ),
    }
}

fn merge_loader(base: LoaderConfig, overlay: LoaderConfig) -> LoaderConfig {
    let d = LoaderConfig::default();
    LoaderConfig {
        lazy_threshold_mb: pick(
            base.lazy_threshold_mb,
            overlay.lazy_threshold_mb,
            d.lazy_threshold_mb,
        ),
        stream_threshold_mb: pick(
            base.stream_threshold_mb,
            overlay.stream_threshold_mb,
            d.stream_threshold_mb,
        ),
        chunk_size: pick(base.chunk_size, overlay.chunk_size, d.chunk_size),
        prefer_snapshot: pick(base.prefer_snapshot, overlay.prefer_snapshot, d.prefer_snapshot),
        snapshot_compression_level: pick(
            base.snapshot_compression_level,
            overlay.snapshot_compression_level,
            d.snapshot_compression_level,
        ),
    }
}

fn merge_index(base: IndexConfig, overlay: IndexConfig) -> IndexConfig {
    IndexConfig {
        expand_synonyms: base.expand_synonyms || overlay.expand_synonyms,
        synonyms_file: overlay.synonyms_file.or(base.synonyms_file),
    }
}

/// Merge sources config; named entries from both sides are kept, overlay wins per key.
fn merge_sources(base: SourcesConfig, overlay: SourcesConfig) -> SourcesConfig {
    let d = SourcesConfig::default();
    SourcesConfig {
        data_dir: pick(base.data_dir, overlay.data_dir, d.data_dir),
        file_template: pick(base.file_template, overlay.file_template, d.file_template),
        named: {
            let mut named = base.named;
            named.extend(overlay.named);
            named
        },
    }
}

fn merge_logging(base: LoggingConfig, overlay: LoggingConfig) -> LoggingConfig {
    let d = LoggingConfig::default();
    LoggingConfig {
        level: pick(base.level, overlay.level, d.level),
        format: pick(base.format, overlay.format, d.format),
        file: overlay.file.or(base.file),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn create_test_config(content: &str, dir: &Path) -> PathBuf {
        let config_dir = dir.join(".causeway");
        std::fs::create_dir_all(&config_dir).unwrap();
        let path = config_dir.join("config.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    fn write_global(global_dir: &Path, content: &str) {
        std::fs::create_dir_all(global_dir).unwrap();
        std::fs::write(global_dir.join("config.toml"), content).unwrap();
    }

    #[test]
    fn test_load_default_config() {
        let temp = TempDir::new().unwrap();
        let mut loader = ConfigLoader::with_global_dir(temp.path().join("global"));

        let config = loader.load(temp.path(), None).unwrap();
        assert_eq!(config, CausewayConfig::default());
    }

    #[test]
    fn test_load_local_config() {
        let temp = TempDir::new().unwrap();
        let mut loader = ConfigLoader::with_global_dir(temp.path().join("global"));

        create_test_config(
            r#"
            [cache]
            dir = ".custom-cache"

            [loader]
            lazy_threshold_mb = 20
            "#,
            temp.path(),
        );

        let config = loader.load(temp.path(), None).unwrap();

        assert_eq!(config.cache.dir, PathBuf::from(".custom-cache"));
        assert_eq!(config.loader.lazy_threshold_mb, 20);
        assert_eq!(config.loader.stream_threshold_mb, 100);
    }

    #[test]
    fn test_local_overrides_global() {
        let temp = TempDir::new().unwrap();
        let global_dir = temp.path().join("global");
        write_global(
            &global_dir,
            r#"
            [cache]
            enabled = false
            max_items = 4

            [logging]
            level = "debug"
            "#,
        );

        create_test_config(
            r#"
            [cache]
            max_items = 8
            "#,
            temp.path(),
        );

        let mut loader = ConfigLoader::with_global_dir(&global_dir);
        let config = loader.load(temp.path(), None).unwrap();

        assert_eq!(config.cache.max_items, 8);
        // Not mentioned locally, so the global values survive
        assert!(!config.cache.enabled);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_named_sources_merge() {
        let temp = TempDir::new().unwrap();
        let global_dir = temp.path().join("global");
        write_global(
            &global_dir,
            r#"
            [sources.named]
            asthma = "/global/asthma.json"
            copd = "/global/copd.json"
            "#,
        );
        create_test_config(
            r#"
            [sources.named]
            copd = "local/copd.json"
            "#,
            temp.path(),
        );

        let mut loader = ConfigLoader::with_global_dir(&global_dir);
        let config = loader.load(temp.path(), None).unwrap();

        assert_eq!(
            config.sources.named.get("asthma"),
            Some(&PathBuf::from("/global/asthma.json"))
        );
        assert_eq!(
            config.sources.named.get("copd"),
            Some(&PathBuf::from("local/copd.json"))
        );
    }

    #[test]
    fn test_explicit_file_and_cli_overrides() {
        let temp = TempDir::new().unwrap();
        create_test_config(
            r#"
            [loader]
            chunk_size = 200
            "#,
            temp.path(),
        );
        let explicit = temp.path().join("explicit.toml");
        std::fs::write(
            &explicit,
            r#"
            [loader]
            chunk_size = 300

            [index]
            expand_synonyms = true
            "#,
        )
        .unwrap();

        let mut loader = ConfigLoader::with_global_dir(temp.path().join("global"));
        let overrides = ConfigOverrides {
            log_level: Some("trace".to_string()),
            ..Default::default()
        };
        let config = loader
            .load_with_file(temp.path(), Some(&explicit), Some(&overrides))
            .unwrap();

        assert_eq!(config.loader.chunk_size, 300);
        assert!(config.index.expand_synonyms);
        assert_eq!(config.logging.level, "trace");

        let overrides = ConfigOverrides {
            chunk_size: Some(7),
            ..Default::default()
        };
        let config = loader
            .load_with_file(temp.path(), Some(&explicit), Some(&overrides))
            .unwrap();
        assert_eq!(config.loader.chunk_size, 7);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let temp = TempDir::new().unwrap();
        let mut loader = ConfigLoader::with_global_dir(temp.path().join("global"));
        let err = loader
            .load_with_file(temp.path(), Some(&temp.path().join("nope.toml")), None)
            .unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_invalid_merged_config_is_rejected() {
        let temp = TempDir::new().unwrap();
        create_test_config(
            r#"
            [loader]
            lazy_threshold_mb = 500
            "#,
            temp.path(),
        );

        let mut loader = ConfigLoader::with_global_dir(temp.path().join("global"));
        let err = loader.load(temp.path(), None).unwrap_err();
        assert!(matches!(err, ConfigError::ThresholdOrder { .. }));
    }

    #[test]
    fn test_missing_synonyms_file_is_rejected() {
        let temp = TempDir::new().unwrap();
        create_test_config(
            r#"
            [index]
            expand_synonyms = true
            synonyms_file = "tables/synonyms.toml"
            "#,
            temp.path(),
        );

        let mut loader = ConfigLoader::with_global_dir(temp.path().join("global"));
        match loader.load(temp.path(), None) {
            Err(ConfigError::MissingSynonymsFile { path }) => {
                assert_eq!(path, temp.path().join("tables/synonyms.toml"))
            }
            other => panic!("expected missing synonyms file, got {:?}", other),
        }

        std::fs::create_dir_all(temp.path().join("tables")).unwrap();
        std::fs::write(temp.path().join("tables/synonyms.toml"), "").unwrap();
        let config = loader.load(temp.path(), None).unwrap();
        assert!(config.index.expand_synonyms);
    }

    #[test]
    fn test_parse_error_names_file() {
        let temp = TempDir::new().unwrap();
        let path = create_test_config("[cache\nenabled = ", temp.path());

        let mut loader = ConfigLoader::with_global_dir(temp.path().join("global"));
        match loader.load(temp.path(), None) {
            Err(ConfigError::ParseToml { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_save_and_load_config() {
        let temp = TempDir::new().unwrap();
        let loader = ConfigLoader::with_global_dir(temp.path().join("global"));

        let mut config = CausewayConfig::default();
        config.cache.max_disk_mb = 512;
        config.logging.level = "warn".to_string();

        loader.save_local(temp.path(), &config).unwrap();

        let mut loader = ConfigLoader::with_global_dir(temp.path().join("global"));
        let loaded = loader.load(temp.path(), None).unwrap();

        assert_eq!(loaded.cache.max_disk_mb, 512);
        assert_eq!(loaded.logging.level, "warn");
    }

    #[test]
    fn test_init_local_creates_config() {
        let temp = TempDir::new().unwrap();
        let loader = ConfigLoader::with_global_dir(temp.path().join("global"));

        let config_path = loader.init_local(temp.path()).unwrap();

        assert!(config_path.exists());
        assert!(config_path.ends_with(".causeway/config.toml"));

        let content = std::fs::read_to_string(&config_path).unwrap();
        let parsed: CausewayConfig = toml::from_str(&content).unwrap();
        assert_eq!(parsed, CausewayConfig::default());
    }

    #[test]
    fn test_init_global_keeps_existing_file() {
        let temp = TempDir::new().unwrap();
        let global_dir = temp.path().join("global");
        write_global(&global_dir, "[logging]\nlevel = \"error\"\n");

        let loader = ConfigLoader::with_global_dir(&global_dir);
        let path = loader.init_global().unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.contains("error"));
    }

    #[test]
    fn test_cache_clearing() {
        let temp = TempDir::new().unwrap();
        let global_dir = temp.path().join("global");
        write_global(&global_dir, "[logging]\nlevel = \"debug\"\n");

        let mut loader = ConfigLoader::with_global_dir(&global_dir);

        let _ = loader.load_global().unwrap();
        assert!(loader.global_config.is_some());

        loader.clear_cache();
        assert!(loader.global_config.is_none());
    }
}
