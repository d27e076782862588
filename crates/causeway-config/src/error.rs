//! Errors raised while reading, merging and checking Causeway settings.

use std::path::PathBuf;
use thiserror::Error;

/// A settings file that could not be used, or settings that cannot drive a load.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read settings from '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("settings file '{path}' is not valid TOML: {source}")]
    ParseToml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("cannot render settings as TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("cannot write settings to '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot create settings directory '{path}': {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No home directory to hold `~/.causeway`
    #[error("no home directory for the global ~/.causeway settings")]
    NoHomeDir,

    /// Strategy thresholds would make the lazy band empty or negative
    #[error(
        "loader.stream_threshold_mb ({stream_mb}) must not be below \
         loader.lazy_threshold_mb ({lazy_mb})"
    )]
    ThresholdOrder { lazy_mb: u64, stream_mb: u64 },

    /// Every identity would resolve to the same file
    #[error("sources.file_template '{template}' does not contain {{name}}")]
    TemplateWithoutName { template: String },

    /// Only `{name}` and `{degree}` are substituted
    #[error("sources.file_template '{template}' uses unknown placeholder {{{placeholder}}}")]
    UnknownPlaceholder { template: String, placeholder: String },

    /// Synonym expansion is on but its table file is absent
    #[error("index.synonyms_file '{path}' does not exist")]
    MissingSynonymsFile { path: PathBuf },

    #[error("invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

impl ConfigError {
    pub fn read_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ReadFile {
            path: path.into(),
            source,
        }
    }

    pub fn parse_toml(path: impl Into<PathBuf>, source: toml::de::Error) -> Self {
        Self::ParseToml {
            path: path.into(),
            source,
        }
    }

    pub fn write_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::WriteFile {
            path: path.into(),
            source,
        }
    }

    pub fn create_dir(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::CreateDir {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_value(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            message: message.into(),
        }
    }
}
