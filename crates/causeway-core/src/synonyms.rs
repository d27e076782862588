//! Synonym Table
//!
//! Groups of names that refer to the same concept, used by the edge index to insert
//! additional lookup keys. The table is data: a TOML document of `[[group]]` entries.
//!
//! ```toml
//! [[group]]
//! name = "hypertension"
//! terms = ["hypertension", "high blood pressure", "HTN"]
//! ```
//!
//! A built-in table is embedded from `data/synonyms.toml`.

use crate::index::normalize_name;
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

const BUILTIN_SYNONYMS: &str = include_str!("../data/synonyms.toml");

static BUILTIN_TABLE: Lazy<Arc<SynonymTable>> = Lazy::new(|| {
    match SynonymTable::from_toml_str(BUILTIN_SYNONYMS) {
        Ok(table) => Arc::new(table),
        Err(e) => {
            warn!("Built-in synonym table is invalid: {}", e);
            Arc::new(SynonymTable::default())
        }
    }
});

#[derive(Debug, Error)]
pub enum SynonymError {
    #[error("Failed to read synonym file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse synonym table: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Deserialize)]
struct SynonymFile {
    #[serde(default, rename = "group")]
    groups: Vec<GroupDef>,
}

#[derive(Debug, Deserialize)]
struct GroupDef {
    #[serde(default)]
    name: Option<String>,
    terms: Vec<String>,
}

/// One group of equivalent normalized terms
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynonymGroup {
    pub name: String,
    pub terms: Vec<String>,
}

/// Normalized term → group lookup
#[derive(Debug, Clone, Default)]
pub struct SynonymTable {
    groups: Vec<SynonymGroup>,
    term_to_group: HashMap<String, usize>,
}

impl SynonymTable {
    /// Shared handle to the embedded table
    pub fn builtin() -> Arc<Self> {
        Arc::clone(&BUILTIN_TABLE)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, SynonymError> {
        let file: SynonymFile = toml::from_str(text)?;
        Ok(Self::from_groups(file.groups.into_iter().enumerate().map(
            |(i, group)| {
                (
                    group.name.unwrap_or_else(|| format!("group_{}", i)),
                    group.terms,
                )
            },
        )))
    }

    pub fn from_file(path: &Path) -> Result<Self, SynonymError> {
        let text = std::fs::read_to_string(path).map_err(|source| SynonymError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let table = Self::from_toml_str(&text)?;
        debug!(
            "Loaded {} synonym groups from {:?}",
            table.group_count(),
            path
        );
        Ok(table)
    }

    /// Build from `(name, terms)` pairs.
    ///
    /// A term listed in several groups belongs to the first one.
    pub fn from_groups<I, S>(groups: I) -> Self
    where
        I: IntoIterator<Item = (String, Vec<S>)>,
        S: AsRef<str>,
    {
        let mut table = Self::default();
        for (name, terms) in groups {
            let index = table.groups.len();
            let mut normalized = Vec::new();
            for term in terms {
                let term = normalize_name(term.as_ref());
                if term.is_empty() || normalized.contains(&term) {
                    continue;
                }
                if let Some(&existing) = table.term_to_group.get(&term) {
                    debug!(
                        "Synonym '{}' already in group '{}', ignoring in '{}'",
                        term, table.groups[existing].name, name
                    );
                    continue;
                }
                table.term_to_group.insert(term.clone(), index);
                normalized.push(term);
            }
            if normalized.len() > 1 {
                table.groups.push(SynonymGroup {
                    name,
                    terms: normalized,
                });
            } else {
                // Single-term groups add nothing
                for term in &normalized {
                    table.term_to_group.remove(term);
                }
            }
        }
        table
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn term_count(&self) -> usize {
        self.term_to_group.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn groups(&self) -> &[SynonymGroup] {
        &self.groups
    }

    /// Group containing a normalized term
    pub fn group_of(&self, normalized: &str) -> Option<&SynonymGroup> {
        self.term_to_group
            .get(normalized)
            .map(|&index| &self.groups[index])
    }

    /// Other terms equivalent to a normalized term
    pub fn synonyms_of<'a>(&'a self, normalized: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.group_of(normalized)
            .into_iter()
            .flat_map(|group| group.terms.iter())
            .map(String::as_str)
            .filter(move |term| *term != normalized)
    }

    /// The term itself followed by its synonyms
    pub fn variants_of<'a>(&'a self, normalized: &'a str) -> Vec<&'a str> {
        std::iter::once(normalized)
            .chain(self.synonyms_of(normalized))
            .collect()
    }
}
