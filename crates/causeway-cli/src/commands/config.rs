//! Config command - View and manage configuration
//!
//! Provides commands for viewing and initializing Causeway configuration:
//! - Show the effective configuration with the source of every value
//! - Create default global or local configuration files
//! - Show configuration file paths

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use causeway_config::{CausewayConfig, ConfigLoader};
use clap::Subcommand;
use serde::Serialize;
use serde_json::Value;

use super::{load_config, print_json};
use crate::GlobalOptions;

/// Config management commands
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show the effective configuration with value sources
    Show(ShowArgs),

    /// Create a default configuration file
    Init(InitArgs),

    /// Show configuration file paths
    Path,
}

/// Arguments for the show command
#[derive(clap::Args, Debug)]
pub struct ShowArgs {
    /// Show only effective values (hide sources)
    #[arg(long)]
    effective: bool,
}

/// Arguments for the init command
#[derive(clap::Args, Debug)]
pub struct InitArgs {
    /// Create ~/.causeway/config.toml instead of the workspace file
    #[arg(long)]
    global: bool,

    /// Overwrite an existing file with defaults
    #[arg(long)]
    force: bool,
}

/// Configuration value with source information
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue {
    /// Configuration key
    pub key: String,
    /// Current value
    pub value: Value,
    /// Source of this value (default, global, local, override)
    pub source: String,
}

/// Configuration paths
#[derive(Debug, Clone, Serialize)]
pub struct ConfigPaths {
    /// Global config file path
    pub global: Option<PathBuf>,
    /// Local config file path
    pub local: PathBuf,
    /// File passed with --config
    pub explicit: Option<PathBuf>,
    /// Whether global config exists
    pub global_exists: bool,
    /// Whether local config exists
    pub local_exists: bool,
}

/// Execute the config command
pub fn execute(cmd: ConfigCommand, global: &GlobalOptions, workspace: &Path) -> Result<()> {
    match cmd {
        ConfigCommand::Show(args) => execute_show(args, global, workspace),
        ConfigCommand::Init(args) => execute_init(args, global, workspace),
        ConfigCommand::Path => execute_path(global, workspace),
    }
}

fn execute_show(args: ShowArgs, global: &GlobalOptions, workspace: &Path) -> Result<()> {
    let mut loader = ConfigLoader::new();

    let default_config = CausewayConfig::default();
    let global_config = loader.load_global()?.unwrap_or_default();
    let local_config = loader.load_local(workspace)?.unwrap_or_default();
    let effective = load_config(global, workspace)?;

    if args.effective && global.json {
        return print_json(&effective);
    }

    let values = collect_config_values(&default_config, &global_config, &local_config, &effective)?;
    if global.json {
        return print_json(&values);
    }

    println!("Causeway Configuration");
    println!("======================\n");
    if let Some(gp) = loader.global_config_path() {
        let status = if gp.exists() { "" } else { " (not found)" };
        println!("Global config: {}{}", gp.display(), status);
    }
    let lp = loader.local_config_path(workspace);
    let status = if lp.exists() { "" } else { " (not found)" };
    println!("Local config:  {}{}", lp.display(), status);
    if let Some(ref explicit) = global.config {
        println!("Config file:   {}", explicit.display());
    }

    let mut section = "";
    for value in &values {
        let (head, key) = value.key.split_once('.').unwrap_or(("", value.key.as_str()));
        if head != section {
            section = head;
            println!("\n[{}]", section);
        }
        if args.effective || value.source == "default" {
            println!("  {} = {}", key, value.value);
        } else {
            println!("  {} = {} ({})", key, value.value, value.source);
        }
    }

    Ok(())
}

fn execute_init(args: InitArgs, global: &GlobalOptions, workspace: &Path) -> Result<()> {
    let loader = ConfigLoader::new();

    let path = if args.global {
        let path = loader
            .global_config_path()
            .context("No home directory for the global configuration")?;
        if args.force {
            loader.save_global(&CausewayConfig::default())?;
            path
        } else {
            loader.init_global()?
        }
    } else if args.force {
        loader.save_local(workspace, &CausewayConfig::default())?;
        loader.local_config_path(workspace)
    } else {
        loader.init_local(workspace)?
    };

    if global.json {
        return print_json(&serde_json::json!({ "path": path }));
    }
    println!("Configuration file: {}", path.display());
    Ok(())
}

fn execute_path(global: &GlobalOptions, workspace: &Path) -> Result<()> {
    let loader = ConfigLoader::new();

    let global_path = loader.global_config_path();
    let local_path = loader.local_config_path(workspace);

    let paths = ConfigPaths {
        global: global_path.clone(),
        local: local_path.clone(),
        explicit: global.config.clone(),
        global_exists: global_path.as_ref().map(|p| p.exists()).unwrap_or(false),
        local_exists: local_path.exists(),
    };

    if global.json {
        return print_json(&paths);
    }

    println!("Configuration Paths");
    println!("===================\n");

    if let Some(ref gp) = paths.global {
        let status = if paths.global_exists {
            "exists"
        } else {
            "not found"
        };
        println!("Global: {} ({})", gp.display(), status);
    } else {
        println!("Global: not available (no home directory)");
    }

    let status = if paths.local_exists {
        "exists"
    } else {
        "not found"
    };
    println!("Local:  {} ({})", paths.local.display(), status);
    if let Some(ref explicit) = paths.explicit {
        println!("File:   {}", explicit.display());
    }

    Ok(())
}

/// Collect effective values with the layer each one came from
fn collect_config_values(
    default: &CausewayConfig,
    global: &CausewayConfig,
    local: &CausewayConfig,
    effective: &CausewayConfig,
) -> Result<Vec<ConfigValue>> {
    let layers = Layers {
        default: serde_json::to_value(default)?,
        global: serde_json::to_value(global)?,
        local: serde_json::to_value(local)?,
    };
    let effective = serde_json::to_value(effective)?;

    let mut values = Vec::new();
    flatten_config("", &effective, &layers, &mut values);
    Ok(values)
}

struct Layers {
    default: Value,
    global: Value,
    local: Value,
}

impl Layers {
    fn child(&self, key: &str) -> Layers {
        let get = |v: &Value| v.get(key).cloned().unwrap_or(Value::Null);
        Layers {
            default: get(&self.default),
            global: get(&self.global),
            local: get(&self.local),
        }
    }
}

/// Structured sections carry fixed keys in the defaults; free-form maps do not
fn is_section(default: &Value) -> bool {
    default.as_object().is_some_and(|map| !map.is_empty())
}

/// Recursively flatten config into key-value pairs with sources.
///
/// Map-valued settings (such as `sources.named`) are reported as one value.
fn flatten_config(prefix: &str, effective: &Value, layers: &Layers, values: &mut Vec<ConfigValue>) {
    match effective {
        Value::Object(map) if is_section(&layers.default) => {
            for (key, value) in map {
                let new_prefix = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten_config(&new_prefix, value, &layers.child(key), values);
            }
        }
        _ => push_value(prefix, effective, layers, values),
    }
}

fn push_value(key: &str, effective: &Value, layers: &Layers, values: &mut Vec<ConfigValue>) {
    let source = if *effective == layers.default {
        "default"
    } else if *effective == layers.local && layers.local != layers.default {
        "local"
    } else if *effective == layers.global && layers.global != layers.default {
        "global"
    } else {
        "override"
    };

    values.push(ConfigValue {
        key: key.to_string(),
        value: effective.clone(),
        source: source.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find<'a>(values: &'a [ConfigValue], key: &str) -> &'a ConfigValue {
        values
            .iter()
            .find(|v| v.key == key)
            .unwrap_or_else(|| panic!("missing key {}", key))
    }

    #[test]
    fn test_value_sources() {
        let default = CausewayConfig::default();

        let mut global = CausewayConfig::default();
        global.logging.level = "debug".to_string();
        global.cache.max_items = 4;

        let mut local = CausewayConfig::default();
        local.cache.max_items = 8;

        let mut effective = CausewayConfig::default();
        effective.logging.level = "debug".to_string();
        effective.cache.max_items = 8;
        effective.loader.chunk_size = 50;

        let values = collect_config_values(&default, &global, &local, &effective).unwrap();

        assert_eq!(find(&values, "logging.level").source, "global");
        assert_eq!(find(&values, "cache.max_items").source, "local");
        assert_eq!(find(&values, "loader.chunk_size").source, "override");
        assert_eq!(find(&values, "cache.enabled").source, "default");
        assert_eq!(find(&values, "loader.chunk_size").value, serde_json::json!(50));
    }

    #[test]
    fn test_named_sources_reported_as_one_value() {
        let default = CausewayConfig::default();
        let mut local = CausewayConfig::default();
        local
            .sources
            .named
            .insert("asthma".to_string(), PathBuf::from("asthma.json"));

        let values = collect_config_values(&default, &default, &local, &local).unwrap();

        let named = find(&values, "sources.named");
        assert_eq!(named.source, "local");
        assert_eq!(named.value, serde_json::json!({ "asthma": "asthma.json" }));
        assert!(values.iter().all(|v| v.key != "sources.named.asthma"));
    }

    #[test]
    fn test_config_paths_serialization() {
        let paths = ConfigPaths {
            global: Some(PathBuf::from("/home/user/.causeway/config.toml")),
            local: PathBuf::from("/project/.causeway/config.toml"),
            explicit: None,
            global_exists: true,
            local_exists: false,
        };

        let json = serde_json::to_string(&paths).unwrap();
        assert!(json.contains("\"global_exists\":true"));
        assert!(json.contains("\"local_exists\":false"));
    }

    #[test]
    fn test_config_value_serialization() {
        let value = ConfigValue {
            key: "cache.dir".to_string(),
            value: serde_json::json!(".causeway/cache"),
            source: "default".to_string(),
        };

        let json = serde_json::to_string(&value).unwrap();
        assert!(json.contains("\"key\":\"cache.dir\""));
        assert!(json.contains("\"source\":\"default\""));
    }
}
