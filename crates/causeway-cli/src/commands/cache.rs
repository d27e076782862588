//! Cache command - Inspect and maintain the record set cache
//!
//! Operates on the disk tier in the configured cache directory. Maintenance works
//! even when `cache.enabled` is false so stale data can still be cleared.

use std::path::PathBuf;

use anyhow::Result;
use causeway_core::cache::PruneReport;
use causeway_core::{CacheManager, CacheSettings, Compression, LoadedData};
use clap::Subcommand;
use serde::Serialize;

use super::{format_bytes, print_info, print_json, Workspace};

/// Cache management commands
#[derive(Subcommand, Debug)]
pub enum CacheCommand {
    /// Show cache location, usage and limits
    Stats,

    /// Remove every cached record set
    Clear,

    /// Drop stale, orphaned and half-written cache files
    Prune,
}

/// Cache usage and limits
#[derive(Debug, Clone, Serialize)]
pub struct CacheReport {
    pub enabled: bool,
    pub dir: PathBuf,
    pub exists: bool,
    pub disk_files: usize,
    pub disk_bytes: u64,
    pub max_disk_bytes: u64,
    pub max_items: usize,
    pub max_memory_bytes: usize,
    pub compression_level: i32,
}

/// Open the disk tier regardless of `cache.enabled`
fn open_for_maintenance(workspace: &Workspace) -> CacheManager<LoadedData> {
    let config = &workspace.config;
    let mut settings = CacheSettings::default()
        .with_dir(workspace.cache_dir())
        .with_max_items(config.cache.max_items)
        .with_max_memory_bytes(config.max_memory_bytes())
        .with_max_disk_bytes(config.max_disk_bytes());
    settings.compression = Compression::from_level(config.cache.compression_level);
    CacheManager::new(settings)
}

/// Collect usage for the workspace's cache directory
pub fn report(workspace: &Workspace) -> CacheReport {
    let config = &workspace.config;
    let dir = workspace.cache_dir();
    let exists = dir.is_dir();

    // Opening the tier would create the directory
    let (disk_files, disk_bytes) = if exists {
        let cache = open_for_maintenance(workspace);
        let stats = cache.stats();
        cache.close();
        (stats.disk_files, stats.disk_bytes)
    } else {
        (0, 0)
    };

    CacheReport {
        enabled: config.cache.enabled,
        dir,
        exists,
        disk_files,
        disk_bytes,
        max_disk_bytes: config.max_disk_bytes(),
        max_items: config.cache.max_items,
        max_memory_bytes: config.max_memory_bytes(),
        compression_level: config.cache.compression_level,
    }
}

/// Execute the cache command
pub fn execute(cmd: CacheCommand, workspace: &Workspace) -> Result<()> {
    match cmd {
        CacheCommand::Stats => execute_stats(workspace),
        CacheCommand::Clear => execute_clear(workspace),
        CacheCommand::Prune => execute_prune(workspace),
    }
}

fn execute_stats(workspace: &Workspace) -> Result<()> {
    let report = report(workspace);

    if workspace.global.json {
        return print_json(&report);
    }

    println!("Cache");
    println!("=====\n");
    println!(
        "Directory: {}{}",
        report.dir.display(),
        if report.exists { "" } else { " (not created)" }
    );
    println!("Enabled:   {}", report.enabled);
    println!(
        "Disk:      {} entries, {} of {}",
        report.disk_files,
        format_bytes(report.disk_bytes),
        format_bytes(report.max_disk_bytes)
    );
    println!(
        "Memory:    up to {} record sets, {}",
        report.max_items,
        format_bytes(report.max_memory_bytes as u64)
    );
    if report.compression_level > 0 {
        println!("Compression: zstd level {}", report.compression_level);
    } else {
        println!("Compression: none");
    }
    Ok(())
}

/// Remove every cached entry; returns how many were removed
pub fn clear(workspace: &Workspace) -> usize {
    if !workspace.cache_dir().is_dir() {
        return 0;
    }
    let cache = open_for_maintenance(workspace);
    let removed = cache.clear();
    cache.close();
    removed
}

fn execute_clear(workspace: &Workspace) -> Result<()> {
    let removed = clear(workspace);

    if workspace.global.json {
        return print_json(&serde_json::json!({ "removed": removed }));
    }
    print_info(
        &format!("Removed {} cached record set(s)", removed),
        workspace.quiet(),
    );
    Ok(())
}

/// Run a maintenance sweep over the disk tier
pub fn prune(workspace: &Workspace) -> PruneReport {
    if !workspace.cache_dir().is_dir() {
        return PruneReport::default();
    }
    let cache = open_for_maintenance(workspace);
    let report = cache.prune().unwrap_or_default();
    cache.close();
    report
}

fn execute_prune(workspace: &Workspace) -> Result<()> {
    let report = prune(workspace);

    if workspace.global.json {
        return print_json(&report);
    }

    println!(
        "Pruned {} cache entries ({} freed)",
        report.total_removed(),
        format_bytes(report.bytes_freed)
    );
    if report.total_removed() > 0 {
        println!("  stale:   {}", report.stale_entries);
        println!("  missing: {}", report.missing_files);
        println!("  orphans: {}", report.orphan_files);
        println!("  temp:    {}", report.temp_files);
    }
    Ok(())
}
