//! Cache command - Inspect or clear the content cache

use std::path::Path;

use anyhow::{Context, Result};
use clap::Subcommand;
use tracing::info;

use super::CliContext;
use crate::output::{format_bytes, plural};

#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// Show cache usage against its budget
    Usage,
    /// Drop all cached content, in memory and on disk
    Clear,
}

impl CacheCommand {
    pub async fn execute(&self, context: &CliContext) -> Result<()> {
        let formatter = context.formatter();
        let Some(engine) = context.open_engine(&*formatter).await? else {
            return Ok(());
        };
        let vault = engine.vault();
        let cache_dir = engine.config().cache.dir.clone();

        match self {
            CacheCommand::Usage => {
                let status = vault.status().await.context("Failed to read cache usage")?;
                if context.is_json() {
                    formatter.print_json(&serde_json::json!({
                        "dir": cache_dir.display().to_string(),
                        "disk_bytes": status.cache_disk_bytes,
                        "max_bytes": status.cache_max_bytes,
                        "memory_bytes": status.cache_used_bytes,
                        "memory_ranges": status.cache_entries,
                    }));
                } else {
                    formatter.success(&disk_line(
                        status.cache_disk_bytes,
                        status.cache_max_bytes,
                        &cache_dir,
                    ));
                    formatter.info(&memory_line(
                        status.cache_used_bytes,
                        status.cache_max_bytes,
                        status.cache_entries,
                    ));
                }
            }
            CacheCommand::Clear => {
                vault.clear_cache().context("Failed to clear content cache")?;
                info!(dir = %cache_dir.display(), "Cache cleared from CLI");

                if context.is_json() {
                    formatter.print_json(&serde_json::json!({
                        "success": true,
                        "dir": cache_dir.display().to_string(),
                    }));
                } else {
                    formatter.success("Content cache cleared");
                }
            }
        }

        engine.shutdown().await;
        Ok(())
    }
}

fn percent(bytes: u64, max_bytes: u64) -> f64 {
    if max_bytes == 0 {
        0.0
    } else {
        bytes as f64 / max_bytes as f64 * 100.0
    }
}

/// Headline, led by the on-disk mirror
fn disk_line(disk_bytes: Option<u64>, max_bytes: u64, dir: &Path) -> String {
    match disk_bytes {
        Some(bytes) => format!(
            "Cache: {} of {} on disk ({:.1}%) in {}",
            format_bytes(bytes),
            format_bytes(max_bytes),
            percent(bytes, max_bytes),
            dir.display()
        ),
        None => format!(
            "Cache: persistence disabled, budget {}",
            format_bytes(max_bytes)
        ),
    }
}

fn memory_line(used_bytes: u64, max_bytes: u64, ranges: usize) -> String {
    format!(
        "In memory: {} ({:.1}%) in {} cached range{}",
        format_bytes(used_bytes),
        percent(used_bytes, max_bytes),
        ranges,
        plural(ranges)
    )
}
