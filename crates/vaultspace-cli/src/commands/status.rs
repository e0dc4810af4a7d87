//! Status command - Display vault status
//!
//! Provides the `vaultspace status` CLI command which:
//! 1. Shows node counts by sync state and whether a sync cursor exists
//! 2. Shows open conflicts, failed uploads and content cache usage
//! 3. Shows the details of one node when an id is given

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;
use vaultspace_core::domain::SyncState;
use vaultspace_vault::{Vault, VaultStatus};

use super::{node_json, parse_node_id, CliContext};
use crate::output::{format_bytes, plural, OutputFormatter};

#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Optional node id to show instead of the global summary
    pub id: Option<String>,
}

impl StatusCommand {
    pub async fn execute(&self, context: &CliContext) -> Result<()> {
        let formatter = context.formatter();
        let Some(engine) = context.open_engine(&*formatter).await? else {
            return Ok(());
        };
        let vault = engine.vault();

        let result = match &self.id {
            Some(id) => self.show_node(&vault, id, context, &*formatter).await,
            None => {
                let status = vault.status().await.context("Failed to read vault status")?;
                show_global(&status, engine.database_path(), context, &*formatter);
                Ok(())
            }
        };

        engine.shutdown().await;
        result
    }

    async fn show_node(
        &self,
        vault: &Vault,
        raw_id: &str,
        context: &CliContext,
        formatter: &dyn OutputFormatter,
    ) -> Result<()> {
        let id = parse_node_id(raw_id)?;
        let node = vault
            .get(&id)
            .await
            .with_context(|| format!("Failed to look up {id}"))?;
        info!(node_id = %id, state = node.sync_state().as_str(), "Showing node status");

        let conflict = if node.sync_state() == SyncState::Conflict {
            vault
                .conflicts()
                .await?
                .into_iter()
                .find(|c| c.node_id == id)
        } else {
            None
        };
        let failure = vault
            .failed_uploads()
            .await?
            .into_iter()
            .find(|u| u.node_id == id);

        if context.is_json() {
            let json = serde_json::json!({
                "node": node_json(&node),
                "conflict": conflict.as_ref().map(|c| serde_json::json!({
                    "remote_revision": c.remote.revision_tag.as_ref().map(ToString::to_string),
                    "remote_deleted": c.remote_deleted(),
                    "detected_at": c.detected_at.to_rfc3339(),
                })),
                "upload_failure": failure.as_ref().map(|u| serde_json::json!({
                    "attempts": u.attempts,
                    "last_error": u.last_error,
                    "retryable": u.retryable,
                })),
            });
            formatter.print_json(&json);
            return Ok(());
        }

        formatter.success(&format!("{} ({})", node.name(), node.sync_state().as_str()));
        formatter.info(&format!("ID:        {}", node.id()));
        formatter.info(&format!("Parent:    {}", node.parent_id()));
        if node.is_folder() {
            formatter.info("Kind:      folder");
        } else {
            formatter.info(&format!("Kind:      {}", node.mime_type()));
            formatter.info(&format!("Size:      {}", format_bytes(node.size_bytes())));
        }
        formatter.info(&format!(
            "Revision:  {}",
            node.revision_tag()
                .map(ToString::to_string)
                .unwrap_or_else(|| "none (never uploaded)".to_string())
        ));
        formatter.info(&format!(
            "Synced:    {}",
            node.last_synced_at()
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "never".to_string())
        ));
        if let Some(conflict) = conflict {
            formatter.warn(if conflict.remote_deleted() {
                "Deleted remotely while a local change was pending"
            } else {
                "Changed remotely while a local change was pending"
            });
            formatter.info(&format!(
                "Resolve with 'vaultspace conflicts resolve {} --keep <local|remote>'",
                node.id()
            ));
        }
        if let Some(failure) = failure {
            formatter.warn(&format!(
                "Upload failed {} time{}: {}",
                failure.attempts,
                plural(failure.attempts as usize),
                failure.last_error.as_deref().unwrap_or("unknown error")
            ));
        }
        Ok(())
    }
}

fn show_global(
    status: &VaultStatus,
    database: &Path,
    context: &CliContext,
    formatter: &dyn OutputFormatter,
) {
    if context.is_json() {
        let json = serde_json::json!({
            "database": database.display().to_string(),
            "total_nodes": status.total_nodes(),
            "nodes_by_state": status.nodes,
            "has_cursor": status.has_cursor,
            "open_conflicts": status.open_conflicts,
            "failed_uploads": status.failed_uploads,
            "cache": {
                "used_bytes": status.cache_used_bytes,
                "max_bytes": status.cache_max_bytes,
                "entries": status.cache_entries,
                "disk_bytes": status.cache_disk_bytes,
            },
        });
        formatter.print_json(&json);
        return;
    }

    formatter.success(&format!(
        "{} node{} mirrored",
        status.total_nodes(),
        plural(status.total_nodes() as usize)
    ));
    formatter.info("");
    for (state, count) in &status.nodes {
        formatter.info(&format!("  {:<16} {:>8}", state, count));
    }
    formatter.info("");
    formatter.info(&format!("Database:        {}", database.display()));
    formatter.info(&format!(
        "Sync cursor:     {}",
        if status.has_cursor {
            "stored (next sync is incremental)"
        } else {
            "none (next sync lists everything)"
        }
    ));
    formatter.info(&format!(
        "Content cache:   {} on disk, budget {}",
        status
            .cache_disk_bytes
            .map(format_bytes)
            .unwrap_or_else(|| "not persisted".to_string()),
        format_bytes(status.cache_max_bytes)
    ));

    if status.open_conflicts > 0 {
        formatter.warn(&format!(
            "{} open conflict{}; see 'vaultspace conflicts list'",
            status.open_conflicts,
            plural(status.open_conflicts)
        ));
    }
    if status.failed_uploads > 0 {
        formatter.warn(&format!(
            "{} failed upload{}; see 'vaultspace uploads failed'",
            status.failed_uploads,
            plural(status.failed_uploads)
        ));
    }
}
