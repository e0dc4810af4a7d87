//! Conflicts command - Manage synchronization conflicts
//!
//! Provides the `vaultspace conflicts` CLI command which:
//! 1. Lists open conflicts with both sides' revisions
//! 2. Resolves a conflict by keeping the local or the remote version
//!
//! Resolution only touches the local database; the next sync cycle pushes
//! a kept local version or confirms an adopted remote one.

use anyhow::{Context, Result};
use clap::Subcommand;
use tracing::info;
use vaultspace_core::domain::{ConflictRecord, Resolution};

use super::{node_json, parse_node_id, CliContext};
use crate::output::{format_bytes, plural, Column};

#[derive(Debug, Subcommand)]
pub enum ConflictsCommand {
    /// List open conflicts
    List,
    /// Resolve a conflict
    Resolve {
        /// Node id of the conflicted file
        id: String,
        /// Version to keep: local or remote
        #[arg(long)]
        keep: String,
    },
}

impl ConflictsCommand {
    pub async fn execute(&self, context: &CliContext) -> Result<()> {
        match self {
            ConflictsCommand::List => self.execute_list(context).await,
            ConflictsCommand::Resolve { id, keep } => self.execute_resolve(id, keep, context).await,
        }
    }

    async fn execute_list(&self, context: &CliContext) -> Result<()> {
        let formatter = context.formatter();
        let Some(engine) = context.open_engine(&*formatter).await? else {
            return Ok(());
        };
        let vault = engine.vault();

        let conflicts = vault
            .conflicts()
            .await
            .context("Failed to query open conflicts")?;
        info!(count = conflicts.len(), "Retrieved open conflicts");

        if context.is_json() {
            let json = serde_json::json!({
                "count": conflicts.len(),
                "conflicts": conflicts.iter().map(conflict_json).collect::<Vec<_>>(),
            });
            formatter.print_json(&json);
        } else if conflicts.is_empty() {
            formatter.success("No open conflicts");
        } else {
            formatter.success(&format!(
                "{} open conflict{}",
                conflicts.len(),
                plural(conflicts.len())
            ));
            formatter.info("");
            let rows: Vec<Vec<String>> = conflicts.iter().map(conflict_cells).collect();
            formatter.table(&CONFLICT_COLUMNS, &rows);
            formatter.info("");
            formatter.info("Use 'vaultspace conflicts resolve <id> --keep <local|remote>' to resolve.");
        }

        engine.shutdown().await;
        Ok(())
    }

    async fn execute_resolve(&self, raw_id: &str, keep: &str, context: &CliContext) -> Result<()> {
        let formatter = context.formatter();

        let resolution: Resolution = match keep.parse() {
            Ok(resolution) => resolution,
            Err(_) => {
                let message = format!("Unknown choice '{keep}'. Use: local, remote");
                if context.is_json() {
                    formatter.print_json(&serde_json::json!({
                        "success": false,
                        "error": message,
                    }));
                } else {
                    formatter.error(&message);
                }
                return Ok(());
            }
        };
        let id = parse_node_id(raw_id)?;

        let Some(engine) = context.open_engine(&*formatter).await? else {
            return Ok(());
        };
        let vault = engine.vault();

        let outcome = vault
            .resolve_conflict(&id, resolution)
            .await
            .with_context(|| format!("Failed to resolve conflict on {id}"))?;
        info!(node_id = %id, %resolution, "Conflict resolved from CLI");

        if context.is_json() {
            formatter.print_json(&serde_json::json!({
                "success": true,
                "node_id": id.to_string(),
                "resolution": resolution.to_string(),
                "node": outcome.as_ref().map(node_json),
            }));
        } else {
            match (&outcome, resolution) {
                (None, _) => formatter.success(&format!("Removed {id}; it was deleted remotely")),
                (Some(node), Resolution::KeepLocal) => formatter.success(&format!(
                    "Keeping local version of {}; it uploads on the next sync",
                    node.name()
                )),
                (Some(node), Resolution::KeepRemote) => formatter.success(&format!(
                    "Adopted remote version of {}; local changes discarded",
                    node.name()
                )),
            }
        }

        engine.shutdown().await;
        Ok(())
    }
}

const CONFLICT_COLUMNS: [Column; 4] = [
    Column::left("Node ID", 28),
    Column::left("Detected", 19),
    Column::left("Local rev", 12),
    Column::left("Remote", 40),
];

fn conflict_cells(conflict: &ConflictRecord) -> Vec<String> {
    let remote = if conflict.remote_deleted() {
        "deleted".to_string()
    } else {
        format!(
            "{} {} ({})",
            conflict
                .remote
                .revision_tag
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
            conflict.remote.name,
            format_bytes(conflict.remote.size_bytes)
        )
    };
    vec![
        conflict.node_id.to_string(),
        conflict.detected_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        conflict
            .local_revision
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "-".to_string()),
        remote,
    ]
}

fn conflict_json(conflict: &ConflictRecord) -> serde_json::Value {
    serde_json::json!({
        "node_id": conflict.node_id.to_string(),
        "detected_at": conflict.detected_at.to_rfc3339(),
        "local_revision": conflict.local_revision.as_ref().map(ToString::to_string),
        "remote": {
            "id": conflict.remote.id.to_string(),
            "name": conflict.remote.name,
            "size_bytes": conflict.remote.size_bytes,
            "revision": conflict.remote.revision_tag.as_ref().map(ToString::to_string),
            "deleted": conflict.remote_deleted(),
        },
    })
}
