//! Uploads command - Inspect and retry failed uploads

use anyhow::{Context, Result};
use clap::Subcommand;
use tracing::info;

use super::{parse_node_id, CliContext};
use crate::output::{format_bytes, plural, Column};

const UPLOAD_COLUMNS: [Column; 5] = [
    Column::left("Node ID", 28),
    Column::right("Size", 10),
    Column::right("Tries", 5),
    Column::left("Next", 7),
    Column::left("Last error", 60),
];

#[derive(Debug, Subcommand)]
pub enum UploadsCommand {
    /// List uploads whose last attempt failed
    Failed,
    /// Clear a failure so the next sync tries again
    Retry {
        /// Node id of the pending upload
        id: String,
    },
}

impl UploadsCommand {
    pub async fn execute(&self, context: &CliContext) -> Result<()> {
        let formatter = context.formatter();
        let Some(engine) = context.open_engine(&*formatter).await? else {
            return Ok(());
        };
        let vault = engine.vault();

        match self {
            UploadsCommand::Failed => {
                let failed = vault
                    .failed_uploads()
                    .await
                    .context("Failed to query upload ledger")?;
                info!(count = failed.len(), "Retrieved failed uploads");

                if context.is_json() {
                    let entries: Vec<serde_json::Value> = failed
                        .iter()
                        .map(|u| {
                            serde_json::json!({
                                "node_id": u.node_id.to_string(),
                                "bytes": u.data.len(),
                                "attempts": u.attempts,
                                "retryable": u.retryable,
                                "last_error": u.last_error,
                                "staged_at": u.staged_at.to_rfc3339(),
                            })
                        })
                        .collect();
                    formatter.print_json(&serde_json::json!({
                        "count": failed.len(),
                        "uploads": entries,
                    }));
                } else if failed.is_empty() {
                    formatter.success("No failed uploads");
                } else {
                    formatter.success(&format!(
                        "{} failed upload{}",
                        failed.len(),
                        plural(failed.len())
                    ));
                    formatter.info("");
                    let rows: Vec<Vec<String>> = failed
                        .iter()
                        .map(|upload| {
                            vec![
                                upload.node_id.to_string(),
                                format_bytes(upload.data.len() as u64),
                                upload.attempts.to_string(),
                                if upload.retryable { "retry" } else { "blocked" }.to_string(),
                                upload.last_error.clone().unwrap_or_default(),
                            ]
                        })
                        .collect();
                    formatter.table(&UPLOAD_COLUMNS, &rows);
                    formatter.info("");
                    formatter.info("Use 'vaultspace uploads retry <id>' to unblock an upload.");
                }
            }
            UploadsCommand::Retry { id } => {
                let id = parse_node_id(id)?;
                vault
                    .retry_upload(&id)
                    .await
                    .with_context(|| format!("Failed to reset upload {id}"))?;
                if context.is_json() {
                    formatter.print_json(&serde_json::json!({
                        "success": true,
                        "node_id": id.to_string(),
                    }));
                } else {
                    formatter.success(&format!("Upload of {id} will be retried on the next sync"));
                }
            }
        }

        engine.shutdown().await;
        Ok(())
    }
}
