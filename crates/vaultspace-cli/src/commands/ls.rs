//! Ls command - List the contents of a folder
//!
//! Reads the local mirror only; the listing is the best-known snapshot
//! even when the last sync cycle failed.

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use super::{node_cells, node_json, parse_node_id, CliContext, NODE_COLUMNS};
use crate::output::plural;

#[derive(Debug, Args)]
pub struct LsCommand {
    /// Folder id (defaults to the root)
    #[arg(default_value = "/")]
    pub folder: String,
}

impl LsCommand {
    pub async fn execute(&self, context: &CliContext) -> Result<()> {
        let formatter = context.formatter();
        let folder_id = parse_node_id(&self.folder)?;

        let Some(engine) = context.open_engine(&*formatter).await? else {
            return Ok(());
        };
        let vault = engine.vault();

        let nodes = vault
            .list(&folder_id)
            .await
            .with_context(|| format!("Failed to list folder {folder_id}"))?;
        info!(folder_id = %folder_id, count = nodes.len(), "Listed folder");

        if context.is_json() {
            let json = serde_json::json!({
                "folder_id": folder_id.to_string(),
                "count": nodes.len(),
                "children": nodes.iter().map(node_json).collect::<Vec<_>>(),
            });
            formatter.print_json(&json);
        } else if nodes.is_empty() {
            formatter.success("Folder is empty");
        } else {
            formatter.success(&format!("{} item{}", nodes.len(), plural(nodes.len())));
            formatter.info("");
            let rows: Vec<Vec<String>> = nodes.iter().map(node_cells).collect();
            formatter.table(&NODE_COLUMNS, &rows);
        }

        engine.shutdown().await;
        Ok(())
    }
}
