//! Search command - Find nodes by name

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use super::{node_cells, node_json, CliContext, NODE_COLUMNS};
use crate::output::plural;

#[derive(Debug, Args)]
pub struct SearchCommand {
    /// Case-insensitive substring of the name
    pub query: String,
}

impl SearchCommand {
    pub async fn execute(&self, context: &CliContext) -> Result<()> {
        let formatter = context.formatter();
        let Some(engine) = context.open_engine(&*formatter).await? else {
            return Ok(());
        };

        let hits = engine
            .vault()
            .search(&self.query)
            .await
            .context("Search failed")?;
        info!(query = %self.query, hits = hits.len(), "Searched vault");

        if context.is_json() {
            let json = serde_json::json!({
                "query": self.query,
                "count": hits.len(),
                "results": hits.iter().map(node_json).collect::<Vec<_>>(),
            });
            formatter.print_json(&json);
        } else if hits.is_empty() {
            formatter.success(&format!("No matches for '{}'", self.query));
        } else {
            formatter.success(&format!("{} result{}", hits.len(), plural(hits.len())));
            formatter.info("");
            let rows: Vec<Vec<String>> = hits.iter().map(node_cells).collect();
            formatter.table(&NODE_COLUMNS, &rows);
        }

        engine.shutdown().await;
        Ok(())
    }
}
