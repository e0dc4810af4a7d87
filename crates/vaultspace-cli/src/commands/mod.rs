pub mod cache;
pub mod config;
pub mod conflicts;
pub mod ls;
pub mod search;
pub mod status;
pub mod uploads;

use std::path::PathBuf;

use anyhow::{Context, Result};
use vaultspace_core::config::Config;
use vaultspace_core::domain::{FileNode, NodeId};
use vaultspace_vault::EngineContext;

use crate::output::{format_bytes, get_formatter, Column, OutputFormat, OutputFormatter};

/// Global flags shared by every command
pub struct CliContext {
    pub format: OutputFormat,
    pub quiet: bool,
    pub config_path: PathBuf,
}

impl CliContext {
    pub fn new(format: OutputFormat, quiet: bool, config_path: Option<&str>) -> Self {
        Self {
            format,
            quiet,
            config_path: config_path
                .map(PathBuf::from)
                .unwrap_or_else(Config::default_path),
        }
    }

    pub fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    pub fn formatter(&self) -> Box<dyn OutputFormatter> {
        get_formatter(self.format, self.quiet)
    }

    pub fn load_config(&self) -> Config {
        Config::load_or_default(&self.config_path)
    }

    /// Opens the engine offline over the existing database
    ///
    /// Reports and returns `None` when no database exists yet, instead of
    /// creating an empty one.
    pub async fn open_engine(
        &self,
        formatter: &dyn OutputFormatter,
    ) -> Result<Option<EngineContext>> {
        let config = self.load_config();
        let db_path = config.database.path.clone();

        if !db_path.exists() {
            formatter.error(&format!(
                "No database found at {}. Run the vault at least once first.",
                db_path.display()
            ));
            return Ok(None);
        }

        let engine = EngineContext::open_offline(config)
            .await
            .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
        Ok(Some(engine))
    }
}

/// Parses a node id argument; `/` and `root` name the root folder
pub fn parse_node_id(raw: &str) -> Result<NodeId> {
    match raw {
        "/" | "root" => Ok(NodeId::root()),
        other => NodeId::new(other).with_context(|| format!("Invalid node id '{other}'")),
    }
}

/// JSON shape of a node in command output
pub fn node_json(node: &FileNode) -> serde_json::Value {
    serde_json::json!({
        "id": node.id().to_string(),
        "parent_id": node.parent_id().to_string(),
        "name": node.name(),
        "folder": node.is_folder(),
        "mime_type": node.mime_type(),
        "size_bytes": node.size_bytes(),
        "revision": node.revision_tag().map(ToString::to_string),
        "state": node.sync_state().as_str(),
        "last_synced_at": node.last_synced_at().map(|t| t.to_rfc3339()),
    })
}

/// Columns of the node tables printed by `ls` and `search`
pub const NODE_COLUMNS: [Column; 4] = [
    Column::left("Name", 32),
    Column::right("Size", 10),
    Column::left("State", 14),
    Column::left("ID", 40),
];

/// Table cells for a node; folders get a trailing `/` and no size
pub fn node_cells(node: &FileNode) -> Vec<String> {
    let (name, size) = if node.is_folder() {
        (format!("{}/", node.name()), "-".to_string())
    } else {
        (node.name().to_string(), format_bytes(node.size_bytes()))
    };
    vec![
        name,
        size,
        node.sync_state().as_str().to_string(),
        node.id().to_string(),
    ]
}
