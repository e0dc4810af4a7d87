//! Config command - View and validate VaultSpace configuration
//!
//! Provides the `vaultspace config` CLI command which:
//! 1. Shows the effective configuration (YAML or JSON)
//! 2. Validates the configuration file and reports errors
//!
//! Neither subcommand needs the database.

use anyhow::{Context, Result};
use clap::Subcommand;
use tracing::info;
use vaultspace_core::config::Config;

use super::CliContext;
use crate::output::plural;

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display the effective configuration
    Show,
    /// Validate the configuration file
    Validate,
}

impl ConfigCommand {
    pub async fn execute(&self, context: &CliContext) -> Result<()> {
        match self {
            ConfigCommand::Show => self.execute_show(context),
            ConfigCommand::Validate => self.execute_validate(context),
        }
    }

    fn execute_show(&self, context: &CliContext) -> Result<()> {
        let formatter = context.formatter();
        let config_path = &context.config_path;
        let config = context.load_config();

        info!(config_path = %config_path.display(), "Showing configuration");

        if context.is_json() {
            let json = serde_json::to_value(&config)
                .context("Failed to serialize configuration to JSON")?;
            formatter.print_json(&json);
        } else {
            let source = if config_path.exists() {
                config_path.display().to_string()
            } else {
                "defaults".to_string()
            };
            formatter.success(&format!("Configuration ({source})"));
            formatter.info("");

            let yaml = serde_yaml::to_string(&config)
                .context("Failed to serialize configuration to YAML")?;
            for line in yaml.lines() {
                formatter.info(line);
            }
        }

        Ok(())
    }

    fn execute_validate(&self, context: &CliContext) -> Result<()> {
        let formatter = context.formatter();
        let config_path = &context.config_path;

        let config = match Config::load(config_path) {
            Ok(config) => config,
            Err(e) if !config_path.exists() => {
                info!(error = %e, "No configuration file, checking defaults");
                if context.is_json() {
                    formatter.print_json(&serde_json::json!({
                        "valid": true,
                        "config_path": config_path.display().to_string(),
                        "errors": [],
                        "defaults": true,
                    }));
                } else {
                    formatter.success("No configuration file; defaults are in effect");
                    formatter.info(&format!("Expected at {}", config_path.display()));
                }
                return Ok(());
            }
            Err(e) => {
                if context.is_json() {
                    formatter.print_json(&serde_json::json!({
                        "valid": false,
                        "config_path": config_path.display().to_string(),
                        "errors": [format!("Failed to parse configuration: {e}")],
                    }));
                } else {
                    formatter.error(&format!("Failed to parse configuration: {e}"));
                    formatter.info(&format!("File: {}", config_path.display()));
                }
                return Ok(());
            }
        };

        info!(config_path = %config_path.display(), "Validating configuration");
        let errors = config.validate();

        if context.is_json() {
            let error_strings: Vec<String> = errors.iter().map(ToString::to_string).collect();
            formatter.print_json(&serde_json::json!({
                "valid": errors.is_empty(),
                "config_path": config_path.display().to_string(),
                "errors": error_strings,
            }));
        } else if errors.is_empty() {
            formatter.success("Configuration is valid");
            formatter.info(&format!("File: {}", config_path.display()));
        } else {
            formatter.error(&format!(
                "Configuration has {} error{}:",
                errors.len(),
                plural(errors.len())
            ));
            formatter.info(&format!("File: {}", config_path.display()));
            formatter.info("");
            for error in &errors {
                formatter.info(&format!("  {} - {}", error.field, error.message));
            }
        }

        Ok(())
    }
}
