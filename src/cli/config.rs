//! Config command handlers.

use std::path::Path;

use anyhow::{Context, Result};

use fleetnode::config::Config;

use super::ConfigAction;

pub(crate) fn cmd_config(action: ConfigAction, path: &Path) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = Config::load_from_path(path)
                .with_context(|| format!("Failed to load {}", path.display()))?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigAction::Check => {
            println!("Config file: {}", path.display());

            if !path.exists() {
                println!("[OK] No config file found (using defaults)");
                return Ok(());
            }

            match Config::load_from_path(path) {
                Ok(config) => {
                    println!(
                        "[OK] node '{}' on {}:{}",
                        config.node.name, config.node.host, config.node.port
                    );
                    if config.cluster.members.is_empty() {
                        println!("[OK] standalone (no cluster members)");
                    } else {
                        println!("[OK] {} cluster member(s)", config.cluster.members.len());
                    }
                    println!("\nConfiguration looks good!");
                }
                Err(e) => {
                    println!("[ERROR] {}", e);
                    anyhow::bail!("Configuration is invalid");
                }
            }
        }
    }
    Ok(())
}
