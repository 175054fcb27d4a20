//! CLI module: command parsing and dispatch
//!
//! All CLI logic lives here. `main.rs` calls `cli::run()`.

pub mod config;
pub mod deploy;
pub mod serve;
pub mod status;

use std::path::PathBuf;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};

use fleetnode::config::Config;

/// Agent address used by the client commands when `--agent` is omitted.
pub(crate) const DEFAULT_AGENT_URL: &str = "http://127.0.0.1:8080";

#[derive(Parser)]
#[command(name = "fleetnode")]
#[command(version)]
#[command(about = "Minimal fleet node agent: installs, supervises and health-checks packaged services", long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.fleetnode/config.json)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the node agent (cluster join, health monitor, HTTP control surface)
    Serve,
    /// Package an executable with its config.toml and install it on an agent
    Deploy {
        /// Service executable to ship
        #[arg(long, value_name = "PATH")]
        executable: PathBuf,
        /// Service config.toml (Name, Version, optional HealthPort)
        #[arg(long = "config-file", value_name = "PATH")]
        config_file: PathBuf,
        /// Agent base URL
        #[arg(long, default_value = DEFAULT_AGENT_URL)]
        agent: String,
    },
    /// Show the services installed on an agent
    Status {
        /// Agent base URL
        #[arg(long, default_value = DEFAULT_AGENT_URL)]
        agent: String,
    },
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration (file + environment) as JSON
    Show,
    /// Check the configuration file for errors
    Check,
}

/// Resolve the config file path from the `--config` flag.
pub(crate) fn config_path(flag: Option<&PathBuf>) -> PathBuf {
    flag.cloned().unwrap_or_else(Config::path)
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let path = config_path(cli.config.as_ref());

    // Respect the logging settings when the config is readable; a broken
    // config is reported by the command itself.
    let logging_cfg = Config::load_from_path(&path)
        .map(|c| c.logging)
        .unwrap_or_default();
    fleetnode::utils::logging::init_logging(&logging_cfg)?;

    match cli.command {
        None => {
            let mut cmd = Cli::command();
            cmd.print_help()?;
            println!();
        }
        Some(Commands::Serve) => {
            serve::cmd_serve(&path).await?;
        }
        Some(Commands::Deploy {
            executable,
            config_file,
            agent,
        }) => {
            deploy::cmd_deploy(&executable, &config_file, &agent).await?;
        }
        Some(Commands::Status { agent }) => {
            status::cmd_status(&agent).await?;
        }
        Some(Commands::Config { action }) => {
            config::cmd_config(action, &path)?;
        }
    }

    Ok(())
}
