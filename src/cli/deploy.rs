//! Deploy command handler.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};

use fleetnode::services::installer::{CONFIG_ENTRY, DEFAULT_EXECUTABLE_MARKER};
use fleetnode::services::{PackageBuilder, ServiceConfig};

/// Installs block for the agent's stability window; leave generous headroom.
const DEPLOY_TIMEOUT: Duration = Duration::from_secs(60);

/// Build a package from an executable and its config, then install it.
pub(crate) async fn cmd_deploy(executable: &Path, config_file: &Path, agent: &str) -> Result<()> {
    let config_raw = std::fs::read_to_string(config_file)
        .with_context(|| format!("Failed to read {}", config_file.display()))?;
    let service = ServiceConfig::parse(&config_raw)
        .map_err(|e| anyhow::anyhow!("Invalid service config {}: {}", config_file.display(), e))?;

    let binary = std::fs::read(executable)
        .with_context(|| format!("Failed to read {}", executable.display()))?;
    let entry = executable_entry_name(executable)?;

    let archive = PackageBuilder::new()
        .file(CONFIG_ENTRY, config_raw)
        .file(entry.clone(), binary)
        .build()
        .with_context(|| "Failed to build package")?;

    println!(
        "Deploying {} {} ({} as {}, {} bytes) to {}...",
        service.name,
        service.version,
        executable.display(),
        entry,
        archive.len(),
        agent
    );

    let client = reqwest::Client::builder()
        .timeout(DEPLOY_TIMEOUT)
        .build()
        .with_context(|| "Failed to build HTTP client")?;
    let response = client
        .post(format!("{}/install-service", agent.trim_end_matches('/')))
        .header(reqwest::header::CONTENT_TYPE, "application/zip")
        .body(archive)
        .send()
        .await
        .with_context(|| format!("Failed to reach agent at {}", agent))?;

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if !status.is_success() {
        anyhow::bail!("Install failed ({}): {}", status, body.trim());
    }

    println!("Installed service {}", body.trim());
    Ok(())
}

/// Archive name for the executable; it must carry the executable marker.
fn executable_entry_name(executable: &Path) -> Result<String> {
    let name = executable
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid executable path: {}", executable.display()))?;
    if name.contains(DEFAULT_EXECUTABLE_MARKER) {
        Ok(name.to_string())
    } else {
        Ok(format!("{}{}", name, DEFAULT_EXECUTABLE_MARKER))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_name_keeps_marker() {
        assert_eq!(
            executable_entry_name(Path::new("/build/greet.exe")).unwrap(),
            "greet.exe"
        );
    }

    #[test]
    fn test_entry_name_appends_marker() {
        assert_eq!(
            executable_entry_name(Path::new("target/release/greet")).unwrap(),
            "greet.exe"
        );
    }

    #[test]
    fn test_entry_name_rejects_root() {
        assert!(executable_entry_name(Path::new("/")).is_err());
    }
}
