//! Status command handler.

use std::time::Duration;

use anyhow::{Context, Result};

use fleetnode::gateway::NO_SERVICES;
use fleetnode::services::ServiceStatusView;

/// Query an agent's installed services and print them as a table.
pub(crate) async fn cmd_status(agent: &str) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .with_context(|| "Failed to build HTTP client")?;
    let response = client
        .get(format!("{}/get-status", agent.trim_end_matches('/')))
        .send()
        .await
        .with_context(|| format!("Failed to reach agent at {}", agent))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .with_context(|| "Failed to read agent response")?;
    if !status.is_success() {
        anyhow::bail!("Agent returned {}: {}", status, body.trim());
    }

    if body.trim() == NO_SERVICES {
        println!("{}", NO_SERVICES);
        return Ok(());
    }

    let services: Vec<ServiceStatusView> =
        serde_json::from_str(&body).with_context(|| "Unexpected status payload")?;
    print!("{}", render_table(&services));
    Ok(())
}

fn render_table(services: &[ServiceStatusView]) -> String {
    let mut out = format!(
        "{:<12} {:<10} {:<24} {}\n",
        "ID", "STATUS", "NAME", "VERSION"
    );
    for s in services {
        out.push_str(&format!(
            "{:<12} {:<10} {:<24} {}\n",
            s.id,
            s.status.as_str(),
            s.name,
            s.version
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetnode::services::ServiceStatus;

    #[test]
    fn test_render_table() {
        let table = render_table(&[ServiceStatusView {
            status: ServiceStatus::Running,
            id: "svc-abc123".into(),
            name: "greet".into(),
            version: "1.0".into(),
        }]);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("ID"));
        assert!(lines[1].starts_with("svc-abc123"));
        assert!(lines[1].contains("running"));
        assert!(lines[1].ends_with("1.0"));
    }
}
