// CLI coordinator commands: start, status, enable, disable

use std::path::Path;

use reqwest::Client;
use serde_json::Value;

use super::{base_url, error_message, handle_request_error};

/// jobstore start
pub async fn cmd_start(
    config: Option<&str>,
    data_dir: Option<&str>,
    port: Option<u16>,
    host_name: Option<&str>,
    disable_execution: bool,
    verbose: bool,
) -> anyhow::Result<()> {
    crate::daemon::start_daemon(
        config.map(Path::new),
        data_dir.map(Path::new),
        port,
        host_name,
        disable_execution,
        verbose,
    )
    .await
}

/// jobstore status
pub async fn cmd_status(host: &str, port: u16) -> anyhow::Result<()> {
    let url = format!("{}/health", base_url(host, port));
    let response = Client::new()
        .get(&url)
        .send()
        .await
        .map_err(|e| handle_request_error(e, host, port))?;

    let body: Value = response
        .json()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to parse response: {}", e))?;

    println!("Coordinator is running.");
    println!("  Host:      {}", body["host"].as_str().unwrap_or("unknown"));
    println!(
        "  Uptime:    {}",
        format_uptime(body["uptime_seconds"].as_u64().unwrap_or(0))
    );
    println!("  Jobs:      {}", body["registered_jobs"].as_u64().unwrap_or(0));
    println!(
        "  Execution: {}",
        if body["execution_enabled"].as_bool().unwrap_or(false) {
            "enabled"
        } else {
            "disabled"
        }
    );
    println!("  Version:   {}", body["version"].as_str().unwrap_or("unknown"));
    Ok(())
}

/// jobstore enable / jobstore disable
pub async fn cmd_set_execution(host: &str, port: u16, enabled: bool) -> anyhow::Result<()> {
    let action = if enabled { "enable" } else { "disable" };
    let url = format!("{}/api/execution/{}", base_url(host, port), action);
    let response = Client::new()
        .post(&url)
        .send()
        .await
        .map_err(|e| handle_request_error(e, host, port))?;

    let status = response.status();
    let body: Value = response
        .json()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to parse response: {}", e))?;
    if !status.is_success() {
        anyhow::bail!("{}", error_message(&body));
    }

    println!(
        "Job execution {}.",
        if enabled { "enabled" } else { "disabled" }
    );
    Ok(())
}

/// Format seconds as e.g. "2d 3h 4m 5s", dropping leading zero units.
pub fn format_uptime(secs: u64) -> String {
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    if days > 0 {
        format!("{}d {}h {}m {}s", days, hours, minutes, seconds)
    } else if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
