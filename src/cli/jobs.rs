// CLI job commands: jobs, constraints, run, dequeue, history, show

use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde_json::Value;

use super::{base_url, error_message, handle_request_error};
use crate::models::JobInfo;

async fn get_json(host: &str, port: u16, path: &str) -> anyhow::Result<(StatusCode, Value)> {
    let url = format!("{}{}", base_url(host, port), path);
    let response = Client::new()
        .get(&url)
        .send()
        .await
        .map_err(|e| handle_request_error(e, host, port))?;
    let status = response.status();
    let body: Value = response
        .json()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to parse response: {}", e))?;
    Ok((status, body))
}

/// Format a relative time string like "2 minutes ago".
fn format_relative_time(dt: &DateTime<Utc>) -> String {
    let secs = Utc::now().signed_duration_since(*dt).num_seconds().max(0);
    if secs < 60 {
        format!("{} seconds ago", secs)
    } else if secs < 3600 {
        format!("{} minutes ago", secs / 60)
    } else if secs < 86400 {
        format!("{} hours ago", secs / 3600)
    } else {
        format!("{} days ago", secs / 86400)
    }
}

/// One-word status: the result state once finished, the running state before.
fn status_label(job: &JobInfo) -> String {
    match job.result_state {
        Some(result) => result.to_string(),
        None => job.state.to_string(),
    }
}

/// jobstore jobs
pub async fn cmd_jobs(host: &str, port: u16, json: bool) -> anyhow::Result<()> {
    let (_, body) = get_json(host, port, "/api/jobs").await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    let names: Vec<String> = serde_json::from_value(body)?;
    if names.is_empty() {
        println!("No jobs registered.");
    }
    for name in names {
        println!("{}", name);
    }
    Ok(())
}

/// jobstore constraints
pub async fn cmd_constraints(host: &str, port: u16) -> anyhow::Result<()> {
    let (_, body) = get_json(host, port, "/api/constraints").await?;
    let groups: Vec<Vec<String>> = serde_json::from_value(body)?;
    if groups.is_empty() {
        println!("No running constraints.");
    }
    for group in groups {
        println!("{}", group.join(", "));
    }
    Ok(())
}

/// jobstore run
pub async fn cmd_run(host: &str, port: u16, name: &str, force: bool) -> anyhow::Result<()> {
    let url = format!("{}/api/jobs/{}", base_url(host, port), name);
    let response = Client::new()
        .post(&url)
        .query(&[("force", force)])
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

    let id = body["id"].as_str().unwrap_or("unknown");
    println!("Job '{}' accepted.", name);
    println!("  ID: {}", id);

    // Best effort: tell the user whether it started or went to the queue
    if let Ok((StatusCode::OK, record)) = get_json(host, port, &format!("/api/job-infos/{}", id)).await {
        if let Ok(job) = serde_json::from_value::<JobInfo>(record) {
            println!("  State: {}", job.state);
        }
    }
    Ok(())
}

/// jobstore dequeue
pub async fn cmd_dequeue(host: &str, port: u16, name: &str) -> anyhow::Result<()> {
    let url = format!("{}/api/jobs/{}/queued", base_url(host, port), name);
    let response = Client::new()
        .delete(&url)
        .send()
        .await
        .map_err(|e| handle_request_error(e, host, port))?;

    if response.status() == StatusCode::NO_CONTENT {
        println!("Removed queued job '{}'.", name);
        return Ok(());
    }
    let body: Value = response.json().await.unwrap_or(Value::Null);
    anyhow::bail!("{}", error_message(&body))
}

/// jobstore history
pub async fn cmd_history(
    host: &str,
    port: u16,
    name: &str,
    last: Option<usize>,
    json: bool,
) -> anyhow::Result<()> {
    let (status, body) = get_json(host, port, &format!("/api/jobs/{}/history", name)).await?;
    if !status.is_success() {
        anyhow::bail!("{}", error_message(&body));
    }
    let mut jobs: Vec<JobInfo> = serde_json::from_value(body)?;
    if let Some(n) = last {
        jobs.truncate(n);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&jobs)?);
        return Ok(());
    }
    if jobs.is_empty() {
        println!("No history for job '{}'.", name);
        return Ok(());
    }

    println!(
        "{:<38} {:<13} {:<20} {}",
        "ID", "STATUS", "HOST", "LAST MODIFIED"
    );
    for job in &jobs {
        println!(
            "{:<38} {:<13} {:<20} {}",
            job.id,
            status_label(job),
            job.host.as_deref().unwrap_or("-"),
            format_relative_time(&job.last_modified_at)
        );
    }
    Ok(())
}

/// jobstore show
pub async fn cmd_show(host: &str, port: u16, id: &str) -> anyhow::Result<()> {
    let (status, body) = get_json(host, port, &format!("/api/job-infos/{}", id)).await?;
    if !status.is_success() {
        anyhow::bail!("{}", error_message(&body));
    }
    let job: JobInfo = serde_json::from_value(body)?;
    print!("{}", render_job(&job));
    Ok(())
}

fn render_job(job: &JobInfo) -> String {
    let mut out = String::new();
    out.push_str(&format!("Job '{}'\n", job.name));
    out.push_str(&format!("  ID:          {}\n", job.id));
    out.push_str(&format!("  Status:      {}\n", status_label(job)));
    if let Some(host) = &job.host {
        out.push_str(&format!(
            "  Executed by: {} ({})\n",
            host,
            job.thread.as_deref().unwrap_or("-")
        ));
    }
    out.push_str(&format!("  Created:     {}\n", job.created_at.to_rfc3339()));
    out.push_str(&format!(
        "  Modified:    {}\n",
        job.last_modified_at.to_rfc3339()
    ));
    if let Some(finished) = job.finished_at {
        out.push_str(&format!("  Finished:    {}\n", finished.to_rfc3339()));
    }
    out.push_str(&format!("  Max time:    {:?}\n", job.max_execution_time()));
    if job.force_execution {
        out.push_str("  Forced:      yes\n");
    }
    if let Some(message) = &job.error_message {
        out.push_str(&format!("  Message:     {}\n", message));
    }
    for (key, value) in &job.additional_data {
        out.push_str(&format!("  {}: {}\n", key, value));
    }
    if !job.log_lines.is_empty() {
        out.push_str("  Log:\n");
        for line in &job.log_lines {
            out.push_str(&format!("    {}\n", line));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ResultState, RunningState};
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn finished_job() -> JobInfo {
        let now = Utc::now();
        let mut additional_data = BTreeMap::new();
        additional_data.insert("remoteJobUri".to_string(), "http://remote/1".to_string());
        JobInfo {
            id: Uuid::now_v7(),
            name: "import".to_string(),
            state: RunningState::Finished,
            result_state: Some(ResultState::Failed),
            host: Some("node-1".to_string()),
            thread: Some("worker-3".to_string()),
            created_at: now,
            last_modified_at: now,
            finished_at: Some(now),
            max_execution_time_ms: 60_000,
            force_execution: true,
            additional_data,
            log_lines: vec!["started".to_string(), "boom".to_string()],
            error_message: Some("shutdown called from executing host".to_string()),
        }
    }

    #[test]
    fn test_status_label() {
        let mut job = finished_job();
        assert_eq!(status_label(&job), "FAILED");
        job.result_state = None;
        job.state = RunningState::Queued;
        assert_eq!(status_label(&job), "QUEUED");
    }

    #[test]
    fn test_render_job() {
        let job = finished_job();
        let out = render_job(&job);
        assert!(out.contains("Job 'import'"));
        assert!(out.contains("FAILED"));
        assert!(out.contains("node-1 (worker-3)"));
        assert!(out.contains("Forced:      yes"));
        assert!(out.contains("remoteJobUri: http://remote/1"));
        assert!(out.contains("    boom"));
        assert!(out.contains("shutdown called from executing host"));
    }

    #[test]
    fn test_format_relative_time() {
        let now = Utc::now();
        assert!(format_relative_time(&(now - chrono::Duration::seconds(5))).ends_with("seconds ago"));
        assert_eq!(
            format_relative_time(&(now - chrono::Duration::minutes(5))),
            "5 minutes ago"
        );
        assert_eq!(
            format_relative_time(&(now - chrono::Duration::hours(3))),
            "3 hours ago"
        );
        assert_eq!(
            format_relative_time(&(now - chrono::Duration::days(2))),
            "2 days ago"
        );
    }

    #[tokio::test]
    async fn test_run_unreachable_coordinator() {
        let err = cmd_run("127.0.0.1", 1, "import", false).await.unwrap_err();
        assert!(err.to_string().contains("Could not connect"));
    }
}
