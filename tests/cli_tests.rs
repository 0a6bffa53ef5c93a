//! CLI integration tests using assert_cmd.
//!
//! These tests invoke the actual `jobstore` binary and verify its output.

use std::sync::Arc;
use std::time::{Duration, Instant};

use assert_cmd::assert::OutputAssertExt;
use assert_cmd::Command;
use async_trait::async_trait;
use predicates::prelude::*;

use jobstore::daemon::logger::JobLogger;
use jobstore::daemon::registry::{JobDescriptor, JobRunnable};
use jobstore::daemon::scheduler::{JobService, JobServiceOptions};
use jobstore::models::ServiceConfig;
use jobstore::server::{self, AppState};
use jobstore::storage::InMemoryJobInfoRepository;

#[allow(deprecated)]
fn jobstore_cmd() -> Command {
    Command::cargo_bin("jobstore").expect("binary should exist")
}

#[test]
fn test_version_flag() {
    jobstore_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_help_flag() {
    jobstore_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("distributed job coordination"))
        .stdout(predicate::str::contains("start"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("jobs"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("dequeue"))
        .stdout(predicate::str::contains("history"))
        .stdout(predicate::str::contains("show"))
        .stdout(predicate::str::contains("enable"))
        .stdout(predicate::str::contains("disable"));
}

#[test]
fn test_start_help() {
    jobstore_cmd()
        .args(["start", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--config"))
        .stdout(predicate::str::contains("--data-dir"))
        .stdout(predicate::str::contains("--host-name"))
        .stdout(predicate::str::contains("--disable-execution"));
}

#[test]
fn test_no_subcommand_shows_help() {
    jobstore_cmd()
        .assert()
        .success()
        .stdout(predicate::str::contains("distributed job coordination"));
}

#[test]
fn test_unreachable_coordinator_fails() {
    jobstore_cmd()
        .args(["--port", "1", "jobs"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Could not connect to coordinator"));
}

#[test]
fn test_start_with_missing_config_fails() {
    let dir = tempfile::TempDir::new().expect("temp dir");
    jobstore_cmd()
        .args(["start", "--config"])
        .arg(dir.path().join("missing.json"))
        .args(["--data-dir"])
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Config file not found"));
}

// ---------------------------------------------------------------------------
// Against a live coordinator
// ---------------------------------------------------------------------------

struct Noop;

#[async_trait]
impl JobRunnable for Noop {
    async fn execute(&self, logger: &JobLogger) -> anyhow::Result<()> {
        logger.add_log_line("noop ran").await?;
        Ok(())
    }
}

async fn spawn_coordinator() -> u16 {
    let service = Arc::new(JobService::new(
        Arc::new(InMemoryJobInfoRepository::new()),
        JobServiceOptions::default().host("cli-host"),
    ));
    service.register_job(JobDescriptor::local("cleanup", Duration::from_secs(60), Arc::new(Noop)));
    service.register_job(JobDescriptor::local("import", Duration::from_secs(60), Arc::new(Noop)));

    let state = Arc::new(AppState {
        service,
        config: Arc::new(ServiceConfig::default()),
        start_time: Instant::now(),
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind to random port");
    let port = listener.local_addr().expect("local addr").port();
    tokio::spawn(async move {
        axum::serve(listener, server::create_router(state)).await.ok();
    });
    port
}

async fn run_cli(args: Vec<String>) -> std::process::Output {
    tokio::task::spawn_blocking(move || jobstore_cmd().args(args).output().expect("run cli"))
        .await
        .expect("cli task")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cli_against_live_coordinator() {
    let port = spawn_coordinator().await.to_string();
    let args = |rest: &[&str]| {
        let mut v = vec!["--port".to_string(), port.clone()];
        v.extend(rest.iter().map(|s| s.to_string()));
        v
    };

    run_cli(args(&["status"]))
        .await
        .assert()
        .success()
        .stdout(predicate::str::contains("cli-host"));

    run_cli(args(&["jobs"]))
        .await
        .assert()
        .success()
        .stdout(predicate::str::contains("cleanup"))
        .stdout(predicate::str::contains("import"));

    run_cli(args(&["run", "import"]))
        .await
        .assert()
        .success()
        .stdout(predicate::str::contains("Job 'import' accepted"));

    run_cli(args(&["run", "missing"]))
        .await
        .assert()
        .failure()
        .stderr(predicate::str::contains("Job not registered: missing"));

    run_cli(args(&["dequeue", "import"]))
        .await
        .assert()
        .failure()
        .stderr(predicate::str::contains("No queued job"));

    run_cli(args(&["disable"]))
        .await
        .assert()
        .success()
        .stdout(predicate::str::contains("Job execution disabled"));

    run_cli(args(&["run", "cleanup"]))
        .await
        .assert()
        .failure()
        .stderr(predicate::str::contains("disabled"));

    run_cli(args(&["enable"]))
        .await
        .assert()
        .success()
        .stdout(predicate::str::contains("Job execution enabled"));

    run_cli(args(&["history", "import"]))
        .await
        .assert()
        .success()
        .stdout(predicate::str::contains("STATUS"));
}
