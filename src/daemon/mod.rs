pub mod cache;
pub mod constraints;
pub mod executor;
pub mod host;
pub mod logger;
pub mod poller;
pub mod registry;
pub mod scheduler;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::daemon::registry::JobDescriptor;
use crate::daemon::scheduler::{JobService, JobServiceOptions};
use crate::models::ServiceConfig;
use crate::remote::{HttpRemoteJobExecutor, RemoteJobExecutor, RemoteJobRunnable};
use crate::server::{self, AppState};
use crate::storage::{JobInfoRepository, JsonJobInfoRepository};

/// How long in-flight dispatches get to finish after the HTTP server stops.
const DRAIN_GRACE: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Load the ServiceConfig, first match wins:
///   1. `--config` flag (passed as `config_path`)
///   2. `$JOBSTORE_CONFIG_DIR/config.json`
///   3. `<platform config dir>/jobstore/config.json`
///   4. `<data_dir>/config.json`
///   5. `ServiceConfig::default()`
pub fn load_config(config_path: Option<&Path>) -> Result<ServiceConfig> {
    if let Some(path) = config_path {
        if path.exists() {
            return read_config(path);
        }
        return Err(anyhow::anyhow!("Config file not found: {}", path.display()));
    }

    if let Ok(config_dir) = std::env::var("JOBSTORE_CONFIG_DIR") {
        let path = PathBuf::from(config_dir).join("config.json");
        if path.exists() {
            return read_config(&path);
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let path = config_dir.join("jobstore").join("config.json");
        if path.exists() {
            return read_config(&path);
        }
    }

    let path = resolve_data_dir(None).join("config.json");
    if path.exists() {
        return read_config(&path);
    }

    tracing::info!("No config file found, using defaults");
    Ok(ServiceConfig::default())
}

fn read_config(path: &Path) -> Result<ServiceConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: ServiceConfig = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    tracing::info!("Loaded config from: {}", path.display());
    Ok(config)
}

/// Resolve the data directory: explicit override, then `JOBSTORE_DATA_DIR`,
/// then the platform data dir (`~/.local/share/jobstore` on Linux).
pub fn resolve_data_dir(override_dir: Option<&Path>) -> PathBuf {
    if let Some(dir) = override_dir {
        return dir.to_path_buf();
    }

    if let Ok(d) = std::env::var("JOBSTORE_DATA_DIR") {
        return PathBuf::from(d);
    }

    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("jobstore")
}

pub async fn create_data_dirs(data_dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(data_dir)
        .await
        .context("Failed to create data directory")?;
    tracing::info!("Data directory ensured at: {}", data_dir.display());
    Ok(())
}

/// The shared store file: `store_path` from the config, or `<data_dir>/jobs.json`.
pub fn resolve_store_path(config: &ServiceConfig, data_dir: &Path) -> PathBuf {
    config
        .store_path
        .clone()
        .unwrap_or_else(|| data_dir.join("jobs.json"))
}

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Log to stderr and to `<data_dir>/jobstore.log`. `RUST_LOG` wins over the
/// default level. The returned guard flushes the file writer and must live as
/// long as the daemon.
pub fn init_tracing(
    data_dir: &Path,
    verbose: bool,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let default_level = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_level.into());
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_path = data_dir.join("jobstore.log");
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path);

    match file {
        Ok(file) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false);
            let result = tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .with(file_layer)
                .try_init();
            if result.is_ok() {
                tracing::info!("Logging to stderr and {}", log_path.display());
            }
            Some(guard)
        }
        Err(e) => {
            let result = tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .try_init();
            if result.is_ok() {
                tracing::warn!(
                    "Could not open log file {}: {}. Logging to stderr only.",
                    log_path.display(),
                    e
                );
            }
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Service assembly
// ---------------------------------------------------------------------------

/// Build the scheduler over `repository` and register the remote jobs and
/// running constraints named in `config`.
///
/// Spawns the dispatch workers, so it must run inside a tokio runtime.
pub fn build_service(
    config: &ServiceConfig,
    repository: Arc<dyn JobInfoRepository>,
) -> Result<Arc<JobService>> {
    let remote_executor: Option<Arc<dyn RemoteJobExecutor>> = match &config.remote_executor_url {
        Some(url) => {
            let executor = HttpRemoteJobExecutor::new(
                url,
                Duration::from_secs(config.remote_request_timeout_secs),
            )
            .with_context(|| format!("Failed to set up remote executor at {}", url))?;
            Some(Arc::new(executor))
        }
        None => None,
    };

    let mut options = JobServiceOptions::from_config(config);
    if let Some(executor) = &remote_executor {
        options = options.remote_executor(Arc::clone(executor));
    }
    let service = Arc::new(JobService::new(repository, options));

    if !config.remote_jobs.is_empty() {
        let executor = remote_executor.context(
            "remote_jobs are configured but remote_executor_url is not set",
        )?;
        for job in &config.remote_jobs {
            let runnable = RemoteJobRunnable::new(
                job.name.clone(),
                job.parameters.clone(),
                Arc::clone(&executor),
            );
            let descriptor = JobDescriptor::remote(
                job.name.clone(),
                Duration::from_secs(job.max_execution_time_secs),
                Duration::from_secs(job.polling_interval_secs),
                Arc::new(runnable),
            )
            .with_retries(
                job.max_retries,
                job.retry_interval_secs.map(Duration::from_secs),
            );
            if !service.register_job(descriptor) {
                tracing::warn!("Remote job '{}' configured twice, keeping the first", job.name);
            }
        }
    }

    for group in &config.running_constraints {
        let added = service
            .add_running_constraint(group.iter().cloned())
            .with_context(|| format!("Invalid running constraint {:?}", group))?;
        if !added {
            tracing::warn!("Ignoring running constraint {:?} with fewer than two jobs", group);
        }
    }

    Ok(service)
}

/// Run `tick` every `period` until the shutdown channel fires. Errors are
/// logged and the loop keeps going.
fn spawn_ticker<F, Fut>(
    label: &'static str,
    period: Duration,
    service: Arc<JobService>,
    mut shutdown_rx: watch::Receiver<()>,
    tick: F,
) -> JoinHandle<()>
where
    F: Fn(Arc<JobService>) -> Fut + Send + 'static,
    Fut: Future<Output = crate::errors::Result<usize>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period.max(Duration::from_secs(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match tick(Arc::clone(&service)).await {
                        Ok(0) => {}
                        Ok(n) => tracing::debug!("{}: {} jobs", label, n),
                        Err(e) => tracing::error!("{} failed: {}", label, e),
                    }
                }
                _ = shutdown_rx.changed() => break,
            }
        }
        tracing::debug!("{} ticker stopped", label);
    })
}

fn spawn_tickers(
    config: &ServiceConfig,
    service: &Arc<JobService>,
    shutdown_rx: &watch::Receiver<()>,
) -> Vec<JoinHandle<()>> {
    let tick = Duration::from_secs(config.tick_interval_secs);
    let sweep = Duration::from_secs(config.timeout_sweep_interval_secs);
    vec![
        spawn_ticker(
            "Queued job dispatch",
            tick,
            Arc::clone(service),
            shutdown_rx.clone(),
            |s| async move { s.execute_queued_jobs().await },
        ),
        spawn_ticker(
            "Remote job polling",
            tick,
            Arc::clone(service),
            shutdown_rx.clone(),
            |s| async move { s.poll_remote_jobs().await },
        ),
        spawn_ticker(
            "Timeout sweep",
            sweep,
            Arc::clone(service),
            shutdown_rx.clone(),
            |s| async move { s.cleanup_timed_out_jobs().await },
        ),
    ]
}

// ---------------------------------------------------------------------------
// Daemon
// ---------------------------------------------------------------------------

/// Run the coordinator in the foreground until Ctrl+C or SIGTERM:
///
/// 1. Load config and apply CLI overrides
/// 2. Set up tracing and the data directory
/// 3. Open the shared store and build the scheduler
/// 4. Start the tickers and the HTTP API
/// 5. On signal: stop tickers and HTTP, fail this host's running jobs, drain
pub async fn start_daemon(
    config_path: Option<&Path>,
    data_dir_override: Option<&Path>,
    port_override: Option<u16>,
    host_name_override: Option<&str>,
    disable_execution: bool,
    verbose: bool,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(p) = port_override {
        config.port = p;
    }
    if let Some(h) = host_name_override {
        config.host_name = Some(h.to_string());
    }
    if disable_execution {
        config.execution_enabled = false;
    }

    let data_dir = match (data_dir_override, &config.data_dir) {
        (Some(d), _) => d.to_path_buf(),
        (None, Some(d)) => d.clone(),
        (None, None) => resolve_data_dir(None),
    };
    config.data_dir = Some(data_dir.clone());

    create_data_dirs(&data_dir).await?;
    let _log_guard = init_tracing(&data_dir, verbose);

    let store_path = resolve_store_path(&config, &data_dir);
    let repository: Arc<dyn JobInfoRepository> = Arc::new(
        JsonJobInfoRepository::open(store_path.clone())
            .await
            .with_context(|| format!("Failed to open job store {}", store_path.display()))?,
    );
    tracing::info!("Job store: {}", store_path.display());

    let service = build_service(&config, repository)?;
    let config = Arc::new(config);

    let (shutdown_tx, mut shutdown_rx) = watch::channel(());
    let tickers = spawn_tickers(&config, &service, &shutdown_rx);

    let state = Arc::new(AppState {
        service: Arc::clone(&service),
        config: Arc::clone(&config),
        start_time: Instant::now(),
    });
    let router = server::create_router(state);
    let bind_addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;

    tracing::info!(
        "Coordinator '{}' listening on http://{} (execution {})",
        service.host(),
        bind_addr,
        if service.is_execution_enabled() { "enabled" } else { "disabled" }
    );

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown_rx.changed().await.ok();
                tracing::info!("HTTP server received shutdown signal");
            })
            .await
            .ok();
    });

    wait_for_signal().await?;

    let _ = shutdown_tx.send(());
    for ticker in tickers {
        let _ = ticker.await;
    }

    match service.shutdown().await {
        Ok(0) => {}
        Ok(n) => tracing::info!("Marked {} running jobs of this host as failed", n),
        Err(e) => tracing::error!("Failed to mark running jobs on shutdown: {}", e),
    }
    service.drain(DRAIN_GRACE).await;

    let _ = server_handle.await;
    tracing::info!("Coordinator exited cleanly.");
    Ok(())
}

async fn wait_for_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C signal");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM signal");
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        tracing::info!("Received Ctrl+C signal");
    }
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RemoteJobConfig;
    use crate::storage::InMemoryJobInfoRepository;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn repo() -> Arc<dyn JobInfoRepository> {
        Arc::new(InMemoryJobInfoRepository::new())
    }

    fn remote_job(name: &str) -> RemoteJobConfig {
        RemoteJobConfig {
            name: name.to_string(),
            max_execution_time_secs: 600,
            polling_interval_secs: 5,
            parameters: BTreeMap::new(),
            max_retries: 2,
            retry_interval_secs: Some(30),
        }
    }

    // -----------------------------------------------------------------------
    // Config loading
    // -----------------------------------------------------------------------

    #[test]
    fn test_config_loading_returns_defaults_when_no_file() {
        if std::env::var("JOBSTORE_CONFIG_DIR").is_ok() {
            return;
        }
        let config = load_config(None).expect("load config");
        assert_eq!(config.port, 8378);
        assert!(config.execution_enabled);
    }

    #[test]
    fn test_config_loading_from_file() {
        let tmp_dir = TempDir::new().expect("create temp dir");
        let config_path = tmp_dir.path().join("config.json");
        std::fs::write(
            &config_path,
            r#"{"port": 9999, "host_name": "node-7", "tick_interval_secs": 2}"#,
        )
        .expect("write config");

        let config = load_config(Some(&config_path)).expect("load config");
        assert_eq!(config.port, 9999);
        assert_eq!(config.host_name.as_deref(), Some("node-7"));
        assert_eq!(config.tick_interval_secs, 2);
        assert_eq!(config.timeout_sweep_interval_secs, 60);
    }

    #[test]
    fn test_config_loading_nonexistent_explicit_path_fails() {
        let result = load_config(Some(Path::new("/nonexistent/config.json")));
        assert!(result.is_err(), "Should fail for nonexistent explicit path");
    }

    #[test]
    fn test_config_loading_invalid_json_fails() {
        let tmp_dir = TempDir::new().expect("create temp dir");
        let config_path = tmp_dir.path().join("config.json");
        std::fs::write(&config_path, "{ not json").expect("write config");

        let err = load_config(Some(&config_path)).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse config file"));
    }

    // -----------------------------------------------------------------------
    // Data directory
    // -----------------------------------------------------------------------

    #[test]
    fn test_resolve_data_dir_with_override() {
        let path = PathBuf::from("/custom/data");
        assert_eq!(resolve_data_dir(Some(&path)), path);
    }

    #[test]
    fn test_resolve_data_dir_default() {
        let resolved = resolve_data_dir(None);
        if std::env::var("JOBSTORE_DATA_DIR").is_err() {
            assert!(
                resolved.ends_with("jobstore"),
                "Default data dir should end with 'jobstore', got: {}",
                resolved.display()
            );
        }
    }

    #[tokio::test]
    async fn test_data_directory_creation_idempotent() {
        let tmp_dir = TempDir::new().expect("create temp dir");
        let data_dir = tmp_dir.path().join("nested").join("jobstore-data");

        create_data_dirs(&data_dir).await.expect("first create");
        create_data_dirs(&data_dir).await.expect("second create");
        assert!(data_dir.is_dir());
    }

    #[test]
    fn test_store_path_defaults_to_data_dir() {
        let data_dir = Path::new("/var/lib/jobstore");
        let mut config = ServiceConfig::default();
        assert_eq!(
            resolve_store_path(&config, data_dir),
            data_dir.join("jobs.json")
        );

        config.store_path = Some(PathBuf::from("/shared/jobs.json"));
        assert_eq!(
            resolve_store_path(&config, data_dir),
            PathBuf::from("/shared/jobs.json")
        );
    }

    // -----------------------------------------------------------------------
    // Service assembly
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_build_service_registers_remote_jobs_and_constraints() {
        let config = ServiceConfig {
            host_name: Some("node-1".to_string()),
            remote_executor_url: Some("http://127.0.0.1:1/jobs".to_string()),
            remote_jobs: vec![remote_job("import"), remote_job("export")],
            running_constraints: vec![vec!["import".to_string(), "export".to_string()]],
            ..Default::default()
        };

        let service = build_service(&config, repo()).expect("build");
        assert_eq!(service.host(), "node-1");
        assert_eq!(service.list_job_names(), vec!["export", "import"]);
        assert_eq!(service.list_running_constraints().len(), 1);

        let import = service.descriptor("import").expect("registered");
        assert!(import.is_remote());
        assert_eq!(import.polling_interval(), Some(Duration::from_secs(5)));
        assert_eq!(import.max_execution_time, Duration::from_secs(600));
        assert_eq!(import.max_retries, 2);
        assert_eq!(import.retry_interval, Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_build_service_requires_executor_url_for_remote_jobs() {
        let config = ServiceConfig {
            remote_jobs: vec![remote_job("import")],
            ..Default::default()
        };
        let err = build_service(&config, repo()).err().expect("should fail");
        assert!(err.to_string().contains("remote_executor_url"));
    }

    #[tokio::test]
    async fn test_build_service_rejects_constraint_on_unknown_job() {
        let config = ServiceConfig {
            running_constraints: vec![vec!["a".to_string(), "b".to_string()]],
            ..Default::default()
        };
        let err = build_service(&config, repo()).err().expect("should fail");
        assert!(format!("{:#}", err).contains("Unknown job"));
    }

    #[tokio::test]
    async fn test_build_service_disabled_execution() {
        let config = ServiceConfig {
            execution_enabled: false,
            ..Default::default()
        };
        let service = build_service(&config, repo()).expect("build");
        assert!(!service.is_execution_enabled());
    }

    // -----------------------------------------------------------------------
    // Tickers
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_ticker_runs_until_shutdown() {
        let service = build_service(&ServiceConfig::default(), repo()).expect("build");
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let ticks = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&ticks);
        let handle = spawn_ticker(
            "test",
            Duration::from_secs(1),
            service,
            shutdown_rx,
            move |_s| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(0)
                }
            },
        );

        // The first tick of a tokio interval fires immediately
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);

        shutdown_tx.send(()).expect("send shutdown");
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("ticker stopped")
            .expect("join");
    }
}
