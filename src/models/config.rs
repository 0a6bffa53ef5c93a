use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// Shared store file. Every coordinating host must point at the same file.
    #[serde(default)]
    pub store_path: Option<PathBuf>,
    /// Overrides the machine hostname as this process's host identity.
    #[serde(default)]
    pub host_name: Option<String>,
    #[serde(default = "default_execution_enabled")]
    pub execution_enabled: bool,
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    #[serde(default = "default_dispatch_queue_capacity")]
    pub dispatch_queue_capacity: usize,
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    #[serde(default = "default_timeout_sweep_interval_secs")]
    pub timeout_sweep_interval_secs: u64,
    #[serde(default)]
    pub remote_executor_url: Option<String>,
    #[serde(default = "default_remote_request_timeout_secs")]
    pub remote_request_timeout_secs: u64,
    #[serde(default)]
    pub remote_jobs: Vec<RemoteJobConfig>,
    #[serde(default)]
    pub running_constraints: Vec<Vec<String>>,
}

/// A remote job registered from the config file at startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteJobConfig {
    pub name: String,
    #[serde(default = "default_max_execution_time_secs")]
    pub max_execution_time_secs: u64,
    #[serde(default = "default_polling_interval_secs")]
    pub polling_interval_secs: u64,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub retry_interval_secs: Option<u64>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8378
}

fn default_execution_enabled() -> bool {
    true
}

fn default_worker_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() * 2)
        .unwrap_or(4)
}

fn default_dispatch_queue_capacity() -> usize {
    64
}

fn default_tick_interval_secs() -> u64 {
    10
}

fn default_timeout_sweep_interval_secs() -> u64 {
    60
}

fn default_remote_request_timeout_secs() -> u64 {
    30
}

fn default_max_execution_time_secs() -> u64 {
    3600
}

fn default_polling_interval_secs() -> u64 {
    30
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: None,
            store_path: None,
            host_name: None,
            execution_enabled: default_execution_enabled(),
            worker_pool_size: default_worker_pool_size(),
            dispatch_queue_capacity: default_dispatch_queue_capacity(),
            tick_interval_secs: default_tick_interval_secs(),
            timeout_sweep_interval_secs: default_timeout_sweep_interval_secs(),
            remote_executor_url: None,
            remote_request_timeout_secs: default_remote_request_timeout_secs(),
            remote_jobs: Vec::new(),
            running_constraints: Vec::new(),
        }
    }
}
