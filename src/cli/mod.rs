pub mod daemon;
pub mod jobs;

use clap::{Parser, Subcommand};
use serde_json::Value;

/// jobstore - distributed job coordination over a shared job store
#[derive(Parser, Debug)]
#[command(
    name = "jobstore",
    version,
    about = "jobstore - distributed job coordination over a shared job store"
)]
pub struct Cli {
    /// Coordinator host
    #[arg(long, default_value = "127.0.0.1", global = true)]
    pub host: String,

    /// Coordinator port [default: 8378]. With `start`, overrides the config file
    #[arg(short = 'p', long, global = true)]
    pub port: Option<u16>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the coordinator in the foreground
    Start {
        /// Path to configuration file
        #[arg(short = 'c', long = "config")]
        config: Option<String>,

        /// Data directory path
        #[arg(long = "data-dir")]
        data_dir: Option<String>,

        /// Host identity recorded on executed jobs (defaults to the hostname)
        #[arg(long = "host-name")]
        host_name: Option<String>,

        /// Start with job execution disabled
        #[arg(long = "disable-execution")]
        disable_execution: bool,
    },

    /// Show coordinator status
    Status,

    /// List registered job names
    Jobs {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List running constraints
    Constraints,

    /// Execute a job now, or queue it if it cannot run yet
    Run {
        /// Job name
        name: String,

        /// Skip the job's execution-necessary check
        #[arg(long)]
        force: bool,
    },

    /// Remove the queued instance of a job
    Dequeue {
        /// Job name
        name: String,
    },

    /// Show the execution history of a job
    History {
        /// Job name
        name: String,

        /// Show only the last N records
        #[arg(long)]
        last: Option<usize>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show one job record
    Show {
        /// Job record id
        id: String,
    },

    /// Enable job execution on the coordinator
    Enable,

    /// Disable job execution on the coordinator
    Disable,
}

/// Port used to reach the coordinator when `--port` is not given.
pub const DEFAULT_PORT: u16 = 8378;

impl Cli {
    /// Port of the coordinator the client commands talk to.
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }
}

/// Build the base URL for the coordinator HTTP API.
pub fn base_url(host: &str, port: u16) -> String {
    format!("http://{}:{}", host, port)
}

/// Format a connection error message for when the coordinator is not reachable.
pub fn connection_error_message(host: &str, port: u16) -> String {
    format!(
        "Could not connect to coordinator at {}:{}. Is it running? (try: jobstore start)",
        host, port
    )
}

/// Turn reqwest errors into a user-friendly message.
pub(crate) fn handle_request_error(err: reqwest::Error, host: &str, port: u16) -> anyhow::Error {
    if err.is_connect() || err.is_timeout() {
        anyhow::anyhow!("{}", connection_error_message(host, port))
    } else {
        anyhow::anyhow!("Request failed: {}", err)
    }
}

/// Pull the `message` out of an `{error, message}` body.
pub(crate) fn error_message(body: &Value) -> &str {
    body["message"].as_str().unwrap_or("Unknown error")
}

/// Dispatch the CLI command to the appropriate handler.
pub async fn dispatch(cli: &Cli) -> anyhow::Result<()> {
    match &cli.command {
        Some(Commands::Start {
            config,
            data_dir,
            host_name,
            disable_execution,
        }) => {
            daemon::cmd_start(
                config.as_deref(),
                data_dir.as_deref(),
                cli.port,
                host_name.as_deref(),
                *disable_execution,
                cli.verbose,
            )
            .await
        }
        Some(Commands::Status) => daemon::cmd_status(&cli.host, cli.port()).await,
        Some(Commands::Enable) => daemon::cmd_set_execution(&cli.host, cli.port(), true).await,
        Some(Commands::Disable) => daemon::cmd_set_execution(&cli.host, cli.port(), false).await,
        Some(Commands::Jobs { json }) => jobs::cmd_jobs(&cli.host, cli.port(), *json).await,
        Some(Commands::Constraints) => jobs::cmd_constraints(&cli.host, cli.port()).await,
        Some(Commands::Run { name, force }) => {
            jobs::cmd_run(&cli.host, cli.port(), name, *force).await
        }
        Some(Commands::Dequeue { name }) => jobs::cmd_dequeue(&cli.host, cli.port(), name).await,
        Some(Commands::History { name, last, json }) => {
            jobs::cmd_history(&cli.host, cli.port(), name, *last, *json).await
        }
        Some(Commands::Show { id }) => jobs::cmd_show(&cli.host, cli.port(), id).await,
        None => {
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
    }
}
