pub mod config;
pub mod job;
pub mod remote;

pub use config::{RemoteJobConfig, ServiceConfig};
pub use job::{JobInfo, NewJobInfo, ResultState, RunningState};
pub use remote::{RemoteJob, RemoteJobStatus, RemotePhase, RemoteResultState};
