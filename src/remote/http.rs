use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode, Url};

use crate::errors::RemoteJobError;
use crate::models::{RemoteJob, RemoteJobStatus};
use crate::remote::RemoteJobExecutor;

/// Remote executor reached over HTTP.
///
/// Start: `POST {base}/{name}` with `{"id", "parameters"}`; `201` with a
/// `Location` header is the job URI, `409` with `Location` means a job with
/// that id is already running there. Status: `GET {uri}`.
pub struct HttpRemoteJobExecutor {
    client: Client,
    base_url: Url,
}

impl HttpRemoteJobExecutor {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RemoteJobError> {
        // Trailing slash so Url::join appends instead of replacing the last segment
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalized).map_err(|e| {
            RemoteJobError::InvalidResponse(format!("Invalid remote executor URL '{}': {}", base_url, e))
        })?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn job_url(&self, name: &str) -> Result<Url, RemoteJobError> {
        self.base_url
            .join(name)
            .map_err(|e| RemoteJobError::InvalidResponse(format!("Invalid job name '{}': {}", name, e)))
    }

    fn location(&self, response: &reqwest::Response) -> Result<String, RemoteJobError> {
        let raw = response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                RemoteJobError::InvalidResponse(format!(
                    "{} response without Location header",
                    response.status()
                ))
            })?;
        // Relative locations are resolved against the executor base
        self.base_url
            .join(raw)
            .map(String::from)
            .map_err(|e| RemoteJobError::InvalidResponse(format!("Invalid Location '{}': {}", raw, e)))
    }
}

#[async_trait]
impl RemoteJobExecutor for HttpRemoteJobExecutor {
    async fn start_job(&self, job: &RemoteJob) -> Result<String, RemoteJobError> {
        let url = self.job_url(&job.name)?;
        tracing::debug!("Starting remote job '{}' ({}) at {}", job.name, job.id, url);

        let response = self.client.post(url).json(job).send().await?;
        match response.status() {
            StatusCode::CREATED => self.location(&response),
            StatusCode::CONFLICT => {
                let uri = self.location(&response)?;
                Err(RemoteJobError::AlreadyRunning { uri })
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(RemoteJobError::UnexpectedStatus {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }

    async fn get_status(&self, uri: &str) -> Result<RemoteJobStatus, RemoteJobError> {
        let response = self.client.get(uri).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(RemoteJobError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body).map_err(|e| {
            RemoteJobError::InvalidResponse(format!("Malformed status from {}: {}", uri, e))
        })
    }
}
