use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::app::error::AppError;
use crate::app::models::JobStatus;

/// A job leased from the scheduling endpoint. `script == None` means no work.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Lease {
    pub job_id: Option<String>,
    pub script: Option<PathBuf>,
    pub kwargs: Map<String, Value>,
}

impl Lease {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Serials named by the lease; `serial` may be a string, a comma list, or an array.
    pub fn serials(&self) -> Vec<String> {
        let raw: Vec<String> = match self.kwargs.get("serial") {
            Some(Value::String(text)) => text.split(',').map(str::to_string).collect(),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        };
        raw.into_iter()
            .map(|serial| serial.trim().to_string())
            .filter(|serial| !serial.is_empty())
            .collect()
    }
}

pub trait LeaseClient: Send + Sync {
    fn lease_job(&self, hostname: &str, exclusive: bool) -> Result<Lease, AppError>;
    fn stop_heartbeat(&self, lease: &Lease, status: JobStatus, log_url: &str) -> Result<(), AppError>;
}

/// Stand-in used when no endpoint is configured: never has work.
pub struct NoLeaseClient;

impl LeaseClient for NoLeaseClient {
    fn lease_job(&self, _hostname: &str, _exclusive: bool) -> Result<Lease, AppError> {
        Ok(Lease::empty())
    }

    fn stop_heartbeat(&self, _lease: &Lease, _status: JobStatus, _log_url: &str) -> Result<(), AppError> {
        Ok(())
    }
}

#[derive(Serialize)]
struct LeaseRequest<'a> {
    hostname: &'a str,
    exclusive: bool,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct LeaseResponse {
    job_id: Option<String>,
    filepath: Option<String>,
    kwargs: Map<String, Value>,
}

#[derive(Serialize)]
struct HeartbeatRequest<'a> {
    job_id: Option<&'a str>,
    status: JobStatus,
    infra_log_url: &'a str,
}

pub struct HttpLeaseClient {
    endpoint: String,
    client: reqwest::blocking::Client,
}

impl HttpLeaseClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, AppError> {
        let endpoint = endpoint.trim().trim_end_matches('/');
        if endpoint.is_empty() {
            return Err(AppError::validation("VTI endpoint is empty", ""));
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| AppError::system(format!("Failed to build HTTP client: {err}"), ""))?;
        Ok(Self {
            endpoint: endpoint.to_string(),
            client,
        })
    }

    fn post<T: Serialize>(&self, path: &str, payload: &T) -> Result<String, AppError> {
        let url = format!("{}/{path}", self.endpoint);
        let response = self
            .client
            .post(&url)
            .json(payload)
            .send()
            .map_err(|err| AppError::dependency(format!("POST {url} failed: {err}"), ""))?;
        let status = response.status();
        let body = response
            .text()
            .map_err(|err| AppError::dependency(format!("POST {url} body: {err}"), ""))?;
        if !status.is_success() {
            return Err(AppError::dependency(
                format!("POST {url}: HTTP {status}: {}", body.trim()),
                "",
            ));
        }
        Ok(body)
    }
}

impl LeaseClient for HttpLeaseClient {
    fn lease_job(&self, hostname: &str, exclusive: bool) -> Result<Lease, AppError> {
        let body = match self.post("lease_job", &LeaseRequest { hostname, exclusive }) {
            Ok(body) => body,
            Err(err) => {
                // An unreachable endpoint is treated the same as "no job available".
                warn!(error = %err, "job lease request failed");
                return Ok(Lease::empty());
            }
        };
        let parsed: LeaseResponse = serde_json::from_str(&body).map_err(|err| {
            AppError::dependency(format!("Malformed lease response: {err}"), "")
        })?;
        Ok(lease_from_response(parsed))
    }

    fn stop_heartbeat(&self, lease: &Lease, status: JobStatus, log_url: &str) -> Result<(), AppError> {
        self.post(
            "stop_heartbeat",
            &HeartbeatRequest {
                job_id: lease.job_id.as_deref(),
                status,
                infra_log_url: log_url,
            },
        )?;
        info!(job_id = ?lease.job_id, status = %status, "heartbeat stopped");
        Ok(())
    }
}

fn lease_from_response(response: LeaseResponse) -> Lease {
    Lease {
        job_id: response.job_id.filter(|id| !id.trim().is_empty()),
        script: response
            .filepath
            .map(|path| path.trim().to_string())
            .filter(|path| !path.is_empty())
            .map(PathBuf::from),
        kwargs: response.kwargs,
    }
}
