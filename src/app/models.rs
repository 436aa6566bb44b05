use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceSummary {
    pub serial: String,
    pub state: String,
    pub model: Option<String>,
    pub product: Option<String>,
    pub transport_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    #[default]
    Unknown,
    Ready,
    Use,
    Error,
}

impl DeviceState {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceState::Unknown => "unknown",
            DeviceState::Ready => "ready",
            DeviceState::Use => "use",
            DeviceState::Error => "error",
        }
    }

    /// States that own (or owned) the serial lock.
    pub fn holds_lock(self) -> bool {
        matches!(self, DeviceState::Use | DeviceState::Error)
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceState {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "unknown" => Ok(DeviceState::Unknown),
            "ready" => Ok(DeviceState::Ready),
            "use" => Ok(DeviceState::Use),
            "error" => Ok(DeviceState::Error),
            other => Err(format!(
                "invalid device state '{other}' (expected unknown|ready|use|error)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobStatus {
    #[serde(rename = "complete")]
    Complete,
    #[serde(rename = "infra-err")]
    InfraError,
    #[serde(rename = "bootup-err")]
    BootupError,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Complete => "complete",
            JobStatus::InfraError => "infra-err",
            JobStatus::BootupError => "bootup-err",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostCommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}
