use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle notifications emitted to collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureStatus {
    Idle,
    DelayCountdown,
    Started,
    StartedTimer,
    StartedRemote,
    Processing,
    Stopped,
    Error,
}

impl CaptureStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureStatus::Idle => "idle",
            CaptureStatus::DelayCountdown => "delay_countdown",
            CaptureStatus::Started => "started",
            CaptureStatus::StartedTimer => "started_timer",
            CaptureStatus::StartedRemote => "started_remote",
            CaptureStatus::Processing => "processing",
            CaptureStatus::Stopped => "stopped",
            CaptureStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for CaptureStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: CaptureStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub at: DateTime<Utc>,
}

impl StatusUpdate {
    pub fn new(status: CaptureStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            at: Utc::now(),
        }
    }
}

impl std::fmt::Display for StatusUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.status, message),
            None => write!(f, "{}", self.status),
        }
    }
}
