use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::CaptureError;

/// How the persistence collaborator should lay out the session on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureFileMode {
    #[default]
    Json,
    JsonCsv,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureTarget {
    pub process_name: String,
    pub pid: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureOptions {
    pub target: CaptureTarget,
    /// Zero means the capture runs until stopped.
    pub capture_time_seconds: f64,
    pub capture_delay_seconds: f64,
    /// Started and stopped by a remote trigger rather than a local hotkey.
    pub remote: bool,
    pub file_mode: CaptureFileMode,
    pub comment: Option<String>,
    /// Seconds of fill-archive history to prepend to the session.
    pub backfill_seconds: f64,
}

impl CaptureOptions {
    pub fn new(process_name: impl Into<String>, pid: u32) -> Self {
        Self {
            target: CaptureTarget {
                process_name: process_name.into(),
                pid,
            },
            capture_time_seconds: 0.0,
            capture_delay_seconds: 0.0,
            remote: false,
            file_mode: CaptureFileMode::default(),
            comment: None,
            backfill_seconds: 0.0,
        }
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.capture_time_seconds = seconds;
        self
    }

    pub fn with_delay(mut self, seconds: f64) -> Self {
        self.capture_delay_seconds = seconds;
        self
    }

    pub fn with_backfill(mut self, seconds: f64) -> Self {
        self.backfill_seconds = seconds;
        self
    }

    pub fn remote(mut self) -> Self {
        self.remote = true;
        self
    }

    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.target.process_name.trim().is_empty() {
            return Err(CaptureError::Configuration(
                "target process name is empty".to_string(),
            ));
        }
        for (name, value) in [
            ("capture_time_seconds", self.capture_time_seconds),
            ("capture_delay_seconds", self.capture_delay_seconds),
            ("backfill_seconds", self.backfill_seconds),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(CaptureError::Configuration(format!(
                    "{} must be a finite, non-negative number of seconds (got {})",
                    name, value
                )));
            }
        }
        Ok(())
    }

    pub fn is_timed(&self) -> bool {
        self.capture_time_seconds > 0.0
    }

    pub(crate) fn duration(&self) -> Option<Duration> {
        self.is_timed()
            .then(|| Duration::from_secs_f64(self.capture_time_seconds))
    }

    pub(crate) fn delay(&self) -> Option<Duration> {
        (self.capture_delay_seconds > 0.0)
            .then(|| Duration::from_secs_f64(self.capture_delay_seconds))
    }
}
