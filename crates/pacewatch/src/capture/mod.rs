//! Capture lifecycle: arming ingestion, owning session boundaries, and
//! handing sealed sessions to the persistence collaborator.

pub mod archive;
pub mod options;
pub mod orchestrator;
pub mod replay;
pub mod report;
pub mod session;
pub mod sink;
pub mod status;

use std::time::Duration;

use thiserror::Error;

pub use archive::FillArchive;
pub use options::{CaptureFileMode, CaptureOptions, CaptureTarget};
pub use orchestrator::{CaptureOrchestrator, StartOutcome, StopOutcome};
pub use replay::{sessions_from_log, ReplayedLog};
pub use report::{SessionReport, ThresholdShare};
pub use session::Session;
pub use sink::{MemorySink, NoOverlay, OverlayControl, OverlayFlag, ReportSink, SessionSink};
pub use status::{CaptureStatus, StatusUpdate};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("invalid capture options: {0}")]
    Configuration(String),

    #[error("a capture is already in progress")]
    AlreadyCapturing,

    #[error("no capture in progress")]
    NotCapturing,

    #[error("process {name} ({pid}) is not reporting frames")]
    ProcessNotFound { name: String, pid: u32 },

    #[error("telemetry producer is not running")]
    ServiceNotRunning,

    #[error("telemetry producer failed after {attempts} restart attempts: {reason}")]
    ProducerCrash { attempts: u32, reason: String },
}

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    /// How long stop keeps appending in-flight frames.
    pub drain_deadline: Duration,
    pub countdown_tick: Duration,
    pub fill_archive_len: usize,
    pub max_reconnects: u32,
    pub reconnect_backoff: Duration,
    pub reconnect_backoff_max: Duration,
    pub auto_disable_overlay: bool,
}

impl CaptureSettings {
    /// attempt n waits min(base * 2^(n-1), max); attempt 0 does not wait.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let multiplier = 2u32.saturating_pow(attempt - 1);
        let delay = self.reconnect_backoff.saturating_mul(multiplier);
        std::cmp::min(delay, self.reconnect_backoff_max)
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self::from(&paceconf::CaptureConfig::default())
    }
}

impl From<&paceconf::CaptureConfig> for CaptureSettings {
    fn from(config: &paceconf::CaptureConfig) -> Self {
        Self {
            drain_deadline: Duration::from_millis(config.drain_deadline_ms),
            countdown_tick: Duration::from_millis(config.countdown_tick_ms),
            fill_archive_len: config.fill_archive_len,
            max_reconnects: config.max_reconnects,
            reconnect_backoff: Duration::from_millis(config.reconnect_backoff_ms),
            reconnect_backoff_max: Duration::from_millis(config.reconnect_backoff_max_ms),
            auto_disable_overlay: config.auto_disable_overlay,
        }
    }
}
