//! Config sections. Each maps to one `[table]` in the TOML file.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Upper bound for `statistics.live_window_secs`. The window preallocates
/// its sample ceiling, which grows linearly with the length.
pub const MAX_LIVE_WINDOW_SECS: f64 = 600.0;

/// Filesystem locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Where sealed session reports land.
    /// Default: ~/.local/share/pacewatch
    #[serde(default = "PathsConfig::default_state_dir")]
    pub state_dir: PathBuf,
}

impl PathsConfig {
    fn default_state_dir() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".local/share/pacewatch"))
            .unwrap_or_else(|| PathBuf::from(".local/share/pacewatch"))
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            state_dir: Self::default_state_dir(),
        }
    }
}

/// Logging setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Filter directive handed to `EnvFilter` when `RUST_LOG` is unset.
    /// Default: "info"
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

/// The external frame-pacing probe and the reader that drains it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Probe executable. Default: "PresentMon"
    pub executable: PathBuf,

    /// Arguments passed to the probe.
    pub args: Vec<String>,

    /// How often the heartbeat task checks for fresh lines.
    /// Default: 1000
    pub heartbeat_interval_ms: u64,

    /// Consecutive silent heartbeats before the producer is flagged stale.
    /// Default: 5
    pub max_missed_heartbeats: u32,

    /// Processes not seen for this long drop out of the observed set.
    /// Default: 3000
    pub process_ttl_ms: u64,

    /// Per-subscriber queue depth on the frame bus.
    /// Default: 8192
    pub bus_capacity: usize,

    /// Rebuild column indices from the probe's header line when one arrives.
    /// Default: true
    pub negotiate_schema: bool,

    /// Expect the 32-column layout with the PC latency column.
    /// Default: false
    pub pc_latency: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("PresentMon"),
            args: [
                "-stop_existing_session",
                "-output_stdout",
                "-qpc_time",
                "-dont_restart_as_admin",
                "-verbose",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            heartbeat_interval_ms: 1000,
            max_missed_heartbeats: 5,
            process_ttl_ms: 3000,
            bus_capacity: 8192,
            negotiate_schema: true,
            pc_latency: false,
        }
    }
}

/// Capture lifecycle tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// How long stop keeps appending in-flight frames.
    /// Default: 2500
    pub drain_deadline_ms: u64,

    /// Delay countdown granularity.
    /// Default: 1000
    pub countdown_tick_ms: u64,

    /// Frames kept per process in the fill archive.
    /// Default: 500
    pub fill_archive_len: usize,

    /// Probe restarts attempted after a crash before giving up.
    /// Default: 3
    pub max_reconnects: u32,

    /// First reconnect back-off; doubles per attempt.
    /// Default: 500
    pub reconnect_backoff_ms: u64,

    /// Back-off ceiling.
    /// Default: 8000
    pub reconnect_backoff_max_ms: u64,

    /// Turn the overlay off while capturing, restore it afterwards.
    /// Default: false
    pub auto_disable_overlay: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            drain_deadline_ms: 2500,
            countdown_tick_ms: 1000,
            fill_archive_len: 500,
            max_reconnects: 3,
            reconnect_backoff_ms: 500,
            reconnect_backoff_max_ms: 8000,
            auto_disable_overlay: false,
        }
    }
}

/// Statistics knobs shared by live and post-hoc analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticsConfig {
    /// A frame stutters when it exceeds this multiple of the moving average.
    /// Default: 2.5
    pub stuttering_factor: f64,

    /// FPS below which a non-stutter frame counts as low-FPS time.
    /// Default: 25.0
    pub low_fps_threshold: f64,

    /// Live metric window length in seconds, at most [`MAX_LIVE_WINDOW_SECS`].
    /// Default: 20.0
    pub live_window_secs: f64,

    /// Decimal places kept in reported metrics.
    /// Default: 2
    pub rounding_digits: u32,

    /// Window for the interval-average FPS series.
    /// Default: 500.0
    pub interval_average_window_ms: f64,

    /// One of: none, decipercentile, iqr, threesigma, twodotfivesigma.
    /// Default: "decipercentile"
    pub outlier_method: String,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            stuttering_factor: 2.5,
            low_fps_threshold: 25.0,
            live_window_secs: 20.0,
            rounding_digits: 2,
            interval_average_window_ms: 500.0,
            outlier_method: "decipercentile".to_string(),
        }
    }
}
