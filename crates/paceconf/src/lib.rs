//! Configuration loading for pacewatch.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/pacewatch/config.toml` (system)
//! 2. `~/.config/pacewatch/config.toml` (user)
//! 3. `./pacewatch.toml` (local override, or a `--config` path)
//! 4. Environment variables (`PACEWATCH_*`, `RUST_LOG`)
//!
//! Each file only overrides the keys it names; everything else keeps the
//! value from the previous layer.
//!
//! # Example Config
//!
//! ```toml
//! [paths]
//! state_dir = "~/.local/share/pacewatch"
//!
//! [telemetry]
//! log_level = "info"
//!
//! [probe]
//! executable = "PresentMon"
//! heartbeat_interval_ms = 1000
//! max_missed_heartbeats = 5
//!
//! [capture]
//! drain_deadline_ms = 2500
//! fill_archive_len = 500
//!
//! [statistics]
//! stuttering_factor = 2.5
//! live_window_secs = 20.0
//! outlier_method = "decipercentile"
//! ```

pub mod loader;
pub mod sections;

pub use loader::{discover_config_files_with_override, expand_path, ConfigSources};
pub use sections::{
    CaptureConfig, PathsConfig, ProbeConfig, StatisticsConfig, TelemetryConfig, MAX_LIVE_WINDOW_SECS,
};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

/// Complete pacewatch configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PaceConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub statistics: StatisticsConfig,
}

impl PaceConfig {
    /// Load configuration from all standard sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load with an explicit file replacing `./pacewatch.toml`.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and report which files and env vars contributed.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let files = loader::discover_config_files_with_override(config_path);
        Self::load_layers(&files, |key| std::env::var(key).ok())
    }

    /// Apply `files` in order over the defaults, then env overrides via `env`.
    pub fn load_layers<F>(files: &[PathBuf], env: F) -> Result<(Self, ConfigSources), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut sources = ConfigSources::default();
        let mut config = PaceConfig::default();

        for path in files {
            loader::overlay_file(&mut config, path)?;
            sources.files.push(path.clone());
        }

        loader::apply_env_overrides(&mut config, &mut sources, env);
        config.validate()?;

        Ok((config, sources))
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(key: &str, message: &str) -> ConfigError {
            ConfigError::Invalid {
                key: key.to_string(),
                message: message.to_string(),
            }
        }

        if self.probe.heartbeat_interval_ms == 0 {
            return Err(invalid("probe.heartbeat_interval_ms", "must be > 0"));
        }
        if self.probe.max_missed_heartbeats == 0 {
            return Err(invalid("probe.max_missed_heartbeats", "must be > 0"));
        }
        if self.probe.bus_capacity == 0 {
            return Err(invalid("probe.bus_capacity", "must be > 0"));
        }
        if self.capture.fill_archive_len == 0 {
            return Err(invalid("capture.fill_archive_len", "must be > 0"));
        }
        if self.capture.countdown_tick_ms == 0 {
            return Err(invalid("capture.countdown_tick_ms", "must be > 0"));
        }
        if self.capture.reconnect_backoff_max_ms < self.capture.reconnect_backoff_ms {
            return Err(invalid(
                "capture.reconnect_backoff_max_ms",
                "must be >= reconnect_backoff_ms",
            ));
        }
        if !(self.statistics.stuttering_factor > 0.0) {
            return Err(invalid("statistics.stuttering_factor", "must be > 0"));
        }
        let window = self.statistics.live_window_secs;
        if !(window > 0.0 && window <= MAX_LIVE_WINDOW_SECS) {
            return Err(invalid(
                "statistics.live_window_secs",
                &format!("must be > 0 and <= {}", MAX_LIVE_WINDOW_SECS),
            ));
        }
        if !(self.statistics.interval_average_window_ms > 0.0) {
            return Err(invalid("statistics.interval_average_window_ms", "must be > 0"));
        }
        if self.statistics.rounding_digits > 10 {
            return Err(invalid("statistics.rounding_digits", "must be <= 10"));
        }
        Ok(())
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# pacewatch configuration\n\n");

        output.push_str("[paths]\n");
        output.push_str(&format!("state_dir = \"{}\"\n", self.paths.state_dir.display()));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!("log_level = \"{}\"\n", self.telemetry.log_level));

        output.push_str("\n[probe]\n");
        output.push_str(&format!(
            "executable = \"{}\"\n",
            self.probe.executable.display()
        ));
        let args: Vec<String> = self.probe.args.iter().map(|a| format!("\"{}\"", a)).collect();
        output.push_str(&format!("args = [{}]\n", args.join(", ")));
        output.push_str(&format!(
            "heartbeat_interval_ms = {}\n",
            self.probe.heartbeat_interval_ms
        ));
        output.push_str(&format!(
            "max_missed_heartbeats = {}\n",
            self.probe.max_missed_heartbeats
        ));
        output.push_str(&format!("process_ttl_ms = {}\n", self.probe.process_ttl_ms));
        output.push_str(&format!("bus_capacity = {}\n", self.probe.bus_capacity));
        output.push_str(&format!("negotiate_schema = {}\n", self.probe.negotiate_schema));
        output.push_str(&format!("pc_latency = {}\n", self.probe.pc_latency));

        output.push_str("\n[capture]\n");
        output.push_str(&format!(
            "drain_deadline_ms = {}\n",
            self.capture.drain_deadline_ms
        ));
        output.push_str(&format!(
            "countdown_tick_ms = {}\n",
            self.capture.countdown_tick_ms
        ));
        output.push_str(&format!(
            "fill_archive_len = {}\n",
            self.capture.fill_archive_len
        ));
        output.push_str(&format!("max_reconnects = {}\n", self.capture.max_reconnects));
        output.push_str(&format!(
            "reconnect_backoff_ms = {}\n",
            self.capture.reconnect_backoff_ms
        ));
        output.push_str(&format!(
            "reconnect_backoff_max_ms = {}\n",
            self.capture.reconnect_backoff_max_ms
        ));
        output.push_str(&format!(
            "auto_disable_overlay = {}\n",
            self.capture.auto_disable_overlay
        ));

        output.push_str("\n[statistics]\n");
        output.push_str(&format!(
            "stuttering_factor = {:?}\n",
            self.statistics.stuttering_factor
        ));
        output.push_str(&format!(
            "low_fps_threshold = {:?}\n",
            self.statistics.low_fps_threshold
        ));
        output.push_str(&format!(
            "live_window_secs = {:?}\n",
            self.statistics.live_window_secs
        ));
        output.push_str(&format!(
            "rounding_digits = {}\n",
            self.statistics.rounding_digits
        ));
        output.push_str(&format!(
            "interval_average_window_ms = {:?}\n",
            self.statistics.interval_average_window_ms
        ));
        output.push_str(&format!(
            "outlier_method = \"{}\"\n",
            self.statistics.outlier_method
        ));

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_default_config() {
        let config = PaceConfig::default();
        assert_eq!(config.capture.drain_deadline_ms, 2500);
        assert_eq!(config.capture.fill_archive_len, 500);
        assert_eq!(config.statistics.stuttering_factor, 2.5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_to_toml_parses_back() {
        let mut config = PaceConfig::default();
        config.statistics.live_window_secs = 12.5;
        config.probe.pc_latency = true;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_toml().as_bytes()).unwrap();

        let (loaded, _) = PaceConfig::load_layers(&[file.path().to_path_buf()], no_env).unwrap();
        assert_eq!(loaded.statistics.live_window_secs, 12.5);
        assert!(loaded.probe.pc_latency);
        assert_eq!(loaded.probe.args, config.probe.args);
    }

    #[test]
    fn test_later_files_win_per_key() {
        let mut system = tempfile::NamedTempFile::new().unwrap();
        writeln!(system, "[capture]\ndrain_deadline_ms = 1000\nmax_reconnects = 7").unwrap();
        let mut local = tempfile::NamedTempFile::new().unwrap();
        writeln!(local, "[capture]\ndrain_deadline_ms = 4000").unwrap();

        let files = vec![system.path().to_path_buf(), local.path().to_path_buf()];
        let (config, sources) = PaceConfig::load_layers(&files, no_env).unwrap();

        assert_eq!(config.capture.drain_deadline_ms, 4000);
        assert_eq!(config.capture.max_reconnects, 7);
        assert_eq!(sources.files, files);
    }

    #[test]
    fn test_env_beats_files() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[statistics]\nstuttering_factor = 3.0").unwrap();

        let env = |key: &str| match key {
            "PACEWATCH_STUTTERING_FACTOR" => Some("4.5".to_string()),
            _ => None,
        };
        let (config, sources) =
            PaceConfig::load_layers(&[file.path().to_path_buf()], env).unwrap();

        assert_eq!(config.statistics.stuttering_factor, 4.5);
        assert_eq!(sources.env_overrides, vec!["PACEWATCH_STUTTERING_FACTOR"]);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[capture]\nfill_archive_len = 0").unwrap();

        let err = PaceConfig::load_layers(&[file.path().to_path_buf()], no_env).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "capture.fill_archive_len"));
    }

    #[test]
    fn test_live_window_bounded() {
        for bad in ["inf", "nan", "1e9", "600.5", "0.0"] {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            writeln!(file, "[statistics]\nlive_window_secs = {}", bad).unwrap();
            let err = PaceConfig::load_layers(&[file.path().to_path_buf()], no_env).unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid { ref key, .. } if key == "statistics.live_window_secs"),
                "{bad} accepted"
            );
        }

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[statistics]\nlive_window_secs = 600.0").unwrap();
        assert!(PaceConfig::load_layers(&[file.path().to_path_buf()], no_env).is_ok());
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = PaceConfig::load_layers(&[PathBuf::from("/nonexistent/pacewatch.toml")], no_env)
            .unwrap_err();
        assert!(matches!(err, ConfigError::FileRead { .. }));
    }
}
