//! Config file discovery, layered loading, and environment variable overlay.

use crate::{ConfigError, PaceConfig};
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli).
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/pacewatch/config.toml");
    if system.exists() {
        files.push(system);
    }

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("pacewatch/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("pacewatch.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read `path` and apply every key it sets on top of `config`.
pub fn overlay_file(config: &mut PaceConfig, path: &Path) -> Result<(), ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    overlay_toml(config, &contents, path)
}

fn float(table: &toml::Table, key: &str) -> Option<f64> {
    table
        .get(key)
        .and_then(|v| v.as_float().or_else(|| v.as_integer().map(|i| i as f64)))
}

fn uint(table: &toml::Table, key: &str) -> Option<u64> {
    table
        .get(key)
        .and_then(|v| v.as_integer())
        .and_then(|i| u64::try_from(i).ok())
}

/// Narrow a TOML integer to the field's width, rejecting values that do not fit.
fn narrow<T: TryFrom<u64>>(key: &str, v: u64) -> Result<T, ConfigError> {
    T::try_from(v).map_err(|_| ConfigError::Invalid {
        key: key.to_string(),
        message: format!("{} is out of range", v),
    })
}

fn string(table: &toml::Table, key: &str) -> Option<String> {
    table.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

fn boolean(table: &toml::Table, key: &str) -> Option<bool> {
    table.get(key).and_then(|v| v.as_bool())
}

/// Apply a TOML document over `config`. Keys absent from the document are untouched.
fn overlay_toml(config: &mut PaceConfig, contents: &str, path: &Path) -> Result<(), ConfigError> {
    let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    if let Some(paths) = table.get("paths").and_then(|v| v.as_table()) {
        if let Some(v) = string(paths, "state_dir") {
            config.paths.state_dir = expand_path(&v);
        }
    }

    if let Some(telemetry) = table.get("telemetry").and_then(|v| v.as_table()) {
        if let Some(v) = string(telemetry, "log_level") {
            config.telemetry.log_level = v;
        }
    }

    if let Some(probe) = table.get("probe").and_then(|v| v.as_table()) {
        if let Some(v) = string(probe, "executable") {
            config.probe.executable = expand_path(&v);
        }
        if let Some(args) = probe.get("args").and_then(|v| v.as_array()) {
            config.probe.args = args
                .iter()
                .filter_map(|v| v.as_str())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = uint(probe, "heartbeat_interval_ms") {
            config.probe.heartbeat_interval_ms = v;
        }
        if let Some(v) = uint(probe, "max_missed_heartbeats") {
            config.probe.max_missed_heartbeats = narrow("probe.max_missed_heartbeats", v)?;
        }
        if let Some(v) = uint(probe, "process_ttl_ms") {
            config.probe.process_ttl_ms = v;
        }
        if let Some(v) = uint(probe, "bus_capacity") {
            config.probe.bus_capacity = narrow("probe.bus_capacity", v)?;
        }
        if let Some(v) = boolean(probe, "negotiate_schema") {
            config.probe.negotiate_schema = v;
        }
        if let Some(v) = boolean(probe, "pc_latency") {
            config.probe.pc_latency = v;
        }
    }

    if let Some(capture) = table.get("capture").and_then(|v| v.as_table()) {
        if let Some(v) = uint(capture, "drain_deadline_ms") {
            config.capture.drain_deadline_ms = v;
        }
        if let Some(v) = uint(capture, "countdown_tick_ms") {
            config.capture.countdown_tick_ms = v;
        }
        if let Some(v) = uint(capture, "fill_archive_len") {
            config.capture.fill_archive_len = narrow("capture.fill_archive_len", v)?;
        }
        if let Some(v) = uint(capture, "max_reconnects") {
            config.capture.max_reconnects = narrow("capture.max_reconnects", v)?;
        }
        if let Some(v) = uint(capture, "reconnect_backoff_ms") {
            config.capture.reconnect_backoff_ms = v;
        }
        if let Some(v) = uint(capture, "reconnect_backoff_max_ms") {
            config.capture.reconnect_backoff_max_ms = v;
        }
        if let Some(v) = boolean(capture, "auto_disable_overlay") {
            config.capture.auto_disable_overlay = v;
        }
    }

    if let Some(stats) = table.get("statistics").and_then(|v| v.as_table()) {
        if let Some(v) = float(stats, "stuttering_factor") {
            config.statistics.stuttering_factor = v;
        }
        if let Some(v) = float(stats, "low_fps_threshold") {
            config.statistics.low_fps_threshold = v;
        }
        if let Some(v) = float(stats, "live_window_secs") {
            config.statistics.live_window_secs = v;
        }
        if let Some(v) = uint(stats, "rounding_digits") {
            config.statistics.rounding_digits = narrow("statistics.rounding_digits", v)?;
        }
        if let Some(v) = float(stats, "interval_average_window_ms") {
            config.statistics.interval_average_window_ms = v;
        }
        if let Some(v) = string(stats, "outlier_method") {
            config.statistics.outlier_method = v;
        }
    }

    Ok(())
}

/// Apply environment variable overrides to config.
///
/// `env` is a lookup so tests can supply variables without touching the process env.
pub fn apply_env_overrides<F>(config: &mut PaceConfig, sources: &mut ConfigSources, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    let mut hit = |key: &str| sources.env_overrides.push(key.to_string());

    if let Some(v) = env("PACEWATCH_STATE_DIR") {
        config.paths.state_dir = expand_path(&v);
        hit("PACEWATCH_STATE_DIR");
    }
    if let Some(v) = env("PACEWATCH_PROBE") {
        config.probe.executable = expand_path(&v);
        hit("PACEWATCH_PROBE");
    }
    if let Some(v) = env("PACEWATCH_LOG_LEVEL") {
        config.telemetry.log_level = v;
        hit("PACEWATCH_LOG_LEVEL");
    }
    if let Some(v) = env("RUST_LOG") {
        config.telemetry.log_level = v;
        hit("RUST_LOG");
    }
    if let Some(v) = env("PACEWATCH_DRAIN_DEADLINE_MS").and_then(|v| v.parse().ok()) {
        config.capture.drain_deadline_ms = v;
        hit("PACEWATCH_DRAIN_DEADLINE_MS");
    }
    if let Some(v) = env("PACEWATCH_MAX_RECONNECTS").and_then(|v| v.parse().ok()) {
        config.capture.max_reconnects = v;
        hit("PACEWATCH_MAX_RECONNECTS");
    }
    if let Some(v) = env("PACEWATCH_STUTTERING_FACTOR").and_then(|v| v.parse().ok()) {
        config.statistics.stuttering_factor = v;
        hit("PACEWATCH_STUTTERING_FACTOR");
    }
    if let Some(v) = env("PACEWATCH_LOW_FPS_THRESHOLD").and_then(|v| v.parse().ok()) {
        config.statistics.low_fps_threshold = v;
        hit("PACEWATCH_LOW_FPS_THRESHOLD");
    }
    if let Some(v) = env("PACEWATCH_LIVE_WINDOW_SECS").and_then(|v| v.parse().ok()) {
        config.statistics.live_window_secs = v;
        hit("PACEWATCH_LIVE_WINDOW_SECS");
    }
    if let Some(v) = env("PACEWATCH_OUTLIER_METHOD") {
        config.statistics.outlier_method = v;
        hit("PACEWATCH_OUTLIER_METHOD");
    }
}

/// Expand ~ and environment variables in a path.
pub fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        directories::BaseDirs::new()
            .map(|d| d.home_dir().join(stripped))
            .unwrap_or_else(|| PathBuf::from(path))
    } else if let Some(stripped) = path.strip_prefix('$') {
        // $VAR or $VAR/rest/of/path
        let (var_name, rest) = match stripped.find('/') {
            Some(pos) => (&stripped[..pos], Some(&stripped[pos + 1..])),
            None => (stripped, None),
        };
        match (std::env::var(var_name), rest) {
            (Ok(value), Some(rest)) => PathBuf::from(value).join(rest),
            (Ok(value), None) => PathBuf::from(value),
            (Err(_), _) => PathBuf::from(path),
        }
    } else {
        PathBuf::from(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_path_tilde() {
        let expanded = expand_path("~/captures");
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert!(expanded.to_string_lossy().ends_with("captures"));
    }

    #[test]
    fn test_expand_path_absolute() {
        assert_eq!(expand_path("/opt/presentmon"), PathBuf::from("/opt/presentmon"));
    }

    #[test]
    fn test_overlay_leaves_other_sections_alone() {
        let mut config = PaceConfig::default();
        overlay_toml(
            &mut config,
            "[statistics]\nlive_window_secs = 30\n",
            Path::new("test.toml"),
        )
        .unwrap();

        assert_eq!(config.statistics.live_window_secs, 30.0);
        assert_eq!(config.statistics.stuttering_factor, 2.5);
        assert_eq!(config.capture.drain_deadline_ms, 2500);
    }

    #[test]
    fn test_overlay_full_document() {
        let toml = r#"
[paths]
state_dir = "/data/pacewatch"

[telemetry]
log_level = "debug"

[probe]
executable = "/opt/probe/PresentMon"
args = ["-output_stdout"]
heartbeat_interval_ms = 250
pc_latency = true

[capture]
fill_archive_len = 1000
auto_disable_overlay = true

[statistics]
outlier_method = "iqr"
rounding_digits = 3
"#;
        let mut config = PaceConfig::default();
        overlay_toml(&mut config, toml, Path::new("test.toml")).unwrap();

        assert_eq!(config.paths.state_dir, PathBuf::from("/data/pacewatch"));
        assert_eq!(config.telemetry.log_level, "debug");
        assert_eq!(config.probe.executable, PathBuf::from("/opt/probe/PresentMon"));
        assert_eq!(config.probe.args, vec!["-output_stdout".to_string()]);
        assert_eq!(config.probe.heartbeat_interval_ms, 250);
        assert!(config.probe.pc_latency);
        assert_eq!(config.capture.fill_archive_len, 1000);
        assert!(config.capture.auto_disable_overlay);
        assert_eq!(config.statistics.outlier_method, "iqr");
        assert_eq!(config.statistics.rounding_digits, 3);
    }

    #[test]
    fn test_parse_error_names_file() {
        let mut config = PaceConfig::default();
        let err = overlay_toml(&mut config, "[capture\n", Path::new("broken.toml")).unwrap_err();
        assert!(err.to_string().contains("broken.toml"));
    }

    #[test]
    fn test_oversized_integers_rejected() {
        for (doc, key) in [
            ("[probe]\nmax_missed_heartbeats = 4294967297\n", "probe.max_missed_heartbeats"),
            ("[capture]\nmax_reconnects = 4294967296\n", "capture.max_reconnects"),
            ("[statistics]\nrounding_digits = 4294967298\n", "statistics.rounding_digits"),
        ] {
            let mut config = PaceConfig::default();
            let err = overlay_toml(&mut config, doc, Path::new("test.toml")).unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid { key: ref k, .. } if k == key),
                "{key}: {err}"
            );
        }

        let mut config = PaceConfig::default();
        let mut sources = ConfigSources::default();
        apply_env_overrides(&mut config, &mut sources, |key| match key {
            "PACEWATCH_MAX_RECONNECTS" => Some("4294967297".to_string()),
            _ => None,
        });
        assert_eq!(config.capture.max_reconnects, 3);
    }

    #[test]
    fn test_unparseable_env_value_ignored() {
        let mut config = PaceConfig::default();
        let mut sources = ConfigSources::default();
        apply_env_overrides(&mut config, &mut sources, |key| match key {
            "PACEWATCH_MAX_RECONNECTS" => Some("lots".to_string()),
            _ => None,
        });
        assert_eq!(config.capture.max_reconnects, 3);
        assert!(sources.env_overrides.is_empty());
    }
}
