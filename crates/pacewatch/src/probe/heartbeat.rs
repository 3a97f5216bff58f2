//! Liveness tracking for the probe's output stream.
//!
//! The reader marks every line it sees. Once per interval the heartbeat task
//! checks the mark; a run of silent intervals flags the producer stale. Lines
//! arriving again bring a stale producer back to running.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::processes::ProcessRegistry;

/// Producer lifecycle as seen from this side of the pipe.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerState {
    Stopped = 0,
    Starting = 1,
    /// Lines are arriving.
    Running = 2,
    /// Too many heartbeats passed without a line.
    Stale = 3,
    /// The output stream ended or failed.
    Terminated = 4,
}

impl ProducerState {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => ProducerState::Stopped,
            1 => ProducerState::Starting,
            2 => ProducerState::Running,
            3 => ProducerState::Stale,
            _ => ProducerState::Terminated,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProducerState::Stopped => "stopped",
            ProducerState::Starting => "starting",
            ProducerState::Running => "running",
            ProducerState::Stale => "stale",
            ProducerState::Terminated => "terminated",
        }
    }

    /// Stale or terminated.
    pub fn is_failed(&self) -> bool {
        matches!(self, ProducerState::Stale | ProducerState::Terminated)
    }
}

impl std::fmt::Display for ProducerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    pub interval: Duration,
    /// Consecutive silent intervals before the producer is stale.
    pub max_missed: u32,
    /// Observed processes silent this long are pruned on each tick.
    pub process_ttl: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_missed: 5,
            process_ttl: Duration::from_secs(3),
        }
    }
}

impl From<&paceconf::ProbeConfig> for HeartbeatConfig {
    fn from(config: &paceconf::ProbeConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.heartbeat_interval_ms),
            max_missed: config.max_missed_heartbeats,
            process_ttl: Duration::from_millis(config.process_ttl_ms),
        }
    }
}

/// Counters are atomics so status reads never contend with the reader.
pub struct ProducerHealth {
    state: watch::Sender<ProducerState>,
    line_seen: AtomicBool,
    consecutive_misses: AtomicU32,
    lines: AtomicU64,
    parse_failures: AtomicU64,
}

impl ProducerHealth {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ProducerState::Stopped);
        Self {
            state,
            line_seen: AtomicBool::new(false),
            consecutive_misses: AtomicU32::new(0),
            lines: AtomicU64::new(0),
            parse_failures: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> ProducerState {
        *self.state.borrow()
    }

    /// Set state and return the previous one.
    pub fn set_state(&self, state: ProducerState) -> ProducerState {
        self.state.send_replace(state)
    }

    pub fn watch(&self) -> watch::Receiver<ProducerState> {
        self.state.subscribe()
    }

    pub fn record_line(&self) {
        self.lines.fetch_add(1, Ordering::Relaxed);
        self.line_seen.store(true, Ordering::Relaxed);
        if self.state() == ProducerState::Stale {
            self.consecutive_misses.store(0, Ordering::Relaxed);
            self.set_state(ProducerState::Running);
            info!("probe output resumed");
        }
    }

    pub fn record_parse_failure(&self) {
        self.parse_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Consume the line mark for one interval. Returns the current miss run.
    pub fn tick(&self) -> u32 {
        if self.line_seen.swap(false, Ordering::Relaxed) {
            self.consecutive_misses.store(0, Ordering::Relaxed);
            0
        } else {
            self.consecutive_misses.fetch_add(1, Ordering::Relaxed) + 1
        }
    }

    pub fn missed(&self) -> u32 {
        self.consecutive_misses.load(Ordering::Relaxed)
    }

    pub fn lines(&self) -> u64 {
        self.lines.load(Ordering::Relaxed)
    }

    pub fn parse_failures(&self) -> u64 {
        self.parse_failures.load(Ordering::Relaxed)
    }

    /// Clear the miss run and line mark ahead of a fresh start.
    pub fn rearm(&self) {
        self.line_seen.store(false, Ordering::Relaxed);
        self.consecutive_misses.store(0, Ordering::Relaxed);
    }

    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "state": self.state().as_str(),
            "lines": self.lines(),
            "parse_failures": self.parse_failures(),
            "consecutive_missed_heartbeats": self.missed(),
        })
    }
}

impl Default for ProducerHealth {
    fn default() -> Self {
        Self::new()
    }
}

pub fn spawn_heartbeat_task(
    health: Arc<ProducerHealth>,
    registry: Arc<ProcessRegistry>,
    config: HeartbeatConfig,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // first tick completes immediately
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let missed = health.tick();
                    if missed > 0 {
                        debug!("probe heartbeat missed ({}/{})", missed, config.max_missed);
                    }
                    if missed >= config.max_missed && health.state() == ProducerState::Running {
                        health.set_state(ProducerState::Stale);
                        warn!("probe marked stale after {} silent heartbeats", missed);
                    }
                    registry.prune(config.process_ttl);
                }
                _ = cancel.cancelled() => {
                    debug!("heartbeat task shutting down");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_roundtrip_through_u8() {
        for state in [
            ProducerState::Stopped,
            ProducerState::Starting,
            ProducerState::Running,
            ProducerState::Stale,
            ProducerState::Terminated,
        ] {
            assert_eq!(ProducerState::from_u8(state as u8), state);
        }
        assert_eq!(ProducerState::Stale.to_string(), "stale");
    }

    #[test]
    fn test_tick_counts_silent_intervals() {
        let health = ProducerHealth::new();
        assert_eq!(health.tick(), 1);
        assert_eq!(health.tick(), 2);
        health.record_line();
        assert_eq!(health.tick(), 0);
        assert_eq!(health.lines(), 1);
    }

    #[test]
    fn test_line_revives_stale_producer() {
        let health = ProducerHealth::new();
        health.set_state(ProducerState::Stale);
        health.record_line();
        assert_eq!(health.state(), ProducerState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_marks_stale() {
        let health = Arc::new(ProducerHealth::new());
        health.set_state(ProducerState::Running);
        let mut watch = health.watch();
        let cancel = CancellationToken::new();
        let config = HeartbeatConfig {
            interval: Duration::from_millis(100),
            max_missed: 3,
            process_ttl: Duration::from_secs(3),
        };

        let task = spawn_heartbeat_task(
            health.clone(),
            Arc::new(ProcessRegistry::new()),
            config,
            cancel.clone(),
        );

        watch
            .wait_for(|s| *s == ProducerState::Stale)
            .await
            .unwrap();
        assert!(health.missed() >= 3);

        cancel.cancel();
        task.await.unwrap();
    }
}
