//! Probe lifecycle: open the line source, run the reader and heartbeat
//! tasks, and expose what they learn.

pub mod heartbeat;
pub mod processes;
mod reader;
pub mod source;

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::bus::{FrameBus, FrameReceiver};
use crate::schema::ProbeSchema;

pub use heartbeat::{spawn_heartbeat_task, HeartbeatConfig, ProducerHealth, ProducerState};
pub use processes::{ObservedProcess, ProcessRegistry};
pub use source::{ChannelSource, LineSource, LineStream, ProcessSource};

use reader::Reader;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("telemetry producer already running")]
    AlreadyRunning,

    #[error("failed to open probe output from {source_name}: {message}")]
    Open {
        source_name: String,
        message: String,
    },
}

#[derive(Debug, Clone)]
pub struct ProbeSettings {
    pub schema: ProbeSchema,
    pub negotiate_schema: bool,
    pub heartbeat: HeartbeatConfig,
    pub bus_capacity: usize,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            schema: ProbeSchema::default(),
            negotiate_schema: true,
            heartbeat: HeartbeatConfig::default(),
            bus_capacity: 8192,
        }
    }
}

impl From<&paceconf::ProbeConfig> for ProbeSettings {
    fn from(config: &paceconf::ProbeConfig) -> Self {
        Self {
            schema: ProbeSchema::presentmon(config.pc_latency),
            negotiate_schema: config.negotiate_schema,
            heartbeat: HeartbeatConfig::from(config),
            bus_capacity: config.bus_capacity,
        }
    }
}

struct RunHandle {
    cancel: CancellationToken,
    reader: JoinHandle<()>,
    heartbeat: JoinHandle<()>,
}

/// Owns the probe and its two tasks. The bus, health, and process registry
/// outlive restarts, so subscribers keep their handles across them.
pub struct ProbeService {
    source: Arc<dyn LineSource>,
    settings: ProbeSettings,
    bus: FrameBus,
    health: Arc<ProducerHealth>,
    registry: Arc<ProcessRegistry>,
    run: Mutex<Option<RunHandle>>,
}

impl ProbeService {
    pub fn new(source: Arc<dyn LineSource>, settings: ProbeSettings) -> Self {
        let bus = FrameBus::new(settings.bus_capacity);
        Self {
            source,
            settings,
            bus,
            health: Arc::new(ProducerHealth::new()),
            registry: Arc::new(ProcessRegistry::new()),
            run: Mutex::new(None),
        }
    }

    pub async fn start(&self) -> Result<(), ProbeError> {
        let mut run = self.run.lock().await;
        if run.is_some() {
            if self.health.state() != ProducerState::Terminated {
                return Err(ProbeError::AlreadyRunning);
            }
            if let Some(old) = run.take() {
                Self::shutdown(old).await;
            }
        }

        self.health.set_state(ProducerState::Starting);
        self.health.rearm();
        let stream = match self.source.open().await {
            Ok(stream) => stream,
            Err(e) => {
                self.health.set_state(ProducerState::Stopped);
                return Err(ProbeError::Open {
                    source_name: self.source.describe(),
                    message: format!("{:#}", e),
                });
            }
        };

        let cancel = CancellationToken::new();
        let reader = Reader {
            schema: self.settings.schema.clone(),
            negotiate_schema: self.settings.negotiate_schema,
            bus: self.bus.clone(),
            health: self.health.clone(),
            registry: self.registry.clone(),
        };
        self.health.set_state(ProducerState::Running);
        let reader = tokio::spawn(reader.run(stream, cancel.clone()));
        let heartbeat = spawn_heartbeat_task(
            self.health.clone(),
            self.registry.clone(),
            self.settings.heartbeat.clone(),
            cancel.clone(),
        );

        *run = Some(RunHandle {
            cancel,
            reader,
            heartbeat,
        });
        info!("probe started ({})", self.source.describe());
        Ok(())
    }

    pub async fn stop(&self) {
        let handle = self.run.lock().await.take();
        if let Some(handle) = handle {
            Self::shutdown(handle).await;
            info!("probe stopped");
        }
        self.health.set_state(ProducerState::Stopped);
    }

    pub async fn restart(&self) -> Result<(), ProbeError> {
        debug!("restarting probe");
        self.stop().await;
        self.start().await
    }

    async fn shutdown(handle: RunHandle) {
        handle.cancel.cancel();
        if let Err(e) = handle.reader.await {
            debug!("reader task join failed: {}", e);
        }
        if let Err(e) = handle.heartbeat.await {
            debug!("heartbeat task join failed: {}", e);
        }
    }

    /// Running or stale. A stale producer may still recover.
    pub fn is_running(&self) -> bool {
        matches!(
            self.health.state(),
            ProducerState::Running | ProducerState::Stale
        )
    }

    pub fn state(&self) -> ProducerState {
        self.health.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ProducerState> {
        self.health.watch()
    }

    pub fn bus(&self) -> &FrameBus {
        &self.bus
    }

    pub fn subscribe(&self) -> FrameReceiver {
        self.bus.subscribe()
    }

    pub fn processes(&self) -> Arc<ProcessRegistry> {
        self.registry.clone()
    }

    pub fn health(&self) -> Arc<ProducerHealth> {
        self.health.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::tests::presentmon_line;

    fn service(source: Arc<ChannelSource>) -> ProbeService {
        ProbeService::new(source, ProbeSettings::default())
    }

    #[tokio::test]
    async fn test_start_publishes_frames() {
        let source = Arc::new(ChannelSource::new());
        let tx = source.connection();
        let probe = service(source.clone());
        let mut rx = probe.subscribe();

        probe.start().await.unwrap();
        assert!(probe.is_running());

        tx.send(presentmon_line("game.exe", 5, 100.0, 16.0)).unwrap();
        let got = rx.recv().await.unwrap();
        assert_eq!(got.pid, 5);
        assert!(probe.processes().contains("game", 5));

        probe.stop().await;
        assert_eq!(probe.state(), ProducerState::Stopped);
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let source = Arc::new(ChannelSource::new());
        let _tx = source.connection();
        let probe = service(source);
        probe.start().await.unwrap();
        assert!(matches!(probe.start().await, Err(ProbeError::AlreadyRunning)));
        probe.stop().await;
    }

    #[tokio::test]
    async fn test_open_failure_leaves_stopped() {
        let probe = service(Arc::new(ChannelSource::new()));
        let err = probe.start().await.unwrap_err();
        assert!(matches!(err, ProbeError::Open { .. }));
        assert_eq!(probe.state(), ProducerState::Stopped);
    }

    #[tokio::test]
    async fn test_restart_after_termination() {
        let source = Arc::new(ChannelSource::new());
        let first = source.connection();
        let second = source.connection();
        let probe = service(source);
        let mut state = probe.watch_state();
        let mut rx = probe.subscribe();

        probe.start().await.unwrap();
        drop(first);
        state
            .wait_for(|s| *s == ProducerState::Terminated)
            .await
            .unwrap();

        probe.start().await.unwrap();
        second.send(presentmon_line("game.exe", 9, 0.0, 8.0)).unwrap();
        assert_eq!(rx.recv().await.unwrap().pid, 9);
        probe.stop().await;
    }
}
