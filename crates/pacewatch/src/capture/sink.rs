//! Collaborators the orchestrator hands results to.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::watch;
use tracing::info;

use super::report::SessionReport;
use super::session::Session;
use crate::stats::FrametimeStatistics;

/// Receives every sealed session, including partial ones.
#[async_trait]
pub trait SessionSink: Send + Sync {
    async fn persist(&self, session: Session) -> Result<()>;
}

/// Keeps sessions in memory.
#[derive(Debug)]
pub struct MemorySink {
    sessions: Mutex<Vec<Session>>,
    count: watch::Sender<usize>,
}

impl MemorySink {
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            sessions: Mutex::new(Vec::new()),
            count,
        }
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        *self.count.borrow()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until at least `n` sessions have arrived.
    pub async fn wait_for(&self, n: usize) -> Vec<Session> {
        let mut rx = self.count.subscribe();
        // the sender lives in self, so the channel cannot close while we wait
        let _ = rx.wait_for(|count| *count >= n).await;
        self.sessions()
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionSink for MemorySink {
    async fn persist(&self, session: Session) -> Result<()> {
        let len = {
            let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
            sessions.push(session);
            sessions.len()
        };
        self.count.send_replace(len);
        Ok(())
    }
}

/// Logs the session report, then passes the session on.
pub struct ReportSink {
    stats: FrametimeStatistics,
    inner: Arc<dyn SessionSink>,
}

impl ReportSink {
    pub fn new(stats: FrametimeStatistics, inner: Arc<dyn SessionSink>) -> Self {
        Self { stats, inner }
    }
}

#[async_trait]
impl SessionSink for ReportSink {
    async fn persist(&self, session: Session) -> Result<()> {
        let report = SessionReport::build(&session, &self.stats);
        info!(
            session = %report.id,
            process = %report.process_name,
            pid = report.pid,
            frames = report.frames,
            partial = report.partial,
            "session sealed"
        );
        for line in report.render().lines() {
            info!("{}", line);
        }
        self.inner.persist(session).await
    }
}

/// On-screen overlay the orchestrator may switch off while capturing.
pub trait OverlayControl: Send + Sync {
    fn is_active(&self) -> bool;
    fn set_active(&self, active: bool);
}

/// No overlay present.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOverlay;

impl OverlayControl for NoOverlay {
    fn is_active(&self) -> bool {
        false
    }

    fn set_active(&self, _active: bool) {}
}

/// Overlay state held in a flag, for hosts that render the overlay elsewhere.
#[derive(Debug, Default)]
pub struct OverlayFlag {
    active: AtomicBool,
}

impl OverlayFlag {
    pub fn new(active: bool) -> Self {
        Self {
            active: AtomicBool::new(active),
        }
    }
}

impl OverlayControl for OverlayFlag {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::StatisticsOptions;

    #[tokio::test]
    async fn test_memory_sink_collects() {
        let sink = MemorySink::new();
        assert!(sink.is_empty());
        sink.persist(Session::for_process("a", 1)).await.unwrap();
        sink.persist(Session::for_process("b", 2)).await.unwrap();
        let got = sink.wait_for(2).await;
        assert_eq!(got.len(), 2);
        assert_eq!(got[1].process_name, "b");
    }

    #[tokio::test]
    async fn test_report_sink_forwards() {
        let memory = Arc::new(MemorySink::new());
        let sink = ReportSink::new(
            FrametimeStatistics::new(StatisticsOptions::default()),
            memory.clone(),
        );
        sink.persist(Session::for_process("a", 1)).await.unwrap();
        assert_eq!(memory.len(), 1);
    }

    #[test]
    fn test_overlay_flag() {
        let overlay = OverlayFlag::new(true);
        overlay.set_active(false);
        assert!(!overlay.is_active());
        assert!(!NoOverlay.is_active());
    }
}
