//! The capture state machine.
//!
//! `Idle -> DelayCountdown -> Capturing -> Processing -> Idle`, with `Error`
//! reachable from a running capture when the producer fails. Commands are
//! serialised through one async mutex around the phase. The ingest task never
//! takes that lock: stop holds it while waiting for the drain, and producer
//! failures are handled from a separately spawned task.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::stream::Stream;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::archive::FillArchive;
use super::options::CaptureOptions;
use super::session::Session;
use super::sink::{OverlayControl, SessionSink};
use super::status::{CaptureStatus, StatusUpdate};
use super::{CaptureError, CaptureSettings};
use crate::bus::FrameReceiver;
use crate::frame::FrameSample;
use crate::online::OnlineMetricState;
use crate::probe::{ProbeService, ProducerState};
use crate::stats::Metric;

const STATUS_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started { session_id: Uuid },
    /// Stopped during the delay countdown.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    CountdownCancelled,
    HandedOff { session_id: Uuid, frames: usize },
    /// Nothing survived sealing; no session was handed off.
    Discarded { session_id: Uuid },
}

type SharedSession = Arc<StdMutex<Session>>;

fn lock_session(session: &SharedSession) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

struct ActiveCapture {
    session_id: Uuid,
    session: SharedSession,
    options: CaptureOptions,
    /// Switches the ingest task into draining.
    stop: CancellationToken,
    timer: CancellationToken,
    ingest: JoinHandle<()>,
    restore_overlay: bool,
    started_at: Instant,
}

enum Phase {
    Idle,
    DelayCountdown { cancel: CancellationToken },
    Capturing(ActiveCapture),
    Processing,
    Error { attempts: u32, reason: String },
}

impl Phase {
    fn status(&self) -> CaptureStatus {
        match self {
            Phase::Idle => CaptureStatus::Idle,
            Phase::DelayCountdown { .. } => CaptureStatus::DelayCountdown,
            Phase::Capturing(active) if active.options.remote => CaptureStatus::StartedRemote,
            Phase::Capturing(active) if active.options.is_timed() => CaptureStatus::StartedTimer,
            Phase::Capturing(_) => CaptureStatus::Started,
            Phase::Processing => CaptureStatus::Processing,
            Phase::Error { .. } => CaptureStatus::Error,
        }
    }
}

struct Inner {
    probe: Arc<ProbeService>,
    online: Arc<OnlineMetricState>,
    sink: Arc<dyn SessionSink>,
    overlay: Arc<dyn OverlayControl>,
    settings: CaptureSettings,
    archive: Arc<FillArchive>,
    archive_task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
    phase: Mutex<Phase>,
    status: broadcast::Sender<StatusUpdate>,
}

#[derive(Clone)]
pub struct CaptureOrchestrator {
    inner: Arc<Inner>,
}

impl CaptureOrchestrator {
    pub fn new(
        probe: Arc<ProbeService>,
        online: Arc<OnlineMetricState>,
        sink: Arc<dyn SessionSink>,
        overlay: Arc<dyn OverlayControl>,
        settings: CaptureSettings,
    ) -> Self {
        let capacity = NonZeroUsize::new(settings.fill_archive_len).unwrap_or(NonZeroUsize::MIN);
        let (status, _) = broadcast::channel(STATUS_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                probe,
                online,
                sink,
                overlay,
                settings,
                archive: Arc::new(FillArchive::new(capacity)),
                archive_task: Mutex::new(None),
                phase: Mutex::new(Phase::Idle),
                status,
            }),
        }
    }

    fn emit(&self, status: CaptureStatus, message: Option<String>) {
        let update = StatusUpdate::new(status, message);
        info!("capture status: {}", update);
        // nobody listening is fine
        let _ = self.inner.status.send(update);
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusUpdate> {
        self.inner.status.subscribe()
    }

    /// Status updates as a stream; gaps from a slow reader are skipped.
    pub fn status_stream(&self) -> impl Stream<Item = StatusUpdate> {
        BroadcastStream::new(self.inner.status.subscribe()).filter_map(|result| match result {
            Ok(update) => Some(update),
            Err(e) => {
                debug!("status stream gap: {}", e);
                None
            }
        })
    }

    pub async fn status(&self) -> CaptureStatus {
        self.inner.phase.lock().await.status()
    }

    pub fn online(&self) -> &Arc<OnlineMetricState> {
        &self.inner.online
    }

    pub fn archive(&self) -> &Arc<FillArchive> {
        &self.inner.archive
    }

    pub fn live_summary(&self, second: Metric, third: Metric) -> String {
        self.inner.online.live_summary(second, third)
    }

    /// Point the live metrics at a process without capturing it.
    pub fn track_process(&self, process_name: &str, pid: u32) {
        self.inner.online.track(process_name, pid);
    }

    /// Returns the target's name as the probe reports it.
    fn check_can_start(&self, phase: &Phase, options: &CaptureOptions) -> Result<String, CaptureError> {
        match phase {
            Phase::Idle => {}
            Phase::Error { attempts, reason } => {
                return Err(CaptureError::ProducerCrash {
                    attempts: *attempts,
                    reason: reason.clone(),
                })
            }
            Phase::DelayCountdown { .. } | Phase::Capturing(_) | Phase::Processing => {
                return Err(CaptureError::AlreadyCapturing)
            }
        }

        if self.inner.probe.state() != ProducerState::Running {
            return Err(CaptureError::ServiceNotRunning);
        }
        let target = &options.target;
        self.inner
            .probe
            .processes()
            .stored_name(&target.process_name, target.pid)
            .ok_or_else(|| CaptureError::ProcessNotFound {
                name: target.process_name.clone(),
                pid: target.pid,
            })
    }

    pub async fn start_capture(&self, mut options: CaptureOptions) -> Result<StartOutcome, CaptureError> {
        options.validate()?;

        let (delay, cancel) = {
            let mut phase = self.inner.phase.lock().await;
            options.target.process_name = self.check_can_start(&phase, &options)?;
            let Some(delay) = options.delay() else {
                let session_id = self.begin(&mut phase, options);
                return Ok(StartOutcome::Started { session_id });
            };
            let cancel = CancellationToken::new();
            *phase = Phase::DelayCountdown {
                cancel: cancel.clone(),
            };
            (delay, cancel)
        };

        self.emit(
            CaptureStatus::DelayCountdown,
            Some(format!("capture starts in {:.1} s", delay.as_secs_f64())),
        );
        if !self.countdown(delay, &cancel).await {
            return Ok(StartOutcome::Cancelled);
        }

        let mut phase = self.inner.phase.lock().await;
        if cancel.is_cancelled() || !matches!(*phase, Phase::DelayCountdown { .. }) {
            return Ok(StartOutcome::Cancelled);
        }
        *phase = Phase::Idle;
        match self.check_can_start(&phase, &options) {
            Ok(name) => options.target.process_name = name,
            Err(e) => {
                self.emit(CaptureStatus::Stopped, Some(e.to_string()));
                return Err(e);
            }
        }
        let session_id = self.begin(&mut phase, options);
        Ok(StartOutcome::Started { session_id })
    }

    /// Tick down `delay`, checking `cancel` every tick. False when cancelled.
    async fn countdown(&self, delay: Duration, cancel: &CancellationToken) -> bool {
        let deadline = Instant::now() + delay;
        let tick = self.inner.settings.countdown_tick.max(Duration::from_millis(1));
        loop {
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            let step = (deadline - now).min(tick);
            tokio::select! {
                _ = tokio::time::sleep(step) => {
                    debug!(remaining_ms = deadline.saturating_duration_since(Instant::now()).as_millis() as u64, "capture countdown");
                }
                _ = cancel.cancelled() => return false,
            }
        }
    }

    fn begin(&self, phase: &mut Phase, options: CaptureOptions) -> Uuid {
        let session = Session::new(&options);
        let session_id = session.id;
        let shared: SharedSession = Arc::new(StdMutex::new(session));
        let target = options.target.clone();

        let rx = self.inner.probe.bus().subscribe_pid(target.pid);
        let producer = self.inner.probe.watch_state();
        self.inner.online.track(&target.process_name, target.pid);

        let restore_overlay = self.inner.settings.auto_disable_overlay && self.inner.overlay.is_active();
        if restore_overlay {
            debug!("overlay disabled for capture");
            self.inner.overlay.set_active(false);
        }

        let stop = CancellationToken::new();
        let timer = CancellationToken::new();
        let ingest = tokio::spawn(self.clone().ingest(
            session_id,
            shared.clone(),
            rx,
            producer,
            stop.clone(),
        ));
        if let Some(duration) = options.duration() {
            self.spawn_timer(session_id, duration, timer.clone());
        }

        let timed = options.duration();
        let remote = options.remote;
        *phase = Phase::Capturing(ActiveCapture {
            session_id,
            session: shared,
            options,
            stop,
            timer,
            ingest,
            restore_overlay,
            started_at: Instant::now(),
        });

        info!(session = %session_id, process = %target.process_name, pid = target.pid, "capture started");
        self.emit(
            CaptureStatus::Started,
            Some(format!("{} ({})", target.process_name, target.pid)),
        );
        if remote {
            self.emit(CaptureStatus::StartedRemote, None);
        } else if let Some(duration) = timed {
            self.emit(
                CaptureStatus::StartedTimer,
                Some(format!("capture time {:.1} s", duration.as_secs_f64())),
            );
        }
        session_id
    }

    fn spawn_timer(&self, session_id: Uuid, duration: Duration, cancel: CancellationToken) {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(duration) => {
                    debug!(session = %session_id, "capture time elapsed");
                    if let Err(e) = orchestrator.stop_capture().await {
                        debug!(session = %session_id, "timed stop skipped: {}", e);
                    }
                }
                _ = cancel.cancelled() => {}
            }
        });
    }

    async fn ingest(
        self,
        session_id: Uuid,
        session: SharedSession,
        mut rx: FrameReceiver,
        mut producer: watch::Receiver<ProducerState>,
        stop: CancellationToken,
    ) {
        let online = self.inner.online.clone();
        let admit = |sample: &FrameSample| {
            online.observe(sample);
            lock_session(&session).append(sample);
        };

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                frame = rx.recv() => match frame {
                    Some(sample) => admit(&sample),
                    None => {
                        self.spawn_failure(session_id, "frame bus closed".to_string());
                        return;
                    }
                },
                changed = producer.changed() => {
                    let state = *producer.borrow_and_update();
                    if changed.is_err() || state.is_failed() {
                        while let Some(sample) = rx.try_recv() {
                            admit(&sample);
                        }
                        self.spawn_failure(session_id, format!("telemetry producer {}", state));
                        return;
                    }
                }
            }
        }

        let deadline = Instant::now() + self.inner.settings.drain_deadline;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => break,
                frame = rx.recv() => match frame {
                    Some(sample) => admit(&sample),
                    None => break,
                },
            }
        }
        debug!(session = %session_id, lagged = rx.lagged(), "ingest drained");
    }

    /// Like [`stop_capture`](Self::stop_capture), but a capture that already
    /// ended (timer fired, nothing running) is `Ok(None)` rather than an error.
    pub async fn stop_if_capturing(&self) -> Result<Option<StopOutcome>, CaptureError> {
        match self.stop_capture().await {
            Ok(outcome) => Ok(Some(outcome)),
            Err(CaptureError::NotCapturing) => {
                debug!("stop requested after the capture finished");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn stop_capture(&self) -> Result<StopOutcome, CaptureError> {
        let mut phase = self.inner.phase.lock().await;
        match std::mem::replace(&mut *phase, Phase::Processing) {
            Phase::DelayCountdown { cancel } => {
                cancel.cancel();
                *phase = Phase::Idle;
                self.emit(CaptureStatus::Stopped, Some("countdown cancelled".to_string()));
                Ok(StopOutcome::CountdownCancelled)
            }
            Phase::Capturing(active) => {
                self.emit(CaptureStatus::Processing, None);
                active.timer.cancel();
                active.stop.cancel();
                let outcome = self.finish(active, false).await;
                *phase = Phase::Idle;
                self.emit(CaptureStatus::Stopped, None);
                Ok(outcome)
            }
            Phase::Error { attempts, reason } => {
                *phase = Phase::Error {
                    attempts,
                    reason: reason.clone(),
                };
                Err(CaptureError::ProducerCrash { attempts, reason })
            }
            other => {
                *phase = other;
                Err(CaptureError::NotCapturing)
            }
        }
    }

    /// Wait out the ingest task, seal, and hand off.
    async fn finish(&self, active: ActiveCapture, partial: bool) -> StopOutcome {
        if let Err(e) = active.ingest.await {
            warn!(session = %active.session_id, "ingest task failed: {}", e);
        }
        let mut session = Arc::try_unwrap(active.session)
            .map(|m| m.into_inner().unwrap_or_else(PoisonError::into_inner))
            .unwrap_or_else(|shared| lock_session(&shared).clone());

        session.partial = partial;
        let options = &active.options;
        if options.backfill_seconds > 0.0 {
            let archived = self.inner.archive.frames(session.pid);
            session.prepend_backfill(archived, options.backfill_seconds);
        }
        session.seal(options.is_timed().then_some(options.capture_time_seconds));

        if active.restore_overlay {
            self.inner.overlay.set_active(true);
        }

        let session_id = session.id;
        info!(
            session = %session_id,
            frames = session.len(),
            dropped = session.dropped_out_of_order,
            partial,
            elapsed_ms = active.started_at.elapsed().as_millis() as u64,
            "capture sealed"
        );
        if session.is_empty() {
            warn!(session = %session_id, "no frames captured, session discarded");
            return StopOutcome::Discarded { session_id };
        }

        let frames = session.len();
        if let Err(e) = self.inner.sink.persist(session).await {
            warn!(session = %session_id, "session hand-off failed: {:#}", e);
        }
        StopOutcome::HandedOff { session_id, frames }
    }

    fn spawn_failure(&self, session_id: Uuid, reason: String) {
        let orchestrator = self.clone();
        tokio::spawn(async move { orchestrator.producer_failed(session_id, reason).await });
    }

    async fn producer_failed(&self, session_id: Uuid, reason: String) {
        let active = {
            let mut phase = self.inner.phase.lock().await;
            match std::mem::replace(&mut *phase, Phase::Idle) {
                Phase::Capturing(active) if active.session_id == session_id => {
                    *phase = Phase::Error {
                        attempts: 0,
                        reason: reason.clone(),
                    };
                    active
                }
                other => {
                    *phase = other;
                    debug!(session = %session_id, "producer failure after capture ended: {}", reason);
                    return;
                }
            }
        };

        warn!(session = %session_id, "capture interrupted: {}", reason);
        self.emit(CaptureStatus::Error, Some(reason.clone()));
        active.timer.cancel();
        active.stop.cancel();
        self.finish(active, true).await;
        self.reconnect(reason).await;
    }

    async fn still_failed(&self) -> bool {
        matches!(*self.inner.phase.lock().await, Phase::Error { .. })
    }

    async fn reconnect(&self, mut reason: String) {
        let max = self.inner.settings.max_reconnects;
        for attempt in 1..=max {
            let delay = self.inner.settings.backoff_for_attempt(attempt);
            warn!("restarting telemetry producer in {:?} ({}/{})", delay, attempt, max);
            tokio::time::sleep(delay).await;
            if !self.still_failed().await {
                debug!("orchestrator reset, reconnect abandoned");
                return;
            }

            let result = self.inner.probe.restart().await;
            let mut phase = self.inner.phase.lock().await;
            if !matches!(*phase, Phase::Error { .. }) {
                debug!("orchestrator reset, reconnect abandoned");
                return;
            }
            match result {
                Ok(()) => {
                    *phase = Phase::Idle;
                    info!("telemetry producer restarted after {} attempt(s)", attempt);
                    self.emit(
                        CaptureStatus::Stopped,
                        Some("telemetry producer restarted".to_string()),
                    );
                    return;
                }
                Err(e) => {
                    reason = e.to_string();
                    *phase = Phase::Error {
                        attempts: attempt,
                        reason: reason.clone(),
                    };
                }
            }
        }

        warn!("giving up on telemetry producer after {} attempt(s): {}", max, reason);
        self.emit(
            CaptureStatus::Error,
            Some(format!("gave up after {} restart attempts: {}", max, reason)),
        );
    }

    /// Leave `Error` for `Idle`. False when there was nothing to reset.
    pub async fn reset(&self) -> bool {
        let mut phase = self.inner.phase.lock().await;
        if !matches!(*phase, Phase::Error { .. }) {
            return false;
        }
        *phase = Phase::Idle;
        self.emit(CaptureStatus::Idle, Some("reset".to_string()));
        true
    }

    /// Keep the most recent frames of every process for backfill.
    pub async fn start_fill_archive(&self) {
        let mut task = self.inner.archive_task.lock().await;
        if task.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        let handle = self
            .inner
            .archive
            .spawn_recorder(self.inner.probe.bus(), self.inner.probe.processes(), cancel.clone());
        *task = Some((cancel, handle));
        info!("fill archive started");
    }

    pub async fn stop_fill_archive(&self) {
        let task = self.inner.archive_task.lock().await.take();
        if let Some((cancel, handle)) = task {
            cancel.cancel();
            if let Err(e) = handle.await {
                debug!("fill archive task join failed: {}", e);
            }
            self.inner.archive.clear();
            info!("fill archive stopped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::sink::{MemorySink, NoOverlay};
    use crate::probe::{ChannelSource, ProbeSettings};
    use crate::stats::{FrametimeStatistics, StatisticsOptions};

    fn orchestrator(probe: Arc<ProbeService>) -> CaptureOrchestrator {
        let online = Arc::new(OnlineMetricState::new(
            FrametimeStatistics::new(StatisticsOptions::default()),
            20.0,
        ));
        CaptureOrchestrator::new(
            probe,
            online,
            Arc::new(MemorySink::new()),
            Arc::new(NoOverlay),
            CaptureSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_start_requires_running_producer() {
        let probe = Arc::new(ProbeService::new(
            Arc::new(ChannelSource::new()),
            ProbeSettings::default(),
        ));
        let orch = orchestrator(probe);
        let err = orch.start_capture(CaptureOptions::new("game", 1)).await.unwrap_err();
        assert_eq!(err, CaptureError::ServiceNotRunning);
        assert_eq!(orch.status().await, CaptureStatus::Idle);
    }

    #[tokio::test]
    async fn test_start_requires_observed_process() {
        let source = Arc::new(ChannelSource::new());
        let _tx = source.connection();
        let probe = Arc::new(ProbeService::new(source, ProbeSettings::default()));
        probe.start().await.unwrap();

        let orch = orchestrator(probe.clone());
        let err = orch.start_capture(CaptureOptions::new("game", 1)).await.unwrap_err();
        assert_eq!(
            err,
            CaptureError::ProcessNotFound {
                name: "game".to_string(),
                pid: 1
            }
        );
        probe.stop().await;
    }

    #[tokio::test]
    async fn test_invalid_options_rejected_first() {
        let probe = Arc::new(ProbeService::new(
            Arc::new(ChannelSource::new()),
            ProbeSettings::default(),
        ));
        let orch = orchestrator(probe);
        let err = orch
            .start_capture(CaptureOptions::new("game", 1).with_delay(-2.0))
            .await
            .unwrap_err();
        assert!(matches!(err, CaptureError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_stop_when_idle() {
        let probe = Arc::new(ProbeService::new(
            Arc::new(ChannelSource::new()),
            ProbeSettings::default(),
        ));
        let orch = orchestrator(probe);
        assert_eq!(orch.stop_capture().await, Err(CaptureError::NotCapturing));
        assert!(!orch.reset().await);
    }
}
