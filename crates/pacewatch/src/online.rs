//! Live metrics over a rolling window of the tracked process.
//!
//! Two windows are kept: the metric window (configurable, default 20 s) and a
//! fixed 5 s window feeding the live stutter percentage. Both are cleared when
//! a sample from a different process arrives or when time goes backwards,
//! so statistics never blend two runs. The lock covers only window mutation
//! and snapshotting; statistics run on the copy.

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::frame::FrameSample;
use crate::ring_buffer::RingBuffer;
use crate::stats::{FrametimeStatistics, Metric};

/// Frames slower than this are treated as focus loss and not admitted.
pub const FOCUS_LOSS_CUTOFF_MS: f64 = 2000.0;

pub const STUTTER_WINDOW_SECS: f64 = 5.0;

/// Sample ceiling for a 20 s window; scaled linearly with the window length.
const SAMPLES_PER_20_SECS: f64 = 20_000.0;

pub const MAX_WINDOW_SECS: f64 = paceconf::MAX_LIVE_WINDOW_SECS;
const DEFAULT_WINDOW_SECS: f64 = 20.0;

/// Keep the window length within (0, MAX_WINDOW_SECS]; NaN falls back to the default.
fn bounded_window(window_secs: f64) -> f64 {
    let bounded = if window_secs.is_nan() {
        DEFAULT_WINDOW_SECS
    } else {
        window_secs.clamp(f64::MIN_POSITIVE, MAX_WINDOW_SECS)
    };
    if bounded != window_secs {
        warn!(requested = window_secs, used = bounded, "live window length out of range");
    }
    bounded
}

#[derive(Debug, Clone, Copy)]
struct TimedFrame {
    timestamp: f64,
    frame_time: f64,
}

struct Window {
    tracked: Option<(String, u32)>,
    last_timestamp: Option<f64>,
    window_secs: f64,
    metric: RingBuffer<TimedFrame>,
    stutter: RingBuffer<TimedFrame>,
}

fn ceiling_for(window_secs: f64) -> NonZeroUsize {
    let samples = (SAMPLES_PER_20_SECS * window_secs / 20.0).ceil() as usize;
    NonZeroUsize::new(samples).unwrap_or(NonZeroUsize::MIN)
}

impl Window {
    fn new(window_secs: f64) -> Self {
        let window_secs = bounded_window(window_secs);
        Self {
            tracked: None,
            last_timestamp: None,
            window_secs,
            metric: RingBuffer::with_capacity(ceiling_for(window_secs)),
            stutter: RingBuffer::with_capacity(ceiling_for(STUTTER_WINDOW_SECS)),
        }
    }

    fn reset(&mut self) {
        self.metric.clear();
        self.stutter.clear();
        self.last_timestamp = None;
    }
}

pub struct OnlineMetricState {
    stats: FrametimeStatistics,
    window: Mutex<Window>,
}

impl OnlineMetricState {
    pub fn new(stats: FrametimeStatistics, window_secs: f64) -> Self {
        Self {
            stats,
            window: Mutex::new(Window::new(window_secs)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Window> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Point the window at a process without waiting for its first frame.
    pub fn track(&self, process_name: &str, pid: u32) {
        let mut w = self.lock();
        let target = (process_name.to_string(), pid);
        if w.tracked.as_ref() != Some(&target) {
            w.reset();
            w.tracked = Some(target);
        }
    }

    pub fn tracked(&self) -> Option<(String, u32)> {
        self.lock().tracked.clone()
    }

    /// Admit one frame.
    pub fn observe(&self, sample: &FrameSample) {
        let mut w = self.lock();

        let same_process = w
            .tracked
            .as_ref()
            .map(|(name, pid)| *name == sample.process_name && *pid == sample.pid)
            .unwrap_or(false);
        if !same_process {
            debug!(process = %sample.process_name, pid = sample.pid, "live window retargeted");
            w.reset();
            w.tracked = Some((sample.process_name.clone(), sample.pid));
        } else if w.last_timestamp.is_some_and(|last| sample.timestamp_seconds < last) {
            debug!(pid = sample.pid, "probe clock went backwards, live window cleared");
            w.reset();
        }
        w.last_timestamp = Some(sample.timestamp_seconds);

        if sample.frame_time_ms > FOCUS_LOSS_CUTOFF_MS {
            return;
        }

        let frame = TimedFrame {
            timestamp: sample.timestamp_seconds,
            frame_time: sample.frame_time_ms,
        };
        let now = frame.timestamp;
        let window_secs = w.window_secs;

        w.metric.push(frame);
        w.metric.remove_while(|f| now - f.timestamp > window_secs);
        w.stutter.push(frame);
        w.stutter.remove_while(|f| now - f.timestamp > STUTTER_WINDOW_SECS);
    }

    /// Drop every buffered frame. The tracked process is kept.
    pub fn reset(&self) {
        self.lock().reset();
    }

    /// Change the metric window length. Clears the window. Lengths outside
    /// (0, [`MAX_WINDOW_SECS`]] are clamped.
    pub fn set_window(&self, window_secs: f64) {
        let window_secs = bounded_window(window_secs);
        let mut w = self.lock();
        w.window_secs = window_secs;
        w.metric = RingBuffer::with_capacity(ceiling_for(window_secs));
        w.reset();
    }

    pub fn len(&self) -> usize {
        self.lock().metric.len()
    }

    pub fn window_secs(&self) -> f64 {
        self.lock().window_secs
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frame times currently in the metric window, oldest first.
    pub fn snapshot(&self) -> Vec<f64> {
        self.lock().metric.iter().map(|f| f.frame_time).collect()
    }

    pub fn metric_value(&self, metric: Metric) -> f64 {
        let frametimes = self.snapshot();
        self.stats.fps_metric_value(&frametimes, metric)
    }

    pub fn frametime_metric_value(&self, metric: Metric) -> f64 {
        let frametimes = self.snapshot();
        self.stats.frametime_metric_value(&frametimes, metric)
    }

    /// Share of the last five seconds spent in stutter frames. Zero when idle.
    pub fn stuttering_percentage(&self) -> f64 {
        let recent: Vec<f64> = self.lock().stutter.iter().map(|f| f.frame_time).collect();
        if recent.is_empty() {
            return 0.0;
        }
        let factor = self.stats.options().stuttering_factor;
        self.stats.online_stuttering_time_percentage(&recent, factor)
    }

    /// Formatted line for the overlay, e.g. `Avg=60.00 FPS | P1=45.10 FPS`.
    pub fn live_summary(&self, second: Metric, third: Metric) -> String {
        let frametimes = self.snapshot();
        self.stats
            .metric_analysis(&frametimes, None, second, third)
            .result_string
    }
}
