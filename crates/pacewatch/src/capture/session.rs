//! The ordered frame record of one capture run.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::options::{CaptureFileMode, CaptureOptions};
use crate::frame::FrameSample;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub process_name: String,
    pub pid: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub samples: Vec<FrameSample>,
    /// Sealed after the producer failed mid-capture.
    pub partial: bool,
    pub comment: Option<String>,
    pub file_mode: CaptureFileMode,
    pub dropped_out_of_order: usize,
    /// Probe timestamp of the first captured (not backfilled) frame.
    #[serde(skip)]
    capture_origin: Option<f64>,
}

impl Session {
    pub fn new(options: &CaptureOptions) -> Self {
        Self {
            comment: options.comment.clone(),
            file_mode: options.file_mode,
            ..Self::for_process(&options.target.process_name, options.target.pid)
        }
    }

    pub fn for_process(process_name: &str, pid: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            process_name: process_name.to_string(),
            pid,
            start_time: Utc::now(),
            end_time: None,
            samples: Vec::new(),
            partial: false,
            comment: None,
            file_mode: CaptureFileMode::default(),
            dropped_out_of_order: 0,
            capture_origin: None,
        }
    }

    /// Append in arrival order. A sample older than the last one is dropped
    /// and `false` returned.
    pub fn append(&mut self, sample: &FrameSample) -> bool {
        if let Some(last) = self.samples.last() {
            if sample.timestamp_seconds < last.timestamp_seconds {
                self.dropped_out_of_order += 1;
                debug!(
                    session = %self.id,
                    at = sample.timestamp_seconds,
                    last = last.timestamp_seconds,
                    "dropping out-of-order frame"
                );
                return false;
            }
        }
        self.capture_origin.get_or_insert(sample.timestamp_seconds);
        self.samples.push(sample.clone());
        true
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_sealed(&self) -> bool {
        self.end_time.is_some()
    }

    pub fn frametimes(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.frame_time_ms).collect()
    }

    /// Seconds between the first and last sample.
    pub fn duration_seconds(&self) -> f64 {
        match (self.samples.first(), self.samples.last()) {
            (Some(first), Some(last)) => last.timestamp_seconds - first.timestamp_seconds,
            _ => 0.0,
        }
    }

    /// Put archived frames from within `window_secs` before the first
    /// captured frame at the front of the session.
    pub(crate) fn prepend_backfill(&mut self, archived: Vec<FrameSample>, window_secs: f64) {
        let Some(origin) = self.capture_origin else {
            return;
        };
        let mut earlier: Vec<FrameSample> = Vec::new();
        for sample in archived {
            let t = sample.timestamp_seconds;
            if sample.pid != self.pid || t >= origin || origin - t > window_secs {
                continue;
            }
            if earlier.last().is_some_and(|l| t < l.timestamp_seconds) {
                continue;
            }
            earlier.push(sample);
        }
        if !earlier.is_empty() {
            debug!(session = %self.id, frames = earlier.len(), "backfilled from fill archive");
            earlier.append(&mut self.samples);
            self.samples = earlier;
        }
    }

    /// Final clean-up before hand-off: keep the dominant swap chain, trim a
    /// timed capture to its length, and shift timestamps so the first frame
    /// sits at zero.
    pub fn seal(&mut self, capture_time_seconds: Option<f64>) {
        self.keep_dominant_swap_chain();

        if let (Some(limit), Some(origin)) = (capture_time_seconds, self.capture_origin) {
            let before = self.samples.len();
            self.samples
                .retain(|s| s.timestamp_seconds - origin <= limit);
            if self.samples.len() < before {
                debug!(
                    session = %self.id,
                    trimmed = before - self.samples.len(),
                    "trimmed frames past capture time"
                );
            }
        }

        if let Some(base) = self.samples.first().map(|s| s.timestamp_seconds) {
            for sample in &mut self.samples {
                sample.timestamp_seconds -= base;
            }
            self.capture_origin = self.capture_origin.map(|o| o - base);
        }
        self.end_time = Some(Utc::now());
    }

    fn keep_dominant_swap_chain(&mut self) {
        let mut counts: HashMap<Option<&str>, usize> = HashMap::new();
        for sample in &self.samples {
            *counts.entry(sample.swap_chain.as_deref()).or_default() += 1;
        }
        if counts.len() < 2 {
            return;
        }

        // most frames wins; ties go to the lower address for determinism
        let dominant = counts
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
            .map(|(chain, _)| chain.map(str::to_string));
        let Some(dominant) = dominant else {
            return;
        };

        let before = self.samples.len();
        self.samples.retain(|s| s.swap_chain == dominant);
        info!(
            session = %self.id,
            swap_chain = dominant.as_deref().unwrap_or("none"),
            filtered = before - self.samples.len(),
            "multiple swap chains, keeping the dominant one"
        );
    }
}
