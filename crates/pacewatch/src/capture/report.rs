//! Whole-session statistics, computed once a session is sealed.

use serde::Serialize;
use uuid::Uuid;

use super::session::Session;
use crate::stats::{
    fps_threshold_times, frametime_variance_percentages, round_to, FrametimeStatistics, Metric,
    MetricResult, StutterSummary, FPS_THRESHOLDS,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdShare {
    pub fps: f64,
    /// Percent of capture time spent below `fps`.
    pub time_percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionReport {
    pub id: Uuid,
    pub process_name: String,
    pub pid: u32,
    pub partial: bool,
    pub frames: usize,
    pub duration_seconds: f64,
    /// FPS metrics on the outlier-adjusted sequence.
    pub metrics: Vec<MetricResult>,
    pub stutter: StutterSummary,
    pub below_fps: Vec<ThresholdShare>,
    /// Share of frame-to-frame deltas per variance bin.
    pub variance: Vec<f64>,
}

impl SessionReport {
    pub fn build(session: &Session, stats: &FrametimeStatistics) -> Self {
        let frametimes = session.frametimes();
        let mut adjusted = stats.adjusted(&frametimes);
        if adjusted.is_empty() {
            // a constant sequence has no frame strictly below its own quantile
            adjusted = frametimes.clone();
        }
        let total: f64 = frametimes.iter().sum();
        let below_fps = FPS_THRESHOLDS
            .iter()
            .zip(fps_threshold_times(&frametimes, false))
            .map(|(&fps, time)| ThresholdShare {
                fps,
                time_percentage: if total > 0.0 {
                    round_to(100.0 * time / total, 2)
                } else {
                    f64::NAN
                },
            })
            .collect();

        Self {
            id: session.id,
            process_name: session.process_name.clone(),
            pid: session.pid,
            partial: session.partial,
            frames: session.len(),
            duration_seconds: round_to(session.duration_seconds(), 3),
            metrics: stats.fps_metrics(&adjusted),
            stutter: stats.stutter_summary(&frametimes),
            below_fps,
            variance: frametime_variance_percentages([frametimes.as_slice()]),
        }
    }

    pub fn metric(&self, metric: Metric) -> Option<f64> {
        self.metrics
            .iter()
            .find(|m| m.metric == metric)
            .map(|m| m.value)
    }

    /// Plain-text rendering for terminals and logs.
    pub fn render(&self) -> String {
        let mut out = format!(
            "{} (pid {}) session {}{}\n  {} frames over {:.3} s\n",
            self.process_name,
            self.pid,
            self.id,
            if self.partial { " [partial]" } else { "" },
            self.frames,
            self.duration_seconds,
        );
        for m in &self.metrics {
            out.push_str(&format!(
                "  {:<12} {:>10.2} FPS\n",
                m.metric.short_description(),
                m.value
            ));
        }
        out.push_str(&format!(
            "  stutter: {:.2}% of frames, {:.2}% of time; low FPS {:.2}% of time\n",
            self.stutter.count_percentage,
            self.stutter.time_percentage,
            self.stutter.low_fps_time_percentage,
        ));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameSample;
    use crate::stats::StatisticsOptions;

    fn session(frametimes: &[f64]) -> Session {
        let mut s = Session::for_process("game", 3);
        let mut t = 0.0;
        for &ft in frametimes {
            t += ft / 1000.0;
            s.append(&FrameSample {
                process_name: "game".to_string(),
                pid: 3,
                timestamp_seconds: t,
                frame_time_ms: ft,
                swap_chain: None,
            });
        }
        s.seal(None);
        s
    }

    #[test]
    fn test_report_of_steady_session() {
        let stats = FrametimeStatistics::new(StatisticsOptions::default());
        let report = SessionReport::build(&session(&[20.0; 50]), &stats);

        assert_eq!(report.frames, 50);
        assert_eq!(report.metric(Metric::Average), Some(50.0));
        assert_eq!(report.metric(Metric::P1), Some(50.0));
        assert_eq!(report.stutter.count_percentage, 0.0);
        // 50 FPS is below 60 but not below 45
        assert_eq!(report.below_fps[5].time_percentage, 100.0);
        assert_eq!(report.below_fps[6].time_percentage, 0.0);
        assert_eq!(report.variance[0], 1.0);
        assert!(report.render().contains("50 frames"));
    }

    #[test]
    fn test_report_of_empty_session() {
        let stats = FrametimeStatistics::new(StatisticsOptions::default());
        let report = SessionReport::build(&Session::for_process("idle", 1), &stats);
        assert_eq!(report.frames, 0);
        assert!(report.metric(Metric::Average).unwrap().is_nan());
        assert!(report.variance.is_empty());
    }
}
