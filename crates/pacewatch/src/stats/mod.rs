//! Frame-time statistics.
//!
//! Everything here is a pure function of its input slice. Inputs are frame
//! times in milliseconds; FPS metrics convert internally. An empty input
//! yields NaN from every aggregate, never a panic.

pub mod distribution;
pub mod filters;
pub mod metric;
pub mod quantile;

pub use distribution::{
    fps_threshold_counts, fps_threshold_times, frametime_variance_percentages, outlier_flags,
    FPS_THRESHOLDS,
};
pub use filters::{
    adaptive_standard_deviation, moving_average, outlier_adjusted_sequence,
    time_based_moving_average,
};
pub use metric::{Metric, OutlierMethod, UnknownName};
pub use quantile::{
    p_quantile_sequence, percentage_high_average_sequence, percentage_high_integral_sequence,
    round_to,
};

use filters::mean;
use serde::{Deserialize, Serialize};

/// Knobs for the statistics that are not pure functions of the sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsOptions {
    pub stuttering_factor: f64,
    pub low_fps_threshold: f64,
    pub rounding_digits: u32,
    pub interval_average_window_ms: f64,
    pub outlier_method: OutlierMethod,
}

impl Default for StatisticsOptions {
    fn default() -> Self {
        Self {
            stuttering_factor: 2.5,
            low_fps_threshold: 25.0,
            rounding_digits: 2,
            interval_average_window_ms: 500.0,
            outlier_method: OutlierMethod::DeciPercentile,
        }
    }
}

impl TryFrom<&paceconf::StatisticsConfig> for StatisticsOptions {
    type Error = UnknownName;

    fn try_from(config: &paceconf::StatisticsConfig) -> Result<Self, Self::Error> {
        Ok(Self {
            stuttering_factor: config.stuttering_factor,
            low_fps_threshold: config.low_fps_threshold,
            rounding_digits: config.rounding_digits,
            interval_average_window_ms: config.interval_average_window_ms,
            outlier_method: config.outlier_method.parse()?,
        })
    }
}

/// Average plus two configurable metrics, pre-formatted for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricAnalysis {
    pub result_string: String,
    pub average: f64,
    pub second: f64,
    pub third: f64,
}

/// Which column of a set of [`MetricAnalysis`] to check for outliers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelatedMetric {
    Average,
    Second,
    Third,
}

#[derive(Debug, Clone, Default)]
pub struct FrametimeStatistics {
    options: StatisticsOptions,
}

impl FrametimeStatistics {
    pub fn new(options: StatisticsOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &StatisticsOptions {
        &self.options
    }

    /// FPS view of a frame-time sequence.
    pub fn fps_metric_value(&self, frametimes: &[f64], metric: Metric) -> f64 {
        if frametimes.is_empty() {
            return f64::NAN;
        }

        let fps: Vec<f64> = frametimes.iter().map(|ft| 1000.0 / ft).collect();
        let value = match metric {
            Metric::Max => fps.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Metric::Min => fps.iter().copied().fold(f64::INFINITY, f64::min),
            Metric::Average => {
                frametimes.len() as f64 * 1000.0 / frametimes.iter().sum::<f64>()
            }
            Metric::P99 => p_quantile_sequence(&fps, 0.99),
            Metric::P95 => p_quantile_sequence(&fps, 0.95),
            Metric::Median => p_quantile_sequence(&fps, 0.5),
            Metric::P5 => p_quantile_sequence(&fps, 0.05),
            Metric::P1 => p_quantile_sequence(&fps, 0.01),
            Metric::P0Dot2 => p_quantile_sequence(&fps, 0.002),
            Metric::P0Dot1 => p_quantile_sequence(&fps, 0.001),
            Metric::OnePercentLowAverage => {
                1000.0 / percentage_high_average_sequence(frametimes, 1.0 - 0.01)
            }
            Metric::ZeroDotTwoPercentLowAverage => {
                1000.0 / percentage_high_average_sequence(frametimes, 1.0 - 0.002)
            }
            Metric::ZeroDotOnePercentLowAverage => {
                1000.0 / percentage_high_average_sequence(frametimes, 1.0 - 0.001)
            }
            Metric::OnePercentLowIntegral => {
                1000.0 / percentage_high_integral_sequence(frametimes, 1.0 - 0.01)
            }
            Metric::ZeroDotTwoPercentLowIntegral => {
                1000.0 / percentage_high_integral_sequence(frametimes, 1.0 - 0.002)
            }
            Metric::ZeroDotOnePercentLowIntegral => {
                1000.0 / percentage_high_integral_sequence(frametimes, 1.0 - 0.001)
            }
            Metric::AdaptiveStd => adaptive_standard_deviation(
                &fps,
                frametimes,
                self.options.interval_average_window_ms,
            ),
            Metric::None => f64::NAN,
        };

        round_to(value, self.options.rounding_digits)
    }

    /// Frame-time view. Percentile names are mirrored so that `P1` still
    /// means the slow tail (the 99th percentile of frame times).
    pub fn frametime_metric_value(&self, frametimes: &[f64], metric: Metric) -> f64 {
        if frametimes.is_empty() {
            return f64::NAN;
        }

        let value = match metric {
            Metric::Max => frametimes.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Metric::Min => frametimes.iter().copied().fold(f64::INFINITY, f64::min),
            Metric::Average => mean(frametimes),
            Metric::P99 => p_quantile_sequence(frametimes, 0.01),
            Metric::P95 => p_quantile_sequence(frametimes, 0.05),
            Metric::Median => p_quantile_sequence(frametimes, 0.5),
            Metric::P5 => p_quantile_sequence(frametimes, 0.95),
            Metric::P1 => p_quantile_sequence(frametimes, 0.99),
            Metric::P0Dot2 => p_quantile_sequence(frametimes, 0.998),
            Metric::P0Dot1 => p_quantile_sequence(frametimes, 0.999),
            Metric::OnePercentLowAverage => percentage_high_average_sequence(frametimes, 0.99),
            Metric::ZeroDotTwoPercentLowAverage => {
                percentage_high_average_sequence(frametimes, 0.998)
            }
            Metric::ZeroDotOnePercentLowAverage => {
                percentage_high_average_sequence(frametimes, 0.999)
            }
            Metric::OnePercentLowIntegral => percentage_high_integral_sequence(frametimes, 0.99),
            Metric::ZeroDotTwoPercentLowIntegral => {
                percentage_high_integral_sequence(frametimes, 0.998)
            }
            Metric::ZeroDotOnePercentLowIntegral => {
                percentage_high_integral_sequence(frametimes, 0.999)
            }
            Metric::AdaptiveStd => adaptive_standard_deviation(
                frametimes,
                frametimes,
                self.options.interval_average_window_ms,
            ),
            Metric::None => f64::NAN,
        };

        round_to(value, self.options.rounding_digits)
    }

    /// Every metric except `None`, FPS view.
    pub fn fps_metrics(&self, frametimes: &[f64]) -> Vec<MetricResult> {
        Metric::ALL
            .iter()
            .filter(|m| **m != Metric::None)
            .map(|&metric| MetricResult {
                metric,
                value: self.fps_metric_value(frametimes, metric),
            })
            .collect()
    }

    /// Percentage of frames slower than `factor` times the global average.
    pub fn stuttering_count_percentage(&self, frametimes: &[f64], factor: f64) -> f64 {
        if frametimes.is_empty() {
            return f64::NAN;
        }
        let limit = factor * mean(frametimes);
        let count = frametimes.iter().filter(|&&ft| ft > limit).count();
        100.0 * count as f64 / frametimes.len() as f64
    }

    /// Percentage of time spent in frames slower than `factor` times the
    /// local moving average.
    pub fn stuttering_time_percentage(&self, frametimes: &[f64], factor: f64) -> f64 {
        if frametimes.is_empty() {
            return f64::NAN;
        }
        let local = moving_average(frametimes);
        let stutter: f64 = frametimes
            .iter()
            .zip(&local)
            .filter(|(ft, avg)| **ft > factor * **avg)
            .map(|(ft, _)| ft)
            .sum();
        100.0 * stutter / frametimes.iter().sum::<f64>()
    }

    /// Live variant of [`Self::stuttering_time_percentage`] against the
    /// global average; cheap enough to run on every overlay refresh.
    pub fn online_stuttering_time_percentage(&self, frametimes: &[f64], factor: f64) -> f64 {
        if frametimes.is_empty() {
            return f64::NAN;
        }
        let limit = factor * mean(frametimes);
        let stutter: f64 = frametimes.iter().filter(|&&ft| ft > limit).sum();
        100.0 * stutter / frametimes.iter().sum::<f64>()
    }

    /// Percentage of time in frames that are not stutters but still run
    /// below `low_fps_threshold`.
    pub fn low_fps_time_percentage(
        &self,
        frametimes: &[f64],
        factor: f64,
        low_fps_threshold: f64,
    ) -> f64 {
        if frametimes.is_empty() {
            return f64::NAN;
        }
        let local = moving_average(frametimes);
        let low: f64 = frametimes
            .iter()
            .zip(&local)
            .filter(|(ft, avg)| **ft <= factor * **avg && 1000.0 / **ft < low_fps_threshold)
            .map(|(ft, _)| ft)
            .sum();
        100.0 * low / frametimes.iter().sum::<f64>()
    }

    /// Stutter and low-FPS shares with the configured factor and threshold.
    pub fn stutter_summary(&self, frametimes: &[f64]) -> StutterSummary {
        let factor = self.options.stuttering_factor;
        StutterSummary {
            count_percentage: self.stuttering_count_percentage(frametimes, factor),
            time_percentage: self.stuttering_time_percentage(frametimes, factor),
            low_fps_time_percentage: self.low_fps_time_percentage(
                frametimes,
                factor,
                self.options.low_fps_threshold,
            ),
        }
    }

    /// Outlier removal with the configured method.
    pub fn adjusted(&self, frametimes: &[f64]) -> Vec<f64> {
        outlier_adjusted_sequence(frametimes, self.options.outlier_method)
    }

    /// `Avg=.. FPS | <second>=.. FPS | <third>=.. FPS`. Metrics set to
    /// [`Metric::None`] are left out. When `display_times` is given the second
    /// and third metrics use it instead of `frametimes`.
    pub fn metric_analysis(
        &self,
        frametimes: &[f64],
        display_times: Option<&[f64]>,
        second: Metric,
        third: Metric,
    ) -> MetricAnalysis {
        let digits = self.options.rounding_digits as usize;
        let average = self.fps_metric_value(frametimes, Metric::Average);
        let source = display_times.unwrap_or(frametimes);
        let second_value = self.fps_metric_value(source, second);
        let third_value = self.fps_metric_value(source, third);

        let mut result_string = format!("Avg={:.*} FPS", digits, average);
        for (metric, value) in [(second, second_value), (third, third_value)] {
            if metric != Metric::None {
                result_string.push_str(&format!(
                    " | {}={:.*} FPS",
                    metric.short_description(),
                    digits,
                    value
                ));
            }
        }

        MetricAnalysis {
            result_string,
            average,
            second: second_value,
            third: third_value,
        }
    }

    /// Flag runs whose `related` metric deviates from the median run by more
    /// than `outlier_percentage` percent.
    pub fn outlier_analysis(
        &self,
        analyses: &[MetricAnalysis],
        related: RelatedMetric,
        outlier_percentage: f64,
    ) -> Vec<bool> {
        let values: Vec<f64> = analyses
            .iter()
            .map(|a| match related {
                RelatedMetric::Average => a.average,
                RelatedMetric::Second => a.second,
                RelatedMetric::Third => a.third,
            })
            .collect();
        outlier_flags(&values, outlier_percentage)
    }
}

/// One computed metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricResult {
    pub metric: Metric,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StutterSummary {
    pub count_percentage: f64,
    pub time_percentage: f64,
    pub low_fps_time_percentage: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats() -> FrametimeStatistics {
        FrametimeStatistics::default()
    }

    #[test]
    fn test_empty_is_nan_everywhere() {
        let s = stats();
        for metric in Metric::ALL {
            assert!(s.fps_metric_value(&[], metric).is_nan(), "fps {metric}");
            assert!(s.frametime_metric_value(&[], metric).is_nan(), "ft {metric}");
        }
        assert!(s.stuttering_count_percentage(&[], 2.5).is_nan());
        assert!(s.stuttering_time_percentage(&[], 2.5).is_nan());
        assert!(s.online_stuttering_time_percentage(&[], 2.5).is_nan());
        assert!(s.low_fps_time_percentage(&[], 2.5, 25.0).is_nan());
    }

    #[test]
    fn test_fps_average_sixty() {
        let avg = stats().fps_metric_value(&[16.667; 5], Metric::Average);
        assert!((avg - 60.0).abs() < 0.1);
        let single = stats().fps_metric_value(&[16.67], Metric::Average);
        assert!((single - 59.99).abs() < 0.1);
    }

    #[test]
    fn test_fps_max_min_median() {
        let s = stats();
        let data = [10.0, 16.67, 33.33];
        assert!((s.fps_metric_value(&data, Metric::Max) - 100.0).abs() < 0.01);
        assert!((s.fps_metric_value(&data, Metric::Min) - 30.0).abs() < 0.1);
        let median = s.fps_metric_value(&[33.33, 16.67, 11.11], Metric::Median);
        assert!((median - 60.0).abs() < 1.0);
    }

    #[test]
    fn test_fps_p1_reflects_slow_tail() {
        let mut data = vec![16.67; 99];
        data.push(100.0);
        assert!(stats().fps_metric_value(&data, Metric::P1) < 60.0);
        assert!(stats().fps_metric_value(&data, Metric::OnePercentLowIntegral) < 60.0);
    }

    #[test]
    fn test_frametime_metrics() {
        let s = stats();
        assert_eq!(s.frametime_metric_value(&[10.0, 20.0, 30.0, 40.0, 50.0], Metric::Median), 30.0);
        assert_eq!(s.frametime_metric_value(&[10.0, 20.0, 30.0], Metric::Average), 20.0);
        let data = [10.0, 20.0, 30.0, 15.0, 25.0];
        assert_eq!(s.frametime_metric_value(&data, Metric::Max), 30.0);
        assert_eq!(s.frametime_metric_value(&data, Metric::Min), 10.0);
        // P1 is the slow tail for frame times too
        assert!(s.frametime_metric_value(&data, Metric::P1) > s.frametime_metric_value(&data, Metric::P99));
    }

    #[test]
    fn test_stuttering_count() {
        let s = stats();
        assert_eq!(s.stuttering_count_percentage(&[16.0, 16.0, 16.0, 16.0, 100.0], 2.5), 20.0);
        assert_eq!(s.stuttering_count_percentage(&[16.0, 17.0, 16.0, 17.0, 16.0], 2.5), 0.0);
    }

    #[test]
    fn test_online_stuttering_time() {
        let s = stats();
        assert_eq!(s.online_stuttering_time_percentage(&[16.0, 17.0, 16.0, 17.0, 16.0], 2.5), 0.0);
        assert!(s.online_stuttering_time_percentage(&[16.0, 16.0, 16.0, 16.0, 100.0], 2.5) > 50.0);
    }

    #[test]
    fn test_stuttering_time_uses_local_average() {
        let mut data = vec![10.0; 200];
        data[150] = 60.0;
        let pct = stats().stuttering_time_percentage(&data, 2.5);
        let expected = 100.0 * 60.0 / (199.0 * 10.0 + 60.0);
        assert!((pct - expected).abs() < 1e-9);
    }

    #[test]
    fn test_low_fps_time() {
        // steady 50ms frames run at 20 FPS without stuttering
        let pct = stats().low_fps_time_percentage(&[50.0; 30], 2.5, 25.0);
        assert!((pct - 100.0).abs() < 1e-9);
        let fast = stats().low_fps_time_percentage(&[16.0; 30], 2.5, 25.0);
        assert_eq!(fast, 0.0);
    }

    #[test]
    fn test_metric_analysis_string() {
        let s = stats();
        let analysis = s.metric_analysis(&[20.0; 10], None, Metric::P1, Metric::None);
        assert_eq!(analysis.result_string, "Avg=50.00 FPS | P1=50.00 FPS");
        assert_eq!(analysis.average, 50.0);
        assert!(analysis.third.is_nan());
    }

    #[test]
    fn test_outlier_analysis_flags_slow_run() {
        let s = stats();
        let runs: Vec<MetricAnalysis> = [10.0, 10.1, 9.9, 14.0]
            .iter()
            .map(|&ft| s.metric_analysis(&[ft; 20], None, Metric::P1, Metric::Median))
            .collect();
        let flags = s.outlier_analysis(&runs, RelatedMetric::Average, 5.0);
        assert_eq!(flags, vec![false, false, false, true]);
    }

    #[test]
    fn test_options_from_config() {
        let mut config = paceconf::StatisticsConfig::default();
        config.outlier_method = "threesigma".to_string();
        let options = StatisticsOptions::try_from(&config).unwrap();
        assert_eq!(options.outlier_method, OutlierMethod::ThreeSigma);

        config.outlier_method = "bogus".to_string();
        assert!(StatisticsOptions::try_from(&config).is_err());
    }
}
