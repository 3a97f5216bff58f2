//! Smoothing filters and outlier removal.

use super::metric::OutlierMethod;
use super::quantile::{quantile_sorted, sorted};

const DECI_PERCENTILE: f64 = 0.999;

pub(crate) fn mean(sequence: &[f64]) -> f64 {
    if sequence.is_empty() {
        return f64::NAN;
    }
    sequence.iter().sum::<f64>() / sequence.len() as f64
}

/// Sample standard deviation (n - 1).
fn std_dev(sequence: &[f64]) -> f64 {
    if sequence.len() < 2 {
        return f64::NAN;
    }
    let m = mean(sequence);
    let ss: f64 = sequence.iter().map(|x| (x - m).powi(2)).sum();
    (ss / (sequence.len() - 1) as f64).sqrt()
}

/// Trailing mean over the last `window` samples, current sample included.
pub fn sample_moving_average(sequence: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    let mut out = Vec::with_capacity(sequence.len());
    let mut sum = 0.0;

    for (i, &value) in sequence.iter().enumerate() {
        sum += value;
        if i >= window {
            sum -= sequence[i - window];
        }
        let n = (i + 1).min(window);
        out.push(sum / n as f64);
    }
    out
}

/// Local average used by stutter detection. The window length in samples
/// grows with the square root of the mean frame time.
pub fn moving_average(frametimes: &[f64]) -> Vec<f64> {
    if frametimes.is_empty() {
        return Vec::new();
    }
    let window = (mean(frametimes).sqrt() * 10.0).round_ties_even();
    let window = if window.is_finite() && window >= 1.0 {
        window as usize
    } else {
        1
    };
    sample_moving_average(frametimes, window)
}

/// Trailing mean of `values` over a window measured in elapsed milliseconds.
///
/// `durations[i]` is how long sample `i` lasted. Sample `i` always counts; an
/// earlier sample `j` counts while the time spanned by `j..i` (excluding the
/// current frame) is at most `window_ms`.
pub fn time_weighted_moving_average(values: &[f64], durations: &[f64], window_ms: f64) -> Vec<f64> {
    let n = values.len().min(durations.len());
    let mut out = Vec::with_capacity(n);
    let mut start = 0;
    let mut value_sum = 0.0;
    // time covered by samples start..i
    let mut span = 0.0;

    for i in 0..n {
        value_sum += values[i];
        while span > window_ms && start < i {
            span -= durations[start];
            value_sum -= values[start];
            start += 1;
        }
        out.push(value_sum / (i + 1 - start) as f64);
        span += durations[i];
    }
    out
}

/// Time-windowed moving average of a frame-time sequence.
pub fn time_based_moving_average(frametimes: &[f64], window_ms: f64) -> Vec<f64> {
    time_weighted_moving_average(frametimes, frametimes, window_ms)
}

/// Root mean square of residuals against the time-windowed moving average,
/// with Bessel's correction.
pub fn adaptive_standard_deviation(values: &[f64], durations: &[f64], window_ms: f64) -> f64 {
    if values.len() < 2 || values.len() != durations.len() {
        return f64::NAN;
    }
    let smoothed = time_weighted_moving_average(values, durations, window_ms);
    let ss: f64 = values
        .iter()
        .zip(&smoothed)
        .map(|(v, m)| (v - m).powi(2))
        .sum();
    (ss / (values.len() - 1) as f64).sqrt()
}

/// Copy of `sequence` with outliers removed by `method`. Order is preserved.
pub fn outlier_adjusted_sequence(sequence: &[f64], method: OutlierMethod) -> Vec<f64> {
    if sequence.is_empty() {
        return Vec::new();
    }

    let keep: Box<dyn Fn(f64) -> bool> = match method {
        OutlierMethod::None => return sequence.to_vec(),
        OutlierMethod::DeciPercentile => {
            let limit = quantile_sorted(&sorted(sequence), DECI_PERCENTILE);
            Box::new(move |x| x < limit)
        }
        OutlierMethod::InterquartileRange => {
            let data = sorted(sequence);
            let q1 = quantile_sorted(&data, 0.25);
            let q3 = quantile_sorted(&data, 0.75);
            let iqr = q3 - q1;
            let (lo, hi) = (q1 - 1.5 * iqr, q3 + 1.5 * iqr);
            Box::new(move |x| x >= lo && x <= hi)
        }
        OutlierMethod::ThreeSigma | OutlierMethod::TwoDotFiveSigma => {
            let k = if method == OutlierMethod::ThreeSigma { 3.0 } else { 2.5 };
            let m = mean(sequence);
            let sd = std_dev(sequence);
            if !sd.is_finite() {
                return sequence.to_vec();
            }
            Box::new(move |x| (x - m).abs() <= k * sd)
        }
    };

    sequence.iter().copied().filter(|&x| keep(x)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_moving_average_warmup() {
        let avg = sample_moving_average(&[2.0, 4.0, 6.0, 8.0], 2);
        assert_eq!(avg, vec![2.0, 3.0, 5.0, 7.0]);
    }

    #[test]
    fn test_moving_average_constant_sequence() {
        let avg = moving_average(&[16.0; 50]);
        assert_eq!(avg.len(), 50);
        assert!(avg.iter().all(|&v| (v - 16.0).abs() < 1e-9));
    }

    #[test]
    fn test_time_window_edge_is_inclusive() {
        // window 20ms: at i=2 the two prior frames span exactly 20ms and stay in
        let avg = time_based_moving_average(&[10.0, 10.0, 40.0, 10.0], 20.0);
        assert_eq!(avg[0], 10.0);
        assert_eq!(avg[1], 10.0);
        assert_eq!(avg[2], 20.0);
        // at i=3 the prior span is 60ms; dropping frames until <= 20 leaves none
        assert_eq!(avg[3], 10.0);
    }

    #[test]
    fn test_adaptive_std_flat_is_zero() {
        let ft = [16.0; 20];
        assert_eq!(adaptive_standard_deviation(&ft, &ft, 500.0), 0.0);
        assert!(adaptive_standard_deviation(&[16.0], &[16.0], 500.0).is_nan());
    }

    #[test]
    fn test_deci_percentile_drops_extreme() {
        let mut data: Vec<f64> = (1..=100).map(f64::from).collect();
        data.push(10_000.0);
        let adjusted = outlier_adjusted_sequence(&data, OutlierMethod::DeciPercentile);
        assert!(!adjusted.contains(&10_000.0));
        assert_eq!(adjusted.len(), 100);
    }

    #[test]
    fn test_none_keeps_everything() {
        let data = [10.0, 20.0, 30.0, 1000.0];
        assert_eq!(outlier_adjusted_sequence(&data, OutlierMethod::None), data.to_vec());
    }

    #[test]
    fn test_iqr_and_sigma_drop_spike() {
        let mut data = vec![16.0; 40];
        data.extend([17.0, 15.0, 16.5, 15.5]);
        data.push(250.0);
        for method in [
            OutlierMethod::InterquartileRange,
            OutlierMethod::ThreeSigma,
            OutlierMethod::TwoDotFiveSigma,
        ] {
            let adjusted = outlier_adjusted_sequence(&data, method);
            assert!(!adjusted.contains(&250.0), "{method} kept the spike");
            assert!(adjusted.contains(&16.0));
        }
    }
}
