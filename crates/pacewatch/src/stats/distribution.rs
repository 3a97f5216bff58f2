//! FPS-threshold distributions, frame-to-frame variance bins, and
//! cross-run outlier flags.

use super::quantile::{p_quantile_sequence, round_to};

/// FPS thresholds, fastest first.
pub const FPS_THRESHOLDS: [f64; 10] = [240.0, 144.0, 120.0, 90.0, 75.0, 60.0, 45.0, 30.0, 15.0, 10.0];

/// Upper bounds (ms) of the frame-to-frame variance bins. A fifth bin
/// catches everything above the last bound.
pub const VARIANCE_BOUNDS_MS: [f64; 4] = [2.0, 4.0, 8.0, 12.0];

fn thresholds(reversed: bool) -> Vec<f64> {
    let mut t = FPS_THRESHOLDS.to_vec();
    if reversed {
        t.reverse();
    }
    t
}

/// Frames below each FPS threshold, or above it when `reversed`
/// (thresholds then run slowest first).
pub fn fps_threshold_counts(frametimes: &[f64], reversed: bool) -> Vec<usize> {
    thresholds(reversed)
        .into_iter()
        .map(|threshold| {
            frametimes
                .iter()
                .map(|ft| 1000.0 / ft)
                .filter(|&fps| if reversed { fps > threshold } else { fps < threshold })
                .count()
        })
        .collect()
}

/// Time (ms) spent below each FPS threshold, or above it when `reversed`.
pub fn fps_threshold_times(frametimes: &[f64], reversed: bool) -> Vec<f64> {
    thresholds(reversed)
        .into_iter()
        .map(|threshold| {
            let limit = 1000.0 / threshold;
            frametimes
                .iter()
                .filter(|&&ft| if reversed { ft < limit } else { ft > limit })
                .sum()
        })
        .collect()
}

/// Share of consecutive-frame deltas falling into each variance bin, across
/// all runs of a session. Deltas never span two runs. Empty when there is no
/// pair of frames to compare.
pub fn frametime_variance_percentages<'a, I>(runs: I) -> Vec<f64>
where
    I: IntoIterator<Item = &'a [f64]>,
{
    let mut bins = [0usize; VARIANCE_BOUNDS_MS.len() + 1];
    let mut total = 0usize;

    for run in runs {
        for pair in run.windows(2) {
            let delta = (pair[1] - pair[0]).abs();
            let bin = VARIANCE_BOUNDS_MS
                .iter()
                .position(|&bound| delta < bound)
                .unwrap_or(VARIANCE_BOUNDS_MS.len());
            bins[bin] += 1;
            total += 1;
        }
    }

    if total == 0 {
        return Vec::new();
    }
    bins.iter()
        .map(|&count| round_to(count as f64 / total as f64, 4))
        .collect()
}

/// Flag values deviating from the median by more than `outlier_percentage` percent.
pub fn outlier_flags(values: &[f64], outlier_percentage: f64) -> Vec<bool> {
    let median = p_quantile_sequence(values, 0.5);
    values
        .iter()
        .map(|v| (v - median).abs() / median * 100.0 > outlier_percentage)
        .collect()
}
