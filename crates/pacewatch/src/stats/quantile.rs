//! Count-based and time-weighted percentiles.
//!
//! A count-based quantile weights every frame equally. The integral variant
//! weights each frame by how long it was on screen, so slow frames dominate.

/// Sorted copy, ascending. Input is left untouched.
pub(crate) fn sorted(sequence: &[f64]) -> Vec<f64> {
    let mut data = sequence.to_vec();
    data.sort_by(|a, b| a.total_cmp(b));
    data
}

/// Approximately median-unbiased quantile (Hyndman-Fan type 8) of sorted data.
pub(crate) fn quantile_sorted(data: &[f64], tau: f64) -> f64 {
    if !(0.0..=1.0).contains(&tau) || data.is_empty() {
        return f64::NAN;
    }

    let n = data.len();
    if tau == 0.0 || n == 1 {
        return data[0];
    }
    if tau == 1.0 {
        return data[n - 1];
    }

    let h = (n as f64 + 1.0 / 3.0) * tau + 1.0 / 3.0;
    let hf = h.floor();
    if hf < 1.0 {
        data[0]
    } else if hf >= n as f64 {
        data[n - 1]
    } else {
        let i = hf as usize;
        data[i - 1] + (h - hf) * (data[i] - data[i - 1])
    }
}

/// Count-based quantile: the value below which `p` of the samples fall.
pub fn p_quantile_sequence(sequence: &[f64], p: f64) -> f64 {
    quantile_sorted(&sorted(sequence), p)
}

/// Time-weighted quantile.
///
/// Walks frames slowest first, accumulating their durations, and returns the
/// frame at which the accumulated time reaches `(1 - p)` of the total. The
/// frame that lands exactly on the cutoff is the one returned.
pub fn percentage_high_integral_sequence(sequence: &[f64], p: f64) -> f64 {
    if sequence.is_empty() {
        return f64::NAN;
    }

    let mut data = sorted(sequence);
    data.reverse();

    let total: f64 = data.iter().sum();
    let cutoff = total * (1.0 - p);

    let mut accumulated = 0.0;
    for &value in &data {
        accumulated += value;
        if accumulated >= cutoff {
            return value;
        }
    }
    data[data.len() - 1]
}

/// Mean of every sample at or above the count-based `p` quantile.
pub fn percentage_high_average_sequence(sequence: &[f64], p: f64) -> f64 {
    if sequence.is_empty() {
        return f64::NAN;
    }

    let q = p_quantile_sequence(sequence, p);
    let (sum, count) = sequence
        .iter()
        .filter(|&&x| x >= q)
        .fold((0.0, 0usize), |(s, c), &x| (s + x, c + 1));

    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

/// Round half away from zero to `digits` decimals. NaN stays NaN.
pub fn round_to(value: f64, digits: u32) -> f64 {
    let factor = 10f64.powi(digits as i32);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_to(n: u32) -> Vec<f64> {
        (1..=n).map(f64::from).collect()
    }

    #[test]
    fn test_median_of_one_to_ten() {
        assert!((p_quantile_sequence(&one_to(10), 0.5) - 5.5).abs() < 1e-9);
    }

    #[test]
    fn test_quantile_tails() {
        let data = one_to(100);
        assert!(p_quantile_sequence(&data, 0.99) >= 99.0);
        assert!(p_quantile_sequence(&data, 0.01) <= 2.0);
        assert_eq!(p_quantile_sequence(&data, 0.0), 1.0);
        assert_eq!(p_quantile_sequence(&data, 1.0), 100.0);
    }

    #[test]
    fn test_quantile_out_of_range_or_empty() {
        assert!(p_quantile_sequence(&[], 0.5).is_nan());
        assert!(p_quantile_sequence(&[1.0, 2.0], 1.5).is_nan());
        assert!(p_quantile_sequence(&[1.0, 2.0], -0.1).is_nan());
    }

    #[test]
    fn test_quantile_does_not_mutate_input() {
        let data = vec![5.0, 1.0, 4.0, 2.0, 3.0];
        let before = data.clone();
        let _ = p_quantile_sequence(&data, 0.3);
        let _ = percentage_high_integral_sequence(&data, 0.9);
        assert_eq!(data, before);
    }

    #[test]
    fn test_integral_single_slow_frame() {
        let data = [10.0, 10.0, 10.0, 10.0, 100.0];
        assert_eq!(percentage_high_integral_sequence(&data, 0.99), 100.0);
    }

    #[test]
    fn test_integral_landing_on_cutoff() {
        // total 100, cutoff 50: 40 then 40 + 10 == 50 lands exactly
        let data = [40.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0];
        assert_eq!(percentage_high_integral_sequence(&data, 0.5), 10.0);
        // total 100, cutoff 30: first frame already reaches it
        assert_eq!(percentage_high_integral_sequence(&data, 0.7), 40.0);
    }

    #[test]
    fn test_integral_differs_from_count_quantile() {
        let mut data = vec![10.0; 98];
        data.extend([200.0, 200.0]);
        let integral = percentage_high_integral_sequence(&data, 0.9);
        let counted = p_quantile_sequence(&data, 0.9);
        assert_eq!(integral, 200.0);
        assert_eq!(counted, 10.0);
    }

    #[test]
    fn test_high_average() {
        assert_eq!(percentage_high_average_sequence(&[100.0; 5], 0.99), 100.0);
        assert!(percentage_high_average_sequence(&[], 0.99).is_nan());
        let avg = percentage_high_average_sequence(&one_to(10), 0.8);
        // quantile 0.8 of 1..10 is 8.6, so 9 and 10 are averaged
        assert!((avg - 9.5).abs() < 1e-9);
    }

    #[test]
    fn test_round_half_away_from_zero() {
        assert_eq!(round_to(2.125, 2), 2.13);
        assert_eq!(round_to(-2.5, 0), -3.0);
        assert_eq!(round_to(59.99880, 2), 60.0);
        assert!(round_to(f64::NAN, 2).is_nan());
    }
}
