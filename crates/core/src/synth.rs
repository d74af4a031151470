//! Fallback history for charts when no time-series source answers.

/// Offsets applied to the baseline, oldest sample first.
pub const SYNTHETIC_OFFSETS: [f64; 15] = [
    -10.0, -8.0, -5.0, -3.0, -2.0, 2.0, -1.0, 3.0, 1.0, -2.0, 4.0, -1.0, 2.0, 0.0, 0.0,
];

/// Derive a short stand-in series from the current scalar percentage.
///
/// Absent, zero, negative or non-finite baselines yield an empty series: a flat
/// line at zero would read as real history. Each point is clamped at zero.
pub fn synthesize_series(baseline: Option<f64>) -> Vec<f64> {
    let b = match baseline {
        Some(b) if b.is_finite() && b > 0.0 => b,
        _ => return Vec::new(),
    };
    SYNTHETIC_OFFSETS.iter().map(|off| (b + off).max(0.0)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forty_yields_fixed_pattern() {
        let expected = [30.0, 32.0, 35.0, 37.0, 38.0, 42.0, 39.0, 43.0, 41.0, 38.0, 44.0, 39.0, 42.0, 40.0, 40.0];
        assert_eq!(synthesize_series(Some(40.0)), expected.to_vec());
    }

    #[test]
    fn zero_or_missing_is_no_data() {
        assert!(synthesize_series(Some(0.0)).is_empty());
        assert!(synthesize_series(None).is_empty());
        assert!(synthesize_series(Some(f64::NAN)).is_empty());
    }

    #[test]
    fn low_baseline_clamps_at_zero() {
        let s = synthesize_series(Some(3.0));
        assert_eq!(s.len(), 15);
        assert_eq!(&s[..4], &[0.0, 0.0, 0.0, 0.0]);
        assert!(s.iter().all(|v| *v >= 0.0));
        assert_eq!(s[10], 7.0);
    }
}
