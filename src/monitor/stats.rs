//! Rolling latency statistics and anomaly detection.

/// Z-score above which a sample is anomalous relative to recent history.
const Z_SCORE_LIMIT: f64 = 2.0;

/// Mean and population standard deviation of a latency window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatencyStats {
    pub mean: Option<f64>,
    pub stddev: Option<f64>,
}

/// Compute statistics over the given latency samples.
pub fn compute_stats(samples: &[f64]) -> LatencyStats {
    if samples.is_empty() {
        return LatencyStats::default();
    }

    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    let variance = samples
        .iter()
        .map(|value| {
            let diff = value - mean;
            diff * diff
        })
        .sum::<f64>()
        / samples.len() as f64;

    LatencyStats {
        mean: Some(mean),
        stddev: Some(variance.sqrt()),
    }
}

/// Whether a fresh sample is inconsistent with recent history.
///
/// A zero or missing deviation never flags: a window with fewer than two
/// distinct samples carries no signal to deviate from.
pub fn is_anomalous(sample: f64, stats: LatencyStats, threshold_ms: f64) -> bool {
    let (Some(mean), Some(stddev)) = (stats.mean, stats.stddev) else {
        return false;
    };
    if stddev == 0.0 {
        return false;
    }

    let z_score = (sample - mean).abs() / stddev;
    z_score > Z_SCORE_LIMIT || sample > threshold_ms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_window_has_no_stats() {
        let stats = compute_stats(&[]);
        assert_eq!(stats.mean, None);
        assert_eq!(stats.stddev, None);
    }

    #[test]
    fn test_mean_and_population_stddev() {
        let stats = compute_stats(&[100.0, 200.0, 300.0, 400.0]);
        assert_eq!(stats.mean, Some(250.0));
        // Population stddev of {100,200,300,400} = sqrt(12500)
        let stddev = stats.stddev.unwrap();
        assert!((stddev - 12500f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_no_history_never_anomalous() {
        let stats = compute_stats(&[]);
        assert!(!is_anomalous(1_000_000.0, stats, 1000.0));
    }

    #[test]
    fn test_single_sample_never_anomalous() {
        // One sample gives stddev 0, which must not flag regardless of
        // how extreme the fresh sample is
        let stats = compute_stats(&[100.0]);
        assert_eq!(stats.stddev, Some(0.0));
        assert!(!is_anomalous(1_000_000.0, stats, 1000.0));
    }

    #[test]
    fn test_identical_samples_never_anomalous() {
        let stats = compute_stats(&[100.0, 100.0, 100.0]);
        assert!(!is_anomalous(5000.0, stats, 1000.0));
    }

    #[test]
    fn test_z_score_flags_outlier() {
        let stats = compute_stats(&[100.0, 110.0, 90.0, 105.0, 95.0]);
        // Far beyond two deviations from the ~100ms mean
        assert!(is_anomalous(200.0, stats, 10_000.0));
        // Near the mean, below the threshold
        assert!(!is_anomalous(102.0, stats, 10_000.0));
    }

    #[test]
    fn test_threshold_flags_even_within_z_score() {
        // Wide spread keeps the z-score small, the absolute threshold
        // still flags
        let stats = compute_stats(&[100.0, 2000.0, 100.0, 2000.0]);
        assert!(is_anomalous(1500.0, stats, 1000.0));
        assert!(!is_anomalous(900.0, stats, 1000.0));
    }
}
