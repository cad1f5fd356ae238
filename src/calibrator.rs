//! Distribution calibration
//!
//! Converts a channel's raw anomaly scores into robust deviation units and a
//! one-sided anomaly flag. The sensitivity multiplier adapts to the shape of the
//! score distribution: heavy tails and right skew raise the bar.

use crate::config::SensitivityLadder;
use crate::types::CalibrationSummary;
use tracing::{debug, warn};

/// Scale factor making the MAD comparable to a standard deviation for normal data
pub const MAD_SCALE: f64 = 1.4826;

/// Median of a slice (mean of the two middle values for even lengths)
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Median absolute deviation around `center`
pub fn mad(values: &[f64], center: f64) -> Option<f64> {
    let deviations: Vec<f64> = values.iter().map(|v| (v - center).abs()).collect();
    median(&deviations)
}

/// Robust z-scores `(x - median) / (1.4826 * MAD)`
///
/// A constant series has no spread; every score is then 0.
pub fn robust_z(values: &[f64]) -> Vec<f64> {
    let Some(center) = median(values) else {
        return Vec::new();
    };
    let spread = mad(values, center).unwrap_or_default() * MAD_SCALE;
    if spread <= 0.0 {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| (v - center) / spread).collect()
}

/// Sample skewness and excess kurtosis from population moments
///
/// Returns `(0.0, 0.0)` for fewer than two values or zero variance.
pub fn shape(values: &[f64]) -> (f64, f64) {
    if values.len() < 2 {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let (mut m2, mut m3, mut m4) = (0.0, 0.0, 0.0);
    for v in values {
        let d = v - mean;
        let d2 = d * d;
        m2 += d2;
        m3 += d2 * d;
        m4 += d2 * d2;
    }
    m2 /= n;
    m3 /= n;
    m4 /= n;
    if m2 <= (mean.abs() * 1e-12).powi(2) {
        return (0.0, 0.0);
    }
    let skewness = m3 / m2.powf(1.5);
    let kurtosis = m4 / (m2 * m2) - 3.0;
    (skewness, kurtosis)
}

/// Calibrated view of one channel's score distribution
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    pub median: f64,
    pub mad: f64,
    pub skewness: f64,
    pub kurtosis: f64,
    pub n_sigma: f64,
    /// `None` when the scores have zero spread
    pub threshold: Option<f64>,
    /// Sign-preserving robust deviation per score
    pub deviations: Vec<f64>,
    /// One-sided threshold crossing per score
    pub flags: Vec<bool>,
}

impl Calibration {
    /// Whether a raw score crosses this calibration's threshold
    pub fn is_flagged(&self, score: f64) -> bool {
        self.threshold.is_some_and(|t| score > t)
    }

    pub fn flagged_count(&self) -> usize {
        self.flags.iter().filter(|f| **f).count()
    }

    pub fn is_degenerate(&self) -> bool {
        self.threshold.is_none()
    }

    pub fn summary(&self) -> CalibrationSummary {
        CalibrationSummary {
            median: self.median,
            mad: self.mad,
            skewness: self.skewness,
            kurtosis: self.kurtosis,
            n_sigma: self.n_sigma,
            threshold: self.threshold,
            scored_frames: self.flags.len(),
        }
    }
}

/// Calibrator for raw anomaly score arrays
pub struct DistributionCalibrator {
    ladder: SensitivityLadder,
}

impl Default for DistributionCalibrator {
    fn default() -> Self {
        Self::new(SensitivityLadder::default())
    }
}

impl DistributionCalibrator {
    pub fn new(ladder: SensitivityLadder) -> Self {
        Self { ladder }
    }

    /// Adaptive sensitivity multiplier for a score distribution
    pub fn adaptive_n_sigma(&self, scores: &[f64]) -> f64 {
        let (skewness, kurtosis) = shape(scores);
        self.ladder.select(skewness, kurtosis)
    }

    /// Calibrate a full score array
    pub fn calibrate(&self, scores: &[f64]) -> Calibration {
        let (skewness, kurtosis) = shape(scores);
        let n_sigma = self.ladder.select(skewness, kurtosis);
        let center = median(scores).unwrap_or_default();
        let spread = mad(scores, center).unwrap_or_default();
        let scaled = MAD_SCALE * spread;

        if scaled <= 0.0 {
            if !scores.is_empty() {
                warn!(
                    scores = scores.len(),
                    median = center,
                    "score distribution has zero MAD; no anomalies flagged"
                );
            }
            return Calibration {
                median: center,
                mad: spread,
                skewness,
                kurtosis,
                n_sigma,
                threshold: None,
                deviations: vec![0.0; scores.len()],
                flags: vec![false; scores.len()],
            };
        }

        let threshold = center + n_sigma * scaled;
        let deviations = scores.iter().map(|s| (s - center) / scaled).collect();
        let flags: Vec<bool> = scores.iter().map(|s| *s > threshold).collect();

        debug!(
            skewness,
            kurtosis,
            n_sigma,
            threshold,
            flagged = flags.iter().filter(|f| **f).count(),
            "calibrated score distribution"
        );

        Calibration {
            median: center,
            mad: spread,
            skewness,
            kurtosis,
            n_sigma,
            threshold: Some(threshold),
            deviations,
            flags,
        }
    }
}
