//! Feature extraction
//!
//! This module turns raw readings into fixed-width numeric vectors for the
//! outlier models:
//! - Heart rate: value, confidence, context, time of day and rolling statistics
//! - Sleep sessions: duration, efficiency, quality and stage minutes
//! - Activities: duration, calories, distance, steps and heart rate
//!
//! Rolling features only look backwards, so a vector never depends on later
//! readings.

use chrono::{Datelike, Timelike};
use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_FEATURE_WINDOW;
use crate::stats;
use crate::types::{Activity, HeartRateSample, SleepSession};

/// Below this many samples no heart rate features are produced
pub const MIN_FEATURE_SAMPLES: usize = 10;

/// Width of a heart rate feature vector
pub const HEART_RATE_FEATURE_WIDTH: usize = 10;

/// Guards the rolling z-score against a zero standard deviation
const Z_EPSILON: f64 = 1e-6;

/// Features of one heart rate reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartRateFeatures {
    pub source_id: String,
    pub bpm: f64,
    pub confidence: f64,
    pub context_code: f64,
    pub hour: f64,
    /// Monday = 0
    pub weekday: f64,
    pub rolling_mean: f64,
    pub rolling_std: f64,
    pub rolling_max: f64,
    pub rolling_min: f64,
    pub rolling_z: f64,
}

impl HeartRateFeatures {
    pub fn to_row(&self) -> Vec<f64> {
        vec![
            self.bpm,
            self.confidence,
            self.context_code,
            self.hour,
            self.weekday,
            self.rolling_mean,
            self.rolling_std,
            self.rolling_max,
            self.rolling_min,
            self.rolling_z,
        ]
    }
}

/// Extracts heart rate feature vectors over a rolling window
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    window: usize,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_FEATURE_WINDOW)
    }
}

impl FeatureExtractor {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// One feature vector per sample of a time-ordered sequence.
    ///
    /// Returns an empty vector when fewer than [`MIN_FEATURE_SAMPLES`] samples
    /// are supplied.
    pub fn extract(&self, samples: &[HeartRateSample]) -> Vec<HeartRateFeatures> {
        if samples.len() < MIN_FEATURE_SAMPLES {
            return Vec::new();
        }

        let bpms: Vec<f64> = samples.iter().map(|s| s.bpm as f64).collect();

        samples
            .iter()
            .enumerate()
            .map(|(i, sample)| {
                let bpm = bpms[i];
                let (rolling_mean, rolling_std, rolling_max, rolling_min, rolling_z) =
                    if i >= self.window {
                        rolling_stats(&bpms[i - self.window..i], bpm)
                    } else {
                        (bpm, 0.0, bpm, bpm, 0.0)
                    };

                HeartRateFeatures {
                    source_id: sample.id.clone(),
                    bpm,
                    confidence: sample.confidence.unwrap_or(1.0),
                    context_code: sample.context.code(),
                    hour: sample.timestamp.hour() as f64,
                    weekday: sample.timestamp.weekday().num_days_from_monday() as f64,
                    rolling_mean,
                    rolling_std,
                    rolling_max,
                    rolling_min,
                    rolling_z,
                }
            })
            .collect()
    }
}

/// Mean, std, max, min of the preceding window and the current value's z-score
fn rolling_stats(previous: &[f64], current: f64) -> (f64, f64, f64, f64, f64) {
    let mean = stats::mean(previous);
    let std = stats::std_dev(previous);
    let max = stats::max(previous).unwrap_or(current);
    let min = stats::min(previous).unwrap_or(current);
    (mean, std, max, min, (current - mean) / (std + Z_EPSILON))
}

/// `[duration, efficiency, quality, deep, rem, awake, interruptions, weekday]`
pub fn sleep_feature_row(session: &SleepSession) -> Vec<f64> {
    vec![
        session.duration_minutes(),
        session.efficiency_pct(),
        session.quality_score.unwrap_or(0.0),
        session.deep_minutes,
        session.rem_minutes,
        session.awake_minutes,
        session.interruptions as f64,
        session
            .date()
            .map(|d| d.weekday().num_days_from_monday() as f64)
            .unwrap_or(0.0),
    ]
}

/// `[duration, calories, distance, steps, avg heart rate, weekday]`
pub fn activity_feature_row(activity: &Activity) -> Vec<f64> {
    vec![
        activity.duration_minutes(),
        activity.calories_burned,
        activity.distance_km.unwrap_or(0.0),
        activity.steps.unwrap_or(0) as f64,
        activity.avg_heart_rate.unwrap_or(0) as f64,
        activity.start.weekday().num_days_from_monday() as f64,
    ]
}

/// Column-wise z-scores.
///
/// Zero-variance columns become 0. Returns `None` when every column has zero
/// variance, since no model can separate such rows.
pub fn standardize(rows: &[Vec<f64>]) -> Option<Vec<Vec<f64>>> {
    let width = rows.first()?.len();
    if width == 0 {
        return None;
    }

    let mut means = Vec::with_capacity(width);
    let mut stds = Vec::with_capacity(width);
    for col in 0..width {
        let column: Vec<f64> = rows.iter().map(|r| r.get(col).copied().unwrap_or(0.0)).collect();
        means.push(stats::mean(&column));
        stds.push(stats::std_dev(&column));
    }

    if stds.iter().all(|s| *s == 0.0) {
        return None;
    }

    Some(
        rows.iter()
            .map(|row| {
                (0..width)
                    .map(|col| {
                        let value = row.get(col).copied().unwrap_or(0.0);
                        if stds[col] > 0.0 {
                            (value - means[col]) / stds[col]
                        } else {
                            0.0
                        }
                    })
                    .collect()
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HeartRateContext;
    use chrono::{Duration, TimeZone, Utc};

    fn make_samples(bpms: &[u16]) -> Vec<HeartRateSample> {
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 8, 0, 0).unwrap();
        bpms.iter()
            .enumerate()
            .map(|(i, bpm)| {
                HeartRateSample::new(
                    format!("hr-{i}"),
                    start + Duration::minutes(i as i64),
                    *bpm,
                    HeartRateContext::Rest,
                )
            })
            .collect()
    }

    #[test]
    fn test_too_few_samples_yield_no_features() {
        let samples = make_samples(&[70; 9]);
        assert!(FeatureExtractor::default().extract(&samples).is_empty());
    }

    #[test]
    fn test_vector_width_and_static_fields() {
        let samples = make_samples(&[70; 12]);
        let features = FeatureExtractor::default().extract(&samples);

        assert_eq!(features.len(), 12);
        assert_eq!(features[0].to_row().len(), HEART_RATE_FEATURE_WIDTH);
        assert_eq!(features[0].confidence, 1.0);
        assert_eq!(features[0].context_code, 0.0);
        assert_eq!(features[0].hour, 8.0);
        // 2024-01-15 is a Monday
        assert_eq!(features[0].weekday, 0.0);
    }

    #[test]
    fn test_warmup_rows_fall_back_to_own_value() {
        let samples = make_samples(&[60, 62, 64, 66, 68, 70, 72, 74, 76, 78, 80, 82]);
        let features = FeatureExtractor::default().extract(&samples);

        let third = &features[2];
        assert_eq!(third.rolling_mean, 64.0);
        assert_eq!(third.rolling_std, 0.0);
        assert_eq!(third.rolling_max, 64.0);
        assert_eq!(third.rolling_min, 64.0);
        assert_eq!(third.rolling_z, 0.0);
    }

    #[test]
    fn test_rolling_window_uses_previous_samples_only() {
        let samples = make_samples(&[60, 62, 64, 66, 68, 70, 72, 74, 76, 78, 200, 82]);
        let features = FeatureExtractor::default().extract(&samples);

        // Row 10 sees samples 0..10 (mean 69), not itself
        let row = &features[10];
        assert!((row.rolling_mean - 69.0).abs() < 1e-9);
        assert_eq!(row.rolling_max, 78.0);
        assert_eq!(row.rolling_min, 60.0);
        assert!(row.rolling_z > 10.0);
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let samples = make_samples(&[70, 71, 69, 75, 80, 66, 90, 72, 70, 71, 73, 68]);
        let extractor = FeatureExtractor::new(5);

        assert_eq!(extractor.extract(&samples), extractor.extract(&samples));
    }

    #[test]
    fn test_standardize_rejects_constant_matrix() {
        let rows = vec![vec![1.0, 2.0]; 5];
        assert!(standardize(&rows).is_none());
    }

    #[test]
    fn test_standardize_zero_variance_column_maps_to_zero() {
        let rows = vec![vec![1.0, 5.0], vec![3.0, 5.0]];
        let scaled = standardize(&rows).unwrap();

        assert_eq!(scaled[0], vec![-1.0, 0.0]);
        assert_eq!(scaled[1], vec![1.0, 0.0]);
    }
}
