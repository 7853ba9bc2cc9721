//! Statistical detection layer
//!
//! Always available: population z-scores, a sliding-window scan for sustained
//! deviation, an HRV estimate from reading spacing, and fixed threshold rules
//! on the reading context. All functions expect time-ordered samples.

use crate::config::DetectorConfig;
use crate::heart_rate;
use crate::stats;
use crate::types::{
    AnomalyEvent, AnomalyScope, AnomalyType, DetectionMethod, HeartRateContext, HeartRateSample,
    Metric, Severity,
};

/// Readings more than `z_threshold` standard deviations from the window mean
pub(crate) fn point_anomalies(
    samples: &[HeartRateSample],
    mean: f64,
    std: f64,
    config: &DetectorConfig,
) -> Vec<AnomalyEvent> {
    if std <= 0.0 {
        return Vec::new();
    }

    samples
        .iter()
        .filter_map(|sample| {
            let bpm = sample.bpm as f64;
            let z = (bpm - mean) / std;
            if z.abs() <= config.z_threshold {
                return None;
            }

            let (anomaly_type, direction) = if z > 0.0 {
                (AnomalyType::HighHeartRate, "above")
            } else {
                (AnomalyType::LowHeartRate, "below")
            };
            let severity = if z.abs() > config.high_severity_z {
                Severity::High
            } else {
                Severity::Medium
            };

            Some(AnomalyEvent {
                source_id: sample.id.clone(),
                scope: AnomalyScope::Reading,
                metric: Metric::HeartRate,
                anomaly_type,
                severity,
                detection_method: DetectionMethod::ZScore,
                score: stats::round_to(z, 2),
                value: Some(bpm),
                start: sample.timestamp,
                end: sample.timestamp,
                description: format!(
                    "Heart rate of {} bpm is {:.1} standard deviations {} the window mean of {:.1} bpm",
                    sample.bpm,
                    z.abs(),
                    direction,
                    mean
                ),
            })
        })
        .collect()
}

/// First sub-window whose mean deviates from the window mean by at least
/// `sustained_sigma` standard deviations
pub(crate) fn sustained_deviation(
    samples: &[HeartRateSample],
    mean: f64,
    std: f64,
    config: &DetectorConfig,
) -> Option<AnomalyEvent> {
    let size = config.sustained_window;
    if samples.len() < config.min_sustained_samples || samples.len() < size || std <= 0.0 {
        return None;
    }

    samples.windows(size).find_map(|window| {
        let bpms: Vec<f64> = window.iter().map(|s| s.bpm as f64).collect();
        let window_mean = stats::mean(&bpms);
        let deviation = window_mean - mean;
        if deviation.abs() < config.sustained_sigma * std {
            return None;
        }

        let first = window.first()?;
        let last = window.last()?;
        let (anomaly_type, label) = if deviation > 0.0 {
            (AnomalyType::SustainedHighHeartRate, "elevated")
        } else {
            (AnomalyType::SustainedLowHeartRate, "depressed")
        };
        let minutes = (last.timestamp - first.timestamp).num_minutes();

        Some(AnomalyEvent {
            source_id: format!("window:{}..{}", first.id, last.id),
            scope: AnomalyScope::Window,
            metric: Metric::HeartRate,
            anomaly_type,
            severity: Severity::Medium,
            detection_method: DetectionMethod::SlidingWindow,
            score: stats::round_to(deviation / std, 2),
            value: Some(stats::round_to(window_mean, 1)),
            start: first.timestamp,
            end: last.timestamp,
            description: format!(
                "Heart rate {label} at {window_mean:.1} bpm for {minutes} minutes (window mean {mean:.1} bpm)"
            ),
        })
    })
}

/// Low HRV over the whole window
pub(crate) fn hrv_anomaly(
    samples: &[HeartRateSample],
    config: &DetectorConfig,
) -> Option<AnomalyEvent> {
    let estimate = heart_rate::estimate_hrv(samples, config.min_hrv_intervals)?;

    let (anomaly_type, severity, interpretation) = if estimate.rmssd_ms < config.very_low_hrv_ms {
        (
            AnomalyType::VeryLowHrv,
            Severity::High,
            "Very low HRV may indicate high stress, fatigue, or illness",
        )
    } else if estimate.rmssd_ms < config.low_hrv_ms {
        (
            AnomalyType::LowHrv,
            Severity::Medium,
            "Low HRV may indicate increased stress or poor recovery",
        )
    } else {
        return None;
    };

    let first = samples.first()?;
    let last = samples.last()?;

    Some(AnomalyEvent {
        source_id: format!("window:{}..{}", first.id, last.id),
        scope: AnomalyScope::Window,
        metric: Metric::HeartRateVariability,
        anomaly_type,
        severity,
        detection_method: DetectionMethod::HrvEstimator,
        score: stats::round_to(estimate.rmssd_ms, 1),
        value: Some(stats::round_to(estimate.rmssd_ms, 1)),
        start: first.timestamp,
        end: last.timestamp,
        description: format!(
            "RMSSD of {:.1} ms over {} intervals. {interpretation}",
            estimate.rmssd_ms, estimate.interval_count
        ),
    })
}

/// Context rules: a racing heart at rest, or a very slow one while moving
pub(crate) fn threshold_anomalies(
    samples: &[HeartRateSample],
    config: &DetectorConfig,
) -> Vec<AnomalyEvent> {
    samples
        .iter()
        .filter_map(|sample| {
            let (anomaly_type, threshold, description) = if sample.context
                == HeartRateContext::Rest
                && sample.bpm > config.high_resting_bpm
            {
                (
                    AnomalyType::HighRestingHeartRate,
                    config.high_resting_bpm,
                    format!("Heart rate of {} bpm while at rest", sample.bpm),
                )
            } else if !sample.context.is_resting() && sample.bpm < config.low_active_bpm {
                (
                    AnomalyType::LowHeartRateWhileActive,
                    config.low_active_bpm,
                    format!(
                        "Heart rate of {} bpm during {} context",
                        sample.bpm,
                        sample.context.as_str()
                    ),
                )
            } else {
                return None;
            };

            Some(AnomalyEvent {
                source_id: sample.id.clone(),
                scope: AnomalyScope::Reading,
                metric: Metric::HeartRate,
                anomaly_type,
                severity: Severity::Medium,
                detection_method: DetectionMethod::Threshold,
                score: sample.bpm as f64 - threshold as f64,
                value: Some(sample.bpm as f64),
                start: sample.timestamp,
                end: sample.timestamp,
                description,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn make_samples(bpms: &[u16], context: HeartRateContext) -> Vec<HeartRateSample> {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        bpms.iter()
            .enumerate()
            .map(|(i, bpm)| {
                HeartRateSample::new(
                    format!("hr-{i}"),
                    start + Duration::minutes(2 * i as i64),
                    *bpm,
                    context,
                )
            })
            .collect()
    }

    fn window_stats(samples: &[HeartRateSample]) -> (f64, f64) {
        let bpms: Vec<f64> = samples.iter().map(|s| s.bpm as f64).collect();
        (stats::mean(&bpms), stats::std_dev(&bpms))
    }

    #[test]
    fn test_constant_window_has_no_point_anomalies() {
        let samples = make_samples(&[72; 40], HeartRateContext::Rest);
        let (mean, std) = window_stats(&samples);

        assert!(point_anomalies(&samples, mean, std, &DetectorConfig::default()).is_empty());
        assert!(sustained_deviation(&samples, mean, std, &DetectorConfig::default()).is_none());
    }

    #[test]
    fn test_point_anomaly_severity() {
        let mut bpms = vec![70; 58];
        bpms[20] = 180;
        bpms[25] = 180;
        let samples = make_samples(&bpms, HeartRateContext::Active);
        let (mean, std) = window_stats(&samples);

        let events = point_anomalies(&samples, mean, std, &DetectorConfig::default());
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.severity == Severity::High));
        assert!(events.iter().all(|e| e.anomaly_type == AnomalyType::HighHeartRate));
    }

    #[test]
    fn test_sustained_low_window_detected() {
        let mut bpms = vec![80; 60];
        for bpm in bpms.iter_mut().skip(10).take(10) {
            *bpm = 50;
        }
        let samples = make_samples(&bpms, HeartRateContext::Active);
        let (mean, std) = window_stats(&samples);

        let event = sustained_deviation(&samples, mean, std, &DetectorConfig::default()).unwrap();
        assert_eq!(event.anomaly_type, AnomalyType::SustainedLowHeartRate);
        assert_eq!(event.scope, AnomalyScope::Window);
        assert_eq!(event.duration_minutes(), 18.0);
    }

    #[test]
    fn test_threshold_rules() {
        let mut samples = make_samples(&[125, 45, 45], HeartRateContext::Rest);
        samples[1].context = HeartRateContext::Workout;
        samples[2].context = HeartRateContext::Sleep;

        let events = threshold_anomalies(&samples, &DetectorConfig::default());
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].anomaly_type, AnomalyType::HighRestingHeartRate);
        assert_eq!(events[1].anomaly_type, AnomalyType::LowHeartRateWhileActive);
    }

    #[test]
    fn test_regular_sampling_reports_very_low_hrv() {
        let samples = make_samples(&[70; 30], HeartRateContext::Rest);
        let event = hrv_anomaly(&samples, &DetectorConfig::default()).unwrap();

        assert_eq!(event.anomaly_type, AnomalyType::VeryLowHrv);
        assert_eq!(event.severity, Severity::High);
    }
}
