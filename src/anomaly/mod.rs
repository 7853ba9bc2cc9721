//! Anomaly detection
//!
//! The detector layers three passes over a heart rate window:
//! 1. Statistical: z-scores, sustained deviation and HRV ([`statistical`])
//! 2. Model: an optional [`OutlierModel`] over standardized feature vectors
//! 3. Threshold rules on the reading context
//!
//! Reading-level events are deduplicated per reading (earlier passes win) and
//! then grouped in time. Detection is a pure function of its input, so running
//! it twice over the same window yields the same events and flags.
//!
//! Sleep sessions and activities get their own outlier passes, and
//! [`AnomalyDetector::report`] combines everything into one summary.

pub mod grouping;
pub mod model;
pub(crate) mod statistical;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::config::{DetectorConfig, EngineConfig};
use crate::error::ComputeError;
use crate::features::{self, FeatureExtractor};
use crate::stats;
use crate::types::{
    Activity, ActivityType, Analysis, AnomalyEvent, AnomalyFlag, AnomalyScope, AnomalyType,
    DetectionMethod, HeartRateSample, Insight, InsightCategory, InsightType, Metric, Priority,
    Severity, SleepSession,
};

pub use grouping::{group_anomalies, AnomalyGroup, GroupType};
pub use model::{build_model, ModelKind, OutlierModel, OutlierPrediction, StatisticalOnly};

#[cfg(feature = "isolation-forest")]
pub use model::IsolationForest;

/// Result of a heart rate detection pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartRateAnomalies {
    /// All events, reading- and window-scoped, in time order
    pub events: Vec<AnomalyEvent>,
    pub groups: Vec<AnomalyGroup>,
    /// One flag per affected reading
    pub flags: Vec<AnomalyFlag>,
    pub sample_count: usize,
    pub mean_bpm: f64,
    pub std_bpm: f64,
    /// Outlier model that ran, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl HeartRateAnomalies {
    pub fn count_by_severity(&self, severity: Severity) -> usize {
        self.events.iter().filter(|e| e.severity == severity).count()
    }
}

/// Layered anomaly detector
pub struct AnomalyDetector {
    config: DetectorConfig,
    extractor: FeatureExtractor,
    model: Box<dyn OutlierModel>,
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self {
            config: DetectorConfig::default(),
            extractor: FeatureExtractor::default(),
            model: Box::new(StatisticalOnly),
        }
    }
}

impl AnomalyDetector {
    /// Detector configured from the engine config, with its configured model
    pub fn new(config: &EngineConfig) -> Result<Self, ComputeError> {
        Ok(Self {
            config: config.detector.clone(),
            extractor: FeatureExtractor::new(config.feature_window),
            model: build_model(config.detector.model)?,
        })
    }

    /// Replace the outlier strategy
    pub fn with_model(mut self, model: Box<dyn OutlierModel>) -> Self {
        self.model = model;
        self
    }

    pub fn model_name(&self) -> &'static str {
        self.model.name()
    }

    /// Detect heart rate anomalies over one window of readings
    pub fn detect_heart_rate(&self, samples: &[HeartRateSample]) -> Analysis<HeartRateAnomalies> {
        if samples.is_empty() {
            return Analysis::no_data("no heart rate readings in the window");
        }
        if samples.len() < self.config.min_samples {
            return Analysis::insufficient(
                "too few heart rate readings for anomaly detection",
                samples.len(),
                self.config.min_samples,
            );
        }

        let mut ordered = samples.to_vec();
        ordered.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));

        let bpms: Vec<f64> = ordered.iter().map(|s| s.bpm as f64).collect();
        let mean = stats::mean(&bpms);
        let std = stats::std_dev(&bpms);

        let mut reading_events =
            statistical::point_anomalies(&ordered, mean, std, &self.config);
        let model_ran = match self.model_events(&ordered) {
            Some(events) => {
                reading_events.extend(events);
                true
            }
            None => false,
        };
        reading_events.extend(statistical::threshold_anomalies(&ordered, &self.config));

        let mut seen = BTreeSet::new();
        let mut events: Vec<AnomalyEvent> = reading_events
            .into_iter()
            .filter(|e| seen.insert(e.source_id.clone()))
            .collect();

        events.extend(statistical::sustained_deviation(&ordered, mean, std, &self.config));
        events.extend(statistical::hrv_anomaly(&ordered, &self.config));
        events.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.source_id.cmp(&b.source_id)));

        let groups = group_anomalies(&events, self.config.group_gap_minutes);
        let flags = events
            .iter()
            .filter(|e| e.scope == AnomalyScope::Reading)
            .map(|e| AnomalyFlag {
                source_id: e.source_id.clone(),
                metric: e.metric,
                anomaly_type: e.anomaly_type,
                severity: e.severity,
            })
            .collect();

        log::debug!(
            "heart rate detection: {} readings, {} events, {} groups",
            ordered.len(),
            events.len(),
            groups.len()
        );

        Analysis::Ready(HeartRateAnomalies {
            events,
            groups,
            flags,
            sample_count: ordered.len(),
            mean_bpm: stats::round_to(mean, 1),
            std_bpm: stats::round_to(std, 2),
            model: model_ran.then(|| self.model.name().to_string()),
        })
    }

    /// Model pass over heart rate features; `None` when the model did not run
    fn model_events(&self, ordered: &[HeartRateSample]) -> Option<Vec<AnomalyEvent>> {
        let method = self.model.detection_method()?;
        if ordered.len() < self.config.min_model_rows {
            return None;
        }

        let features = self.extractor.extract(ordered);
        let rows: Vec<Vec<f64>> = features.iter().map(|f| f.to_row()).collect();
        let predictions = self.run_model(&rows, "heart rate")?;

        Some(
            ordered
                .iter()
                .zip(predictions)
                .filter(|(_, p)| p.is_outlier)
                .map(|(sample, prediction)| {
                    let bpm = sample.bpm as f64;
                    let severity = if bpm > self.config.high_resting_bpm as f64 {
                        Severity::High
                    } else if bpm < self.config.low_active_bpm as f64 {
                        Severity::Medium
                    } else {
                        Severity::Low
                    };
                    AnomalyEvent {
                        source_id: sample.id.clone(),
                        scope: AnomalyScope::Reading,
                        metric: Metric::HeartRate,
                        anomaly_type: AnomalyType::ModelOutlier,
                        severity,
                        detection_method: method,
                        score: stats::round_to(prediction.score, 3),
                        value: Some(bpm),
                        start: sample.timestamp,
                        end: sample.timestamp,
                        description: format!(
                            "Heart rate of {} bpm flagged as an outlier by {}",
                            sample.bpm,
                            self.model.name()
                        ),
                    }
                })
                .collect(),
        )
    }

    /// Standardize and fit; logs and returns `None` on degenerate input or
    /// model failure so the statistical result stands on its own.
    fn run_model(&self, rows: &[Vec<f64>], what: &str) -> Option<Vec<OutlierPrediction>> {
        let Some(scaled) = features::standardize(rows) else {
            log::warn!("{what} features have zero variance, skipping {}", self.model.name());
            return None;
        };
        match self.model.fit_predict(&scaled, self.config.contamination) {
            Ok(predictions) if predictions.len() == rows.len() => Some(predictions),
            Ok(predictions) => {
                log::warn!(
                    "{} returned {} predictions for {} {what} rows",
                    self.model.name(),
                    predictions.len(),
                    rows.len()
                );
                None
            }
            Err(e) => {
                log::warn!("{} failed on {what} features: {e}", self.model.name());
                None
            }
        }
    }

    /// Outlier sessions among a user's recent nights.
    ///
    /// Sessions without timestamps cannot be placed in time and are ignored.
    pub fn detect_sleep(&self, sessions: &[SleepSession]) -> Analysis<Vec<AnomalyEvent>> {
        let timed: Vec<&SleepSession> = sessions.iter().filter(|s| s.date().is_some()).collect();
        if timed.is_empty() {
            return Analysis::no_data("no timed sleep sessions");
        }
        if timed.len() < self.config.min_sessions {
            return Analysis::insufficient(
                "too few sleep sessions for anomaly detection",
                timed.len(),
                self.config.min_sessions,
            );
        }

        let flagged: Vec<(usize, f64, DetectionMethod)> = match self.model.detection_method() {
            Some(method) => {
                let rows: Vec<Vec<f64>> =
                    timed.iter().map(|s| features::sleep_feature_row(s)).collect();
                self.run_model(&rows, "sleep")
                    .map(|predictions| {
                        predictions
                            .into_iter()
                            .enumerate()
                            .filter(|(_, p)| p.is_outlier)
                            .map(|(i, p)| (i, p.score, method))
                            .collect()
                    })
                    .unwrap_or_default()
            }
            None => {
                let durations: Vec<f64> = timed.iter().map(|s| s.duration_minutes()).collect();
                z_outliers(&durations, self.config.z_threshold)
            }
        };

        Analysis::Ready(
            flagged
                .into_iter()
                .map(|(i, score, method)| sleep_event(timed[i], score, method))
                .collect(),
        )
    }

    /// Outlier activities, compared only against activities of the same type
    pub fn detect_activity(&self, activities: &[Activity]) -> Analysis<Vec<AnomalyEvent>> {
        if activities.is_empty() {
            return Analysis::no_data("no activities");
        }
        if activities.len() < self.config.min_sessions {
            return Analysis::insufficient(
                "too few activities for anomaly detection",
                activities.len(),
                self.config.min_sessions,
            );
        }

        let mut by_type: BTreeMap<ActivityType, Vec<&Activity>> = BTreeMap::new();
        for activity in activities {
            by_type.entry(activity.activity_type).or_default().push(activity);
        }

        let mut events = Vec::new();
        for (activity_type, group) in by_type {
            if group.len() < self.config.min_activities_per_type {
                continue;
            }

            let flagged: Vec<(usize, f64, DetectionMethod)> = match self.model.detection_method() {
                Some(method) => {
                    let rows: Vec<Vec<f64>> =
                        group.iter().map(|a| features::activity_feature_row(a)).collect();
                    self.run_model(&rows, activity_type.as_str())
                        .map(|predictions| {
                            predictions
                                .into_iter()
                                .enumerate()
                                .filter(|(_, p)| p.is_outlier)
                                .map(|(i, p)| (i, p.score, method))
                                .collect()
                        })
                        .unwrap_or_default()
                }
                None => {
                    let calories: Vec<f64> = group.iter().map(|a| a.calories_burned).collect();
                    let durations: Vec<f64> = group.iter().map(|a| a.duration_minutes()).collect();
                    let mut flagged = z_outliers(&durations, self.config.z_threshold);
                    for hit in z_outliers(&calories, self.config.z_threshold) {
                        if !flagged.iter().any(|(i, _, _)| *i == hit.0) {
                            flagged.push(hit);
                        }
                    }
                    flagged.sort_by_key(|(i, _, _)| *i);
                    flagged
                }
            };

            events.extend(
                flagged
                    .into_iter()
                    .map(|(i, score, method)| activity_event(group[i], score, method)),
            );
        }

        events.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.source_id.cmp(&b.source_id)));
        Analysis::Ready(events)
    }

    /// Combined report over heart rate, sleep and activity for a period of
    /// `days` days
    pub fn report(
        &self,
        heart_rate: &[HeartRateSample],
        sleep: &[SleepSession],
        activities: &[Activity],
        days: u32,
        generated_at: DateTime<Utc>,
    ) -> AnomalyReport {
        let heart_rate = self.detect_heart_rate(heart_rate);
        let sleep = self.detect_sleep(sleep);
        let activity = self.detect_activity(activities);

        let hr_groups = heart_rate.ready().map_or(0, |r| r.groups.len());
        let hr_events = heart_rate.ready().map_or(0, |r| r.events.len());
        let sleep_count = sleep.ready().map_or(0, Vec::len);
        let activity_count = activity.ready().map_or(0, Vec::len);
        let total = hr_events + sleep_count + activity_count;

        let mut recommendations = Vec::new();

        let high_hr_groups = heart_rate.ready().map_or(0, |r| {
            r.groups.iter().filter(|g| g.severity == Severity::High).count()
        });
        if high_hr_groups > 0 {
            recommendations.push(
                Insight::new(
                    InsightCategory::Heart,
                    InsightType::Recommendation,
                    "Monitor heart rate patterns",
                    "High-severity heart rate episodes were detected. Consider consulting a healthcare provider if they persist.",
                    0.9,
                )
                .with_priority(Priority::High)
                .with_data("high_severity_groups", high_hr_groups),
            );
        }

        let has_type = |analysis: &Analysis<Vec<AnomalyEvent>>, t: AnomalyType| {
            analysis
                .ready()
                .is_some_and(|events| events.iter().any(|e| e.anomaly_type == t))
        };
        if has_type(&sleep, AnomalyType::ExtremelyShortSleep) {
            recommendations.push(
                Insight::new(
                    InsightCategory::Sleep,
                    InsightType::Recommendation,
                    "Improve sleep duration",
                    "Some nights were far shorter than usual. Aim for 7-9 hours of sleep each night.",
                    0.85,
                )
                .with_priority(Priority::Medium),
            );
        }
        if has_type(&activity, AnomalyType::ExtremelyLongActivity) {
            recommendations.push(
                Insight::new(
                    InsightCategory::Activity,
                    InsightType::Recommendation,
                    "Balance activity intensity",
                    "Some sessions ran much longer than usual. Make sure to include rest days in your training.",
                    0.8,
                )
                .with_priority(Priority::Low),
            );
        }

        AnomalyReport {
            generated_at,
            days,
            summary: AnomalySummary {
                total_anomalies: total,
                heart_rate_events: hr_events,
                heart_rate_groups: hr_groups,
                sleep_anomalies: sleep_count,
                activity_anomalies: activity_count,
                anomaly_rate_per_day: if days > 0 {
                    stats::round_to(total as f64 / days as f64, 2)
                } else {
                    0.0
                },
            },
            heart_rate,
            sleep,
            activity,
            recommendations,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalySummary {
    pub total_anomalies: usize,
    pub heart_rate_events: usize,
    pub heart_rate_groups: usize,
    pub sleep_anomalies: usize,
    pub activity_anomalies: usize,
    pub anomaly_rate_per_day: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyReport {
    pub generated_at: DateTime<Utc>,
    pub days: u32,
    pub summary: AnomalySummary,
    pub heart_rate: Analysis<HeartRateAnomalies>,
    pub sleep: Analysis<Vec<AnomalyEvent>>,
    pub activity: Analysis<Vec<AnomalyEvent>>,
    pub recommendations: Vec<Insight>,
}

/// Indices with |z| above the threshold; empty for a flat series
fn z_outliers(values: &[f64], threshold: f64) -> Vec<(usize, f64, DetectionMethod)> {
    let mean = stats::mean(values);
    let std = stats::std_dev(values);
    if std <= 0.0 {
        return Vec::new();
    }
    values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| {
            let z = (v - mean) / std;
            (z.abs() > threshold).then_some((i, stats::round_to(z, 2), DetectionMethod::ZScore))
        })
        .collect()
}

fn sleep_event(session: &SleepSession, score: f64, method: DetectionMethod) -> AnomalyEvent {
    let duration = session.duration_minutes();
    let efficiency = session.efficiency_pct();

    let (anomaly_type, severity) = if duration < 300.0 {
        (AnomalyType::ExtremelyShortSleep, Severity::High)
    } else if duration > 600.0 {
        (AnomalyType::ExtremelyLongSleep, Severity::Medium)
    } else if efficiency < 70.0 {
        (AnomalyType::VeryLowSleepEfficiency, Severity::Medium)
    } else {
        (AnomalyType::IrregularSleepPattern, Severity::Low)
    };

    let start = session.start.or(session.end).unwrap_or_default();
    let end = session.end.unwrap_or(start);

    AnomalyEvent {
        source_id: session.id.clone(),
        scope: AnomalyScope::Reading,
        metric: Metric::Sleep,
        anomaly_type,
        severity,
        detection_method: method,
        score,
        value: Some(stats::round_to(duration, 1)),
        start,
        end,
        description: format!(
            "Unusual sleep session: {:.1} hours at {:.0}% efficiency",
            duration / 60.0,
            efficiency
        ),
    }
}

fn activity_event(activity: &Activity, score: f64, method: DetectionMethod) -> AnomalyEvent {
    let duration = activity.duration_minutes();

    let (anomaly_type, severity) = if duration > 180.0 {
        (AnomalyType::ExtremelyLongActivity, Severity::Medium)
    } else if activity.calories_burned > 1000.0 {
        (AnomalyType::ExtremelyHighCalorieBurn, Severity::Medium)
    } else {
        (AnomalyType::IrregularActivityPattern, Severity::Low)
    };

    AnomalyEvent {
        source_id: activity.id.clone(),
        scope: AnomalyScope::Reading,
        metric: Metric::Activity,
        anomaly_type,
        severity,
        detection_method: method,
        score,
        value: Some(stats::round_to(duration, 1)),
        start: activity.start,
        end: activity.end,
        description: format!(
            "Unusual {} session: {:.0} minutes, {:.0} kcal",
            activity.activity_type.as_str(),
            duration,
            activity.calories_burned
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HeartRateContext;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 2, 8, 0, 0).unwrap()
    }

    /// 60 readings two minutes apart with gentle variation around 70 bpm
    fn make_window(spikes: &[usize]) -> Vec<HeartRateSample> {
        window_in(HeartRateContext::Active, spikes)
    }

    fn window_in(context: HeartRateContext, spikes: &[usize]) -> Vec<HeartRateSample> {
        (0..60)
            .map(|i| {
                let bpm = if spikes.contains(&i) { 180 } else { 68 + (i % 5) as u16 };
                HeartRateSample::new(
                    format!("hr-{i:02}"),
                    start() + Duration::minutes(2 * i as i64),
                    bpm,
                    context,
                )
            })
            .collect()
    }

    #[test]
    fn test_constant_bpm_produces_no_reading_anomalies() {
        let samples: Vec<HeartRateSample> = (0..40)
            .map(|i| {
                HeartRateSample::new(
                    format!("hr-{i}"),
                    start() + Duration::minutes(i),
                    72,
                    HeartRateContext::Active,
                )
            })
            .collect();
        let result = AnomalyDetector::default().detect_heart_rate(&samples).into_ready().unwrap();

        assert!(result.flags.is_empty());
        assert!(result.groups.is_empty());
        assert!(result
            .events
            .iter()
            .all(|e| e.anomaly_type != AnomalyType::HighHeartRate
                && e.anomaly_type != AnomalyType::LowHeartRate));
    }

    #[test]
    fn test_two_spikes_ten_minutes_apart() {
        // Readings 20 and 25 are 10 minutes apart
        let samples = make_window(&[20, 25]);
        let result = AnomalyDetector::default().detect_heart_rate(&samples).into_ready().unwrap();

        let high: Vec<&AnomalyEvent> = result
            .events
            .iter()
            .filter(|e| e.scope == AnomalyScope::Reading && e.severity == Severity::High)
            .collect();
        assert_eq!(high.len(), 2);
        assert_eq!(high[0].source_id, "hr-20");
        assert_eq!(high[1].source_id, "hr-25");

        assert_eq!(result.groups.len(), 1);
        assert_eq!(result.groups[0].group_type, GroupType::SustainedHighHeartRate);
        assert_eq!(result.flags.len(), 2);
    }

    #[test]
    fn test_two_spikes_far_apart_form_two_groups() {
        // Readings 10 and 40 are an hour apart
        let samples = make_window(&[10, 40]);
        let result = AnomalyDetector::default().detect_heart_rate(&samples).into_ready().unwrap();

        assert!(result.count_by_severity(Severity::High) >= 2);
        assert_eq!(result.groups.len(), 2);
    }

    #[test]
    fn test_resting_spikes_ten_minutes_apart_form_one_group() {
        let samples = window_in(HeartRateContext::Rest, &[20, 25]);
        let result = AnomalyDetector::default().detect_heart_rate(&samples).into_ready().unwrap();

        // the resting threshold also fires; the z-score flag wins
        let flags: Vec<(&str, AnomalyType, Severity)> = result
            .flags
            .iter()
            .map(|f| (f.source_id.as_str(), f.anomaly_type, f.severity))
            .collect();
        assert_eq!(
            flags,
            vec![
                ("hr-20", AnomalyType::HighHeartRate, Severity::High),
                ("hr-25", AnomalyType::HighHeartRate, Severity::High),
            ]
        );
        assert!(result
            .events
            .iter()
            .all(|e| e.anomaly_type != AnomalyType::HighRestingHeartRate));
        assert_eq!(result.groups.len(), 1);
    }

    #[test]
    fn test_resting_spikes_an_hour_apart_form_two_groups() {
        let samples = window_in(HeartRateContext::Rest, &[10, 40]);
        let result = AnomalyDetector::default().detect_heart_rate(&samples).into_ready().unwrap();

        let flagged: Vec<&str> = result.flags.iter().map(|f| f.source_id.as_str()).collect();
        assert_eq!(flagged, vec!["hr-10", "hr-40"]);
        assert_eq!(result.groups.len(), 2);
    }

    #[test]
    fn test_detection_is_idempotent() {
        let samples = make_window(&[20, 25]);
        let detector = AnomalyDetector::default();

        let first = detector.detect_heart_rate(&samples).into_ready().unwrap();
        let second = detector.detect_heart_rate(&samples).into_ready().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let samples = make_window(&[20, 25]);
        let mut reversed = samples.clone();
        reversed.reverse();
        let detector = AnomalyDetector::default();

        assert_eq!(
            detector.detect_heart_rate(&samples),
            detector.detect_heart_rate(&reversed)
        );
    }

    #[test]
    fn test_one_flag_per_reading() {
        // A 180 bpm reading at rest trips both the z-score and the threshold rule
        let mut samples = make_window(&[30]);
        samples[30].context = HeartRateContext::Rest;
        let result = AnomalyDetector::default().detect_heart_rate(&samples).into_ready().unwrap();

        let flagged: Vec<&AnomalyFlag> =
            result.flags.iter().filter(|f| f.source_id == "hr-30").collect();
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].anomaly_type, AnomalyType::HighHeartRate);
    }

    #[test]
    fn test_small_window_is_insufficient() {
        let samples = make_window(&[])[..5].to_vec();
        let result = AnomalyDetector::default().detect_heart_rate(&samples);

        assert!(matches!(
            result,
            Analysis::InsufficientData { available: 5, required: 10, .. }
        ));
    }

    #[cfg(feature = "isolation-forest")]
    #[test]
    fn test_model_layer_runs_with_isolation_forest() {
        let samples = make_window(&[20, 25]);
        let detector = AnomalyDetector::default().with_model(Box::new(IsolationForest::default()));
        let result = detector.detect_heart_rate(&samples).into_ready().unwrap();

        assert_eq!(result.model.as_deref(), Some("isolation_forest"));
        // z-score flags still win for the spikes
        let spike = result.events.iter().find(|e| e.source_id == "hr-20").unwrap();
        assert_eq!(spike.detection_method, DetectionMethod::ZScore);
    }

    #[cfg(feature = "isolation-forest")]
    #[test]
    fn test_constant_features_skip_model() {
        let samples: Vec<HeartRateSample> = (0..60)
            .map(|i| {
                HeartRateSample::new(format!("hr-{i}"), start(), 72, HeartRateContext::Active)
            })
            .collect();
        let detector = AnomalyDetector::default().with_model(Box::new(IsolationForest::default()));
        let result = detector.detect_heart_rate(&samples).into_ready().unwrap();

        assert_eq!(result.model, None);
        assert!(result.flags.is_empty());
    }

    fn night(id: usize, minutes: i64) -> SleepSession {
        let bed = Utc.with_ymd_and_hms(2024, 4, 1, 23, 0, 0).unwrap() + Duration::days(id as i64);
        let mut session = SleepSession::from_stages(
            format!("sleep-{id}"),
            20.0,
            minutes as f64 * 0.55,
            minutes as f64 * 0.2,
            minutes as f64 * 0.25 - 20.0,
        );
        session.start = Some(bed);
        session.end = Some(bed + Duration::minutes(minutes));
        session
    }

    #[test]
    fn test_short_night_flagged_without_model() {
        let mut sessions: Vec<SleepSession> =
            (0..14).map(|i| night(i, 450 + (i as i64 % 3) * 10)).collect();
        sessions.push(night(14, 180));

        let events = AnomalyDetector::default().detect_sleep(&sessions).into_ready().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].source_id, "sleep-14");
        assert_eq!(events[0].anomaly_type, AnomalyType::ExtremelyShortSleep);
        assert_eq!(events[0].severity, Severity::High);
    }

    #[test]
    fn test_sleep_detection_needs_ten_sessions() {
        let sessions: Vec<SleepSession> = (0..4).map(|i| night(i, 450)).collect();
        let result = AnomalyDetector::default().detect_sleep(&sessions);
        assert_eq!(result.status(), "insufficient_data");
    }

    fn run(id: usize, minutes: i64, calories: f64) -> Activity {
        let at = start() + Duration::days(id as i64);
        let mut activity = Activity::new(
            format!("run-{id}"),
            ActivityType::Running,
            at,
            at + Duration::minutes(minutes),
        );
        activity.calories_burned = calories;
        activity
    }

    #[test]
    fn test_long_activity_flagged_within_type() {
        let mut activities: Vec<Activity> =
            (0..14).map(|i| run(i, 30 + (i as i64 % 4) * 2, 300.0)).collect();
        activities.push(run(14, 240, 320.0));

        let events = AnomalyDetector::default().detect_activity(&activities).into_ready().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].anomaly_type, AnomalyType::ExtremelyLongActivity);
    }

    #[test]
    fn test_report_recommends_on_high_severity_groups() {
        let samples = make_window(&[20, 25]);
        let report = AnomalyDetector::default().report(&samples, &[], &[], 1, start());

        assert!(report.summary.heart_rate_groups >= 1);
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.category == InsightCategory::Heart));
        assert_eq!(report.sleep.status(), "no_data");
    }
}
