//! Core types for the vitals engine
//!
//! This module defines the values that flow through each stage of a batch:
//! raw readings (heart rate, sleep sessions, activities), derived anomaly
//! events, daily summaries, insights and alerts. All inputs are immutable;
//! every stage returns new values.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::ValidationError;

/// Lowest plausible heart rate accepted at ingestion (bpm)
pub const MIN_BPM: u16 = 30;

/// Highest plausible heart rate accepted at ingestion (bpm)
pub const MAX_BPM: u16 = 250;

// ============================================================================
// Readings
// ============================================================================

/// Physiological context a heart rate sample was recorded in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartRateContext {
    Rest,
    Active,
    Workout,
    Recovery,
    Sleep,
    #[default]
    Unknown,
}

impl HeartRateContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            HeartRateContext::Rest => "rest",
            HeartRateContext::Active => "active",
            HeartRateContext::Workout => "workout",
            HeartRateContext::Recovery => "recovery",
            HeartRateContext::Sleep => "sleep",
            HeartRateContext::Unknown => "unknown",
        }
    }

    /// Numeric code used in feature vectors
    pub fn code(&self) -> f64 {
        match self {
            HeartRateContext::Rest => 0.0,
            HeartRateContext::Active => 1.0,
            HeartRateContext::Workout => 2.0,
            HeartRateContext::Recovery => 3.0,
            HeartRateContext::Sleep => 4.0,
            HeartRateContext::Unknown => 5.0,
        }
    }

    pub fn is_resting(&self) -> bool {
        matches!(self, HeartRateContext::Rest | HeartRateContext::Sleep)
    }
}

/// A single heart rate reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartRateSample {
    /// Identifier assigned by the store
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub bpm: u16,
    /// Device confidence in [0, 1]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub context: HeartRateContext,
}

impl HeartRateSample {
    pub fn new(
        id: impl Into<String>,
        timestamp: DateTime<Utc>,
        bpm: u16,
        context: HeartRateContext,
    ) -> Self {
        Self {
            id: id.into(),
            timestamp,
            bpm,
            confidence: None,
            context,
        }
    }

    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), ValidationError> {
        if !(MIN_BPM..=MAX_BPM).contains(&self.bpm) {
            return Err(ValidationError::HeartRateOutOfRange {
                bpm: self.bpm,
                min: MIN_BPM,
                max: MAX_BPM,
            });
        }
        if let Some(confidence) = self.confidence {
            if !(0.0..=1.0).contains(&confidence) {
                return Err(ValidationError::ConfidenceOutOfRange(confidence));
            }
        }
        if self.timestamp > now {
            return Err(ValidationError::FutureTimestamp {
                timestamp: self.timestamp.to_rfc3339(),
                now: now.to_rfc3339(),
            });
        }
        Ok(())
    }
}

/// One night (or nap) of sleep with per-stage minutes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepSession {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub awake_minutes: f64,
    #[serde(default)]
    pub light_minutes: f64,
    #[serde(default)]
    pub deep_minutes: f64,
    #[serde(default)]
    pub rem_minutes: f64,
    #[serde(default)]
    pub interruptions: u32,
    /// Device-reported efficiency percentage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub efficiency: Option<f64>,
    /// Device-reported or previously computed quality score (0-100)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
}

impl SleepSession {
    /// Session built from stage minutes only
    pub fn from_stages(
        id: impl Into<String>,
        awake: f64,
        light: f64,
        deep: f64,
        rem: f64,
    ) -> Self {
        Self {
            id: id.into(),
            start: None,
            end: None,
            awake_minutes: awake,
            light_minutes: light,
            deep_minutes: deep,
            rem_minutes: rem,
            interruptions: 0,
            efficiency: None,
            quality_score: None,
        }
    }

    /// Time spent asleep (light + deep + REM)
    pub fn total_sleep_minutes(&self) -> f64 {
        self.light_minutes + self.deep_minutes + self.rem_minutes
    }

    /// Time in bed: end - start when both are known, else the sum of all stages
    pub fn duration_minutes(&self) -> f64 {
        match (self.start, self.end) {
            (Some(start), Some(end)) if end > start => (end - start).num_seconds() as f64 / 60.0,
            _ => self.total_sleep_minutes() + self.awake_minutes,
        }
    }

    /// Sleep efficiency percentage (total sleep / time in bed)
    pub fn efficiency_pct(&self) -> f64 {
        if let Some(efficiency) = self.efficiency {
            return efficiency;
        }
        let duration = self.duration_minutes();
        if duration > 0.0 {
            self.total_sleep_minutes() / duration * 100.0
        } else {
            0.0
        }
    }

    pub fn deep_percentage(&self) -> f64 {
        share(self.deep_minutes, self.total_sleep_minutes())
    }

    pub fn rem_percentage(&self) -> f64 {
        share(self.rem_minutes, self.total_sleep_minutes())
    }

    pub fn light_percentage(&self) -> f64 {
        share(self.light_minutes, self.total_sleep_minutes())
    }

    /// Awake time as a share of time in bed
    pub fn awake_percentage(&self) -> f64 {
        share(self.awake_minutes, self.duration_minutes())
    }

    pub fn is_restless(&self) -> bool {
        self.awake_minutes > 60.0 || self.interruptions > 10
    }

    /// Calendar date the session is attributed to (its start, else its end)
    pub fn date(&self) -> Option<NaiveDate> {
        self.start.or(self.end).map(|t| t.date_naive())
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if end <= start {
                return Err(ValidationError::EndBeforeStart {
                    start: start.to_rfc3339(),
                    end: end.to_rfc3339(),
                });
            }
        }
        for (field, value) in [
            ("awake_minutes", self.awake_minutes),
            ("light_minutes", self.light_minutes),
            ("deep_minutes", self.deep_minutes),
            ("rem_minutes", self.rem_minutes),
        ] {
            if value < 0.0 {
                return Err(ValidationError::NegativeValue { field, value });
            }
        }
        Ok(())
    }
}

fn share(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        part / whole * 100.0
    } else {
        0.0
    }
}

/// Workout / activity category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActivityType {
    Walking,
    Running,
    Cycling,
    Swimming,
    Hiking,
    Yoga,
    StrengthTraining,
    Hiit,
    Dancing,
    Sports,
    Workout,
    Other,
}

impl ActivityType {
    pub const ALL: [ActivityType; 12] = [
        ActivityType::Walking,
        ActivityType::Running,
        ActivityType::Cycling,
        ActivityType::Swimming,
        ActivityType::Hiking,
        ActivityType::Yoga,
        ActivityType::StrengthTraining,
        ActivityType::Hiit,
        ActivityType::Dancing,
        ActivityType::Sports,
        ActivityType::Workout,
        ActivityType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::Walking => "walking",
            ActivityType::Running => "running",
            ActivityType::Cycling => "cycling",
            ActivityType::Swimming => "swimming",
            ActivityType::Hiking => "hiking",
            ActivityType::Yoga => "yoga",
            ActivityType::StrengthTraining => "strength_training",
            ActivityType::Hiit => "hiit",
            ActivityType::Dancing => "dancing",
            ActivityType::Sports => "sports",
            ActivityType::Workout => "workout",
            ActivityType::Other => "other",
        }
    }
}

/// Unknown activity names map to `Other`
impl From<String> for ActivityType {
    fn from(value: String) -> Self {
        let normalized = value.trim().to_ascii_lowercase();
        ActivityType::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .unwrap_or(ActivityType::Other)
    }
}

impl From<ActivityType> for String {
    fn from(value: ActivityType) -> Self {
        value.as_str().to_string()
    }
}

/// A recorded workout or activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: String,
    pub activity_type: ActivityType,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub calories_burned: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_heart_rate: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_heart_rate: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_heart_rate: Option<u16>,
    /// Device-reported pace in minutes per km
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_pace_min_per_km: Option<f64>,
}

impl Activity {
    pub fn new(
        id: impl Into<String>,
        activity_type: ActivityType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            activity_type,
            start,
            end,
            calories_burned: 0.0,
            distance_km: None,
            steps: None,
            avg_heart_rate: None,
            max_heart_rate: None,
            min_heart_rate: None,
            avg_pace_min_per_km: None,
        }
    }

    pub fn duration_minutes(&self) -> f64 {
        ((self.end - self.start).num_seconds() as f64 / 60.0).max(0.0)
    }

    pub fn date(&self) -> NaiveDate {
        self.start.date_naive()
    }

    /// Pace in minutes per km, preferring the device value
    pub fn pace_min_per_km(&self) -> Option<f64> {
        if let Some(pace) = self.avg_pace_min_per_km.filter(|p| *p > 0.0) {
            return Some(pace);
        }
        match self.distance_km {
            Some(distance) if distance > 0.0 && self.duration_minutes() > 0.0 => {
                Some(self.duration_minutes() / distance)
            }
            _ => None,
        }
    }

    pub fn speed_kmh(&self) -> Option<f64> {
        self.pace_min_per_km().map(|pace| 60.0 / pace)
    }

    pub fn calories_per_minute(&self) -> f64 {
        let duration = self.duration_minutes();
        if duration > 0.0 {
            self.calories_burned / duration
        } else {
            0.0
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.end <= self.start {
            return Err(ValidationError::EndBeforeStart {
                start: self.start.to_rfc3339(),
                end: self.end.to_rfc3339(),
            });
        }
        if self.calories_burned < 0.0 {
            return Err(ValidationError::NegativeValue {
                field: "calories_burned",
                value: self.calories_burned,
            });
        }
        if let Some(distance) = self.distance_km.filter(|d| *d < 0.0) {
            return Err(ValidationError::NegativeValue {
                field: "distance_km",
                value: distance,
            });
        }
        Ok(())
    }
}

// ============================================================================
// Anomalies
// ============================================================================

/// Severity shared by anomalies and alerts, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Next severity level; `Critical` stays `Critical`
    pub fn escalate(self) -> Self {
        match self {
            Severity::Info => Severity::Low,
            Severity::Low => Severity::Medium,
            Severity::Medium => Severity::High,
            Severity::High | Severity::Critical => Severity::Critical,
        }
    }
}

/// Signal an anomaly was detected on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    HeartRate,
    HeartRateVariability,
    Sleep,
    Activity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    HighHeartRate,
    LowHeartRate,
    SustainedHighHeartRate,
    SustainedLowHeartRate,
    VeryLowHrv,
    LowHrv,
    HighRestingHeartRate,
    LowHeartRateWhileActive,
    ModelOutlier,
    ExtremelyShortSleep,
    ExtremelyLongSleep,
    VeryLowSleepEfficiency,
    IrregularSleepPattern,
    ExtremelyLongActivity,
    ExtremelyHighCalorieBurn,
    IrregularActivityPattern,
}

impl AnomalyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyType::HighHeartRate => "high_heart_rate",
            AnomalyType::LowHeartRate => "low_heart_rate",
            AnomalyType::SustainedHighHeartRate => "sustained_high_heart_rate",
            AnomalyType::SustainedLowHeartRate => "sustained_low_heart_rate",
            AnomalyType::VeryLowHrv => "very_low_hrv",
            AnomalyType::LowHrv => "low_hrv",
            AnomalyType::HighRestingHeartRate => "high_resting_heart_rate",
            AnomalyType::LowHeartRateWhileActive => "low_heart_rate_while_active",
            AnomalyType::ModelOutlier => "model_outlier",
            AnomalyType::ExtremelyShortSleep => "extremely_short_sleep",
            AnomalyType::ExtremelyLongSleep => "extremely_long_sleep",
            AnomalyType::VeryLowSleepEfficiency => "very_low_sleep_efficiency",
            AnomalyType::IrregularSleepPattern => "irregular_sleep_pattern",
            AnomalyType::ExtremelyLongActivity => "extremely_long_activity",
            AnomalyType::ExtremelyHighCalorieBurn => "extremely_high_calorie_burn",
            AnomalyType::IrregularActivityPattern => "irregular_activity_pattern",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    ZScore,
    SlidingWindow,
    HrvEstimator,
    IsolationForest,
    Threshold,
}

/// Whether an anomaly belongs to one reading or to a span of readings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyScope {
    Reading,
    Window,
}

/// A detected anomaly. Produced by the detector, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyEvent {
    /// Reading id for reading-scoped events, a window key otherwise
    pub source_id: String,
    pub scope: AnomalyScope,
    pub metric: Metric,
    pub anomaly_type: AnomalyType,
    pub severity: Severity,
    pub detection_method: DetectionMethod,
    /// Method-specific score (z-score, RMSSD, isolation score)
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub description: String,
}

impl AnomalyEvent {
    pub fn duration_minutes(&self) -> f64 {
        (self.end - self.start).num_seconds() as f64 / 60.0
    }
}

/// Flag attached to a stored reading; at most one per source id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyFlag {
    pub source_id: String,
    pub metric: Metric,
    pub anomaly_type: AnomalyType,
    pub severity: Severity,
}

// ============================================================================
// Insights & alerts
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightCategory {
    Activity,
    Sleep,
    Heart,
    Recovery,
    Overall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightType {
    Achievement,
    Progress,
    Warning,
    Recommendation,
    Pattern,
    Trend,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

/// Consumer-driven insight lifecycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightStatus {
    #[default]
    New,
    Applied,
    Dismissed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub id: Uuid,
    pub category: InsightCategory,
    pub insight_type: InsightType,
    pub title: String,
    pub description: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data_points: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub action_items: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub status: InsightStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
}

impl Insight {
    pub fn new(
        category: InsightCategory,
        insight_type: InsightType,
        title: impl Into<String>,
        description: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            category,
            insight_type,
            title: title.into(),
            description: description.into(),
            confidence: confidence.clamp(0.0, 1.0),
            data_points: BTreeMap::new(),
            action_items: Vec::new(),
            priority: None,
            status: InsightStatus::New,
            start_date: None,
            end_date: None,
        }
    }

    pub fn with_data(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.data_points.insert(key.to_string(), value.into());
        self
    }

    pub fn with_actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.action_items.extend(actions.into_iter().map(Into::into));
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn for_dates(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.start_date = Some(start);
        self.end_date = Some(end);
        self
    }

    pub fn apply(&mut self) {
        self.status = InsightStatus::Applied;
    }

    pub fn dismiss(&mut self) {
        self.status = InsightStatus::Dismissed;
    }

    /// Natural key: reruns over the same dates produce the same key
    pub fn dedupe_key(&self) -> InsightKey {
        InsightKey {
            category: self.category,
            insight_type: self.insight_type,
            title: self.title.clone(),
            start_date: self.start_date,
            end_date: self.end_date,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InsightKey {
    pub category: InsightCategory,
    pub insight_type: InsightType,
    pub title: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Anomaly,
    HeartRateHigh,
    Inactivity,
    ProlongedInactivity,
    SleepPoor,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::Anomaly => "anomaly",
            AlertType::HeartRateHigh => "heart_rate_high",
            AlertType::Inactivity => "inactivity",
            AlertType::ProlongedInactivity => "prolonged_inactivity",
            AlertType::SleepPoor => "sleep_poor",
        }
    }
}

/// Consumer-driven alert lifecycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    #[default]
    New,
    Read,
    Acknowledged,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_value: Option<f64>,
    /// Source reading / anomaly this alert was raised for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_id: Option<String>,
    pub triggered_at: DateTime<Utc>,
    #[serde(default)]
    pub status: AlertStatus,
}

impl Alert {
    pub fn new(
        alert_type: AlertType,
        severity: Severity,
        title: impl Into<String>,
        message: impl Into<String>,
        triggered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            alert_type,
            severity,
            title: title.into(),
            message: message.into(),
            metric_value: None,
            metric_unit: None,
            threshold_value: None,
            related_id: None,
            triggered_at,
            status: AlertStatus::New,
        }
    }

    pub fn with_metric(mut self, value: f64, unit: &str, threshold: Option<f64>) -> Self {
        self.metric_value = Some(value);
        self.metric_unit = Some(unit.to_string());
        self.threshold_value = threshold;
        self
    }

    pub fn related_to(mut self, id: impl Into<String>) -> Self {
        self.related_id = Some(id.into());
        self
    }

    /// Copy of this alert one severity level higher, as a new unread alert
    pub fn escalate(&self, at: DateTime<Utc>) -> Alert {
        Alert {
            id: Uuid::new_v4(),
            severity: self.severity.escalate(),
            triggered_at: at,
            status: AlertStatus::New,
            related_id: self.related_id.clone().or_else(|| Some(self.id.to_string())),
            ..self.clone()
        }
    }

    pub fn mark_read(&mut self) {
        if self.status == AlertStatus::New {
            self.status = AlertStatus::Read;
        }
    }

    pub fn acknowledge(&mut self) {
        self.status = AlertStatus::Acknowledged;
    }

    /// Natural key: one alert per rule and related record, or per rule,
    /// title and day when the alert has no related record
    pub fn dedupe_key(&self) -> AlertKey {
        let subject = match &self.related_id {
            Some(id) => AlertSubject::Record(id.clone()),
            None => AlertSubject::Day(self.triggered_at.date_naive()),
        };
        AlertKey {
            alert_type: self.alert_type,
            title: self.title.clone(),
            subject,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AlertSubject {
    Record(String),
    Day(NaiveDate),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AlertKey {
    pub alert_type: AlertType,
    pub title: String,
    pub subject: AlertSubject,
}

// ============================================================================
// Daily summaries & goals
// ============================================================================

/// One summary per user and calendar date (upsert key `(user_id, date)`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    pub user_id: String,
    pub date: NaiveDate,
    pub total_steps: u64,
    pub total_calories: f64,
    pub activity_count: u32,
    pub active_minutes: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_duration_minutes: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_efficiency: Option<f64>,
    /// Bedtime of the night's first session in minutes from midnight
    /// (negative before midnight)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bedtime_minutes: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_heart_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_heart_rate: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_heart_rate: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resting_heart_rate: Option<f64>,
    /// RMSSD estimate (ms)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heart_rate_variability: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_score: Option<f64>,
    pub overall_score: f64,
    pub is_complete: bool,
    #[serde(default)]
    pub insights: Vec<Insight>,
    #[serde(default)]
    pub recommendations: Vec<Insight>,
    pub processed_at: DateTime<Utc>,
}

impl DailySummary {
    pub fn empty(user_id: impl Into<String>, date: NaiveDate, processed_at: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            date,
            total_steps: 0,
            total_calories: 0.0,
            activity_count: 0,
            active_minutes: 0.0,
            sleep_duration_minutes: None,
            sleep_score: None,
            sleep_efficiency: None,
            bedtime_minutes: None,
            avg_heart_rate: None,
            min_heart_rate: None,
            max_heart_rate: None,
            resting_heart_rate: None,
            heart_rate_variability: None,
            recovery_score: None,
            overall_score: 0.0,
            is_complete: false,
            insights: Vec::new(),
            recommendations: Vec::new(),
            processed_at,
        }
    }

    pub fn key(&self) -> (&str, NaiveDate) {
        (&self.user_id, self.date)
    }

    pub fn is_healthy_day(&self) -> bool {
        self.total_steps >= 8000
            && self.sleep_duration_minutes.unwrap_or(0.0) >= 420.0
            && self.active_minutes >= 30.0
            && self.overall_score >= 70.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalType {
    Steps,
    Sleep,
    Activity,
    Calories,
}

/// A user goal with its streak bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthGoal {
    pub id: String,
    pub goal_type: GoalType,
    pub target_value: f64,
    #[serde(default)]
    pub current_streak: u32,
    #[serde(default)]
    pub longest_streak: u32,
    /// Last date the goal was met; re-tracking it or an earlier date leaves streaks alone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_met: Option<NaiveDate>,
}

impl HealthGoal {
    pub fn new(id: impl Into<String>, goal_type: GoalType, target_value: f64) -> Self {
        Self {
            id: id.into(),
            goal_type,
            target_value,
            current_streak: 0,
            longest_streak: 0,
            last_met: None,
        }
    }
}

/// Coarse consistency rating derived from a standard deviation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyLevel {
    High,
    Medium,
    Low,
}

impl ConsistencyLevel {
    pub fn from_std(std: f64, high_below: f64, medium_below: f64) -> Self {
        if std < high_below {
            ConsistencyLevel::High
        } else if std < medium_below {
            ConsistencyLevel::Medium
        } else {
            ConsistencyLevel::Low
        }
    }
}

// ============================================================================
// Analysis outcome
// ============================================================================

/// Outcome of an analysis that may lack data.
///
/// Sparse input is an expected state, not an error: callers branch on the
/// status instead of catching failures. Serialized as `{"status", "data"}`
/// so sequences can be carried as well as structs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum Analysis<T> {
    Ready(T),
    NoData {
        reason: String,
    },
    InsufficientData {
        reason: String,
        available: usize,
        required: usize,
    },
}

impl<T> Analysis<T> {
    pub fn no_data(reason: impl Into<String>) -> Self {
        Analysis::NoData {
            reason: reason.into(),
        }
    }

    pub fn insufficient(reason: impl Into<String>, available: usize, required: usize) -> Self {
        Analysis::InsufficientData {
            reason: reason.into(),
            available,
            required,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Analysis::Ready(_))
    }

    pub fn ready(&self) -> Option<&T> {
        match self {
            Analysis::Ready(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_ready(self) -> Option<T> {
        match self {
            Analysis::Ready(value) => Some(value),
            _ => None,
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            Analysis::Ready(_) => "ready",
            Analysis::NoData { .. } => "no_data",
            Analysis::InsufficientData { .. } => "insufficient_data",
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Analysis<U> {
        match self {
            Analysis::Ready(value) => Analysis::Ready(f(value)),
            Analysis::NoData { reason } => Analysis::NoData { reason },
            Analysis::InsufficientData {
                reason,
                available,
                required,
            } => Analysis::InsufficientData {
                reason,
                available,
                required,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, h, m, 0).unwrap()
    }

    #[test]
    fn test_stage_only_session_derives_duration_and_efficiency() {
        let session = SleepSession::from_stages("s1", 30.0, 240.0, 90.0, 100.0);

        assert!((session.duration_minutes() - 460.0).abs() < 1e-9);
        assert!((session.total_sleep_minutes() - 430.0).abs() < 1e-9);
        assert!((session.efficiency_pct() - 430.0 / 460.0 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_session_duration_prefers_timestamps() {
        let mut session = SleepSession::from_stages("s1", 20.0, 210.0, 90.0, 100.0);
        session.start = Some(at(0, 0));
        session.end = Some(at(8, 0));

        assert!((session.duration_minutes() - 480.0).abs() < 1e-9);
        // 400 / 480
        assert!((session.efficiency_pct() - 83.333).abs() < 0.01);
    }

    #[test]
    fn test_session_rejects_inverted_times() {
        let mut session = SleepSession::from_stages("s1", 0.0, 100.0, 0.0, 0.0);
        session.start = Some(at(8, 0));
        session.end = Some(at(7, 0));

        assert!(matches!(
            session.validate(),
            Err(ValidationError::EndBeforeStart { .. })
        ));
    }

    #[test]
    fn test_heart_rate_validation() {
        let now = at(12, 0);
        let ok = HeartRateSample::new("a", at(11, 0), 72, HeartRateContext::Rest);
        assert!(ok.validate(now).is_ok());

        let too_high = HeartRateSample::new("b", at(11, 0), 251, HeartRateContext::Rest);
        assert!(matches!(
            too_high.validate(now),
            Err(ValidationError::HeartRateOutOfRange { bpm: 251, .. })
        ));

        let future = HeartRateSample::new("c", at(13, 0), 72, HeartRateContext::Rest);
        assert!(matches!(
            future.validate(now),
            Err(ValidationError::FutureTimestamp { .. })
        ));
    }

    #[test]
    fn test_unknown_activity_type_maps_to_other() {
        let parsed: ActivityType = serde_json::from_str("\"parkour\"").unwrap();
        assert_eq!(parsed, ActivityType::Other);

        let parsed: ActivityType = serde_json::from_str("\"strength_training\"").unwrap();
        assert_eq!(parsed, ActivityType::StrengthTraining);
        assert_eq!(serde_json::to_string(&parsed).unwrap(), "\"strength_training\"");
    }

    #[test]
    fn test_activity_pace_and_speed() {
        let mut activity = Activity::new("r1", ActivityType::Running, at(7, 0), at(7, 30));
        activity.distance_km = Some(6.0);

        assert!((activity.pace_min_per_km().unwrap() - 5.0).abs() < 1e-9);
        assert!((activity.speed_kmh().unwrap() - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_severity_escalation_saturates() {
        assert_eq!(Severity::Low.escalate(), Severity::Medium);
        assert_eq!(Severity::Critical.escalate(), Severity::Critical);
        assert!(Severity::High > Severity::Medium);
    }

    #[test]
    fn test_alert_escalate_returns_new_alert() {
        let alert = Alert::new(
            AlertType::SleepPoor,
            Severity::Medium,
            "Short sleep",
            "You slept 5 hours",
            at(8, 0),
        );
        let escalated = alert.escalate(at(9, 0));

        assert_eq!(escalated.severity, Severity::High);
        assert_eq!(alert.severity, Severity::Medium);
        assert_ne!(escalated.id, alert.id);
        assert_eq!(escalated.related_id, Some(alert.id.to_string()));
    }

    #[test]
    fn test_alert_key_ignores_fresh_ids() {
        let inactive = |h| {
            Alert::new(AlertType::Inactivity, Severity::Low, "Inactive Day", "", at(h, 0))
        };
        assert_ne!(inactive(15).id, inactive(18).id);
        assert_eq!(inactive(15).dedupe_key(), inactive(18).dedupe_key());

        let next_day = Alert::new(
            AlertType::Inactivity,
            Severity::Low,
            "Inactive Day",
            "",
            at(15, 0) + chrono::Duration::days(1),
        );
        assert_ne!(next_day.dedupe_key(), inactive(15).dedupe_key());

        // an alert tied to a reading keeps its key across days
        let spike = |when: DateTime<Utc>| {
            Alert::new(AlertType::Anomaly, Severity::High, "Heart Rate Anomaly Detected", "", when)
                .related_to("hr-7")
        };
        let later = at(9, 0) + chrono::Duration::days(1);
        assert_eq!(spike(at(9, 0)).dedupe_key(), spike(later).dedupe_key());
    }

    #[test]
    fn test_analysis_serializes_with_status_tag() {
        let analysis: Analysis<SleepSession> = Analysis::insufficient("need more", 3, 10);
        let json = serde_json::to_value(&analysis).unwrap();

        assert_eq!(json["status"], "insufficient_data");
        assert_eq!(json["data"]["required"], 10);

        let ready: Analysis<Vec<u32>> = Analysis::Ready(vec![1, 2]);
        let json = serde_json::to_string(&ready).unwrap();
        assert_eq!(json, r#"{"status":"ready","data":[1,2]}"#);
        let back: Analysis<Vec<u32>> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ready);
    }

    #[test]
    fn test_insight_lifecycle() {
        let mut insight = Insight::new(
            InsightCategory::Sleep,
            InsightType::Recommendation,
            "Sleep more",
            "Aim for 7-9 hours",
            1.4,
        );
        assert!((insight.confidence - 1.0).abs() < 1e-9);
        assert_eq!(insight.status, InsightStatus::New);

        insight.apply();
        assert_eq!(insight.status, InsightStatus::Applied);
    }
}
