//! Engine configuration
//!
//! Every threshold the engine uses lives here with its default. Demographic
//! values (resting/max heart rate, calorie need) are population defaults and
//! should be overridden per user when known.

use serde::{Deserialize, Serialize};

use crate::anomaly::ModelKind;
use crate::error::ComputeError;

/// Default rolling window for heart rate features (samples)
pub const DEFAULT_FEATURE_WINDOW: usize = 10;

/// Default number of days of history fed into trend analysis
pub const DEFAULT_TREND_DAYS: usize = 30;

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Rolling window (samples) for heart rate feature extraction
    pub feature_window: usize,
    /// Days of prior summaries used for trends
    pub trend_days: usize,
    pub detector: DetectorConfig,
    pub demographics: Demographics,
    pub daily: DailyConfig,
    pub alerts: AlertConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            feature_window: DEFAULT_FEATURE_WINDOW,
            trend_days: DEFAULT_TREND_DAYS,
            detector: DetectorConfig::default(),
            demographics: Demographics::default(),
            daily: DailyConfig::default(),
            alerts: AlertConfig::default(),
        }
    }
}

/// Anomaly detector thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Minimum readings for statistical detection
    pub min_samples: usize,
    /// |z| above which a reading is anomalous
    pub z_threshold: f64,
    /// |z| above which an anomalous reading is high severity
    pub high_severity_z: f64,
    /// Sub-window size for the sustained-deviation scan
    pub sustained_window: usize,
    /// Minimum readings before the sustained scan runs
    pub min_sustained_samples: usize,
    /// Deviation (in standard deviations) of a sub-window mean
    pub sustained_sigma: f64,
    /// Minimum inter-reading intervals for the HRV estimate
    pub min_hrv_intervals: usize,
    pub very_low_hrv_ms: f64,
    pub low_hrv_ms: f64,
    /// Outlier strategy layered on top of the statistical pass
    pub model: ModelKind,
    /// Minimum feature rows before an outlier model is fitted
    pub min_model_rows: usize,
    /// Expected outlier share passed to the model
    pub contamination: f64,
    /// Anomalies closer than this are merged into one group
    pub group_gap_minutes: i64,
    /// Rest-context reading above this is flagged by the threshold rule
    pub high_resting_bpm: u16,
    /// Active-context reading below this is flagged by the threshold rule
    pub low_active_bpm: u16,
    /// Minimum sessions/activities for sleep and activity outlier detection
    pub min_sessions: usize,
    /// Minimum activities of a single type before that type is modelled
    pub min_activities_per_type: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_samples: 10,
            z_threshold: 3.0,
            high_severity_z: 4.0,
            sustained_window: 10,
            min_sustained_samples: 20,
            sustained_sigma: 2.0,
            min_hrv_intervals: 20,
            very_low_hrv_ms: 10.0,
            low_hrv_ms: 20.0,
            model: ModelKind::StatisticalOnly,
            min_model_rows: 50,
            contamination: 0.1,
            group_gap_minutes: 30,
            high_resting_bpm: 120,
            low_active_bpm: 50,
            min_sessions: 10,
            min_activities_per_type: 5,
        }
    }
}

/// Population defaults used where the user's own values are unknown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Demographics {
    pub resting_heart_rate: f64,
    pub max_heart_rate: f64,
    pub daily_calorie_need: f64,
}

impl Default for Demographics {
    fn default() -> Self {
        Self {
            resting_heart_rate: 65.0,
            max_heart_rate: 180.0,
            daily_calorie_need: 2250.0,
        }
    }
}

/// Weights of the composite daily health score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub activity: f64,
    pub sleep: f64,
    pub heart: f64,
    pub recovery: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            activity: 0.35,
            sleep: 0.35,
            heart: 0.20,
            recovery: 0.10,
        }
    }
}

impl ScoreWeights {
    pub fn total(&self) -> f64 {
        self.activity + self.sleep + self.heart + self.recovery
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DailyConfig {
    /// Step goal used when the user has none
    pub step_goal: u64,
    /// Number of lowest rest/sleep readings averaged into resting HR
    pub resting_hr_lowest_n: usize,
    pub weights: ScoreWeights,
}

impl Default for DailyConfig {
    fn default() -> Self {
        Self {
            step_goal: 10_000,
            resting_hr_lowest_n: 5,
            weights: ScoreWeights::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// How far back anomalies still raise alerts
    pub anomaly_lookback_hours: i64,
    /// Hour of day after which a day without activity raises an alert
    pub inactivity_cutoff_hour: u32,
    /// Consecutive inactive days for a prolonged-inactivity alert
    pub prolonged_inactive_days: u32,
    pub short_sleep_minutes: f64,
    pub poor_sleep_score: f64,
    /// Mean rest-context heart rate above this raises an alert
    pub elevated_resting_bpm: f64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            anomaly_lookback_hours: 24,
            inactivity_cutoff_hour: 15,
            prolonged_inactive_days: 3,
            short_sleep_minutes: 360.0,
            poor_sleep_score: 50.0,
            elevated_resting_bpm: 85.0,
        }
    }
}

impl EngineConfig {
    /// Load configuration from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, ComputeError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ComputeError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject configurations that would make the engine misbehave
    pub fn validate(&self) -> Result<(), ComputeError> {
        let d = &self.detector;

        let windows = [
            ("feature_window", self.feature_window),
            ("trend_days", self.trend_days),
            ("detector.min_samples", d.min_samples),
            ("detector.sustained_window", d.sustained_window),
            ("detector.min_hrv_intervals", d.min_hrv_intervals),
            ("detector.min_model_rows", d.min_model_rows),
            ("detector.min_sessions", d.min_sessions),
            ("daily.resting_hr_lowest_n", self.daily.resting_hr_lowest_n),
        ];
        for (name, value) in windows {
            if value == 0 {
                return Err(ComputeError::InvalidConfig(format!(
                    "{name} must be greater than zero"
                )));
            }
        }

        if d.min_samples < 2 {
            return Err(ComputeError::InvalidConfig(
                "detector.min_samples must be at least 2".to_string(),
            ));
        }
        if d.min_sustained_samples < d.sustained_window {
            return Err(ComputeError::InvalidConfig(
                "detector.min_sustained_samples must be at least detector.sustained_window"
                    .to_string(),
            ));
        }
        if !(d.contamination > 0.0 && d.contamination <= 0.5) {
            return Err(ComputeError::InvalidConfig(format!(
                "detector.contamination must be in (0, 0.5], got {}",
                d.contamination
            )));
        }
        if d.z_threshold <= 0.0 || d.high_severity_z < d.z_threshold {
            return Err(ComputeError::InvalidConfig(
                "detector z thresholds must be positive and high_severity_z >= z_threshold"
                    .to_string(),
            ));
        }
        if d.group_gap_minutes < 0 {
            return Err(ComputeError::InvalidConfig(
                "detector.group_gap_minutes must not be negative".to_string(),
            ));
        }

        let demo = &self.demographics;
        if demo.max_heart_rate <= demo.resting_heart_rate || demo.resting_heart_rate <= 0.0 {
            return Err(ComputeError::InvalidConfig(
                "demographics require 0 < resting_heart_rate < max_heart_rate".to_string(),
            ));
        }
        if demo.daily_calorie_need <= 0.0 {
            return Err(ComputeError::InvalidConfig(
                "demographics.daily_calorie_need must be positive".to_string(),
            ));
        }

        if self.daily.step_goal == 0 {
            return Err(ComputeError::InvalidConfig(
                "daily.step_goal must be greater than zero".to_string(),
            ));
        }
        let w = &self.daily.weights;
        if [w.activity, w.sleep, w.heart, w.recovery].iter().any(|v| *v < 0.0)
            || (w.total() - 1.0).abs() > 1e-6
        {
            return Err(ComputeError::InvalidConfig(format!(
                "daily.weights must be non-negative and sum to 1.0, got {:.3}",
                w.total()
            )));
        }

        if self.alerts.inactivity_cutoff_hour > 23 {
            return Err(ComputeError::InvalidConfig(
                "alerts.inactivity_cutoff_hour must be in 0..=23".to_string(),
            ));
        }
        if self.alerts.prolonged_inactive_days == 0 || self.alerts.anomaly_lookback_hours <= 0 {
            return Err(ComputeError::InvalidConfig(
                "alerts windows must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EngineConfig::from_json(r#"{"detector": {"z_threshold": 2.5}}"#).unwrap();

        assert!((config.detector.z_threshold - 2.5).abs() < 1e-9);
        assert_eq!(config.detector.sustained_window, 10);
        assert_eq!(config.daily, DailyConfig::default());
    }

    #[test]
    fn test_json_roundtrip() {
        let config = EngineConfig::default();
        let json = config.to_json().unwrap();
        let restored = EngineConfig::from_json(&json).unwrap();

        assert_eq!(config, restored);
    }

    #[test]
    fn test_zero_window_rejected() {
        let mut config = EngineConfig::default();
        config.feature_window = 0;

        assert!(matches!(
            config.validate(),
            Err(ComputeError::InvalidConfig(msg)) if msg.contains("feature_window")
        ));
    }

    #[test]
    fn test_negative_window_rejected_at_parse() {
        let result = EngineConfig::from_json(r#"{"feature_window": -5}"#);
        assert!(matches!(result, Err(ComputeError::JsonError(_))));
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let mut config = EngineConfig::default();
        config.daily.weights.activity = 0.5;

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_contamination_bounds() {
        let mut config = EngineConfig::default();
        config.detector.contamination = 0.0;
        assert!(config.validate().is_err());

        config.detector.contamination = 0.6;
        assert!(config.validate().is_err());
    }
}
