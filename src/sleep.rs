//! Sleep scoring and analysis
//!
//! This module scores individual sleep sessions and analyzes multi-night
//! patterns:
//! - Composite 0-100 score from duration, efficiency, deep/REM share and
//!   interruptions
//! - Stage and efficiency ratings with explanatory messages
//! - Heart rate while asleep (contextual warnings, never anomalies)
//! - Issues, recommendations, sleep debt and schedule consistency

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::stats;
use crate::types::{
    Analysis, ConsistencyLevel, HeartRateContext, HeartRateSample, Insight, InsightCategory,
    InsightType, Priority, Severity, SleepSession,
};

/// Nightly sleep target used for sleep debt (hours)
const OPTIMAL_SLEEP_HOURS: f64 = 7.5;

const DURATION_WEIGHT: f64 = 0.30;
const EFFICIENCY_WEIGHT: f64 = 0.25;
const DEEP_WEIGHT: f64 = 0.20;
const REM_WEIGHT: f64 = 0.15;
const INTERRUPTION_WEIGHT: f64 = 0.10;

/// Four-level rating used across sleep evaluations
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rating {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl Rating {
    pub fn needs_attention(&self) -> bool {
        matches!(self, Rating::Fair | Rating::Poor)
    }
}

/// Quality category of a sleep score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SleepQuality {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl SleepQuality {
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s >= 85.0 => SleepQuality::Excellent,
            s if s >= 70.0 => SleepQuality::Good,
            s if s >= 50.0 => SleepQuality::Fair,
            _ => SleepQuality::Poor,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageEvaluation {
    pub rating: Rating,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageAnalysis {
    /// Share of time in bed
    pub awake_pct: f64,
    /// Shares of total sleep
    pub light_pct: f64,
    pub deep_pct: f64,
    pub rem_pct: f64,
    pub awake: StageEvaluation,
    pub deep: StageEvaluation,
    pub rem: StageEvaluation,
    pub total_sleep_minutes: f64,
    pub duration_minutes: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EfficiencyAnalysis {
    pub efficiency_pct: f64,
    pub rating: Rating,
    pub message: String,
    pub time_in_bed_minutes: f64,
    pub actual_sleep_minutes: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SleepHeartRateStatus {
    Normal,
    Elevated,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariabilityStatus {
    Normal,
    LowVariability,
    HighVariability,
}

/// Heart rate while asleep. Deviations here are warnings, not anomalies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepHeartRate {
    pub average_bpm: f64,
    pub minimum_bpm: u16,
    pub maximum_bpm: u16,
    pub std_bpm: f64,
    pub reading_count: usize,
    pub status: SleepHeartRateStatus,
    pub variability: VariabilityStatus,
    pub warnings: Vec<String>,
    pub optimal_range: (f64, f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SleepIssueType {
    PotentialInsomnia,
    InsufficientDeepSleep,
    LowSleepEfficiency,
    RestlessSleep,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepIssue {
    pub issue_type: SleepIssueType,
    pub severity: Severity,
    pub description: String,
    pub suggestions: Vec<String>,
}

/// Full analysis of one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepAnalysis {
    pub session_id: String,
    /// Device score when supplied, else the computed score
    pub overall_score: f64,
    pub computed_score: f64,
    pub quality: SleepQuality,
    pub stages: Analysis<StageAnalysis>,
    pub efficiency: EfficiencyAnalysis,
    pub heart_rate: Analysis<SleepHeartRate>,
    pub issues: Vec<SleepIssue>,
    pub recommendations: Vec<Insight>,
}

/// Sleep session scorer
pub struct SleepScorer;

impl SleepScorer {
    /// Composite 0-100 score, rounded to one decimal
    pub fn score(session: &SleepSession) -> f64 {
        let total = duration_factor(session.duration_minutes() / 60.0) * DURATION_WEIGHT
            + efficiency_factor(session.efficiency_pct()) * EFFICIENCY_WEIGHT
            + deep_factor(session.deep_percentage()) * DEEP_WEIGHT
            + rem_factor(session.rem_percentage()) * REM_WEIGHT
            + interruption_factor(session.interruptions) * INTERRUPTION_WEIGHT;
        stats::round_to(total, 1)
    }

    /// Score, stage/efficiency ratings, sleep heart rate, issues and
    /// recommendations for one session. `heart_rate` may contain readings
    /// outside the session; only sleep-context readings inside it are used.
    pub fn analyze(session: &SleepSession, heart_rate: &[HeartRateSample]) -> SleepAnalysis {
        let computed_score = Self::score(session);
        let overall_score = session.quality_score.unwrap_or(computed_score);

        let stages = analyze_stages(session);
        let efficiency = analyze_efficiency(session);
        let heart_rate = analyze_sleep_heart_rate(session, heart_rate);
        let issues = detect_issues(session, &stages, &efficiency);
        let recommendations = recommendations(session, &stages, &efficiency, &heart_rate);

        SleepAnalysis {
            session_id: session.id.clone(),
            overall_score,
            computed_score,
            quality: SleepQuality::from_score(overall_score),
            stages,
            efficiency,
            heart_rate,
            issues,
            recommendations,
        }
    }

    /// Multi-night averages, sleep debt, schedule consistency and patterns
    pub fn patterns(sessions: &[SleepSession]) -> Analysis<SleepPatterns> {
        if sessions.is_empty() {
            return Analysis::no_data("no sleep sessions in the period");
        }

        let durations: Vec<f64> = sessions.iter().map(|s| s.duration_minutes()).collect();
        let efficiencies: Vec<f64> = sessions.iter().map(|s| s.efficiency_pct()).collect();
        let scores: Vec<f64> = sessions
            .iter()
            .map(|s| s.quality_score.unwrap_or_else(|| Self::score(s)))
            .collect();

        let avg_duration = stats::mean(&durations);
        let avg_efficiency = stats::mean(&efficiencies);
        let duration_std = if durations.len() > 1 {
            stats::std_dev(&durations)
        } else {
            0.0
        };

        let bedtimes: Vec<f64> = sessions.iter().filter_map(|s| s.start).map(clock_minutes).collect();
        let waketimes: Vec<f64> = sessions.iter().filter_map(|s| s.end).map(clock_minutes).collect();
        let bedtime_variation = time_variation(&bedtimes);
        let waketime_variation = time_variation(&waketimes);

        let sleep_debt: f64 = durations
            .iter()
            .map(|d| (OPTIMAL_SLEEP_HOURS - d / 60.0).max(0.0))
            .sum();

        let patterns = identify_patterns(sessions);

        let mut recommendations = Vec::new();
        if avg_duration < 420.0 {
            recommendations.push("Aim for 7-9 hours of sleep per night for optimal health.".to_string());
        } else if avg_duration > 540.0 {
            recommendations.push(
                "Consider if excessive sleep is needed or if there's an underlying health issue."
                    .to_string(),
            );
        }
        if avg_efficiency < 85.0 {
            recommendations.push(
                "Improve sleep efficiency by creating a better sleep environment and routine."
                    .to_string(),
            );
        }
        if duration_std > 120.0 {
            recommendations
                .push("Try to maintain more consistent sleep duration each night.".to_string());
        }
        if bedtime_variation > 120.0 {
            recommendations.push("Establish a consistent bedtime, even on weekends.".to_string());
        }

        Analysis::Ready(SleepPatterns {
            nights: sessions.len(),
            average_duration_hours: stats::round_to(avg_duration / 60.0, 1),
            average_efficiency: stats::round_to(avg_efficiency, 1),
            average_score: stats::round_to(stats::mean(&scores), 1),
            sleep_debt_hours: stats::round_to(sleep_debt, 1),
            duration_std_minutes: stats::round_to(duration_std, 1),
            duration_consistency: ConsistencyLevel::from_std(duration_std, 60.0, 120.0),
            bedtime_variation_minutes: stats::round_to(bedtime_variation, 1),
            bedtime_consistency: ConsistencyLevel::from_std(bedtime_variation, 60.0, 120.0),
            waketime_variation_minutes: stats::round_to(waketime_variation, 1),
            waketime_consistency: ConsistencyLevel::from_std(waketime_variation, 60.0, 120.0),
            patterns,
            recommendations,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SleepPatternType {
    WeekendCatchup,
    LateBedtimes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepPattern {
    pub pattern_type: SleepPatternType,
    pub description: String,
    pub interpretation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difference_minutes: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepPatterns {
    pub nights: usize,
    pub average_duration_hours: f64,
    pub average_efficiency: f64,
    pub average_score: f64,
    pub sleep_debt_hours: f64,
    pub duration_std_minutes: f64,
    pub duration_consistency: ConsistencyLevel,
    pub bedtime_variation_minutes: f64,
    pub bedtime_consistency: ConsistencyLevel,
    pub waketime_variation_minutes: f64,
    pub waketime_consistency: ConsistencyLevel,
    pub patterns: Vec<SleepPattern>,
    pub recommendations: Vec<String>,
}

/// Minutes from midnight, with afternoon and evening times negative so that
/// bedtimes either side of midnight stay close together
pub fn clock_minutes(t: DateTime<Utc>) -> f64 {
    let mut minutes = (t.hour() * 60 + t.minute()) as f64;
    if t.hour() >= 12 {
        minutes -= 24.0 * 60.0;
    }
    minutes
}

fn time_variation(minutes: &[f64]) -> f64 {
    if minutes.len() < 2 {
        0.0
    } else {
        stats::std_dev(minutes)
    }
}

pub(crate) fn duration_factor(hours: f64) -> f64 {
    if (7.0..=9.0).contains(&hours) {
        100.0
    } else if (6.0..7.0).contains(&hours) || (hours > 9.0 && hours <= 10.0) {
        70.0
    } else if (5.0..6.0).contains(&hours) || (hours > 10.0 && hours <= 11.0) {
        40.0
    } else {
        20.0
    }
}

fn efficiency_factor(efficiency: f64) -> f64 {
    match efficiency {
        e if e >= 90.0 => 100.0,
        e if e >= 85.0 => 85.0,
        e if e >= 75.0 => 60.0,
        _ => 30.0,
    }
}

/// Piecewise band factor around an optimal range `[lo, hi]` with 5-point
/// shoulders; symmetric, so it rises to the optimum and falls after it
fn banded_factor(pct: f64, lo: f64, hi: f64) -> f64 {
    if (lo..=hi).contains(&pct) {
        100.0
    } else if (lo - 5.0..lo).contains(&pct) || (pct > hi && pct <= hi + 5.0) {
        70.0
    } else if (lo - 10.0..lo - 5.0).contains(&pct) || (pct > hi + 5.0 && pct <= hi + 10.0) {
        40.0
    } else {
        20.0
    }
}

pub(crate) fn deep_factor(pct: f64) -> f64 {
    banded_factor(pct, 15.0, 25.0)
}

pub(crate) fn rem_factor(pct: f64) -> f64 {
    banded_factor(pct, 20.0, 25.0)
}

fn interruption_factor(interruptions: u32) -> f64 {
    match interruptions {
        0..=2 => 100.0,
        3..=5 => 70.0,
        6..=10 => 40.0,
        _ => 10.0,
    }
}

fn band_rating(pct: f64, lo: f64, hi: f64) -> Rating {
    match banded_factor(pct, lo, hi) {
        f if f >= 100.0 => Rating::Excellent,
        f if f >= 70.0 => Rating::Good,
        f if f >= 40.0 => Rating::Fair,
        _ => Rating::Poor,
    }
}

fn evaluation(rating: Rating, messages: [&str; 4]) -> StageEvaluation {
    let message = match rating {
        Rating::Excellent => messages[0],
        Rating::Good => messages[1],
        Rating::Fair => messages[2],
        Rating::Poor => messages[3],
    };
    StageEvaluation {
        rating,
        message: message.to_string(),
    }
}

fn analyze_stages(session: &SleepSession) -> Analysis<StageAnalysis> {
    let total_sleep = session.total_sleep_minutes();
    if total_sleep <= 0.0 {
        return Analysis::no_data(
            "no sleep stage data recorded; ensure sleep tracking is enabled on the device",
        );
    }

    let awake_pct = session.awake_percentage();
    let deep_pct = session.deep_percentage();
    let rem_pct = session.rem_percentage();

    let awake_rating = match awake_pct {
        p if p <= 5.0 => Rating::Excellent,
        p if p <= 10.0 => Rating::Good,
        p if p <= 20.0 => Rating::Fair,
        _ => Rating::Poor,
    };

    Analysis::Ready(StageAnalysis {
        awake_pct: stats::round_to(awake_pct, 1),
        light_pct: stats::round_to(session.light_percentage(), 1),
        deep_pct: stats::round_to(deep_pct, 1),
        rem_pct: stats::round_to(rem_pct, 1),
        awake: evaluation(
            awake_rating,
            [
                "Minimal awake time during sleep",
                "Normal awake time",
                "Slightly elevated awake time",
                "High awake time during sleep",
            ],
        ),
        deep: evaluation(
            band_rating(deep_pct, 15.0, 25.0),
            [
                "Optimal deep sleep",
                "Adequate deep sleep",
                "Moderate deep sleep",
                "Insufficient deep sleep",
            ],
        ),
        rem: evaluation(
            band_rating(rem_pct, 20.0, 25.0),
            [
                "Optimal REM sleep",
                "Adequate REM sleep",
                "Moderate REM sleep",
                "Insufficient REM sleep",
            ],
        ),
        total_sleep_minutes: total_sleep,
        duration_minutes: session.duration_minutes(),
    })
}

fn analyze_efficiency(session: &SleepSession) -> EfficiencyAnalysis {
    let efficiency = session.efficiency_pct();
    let (rating, message) = match efficiency {
        e if e >= 90.0 => (Rating::Excellent, "Very efficient sleep"),
        e if e >= 85.0 => (Rating::Good, "Efficient sleep"),
        e if e >= 75.0 => (Rating::Fair, "Moderate sleep efficiency"),
        _ => (
            Rating::Poor,
            "Low sleep efficiency - consider improving sleep habits",
        ),
    };

    EfficiencyAnalysis {
        efficiency_pct: stats::round_to(efficiency, 1),
        rating,
        message: message.to_string(),
        time_in_bed_minutes: session.duration_minutes(),
        actual_sleep_minutes: session.total_sleep_minutes(),
    }
}

fn analyze_sleep_heart_rate(
    session: &SleepSession,
    readings: &[HeartRateSample],
) -> Analysis<SleepHeartRate> {
    let (Some(start), Some(end)) = (session.start, session.end) else {
        return Analysis::no_data("session has no start and end time");
    };

    let in_session: Vec<&HeartRateSample> = readings
        .iter()
        .filter(|r| {
            r.context == HeartRateContext::Sleep && r.timestamp >= start && r.timestamp <= end
        })
        .collect();
    if in_session.is_empty() {
        return Analysis::no_data("no heart rate data during sleep");
    }

    let bpms: Vec<f64> = in_session.iter().map(|r| r.bpm as f64).collect();
    let average = stats::mean(&bpms);
    let std = stats::std_dev(&bpms);

    let mut warnings = Vec::new();
    let status = if average > 70.0 {
        warnings.push(
            "Elevated heart rate during sleep may indicate stress or poor recovery".to_string(),
        );
        SleepHeartRateStatus::Elevated
    } else if average < 40.0 {
        warnings.push("Very low heart rate during sleep".to_string());
        SleepHeartRateStatus::Low
    } else {
        SleepHeartRateStatus::Normal
    };

    let variability = if std < 5.0 {
        warnings.push("Low heart rate variability detected".to_string());
        VariabilityStatus::LowVariability
    } else if std > 15.0 {
        warnings.push("High heart rate variability detected".to_string());
        VariabilityStatus::HighVariability
    } else {
        VariabilityStatus::Normal
    };

    Analysis::Ready(SleepHeartRate {
        average_bpm: stats::round_to(average, 1),
        minimum_bpm: in_session.iter().map(|r| r.bpm).min().unwrap_or_default(),
        maximum_bpm: in_session.iter().map(|r| r.bpm).max().unwrap_or_default(),
        std_bpm: stats::round_to(std, 2),
        reading_count: in_session.len(),
        status,
        variability,
        warnings,
        optimal_range: (40.0, 70.0),
    })
}

fn detect_issues(
    session: &SleepSession,
    stages: &Analysis<StageAnalysis>,
    efficiency: &EfficiencyAnalysis,
) -> Vec<SleepIssue> {
    let mut issues = Vec::new();

    if session.is_restless() {
        issues.push(SleepIssue {
            issue_type: SleepIssueType::PotentialInsomnia,
            severity: Severity::Medium,
            description: "Extended awake time or frequent interruptions".to_string(),
            suggestions: vec![
                "Establish a consistent sleep schedule".to_string(),
                "Avoid screens 1 hour before bed".to_string(),
                "Create a relaxing bedtime routine".to_string(),
            ],
        });
    }

    if stages.ready().is_some_and(|s| s.deep.rating == Rating::Poor) {
        issues.push(SleepIssue {
            issue_type: SleepIssueType::InsufficientDeepSleep,
            severity: Severity::Medium,
            description: "Deep sleep is below optimal levels".to_string(),
            suggestions: vec![
                "Avoid caffeine after 2 PM".to_string(),
                "Ensure complete darkness in bedroom".to_string(),
                "Keep the bedroom cool (18-20 C)".to_string(),
            ],
        });
    }

    if efficiency.rating == Rating::Poor {
        issues.push(SleepIssue {
            issue_type: SleepIssueType::LowSleepEfficiency,
            severity: Severity::Low,
            description: "Spending too much time in bed awake".to_string(),
            suggestions: vec![
                "Only go to bed when sleepy".to_string(),
                "Get out of bed if awake for more than 20 minutes".to_string(),
                "Use the bed only for sleep".to_string(),
            ],
        });
    }

    if session.is_restless() {
        issues.push(SleepIssue {
            issue_type: SleepIssueType::RestlessSleep,
            severity: Severity::Low,
            description: "Restless sleep detected".to_string(),
            suggestions: vec![
                "Practice relaxation techniques before bed".to_string(),
                "Ensure comfortable bedding".to_string(),
            ],
        });
    }

    issues
}

fn recommendations(
    session: &SleepSession,
    stages: &Analysis<StageAnalysis>,
    efficiency: &EfficiencyAnalysis,
    heart_rate: &Analysis<SleepHeartRate>,
) -> Vec<Insight> {
    let mut out = Vec::new();
    let date = session.date();
    let dated = |insight: Insight| match date {
        Some(d) => insight.for_dates(d, d),
        None => insight,
    };

    if let Some(stages) = stages.ready() {
        if stages.deep.rating.needs_attention() {
            out.push(dated(
                Insight::new(
                    InsightCategory::Sleep,
                    InsightType::Recommendation,
                    "Improve Deep Sleep",
                    "Deep sleep is crucial for physical recovery and memory consolidation.",
                    0.8,
                )
                .with_priority(Priority::Medium)
                .with_data("deep_pct", stages.deep_pct)
                .with_actions([
                    "Exercise regularly but finish at least 3 hours before bedtime",
                    "Limit alcohol consumption, especially close to bedtime",
                    "Maintain a consistent sleep schedule",
                ]),
            ));
        }
        if stages.rem.rating.needs_attention() {
            out.push(dated(
                Insight::new(
                    InsightCategory::Sleep,
                    InsightType::Recommendation,
                    "Enhance REM Sleep",
                    "REM sleep is important for emotional processing and memory.",
                    0.8,
                )
                .with_priority(Priority::Medium)
                .with_data("rem_pct", stages.rem_pct)
                .with_actions([
                    "Reduce stress through meditation or journaling",
                    "Ensure adequate total sleep time (7-9 hours)",
                    "Avoid sleeping pills that can suppress REM sleep",
                ]),
            ));
        }
    }

    if efficiency.rating.needs_attention() {
        out.push(dated(
            Insight::new(
                InsightCategory::Sleep,
                InsightType::Recommendation,
                "Increase Sleep Efficiency",
                "Improve the percentage of time in bed actually spent sleeping.",
                0.85,
            )
            .with_priority(Priority::High)
            .with_data("efficiency_pct", efficiency.efficiency_pct)
            .with_actions([
                "Establish a relaxing pre-sleep routine",
                "Keep your bedroom dark, quiet, and cool",
                "Avoid naps longer than 30 minutes during the day",
            ]),
        ));
    }

    if heart_rate
        .ready()
        .is_some_and(|hr| hr.status == SleepHeartRateStatus::Elevated)
    {
        out.push(dated(
            Insight::new(
                InsightCategory::Heart,
                InsightType::Recommendation,
                "Lower Resting Heart Rate During Sleep",
                "Elevated heart rate during sleep may indicate stress or poor recovery.",
                0.75,
            )
            .with_priority(Priority::Medium)
            .with_actions([
                "Practice deep breathing exercises before bed",
                "Avoid heavy meals close to bedtime",
                "Consider tracking stress levels and addressing stressors",
            ]),
        ));
    }

    out
}

fn identify_patterns(sessions: &[SleepSession]) -> Vec<SleepPattern> {
    let mut patterns = Vec::new();

    let mut weekday = Vec::new();
    let mut weekend = Vec::new();
    for session in sessions {
        if let Some(start) = session.start {
            if start.weekday().num_days_from_monday() < 5 {
                weekday.push(session.duration_minutes());
            } else {
                weekend.push(session.duration_minutes());
            }
        }
    }
    if !weekday.is_empty() && !weekend.is_empty() {
        let difference = stats::mean(&weekend) - stats::mean(&weekday);
        if difference > 60.0 {
            patterns.push(SleepPattern {
                pattern_type: SleepPatternType::WeekendCatchup,
                description: "Sleeping significantly longer on weekends".to_string(),
                interpretation: "May indicate sleep deprivation during weekdays".to_string(),
                difference_minutes: Some(difference.round()),
            });
        }
    }

    let timed: Vec<DateTime<Utc>> = sessions.iter().filter_map(|s| s.start).collect();
    if !timed.is_empty() {
        let late = timed.iter().filter(|t| t.hour() >= 23).count();
        if late as f64 / timed.len() as f64 > 0.5 {
            patterns.push(SleepPattern {
                pattern_type: SleepPatternType::LateBedtimes,
                description: "Consistently going to bed after 11 PM".to_string(),
                interpretation: "May affect sleep quality and circadian rhythm".to_string(),
                difference_minutes: None,
            });
        }
    }

    patterns
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn reference_session() -> SleepSession {
        let start = Utc.with_ymd_and_hms(2024, 1, 14, 23, 0, 0).unwrap();
        SleepSession {
            id: "night".to_string(),
            start: Some(start),
            end: Some(start + Duration::minutes(420)),
            awake_minutes: 20.0,
            light_minutes: 210.0,
            deep_minutes: 90.0,
            rem_minutes: 100.0,
            interruptions: 1,
            efficiency: Some(95.0),
            quality_score: None,
        }
    }

    #[test]
    fn test_reference_session_is_excellent() {
        let session = reference_session();
        let score = SleepScorer::score(&session);

        assert!(score >= 85.0);
        assert_eq!(score, 100.0);
        assert_eq!(SleepQuality::from_score(score), SleepQuality::Excellent);
    }

    #[test]
    fn test_deep_factor_is_unimodal() {
        let values: Vec<f64> = (0..=100).map(|i| deep_factor(i as f64 * 0.5)).collect();
        let peak = values
            .iter()
            .position(|v| *v == 100.0)
            .expect("optimum reached");

        assert!(values[..=peak].windows(2).all(|w| w[0] <= w[1]));
        let last_peak = values.iter().rposition(|v| *v == 100.0).unwrap();
        assert!(values[last_peak..].windows(2).all(|w| w[0] >= w[1]));
        assert!(values[peak..=last_peak].iter().all(|v| *v == 100.0));
    }

    #[test]
    fn test_factor_tables() {
        assert_eq!(duration_factor(6.5), 70.0);
        assert_eq!(duration_factor(9.5), 70.0);
        assert_eq!(duration_factor(4.0), 20.0);
        assert_eq!(efficiency_factor(86.0), 85.0);
        assert_eq!(rem_factor(32.0), 40.0);
        assert_eq!(interruption_factor(11), 10.0);
    }

    #[test]
    fn test_device_score_takes_precedence() {
        let mut session = reference_session();
        session.quality_score = Some(62.0);
        let analysis = SleepScorer::analyze(&session, &[]);

        assert_eq!(analysis.overall_score, 62.0);
        assert_eq!(analysis.computed_score, 100.0);
        assert_eq!(analysis.quality, SleepQuality::Fair);
    }

    #[test]
    fn test_empty_stages_report_no_data() {
        let session = SleepSession::from_stages("s", 30.0, 0.0, 0.0, 0.0);
        let analysis = SleepScorer::analyze(&session, &[]);

        assert_eq!(analysis.stages.status(), "no_data");
        assert_eq!(analysis.efficiency.rating, Rating::Poor);
    }

    #[test]
    fn test_restless_session_issues() {
        let mut session = reference_session();
        session.awake_minutes = 90.0;
        session.deep_minutes = 10.0;
        session.efficiency = Some(70.0);
        let analysis = SleepScorer::analyze(&session, &[]);

        let kinds: Vec<SleepIssueType> = analysis.issues.iter().map(|i| i.issue_type).collect();
        assert_eq!(
            kinds,
            vec![
                SleepIssueType::PotentialInsomnia,
                SleepIssueType::InsufficientDeepSleep,
                SleepIssueType::LowSleepEfficiency,
                SleepIssueType::RestlessSleep,
            ]
        );
        assert!(analysis
            .recommendations
            .iter()
            .any(|r| r.title == "Increase Sleep Efficiency" && r.priority == Some(Priority::High)));
    }

    #[test]
    fn test_elevated_sleep_heart_rate_is_a_warning() {
        let session = reference_session();
        let start = session.start.unwrap();
        let mut readings: Vec<HeartRateSample> = (0..30)
            .map(|i| {
                HeartRateSample::new(
                    format!("hr-{i}"),
                    start + Duration::minutes(10 * i),
                    74 + (i % 3) as u16 * 8,
                    HeartRateContext::Sleep,
                )
            })
            .collect();
        // Outside the session, ignored
        readings.push(HeartRateSample::new(
            "late",
            start + Duration::hours(12),
            40,
            HeartRateContext::Sleep,
        ));

        let analysis = SleepScorer::analyze(&session, &readings);
        let hr = analysis.heart_rate.ready().unwrap();
        assert_eq!(hr.status, SleepHeartRateStatus::Elevated);
        assert_eq!(hr.reading_count, 30);
        assert!(analysis
            .recommendations
            .iter()
            .any(|r| r.category == InsightCategory::Heart));
    }

    #[test]
    fn test_clock_minutes_wraps_evening() {
        let evening = Utc.with_ymd_and_hms(2024, 1, 1, 23, 30, 0).unwrap();
        let morning = Utc.with_ymd_and_hms(2024, 1, 2, 0, 30, 0).unwrap();

        assert_eq!(clock_minutes(evening), -30.0);
        assert_eq!(clock_minutes(morning), 30.0);
    }

    #[test]
    fn test_patterns_over_a_week() {
        // Mon 2024-01-01 .. Sun 2024-01-07; short weeknights, long weekends
        let sessions: Vec<SleepSession> = (0..7)
            .map(|day| {
                let start = Utc.with_ymd_and_hms(2024, 1, 1, 23, 30, 0).unwrap()
                    + Duration::days(day);
                let minutes = if day >= 5 { 540 } else { 360 };
                let mut s = SleepSession::from_stages(
                    format!("n{day}"),
                    20.0,
                    minutes as f64 * 0.5,
                    minutes as f64 * 0.2,
                    minutes as f64 * 0.3 - 20.0,
                );
                s.start = Some(start);
                s.end = Some(start + Duration::minutes(minutes));
                s
            })
            .collect();

        let patterns = SleepScorer::patterns(&sessions).into_ready().unwrap();
        assert_eq!(patterns.nights, 7);
        assert_eq!(patterns.bedtime_consistency, ConsistencyLevel::High);
        // 5 nights x 1.5h short
        assert!((patterns.sleep_debt_hours - 7.5).abs() < 1e-9);
        let kinds: Vec<SleepPatternType> =
            patterns.patterns.iter().map(|p| p.pattern_type).collect();
        assert!(kinds.contains(&SleepPatternType::WeekendCatchup));
        assert!(kinds.contains(&SleepPatternType::LateBedtimes));
        assert!(patterns
            .recommendations
            .iter()
            .any(|r| r.contains("7-9 hours")));
    }
}
