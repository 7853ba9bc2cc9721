//! Trend and consistency analysis over daily summaries
//!
//! Linear fits per metric, consistency scores from day-to-day spread,
//! weekday/weekend patterns, and the insights and summary drawn from them.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::stats;
use crate::types::{
    Analysis, ConsistencyLevel, DailySummary, Insight, InsightCategory, InsightType,
};

/// R² above which a fitted slope is reported as a direction
const TREND_STRENGTH_THRESHOLD: f64 = 0.3;

/// Percentage change a trend insight requires
const TREND_INSIGHT_CHANGE_PCT: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendMetric {
    Steps,
    SleepDuration,
    HeartRate,
    OverallScore,
}

impl TrendMetric {
    pub const ALL: [TrendMetric; 4] = [
        TrendMetric::Steps,
        TrendMetric::SleepDuration,
        TrendMetric::HeartRate,
        TrendMetric::OverallScore,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TrendMetric::Steps => "steps",
            TrendMetric::SleepDuration => "sleep_duration",
            TrendMetric::HeartRate => "heart_rate",
            TrendMetric::OverallScore => "overall_score",
        }
    }

    fn value(&self, summary: &DailySummary) -> Option<f64> {
        match self {
            TrendMetric::Steps => Some(summary.total_steps as f64),
            TrendMetric::SleepDuration => summary.sleep_duration_minutes,
            TrendMetric::HeartRate => summary.avg_heart_rate,
            TrendMetric::OverallScore => Some(summary.overall_score),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricTrend {
    pub average: f64,
    pub std_dev: f64,
    pub direction: TrendDirection,
    /// R² of the fit
    pub strength: f64,
    pub slope: f64,
    pub intercept: f64,
    /// First to last value; 0 when the first value is 0
    pub percentage_change: f64,
    pub data_points: usize,
    pub current: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consistency {
    /// 0-100, higher is more consistent
    pub score: f64,
    pub std_dev: f64,
    pub level: ConsistencyLevel,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyScores {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<Consistency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep: Option<Consistency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bedtime: Option<Consistency>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthPatternType {
    WeekendActivitySurge,
    WeekendActivityDip,
    WeekendSleepCatchup,
    ChronicSleepDeficit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthPattern {
    pub pattern_type: HealthPatternType,
    pub description: String,
    pub interpretation: String,
    /// Size of the effect in the metric's unit (steps, minutes or hours)
    pub magnitude: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallTrend {
    Improving,
    Declining,
    Stable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendSummary {
    pub overall: OverallTrend,
    pub strengths: Vec<String>,
    pub areas_for_improvement: Vec<String>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendReport {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub days: usize,
    pub steps: Analysis<MetricTrend>,
    pub sleep_duration: Analysis<MetricTrend>,
    pub heart_rate: Analysis<MetricTrend>,
    pub overall_score: Analysis<MetricTrend>,
    pub consistency: ConsistencyScores,
    pub patterns: Vec<HealthPattern>,
    pub insights: Vec<Insight>,
    pub summary: TrendSummary,
}

impl TrendReport {
    pub fn trend(&self, metric: TrendMetric) -> &Analysis<MetricTrend> {
        match metric {
            TrendMetric::Steps => &self.steps,
            TrendMetric::SleepDuration => &self.sleep_duration,
            TrendMetric::HeartRate => &self.heart_rate,
            TrendMetric::OverallScore => &self.overall_score,
        }
    }
}

pub struct TrendAnalyzer;

impl TrendAnalyzer {
    /// Least-squares trend over an ordered series
    pub fn extract_trend(values: &[f64]) -> Analysis<MetricTrend> {
        let Some(fit) = stats::linear_regression(values) else {
            return Analysis::insufficient("a trend needs at least two data points", values.len(), 2);
        };

        let direction = if fit.r_squared > TREND_STRENGTH_THRESHOLD && fit.slope > 0.0 {
            TrendDirection::Increasing
        } else if fit.r_squared > TREND_STRENGTH_THRESHOLD && fit.slope < 0.0 {
            TrendDirection::Decreasing
        } else {
            TrendDirection::Stable
        };

        let first = values[0];
        let last = values[values.len() - 1];
        let percentage_change = if first != 0.0 {
            (last - first) / first * 100.0
        } else {
            0.0
        };

        Analysis::Ready(MetricTrend {
            average: stats::round_to(stats::mean(values), 2),
            std_dev: stats::round_to(stats::std_dev(values), 2),
            direction,
            strength: stats::round_to(fit.r_squared, 3),
            slope: stats::round_to(fit.slope, 4),
            intercept: stats::round_to(fit.intercept, 4),
            percentage_change: stats::round_to(percentage_change, 2),
            data_points: values.len(),
            current: last,
            min: stats::min(values).unwrap_or(last),
            max: stats::max(values).unwrap_or(last),
        })
    }

    /// Trend of one metric over summaries; days without a value are skipped
    pub fn metric_trend(summaries: &[DailySummary], metric: TrendMetric) -> Analysis<MetricTrend> {
        let values: Vec<f64> = ordered(summaries)
            .iter()
            .filter_map(|s| metric.value(s))
            .collect();
        Self::extract_trend(&values)
    }

    pub fn consistency(summaries: &[DailySummary]) -> ConsistencyScores {
        let steps: Vec<f64> = summaries
            .iter()
            .filter(|s| s.total_steps > 0)
            .map(|s| s.total_steps as f64)
            .collect();
        let sleep: Vec<f64> = summaries
            .iter()
            .filter_map(|s| s.sleep_duration_minutes)
            .filter(|m| *m > 0.0)
            .collect();
        let bedtimes: Vec<f64> = summaries.iter().filter_map(|s| s.bedtime_minutes).collect();

        ConsistencyScores {
            steps: consistency_of(&steps, 2000.0, 1000.0),
            sleep: consistency_of(&sleep, 120.0, 60.0),
            bedtime: consistency_of(&bedtimes, 60.0, 30.0),
        }
    }

    pub fn patterns(summaries: &[DailySummary]) -> Vec<HealthPattern> {
        let mut patterns = Vec::new();

        let is_weekend = |d: NaiveDate| d.weekday().num_days_from_monday() >= 5;
        let split = |values: Vec<(NaiveDate, f64)>| -> (Vec<f64>, Vec<f64>) {
            let (weekend, weekday): (Vec<_>, Vec<_>) =
                values.into_iter().partition(|(d, _)| is_weekend(*d));
            (
                weekday.into_iter().map(|(_, v)| v).collect(),
                weekend.into_iter().map(|(_, v)| v).collect(),
            )
        };

        let (weekday_steps, weekend_steps) = split(
            summaries
                .iter()
                .filter(|s| s.total_steps > 0)
                .map(|s| (s.date, s.total_steps as f64))
                .collect(),
        );
        if !weekday_steps.is_empty() && !weekend_steps.is_empty() {
            let difference = stats::mean(&weekend_steps) - stats::mean(&weekday_steps);
            if difference > 2000.0 {
                patterns.push(HealthPattern {
                    pattern_type: HealthPatternType::WeekendActivitySurge,
                    description: "Significantly more active on weekends".to_string(),
                    interpretation: "May indicate sedentary work week".to_string(),
                    magnitude: difference.round(),
                });
            } else if -difference > 2000.0 {
                patterns.push(HealthPattern {
                    pattern_type: HealthPatternType::WeekendActivityDip,
                    description: "Less active on weekends".to_string(),
                    interpretation: "Consider adding weekend activities".to_string(),
                    magnitude: (-difference).round(),
                });
            }
        }

        let sleep_days: Vec<(NaiveDate, f64)> = summaries
            .iter()
            .filter_map(|s| s.sleep_duration_minutes.filter(|m| *m > 0.0).map(|m| (s.date, m)))
            .collect();
        let all_sleep: Vec<f64> = sleep_days.iter().map(|(_, m)| *m).collect();
        let (weekday_sleep, weekend_sleep) = split(sleep_days);
        if !weekday_sleep.is_empty() && !weekend_sleep.is_empty() {
            let difference = stats::mean(&weekend_sleep) - stats::mean(&weekday_sleep);
            if difference > 60.0 {
                patterns.push(HealthPattern {
                    pattern_type: HealthPatternType::WeekendSleepCatchup,
                    description: "Sleeping significantly longer on weekends".to_string(),
                    interpretation: "May indicate sleep deprivation during weekdays".to_string(),
                    magnitude: difference.round(),
                });
            }
        }
        if !all_sleep.is_empty() {
            let average = stats::mean(&all_sleep);
            if average < 420.0 {
                patterns.push(HealthPattern {
                    pattern_type: HealthPatternType::ChronicSleepDeficit,
                    description: "Consistently getting less than 7 hours of sleep".to_string(),
                    interpretation: "Consider prioritizing sleep duration".to_string(),
                    magnitude: stats::round_to(average / 60.0, 1),
                });
            }
        }

        patterns
    }

    /// Full trend report; `no_data` when there are no summaries
    pub fn analyze(summaries: &[DailySummary]) -> Analysis<TrendReport> {
        let ordered = ordered(summaries);
        let (Some(first), Some(last)) = (ordered.first(), ordered.last()) else {
            return Analysis::no_data("no daily summaries in the period");
        };
        let (start_date, end_date) = (first.date, last.date);

        let steps = Self::metric_trend(&ordered, TrendMetric::Steps);
        let sleep_duration = Self::metric_trend(&ordered, TrendMetric::SleepDuration);
        let heart_rate = Self::metric_trend(&ordered, TrendMetric::HeartRate);
        let overall_score = Self::metric_trend(&ordered, TrendMetric::OverallScore);
        let consistency = Self::consistency(&ordered);
        let patterns = Self::patterns(&ordered);

        let mut report = TrendReport {
            start_date,
            end_date,
            days: ordered.len(),
            steps,
            sleep_duration,
            heart_rate,
            overall_score,
            consistency,
            patterns,
            insights: Vec::new(),
            summary: TrendSummary {
                overall: OverallTrend::Stable,
                strengths: Vec::new(),
                areas_for_improvement: Vec::new(),
                recommendations: Vec::new(),
            },
        };
        report.insights = trend_insights(&report);
        report.summary = trend_summary(&report);

        Analysis::Ready(report)
    }
}

fn ordered(summaries: &[DailySummary]) -> Vec<DailySummary> {
    let mut ordered = summaries.to_vec();
    ordered.sort_by(|a, b| a.date.cmp(&b.date));
    ordered
}

fn consistency_of(values: &[f64], scale: f64, high_below: f64) -> Option<Consistency> {
    if values.len() < 2 {
        return None;
    }
    let std = stats::std_dev(values);
    Some(Consistency {
        score: stats::round_to((100.0 - std / scale * 100.0).max(0.0), 1),
        std_dev: stats::round_to(std, 1),
        level: ConsistencyLevel::from_std(std, high_below, scale),
    })
}

fn direction(trend: &Analysis<MetricTrend>) -> Option<TrendDirection> {
    trend.ready().map(|t| t.direction)
}

fn trend_insights(report: &TrendReport) -> Vec<Insight> {
    let mut insights = Vec::new();
    let mut push = |insight: Insight| {
        insights.push(insight.for_dates(report.start_date, report.end_date));
    };

    if let Some(steps) = report.steps.ready() {
        if steps.direction == TrendDirection::Increasing
            && steps.percentage_change > TREND_INSIGHT_CHANGE_PCT
        {
            push(
                Insight::new(
                    InsightCategory::Activity,
                    InsightType::Achievement,
                    "Improving Activity Level",
                    format!(
                        "Your step count has increased by {:.1}% over this period.",
                        steps.percentage_change
                    ),
                    0.9,
                )
                .with_data("percentage_change", steps.percentage_change),
            );
        } else if steps.direction == TrendDirection::Decreasing
            && steps.percentage_change < -TREND_INSIGHT_CHANGE_PCT
        {
            push(
                Insight::new(
                    InsightCategory::Activity,
                    InsightType::Warning,
                    "Declining Activity Level",
                    format!(
                        "Your step count has decreased by {:.1}% over this period.",
                        steps.percentage_change.abs()
                    ),
                    0.8,
                )
                .with_data("percentage_change", steps.percentage_change),
            );
        }
    }

    if let Some(sleep) = report.sleep_duration.ready() {
        if sleep.direction == TrendDirection::Increasing
            && sleep.percentage_change > TREND_INSIGHT_CHANGE_PCT
        {
            push(Insight::new(
                InsightCategory::Sleep,
                InsightType::Achievement,
                "Improving Sleep Habits",
                "You're consistently getting more sleep over time.",
                0.9,
            ));
        }
    }

    if report
        .consistency
        .steps
        .as_ref()
        .is_some_and(|c| c.level == ConsistencyLevel::High)
    {
        push(Insight::new(
            InsightCategory::Activity,
            InsightType::Pattern,
            "Consistent Activity Level",
            "You maintain very consistent daily step counts.",
            0.8,
        ));
    }

    for pattern in &report.patterns {
        match pattern.pattern_type {
            HealthPatternType::WeekendActivityDip => push(Insight::new(
                InsightCategory::Activity,
                InsightType::Recommendation,
                "Weekend Activity Opportunity",
                "Consider adding more movement to your weekends.",
                0.7,
            )),
            HealthPatternType::ChronicSleepDeficit => push(
                Insight::new(
                    InsightCategory::Sleep,
                    InsightType::Recommendation,
                    "Prioritize Sleep Duration",
                    "Aim for at least 7 hours of sleep each night.",
                    0.9,
                )
                .with_data("average_hours", pattern.magnitude),
            ),
            HealthPatternType::WeekendSleepCatchup => push(Insight::new(
                InsightCategory::Sleep,
                InsightType::Pattern,
                "Weekend Sleep Catch-up",
                "You sleep much longer on weekends, which may point to weekday sleep debt.",
                0.7,
            )),
            HealthPatternType::WeekendActivitySurge => {}
        }
    }

    insights
}

fn trend_summary(report: &TrendReport) -> TrendSummary {
    let mut improving = 0;
    let mut declining = 0;
    for metric in TrendMetric::ALL {
        match direction(report.trend(metric)) {
            // A rising heart rate is not an improvement
            Some(TrendDirection::Increasing) if metric != TrendMetric::HeartRate => improving += 1,
            Some(TrendDirection::Decreasing) => declining += 1,
            _ => {}
        }
    }
    let overall = match improving.cmp(&declining) {
        std::cmp::Ordering::Greater => OverallTrend::Improving,
        std::cmp::Ordering::Less => OverallTrend::Declining,
        std::cmp::Ordering::Equal => OverallTrend::Stable,
    };

    let steps = direction(&report.steps);
    let mut strengths = Vec::new();
    let mut areas = Vec::new();
    let mut recommendations = Vec::new();

    if steps == Some(TrendDirection::Increasing) {
        strengths.push("Increasing physical activity".to_string());
    }
    if direction(&report.sleep_duration) == Some(TrendDirection::Increasing) {
        strengths.push("Improving sleep duration".to_string());
    }
    if direction(&report.heart_rate) == Some(TrendDirection::Increasing) {
        areas.push("Managing heart rate levels".to_string());
        recommendations.push("Consider stress management techniques".to_string());
    }
    if steps == Some(TrendDirection::Decreasing) {
        areas.push("Maintaining activity levels".to_string());
        recommendations.push("Set small, achievable activity goals".to_string());
    }

    TrendSummary {
        overall,
        strengths,
        areas_for_improvement: areas,
        recommendations,
    }
}
