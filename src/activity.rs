//! Activity scoring and analysis
//!
//! Per-activity analysis (MET intensity, calorie efficiency, heart rate
//! reserve, pace/distance/cadence, training load and recovery) plus
//! multi-day patterns checked against the WHO weekly guideline.

use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::Demographics;
use crate::stats;
use crate::types::{
    Activity, ActivityType, Analysis, Insight, InsightCategory, InsightType, Priority,
};

/// WHO weekly minimum of moderate-or-harder activity (minutes)
pub const WHO_MINIMUM_WEEKLY_MINUTES: f64 = 150.0;

/// WHO weekly target of moderate-or-harder activity (minutes)
pub const WHO_TARGET_WEEKLY_MINUTES: f64 = 300.0;

/// Heart rate assumed for training load when the activity has none
const DEFAULT_LOAD_HEART_RATE: f64 = 120.0;

/// Base metabolic equivalent for an activity type
pub fn base_met(activity_type: ActivityType) -> f64 {
    match activity_type {
        ActivityType::Walking => 3.5,
        ActivityType::Running => 8.0,
        ActivityType::Cycling => 7.5,
        ActivityType::Swimming => 6.0,
        ActivityType::Hiking => 6.0,
        ActivityType::Yoga => 2.5,
        ActivityType::StrengthTraining => 6.0,
        ActivityType::Hiit => 8.5,
        ActivityType::Dancing => 5.0,
        ActivityType::Sports => 7.0,
        ActivityType::Workout => 6.5,
        ActivityType::Other => 4.0,
    }
}

/// Expected calories per minute (low, high) for an activity type
pub fn expected_calorie_rate(activity_type: ActivityType) -> (f64, f64) {
    match activity_type {
        ActivityType::Walking => (4.0, 6.0),
        ActivityType::Running => (10.0, 16.0),
        ActivityType::Cycling => (8.0, 12.0),
        ActivityType::Swimming => (8.0, 14.0),
        ActivityType::Hiking => (6.0, 10.0),
        ActivityType::Yoga => (3.0, 5.0),
        ActivityType::StrengthTraining => (6.0, 9.0),
        ActivityType::Hiit => (12.0, 18.0),
        ActivityType::Dancing => (5.0, 8.0),
        ActivityType::Sports => (7.0, 12.0),
        ActivityType::Workout => (6.0, 10.0),
        ActivityType::Other => (4.0, 7.0),
    }
}

fn heart_rate_multiplier(avg_heart_rate: Option<u16>) -> f64 {
    match avg_heart_rate {
        Some(hr) if hr > 160 => 1.3,
        Some(hr) if hr > 140 => 1.2,
        Some(hr) if hr > 120 => 1.1,
        Some(hr) if hr < 100 => 0.9,
        _ => 1.0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntensityLevel {
    VeryLight,
    Light,
    Moderate,
    Vigorous,
}

impl IntensityLevel {
    pub fn from_met(met: f64) -> Self {
        match met {
            m if m >= 8.0 => IntensityLevel::Vigorous,
            m if m >= 6.0 => IntensityLevel::Moderate,
            m if m >= 3.0 => IntensityLevel::Light,
            _ => IntensityLevel::VeryLight,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            IntensityLevel::Vigorous => "Very high intensity activity",
            IntensityLevel::Moderate => "Moderate intensity activity",
            IntensityLevel::Light => "Light intensity activity",
            IntensityLevel::VeryLight => "Very light activity",
        }
    }

    /// Counts toward the WHO moderate-or-vigorous guideline
    pub fn is_moderate_or_harder(&self) -> bool {
        matches!(self, IntensityLevel::Moderate | IntensityLevel::Vigorous)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntensityAnalysis {
    pub met_value: f64,
    pub base_met: f64,
    pub heart_rate_adjustment: f64,
    pub level: IntensityLevel,
    pub description: String,
    /// Guideline minutes; vigorous effort (MET >= 6) counts double
    pub intensity_minutes: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalorieEfficiency {
    Low,
    Optimal,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalorieAnalysis {
    pub calories_burned: f64,
    pub calories_per_minute: f64,
    pub efficiency: CalorieEfficiency,
    pub message: String,
    pub expected_range: (f64, f64),
    pub percentage_daily_need: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseLevel {
    Low,
    Moderate,
    High,
    VeryHigh,
    /// No max heart rate recorded
    Normal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityHeartRate {
    pub average_bpm: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum_bpm: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_bpm: Option<u16>,
    pub heart_rate_reserve_pct: f64,
    pub response: ResponseLevel,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaceRating {
    Fast,
    Moderate,
    Slow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaceAnalysis {
    pub pace_min_per_km: f64,
    pub speed_kmh: f64,
    /// `None` for activity types without pace bands
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<PaceRating>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceRating {
    Long,
    Moderate,
    Short,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistanceAnalysis {
    pub distance_km: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<DistanceRating>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CadenceRating {
    Excellent,
    Good,
    Fair,
    Poor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CadenceAnalysis {
    pub steps_per_minute: f64,
    pub rating: CadenceRating,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceAnalysis {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pace: Option<PaceAnalysis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<DistanceAnalysis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cadence: Option<CadenceAnalysis>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryLevel {
    Light,
    Moderate,
    Hard,
    VeryHard,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryAnalysis {
    /// Duration x average heart rate
    pub training_load: f64,
    pub recovery_hours: u32,
    pub level: RecoveryLevel,
    pub guidance: Vec<String>,
}

/// Full analysis of one activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityAnalysis {
    pub activity_id: String,
    pub activity_type: ActivityType,
    pub duration_minutes: f64,
    pub intensity: IntensityAnalysis,
    pub calories: CalorieAnalysis,
    pub heart_rate: Analysis<ActivityHeartRate>,
    pub performance: PerformanceAnalysis,
    pub recovery: RecoveryAnalysis,
    pub recommendations: Vec<Insight>,
}

/// Activity scorer parameterized by the user's demographics
#[derive(Debug, Clone, Default)]
pub struct ActivityScorer {
    demographics: Demographics,
}

impl ActivityScorer {
    pub fn new(demographics: Demographics) -> Self {
        Self { demographics }
    }

    pub fn analyze(&self, activity: &Activity) -> ActivityAnalysis {
        let intensity = Self::intensity(activity);
        let calories = self.calories(activity);
        let heart_rate = self.heart_rate(activity);
        let performance = Self::performance(activity);
        let recovery = Self::recovery(activity);
        let recommendations = recommendations(activity, &intensity, &calories, &recovery);

        ActivityAnalysis {
            activity_id: activity.id.clone(),
            activity_type: activity.activity_type,
            duration_minutes: stats::round_to(activity.duration_minutes(), 1),
            intensity,
            calories,
            heart_rate,
            performance,
            recovery,
            recommendations,
        }
    }

    /// MET value adjusted by average heart rate, intensity level and
    /// guideline minutes
    pub fn intensity(activity: &Activity) -> IntensityAnalysis {
        let base = base_met(activity.activity_type);
        let multiplier = heart_rate_multiplier(activity.avg_heart_rate);
        let met = base * multiplier;
        let level = IntensityLevel::from_met(met);

        let duration = activity.duration_minutes();
        let intensity_minutes = if met >= 6.0 {
            duration * 2.0
        } else if met >= 3.0 {
            duration
        } else {
            0.0
        };

        IntensityAnalysis {
            met_value: stats::round_to(met, 1),
            base_met: base,
            heart_rate_adjustment: multiplier,
            level,
            description: level.description().to_string(),
            intensity_minutes,
        }
    }

    pub fn calories(&self, activity: &Activity) -> CalorieAnalysis {
        let rate = activity.calories_per_minute();
        let (low, high) = expected_calorie_rate(activity.activity_type);

        let (efficiency, message) = if rate < low {
            (
                CalorieEfficiency::Low,
                "Calorie burn lower than expected for this activity type",
            )
        } else if rate > high {
            (
                CalorieEfficiency::High,
                "Calorie burn higher than expected for this activity type",
            )
        } else {
            (CalorieEfficiency::Optimal, "Calorie burn within expected range")
        };

        CalorieAnalysis {
            calories_burned: stats::round_to(activity.calories_burned, 1),
            calories_per_minute: stats::round_to(rate, 2),
            efficiency,
            message: message.to_string(),
            expected_range: (low, high),
            percentage_daily_need: stats::round_to(
                activity.calories_burned / self.demographics.daily_calorie_need * 100.0,
                1,
            ),
        }
    }

    /// Heart rate reserve and response level; `no_data` without an average
    pub fn heart_rate(&self, activity: &Activity) -> Analysis<ActivityHeartRate> {
        let Some(avg) = activity.avg_heart_rate else {
            return Analysis::no_data("no heart rate data available for this activity");
        };

        let resting = self.demographics.resting_heart_rate;
        let max = self.demographics.max_heart_rate;
        let reserve = (avg as f64 - resting) / (max - resting) * 100.0;

        let (response, message) = match activity.max_heart_rate.map(f64::from) {
            Some(peak) if peak > max * 0.95 => (
                ResponseLevel::VeryHigh,
                "Heart rate reached near maximum levels",
            ),
            Some(peak) if peak > max * 0.85 => (
                ResponseLevel::High,
                "Heart rate reached high intensity levels",
            ),
            Some(peak) if peak > max * 0.70 => (
                ResponseLevel::Moderate,
                "Heart rate at moderate intensity levels",
            ),
            Some(_) => (ResponseLevel::Low, "Heart rate at low intensity levels"),
            None => (ResponseLevel::Normal, "Normal heart rate response"),
        };

        Analysis::Ready(ActivityHeartRate {
            average_bpm: avg,
            maximum_bpm: activity.max_heart_rate,
            minimum_bpm: activity.min_heart_rate,
            heart_rate_reserve_pct: stats::round_to(reserve, 1),
            response,
            message: message.to_string(),
        })
    }

    pub fn performance(activity: &Activity) -> PerformanceAnalysis {
        let duration = activity.duration_minutes();

        let pace = activity.pace_min_per_km().map(|pace| PaceAnalysis {
            pace_min_per_km: stats::round_to(pace, 2),
            speed_kmh: stats::round_to(60.0 / pace, 1),
            rating: pace_rating(activity.activity_type, pace),
        });

        let distance = activity
            .distance_km
            .filter(|d| *d > 0.0)
            .map(|distance| DistanceAnalysis {
                distance_km: stats::round_to(distance, 2),
                rating: distance_rating(activity.activity_type, distance),
            });

        let cadence = match activity.steps {
            Some(steps) if steps > 0 && duration > 0.0 => {
                let spm = steps as f64 / duration;
                let (rating, message) = match spm {
                    s if s >= 120.0 => (
                        CadenceRating::Excellent,
                        "Optimal cadence for running efficiency",
                    ),
                    s if s >= 100.0 => (CadenceRating::Good, "Good cadence for running"),
                    s if s >= 80.0 => (CadenceRating::Fair, "Moderate cadence, could be improved"),
                    _ => (
                        CadenceRating::Poor,
                        "Low cadence, consider increasing step rate",
                    ),
                };
                Some(CadenceAnalysis {
                    steps_per_minute: stats::round_to(spm, 1),
                    rating,
                    message: message.to_string(),
                })
            }
            _ => None,
        };

        PerformanceAnalysis {
            pace,
            distance,
            cadence,
        }
    }

    /// Training load and recovery time
    pub fn recovery(activity: &Activity) -> RecoveryAnalysis {
        let hr = activity
            .avg_heart_rate
            .map(f64::from)
            .unwrap_or(DEFAULT_LOAD_HEART_RATE);
        let load = activity.duration_minutes() * hr;

        let (recovery_hours, level) = match load {
            l if l < 2000.0 => (12, RecoveryLevel::Light),
            l if l < 4000.0 => (24, RecoveryLevel::Moderate),
            l if l < 6000.0 => (36, RecoveryLevel::Hard),
            _ => (48, RecoveryLevel::VeryHard),
        };

        let mut guidance = Vec::new();
        if level >= RecoveryLevel::Hard {
            guidance.push(
                "Consider active recovery (light walking, stretching) tomorrow".to_string(),
            );
            guidance.push("Ensure adequate protein intake for muscle repair".to_string());
            guidance.push("Get extra sleep tonight".to_string());
        }
        if activity.activity_type == ActivityType::StrengthTraining {
            guidance.push("Allow 48 hours before working same muscle groups again".to_string());
        }
        guidance.push(format!(
            "Consider waiting {recovery_hours} hours before next intense workout"
        ));

        RecoveryAnalysis {
            training_load: stats::round_to(load, 1),
            recovery_hours,
            level,
            guidance,
        }
    }

    /// Patterns over `days` days of activities
    pub fn patterns(&self, activities: &[Activity], days: u32) -> Analysis<ActivityPatterns> {
        if activities.is_empty() {
            return Analysis::no_data(format!("no activity data for the last {days} days"));
        }
        let days = days.max(1) as f64;

        let mut ordered: Vec<&Activity> = activities.iter().collect();
        ordered.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)));

        let total_minutes: f64 = ordered.iter().map(|a| a.duration_minutes()).sum();
        let total_calories: f64 = ordered.iter().map(|a| a.calories_burned).sum();
        let total_steps: u64 = ordered.iter().filter_map(|a| a.steps).map(u64::from).sum();

        let mut by_type: BTreeMap<ActivityType, TypeBreakdown> = BTreeMap::new();
        for activity in &ordered {
            let entry = by_type
                .entry(activity.activity_type)
                .or_insert_with(|| TypeBreakdown {
                    activity_type: activity.activity_type,
                    count: 0,
                    total_minutes: 0.0,
                    total_calories: 0.0,
                    average_minutes: 0.0,
                });
            entry.count += 1;
            entry.total_minutes += activity.duration_minutes();
            entry.total_calories += activity.calories_burned;
        }
        let mut by_type: Vec<TypeBreakdown> = by_type
            .into_values()
            .map(|mut t| {
                t.average_minutes = stats::round_to(t.total_minutes / t.count as f64, 1);
                t
            })
            .collect();
        by_type.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.activity_type.cmp(&b.activity_type)));

        let weekly = weekday_pattern(&ordered);
        let progress = progress(&ordered, days);
        let guideline = guideline_check(&ordered, days);

        let mut recommendations = Vec::new();
        if guideline.status == GuidelineStatus::BelowMinimum {
            let needed = WHO_MINIMUM_WEEKLY_MINUTES - guideline.weekly_average_minutes;
            recommendations.push(format!(
                "Aim to add {:.1} minutes of activity per day to meet minimum guidelines.",
                needed / 7.0
            ));
        }
        if by_type.len() < 3 {
            recommendations.push(
                "Consider adding more variety to your activities for balanced fitness."
                    .to_string(),
            );
        }
        if total_minutes / days < 30.0 {
            recommendations.push(
                "Try to increase your daily activity time to at least 30 minutes.".to_string(),
            );
        }
        if !by_type
            .iter()
            .any(|t| t.activity_type == ActivityType::StrengthTraining)
        {
            recommendations.push(
                "Consider adding strength training 2-3 times per week for muscle health."
                    .to_string(),
            );
        }

        Analysis::Ready(ActivityPatterns {
            total_activities: ordered.len(),
            total_duration_hours: stats::round_to(total_minutes / 60.0, 1),
            total_calories: stats::round_to(total_calories, 1),
            total_steps,
            average_daily_minutes: stats::round_to(total_minutes / days, 1),
            average_daily_calories: stats::round_to(total_calories / days, 1),
            by_type,
            weekly,
            progress,
            guideline,
            recommendations,
        })
    }
}

fn pace_rating(activity_type: ActivityType, pace: f64) -> Option<PaceRating> {
    let (fast, moderate) = match activity_type {
        ActivityType::Walking => (10.0, 15.0),
        ActivityType::Running => (5.0, 6.5),
        ActivityType::Cycling => (3.0, 4.0),
        _ => return None,
    };
    Some(if pace <= fast {
        PaceRating::Fast
    } else if pace <= moderate {
        PaceRating::Moderate
    } else {
        PaceRating::Slow
    })
}

fn distance_rating(activity_type: ActivityType, distance: f64) -> Option<DistanceRating> {
    let (long, moderate) = match activity_type {
        ActivityType::Walking => (5.0, 3.0),
        ActivityType::Running => (10.0, 5.0),
        ActivityType::Cycling => (30.0, 15.0),
        ActivityType::Swimming => (1.5, 0.5),
        _ => return None,
    };
    Some(if distance >= long {
        DistanceRating::Long
    } else if distance >= moderate {
        DistanceRating::Moderate
    } else {
        DistanceRating::Short
    })
}

fn recommendations(
    activity: &Activity,
    intensity: &IntensityAnalysis,
    calories: &CalorieAnalysis,
    recovery: &RecoveryAnalysis,
) -> Vec<Insight> {
    let date = activity.date();
    let mut out = Vec::new();

    if intensity.level == IntensityLevel::VeryLight {
        out.push(
            Insight::new(
                InsightCategory::Activity,
                InsightType::Recommendation,
                "Increase Activity Intensity",
                "Consider adding more vigorous activities to your routine.",
                0.7,
            )
            .with_priority(Priority::Medium)
            .with_data("met_value", intensity.met_value)
            .with_actions([
                "Add intervals to your workouts",
                "Try new activities that challenge you",
                "Gradually increase duration and intensity",
            ])
            .for_dates(date, date),
        );
    }

    if calories.efficiency == CalorieEfficiency::Low {
        out.push(
            Insight::new(
                InsightCategory::Activity,
                InsightType::Recommendation,
                "Improve Exercise Efficiency",
                "Your calorie burn is lower than expected for this activity type.",
                0.6,
            )
            .with_priority(Priority::Low)
            .with_data("calories_per_minute", calories.calories_per_minute)
            .with_actions([
                "Focus on proper form and technique",
                "Increase resistance or incline",
                "Maintain consistent pace throughout",
            ])
            .for_dates(date, date),
        );
    }

    if recovery.level >= RecoveryLevel::Hard {
        out.push(
            Insight::new(
                InsightCategory::Recovery,
                InsightType::Recommendation,
                "Prioritize Recovery",
                "This was a demanding workout that requires proper recovery.",
                0.8,
            )
            .with_priority(Priority::High)
            .with_data("recovery_hours", recovery.recovery_hours)
            .with_actions([
                "Stay hydrated and eat nutrient-rich foods",
                "Consider foam rolling or massage",
                "Get extra sleep tonight",
            ])
            .for_dates(date, date),
        );
    }

    out
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeBreakdown {
    pub activity_type: ActivityType,
    pub count: usize,
    pub total_minutes: f64,
    pub total_calories: f64,
    pub average_minutes: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeekdayTotals {
    pub weekday: Weekday,
    pub count: usize,
    pub total_minutes: f64,
    pub total_calories: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyPattern {
    /// Only weekdays with at least one activity, Monday first
    pub days: Vec<WeekdayTotals>,
    pub most_active: Weekday,
    pub least_active: Weekday,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressTrend {
    Improving,
    Declining,
    Stable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HalfAverages {
    pub avg_duration: f64,
    pub avg_calories: f64,
    /// Activities per day
    pub frequency: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub first_half: HalfAverages,
    pub second_half: HalfAverages,
    /// Percentage changes; `None` when the first half is zero
    pub duration_change_pct: Option<f64>,
    pub calories_change_pct: Option<f64>,
    pub frequency_change_pct: Option<f64>,
    pub trend: ProgressTrend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuidelineStatus {
    MeetingTarget,
    MeetingMinimum,
    BelowMinimum,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuidelineCheck {
    pub weekly_average_minutes: f64,
    pub status: GuidelineStatus,
    pub message: String,
    pub percentage_of_target: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityPatterns {
    pub total_activities: usize,
    pub total_duration_hours: f64,
    pub total_calories: f64,
    pub total_steps: u64,
    pub average_daily_minutes: f64,
    pub average_daily_calories: f64,
    /// Most frequent type first
    pub by_type: Vec<TypeBreakdown>,
    pub weekly: WeeklyPattern,
    pub progress: Analysis<Progress>,
    pub guideline: GuidelineCheck,
    pub recommendations: Vec<String>,
}

fn weekday_pattern(activities: &[&Activity]) -> WeeklyPattern {
    let mut totals: BTreeMap<u32, WeekdayTotals> = BTreeMap::new();
    for activity in activities {
        let weekday = activity.start.weekday();
        let entry = totals
            .entry(weekday.num_days_from_monday())
            .or_insert_with(|| WeekdayTotals {
                weekday,
                count: 0,
                total_minutes: 0.0,
                total_calories: 0.0,
            });
        entry.count += 1;
        entry.total_minutes += activity.duration_minutes();
        entry.total_calories += activity.calories_burned;
    }

    let days: Vec<WeekdayTotals> = totals.into_values().collect();
    // Ties go to the earlier weekday
    let most_active = days
        .iter()
        .fold(None::<&WeekdayTotals>, |best, d| match best {
            Some(b) if b.total_minutes >= d.total_minutes => Some(b),
            _ => Some(d),
        })
        .map_or(Weekday::Mon, |d| d.weekday);
    let least_active = days
        .iter()
        .fold(None::<&WeekdayTotals>, |best, d| match best {
            Some(b) if b.total_minutes <= d.total_minutes => Some(b),
            _ => Some(d),
        })
        .map_or(Weekday::Mon, |d| d.weekday);

    WeeklyPattern {
        days,
        most_active,
        least_active,
    }
}

fn half_averages(half: &[&Activity], days: f64) -> HalfAverages {
    let n = half.len().max(1) as f64;
    HalfAverages {
        avg_duration: stats::round_to(half.iter().map(|a| a.duration_minutes()).sum::<f64>() / n, 1),
        avg_calories: stats::round_to(half.iter().map(|a| a.calories_burned).sum::<f64>() / n, 1),
        frequency: stats::round_to(half.len() as f64 / (days / 2.0), 3),
    }
}

fn percent_change(first: f64, second: f64) -> Option<f64> {
    (first > 0.0).then(|| stats::round_to((second - first) / first * 100.0, 1))
}

/// Compare the first and second half of the period's activities
fn progress(activities: &[&Activity], days: f64) -> Analysis<Progress> {
    if activities.len() < 2 {
        return Analysis::insufficient(
            "need more activities to calculate progress",
            activities.len(),
            2,
        );
    }

    let (first, second) = activities.split_at(activities.len() / 2);
    let first_half = half_averages(first, days);
    let second_half = half_averages(second, days);

    let frequency_change = percent_change(first_half.frequency, second_half.frequency);
    let trend = match frequency_change {
        Some(c) if c > 0.0 => ProgressTrend::Improving,
        Some(c) if c < 0.0 => ProgressTrend::Declining,
        _ => ProgressTrend::Stable,
    };

    Analysis::Ready(Progress {
        duration_change_pct: percent_change(first_half.avg_duration, second_half.avg_duration),
        calories_change_pct: percent_change(first_half.avg_calories, second_half.avg_calories),
        frequency_change_pct: frequency_change,
        first_half,
        second_half,
        trend,
    })
}

/// Weekly moderate-or-harder minutes against the WHO guideline
fn guideline_check(activities: &[&Activity], days: f64) -> GuidelineCheck {
    let qualifying: f64 = activities
        .iter()
        .filter(|a| ActivityScorer::intensity(a).level.is_moderate_or_harder())
        .map(|a| a.duration_minutes())
        .sum();
    let weekly = qualifying / days * 7.0;

    let (status, message) = if weekly >= WHO_TARGET_WEEKLY_MINUTES {
        (
            GuidelineStatus::MeetingTarget,
            "Exceeding weekly activity targets",
        )
    } else if weekly >= WHO_MINIMUM_WEEKLY_MINUTES {
        (
            GuidelineStatus::MeetingMinimum,
            "Meeting minimum weekly activity guidelines",
        )
    } else {
        (
            GuidelineStatus::BelowMinimum,
            "Below minimum weekly activity guidelines",
        )
    };

    GuidelineCheck {
        weekly_average_minutes: stats::round_to(weekly, 1),
        status,
        message: message.to_string(),
        percentage_of_target: stats::round_to(
            (weekly / WHO_TARGET_WEEKLY_MINUTES * 100.0).min(100.0),
            1,
        ),
    }
}

/// Activities that started on `date`
pub fn activities_on(activities: &[Activity], date: NaiveDate) -> impl Iterator<Item = &Activity> {
    activities.iter().filter(move |a| a.date() == date)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        // 2024-07-01 is a Monday
        Utc.with_ymd_and_hms(2024, 7, day, hour, 0, 0).unwrap()
    }

    fn activity(kind: ActivityType, day: u32, minutes: i64) -> Activity {
        let start = at(day, 7);
        Activity::new(
            format!("{}-{day}", kind.as_str()),
            kind,
            start,
            start + Duration::minutes(minutes),
        )
    }

    #[test]
    fn test_met_and_intensity() {
        let mut run = activity(ActivityType::Running, 1, 30);
        run.avg_heart_rate = Some(165);
        let intensity = ActivityScorer::intensity(&run);

        assert_eq!(intensity.met_value, 10.4);
        assert_eq!(intensity.level, IntensityLevel::Vigorous);
        assert_eq!(intensity.intensity_minutes, 60.0);

        let mut yoga = activity(ActivityType::Yoga, 1, 60);
        yoga.avg_heart_rate = Some(85);
        let intensity = ActivityScorer::intensity(&yoga);
        assert_eq!(intensity.level, IntensityLevel::VeryLight);
        assert_eq!(intensity.intensity_minutes, 0.0);

        let walk = activity(ActivityType::Walking, 1, 40);
        assert_eq!(ActivityScorer::intensity(&walk).intensity_minutes, 40.0);
    }

    #[test]
    fn test_calorie_efficiency() {
        let scorer = ActivityScorer::default();
        let mut run = activity(ActivityType::Running, 1, 30);
        run.calories_burned = 225.0;
        let calories = scorer.calories(&run);

        assert_eq!(calories.efficiency, CalorieEfficiency::Low);
        assert_eq!(calories.percentage_daily_need, 10.0);

        run.calories_burned = 390.0;
        assert_eq!(scorer.calories(&run).efficiency, CalorieEfficiency::Optimal);
    }

    #[test]
    fn test_heart_rate_reserve() {
        let scorer = ActivityScorer::default();
        let mut run = activity(ActivityType::Running, 1, 30);
        assert_eq!(scorer.heart_rate(&run).status(), "no_data");

        run.avg_heart_rate = Some(145);
        run.max_heart_rate = Some(175);
        let hr = scorer.heart_rate(&run).into_ready().unwrap();

        // (145 - 65) / (180 - 65)
        assert_eq!(hr.heart_rate_reserve_pct, 69.6);
        assert_eq!(hr.response, ResponseLevel::VeryHigh);
    }

    #[test]
    fn test_performance_bands() {
        let mut run = activity(ActivityType::Running, 1, 30);
        run.distance_km = Some(6.0);
        run.steps = Some(4800);
        let performance = ActivityScorer::performance(&run);

        let pace = performance.pace.unwrap();
        assert_eq!(pace.pace_min_per_km, 5.0);
        assert_eq!(pace.rating, Some(PaceRating::Fast));
        assert_eq!(performance.distance.unwrap().rating, Some(DistanceRating::Moderate));
        assert_eq!(performance.cadence.unwrap().rating, CadenceRating::Excellent);

        let mut yoga = activity(ActivityType::Yoga, 1, 30);
        yoga.distance_km = Some(1.0);
        let performance = ActivityScorer::performance(&yoga);
        assert_eq!(performance.pace.unwrap().rating, None);
        assert_eq!(performance.distance.unwrap().rating, None);
    }

    #[test]
    fn test_training_load_levels() {
        let mut lift = activity(ActivityType::StrengthTraining, 1, 45);
        lift.avg_heart_rate = Some(110);
        let recovery = ActivityScorer::recovery(&lift);

        assert_eq!(recovery.training_load, 4950.0);
        assert_eq!(recovery.level, RecoveryLevel::Hard);
        assert_eq!(recovery.recovery_hours, 36);
        assert!(recovery.guidance.iter().any(|g| g.contains("48 hours")));

        // No heart rate: 10 min x 120
        let walk = activity(ActivityType::Walking, 1, 10);
        assert_eq!(ActivityScorer::recovery(&walk).level, RecoveryLevel::Light);
    }

    #[test]
    fn test_hard_session_recommends_recovery() {
        let mut run = activity(ActivityType::Running, 1, 60);
        run.avg_heart_rate = Some(150);
        run.calories_burned = 700.0;
        let analysis = ActivityScorer::default().analyze(&run);

        assert_eq!(analysis.recovery.level, RecoveryLevel::VeryHard);
        assert!(analysis
            .recommendations
            .iter()
            .any(|r| r.title == "Prioritize Recovery" && r.priority == Some(Priority::High)));
    }

    #[test]
    fn test_patterns_over_two_weeks() {
        let activities: Vec<Activity> = (1..=14)
            .filter(|d| d % 2 == 1)
            .map(|d| {
                let mut a = activity(ActivityType::Running, d, 40);
                a.calories_burned = 450.0;
                a
            })
            .collect();
        let patterns = ActivityScorer::default()
            .patterns(&activities, 14)
            .into_ready()
            .unwrap();

        assert_eq!(patterns.total_activities, 7);
        // 7 x 40 min over two weeks at MET 8
        assert_eq!(patterns.guideline.weekly_average_minutes, 140.0);
        assert_eq!(patterns.guideline.status, GuidelineStatus::BelowMinimum);
        assert_eq!(patterns.by_type.len(), 1);
        assert!(patterns
            .recommendations
            .iter()
            .any(|r| r.contains("strength training")));
        assert_eq!(patterns.progress.status(), "ready");
    }

    #[test]
    fn test_patterns_without_activities() {
        let result = ActivityScorer::default().patterns(&[], 30);
        assert_eq!(result.status(), "no_data");
    }
}
