//! Daily aggregation and health score
//!
//! One [`DailySummary`] per user and calendar date, recomputed from the raw
//! readings every time so re-aggregation yields the same summary.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{DailyConfig, EngineConfig, ScoreWeights};
use crate::heart_rate;
use crate::sleep::{clock_minutes, SleepScorer};
use crate::stats;
use crate::types::{
    Activity, DailySummary, GoalType, HealthGoal, HeartRateSample, Insight, InsightCategory,
    InsightType, Priority, SleepSession,
};

/// Readings available for one user; the aggregator picks out the date itself
#[derive(Debug, Clone, Copy, Default)]
pub struct DayInputs<'a> {
    pub heart_rate: &'a [HeartRateSample],
    pub sleep: &'a [SleepSession],
    pub activities: &'a [Activity],
    pub goals: &'a [HealthGoal],
    /// Externally supplied recovery score (0-100)
    pub recovery_score: Option<f64>,
}

/// Per-component scores feeding the overall score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub activity: f64,
    pub sleep: f64,
    pub heart: f64,
    pub recovery: f64,
}

impl ScoreBreakdown {
    /// Weighted total clamped to [0, 100], one decimal
    pub fn overall(&self, weights: &ScoreWeights) -> f64 {
        let total = self.activity * weights.activity
            + self.sleep * weights.sleep
            + self.heart * weights.heart
            + self.recovery * weights.recovery;
        stats::round_to(total.clamp(0.0, 100.0), 1)
    }
}

pub struct DailyAggregator {
    daily: DailyConfig,
    min_hrv_intervals: usize,
}

impl Default for DailyAggregator {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

impl DailyAggregator {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            daily: config.daily.clone(),
            min_hrv_intervals: config.detector.min_hrv_intervals,
        }
    }

    /// Step goal from the user's goals, else the configured default
    pub fn step_goal(&self, goals: &[HealthGoal]) -> f64 {
        goals
            .iter()
            .find(|g| g.goal_type == GoalType::Steps && g.target_value > 0.0)
            .map_or(self.daily.step_goal as f64, |g| g.target_value)
    }

    pub fn aggregate(
        &self,
        user_id: &str,
        date: NaiveDate,
        inputs: &DayInputs<'_>,
        processed_at: DateTime<Utc>,
    ) -> DailySummary {
        let mut summary = DailySummary::empty(user_id, date, processed_at);

        let activities: Vec<&Activity> = inputs
            .activities
            .iter()
            .filter(|a| a.date() == date)
            .collect();
        summary.activity_count = activities.len() as u32;
        summary.total_steps = activities.iter().filter_map(|a| a.steps).map(u64::from).sum();
        summary.total_calories =
            stats::round_to(activities.iter().map(|a| a.calories_burned).sum(), 1);
        summary.active_minutes =
            stats::round_to(activities.iter().map(|a| a.duration_minutes()).sum(), 1);

        let mut sessions: Vec<&SleepSession> = inputs
            .sleep
            .iter()
            .filter(|s| s.date() == Some(date))
            .collect();
        sessions.sort_by_key(|s| s.start);
        if !sessions.is_empty() {
            let scores: Vec<f64> = sessions
                .iter()
                .map(|s| s.quality_score.unwrap_or_else(|| SleepScorer::score(s)))
                .collect();
            let efficiencies: Vec<f64> = sessions.iter().map(|s| s.efficiency_pct()).collect();
            summary.sleep_duration_minutes = Some(stats::round_to(
                sessions.iter().map(|s| s.duration_minutes()).sum(),
                1,
            ));
            summary.sleep_score = Some(stats::round_to(stats::mean(&scores), 1));
            summary.sleep_efficiency = Some(stats::round_to(stats::mean(&efficiencies), 1));
            summary.bedtime_minutes = sessions.iter().find_map(|s| s.start).map(clock_minutes);
        }

        let mut readings: Vec<HeartRateSample> = inputs
            .heart_rate
            .iter()
            .filter(|r| r.timestamp.date_naive() == date)
            .cloned()
            .collect();
        readings.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        if !readings.is_empty() {
            let bpms: Vec<f64> = readings.iter().map(|r| r.bpm as f64).collect();
            summary.avg_heart_rate = Some(stats::round_to(stats::mean(&bpms), 1));
            summary.min_heart_rate = readings.iter().map(|r| r.bpm).min();
            summary.max_heart_rate = readings.iter().map(|r| r.bpm).max();
            summary.resting_heart_rate =
                heart_rate::resting_heart_rate(&readings, self.daily.resting_hr_lowest_n, None)
                    .into_ready()
                    .map(|r| r.bpm);
            summary.heart_rate_variability =
                heart_rate::estimate_hrv(&readings, self.min_hrv_intervals)
                    .map(|hrv| stats::round_to(hrv.rmssd_ms, 1));
        }

        summary.recovery_score = inputs.recovery_score;
        summary.is_complete =
            !activities.is_empty() && !sessions.is_empty() && !readings.is_empty();

        let step_goal = self.step_goal(inputs.goals);
        summary.overall_score = self.breakdown(&summary, step_goal).overall(&self.daily.weights);
        summary.insights = daily_insights(&summary, step_goal);
        summary.recommendations = daily_recommendations(&summary.insights, date);

        log::debug!(
            "aggregated {user_id} {date}: score {:.1}, complete {}",
            summary.overall_score,
            summary.is_complete
        );

        summary
    }

    /// Sub-scores with their fallbacks for missing data
    pub fn breakdown(&self, summary: &DailySummary, step_goal: f64) -> ScoreBreakdown {
        let activity = (summary.total_steps as f64 / step_goal * 100.0).min(100.0);

        let sleep = match (summary.sleep_score, summary.sleep_duration_minutes) {
            (Some(score), _) => score,
            (None, Some(minutes)) => sleep_duration_score(minutes / 60.0),
            (None, None) => 50.0,
        };

        let heart = match summary.resting_heart_rate {
            Some(rhr) if rhr < 60.0 => 90.0,
            Some(rhr) if rhr < 70.0 => 80.0,
            Some(rhr) if rhr < 80.0 => 70.0,
            Some(_) => 50.0,
            None => 70.0,
        };

        ScoreBreakdown {
            activity,
            sleep,
            heart,
            recovery: summary.recovery_score.unwrap_or(75.0),
        }
    }

    /// Day's value for a goal, whether it was met, and the goal with
    /// updated streaks. Tracking the same date twice does not extend a streak.
    pub fn track_goal(
        &self,
        goal: &HealthGoal,
        date: NaiveDate,
        sleep: &[SleepSession],
        activities: &[Activity],
    ) -> GoalProgress {
        let todays = || activities.iter().filter(move |a| a.date() == date);
        let current_value = match goal.goal_type {
            GoalType::Steps => todays().filter_map(|a| a.steps).map(f64::from).sum(),
            GoalType::Sleep => sleep
                .iter()
                .filter(|s| s.date() == Some(date))
                .min_by_key(|s| s.start)
                .map_or(0.0, |s| s.duration_minutes()),
            GoalType::Activity => todays().map(|a| a.duration_minutes()).sum(),
            GoalType::Calories => todays().map(|a| a.calories_burned).sum(),
        };
        let goal_met = current_value >= goal.target_value;

        // Dates up to the last met date were already counted
        let counted = goal.last_met.is_some_and(|last| date <= last);
        let mut updated = goal.clone();
        if goal_met && !counted {
            updated.current_streak = match goal.last_met {
                Some(last) if Some(last) != date.pred_opt() => 1,
                _ => goal.current_streak + 1,
            };
            updated.last_met = Some(date);
            updated.longest_streak = updated.longest_streak.max(updated.current_streak);
        } else if !goal_met && !counted {
            updated.current_streak = 0;
        }

        GoalProgress {
            goal_id: goal.id.clone(),
            date,
            target_value: goal.target_value,
            current_value: stats::round_to(current_value, 1),
            progress_pct: if goal.target_value > 0.0 {
                stats::round_to((current_value / goal.target_value * 100.0).min(100.0), 1)
            } else {
                100.0
            },
            goal_met,
            goal: updated,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalProgress {
    pub goal_id: String,
    pub date: NaiveDate,
    pub target_value: f64,
    pub current_value: f64,
    pub progress_pct: f64,
    pub goal_met: bool,
    /// Goal with streaks updated for this date
    pub goal: HealthGoal,
}

fn sleep_duration_score(hours: f64) -> f64 {
    if (7.0..=9.0).contains(&hours) {
        90.0
    } else if (6.0..7.0).contains(&hours) || (hours > 9.0 && hours <= 10.0) {
        70.0
    } else if (5.0..6.0).contains(&hours) || (hours > 10.0 && hours <= 11.0) {
        50.0
    } else {
        30.0
    }
}

fn daily_insights(summary: &DailySummary, step_goal: f64) -> Vec<Insight> {
    let date = summary.date;
    let mut insights = Vec::new();
    let mut push = |insight: Insight| insights.push(insight.for_dates(date, date));

    // Activity
    let steps = summary.total_steps as f64;
    let step_pct = stats::round_to(steps / step_goal * 100.0, 1);
    if steps >= step_goal {
        push(
            Insight::new(
                InsightCategory::Activity,
                InsightType::Achievement,
                "Step Goal Achieved!",
                format!(
                    "You reached {} steps today, exceeding your daily goal of {:.0} steps.",
                    summary.total_steps, step_goal
                ),
                1.0,
            )
            .with_data("steps", summary.total_steps)
            .with_data("goal", step_goal)
            .with_data("percentage", step_pct),
        );
    } else if steps >= step_goal * 0.8 {
        push(
            Insight::new(
                InsightCategory::Activity,
                InsightType::Progress,
                "Close to Step Goal",
                format!(
                    "You're at {} steps, {:.0} steps away from your daily goal.",
                    summary.total_steps,
                    step_goal - steps
                ),
                0.9,
            )
            .with_data("steps", summary.total_steps)
            .with_data("goal", step_goal)
            .with_data("remaining", step_goal - steps),
        );
    } else if steps < step_goal * 0.5 {
        push(
            Insight::new(
                InsightCategory::Activity,
                InsightType::Recommendation,
                "Increase Daily Activity",
                format!(
                    "You've taken {} steps today. Consider adding a walk to reach your goal.",
                    summary.total_steps
                ),
                0.8,
            )
            .with_data("steps", summary.total_steps)
            .with_data("goal", step_goal)
            .with_data("percentage", step_pct),
        );
    }
    if summary.activity_count == 0 {
        push(
            Insight::new(
                InsightCategory::Activity,
                InsightType::Recommendation,
                "Time for Movement",
                "No recorded activities today. Consider adding some physical movement.",
                0.9,
            )
            .with_data("activities_count", 0),
        );
    }

    // Sleep
    if let Some(minutes) = summary.sleep_duration_minutes.filter(|m| *m > 0.0) {
        let hours = minutes / 60.0;
        if (7.0..=9.0).contains(&hours) {
            push(
                Insight::new(
                    InsightCategory::Sleep,
                    InsightType::Achievement,
                    "Optimal Sleep Duration",
                    format!("You slept {hours:.1} hours, within the recommended 7-9 hour range."),
                    1.0,
                )
                .with_data("hours", stats::round_to(hours, 1)),
            );
        } else if hours < 6.0 {
            push(
                Insight::new(
                    InsightCategory::Sleep,
                    InsightType::Warning,
                    "Insufficient Sleep",
                    format!(
                        "You slept {hours:.1} hours, below the recommended minimum of 7 hours."
                    ),
                    0.9,
                )
                .with_data("hours", stats::round_to(hours, 1))
                .with_data("deficit_hours", stats::round_to(7.0 - hours, 1)),
            );
        } else if hours > 9.0 {
            push(
                Insight::new(
                    InsightCategory::Sleep,
                    InsightType::Pattern,
                    "Extended Sleep Duration",
                    format!("You slept {hours:.1} hours, above the recommended range."),
                    0.8,
                )
                .with_data("hours", stats::round_to(hours, 1))
                .with_data("excess_hours", stats::round_to(hours - 9.0, 1)),
            );
        }
    }
    match summary.sleep_score {
        Some(score) if score >= 85.0 => push(
            Insight::new(
                InsightCategory::Sleep,
                InsightType::Achievement,
                "Excellent Sleep Quality",
                format!("Your sleep quality score of {score:.0}/100 indicates restful sleep."),
                0.9,
            )
            .with_data("score", score),
        ),
        Some(score) if score > 0.0 && score < 60.0 => push(
            Insight::new(
                InsightCategory::Sleep,
                InsightType::Recommendation,
                "Improve Sleep Quality",
                format!("Your sleep quality score of {score:.0}/100 suggests room for improvement."),
                0.8,
            )
            .with_data("score", score),
        ),
        _ => {}
    }

    // Heart
    match summary.avg_heart_rate {
        Some(avg) if avg < 60.0 => push(
            Insight::new(
                InsightCategory::Heart,
                InsightType::Pattern,
                "Low Average Heart Rate",
                format!("Your average heart rate of {avg:.0} BPM is lower than typical."),
                0.8,
            )
            .with_data("average_bpm", avg),
        ),
        Some(avg) if avg > 100.0 => push(
            Insight::new(
                InsightCategory::Heart,
                InsightType::Warning,
                "Elevated Average Heart Rate",
                format!("Your average heart rate of {avg:.0} BPM is higher than typical."),
                0.8,
            )
            .with_data("average_bpm", avg),
        ),
        _ => {}
    }
    match summary.resting_heart_rate {
        Some(rhr) if rhr < 60.0 => push(
            Insight::new(
                InsightCategory::Heart,
                InsightType::Achievement,
                "Excellent Resting Heart Rate",
                format!(
                    "Your resting heart rate of {rhr:.0} BPM indicates good cardiovascular fitness."
                ),
                0.9,
            )
            .with_data("resting_bpm", rhr),
        ),
        Some(rhr) if rhr > 80.0 => push(
            Insight::new(
                InsightCategory::Heart,
                InsightType::Recommendation,
                "Monitor Resting Heart Rate",
                format!("Your resting heart rate of {rhr:.0} BPM is above optimal levels."),
                0.8,
            )
            .with_data("resting_bpm", rhr),
        ),
        _ => {}
    }
    if let Some(hrv) = summary.heart_rate_variability.filter(|h| *h > 0.0 && *h < 20.0) {
        push(
            Insight::new(
                InsightCategory::Heart,
                InsightType::Pattern,
                "Low Heart Rate Variability",
                format!("Your HRV of {hrv:.0} ms may indicate increased stress or fatigue."),
                0.7,
            )
            .with_data("hrv_ms", hrv),
        );
    }

    // Overall
    let score = summary.overall_score;
    let (insight_type, title, description, confidence) = if score >= 80.0 {
        (
            InsightType::Achievement,
            "Excellent Health Day",
            format!("Your overall health score of {score:.0}/100 indicates a very healthy day!"),
            0.9,
        )
    } else if score >= 60.0 {
        (
            InsightType::Progress,
            "Good Health Day",
            format!("Your overall health score of {score:.0}/100 shows a solid day."),
            0.8,
        )
    } else {
        (
            InsightType::Recommendation,
            "Room for Improvement",
            format!("Your overall health score of {score:.0}/100 suggests areas to focus on."),
            0.8,
        )
    };
    push(
        Insight::new(InsightCategory::Overall, insight_type, title, description, confidence)
            .with_data("score", score),
    );
    if !summary.is_complete {
        push(
            Insight::new(
                InsightCategory::Overall,
                InsightType::Info,
                "Incomplete Data",
                "Some health metrics may be missing for today.",
                0.7,
            )
            .with_data("is_complete", false),
        );
    }

    insights
}

fn daily_recommendations(insights: &[Insight], date: NaiveDate) -> Vec<Insight> {
    let any = |category: InsightCategory, types: &[InsightType]| {
        insights
            .iter()
            .any(|i| i.category == category && types.contains(&i.insight_type))
    };
    let mut out = Vec::new();

    if any(InsightCategory::Activity, &[InsightType::Recommendation]) {
        out.push(
            Insight::new(
                InsightCategory::Activity,
                InsightType::Recommendation,
                "Daily Movement Goal",
                "Aim for at least 30 minutes of moderate activity today.",
                0.9,
            )
            .with_priority(Priority::High)
            .with_actions([
                "Take a 15-minute walk after meals",
                "Use stairs instead of elevator",
                "Do 10 minutes of stretching",
            ])
            .for_dates(date, date),
        );
    }
    if any(
        InsightCategory::Sleep,
        &[InsightType::Warning, InsightType::Recommendation],
    ) {
        out.push(
            Insight::new(
                InsightCategory::Sleep,
                InsightType::Recommendation,
                "Improve Sleep Tonight",
                "Focus on sleep hygiene for better rest.",
                0.8,
            )
            .with_priority(Priority::Medium)
            .with_actions([
                "Avoid screens 1 hour before bed",
                "Keep bedroom cool and dark",
                "Establish consistent bedtime",
            ])
            .for_dates(date, date),
        );
    }
    if any(InsightCategory::Heart, &[InsightType::Warning]) {
        out.push(
            Insight::new(
                InsightCategory::Heart,
                InsightType::Recommendation,
                "Heart Health Focus",
                "Consider activities that support cardiovascular health.",
                0.7,
            )
            .with_priority(Priority::Medium)
            .with_actions([
                "Practice deep breathing exercises",
                "Stay well hydrated",
                "Monitor stress levels",
            ])
            .for_dates(date, date),
        );
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ActivityType, HeartRateContext};
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 6).unwrap()
    }

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, hour, minute, 0).unwrap()
    }

    fn walk(steps: u32) -> Activity {
        let mut a = Activity::new("walk", ActivityType::Walking, at(12, 0), at(12, 45));
        a.steps = Some(steps);
        a.calories_burned = 200.0;
        a
    }

    fn night() -> SleepSession {
        let mut s = SleepSession::from_stages("night", 20.0, 240.0, 90.0, 100.0);
        s.start = Some(at(0, 30));
        s.end = Some(at(0, 30) + Duration::minutes(450));
        s
    }

    fn resting_readings(bpm: u16) -> Vec<HeartRateSample> {
        (0..8)
            .map(|i| {
                HeartRateSample::new(
                    format!("hr-{i}"),
                    at(9, 0) + Duration::minutes(i),
                    bpm,
                    HeartRateContext::Rest,
                )
            })
            .collect()
    }

    #[test]
    fn test_empty_day_uses_fallbacks() {
        let aggregator = DailyAggregator::default();
        let summary =
            aggregator.aggregate("u1", day(), &DayInputs::default(), at(23, 0));

        // 0 * .35 + 50 * .35 + 70 * .20 + 75 * .10
        assert_eq!(summary.overall_score, 39.0);
        assert!(!summary.is_complete);
        assert!(summary.insights.iter().any(|i| i.title == "Incomplete Data"));
        assert!(summary
            .recommendations
            .iter()
            .any(|r| r.title == "Daily Movement Goal"));
    }

    #[test]
    fn test_complete_day() {
        let activities = [walk(10_500)];
        let sleep = [night()];
        let heart_rate = resting_readings(55);
        let inputs = DayInputs {
            heart_rate: &heart_rate,
            sleep: &sleep,
            activities: &activities,
            ..Default::default()
        };
        let summary = DailyAggregator::default().aggregate("u1", day(), &inputs, at(23, 0));

        assert!(summary.is_complete);
        assert_eq!(summary.total_steps, 10_500);
        assert_eq!(summary.sleep_duration_minutes, Some(450.0));
        assert_eq!(summary.resting_heart_rate, Some(55.0));
        assert_eq!(summary.bedtime_minutes, Some(30.0));
        assert!(summary.insights.iter().any(|i| i.title == "Step Goal Achieved!"));
        assert!(summary.overall_score >= 80.0);
    }

    #[test]
    fn test_overall_score_is_clamped() {
        let aggregator = DailyAggregator::default();
        let mut summary = DailySummary::empty("u1", day(), at(0, 0));
        summary.sleep_score = Some(180.0);
        summary.recovery_score = Some(400.0);
        summary.total_steps = 50_000;

        let score = aggregator.breakdown(&summary, 10_000.0).overall(&ScoreWeights::default());
        assert_eq!(score, 100.0);

        let negative = ScoreBreakdown {
            activity: 0.0,
            sleep: -300.0,
            heart: 0.0,
            recovery: 0.0,
        };
        assert_eq!(negative.overall(&ScoreWeights::default()), 0.0);
    }

    #[test]
    fn test_sleep_duration_fallback() {
        assert_eq!(sleep_duration_score(8.0), 90.0);
        assert_eq!(sleep_duration_score(9.5), 70.0);
        assert_eq!(sleep_duration_score(5.5), 50.0);
        assert_eq!(sleep_duration_score(3.0), 30.0);
    }

    #[test]
    fn test_reaggregation_is_stable() {
        let activities = [walk(4_000)];
        let heart_rate = resting_readings(82);
        let inputs = DayInputs {
            heart_rate: &heart_rate,
            activities: &activities,
            ..Default::default()
        };
        let aggregator = DailyAggregator::default();
        let first = aggregator.aggregate("u1", day(), &inputs, at(23, 0));
        let second = aggregator.aggregate("u1", day(), &inputs, at(23, 0));

        assert_eq!(first.overall_score, second.overall_score);
        assert_eq!(first.key(), second.key());
        assert_eq!(first.insights.len(), second.insights.len());
        assert!(first
            .insights
            .iter()
            .any(|i| i.title == "Monitor Resting Heart Rate"));
    }

    #[test]
    fn test_user_step_goal_overrides_default() {
        let goals = [HealthGoal::new("g", GoalType::Steps, 4_000.0)];
        let activities = [walk(4_200)];
        let inputs = DayInputs {
            activities: &activities,
            goals: &goals,
            ..Default::default()
        };
        let summary = DailyAggregator::default().aggregate("u1", day(), &inputs, at(23, 0));

        assert!(summary.insights.iter().any(|i| i.title == "Step Goal Achieved!"));
    }

    #[test]
    fn test_goal_streaks() {
        let aggregator = DailyAggregator::default();
        let goal = HealthGoal::new("g", GoalType::Activity, 30.0);
        let activities = [walk(1_000)];

        let progress = aggregator.track_goal(&goal, day(), &[], &activities);
        assert!(progress.goal_met);
        assert_eq!(progress.current_value, 45.0);
        assert_eq!(progress.goal.current_streak, 1);

        // Same date again leaves the streak alone
        let again = aggregator.track_goal(&progress.goal, day(), &[], &activities);
        assert_eq!(again.goal.current_streak, 1);

        let next_day = day().succ_opt().unwrap();
        let missed = aggregator.track_goal(&again.goal, next_day, &[], &activities);
        assert!(!missed.goal_met);
        assert_eq!(missed.goal.current_streak, 0);
        assert_eq!(missed.goal.longest_streak, 1);

        // Reprocessing an earlier date does not touch the streak
        let earlier = day().pred_opt().unwrap();
        let replay = aggregator.track_goal(&progress.goal, earlier, &[], &activities);
        assert!(!replay.goal_met);
        assert_eq!(replay.goal.current_streak, 1);
    }
}
