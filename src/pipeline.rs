//! Pipeline orchestration
//!
//! This module provides the batch API of the vitals engine. One run takes a
//! user's readings for a window out of a [`HealthStore`] and returns a
//! [`BatchResult`] holding everything derived from them.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::activity::{ActivityAnalysis, ActivityPatterns, ActivityScorer};
use crate::alerts::{RuleContext, RuleEngine};
use crate::anomaly::{AnomalyDetector, AnomalyReport};
use crate::config::EngineConfig;
use crate::daily::{DailyAggregator, DayInputs, GoalProgress};
use crate::error::ComputeError;
use crate::heart_rate::{self, HeartRateTrend, ZoneBreakdown};
use crate::repository::HealthStore;
use crate::sleep::{SleepAnalysis, SleepPatterns, SleepScorer};
use crate::trend::{TrendAnalyzer, TrendReport};
use crate::types::{
    Activity, Alert, Analysis, AnomalyEvent, AnomalyFlag, DailySummary, HealthGoal,
    HeartRateSample, Insight, SleepSession,
};

/// Time range of one batch run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Reference time for validation and rules
    pub now: DateTime<Utc>,
}

impl ProcessingWindow {
    /// The `days` days up to `now`
    pub fn last_days(now: DateTime<Utc>, days: u32) -> Self {
        Self {
            start: now - Duration::days(days as i64),
            end: now,
            now,
        }
    }

    /// Whole days covered, at least one
    pub fn days(&self) -> u32 {
        let seconds = (self.end - self.start).num_seconds().max(0);
        ((seconds + 86_399) / 86_400).max(1) as u32
    }

    fn start_date(&self) -> NaiveDate {
        self.start.date_naive()
    }

    fn end_date(&self) -> NaiveDate {
        self.end.date_naive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    HeartRate,
    Sleep,
    Activity,
}

/// A record left out of the batch, with the reason
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedRecord {
    pub kind: RecordKind,
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedCounts {
    pub heart_rate: usize,
    pub sleep_sessions: usize,
    pub activities: usize,
}

/// Everything derived from one user's batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub user_id: String,
    pub engine_version: String,
    pub window: ProcessingWindow,
    pub processed: ProcessedCounts,
    pub skipped: Vec<SkippedRecord>,
    /// One per date with data, in date order
    pub summaries: Vec<DailySummary>,
    pub anomalies: AnomalyReport,
    /// At most one per source reading
    pub flags: Vec<AnomalyFlag>,
    pub sleep_analyses: Vec<SleepAnalysis>,
    pub sleep_patterns: Analysis<SleepPatterns>,
    pub activity_analyses: Vec<ActivityAnalysis>,
    pub activity_patterns: Analysis<ActivityPatterns>,
    pub heart_rate_zones: Analysis<ZoneBreakdown>,
    pub heart_rate_trend: Analysis<HeartRateTrend>,
    /// Goal progress per tracked date, in date order
    pub goals: Vec<GoalProgress>,
    pub insights: Vec<Insight>,
    pub alerts: Vec<Alert>,
    pub trend: Analysis<TrendReport>,
}

impl BatchResult {
    pub fn to_json(&self) -> Result<String, ComputeError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Goals as they stand after the last tracked date
    pub fn updated_goals(&self) -> Vec<HealthGoal> {
        let mut latest: BTreeMap<&str, &HealthGoal> = BTreeMap::new();
        for progress in &self.goals {
            latest.insert(progress.goal_id.as_str(), &progress.goal);
        }
        latest.into_values().cloned().collect()
    }
}

/// Batch engine for one configuration
///
/// The engine holds no per-user state; one instance can process any number
/// of users, sequentially or in parallel.
pub struct HealthEngine {
    config: EngineConfig,
    detector: AnomalyDetector,
    activity: ActivityScorer,
    daily: DailyAggregator,
    rules: RuleEngine,
}

impl HealthEngine {
    /// Create an engine; an invalid configuration is refused
    pub fn new(config: EngineConfig) -> Result<Self, ComputeError> {
        config.validate()?;
        Ok(Self {
            detector: AnomalyDetector::new(&config)?,
            activity: ActivityScorer::new(config.demographics.clone()),
            daily: DailyAggregator::new(&config),
            rules: RuleEngine::new(&config.alerts),
            config,
        })
    }

    /// Replace the alert rules
    pub fn with_rules(mut self, rules: RuleEngine) -> Self {
        self.rules = rules;
        self
    }

    /// Replace the anomaly detector
    pub fn with_detector(mut self, detector: AnomalyDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one user's batch.
    ///
    /// Pipeline stages:
    /// 1. Fetch readings, prior summaries and goals from the store
    /// 2. Validate records; invalid ones are skipped, not fatal
    /// 3. Detect anomalies and flag readings
    /// 4. Score sleep sessions and activities
    /// 5. Aggregate each date with data and track goals
    /// 6. Analyze trends over prior and new summaries
    /// 7. Evaluate alert rules
    ///
    /// # Example
    /// ```ignore
    /// let engine = HealthEngine::new(EngineConfig::default())?;
    /// let window = ProcessingWindow::last_days(Utc::now(), 7);
    /// let result = engine.process_user(&store, "user-1", window)?;
    /// ```
    pub fn process_user<S: HealthStore + ?Sized>(
        &self,
        store: &S,
        user_id: &str,
        window: ProcessingWindow,
    ) -> Result<BatchResult, ComputeError> {
        if window.end < window.start {
            return Err(ComputeError::InvalidConfig(format!(
                "window end {} is before start {}",
                window.end, window.start
            )));
        }

        // Stage 1: fetch
        let heart_rate = store.heart_rate(user_id, window.start, window.end)?;
        let sleep = store.sleep_sessions(user_id, window.start, window.end)?;
        let activities = store.activities(user_id, window.start, window.end)?;
        let goals = store.goals(user_id)?;

        // Stage 2: validate
        let mut skipped = store.rejected(user_id)?;
        let rejected = skipped.len();
        let heart_rate = keep_valid(heart_rate, RecordKind::HeartRate, &mut skipped, |r| {
            (r.id.clone(), r.validate(window.now))
        });
        let sleep = keep_valid(sleep, RecordKind::Sleep, &mut skipped, |s| {
            (s.id.clone(), s.validate())
        });
        let activities = keep_valid(activities, RecordKind::Activity, &mut skipped, |a| {
            (a.id.clone(), a.validate())
        });
        for record in &skipped[rejected..] {
            log::warn!(
                "skipping {:?} record {} for {}: {}",
                record.kind,
                record.id,
                user_id,
                record.reason
            );
        }

        let days = window.days();

        // Stage 3: anomalies
        let anomalies = self
            .detector
            .report(&heart_rate, &sleep, &activities, days, window.now);
        let events = collect_events(&anomalies);
        let flags = collect_flags(&anomalies);

        // Stage 4: sleep and activity scoring
        let sleep_analyses: Vec<SleepAnalysis> = sleep
            .iter()
            .map(|session| SleepScorer::analyze(session, &heart_rate))
            .collect();
        let sleep_patterns = SleepScorer::patterns(&sleep);
        let activity_analyses: Vec<ActivityAnalysis> = activities
            .iter()
            .map(|activity| self.activity.analyze(activity))
            .collect();
        let activity_patterns = self.activity.patterns(&activities, days);
        let heart_rate_zones =
            heart_rate::heart_rate_zones(&heart_rate, self.config.demographics.max_heart_rate);
        let heart_rate_trend = heart_rate::heart_rate_trend(&heart_rate);

        // Stage 5: daily summaries and goals
        let inputs = DayInputs {
            heart_rate: &heart_rate,
            sleep: &sleep,
            activities: &activities,
            goals: &goals,
            recovery_score: None,
        };
        let dates = dates_with_data(&heart_rate, &sleep, &activities, &window);
        let mut summaries = Vec::with_capacity(dates.len());
        let mut goal_progress = Vec::new();
        let mut current_goals = goals.clone();
        for date in &dates {
            summaries.push(self.daily.aggregate(user_id, *date, &inputs, window.now));
            for goal in current_goals.iter_mut() {
                let progress = self.daily.track_goal(goal, *date, &sleep, &activities);
                *goal = progress.goal.clone();
                goal_progress.push(progress);
            }
        }

        // Stage 6: trends over prior and new summaries
        let history_start = window.end_date() - Duration::days(self.config.trend_days as i64 - 1);
        let mut history: BTreeMap<NaiveDate, DailySummary> = store
            .daily_summaries(user_id, history_start, window.end_date())?
            .into_iter()
            .map(|s| (s.date, s))
            .collect();
        for summary in &summaries {
            history.insert(summary.date, summary.clone());
        }
        let history: Vec<DailySummary> = history.into_values().collect();
        let trend = TrendAnalyzer::analyze(&history);

        // Stage 7: alerts
        let alerts = self.rules.evaluate(&RuleContext {
            now: window.now,
            since: window.start_date(),
            anomalies: &events,
            activities: &activities,
            sleep: &sleep,
            heart_rate: &heart_rate,
        });

        let insights = collect_insights(
            &window,
            &anomalies,
            &sleep_analyses,
            &activity_analyses,
            &summaries,
            &trend,
        );

        log::info!(
            "processed {} for {} to {}: {} readings, {} nights, {} activities, {} summaries, {} anomalies, {} alerts, {} skipped",
            user_id,
            window.start_date(),
            window.end_date(),
            heart_rate.len(),
            sleep.len(),
            activities.len(),
            summaries.len(),
            anomalies.summary.total_anomalies,
            alerts.len(),
            skipped.len()
        );

        Ok(BatchResult {
            user_id: user_id.to_string(),
            engine_version: crate::ENGINE_VERSION.to_string(),
            window,
            processed: ProcessedCounts {
                heart_rate: heart_rate.len(),
                sleep_sessions: sleep.len(),
                activities: activities.len(),
            },
            skipped,
            summaries,
            anomalies,
            flags,
            sleep_analyses,
            sleep_patterns,
            activity_analyses,
            activity_patterns,
            heart_rate_zones,
            heart_rate_trend,
            goals: goal_progress,
            insights,
            alerts,
            trend,
        })
    }

    /// Process a user and write the result back to the store
    pub fn process_and_persist<S: HealthStore + ?Sized>(
        &self,
        store: &mut S,
        user_id: &str,
        window: ProcessingWindow,
    ) -> Result<BatchResult, ComputeError> {
        let result = self.process_user(&*store, user_id, window)?;
        store.persist(&result)?;
        Ok(result)
    }

    /// Process several users in parallel over a shared read-only store.
    ///
    /// Results come back in the order of `user_ids`; one user's failure
    /// does not affect the others.
    pub fn process_users<S: HealthStore + Sync + ?Sized>(
        &self,
        store: &S,
        user_ids: &[String],
        window: ProcessingWindow,
    ) -> Vec<(String, Result<BatchResult, ComputeError>)> {
        std::thread::scope(|scope| {
            let handles: Vec<_> = user_ids
                .iter()
                .map(|user_id| {
                    scope.spawn(move || (user_id.clone(), self.process_user(store, user_id, window)))
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(outcome) => outcome,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        })
    }
}

fn keep_valid<T, F>(
    records: Vec<T>,
    kind: RecordKind,
    skipped: &mut Vec<SkippedRecord>,
    check: F,
) -> Vec<T>
where
    F: Fn(&T) -> (String, Result<(), crate::error::ValidationError>),
{
    records
        .into_iter()
        .filter(|record| match check(record) {
            (_, Ok(())) => true,
            (id, Err(e)) => {
                skipped.push(SkippedRecord {
                    kind,
                    id,
                    reason: e.to_string(),
                });
                false
            }
        })
        .collect()
}

/// Dates inside the window that have at least one reading, session or activity
fn dates_with_data(
    heart_rate: &[HeartRateSample],
    sleep: &[SleepSession],
    activities: &[Activity],
    window: &ProcessingWindow,
) -> Vec<NaiveDate> {
    let dates: BTreeSet<NaiveDate> = heart_rate
        .iter()
        .map(|r| r.timestamp.date_naive())
        .chain(sleep.iter().filter_map(SleepSession::date))
        .chain(activities.iter().map(Activity::date))
        .filter(|d| *d >= window.start_date() && *d <= window.end_date())
        .collect();
    dates.into_iter().collect()
}

fn collect_events(report: &AnomalyReport) -> Vec<AnomalyEvent> {
    let mut events: Vec<AnomalyEvent> = report
        .heart_rate
        .ready()
        .map(|hr| hr.events.clone())
        .unwrap_or_default();
    for analysis in [&report.sleep, &report.activity] {
        if let Some(found) = analysis.ready() {
            events.extend(found.iter().cloned());
        }
    }
    events.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.source_id.cmp(&b.source_id)));
    events
}

/// Heart rate flags first, then one flag per flagged session or activity
fn collect_flags(report: &AnomalyReport) -> Vec<AnomalyFlag> {
    let mut flags: BTreeMap<String, AnomalyFlag> = BTreeMap::new();
    if let Some(hr) = report.heart_rate.ready() {
        for flag in &hr.flags {
            flags.entry(flag.source_id.clone()).or_insert_with(|| flag.clone());
        }
    }
    for analysis in [&report.sleep, &report.activity] {
        for event in analysis.ready().into_iter().flatten() {
            flags
                .entry(event.source_id.clone())
                .or_insert_with(|| AnomalyFlag {
                    source_id: event.source_id.clone(),
                    metric: event.metric,
                    anomaly_type: event.anomaly_type,
                    severity: event.severity,
                });
        }
    }
    flags.into_values().collect()
}

/// Every insight carries the dates it covers; undated ones cover the window
fn collect_insights(
    window: &ProcessingWindow,
    report: &AnomalyReport,
    sleep: &[SleepAnalysis],
    activities: &[ActivityAnalysis],
    summaries: &[DailySummary],
    trend: &Analysis<TrendReport>,
) -> Vec<Insight> {
    let mut insights: Vec<Insight> = report.recommendations.clone();
    insights.extend(sleep.iter().flat_map(|a| a.recommendations.iter().cloned()));
    insights.extend(activities.iter().flat_map(|a| a.recommendations.iter().cloned()));
    for summary in summaries {
        insights.extend(summary.insights.iter().cloned());
        insights.extend(summary.recommendations.iter().cloned());
    }
    if let Some(report) = trend.ready() {
        insights.extend(report.insights.iter().cloned());
    }
    insights
        .into_iter()
        .map(|insight| match insight.start_date {
            Some(_) => insight,
            None => insight.for_dates(window.start_date(), window.end_date()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{Dataset, InMemoryStore};
    use crate::types::{ActivityType, GoalType, HeartRateContext};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 12, 20, 0, 0).unwrap()
    }

    fn dataset() -> Dataset {
        let day_start = Utc.with_ymd_and_hms(2024, 9, 12, 8, 0, 0).unwrap();
        let mut heart_rate: Vec<HeartRateSample> = (0..60)
            .map(|i| {
                let bpm = 70 + (i % 5) as u16;
                HeartRateSample::new(
                    format!("hr-{i}"),
                    day_start + Duration::minutes(i * 2),
                    bpm,
                    HeartRateContext::Rest,
                )
            })
            .collect();
        heart_rate[30].bpm = 180;
        heart_rate.push(HeartRateSample::new(
            "hr-bad",
            day_start,
            300,
            HeartRateContext::Rest,
        ));

        let bed = Utc.with_ymd_and_hms(2024, 9, 11, 23, 0, 0).unwrap();
        let mut night = SleepSession::from_stages("night-1", 20.0, 210.0, 90.0, 100.0);
        night.start = Some(bed);
        night.end = Some(bed + Duration::minutes(420));

        let walk_start = Utc.with_ymd_and_hms(2024, 9, 12, 12, 0, 0).unwrap();
        let mut walk = Activity::new(
            "walk-1",
            ActivityType::Walking,
            walk_start,
            walk_start + Duration::minutes(45),
        );
        walk.steps = Some(6000);
        walk.calories_burned = 210.0;
        walk.distance_km = Some(4.0);

        Dataset {
            user_id: "user-1".to_string(),
            heart_rate,
            sleep_sessions: vec![night],
            activities: vec![walk],
            goals: vec![HealthGoal::new("steps", GoalType::Steps, 5000.0)],
            ..Default::default()
        }
    }

    fn engine() -> HealthEngine {
        HealthEngine::new(EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_invalid_config_is_refused() {
        let mut config = EngineConfig::default();
        config.feature_window = 0;
        assert!(matches!(
            HealthEngine::new(config),
            Err(ComputeError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_process_user_end_to_end() {
        let store = InMemoryStore::from_datasets(vec![dataset()]);
        let window = ProcessingWindow::last_days(now(), 2);
        let result = engine().process_user(&store, "user-1", window).unwrap();

        assert_eq!(result.processed.heart_rate, 60);
        assert_eq!(result.processed.sleep_sessions, 1);
        assert_eq!(result.processed.activities, 1);
        assert_eq!(result.skipped.len(), 1);
        assert_eq!(result.skipped[0].id, "hr-bad");
        assert_eq!(result.skipped[0].kind, RecordKind::HeartRate);

        let dates: Vec<NaiveDate> = result.summaries.iter().map(|s| s.date).collect();
        assert_eq!(
            dates,
            vec![
                NaiveDate::from_ymd_opt(2024, 9, 11).unwrap(),
                NaiveDate::from_ymd_opt(2024, 9, 12).unwrap()
            ]
        );
        let today = &result.summaries[1];
        assert_eq!(today.total_steps, 6000);
        assert!((0.0..=100.0).contains(&today.overall_score));

        assert!(result.flags.iter().any(|f| f.source_id == "hr-30"));
        assert_eq!(result.sleep_analyses.len(), 1);
        assert_eq!(result.activity_analyses.len(), 1);
        assert!(result.heart_rate_zones.is_ready());

        let today_goal = result.goals.last().unwrap();
        assert!(today_goal.goal_met);
        assert_eq!(today_goal.goal.current_streak, 1);
        assert_eq!(result.updated_goals().len(), 1);

        let json: serde_json::Value = serde_json::from_str(&result.to_json().unwrap()).unwrap();
        assert_eq!(json["user_id"], "user-1");
        assert_eq!(json["anomalies"]["heart_rate"]["status"], "ready");
    }

    #[test]
    fn test_rerun_is_stable() {
        let store = InMemoryStore::from_datasets(vec![dataset()]);
        let window = ProcessingWindow::last_days(now(), 2);
        let first = engine().process_user(&store, "user-1", window).unwrap();
        let second = engine().process_user(&store, "user-1", window).unwrap();

        assert_eq!(first.flags, second.flags);
        assert_eq!(first.anomalies.summary, second.anomalies.summary);
        let scores = |r: &BatchResult| -> Vec<f64> {
            r.summaries.iter().map(|s| s.overall_score).collect()
        };
        assert_eq!(scores(&first), scores(&second));
    }

    #[test]
    fn test_persist_then_reprocess_keeps_one_summary_per_date() {
        let mut store = InMemoryStore::from_datasets(vec![dataset()]);
        let window = ProcessingWindow::last_days(now(), 2);
        let engine = engine();
        engine.process_and_persist(&mut store, "user-1", window).unwrap();
        let alerts = store.alerts("user-1").to_vec();
        let insights = store.insights("user-1").to_vec();
        assert!(!alerts.is_empty());
        assert!(!insights.is_empty());

        engine.process_and_persist(&mut store, "user-1", window).unwrap();

        let start = NaiveDate::from_ymd_opt(2024, 9, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 9, 30).unwrap();
        assert_eq!(store.daily_summaries("user-1", start, end).unwrap().len(), 2);
        // goal was met on the same date both times
        assert_eq!(store.goals("user-1").unwrap()[0].current_streak, 1);

        let ids = |found: &[Alert]| found.iter().map(|a| a.id).collect::<Vec<_>>();
        assert_eq!(ids(store.alerts("user-1")), ids(alerts.as_slice()));
        assert_eq!(store.insights("user-1").len(), insights.len());
        assert!(store
            .insights("user-1")
            .iter()
            .zip(&insights)
            .all(|(now, before)| now.id == before.id));
    }

    #[test]
    fn test_undecodable_records_are_skipped() {
        let json = r#"{"user_id": "user-1", "heart_rate": [
            {"id": "ok", "timestamp": "2024-09-12T08:00:00Z", "bpm": 70, "context": "rest"},
            {"id": "neg", "timestamp": "2024-09-12T08:01:00Z", "bpm": -5, "context": "rest"},
            {"id": "frac", "timestamp": "2024-09-12T08:02:00Z", "bpm": 71.5, "context": "rest"}
        ]}"#;
        let store = InMemoryStore::from_datasets(Dataset::from_json(json).unwrap());
        let result = engine()
            .process_user(&store, "user-1", ProcessingWindow::last_days(now(), 1))
            .unwrap();

        assert_eq!(result.processed.heart_rate, 1);
        let skipped: Vec<&str> = result.skipped.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(skipped, vec!["neg", "frac"]);
        assert!(result.skipped.iter().all(|r| r.kind == RecordKind::HeartRate));
    }

    #[test]
    fn test_unknown_user_yields_empty_batch() {
        let store = InMemoryStore::default();
        let window = ProcessingWindow::last_days(now(), 7);
        let result = engine().process_user(&store, "nobody", window).unwrap();

        assert!(result.summaries.is_empty());
        assert_eq!(result.anomalies.heart_rate.status(), "no_data");
        assert_eq!(result.trend.status(), "no_data");
    }

    #[test]
    fn test_process_users_in_parallel() {
        let mut other = dataset();
        other.user_id = "user-2".to_string();
        let store = InMemoryStore::from_datasets(vec![dataset(), other]);
        let users = vec!["user-1".to_string(), "user-2".to_string()];

        let results = engine().process_users(&store, &users, ProcessingWindow::last_days(now(), 2));
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "user-1");
        assert_eq!(results[1].0, "user-2");
        for (user, result) in &results {
            assert_eq!(&result.as_ref().unwrap().user_id, user);
        }
    }

    #[test]
    fn test_custom_rules_and_detector() {
        let store = InMemoryStore::default();
        let engine = engine()
            .with_rules(RuleEngine::empty())
            .with_detector(AnomalyDetector::default());
        let result = engine
            .process_user(&store, "nobody", ProcessingWindow::last_days(now(), 3))
            .unwrap();
        assert!(result.alerts.is_empty());
    }

    #[test]
    fn test_window_days() {
        let window = ProcessingWindow::last_days(now(), 7);
        assert_eq!(window.days(), 7);
        let instant = ProcessingWindow {
            start: now(),
            end: now(),
            now: now(),
        };
        assert_eq!(instant.days(), 1);
    }
}
