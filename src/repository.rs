//! Store access
//!
//! The engine reads readings and writes results only through [`HealthStore`].
//! [`InMemoryStore`] keeps everything in memory and can be loaded from JSON
//! [`Dataset`]s; the CLI and the tests use it.

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::error::ComputeError;
use crate::pipeline::{BatchResult, RecordKind, SkippedRecord};
use crate::types::{
    Activity, Alert, AnomalyFlag, DailySummary, HealthGoal, HeartRateSample, Insight,
    SleepSession,
};

/// Windowed reads and idempotent writes for one user at a time.
///
/// Reads return records ordered by time. `persist` upserts summaries by
/// `(user, date)`, flags by source id, goals by id, and insights and alerts
/// by their natural keys, so persisting a rerun of the same window adds
/// nothing.
pub trait HealthStore {
    fn heart_rate(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<HeartRateSample>, ComputeError>;

    /// Sessions starting (or, without a start, ending) in the range
    fn sleep_sessions(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SleepSession>, ComputeError>;

    fn activities(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Activity>, ComputeError>;

    /// Stored summaries with `start <= date <= end`
    fn daily_summaries(
        &self,
        user_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailySummary>, ComputeError>;

    fn goals(&self, user_id: &str) -> Result<Vec<HealthGoal>, ComputeError>;

    /// Records the store holds but could not decode
    fn rejected(&self, _user_id: &str) -> Result<Vec<SkippedRecord>, ComputeError> {
        Ok(Vec::new())
    }

    fn persist(&mut self, result: &BatchResult) -> Result<(), ComputeError>;
}

/// One user's records, as loaded from JSON.
///
/// Readings, sessions and activities are decoded one at a time: a record
/// that does not decode lands in `rejected` and the rest of the dataset
/// still loads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawDataset")]
pub struct Dataset {
    pub user_id: String,
    #[serde(default)]
    pub heart_rate: Vec<HeartRateSample>,
    #[serde(default)]
    pub sleep_sessions: Vec<SleepSession>,
    #[serde(default)]
    pub activities: Vec<Activity>,
    #[serde(default)]
    pub goals: Vec<HealthGoal>,
    /// Previously computed summaries, used as trend history
    #[serde(default)]
    pub summaries: Vec<DailySummary>,
    #[serde(skip)]
    pub rejected: Vec<SkippedRecord>,
}

impl Dataset {
    /// Parse one dataset or an array of datasets
    pub fn from_json(json: &str) -> Result<Vec<Self>, ComputeError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        if value.is_array() {
            Ok(serde_json::from_value(value)?)
        } else {
            Ok(vec![serde_json::from_value(value)?])
        }
    }
}

#[derive(Deserialize)]
struct RawDataset {
    user_id: String,
    #[serde(default)]
    heart_rate: Vec<serde_json::Value>,
    #[serde(default)]
    sleep_sessions: Vec<serde_json::Value>,
    #[serde(default)]
    activities: Vec<serde_json::Value>,
    #[serde(default)]
    goals: Vec<HealthGoal>,
    #[serde(default)]
    summaries: Vec<DailySummary>,
}

impl From<RawDataset> for Dataset {
    fn from(raw: RawDataset) -> Self {
        let mut rejected = Vec::new();
        let heart_rate = decode_records(raw.heart_rate, RecordKind::HeartRate, &mut rejected);
        let sleep_sessions = decode_records(raw.sleep_sessions, RecordKind::Sleep, &mut rejected);
        let activities = decode_records(raw.activities, RecordKind::Activity, &mut rejected);
        for record in &rejected {
            log::warn!(
                "rejecting {:?} record {} for {}: {}",
                record.kind,
                record.id,
                raw.user_id,
                record.reason
            );
        }
        Dataset {
            user_id: raw.user_id,
            heart_rate,
            sleep_sessions,
            activities,
            goals: raw.goals,
            summaries: raw.summaries,
            rejected,
        }
    }
}

fn decode_records<T: DeserializeOwned>(
    values: Vec<serde_json::Value>,
    kind: RecordKind,
    rejected: &mut Vec<SkippedRecord>,
) -> Vec<T> {
    let mut records = Vec::with_capacity(values.len());
    for value in values {
        let id = match value.get("id") {
            Some(serde_json::Value::String(id)) => id.clone(),
            Some(other) => other.to_string(),
            None => "unknown".to_string(),
        };
        match serde_json::from_value(value) {
            Ok(record) => records.push(record),
            Err(e) => rejected.push(SkippedRecord {
                kind,
                id,
                reason: e.to_string(),
            }),
        }
    }
    records
}

#[derive(Debug, Clone, Default)]
struct UserRecords {
    heart_rate: Vec<HeartRateSample>,
    sleep: Vec<SleepSession>,
    activities: Vec<Activity>,
    goals: BTreeMap<String, HealthGoal>,
    summaries: BTreeMap<NaiveDate, DailySummary>,
    flags: BTreeMap<String, AnomalyFlag>,
    insights: Vec<Insight>,
    alerts: Vec<Alert>,
    rejected: Vec<SkippedRecord>,
}

/// Store backed by in-process maps
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    users: HashMap<String, UserRecords>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_datasets(datasets: impl IntoIterator<Item = Dataset>) -> Self {
        let mut store = Self::new();
        for dataset in datasets {
            store.load(dataset);
        }
        store
    }

    /// Add a dataset's records; records of a user already loaded are appended
    pub fn load(&mut self, dataset: Dataset) {
        let records = self.users.entry(dataset.user_id).or_default();
        records.heart_rate.extend(dataset.heart_rate);
        records.heart_rate.sort_by_key(|r| r.timestamp);
        records.sleep.extend(dataset.sleep_sessions);
        records.sleep.sort_by_key(|s| s.start.or(s.end));
        records.activities.extend(dataset.activities);
        records.activities.sort_by_key(|a| a.start);
        for goal in dataset.goals {
            records.goals.insert(goal.id.clone(), goal);
        }
        for summary in dataset.summaries {
            records.summaries.insert(summary.date, summary);
        }
        records.rejected.extend(dataset.rejected);
    }

    pub fn user_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.users.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn flag(&self, user_id: &str, source_id: &str) -> Option<&AnomalyFlag> {
        self.users.get(user_id)?.flags.get(source_id)
    }

    pub fn insights(&self, user_id: &str) -> &[Insight] {
        self.users.get(user_id).map_or(&[], |r| r.insights.as_slice())
    }

    pub fn alerts(&self, user_id: &str) -> &[Alert] {
        self.users.get(user_id).map_or(&[], |r| r.alerts.as_slice())
    }

    /// Consumer-side alert transition
    pub fn acknowledge_alert(&mut self, user_id: &str, alert_id: uuid::Uuid) -> bool {
        let Some(alert) = self
            .users
            .get_mut(user_id)
            .and_then(|r| r.alerts.iter_mut().find(|a| a.id == alert_id))
        else {
            return false;
        };
        alert.acknowledge();
        true
    }
}

fn in_range(t: DateTime<Utc>, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
    t >= start && t <= end
}

impl HealthStore for InMemoryStore {
    fn heart_rate(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<HeartRateSample>, ComputeError> {
        Ok(self.users.get(user_id).map_or_else(Vec::new, |r| {
            r.heart_rate
                .iter()
                .filter(|s| in_range(s.timestamp, start, end))
                .cloned()
                .collect()
        }))
    }

    fn sleep_sessions(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<SleepSession>, ComputeError> {
        Ok(self.users.get(user_id).map_or_else(Vec::new, |r| {
            r.sleep
                .iter()
                .filter(|s| s.start.or(s.end).is_some_and(|t| in_range(t, start, end)))
                .cloned()
                .collect()
        }))
    }

    fn activities(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Activity>, ComputeError> {
        Ok(self.users.get(user_id).map_or_else(Vec::new, |r| {
            r.activities
                .iter()
                .filter(|a| in_range(a.start, start, end))
                .cloned()
                .collect()
        }))
    }

    fn daily_summaries(
        &self,
        user_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailySummary>, ComputeError> {
        if end < start {
            return Ok(Vec::new());
        }
        Ok(self.users.get(user_id).map_or_else(Vec::new, |r| {
            r.summaries.range(start..=end).map(|(_, s)| s.clone()).collect()
        }))
    }

    fn goals(&self, user_id: &str) -> Result<Vec<HealthGoal>, ComputeError> {
        Ok(self
            .users
            .get(user_id)
            .map_or_else(Vec::new, |r| r.goals.values().cloned().collect()))
    }

    fn rejected(&self, user_id: &str) -> Result<Vec<SkippedRecord>, ComputeError> {
        Ok(self
            .users
            .get(user_id)
            .map_or_else(Vec::new, |r| r.rejected.clone()))
    }

    fn persist(&mut self, result: &BatchResult) -> Result<(), ComputeError> {
        let records = self.users.entry(result.user_id.clone()).or_default();

        for summary in &result.summaries {
            if summary.user_id != result.user_id {
                return Err(ComputeError::StoreError(format!(
                    "summary for {} in batch of {}",
                    summary.user_id, result.user_id
                )));
            }
            records.summaries.insert(summary.date, summary.clone());
        }
        for flag in &result.flags {
            records.flags.insert(flag.source_id.clone(), flag.clone());
        }
        for goal in result.updated_goals() {
            records.goals.insert(goal.id.clone(), goal);
        }

        let scores: HashMap<&str, f64> = result
            .sleep_analyses
            .iter()
            .map(|a| (a.session_id.as_str(), a.overall_score))
            .collect();
        for session in records.sleep.iter_mut() {
            if session.quality_score.is_none() {
                session.quality_score = scores.get(session.id.as_str()).copied();
            }
        }

        // Upserts keep the stored id, status and trigger time
        for insight in &result.insights {
            let key = insight.dedupe_key();
            match records.insights.iter_mut().find(|i| i.dedupe_key() == key) {
                Some(stored) => {
                    *stored = Insight {
                        id: stored.id,
                        status: stored.status,
                        ..insight.clone()
                    }
                }
                None => records.insights.push(insight.clone()),
            }
        }
        for alert in &result.alerts {
            let key = alert.dedupe_key();
            match records.alerts.iter_mut().find(|a| a.dedupe_key() == key) {
                Some(stored) => {
                    *stored = Alert {
                        id: stored.id,
                        status: stored.status,
                        triggered_at: stored.triggered_at,
                        ..alert.clone()
                    }
                }
                None => records.alerts.push(alert.clone()),
            }
        }

        log::debug!(
            "persisted {} summaries, {} flags, {} alerts for {}",
            result.summaries.len(),
            result.flags.len(),
            result.alerts.len(),
            result.user_id
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::pipeline::{HealthEngine, ProcessingWindow};
    use crate::types::HeartRateContext;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 12, hour, 0, 0).unwrap()
    }

    fn reading(id: &str, hour: u32) -> HeartRateSample {
        HeartRateSample::new(id, at(hour), 72, HeartRateContext::Rest)
    }

    #[test]
    fn test_dataset_json_single_and_array() {
        let one = r#"{"user_id": "u1", "heart_rate": [
            {"id": "r1", "timestamp": "2024-09-12T08:00:00Z", "bpm": 70, "context": "rest"}
        ]}"#;
        let parsed = Dataset::from_json(one).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].heart_rate.len(), 1);
        assert!(parsed[0].activities.is_empty());

        let many = r#"[{"user_id": "u1"}, {"user_id": "u2"}]"#;
        let parsed = Dataset::from_json(many).unwrap();
        let ids: Vec<&str> = parsed.iter().map(|d| d.user_id.as_str()).collect();
        assert_eq!(ids, vec!["u1", "u2"]);
    }

    #[test]
    fn test_reads_are_windowed_and_ordered() {
        let store = InMemoryStore::from_datasets(vec![Dataset {
            user_id: "u1".to_string(),
            heart_rate: vec![reading("late", 20), reading("early", 6), reading("mid", 12)],
            ..Default::default()
        }]);

        let found = store.heart_rate("u1", at(5), at(13)).unwrap();
        let ids: Vec<&str> = found.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["early", "mid"]);
        assert!(store.heart_rate("u2", at(0), at(23)).unwrap().is_empty());
    }

    #[test]
    fn test_dataset_keeps_valid_records_next_to_bad_ones() {
        let json = r#"{"user_id": "u1",
            "heart_rate": [
                {"id": "r1", "timestamp": "2024-09-12T08:00:00Z", "bpm": 70, "context": "rest"},
                {"id": "r2", "timestamp": "2024-09-12T08:01:00Z", "bpm": -5, "context": "rest"},
                {"timestamp": "not a time", "bpm": 80}
            ],
            "activities": [{"id": "a1", "activity_type": "walking"}]
        }"#;
        let parsed = Dataset::from_json(json).unwrap();

        assert_eq!(parsed[0].heart_rate.len(), 1);
        assert_eq!(parsed[0].heart_rate[0].id, "r1");
        let rejected: Vec<(RecordKind, &str)> = parsed[0]
            .rejected
            .iter()
            .map(|r| (r.kind, r.id.as_str()))
            .collect();
        assert_eq!(
            rejected,
            vec![
                (RecordKind::HeartRate, "r2"),
                (RecordKind::HeartRate, "unknown"),
                (RecordKind::Activity, "a1"),
            ]
        );

        let store = InMemoryStore::from_datasets(parsed);
        assert_eq!(store.rejected("u1").unwrap().len(), 3);
        assert!(store.rejected("u2").unwrap().is_empty());
    }

    #[test]
    fn test_rerun_and_persist_twice_is_idempotent() {
        let mut store = InMemoryStore::from_datasets(vec![Dataset {
            user_id: "u1".to_string(),
            heart_rate: (0..20).map(|i| reading(&format!("r{i}"), i)).collect(),
            ..Default::default()
        }]);
        let engine = HealthEngine::new(EngineConfig::default()).unwrap();
        let window = ProcessingWindow::last_days(at(22), 3);

        engine.process_and_persist(&mut store, "u1", window).unwrap();
        let alerts = store.alerts("u1").to_vec();
        let insights = store.insights("u1").len();
        // no activity in the window: inactive today and for several days
        assert_eq!(alerts.len(), 2);

        engine.process_and_persist(&mut store, "u1", window).unwrap();

        assert_eq!(store.alerts("u1"), alerts.as_slice());
        assert_eq!(store.insights("u1").len(), insights);
        let date = at(0).date_naive();
        assert_eq!(store.daily_summaries("u1", date, date).unwrap().len(), 1);
    }

    #[test]
    fn test_persist_keeps_consumer_alert_status() {
        let mut store = InMemoryStore::new();
        let engine = HealthEngine::new(EngineConfig::default()).unwrap();
        let window = ProcessingWindow::last_days(at(20), 3);

        engine.process_and_persist(&mut store, "u", window).unwrap();
        let id = store.alerts("u")[0].id;
        assert!(store.acknowledge_alert("u", id));

        let later = ProcessingWindow::last_days(at(21), 3);
        engine.process_and_persist(&mut store, "u", later).unwrap();
        assert_eq!(store.alerts("u").len(), 2);
        assert_eq!(store.alerts("u")[0].id, id);
        assert_eq!(store.alerts("u")[0].status, crate::types::AlertStatus::Acknowledged);
    }

    #[test]
    fn test_persist_fills_sleep_quality() {
        let bed = at(0) - Duration::hours(1);
        let mut night = SleepSession::from_stages("n1", 20.0, 210.0, 90.0, 100.0);
        night.start = Some(bed);
        night.end = Some(bed + Duration::minutes(420));
        night.efficiency = Some(95.0);
        let mut store = InMemoryStore::from_datasets(vec![Dataset {
            user_id: "u1".to_string(),
            sleep_sessions: vec![night],
            ..Default::default()
        }]);
        let engine = HealthEngine::new(EngineConfig::default()).unwrap();
        engine
            .process_and_persist(&mut store, "u1", ProcessingWindow::last_days(at(22), 2))
            .unwrap();

        let stored = store.sleep_sessions("u1", bed, at(22)).unwrap();
        assert!(stored[0].quality_score.is_some_and(|s| s >= 85.0));
    }

    #[test]
    fn test_acknowledge_alert() {
        let mut store = InMemoryStore::new();
        let engine = HealthEngine::new(EngineConfig::default()).unwrap();
        let result = engine
            .process_user(&store, "u1", ProcessingWindow::last_days(at(22), 3))
            .unwrap();
        store.persist(&result).unwrap();

        let id = store.alerts("u1")[0].id;
        assert!(store.acknowledge_alert("u1", id));
        assert!(!store.acknowledge_alert("u1", uuid::Uuid::new_v4()));
    }
}
