//! Grouping of nearby heart rate anomalies
//!
//! Reading-level events that follow each other within a time gap are merged
//! into one group, classified by the mean heart rate across the group.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::stats;
use crate::types::{AnomalyEvent, AnomalyScope, Metric, Severity};

/// Mean bpm above which a group counts as sustained high heart rate
const HIGH_GROUP_BPM: f64 = 120.0;

/// Mean bpm below which a group counts as sustained low heart rate
const LOW_GROUP_BPM: f64 = 50.0;

/// Individual events kept on a group for display
const GROUP_SAMPLE_LIMIT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupType {
    SustainedHighHeartRate,
    SustainedLowHeartRate,
    IrregularPattern,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyGroup {
    pub group_type: GroupType,
    pub severity: Severity,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration_minutes: f64,
    pub average_bpm: f64,
    pub min_bpm: f64,
    pub max_bpm: f64,
    pub average_score: f64,
    pub anomaly_count: usize,
    /// All member reading ids, in time order
    pub source_ids: Vec<String>,
    /// First few member events
    pub samples: Vec<AnomalyEvent>,
}

/// Merge reading-scoped heart rate events that lie within `gap_minutes` of
/// the previous member of their group.
pub fn group_anomalies(events: &[AnomalyEvent], gap_minutes: i64) -> Vec<AnomalyGroup> {
    let mut members: Vec<&AnomalyEvent> = events
        .iter()
        .filter(|e| {
            e.scope == AnomalyScope::Reading && e.metric == Metric::HeartRate && e.value.is_some()
        })
        .collect();
    members.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.source_id.cmp(&b.source_id)));

    let gap = Duration::minutes(gap_minutes);
    let mut groups = Vec::new();
    let mut current: Vec<&AnomalyEvent> = Vec::new();

    for event in members {
        if let Some(last) = current.last() {
            if event.start - last.start > gap {
                groups.push(summarize(&current));
                current.clear();
            }
        }
        current.push(event);
    }
    if !current.is_empty() {
        groups.push(summarize(&current));
    }

    groups
}

fn summarize(members: &[&AnomalyEvent]) -> AnomalyGroup {
    let bpms: Vec<f64> = members.iter().filter_map(|e| e.value).collect();
    let scores: Vec<f64> = members.iter().map(|e| e.score.abs()).collect();
    let average_bpm = stats::mean(&bpms);

    let (group_type, severity) = if average_bpm > HIGH_GROUP_BPM {
        (GroupType::SustainedHighHeartRate, Severity::High)
    } else if average_bpm < LOW_GROUP_BPM {
        (GroupType::SustainedLowHeartRate, Severity::Medium)
    } else {
        (GroupType::IrregularPattern, Severity::Low)
    };

    // members is never empty here
    let start = members.first().map(|e| e.start).unwrap_or_default();
    let end = members.last().map(|e| e.end).unwrap_or(start);

    AnomalyGroup {
        group_type,
        severity,
        start,
        end,
        duration_minutes: stats::round_to((end - start).num_seconds() as f64 / 60.0, 1),
        average_bpm: stats::round_to(average_bpm, 1),
        min_bpm: stats::min(&bpms).unwrap_or_default(),
        max_bpm: stats::max(&bpms).unwrap_or_default(),
        average_score: stats::round_to(stats::mean(&scores), 3),
        anomaly_count: members.len(),
        source_ids: members.iter().map(|e| e.source_id.clone()).collect(),
        samples: members
            .iter()
            .take(GROUP_SAMPLE_LIMIT)
            .map(|e| (*e).clone())
            .collect(),
    }
}
