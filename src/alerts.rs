//! Alert rules
//!
//! Each [`AlertRule`] looks at a [`RuleContext`] and returns zero or more
//! alerts. Rules are independent and stateless; the [`RuleEngine`] runs them
//! in order and concatenates their output. Escalating an alert is an explicit
//! operation ([`Alert::escalate`]), never a side effect of evaluation.

use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};

use crate::config::AlertConfig;
use crate::sleep::SleepScorer;
use crate::stats;
use crate::types::{
    Activity, Alert, AlertType, AnomalyEvent, HeartRateContext, HeartRateSample, Metric, Severity,
    SleepSession,
};

/// Everything a rule may look at
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    pub now: DateTime<Utc>,
    /// First date the records cover
    pub since: NaiveDate,
    pub anomalies: &'a [AnomalyEvent],
    pub activities: &'a [Activity],
    pub sleep: &'a [SleepSession],
    pub heart_rate: &'a [HeartRateSample],
}

impl RuleContext<'_> {
    pub fn today(&self) -> NaiveDate {
        self.now.date_naive()
    }

    fn has_activity_on(&self, date: NaiveDate) -> bool {
        self.activities.iter().any(|a| a.date() == date)
    }
}

/// A single alert rule
pub trait AlertRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Vec<Alert>;
}

/// Alerts for anomalies inside the lookback window; severity is inherited
pub struct AnomalyRule {
    lookback: Duration,
}

impl AlertRule for AnomalyRule {
    fn name(&self) -> &'static str {
        "anomaly"
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Vec<Alert> {
        let since = ctx.now - self.lookback;
        ctx.anomalies
            .iter()
            .filter(|e| e.end >= since && e.start <= ctx.now)
            .map(|event| {
                let (title, unit) = match event.metric {
                    Metric::HeartRate => ("Heart Rate Anomaly Detected", "BPM"),
                    Metric::HeartRateVariability => ("Heart Rate Variability Anomaly", "ms"),
                    Metric::Sleep => ("Unusual Sleep Detected", "minutes"),
                    Metric::Activity => ("Unusual Activity Detected", "minutes"),
                };
                let message = match (event.metric, event.value) {
                    (Metric::HeartRate, Some(bpm)) => format!(
                        "Unusual heart rate of {bpm:.0} BPM detected at {}",
                        event.start.format("%H:%M")
                    ),
                    _ => event.description.clone(),
                };
                let alert = Alert::new(AlertType::Anomaly, event.severity, title, message, ctx.now)
                    .related_to(event.source_id.clone());
                match event.value {
                    Some(value) => alert.with_metric(value, unit, None),
                    None => alert,
                }
            })
            .collect()
    }
}

/// No activity today after the cutoff hour, or several inactive days in a row
pub struct InactivityRule {
    cutoff_hour: u32,
    prolonged_days: u32,
}

impl AlertRule for InactivityRule {
    fn name(&self) -> &'static str {
        "inactivity"
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Vec<Alert> {
        let mut alerts = Vec::new();
        let today = ctx.today();

        if !ctx.has_activity_on(today) && ctx.now.hour() >= self.cutoff_hour {
            alerts.push(
                Alert::new(
                    AlertType::Inactivity,
                    Severity::Low,
                    "Inactive Day",
                    "No physical activities recorded today. Consider adding some movement.",
                    ctx.now,
                )
                .with_metric(0.0, "activities", None),
            );
        }

        let inactive_days = std::iter::successors(Some(today), NaiveDate::pred_opt)
            .take_while(|d| *d >= ctx.since && !ctx.has_activity_on(*d))
            .count() as u32;
        if inactive_days >= self.prolonged_days {
            alerts.push(
                Alert::new(
                    AlertType::ProlongedInactivity,
                    Severity::Medium,
                    "Multiple Inactive Days",
                    format!("{inactive_days} consecutive days with no recorded activities."),
                    ctx.now,
                )
                .with_metric(inactive_days as f64, "days", Some(self.prolonged_days as f64)),
            );
        }

        alerts
    }
}

/// Short or poor-quality sleep last night
pub struct SleepRule {
    short_minutes: f64,
    poor_score: f64,
}

impl SleepRule {
    /// Latest session that started yesterday or today, before now
    fn last_night<'a>(ctx: &RuleContext<'a>) -> Option<&'a SleepSession> {
        let today = ctx.today();
        let yesterday = today - Duration::days(1);
        ctx.sleep
            .iter()
            .filter(|s| {
                s.start.is_some_and(|start| {
                    start <= ctx.now
                        && (start.date_naive() == today || start.date_naive() == yesterday)
                })
            })
            .max_by_key(|s| s.start)
    }
}

impl AlertRule for SleepRule {
    fn name(&self) -> &'static str {
        "sleep"
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Vec<Alert> {
        let Some(session) = Self::last_night(ctx) else {
            return Vec::new();
        };
        let mut alerts = Vec::new();

        let minutes = session.duration_minutes();
        if minutes < self.short_minutes {
            let whole = minutes.round() as i64;
            alerts.push(
                Alert::new(
                    AlertType::SleepPoor,
                    Severity::Medium,
                    "Short Sleep Duration",
                    format!("Only {}h {}m of sleep last night.", whole / 60, whole % 60),
                    ctx.now,
                )
                .with_metric(stats::round_to(minutes, 1), "minutes", Some(self.short_minutes))
                .related_to(session.id.clone()),
            );
        }

        let score = session
            .quality_score
            .unwrap_or_else(|| SleepScorer::score(session));
        if score < self.poor_score {
            alerts.push(
                Alert::new(
                    AlertType::SleepPoor,
                    Severity::Low,
                    "Poor Sleep Quality",
                    format!("Sleep quality score of {score:.0}/100 last night."),
                    ctx.now,
                )
                .with_metric(score, "score", Some(self.poor_score))
                .related_to(session.id.clone()),
            );
        }

        alerts
    }
}

/// Today's average rest-context heart rate above the threshold
pub struct RestingHeartRateRule {
    threshold_bpm: f64,
}

impl AlertRule for RestingHeartRateRule {
    fn name(&self) -> &'static str {
        "resting_heart_rate"
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Vec<Alert> {
        let today = ctx.today();
        let resting: Vec<f64> = ctx
            .heart_rate
            .iter()
            .filter(|r| r.context == HeartRateContext::Rest && r.timestamp.date_naive() == today)
            .map(|r| r.bpm as f64)
            .collect();
        if resting.is_empty() {
            return Vec::new();
        }

        let average = stats::mean(&resting);
        if average <= self.threshold_bpm {
            return Vec::new();
        }
        vec![Alert::new(
            AlertType::HeartRateHigh,
            Severity::Medium,
            "Elevated Resting Heart Rate",
            format!("Average resting heart rate of {average:.0} BPM today."),
            ctx.now,
        )
        .with_metric(stats::round_to(average, 1), "BPM", Some(self.threshold_bpm))]
    }
}

/// Ordered set of rules
pub struct RuleEngine {
    rules: Vec<Box<dyn AlertRule>>,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new(&AlertConfig::default())
    }
}

impl RuleEngine {
    /// The built-in rules, configured from `config`
    pub fn new(config: &AlertConfig) -> Self {
        Self {
            rules: vec![
                Box::new(AnomalyRule {
                    lookback: Duration::hours(config.anomaly_lookback_hours),
                }),
                Box::new(InactivityRule {
                    cutoff_hour: config.inactivity_cutoff_hour,
                    prolonged_days: config.prolonged_inactive_days,
                }),
                Box::new(SleepRule {
                    short_minutes: config.short_sleep_minutes,
                    poor_score: config.poor_sleep_score,
                }),
                Box::new(RestingHeartRateRule {
                    threshold_bpm: config.elevated_resting_bpm,
                }),
            ],
        }
    }

    /// Engine without rules
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn with_rule(mut self, rule: Box<dyn AlertRule>) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub fn evaluate(&self, ctx: &RuleContext<'_>) -> Vec<Alert> {
        self.rules
            .iter()
            .flat_map(|rule| {
                let alerts = rule.evaluate(ctx);
                if !alerts.is_empty() {
                    log::debug!("rule {} raised {} alerts", rule.name(), alerts.len());
                }
                alerts
            })
            .collect()
    }
}
