//! Heart rate metrics
//!
//! Resting heart rate, HRV estimation from reading spacing, time in heart
//! rate zones and multi-day heart rate trends.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::stats;
use crate::types::{Analysis, HeartRateSample};

/// Minimum readings for a zone breakdown
pub const MIN_ZONE_SAMPLES: usize = 10;

/// Slope (bpm per reading) beyond which a heart rate trend has a direction
const TREND_SLOPE_THRESHOLD: f64 = 0.1;

/// R² below which a heart rate trend is reported as unclear
const TREND_STRENGTH_THRESHOLD: f64 = 0.3;

// ============================================================================
// HRV
// ============================================================================

/// HRV estimate derived from the spacing of consecutive readings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HrvEstimate {
    pub rmssd_ms: f64,
    pub sdnn_ms: f64,
    pub interval_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HrvStatus {
    Good,
    Fair,
    Poor,
}

impl HrvEstimate {
    pub fn status(&self) -> HrvStatus {
        if self.rmssd_ms > 50.0 {
            HrvStatus::Good
        } else if self.rmssd_ms > 30.0 {
            HrvStatus::Fair
        } else {
            HrvStatus::Poor
        }
    }
}

/// RMSSD / SDNN over the intervals between time-ordered readings.
///
/// Intervals are measured in seconds and reported in milliseconds. Returns
/// `None` with fewer than `min_intervals` intervals.
pub fn estimate_hrv(samples: &[HeartRateSample], min_intervals: usize) -> Option<HrvEstimate> {
    if samples.len() < 2 {
        return None;
    }

    let intervals: Vec<f64> = samples
        .windows(2)
        .map(|pair| (pair[1].timestamp - pair[0].timestamp).num_milliseconds() as f64 / 1000.0)
        .collect();

    if intervals.len() < min_intervals.max(2) {
        return None;
    }

    let squared_diffs: Vec<f64> = intervals.windows(2).map(|d| (d[1] - d[0]).powi(2)).collect();
    let rmssd = stats::mean(&squared_diffs).sqrt() * 1000.0;
    let sdnn = stats::std_dev(&intervals) * 1000.0;

    Some(HrvEstimate {
        rmssd_ms: rmssd,
        sdnn_ms: sdnn,
        interval_count: intervals.len(),
    })
}

// ============================================================================
// Resting heart rate
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestingHeartRateBand {
    VeryLow,
    Low,
    Excellent,
    Good,
    Average,
    AboveAverage,
    High,
}

impl RestingHeartRateBand {
    pub fn from_bpm(bpm: f64) -> Self {
        match bpm {
            b if b < 40.0 => RestingHeartRateBand::VeryLow,
            b if b < 50.0 => RestingHeartRateBand::Low,
            b if b < 60.0 => RestingHeartRateBand::Excellent,
            b if b < 70.0 => RestingHeartRateBand::Good,
            b if b < 80.0 => RestingHeartRateBand::Average,
            b if b < 90.0 => RestingHeartRateBand::AboveAverage,
            _ => RestingHeartRateBand::High,
        }
    }

    pub fn interpretation(&self) -> &'static str {
        match self {
            RestingHeartRateBand::VeryLow => "Very low. Consult a healthcare provider.",
            RestingHeartRateBand::Low => "Low. May indicate good fitness or bradycardia.",
            RestingHeartRateBand::Excellent => {
                "Excellent. Indicates good cardiovascular fitness."
            }
            RestingHeartRateBand::Good => "Good. Within healthy range.",
            RestingHeartRateBand::Average => "Average. Consider more cardiovascular exercise.",
            RestingHeartRateBand::AboveAverage => {
                "Above average. May benefit from lifestyle improvements."
            }
            RestingHeartRateBand::High => "High. Consider consulting a healthcare provider.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
    Stable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestingHeartRate {
    pub bpm: f64,
    /// Rest/sleep readings the estimate was drawn from
    pub reading_count: usize,
    /// Grows with the number of readings, saturating at 20
    pub confidence: f64,
    pub band: RestingHeartRateBand,
    pub interpretation: String,
    pub optimal_range: (f64, f64),
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend: Option<Direction>,
}

/// Mean of the `lowest_n` lowest rest/sleep readings.
///
/// `previous` is the prior day's estimate, used for the day-over-day trend.
pub fn resting_heart_rate(
    samples: &[HeartRateSample],
    lowest_n: usize,
    previous: Option<f64>,
) -> Analysis<RestingHeartRate> {
    let mut resting: Vec<f64> = samples
        .iter()
        .filter(|s| s.context.is_resting())
        .map(|s| s.bpm as f64)
        .collect();

    if resting.is_empty() {
        return Analysis::no_data("no rest or sleep heart rate readings");
    }
    if resting.len() < lowest_n {
        return Analysis::insufficient(
            "too few rest or sleep readings for a resting heart rate",
            resting.len(),
            lowest_n,
        );
    }

    resting.sort_by(f64::total_cmp);
    let bpm = stats::round_to(stats::mean(&resting[..lowest_n]), 1);
    let band = RestingHeartRateBand::from_bpm(bpm);

    let trend = previous.map(|prev| {
        let change = bpm - prev;
        if change > 0.0 {
            Direction::Up
        } else if change < 0.0 {
            Direction::Down
        } else {
            Direction::Stable
        }
    });

    Analysis::Ready(RestingHeartRate {
        bpm,
        reading_count: resting.len(),
        confidence: (resting.len() as f64 / 20.0).min(1.0),
        band,
        interpretation: band.interpretation().to_string(),
        optimal_range: (50.0, 70.0),
        trend,
    })
}

// ============================================================================
// Zones
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartRateZone {
    Recovery,
    Endurance,
    Aerobic,
    Anaerobic,
    Maximum,
}

impl HeartRateZone {
    pub const ALL: [HeartRateZone; 5] = [
        HeartRateZone::Recovery,
        HeartRateZone::Endurance,
        HeartRateZone::Aerobic,
        HeartRateZone::Anaerobic,
        HeartRateZone::Maximum,
    ];

    /// Fraction-of-max bounds `[lower, upper)`
    pub fn bounds(&self) -> (f64, f64) {
        match self {
            HeartRateZone::Recovery => (0.50, 0.60),
            HeartRateZone::Endurance => (0.60, 0.70),
            HeartRateZone::Aerobic => (0.70, 0.80),
            HeartRateZone::Anaerobic => (0.80, 0.90),
            HeartRateZone::Maximum => (0.90, 1.00),
        }
    }

    pub fn for_fraction(fraction: f64) -> Option<Self> {
        HeartRateZone::ALL.into_iter().find(|zone| {
            let (lo, hi) = zone.bounds();
            fraction >= lo && fraction < hi
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneBreakdown {
    pub max_heart_rate: f64,
    pub minutes: BTreeMap<HeartRateZone, f64>,
    pub percentages: BTreeMap<HeartRateZone, f64>,
    pub reading_count: usize,
}

/// Time spent in each zone, attributing every gap to the reading that opens it
pub fn heart_rate_zones(samples: &[HeartRateSample], max_heart_rate: f64) -> Analysis<ZoneBreakdown> {
    if samples.is_empty() {
        return Analysis::no_data("no heart rate readings in the period");
    }
    if samples.len() < MIN_ZONE_SAMPLES {
        return Analysis::insufficient(
            "too few readings for a zone breakdown",
            samples.len(),
            MIN_ZONE_SAMPLES,
        );
    }

    let mut seconds: BTreeMap<HeartRateZone, f64> =
        HeartRateZone::ALL.into_iter().map(|z| (z, 0.0)).collect();

    for pair in samples.windows(2) {
        let gap = (pair[1].timestamp - pair[0].timestamp).num_seconds() as f64;
        if let Some(zone) = HeartRateZone::for_fraction(pair[0].bpm as f64 / max_heart_rate) {
            *seconds.entry(zone).or_insert(0.0) += gap.max(0.0);
        }
    }

    let total: f64 = seconds.values().sum();
    let minutes = seconds
        .iter()
        .map(|(zone, s)| (*zone, stats::round_to(s / 60.0, 1)))
        .collect();
    let percentages = seconds
        .iter()
        .map(|(zone, s)| {
            let pct = if total > 0.0 { s / total * 100.0 } else { 0.0 };
            (*zone, stats::round_to(pct, 1))
        })
        .collect();

    Analysis::Ready(ZoneBreakdown {
        max_heart_rate,
        minutes,
        percentages,
        reading_count: samples.len(),
    })
}

// ============================================================================
// Trend
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyHeartRate {
    pub date: NaiveDate,
    pub avg_bpm: f64,
    pub min_bpm: u16,
    pub max_bpm: u16,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartRateTrend {
    pub average: f64,
    pub minimum: u16,
    pub maximum: u16,
    pub std_dev: f64,
    pub total_readings: usize,
    pub daily: Vec<DailyHeartRate>,
    pub direction: Direction,
    pub slope: f64,
    /// R² of the fit
    pub strength: f64,
    pub interpretation: String,
}

/// Per-day statistics and an overall linear trend over all readings
pub fn heart_rate_trend(samples: &[HeartRateSample]) -> Analysis<HeartRateTrend> {
    if samples.is_empty() {
        return Analysis::no_data("no heart rate readings in the period");
    }
    let bpms: Vec<f64> = samples.iter().map(|s| s.bpm as f64).collect();
    let Some(fit) = stats::linear_regression(&bpms) else {
        return Analysis::insufficient("a trend needs at least two readings", bpms.len(), 2);
    };

    let mut by_day: BTreeMap<NaiveDate, Vec<u16>> = BTreeMap::new();
    for sample in samples {
        by_day
            .entry(sample.timestamp.date_naive())
            .or_default()
            .push(sample.bpm);
    }
    let daily = by_day
        .into_iter()
        .map(|(date, values)| {
            let as_f64: Vec<f64> = values.iter().map(|v| *v as f64).collect();
            DailyHeartRate {
                date,
                avg_bpm: stats::round_to(stats::mean(&as_f64), 1),
                min_bpm: values.iter().copied().min().unwrap_or_default(),
                max_bpm: values.iter().copied().max().unwrap_or_default(),
                count: values.len(),
            }
        })
        .collect();

    let direction = if fit.slope > TREND_SLOPE_THRESHOLD {
        Direction::Up
    } else if fit.slope < -TREND_SLOPE_THRESHOLD {
        Direction::Down
    } else {
        Direction::Stable
    };

    let interpretation = if fit.r_squared < TREND_STRENGTH_THRESHOLD {
        "No clear trend detected."
    } else {
        match direction {
            Direction::Up => "Heart rate showing an increasing trend. This may indicate increased stress, dehydration, or illness.",
            Direction::Down => "Heart rate showing a decreasing trend. This may indicate improving fitness or better recovery.",
            Direction::Stable => "Heart rate is stable, which is generally a positive sign.",
        }
    };

    Analysis::Ready(HeartRateTrend {
        average: stats::round_to(stats::mean(&bpms), 1),
        minimum: samples.iter().map(|s| s.bpm).min().unwrap_or_default(),
        maximum: samples.iter().map(|s| s.bpm).max().unwrap_or_default(),
        std_dev: stats::round_to(stats::std_dev(&bpms), 1),
        total_readings: samples.len(),
        daily,
        direction,
        slope: stats::round_to(fit.slope, 3),
        strength: stats::round_to(fit.r_squared, 3),
        interpretation: interpretation.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::HeartRateContext;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()
    }

    fn series(bpms: &[u16], step_secs: i64, context: HeartRateContext) -> Vec<HeartRateSample> {
        bpms.iter()
            .enumerate()
            .map(|(i, bpm)| {
                HeartRateSample::new(
                    format!("hr-{i}"),
                    base() + Duration::seconds(i as i64 * step_secs),
                    *bpm,
                    context,
                )
            })
            .collect()
    }

    #[test]
    fn test_regular_spacing_has_zero_rmssd() {
        let samples = series(&[70; 30], 60, HeartRateContext::Rest);
        let hrv = estimate_hrv(&samples, 20).unwrap();

        assert_eq!(hrv.interval_count, 29);
        assert_eq!(hrv.rmssd_ms, 0.0);
        assert_eq!(hrv.status(), HrvStatus::Poor);
    }

    #[test]
    fn test_hrv_needs_enough_intervals() {
        let samples = series(&[70; 10], 60, HeartRateContext::Rest);
        assert!(estimate_hrv(&samples, 20).is_none());
    }

    #[test]
    fn test_alternating_spacing_rmssd() {
        // Intervals alternate 1s / 2s, so every successive difference is 1s
        let mut samples = Vec::new();
        let mut t = base();
        for i in 0..25 {
            samples.push(HeartRateSample::new(format!("hr-{i}"), t, 70, HeartRateContext::Rest));
            t += Duration::seconds(if i % 2 == 0 { 1 } else { 2 });
        }
        let hrv = estimate_hrv(&samples, 20).unwrap();

        assert!((hrv.rmssd_ms - 1000.0).abs() < 1e-6);
        assert!((hrv.sdnn_ms - 500.0).abs() < 1.0);
    }

    #[test]
    fn test_resting_heart_rate_uses_lowest_readings() {
        let mut samples = series(&[58, 60, 55, 57, 90, 56, 100, 59], 60, HeartRateContext::Sleep);
        samples.push(HeartRateSample::new("active", base(), 40, HeartRateContext::Workout));

        let resting = resting_heart_rate(&samples, 5, Some(60.0)).into_ready().unwrap();
        // 55, 56, 57, 58, 59; workout reading ignored
        assert!((resting.bpm - 57.0).abs() < 1e-9);
        assert_eq!(resting.band, RestingHeartRateBand::Excellent);
        assert_eq!(resting.trend, Some(Direction::Down));
        assert!((resting.confidence - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_resting_heart_rate_insufficient() {
        let samples = series(&[58, 60], 60, HeartRateContext::Rest);
        let result = resting_heart_rate(&samples, 5, None);
        assert_eq!(result.status(), "insufficient_data");
    }

    #[test]
    fn test_zone_breakdown() {
        // 99 bpm = 55% of 180, 135 bpm = 75%
        let mut bpms = vec![99; 5];
        bpms.extend([135; 6]);
        let samples = series(&bpms, 60, HeartRateContext::Workout);

        let zones = heart_rate_zones(&samples, 180.0).into_ready().unwrap();
        assert_eq!(zones.minutes[&HeartRateZone::Recovery], 5.0);
        assert_eq!(zones.minutes[&HeartRateZone::Aerobic], 5.0);
        assert_eq!(zones.percentages[&HeartRateZone::Aerobic], 50.0);
    }

    #[test]
    fn test_trend_direction() {
        let bpms: Vec<u16> = (0..20).map(|i| 60 + i).collect();
        let trend = heart_rate_trend(&series(&bpms, 3600, HeartRateContext::Rest))
            .into_ready()
            .unwrap();

        assert_eq!(trend.direction, Direction::Up);
        assert!(trend.strength > 0.99);
        assert!(trend.interpretation.contains("increasing"));
    }
}
