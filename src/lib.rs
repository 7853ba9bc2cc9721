//! Vitals Engine - Batch analytics for wearable health data
//!
//! The engine turns heart rate readings, sleep sessions and activities into
//! derived signals through a deterministic pipeline: validation → feature
//! extraction → anomaly detection → sleep/activity scoring → daily
//! aggregation → trend analysis → alert rules.
//!
//! ## Modules
//!
//! - **Detection**: [`features`] and [`anomaly`] flag unusual readings, nights and workouts
//! - **Scoring**: [`sleep`], [`activity`] and [`heart_rate`] evaluate individual records
//! - **Aggregation**: [`daily`] builds one summary per user and date, [`trend`] reads history
//! - **Alerts**: [`alerts`] holds independent threshold rules
//! - **Batch**: [`pipeline`] runs a user's window against a [`repository::HealthStore`]

pub mod activity;
pub mod alerts;
pub mod anomaly;
pub mod config;
pub mod daily;
pub mod error;
pub mod features;
pub mod heart_rate;
pub mod pipeline;
pub mod repository;
pub mod sleep;
pub mod stats;
pub mod trend;
pub mod types;

pub use activity::ActivityScorer;
pub use alerts::{AlertRule, RuleContext, RuleEngine};
pub use anomaly::{AnomalyDetector, AnomalyReport, OutlierModel};
pub use config::EngineConfig;
pub use daily::DailyAggregator;
pub use error::{ComputeError, ValidationError};
pub use pipeline::{BatchResult, HealthEngine, ProcessingWindow};
pub use repository::{Dataset, HealthStore, InMemoryStore};
pub use sleep::SleepScorer;
pub use trend::TrendAnalyzer;
pub use types::Analysis;

/// Engine version recorded on every batch result
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported by the CLI
pub const PRODUCER_NAME: &str = "vitals-engine";
