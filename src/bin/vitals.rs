//! Vitals CLI - Command-line interface for the vitals engine
//!
//! Commands:
//! - process: Run a batch over a JSON dataset and print the results
//! - score-sleep: Score and analyze sleep sessions
//! - config: Print or check an engine configuration
//! - doctor: Diagnose engine configuration and environment

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use thiserror::Error;

use vitals_engine::repository::{Dataset, InMemoryStore};
use vitals_engine::sleep::SleepScorer;
use vitals_engine::types::SleepSession;
use vitals_engine::{
    ComputeError, EngineConfig, HealthEngine, ProcessingWindow, ENGINE_VERSION,
    PRODUCER_NAME,
};

/// Vitals - Batch analytics for wearable health data
#[derive(Parser)]
#[command(name = "vitals")]
#[command(version = ENGINE_VERSION)]
#[command(about = "Detect anomalies, score sleep and activity, and track health trends", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a batch over one or more user datasets
    Process {
        /// Dataset file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,

        /// Engine configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Window length in days, ending at --now
        #[arg(long, default_value = "7")]
        days: u32,

        /// Reference time (RFC 3339); defaults to the current time
        #[arg(long)]
        now: Option<String>,

        /// Only process this user
        #[arg(long)]
        user: Option<String>,
    },

    /// Score sleep sessions (a JSON session or array of sessions)
    ScoreSleep {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,
    },

    /// Print the default configuration, or check a configuration file
    Config {
        /// Configuration file to check
        #[arg(long)]
        check: Option<PathBuf>,
    },

    /// Diagnose engine configuration and environment
    Doctor {
        /// Configuration file to check
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// JSON array of records
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), VitalsCliError> {
    match cli.command {
        Commands::Process {
            input,
            output,
            output_format,
            config,
            days,
            now,
            user,
        } => cmd_process(
            &input,
            &output,
            output_format,
            config.as_deref(),
            days,
            now.as_deref(),
            user.as_deref(),
        ),

        Commands::ScoreSleep {
            input,
            output_format,
        } => cmd_score_sleep(&input, output_format),

        Commands::Config { check } => cmd_config(check.as_deref()),

        Commands::Doctor { config, json } => cmd_doctor(config.as_deref(), json),
    }
}

fn cmd_process(
    input: &Path,
    output: &Path,
    output_format: OutputFormat,
    config: Option<&Path>,
    days: u32,
    now: Option<&str>,
    user: Option<&str>,
) -> Result<(), VitalsCliError> {
    let config = load_config(config)?;
    let engine = HealthEngine::new(config)?;

    let now = match now {
        Some(text) => DateTime::parse_from_rfc3339(text)
            .map_err(|e| VitalsCliError::InvalidArgument(format!("--now: {e}")))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };
    let window = ProcessingWindow::last_days(now, days);

    let datasets = Dataset::from_json(&read_input(input)?)?;
    if datasets.is_empty() {
        return Err(VitalsCliError::NoData);
    }
    let store = InMemoryStore::from_datasets(datasets);

    let users: Vec<String> = match user {
        Some(id) => vec![id.to_string()],
        None => store.user_ids(),
    };

    let mut results = Vec::with_capacity(users.len());
    for (user_id, outcome) in engine.process_users(&store, &users, window) {
        match outcome {
            Ok(result) => results.push(result),
            Err(e) => {
                log::error!("failed to process {user_id}: {e}");
                return Err(e.into());
            }
        }
    }

    write_output(output, &format_output(&results, &output_format)?)
}

fn cmd_score_sleep(input: &Path, output_format: OutputFormat) -> Result<(), VitalsCliError> {
    let value: serde_json::Value = serde_json::from_str(&read_input(input)?)?;
    let sessions: Vec<SleepSession> = if value.is_array() {
        serde_json::from_value(value)?
    } else {
        vec![serde_json::from_value(value)?]
    };
    if sessions.is_empty() {
        return Err(VitalsCliError::NoData);
    }

    let mut analyses = Vec::with_capacity(sessions.len());
    for session in &sessions {
        session.validate().map_err(ComputeError::from)?;
        analyses.push(SleepScorer::analyze(session, &[]));
    }

    print!("{}", format_output(&analyses, &output_format)?);
    Ok(())
}

fn cmd_config(check: Option<&Path>) -> Result<(), VitalsCliError> {
    match check {
        Some(path) => {
            let config = load_config(Some(path))?;
            config.validate()?;
            println!("{} is valid", path.display());
        }
        None => println!("{}", EngineConfig::default().to_json()?),
    }
    Ok(())
}

fn cmd_doctor(config: Option<&Path>, json: bool) -> Result<(), VitalsCliError> {
    let mut checks = vec![DoctorCheck::ok(
        "engine_version",
        format!("Vitals engine version {ENGINE_VERSION}"),
    )];

    checks.push(if cfg!(feature = "isolation-forest") {
        DoctorCheck::ok("outlier_model", "Isolation forest available")
    } else {
        DoctorCheck::new(
            "outlier_model",
            CheckStatus::Warning,
            "Built without isolation-forest; detection is statistical only",
        )
    });

    if let Some(path) = config {
        let engine = load_config(Some(path))
            .and_then(|c| HealthEngine::new(c).map_err(VitalsCliError::from));
        checks.push(match engine {
            Ok(engine) => DoctorCheck::ok(
                "config",
                format!(
                    "Configuration valid (trend window {} days)",
                    engine.config().trend_days
                ),
            ),
            Err(e) => DoctorCheck::new("config", CheckStatus::Error, e.to_string()),
        });
    }

    checks.push(DoctorCheck::ok(
        "stdin",
        if atty::is(atty::Stream::Stdin) {
            "stdin is a TTY (pass datasets with --input)"
        } else {
            "stdin is a pipe (--input - ready)"
        },
    ));

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: ENGINE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Vitals Doctor Report");
        println!("====================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");
        for check in &report.checks {
            println!("  {} {}: {}", check.status.label(), check.name, check.message);
        }
    }

    if report.checks.iter().any(|c| c.status == CheckStatus::Error) {
        Err(VitalsCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Helper functions

fn is_stdio(path: &Path) -> bool {
    path.as_os_str() == "-"
}

fn read_input(input: &Path) -> Result<String, VitalsCliError> {
    if is_stdio(input) {
        Ok(io::read_to_string(io::stdin())?)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn write_output(output: &Path, data: &str) -> Result<(), VitalsCliError> {
    if is_stdio(output) {
        print!("{data}");
    } else {
        fs::write(output, data)?;
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, VitalsCliError> {
    match path {
        Some(path) => Ok(EngineConfig::from_json(&fs::read_to_string(path)?)?),
        None => Ok(EngineConfig::default()),
    }
}

fn format_output<T: Serialize>(
    records: &[T],
    format: &OutputFormat,
) -> Result<String, VitalsCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut lines: Vec<String> = Vec::new();
            for record in records {
                lines.push(serde_json::to_string(record)?);
            }
            Ok(lines.join("\n") + "\n")
        }
        OutputFormat::Json => Ok(serde_json::to_string(records)?),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(records)?),
    }
}

// Error types

#[derive(Debug, Error)]
enum VitalsCliError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Compute(#[from] ComputeError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("No records found in input")]
    NoData,

    #[error("One or more health checks failed")]
    DoctorFailed,
}

impl VitalsCliError {
    fn code(&self) -> &'static str {
        match self {
            VitalsCliError::Io(_) => "IO_ERROR",
            VitalsCliError::Compute(ComputeError::InvalidConfig(_)) => "INVALID_CONFIG",
            VitalsCliError::Compute(_) => "COMPUTE_ERROR",
            VitalsCliError::Json(_) => "JSON_ERROR",
            VitalsCliError::InvalidArgument(_) => "INVALID_ARGUMENT",
            VitalsCliError::NoData => "NO_DATA",
            VitalsCliError::DoctorFailed => "DOCTOR_FAILED",
        }
    }

    fn hint(&self) -> Option<&'static str> {
        match self {
            VitalsCliError::Io(_) => Some("Check file paths and permissions"),
            VitalsCliError::Compute(ComputeError::InvalidConfig(_)) => {
                Some("Run 'vitals config' to see the defaults")
            }
            VitalsCliError::Compute(_) => Some("Ensure input records match the dataset format"),
            VitalsCliError::Json(_) => Some("Check JSON syntax"),
            VitalsCliError::InvalidArgument(_) => None,
            VitalsCliError::NoData => Some("Ensure input file is not empty"),
            VitalsCliError::DoctorFailed => Some("Review the doctor report for details"),
        }
    }
}

/// Error line printed to stderr
#[derive(Serialize)]
struct CliError {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<&'static str>,
}

impl From<VitalsCliError> for CliError {
    fn from(e: VitalsCliError) -> Self {
        CliError {
            code: e.code(),
            message: e.to_string(),
            hint: e.hint(),
        }
    }
}

// Report types

#[derive(Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    message: String,
}

impl DoctorCheck {
    fn new(name: &'static str, status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            name,
            status,
            message: message.into(),
        }
    }

    fn ok(name: &'static str, message: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Ok, message)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}

impl CheckStatus {
    fn label(self) -> &'static str {
        match self {
            CheckStatus::Ok => "[OK]",
            CheckStatus::Warning => "[WARN]",
            CheckStatus::Error => "[ERR]",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_errors_convert_with_question_mark() {
        fn parse() -> Result<EngineConfig, VitalsCliError> {
            Ok(EngineConfig::from_json("{not json")?)
        }
        let error = CliError::from(parse().unwrap_err());
        assert_eq!(error.code, "COMPUTE_ERROR");

        let missing: Result<String, VitalsCliError> =
            read_input(Path::new("/nonexistent/vitals.json"));
        let error = CliError::from(missing.unwrap_err());
        assert_eq!(error.code, "IO_ERROR");
        assert_eq!(error.hint, Some("Check file paths and permissions"));
    }

    #[test]
    fn test_invalid_config_maps_to_its_own_code() {
        let error = CliError::from(VitalsCliError::from(ComputeError::InvalidConfig(
            "trend_days must be positive".to_string(),
        )));
        assert_eq!(error.code, "INVALID_CONFIG");
        assert_eq!(
            error.message,
            "Invalid configuration: trend_days must be positive"
        );
    }

    #[test]
    fn test_doctor_check_status_labels() {
        let check = DoctorCheck::ok("stdin", "ready");
        assert_eq!(check.status.label(), "[OK]");
        let json = serde_json::to_value(&check).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(CheckStatus::Error.label(), "[ERR]");
    }
}
