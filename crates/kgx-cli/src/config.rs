use crate::status::StatusFormat;
use kgx_core::engine::DEFAULT_SIM_THROUGHPUT_MBPS;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

const DEFAULT_STATUS_INTERVAL_MS: u64 = 1_000;
const MIN_STATUS_INTERVAL_MS: u64 = 100;
const DEFAULT_START_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Simulated,
    Native,
}

impl FromStr for EngineKind {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "" | "sim" | "simulated" => Ok(EngineKind::Simulated),
            "native" | "ramtest" => Ok(EngineKind::Native),
            other => Err(format!("unknown engine: {other}")),
        }
    }
}

/// Process-level settings resolved from the environment once at start-up.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub settings_path: PathBuf,
    pub history_path: PathBuf,
    pub log_dir: PathBuf,
    pub engine: EngineKind,
    pub sim_throughput_mbps: f64,
    pub sim_errors: Vec<f64>,
    pub status_interval: Duration,
    pub status_format: StatusFormat,
    pub start_timeout: Duration,
    pub log_level: String,
    pub log_stdout: bool,
    pub assume_yes: bool,
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let truthy = |key: &str| var(key).map(|value| is_truthy(&value)).unwrap_or(false);

        let config_dir = var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| home_dir(&var).join(".config"));
        let state_dir = var("XDG_STATE_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| home_dir(&var).join(".local/state"))
            .join("kgx");

        let engine = match var("KGX_ENGINE").map(|value| value.parse::<EngineKind>()) {
            Some(Ok(kind)) => kind,
            Some(Err(err)) => {
                warn!(event = "runtime_config_invalid", key = "KGX_ENGINE", error = %err);
                EngineKind::Simulated
            }
            None => EngineKind::Simulated,
        };
        let sim_throughput_mbps = var("KGX_SIM_THROUGHPUT_MBPS")
            .and_then(|value| value.parse::<f64>().ok())
            .filter(|value| *value > 0.0)
            .unwrap_or(DEFAULT_SIM_THROUGHPUT_MBPS);
        let sim_errors = var("KGX_SIM_ERRORS")
            .map(|value| parse_error_schedule(&value))
            .unwrap_or_default();
        let status_interval_ms = var("KGX_STATUS_INTERVAL_MS")
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(DEFAULT_STATUS_INTERVAL_MS)
            .max(MIN_STATUS_INTERVAL_MS);
        let start_timeout_ms = var("KGX_START_TIMEOUT_MS")
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(DEFAULT_START_TIMEOUT_MS);
        let status_format = var("KGX_STATUS_FORMAT")
            .and_then(|value| value.parse().ok())
            .unwrap_or_default();

        Self {
            settings_path: var("KGX_SETTINGS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| config_dir.join("kgx/settings.toml")),
            history_path: var("KGX_HISTORY_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| state_dir.join("history.log")),
            log_dir: state_dir,
            engine,
            sim_throughput_mbps,
            sim_errors,
            status_interval: Duration::from_millis(status_interval_ms),
            status_format,
            start_timeout: Duration::from_millis(start_timeout_ms),
            log_level: var("KGX_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            log_stdout: truthy("KGX_LOG_STDOUT"),
            assume_yes: truthy("KGX_ASSUME_YES"),
        }
    }
}

fn home_dir(var: &impl Fn(&str) -> Option<String>) -> PathBuf {
    var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Comma-separated coverage fractions; unparsable or negative items are skipped.
fn parse_error_schedule(value: &str) -> Vec<f64> {
    value
        .split(',')
        .filter_map(|item| item.trim().parse::<f64>().ok())
        .filter(|at| at.is_finite() && *at >= 0.0)
        .collect()
}
