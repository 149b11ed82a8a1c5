use crate::metrics::{format_duration_long, MetricModel};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

/// Per-error lines are kept up to this count; the next error writes a
/// single limit marker and later ones are not recorded.
pub const MAX_LOGGED_ERRORS: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Running,
    /// Held for exactly one tick after a stop.
    JustStopped,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Running => "running",
            SessionState::JustStopped => "just_stopped",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, SessionState::Running)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for SessionState {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "idle" => Ok(SessionState::Idle),
            "running" => Ok(SessionState::Running),
            "just_stopped" | "juststopped" | "stopped" => Ok(SessionState::JustStopped),
            other => Err(format!("Unknown session state: {other}")),
        }
    }
}

/// Reasons the start guard refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartBlocker {
    NotIdle,
    SizeInvalid { size_mb: u32, free_mb: u64 },
    ThreadsInvalid { threads: u32, cpu_count: u32 },
    CoverageLimitZero,
}

impl fmt::Display for StartBlocker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartBlocker::NotIdle => f.write_str("a test is running or has just stopped"),
            StartBlocker::SizeInvalid { size_mb, free_mb } => write!(
                f,
                "test size {size_mb} MB must be above 0 and below free memory ({free_mb} MB)"
            ),
            StartBlocker::ThreadsInvalid { threads, cpu_count } => write!(
                f,
                "thread count {threads} must be between 1 and {cpu_count}"
            ),
            StartBlocker::CoverageLimitZero => {
                f.write_str("coverage stop is enabled with a limit below 1 %")
            }
        }
    }
}

/// Inputs to the start guard, gathered by the controller.
#[derive(Debug, Clone, Copy)]
pub struct StartRequest {
    pub size_mb: u32,
    pub threads: u32,
    pub free_mb: u64,
    pub cpu_count: u32,
    pub stop_on_coverage: bool,
    pub coverage_limit: u32,
}

impl StartRequest {
    pub fn blockers(&self, state: SessionState) -> Vec<StartBlocker> {
        let mut blockers = Vec::new();
        if state != SessionState::Idle {
            blockers.push(StartBlocker::NotIdle);
        }
        if self.size_mb == 0 || u64::from(self.size_mb) >= self.free_mb {
            blockers.push(StartBlocker::SizeInvalid {
                size_mb: self.size_mb,
                free_mb: self.free_mb,
            });
        }
        if self.threads == 0 || self.threads > self.cpu_count {
            blockers.push(StartBlocker::ThreadsInvalid {
                threads: self.threads,
                cpu_count: self.cpu_count,
            });
        }
        if self.stop_on_coverage && self.coverage_limit < 1 {
            blockers.push(StartBlocker::CoverageLimitZero);
        }
        blockers
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorNote {
    Numbered { index: u32, at: Duration },
    LimitReached,
}

impl ErrorNote {
    pub fn history_line(&self) -> String {
        match self {
            ErrorNote::Numbered { index, at } => {
                format!("    Error {index}:\t{}\n", format_duration_long(*at))
            }
            ErrorNote::LimitReached => "    Error limit reached\n".to_string(),
        }
    }
}

/// Values written into the closing history block.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub memory_usage_percent: f64,
    pub duration: Duration,
    pub coverage_percent: f64,
    pub max_speed: f64,
    pub error_count: u32,
}

impl RunSummary {
    pub fn is_cancelled(&self) -> bool {
        self.max_speed == 0.0 && self.error_count == 0
    }

    pub fn verdict(&self) -> String {
        match self.error_count {
            0 => "** PASS **".to_string(),
            1 => "1 Error".to_string(),
            n => format!("{n} Errors"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Session {
    pub state: SessionState,
    pub started_at: Option<Instant>,
    pub size_mb: u32,
    pub threads: u32,
    pub metrics: MetricModel,
    pub error_log: Vec<String>,
    limit_marker_recorded: bool,
}

impl Session {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn begin(started_at: Instant, size_mb: u32, threads: u32) -> Self {
        Self {
            state: SessionState::Running,
            started_at: Some(started_at),
            size_mb,
            threads,
            ..Self::default()
        }
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        self.started_at
            .map(|start| now.saturating_duration_since(start))
            .unwrap_or_default()
    }

    /// Records the error event for `error_count` into the popup log and
    /// returns the note the history should carry, if any.
    pub fn note_error(&mut self, error_count: u32) -> Option<ErrorNote> {
        if error_count <= MAX_LOGGED_ERRORS {
            let at = self.metrics.duration;
            self.error_log.push(format!(
                "Error {error_count}: {} ({:.0} %)",
                format_duration_long(at),
                self.metrics.coverage_percent()
            ));
            return Some(ErrorNote::Numbered {
                index: error_count,
                at,
            });
        }
        if self.limit_marker_recorded {
            return None;
        }
        self.limit_marker_recorded = true;
        self.error_log.push("Error limit reached".to_string());
        Some(ErrorNote::LimitReached)
    }

    pub fn summary(&self, memory_usage_percent: f64) -> RunSummary {
        RunSummary {
            memory_usage_percent,
            duration: self.metrics.duration,
            coverage_percent: self.metrics.coverage_percent(),
            max_speed: self.metrics.max_speed,
            error_count: self.metrics.error_count,
        }
    }
}
