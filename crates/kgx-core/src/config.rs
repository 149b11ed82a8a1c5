use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const MAX_THREADS: u32 = 64;
pub const MAX_COVERAGE_LIMIT: u32 = 1_000_000;
pub const MAX_ERROR_LIMIT: u32 = 100;
pub const MIN_POLL_INTERVAL_MS: u32 = 10;
pub const MAX_POLL_INTERVAL_MS: u32 = 1_000;
pub const MAX_SPEED_DELAY: u32 = 1_000;
pub const MIN_SIZE_PERCENT: u32 = 1;
pub const MAX_SIZE_PERCENT: u32 = 99;

pub const DEFAULT_SIZE_MEGABYTES: u32 = 1_000;
pub const DEFAULT_SIZE_PERCENT: u32 = 95;
pub const DEFAULT_COVERAGE_LIMIT: u32 = 5_000;
pub const DEFAULT_ERROR_LIMIT: u32 = 1;
pub const DEFAULT_POLL_INTERVAL_MS: u32 = 150;
pub const DEFAULT_MAX_SPEED_DELAY: u32 = 15;

/// Key under which the display history buffer is persisted next to the
/// configuration fields.
pub const HISTORY_LOG_KEY: &str = "history_log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CpuCacheMode {
    Disabled,
    WriteCombine,
    #[default]
    Default,
    Enabled,
}

impl CpuCacheMode {
    pub const ALL: [CpuCacheMode; 4] = [
        CpuCacheMode::Disabled,
        CpuCacheMode::WriteCombine,
        CpuCacheMode::Default,
        CpuCacheMode::Enabled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CpuCacheMode::Disabled => "disabled",
            CpuCacheMode::WriteCombine => "write-combine",
            CpuCacheMode::Default => "default",
            CpuCacheMode::Enabled => "enabled",
        }
    }

    pub fn index(&self) -> u32 {
        match self {
            CpuCacheMode::Disabled => 0,
            CpuCacheMode::WriteCombine => 1,
            CpuCacheMode::Default => 2,
            CpuCacheMode::Enabled => 3,
        }
    }

    pub fn from_index(index: u32) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }
}

impl fmt::Display for CpuCacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CpuCacheMode {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        if let Ok(index) = normalized.parse::<u32>() {
            return Self::from_index(index).ok_or_else(|| format!("Unknown cache mode: {index}"));
        }
        match normalized.as_str() {
            "disabled" => Ok(CpuCacheMode::Disabled),
            "write-combine" | "write_combine" | "writecombine" => Ok(CpuCacheMode::WriteCombine),
            "default" => Ok(CpuCacheMode::Default),
            "enabled" => Ok(CpuCacheMode::Enabled),
            other => Err(format!("Unknown cache mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RngMode {
    #[default]
    Default,
    Xorwow,
}

impl RngMode {
    pub const ALL: [RngMode; 2] = [RngMode::Default, RngMode::Xorwow];

    pub fn as_str(&self) -> &'static str {
        match self {
            RngMode::Default => "default",
            RngMode::Xorwow => "xorwow",
        }
    }

    pub fn index(&self) -> u32 {
        match self {
            RngMode::Default => 0,
            RngMode::Xorwow => 1,
        }
    }

    pub fn from_index(index: u32) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }
}

impl fmt::Display for RngMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RngMode {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        if let Ok(index) = normalized.parse::<u32>() {
            return Self::from_index(index).ok_or_else(|| format!("Unknown rng mode: {index}"));
        }
        match normalized.as_str() {
            "default" => Ok(RngMode::Default),
            "xorwow" => Ok(RngMode::Xorwow),
            other => Err(format!("Unknown rng mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum SizeMode {
    Manual { megabytes: u32 },
    Auto { percent: u32 },
}

/// A single persisted value in the flat settings store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    UInt(u32),
    Text(String),
}

impl SettingValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SettingValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            SettingValue::UInt(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            SettingValue::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }
}

/// One entry per persisted configuration field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SettingKey {
    SizeMegabytes,
    SizeIsAuto,
    SizePercent,
    Threads,
    CpuCacheMode,
    RngMode,
    StressFpu,
    StopOnCoverage,
    CoverageLimit,
    StopOnError,
    ErrorLimit,
    BeepOnError,
    PollIntervalMs,
    MaxSpeedDelay,
    HistoryEnabled,
}

impl SettingKey {
    pub const ALL: [SettingKey; 15] = [
        SettingKey::SizeMegabytes,
        SettingKey::SizeIsAuto,
        SettingKey::SizePercent,
        SettingKey::Threads,
        SettingKey::CpuCacheMode,
        SettingKey::RngMode,
        SettingKey::StressFpu,
        SettingKey::StopOnCoverage,
        SettingKey::CoverageLimit,
        SettingKey::StopOnError,
        SettingKey::ErrorLimit,
        SettingKey::BeepOnError,
        SettingKey::PollIntervalMs,
        SettingKey::MaxSpeedDelay,
        SettingKey::HistoryEnabled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SettingKey::SizeMegabytes => "size_megabytes",
            SettingKey::SizeIsAuto => "size_is_auto",
            SettingKey::SizePercent => "size_percent",
            SettingKey::Threads => "threads",
            SettingKey::CpuCacheMode => "cpu_cache_mode",
            SettingKey::RngMode => "rng_mode",
            SettingKey::StressFpu => "stress_fpu",
            SettingKey::StopOnCoverage => "stop_on_coverage",
            SettingKey::CoverageLimit => "coverage_limit",
            SettingKey::StopOnError => "stop_on_error",
            SettingKey::ErrorLimit => "error_limit",
            SettingKey::BeepOnError => "beep_on_error",
            SettingKey::PollIntervalMs => "poll_interval_ms",
            SettingKey::MaxSpeedDelay => "max_speed_delay",
            SettingKey::HistoryEnabled => "history_enabled",
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettingKey {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|key| key.as_str() == input.trim())
            .ok_or_else(|| format!("Unknown setting: {input}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    ThreadCeiling { requested: u32 },
    CoverageBelowProgress { limit: u32, coverage_percent: u32 },
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigWarning::ThreadCeiling { requested } => write!(
                f,
                "Maximum of {MAX_THREADS} threads supported (requested {requested})"
            ),
            ConfigWarning::CoverageBelowProgress {
                limit,
                coverage_percent,
            } => write!(
                f,
                "Coverage limit {limit} % must be higher than active test coverage ({coverage_percent} %)"
            ),
        }
    }
}

/// User-editable test configuration, persisted one field per [`SettingKey`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Configuration {
    pub size_megabytes: u32,
    pub size_is_auto: bool,
    pub size_percent: u32,
    pub threads: u32,
    pub cpu_cache_mode: CpuCacheMode,
    pub rng_mode: RngMode,
    pub stress_fpu: bool,
    pub stop_on_coverage: bool,
    pub coverage_limit: u32,
    pub stop_on_error: bool,
    pub error_limit: u32,
    pub beep_on_error: bool,
    pub poll_interval_ms: u32,
    pub max_speed_delay: u32,
    pub history_enabled: bool,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            size_megabytes: DEFAULT_SIZE_MEGABYTES,
            size_is_auto: false,
            size_percent: DEFAULT_SIZE_PERCENT,
            threads: 1,
            cpu_cache_mode: CpuCacheMode::Default,
            rng_mode: RngMode::Default,
            stress_fpu: false,
            stop_on_coverage: true,
            coverage_limit: DEFAULT_COVERAGE_LIMIT,
            stop_on_error: true,
            error_limit: DEFAULT_ERROR_LIMIT,
            beep_on_error: true,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_speed_delay: DEFAULT_MAX_SPEED_DELAY,
            history_enabled: true,
        }
    }
}

impl Configuration {
    pub fn size_mode(&self) -> SizeMode {
        if self.size_is_auto {
            SizeMode::Auto {
                percent: self.size_percent,
            }
        } else {
            SizeMode::Manual {
                megabytes: self.size_megabytes,
            }
        }
    }

    pub fn value_of(&self, key: SettingKey) -> SettingValue {
        match key {
            SettingKey::SizeMegabytes => SettingValue::UInt(self.size_megabytes),
            SettingKey::SizeIsAuto => SettingValue::Bool(self.size_is_auto),
            SettingKey::SizePercent => SettingValue::UInt(self.size_percent),
            SettingKey::Threads => SettingValue::UInt(self.threads),
            SettingKey::CpuCacheMode => SettingValue::UInt(self.cpu_cache_mode.index()),
            SettingKey::RngMode => SettingValue::UInt(self.rng_mode.index()),
            SettingKey::StressFpu => SettingValue::Bool(self.stress_fpu),
            SettingKey::StopOnCoverage => SettingValue::Bool(self.stop_on_coverage),
            SettingKey::CoverageLimit => SettingValue::UInt(self.coverage_limit),
            SettingKey::StopOnError => SettingValue::Bool(self.stop_on_error),
            SettingKey::ErrorLimit => SettingValue::UInt(self.error_limit),
            SettingKey::BeepOnError => SettingValue::Bool(self.beep_on_error),
            SettingKey::PollIntervalMs => SettingValue::UInt(self.poll_interval_ms),
            SettingKey::MaxSpeedDelay => SettingValue::UInt(self.max_speed_delay),
            SettingKey::HistoryEnabled => SettingValue::Bool(self.history_enabled),
        }
    }

    /// Applies a persisted value; values of the wrong shape are ignored and
    /// numbers are clamped into their field's range.
    pub fn assign(&mut self, key: SettingKey, value: &SettingValue) {
        match key {
            SettingKey::SizeMegabytes => {
                if let Some(v) = value.as_u32() {
                    self.size_megabytes = v.max(1);
                }
            }
            SettingKey::SizeIsAuto => {
                if let Some(v) = value.as_bool() {
                    self.size_is_auto = v;
                }
            }
            SettingKey::SizePercent => {
                if let Some(v) = value.as_u32() {
                    self.size_percent = v.clamp(MIN_SIZE_PERCENT, MAX_SIZE_PERCENT);
                }
            }
            SettingKey::Threads => {
                if let Some(v) = value.as_u32() {
                    self.threads = v.clamp(1, MAX_THREADS);
                }
            }
            SettingKey::CpuCacheMode => {
                if let Some(mode) = value.as_u32().and_then(CpuCacheMode::from_index) {
                    self.cpu_cache_mode = mode;
                }
            }
            SettingKey::RngMode => {
                if let Some(mode) = value.as_u32().and_then(RngMode::from_index) {
                    self.rng_mode = mode;
                }
            }
            SettingKey::StressFpu => {
                if let Some(v) = value.as_bool() {
                    self.stress_fpu = v;
                }
            }
            SettingKey::StopOnCoverage => {
                if let Some(v) = value.as_bool() {
                    self.stop_on_coverage = v;
                }
            }
            SettingKey::CoverageLimit => {
                if let Some(v) = value.as_u32() {
                    self.coverage_limit = v.min(MAX_COVERAGE_LIMIT);
                }
            }
            SettingKey::StopOnError => {
                if let Some(v) = value.as_bool() {
                    self.stop_on_error = v;
                }
            }
            SettingKey::ErrorLimit => {
                if let Some(v) = value.as_u32() {
                    self.error_limit = v.min(MAX_ERROR_LIMIT);
                }
            }
            SettingKey::BeepOnError => {
                if let Some(v) = value.as_bool() {
                    self.beep_on_error = v;
                }
            }
            SettingKey::PollIntervalMs => {
                if let Some(v) = value.as_u32() {
                    self.poll_interval_ms = clamp_poll_interval(v);
                }
            }
            SettingKey::MaxSpeedDelay => {
                if let Some(v) = value.as_u32() {
                    self.max_speed_delay = v.min(MAX_SPEED_DELAY);
                }
            }
            SettingKey::HistoryEnabled => {
                if let Some(v) = value.as_bool() {
                    self.history_enabled = v;
                }
            }
        }
    }

    pub fn changed_keys(&self, other: &Configuration) -> Vec<SettingKey> {
        SettingKey::ALL
            .iter()
            .copied()
            .filter(|key| self.value_of(*key) != other.value_of(*key))
            .collect()
    }

    /// Sets the coverage limit and derives the stop-on-coverage flag from
    /// the previous limit. `coverage_percent` is only consulted while a run
    /// is active.
    pub fn set_coverage_limit(&mut self, limit: u32, running_coverage_percent: Option<f64>) {
        let before = self.coverage_limit;
        let mut limit = limit.min(MAX_COVERAGE_LIMIT);

        if let Some(coverage_percent) = running_coverage_percent {
            if self.stop_on_coverage && (limit as f64 - 50.0) < coverage_percent {
                limit = (((coverage_percent + 50.0) / 100.0).ceil() * 100.0) as u32;
                limit = limit.min(MAX_COVERAGE_LIMIT);
            }
        }

        self.coverage_limit = limit;
        self.stop_on_coverage = derive_stop_flag(self.stop_on_coverage, before, limit);
    }

    pub fn set_error_limit(&mut self, limit: u32) {
        let before = self.error_limit;
        let limit = limit.min(MAX_ERROR_LIMIT);
        self.error_limit = limit;
        self.stop_on_error = derive_stop_flag(self.stop_on_error, before, limit);
    }

    /// Clamps into `1..=cpu_count`; a value that is still above
    /// [`MAX_THREADS`] is capped there and reported.
    pub fn set_threads(&mut self, requested: u32, cpu_count: u32) -> Option<ConfigWarning> {
        let (threads, warning) = validate_threads(requested, cpu_count);
        self.threads = threads;
        warning
    }
}

pub fn validate_threads(requested: u32, cpu_count: u32) -> (u32, Option<ConfigWarning>) {
    let clamped = requested.clamp(1, cpu_count.max(1));
    if clamped > MAX_THREADS {
        (MAX_THREADS, Some(ConfigWarning::ThreadCeiling { requested }))
    } else {
        (clamped, None)
    }
}

pub fn clamp_poll_interval(value: u32) -> u32 {
    value.clamp(MIN_POLL_INTERVAL_MS, MAX_POLL_INTERVAL_MS)
}

// An enabled limit stays enabled while non-zero; a disabled one only turns on
// when it moves away from zero.
fn derive_stop_flag(enabled: bool, before: u32, after: u32) -> bool {
    if enabled {
        after != 0
    } else {
        before == 0 && after > 0
    }
}
