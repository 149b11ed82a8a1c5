//! Startup argument grammar.
//!
//! Tokens are consumed as `-key value` pairs, or as `-key` switches when the
//! next token also starts with `-` (or there is none). A switch may carry an
//! `:on`/`:off` suffix. Parsing is pure; the resulting [`ConfigDelta`] is
//! applied to a [`Configuration`] separately.

use crate::config::{
    ConfigWarning, Configuration, CpuCacheMode, RngMode, DEFAULT_SIZE_PERCENT, MAX_ERROR_LIMIT,
    MAX_SIZE_PERCENT, MAX_SPEED_DELAY, MAX_THREADS,
};
use std::collections::BTreeSet;
use std::fmt;

pub const MAX_COVERAGE_ARG: u32 = 999_999;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgError {
    UnknownKey(String),
    InvalidValue { key: String, value: String },
    Duplicate(String),
}

impl fmt::Display for ArgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgError::UnknownKey(key) => write!(f, "Invalid Parameter: {key}"),
            ArgError::InvalidValue { key, value } => write!(f, "Invalid Value: {key} {value}"),
            ArgError::Duplicate(key) => write!(f, "Duplicate Parameter: {key}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeArg {
    Auto { percent: Option<u32> },
    Megabytes(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadsArg {
    Auto,
    Count(u32),
}

/// `limit` is only set for a positive number; a bare boolean toggles the
/// stop flag and leaves the stored limit alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitArg {
    pub limit: Option<u32>,
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigDelta {
    pub size: Option<SizeArg>,
    pub threads: Option<ThreadsArg>,
    pub cpu_cache_mode: Option<CpuCacheMode>,
    pub rng_mode: Option<RngMode>,
    pub coverage: Option<LimitArg>,
    pub errors: Option<LimitArg>,
    pub max_speed_delay: Option<u32>,
    pub stress_fpu: Option<bool>,
    pub history_enabled: Option<bool>,
}

impl ConfigDelta {
    pub fn is_empty(&self) -> bool {
        *self == ConfigDelta::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedArgs {
    pub reset_defaults: bool,
    pub restore_log: bool,
    pub delta: ConfigDelta,
    pub no_start: bool,
    pub errors: Vec<ArgError>,
    token_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgsOutcome {
    Empty,
    RestoreLog {
        reset_defaults: bool,
    },
    Configure {
        reset_defaults: bool,
        delta: ConfigDelta,
        auto_start: bool,
        errors: Vec<ArgError>,
    },
}

impl ParsedArgs {
    pub fn is_empty(&self) -> bool {
        self.token_count == 0
    }

    pub fn auto_start(&self) -> bool {
        !self.is_empty() && !self.restore_log && self.errors.is_empty() && !self.no_start
    }

    pub fn into_outcome(self) -> ArgsOutcome {
        if self.is_empty() {
            return ArgsOutcome::Empty;
        }
        if self.restore_log {
            return ArgsOutcome::RestoreLog {
                reset_defaults: self.reset_defaults,
            };
        }
        let auto_start = self.auto_start();
        ArgsOutcome::Configure {
            reset_defaults: self.reset_defaults,
            delta: self.delta,
            auto_start,
            errors: self.errors,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RawValue {
    Switch(bool),
    Text(String),
}

impl RawValue {
    fn display(&self) -> String {
        match self {
            RawValue::Switch(value) => value.to_string(),
            RawValue::Text(value) => value.clone(),
        }
    }

    fn as_bool(&self) -> Option<bool> {
        match self {
            RawValue::Switch(value) => Some(*value),
            RawValue::Text(value) => parse_bool(value),
        }
    }

    fn as_number(&self) -> Option<u32> {
        match self {
            RawValue::Switch(_) => None,
            RawValue::Text(value) => value.trim().parse::<u32>().ok(),
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "on" => Some(true),
        "false" | "off" => Some(false),
        _ => None,
    }
}

fn normalize_key(raw: &str) -> String {
    raw.trim_start_matches([' ', '-']).trim().to_lowercase()
}

fn pair_tokens<S: AsRef<str>>(tokens: &[S]) -> Vec<(String, RawValue)> {
    let mut pairs = Vec::new();
    let mut index = 0;
    while index < tokens.len() {
        let key = tokens[index].as_ref();
        match tokens.get(index + 1).map(AsRef::as_ref) {
            Some(next) if !next.starts_with('-') => {
                pairs.push((normalize_key(key), RawValue::Text(next.to_string())));
                index += 2;
            }
            _ => {
                let mut name = normalize_key(key);
                let mut enabled = true;
                if let Some(stripped) = name.strip_suffix(":off") {
                    name = stripped.to_string();
                    enabled = false;
                } else if let Some(stripped) = name.strip_suffix(":on") {
                    name = stripped.to_string();
                }
                pairs.push((name, RawValue::Switch(enabled)));
                index += 1;
            }
        }
    }
    pairs
}

pub fn parse<S: AsRef<str>>(tokens: &[S]) -> ParsedArgs {
    let mut parsed = ParsedArgs {
        token_count: tokens.len(),
        ..ParsedArgs::default()
    };
    let mut seen = BTreeSet::new();
    let mut pending = Vec::new();

    for (key, value) in pair_tokens(tokens) {
        if !seen.insert(key.clone()) {
            parsed.errors.push(ArgError::Duplicate(key));
            continue;
        }
        pending.push((key, value));
    }

    // `default` and `log-restore` are consumed ahead of everything else.
    pending.retain(|(key, value)| match key.as_str() {
        "default" => {
            match value.as_bool() {
                Some(enabled) => parsed.reset_defaults = enabled,
                None => parsed.errors.push(invalid(key, value)),
            }
            false
        }
        "log-restore" => {
            match value.as_bool() {
                Some(enabled) => parsed.restore_log = enabled,
                None => parsed.errors.push(invalid(key, value)),
            }
            false
        }
        _ => true,
    });

    if parsed.restore_log {
        return parsed;
    }

    for (key, value) in pending {
        if let Err(error) = apply_pair(&mut parsed, &key, &value) {
            parsed.errors.push(error);
        }
    }
    parsed
}

fn invalid(key: &str, value: &RawValue) -> ArgError {
    ArgError::InvalidValue {
        key: key.to_string(),
        value: value.display(),
    }
}

fn apply_pair(parsed: &mut ParsedArgs, key: &str, value: &RawValue) -> Result<(), ArgError> {
    let delta = &mut parsed.delta;
    let bad = || invalid(key, value);
    match key {
        "size" => delta.size = Some(parse_size(value).ok_or_else(bad)?),
        "threads" => delta.threads = Some(parse_threads(value).ok_or_else(bad)?),
        "cache" => {
            let mode = value
                .as_number()
                .and_then(CpuCacheMode::from_index)
                .ok_or_else(bad)?;
            delta.cpu_cache_mode = Some(mode);
        }
        "rng" => {
            let mode = value
                .as_number()
                .and_then(RngMode::from_index)
                .ok_or_else(bad)?;
            delta.rng_mode = Some(mode);
        }
        "coverage" => delta.coverage = Some(parse_limit(value, MAX_COVERAGE_ARG).ok_or_else(bad)?),
        "errors" => delta.errors = Some(parse_limit(value, MAX_ERROR_LIMIT).ok_or_else(bad)?),
        "delay" => {
            let delay = value
                .as_number()
                .filter(|delay| *delay <= MAX_SPEED_DELAY)
                .ok_or_else(bad)?;
            delta.max_speed_delay = Some(delay);
        }
        "fpu" => delta.stress_fpu = Some(value.as_bool().ok_or_else(bad)?),
        "log" => delta.history_enabled = Some(value.as_bool().ok_or_else(bad)?),
        "no-start" => parsed.no_start = value.as_bool().ok_or_else(bad)?,
        other => return Err(ArgError::UnknownKey(other.to_string())),
    }
    Ok(())
}

fn parse_size(value: &RawValue) -> Option<SizeArg> {
    let RawValue::Text(text) = value else {
        return None;
    };
    let upper = text.trim().to_uppercase();
    if upper == "AUTO" {
        return Some(SizeArg::Auto { percent: None });
    }

    if let Some(digits) = upper.strip_suffix('%') {
        let percent = digits.parse::<u32>().ok()?;
        return (1..=MAX_SIZE_PERCENT)
            .contains(&percent)
            .then_some(SizeArg::Auto {
                percent: Some(percent),
            });
    }
    if let Some(digits) = upper.strip_suffix('M') {
        let megabytes = digits.parse::<u32>().ok().filter(|mb| *mb > 0)?;
        return Some(SizeArg::Megabytes(megabytes));
    }
    if let Some(digits) = upper.strip_suffix('G') {
        let gigabytes = digits.parse::<u32>().ok().filter(|gb| *gb > 0)?;
        return gigabytes.checked_mul(1_000).map(SizeArg::Megabytes);
    }

    // A bare number below 100 is read as a percentage.
    match upper.parse::<u32>().ok()? {
        0 => None,
        n if n < 100 => Some(SizeArg::Auto { percent: Some(n) }),
        n => Some(SizeArg::Megabytes(n)),
    }
}

fn parse_threads(value: &RawValue) -> Option<ThreadsArg> {
    if let RawValue::Text(text) = value {
        if text.trim().eq_ignore_ascii_case("auto") {
            return Some(ThreadsArg::Auto);
        }
    }
    value
        .as_number()
        .filter(|count| (1..=MAX_THREADS).contains(count))
        .map(ThreadsArg::Count)
}

fn parse_limit(value: &RawValue, max: u32) -> Option<LimitArg> {
    if let Some(number) = value.as_number() {
        if number > max {
            return None;
        }
        return Some(if number > 0 {
            LimitArg {
                limit: Some(number),
                enabled: true,
            }
        } else {
            LimitArg {
                limit: None,
                enabled: false,
            }
        });
    }
    value.as_bool().map(|enabled| LimitArg {
        limit: None,
        enabled,
    })
}

impl Configuration {
    /// Applies a parsed argument delta. Thread counts are clamped to the
    /// logical CPU count.
    pub fn apply_delta(&mut self, delta: &ConfigDelta, cpu_count: u32) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        match delta.size {
            Some(SizeArg::Auto { percent }) => {
                self.size_is_auto = true;
                self.size_percent = percent.unwrap_or(DEFAULT_SIZE_PERCENT);
            }
            Some(SizeArg::Megabytes(megabytes)) => {
                self.size_is_auto = false;
                self.size_megabytes = megabytes;
            }
            None => {}
        }

        match delta.threads {
            Some(ThreadsArg::Auto) => {
                warnings.extend(self.set_threads(cpu_count, cpu_count));
            }
            Some(ThreadsArg::Count(count)) => {
                warnings.extend(self.set_threads(count, cpu_count));
            }
            None => {}
        }

        if let Some(coverage) = delta.coverage {
            if let Some(limit) = coverage.limit {
                self.coverage_limit = limit;
            }
            self.stop_on_coverage = coverage.enabled;
        }
        if let Some(errors) = delta.errors {
            if let Some(limit) = errors.limit {
                self.error_limit = limit;
            }
            self.stop_on_error = errors.enabled;
        }

        if let Some(mode) = delta.cpu_cache_mode {
            self.cpu_cache_mode = mode;
        }
        if let Some(mode) = delta.rng_mode {
            self.rng_mode = mode;
        }
        if let Some(delay) = delta.max_speed_delay {
            self.max_speed_delay = delay;
        }
        if let Some(fpu) = delta.stress_fpu {
            self.stress_fpu = fpu;
        }
        if let Some(history) = delta.history_enabled {
            self.history_enabled = history;
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_size_threads_and_fpu_switch() {
        let parsed = parse(&["-size", "50", "-threads", "4", "--fpu"]);
        assert!(parsed.errors.is_empty());
        assert!(parsed.auto_start());
        assert_eq!(parsed.delta.size, Some(SizeArg::Auto { percent: Some(50) }));
        assert_eq!(parsed.delta.threads, Some(ThreadsArg::Count(4)));
        assert_eq!(parsed.delta.stress_fpu, Some(true));
    }

    #[test]
    fn out_of_range_threads_blocks_auto_start() {
        let parsed = parse(&["-size", "28000M", "-threads", "999"]);
        assert_eq!(parsed.delta.size, Some(SizeArg::Megabytes(28_000)));
        assert_eq!(
            parsed.errors,
            vec![ArgError::InvalidValue {
                key: "threads".to_string(),
                value: "999".to_string()
            }]
        );
        assert!(!parsed.auto_start());
    }

    #[test]
    fn unknown_key_is_named_in_error() {
        let parsed = parse(&["-foo", "1"]);
        assert_eq!(parsed.errors, vec![ArgError::UnknownKey("foo".to_string())]);
        assert_eq!(parsed.errors[0].to_string(), "Invalid Parameter: foo");
        assert!(!parsed.auto_start());
    }

    #[test]
    fn size_units_and_bare_number_quirk() {
        let size = |value: &str| parse(&["-size", value]).delta.size;
        assert_eq!(size("2G"), Some(SizeArg::Megabytes(2_000)));
        assert_eq!(size("512m"), Some(SizeArg::Megabytes(512)));
        assert_eq!(size("99"), Some(SizeArg::Auto { percent: Some(99) }));
        assert_eq!(size("100"), Some(SizeArg::Megabytes(100)));
        assert_eq!(size("40%"), Some(SizeArg::Auto { percent: Some(40) }));
        assert_eq!(size("auto"), Some(SizeArg::Auto { percent: None }));
        assert_eq!(size("0"), None);
        assert_eq!(size("150%"), None);
        assert_eq!(size("5000000G"), None);
    }

    #[test]
    fn switch_suffixes_and_explicit_booleans() {
        let parsed = parse(&["--fpu:off", "-log", "false", "-no-start:on"]);
        assert!(parsed.errors.is_empty());
        assert_eq!(parsed.delta.stress_fpu, Some(false));
        assert_eq!(parsed.delta.history_enabled, Some(false));
        assert!(parsed.no_start);
        assert!(!parsed.auto_start());
    }

    #[test]
    fn limit_arguments_accept_numbers_and_booleans() {
        let parsed = parse(&["-coverage", "0", "-errors", "true"]);
        assert_eq!(
            parsed.delta.coverage,
            Some(LimitArg {
                limit: None,
                enabled: false
            })
        );
        assert_eq!(
            parsed.delta.errors,
            Some(LimitArg {
                limit: None,
                enabled: true
            })
        );

        let parsed = parse(&["-coverage", "1000000"]);
        assert_eq!(parsed.errors.len(), 1);
    }

    #[test]
    fn keys_are_case_insensitive_and_duplicates_rejected() {
        let parsed = parse(&["-THREADS", "2", "--threads", "4"]);
        assert_eq!(parsed.delta.threads, Some(ThreadsArg::Count(2)));
        assert_eq!(
            parsed.errors,
            vec![ArgError::Duplicate("threads".to_string())]
        );
    }

    #[test]
    fn log_restore_short_circuits_after_default() {
        let parsed = parse(&["-default", "-log-restore", "-bogus", "3"]);
        assert!(parsed.reset_defaults);
        assert!(parsed.restore_log);
        assert!(parsed.errors.is_empty());
        assert_eq!(
            parsed.into_outcome(),
            ArgsOutcome::RestoreLog {
                reset_defaults: true
            }
        );
    }

    #[test]
    fn empty_tokens_do_nothing() {
        let parsed = parse::<&str>(&[]);
        assert!(!parsed.auto_start());
        assert_eq!(parsed.into_outcome(), ArgsOutcome::Empty);
    }

    #[test]
    fn delta_applies_to_configuration() {
        let mut config = Configuration::default();
        let parsed = parse(&["-size", "auto", "-threads", "auto", "-coverage", "300", "-cache", "3"]);
        let warnings = config.apply_delta(&parsed.delta, 8);

        assert!(warnings.is_empty());
        assert!(config.size_is_auto);
        assert_eq!(config.size_percent, DEFAULT_SIZE_PERCENT);
        assert_eq!(config.threads, 8);
        assert_eq!(config.coverage_limit, 300);
        assert!(config.stop_on_coverage);
        assert_eq!(config.cpu_cache_mode, CpuCacheMode::Enabled);
    }

    #[test]
    fn delta_threads_clamp_to_cpu_count() {
        let mut config = Configuration::default();
        let parsed = parse(&["-threads", "16"]);
        config.apply_delta(&parsed.delta, 4);
        assert_eq!(config.threads, 4);
    }
}
