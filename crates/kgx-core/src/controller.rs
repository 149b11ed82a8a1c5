//! Test session controller: owns configuration, the running session and the
//! history, and advances them one poll tick at a time.

use crate::alert::{AlertSink, Tone};
use crate::args::{self, ArgError, ArgsOutcome};
use crate::config::{
    clamp_poll_interval, validate_threads, ConfigWarning, Configuration, CpuCacheMode, RngMode,
    SettingValue, SizeMode, HISTORY_LOG_KEY, MAX_POLL_INTERVAL_MS, MIN_POLL_INTERVAL_MS,
};
use crate::engine::Engine;
use crate::history::{HistoryRecorder, HistorySink};
use crate::metrics::{self, format_duration_short};
use crate::session::{Session, SessionState, StartBlocker, StartRequest};
use crate::settings::SettingsBackend;
use crate::system::{MemorySnapshot, SystemMemory};
use chrono::Local;
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Free memory readings closer than this to the stored one are ignored.
const MEMORY_REFRESH_THRESHOLD_MB: u64 = 1;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupReport {
    pub errors: Vec<ArgError>,
    pub warnings: Vec<ConfigWarning>,
    pub auto_start: bool,
    pub restored_history: bool,
}

impl StartupReport {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Newline-joined error batch, as shown to the user.
    pub fn error_message(&self) -> Option<String> {
        if self.errors.is_empty() {
            return None;
        }
        Some(
            self.errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub started: bool,
    pub stopped: bool,
    /// Error count when it rose during this tick.
    pub new_errors: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub state: SessionState,
    pub size_mode: SizeMode,
    pub size_mb: u32,
    pub threads: u32,
    pub size_per_thread_mb: f64,
    pub memory: MemorySnapshot,
    pub free_memory_percent: f64,
    pub memory_usage_percent: f64,
    pub coverage_percent: f64,
    pub speed_mbps: f64,
    pub max_speed_mbps: f64,
    pub duration_secs: f64,
    pub error_count: u32,
    pub next_full_coverage_percent: f64,
    pub next_full_coverage_in_secs: Option<f64>,
    pub finished_in_secs: Option<f64>,
    pub auto_start_pending: bool,
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<12} {} MB x {} | cov {:.0} % | {:.1} MB/s (max {:.1}) | {} | errors {}",
            self.state,
            self.size_mb,
            self.threads,
            self.coverage_percent,
            self.speed_mbps,
            self.max_speed_mbps,
            format_duration_short(Duration::from_secs_f64(self.duration_secs)),
            self.error_count,
        )?;
        if let Some(secs) = self.finished_in_secs {
            write!(
                f,
                " | done in {}",
                format_duration_short(Duration::from_secs_f64(secs))
            )?;
        }
        Ok(())
    }
}

pub struct Controller<E: Engine, M: SystemMemory> {
    engine: E,
    system: M,
    settings: Box<dyn SettingsBackend>,
    history: HistoryRecorder,
    alerts: Box<dyn AlertSink>,
    config: Configuration,
    session: Session,
    memory: MemorySnapshot,
    cpu_count: u32,
    auto_size_mb: u32,
    memory_usage_percent: f64,
    pending_auto_start: bool,
}

impl<E: Engine, M: SystemMemory> Controller<E, M> {
    /// Loads configuration and the history buffer from `settings`, then
    /// closes any entry left open by a previous process.
    pub fn new(
        engine: E,
        system: M,
        settings: Box<dyn SettingsBackend>,
        history_sink: Box<dyn HistorySink>,
        alerts: Box<dyn AlertSink>,
    ) -> Self {
        let mut config = Configuration::load(settings.as_ref());
        let cpu_count = system.logical_cpus().max(1);
        let (threads, warning) = validate_threads(config.threads, cpu_count);
        if let Some(warning) = warning {
            warn!(event = "config_threads_clamped", %warning);
        }
        config.threads = threads;

        let buffer = settings
            .get(HISTORY_LOG_KEY)
            .and_then(|value| value.as_text().map(str::to_string))
            .unwrap_or_default();
        let history = HistoryRecorder::with_buffer(history_sink, buffer);
        let memory = system.snapshot().unwrap_or_default();

        let mut controller = Self {
            engine,
            system,
            settings,
            history,
            alerts,
            config,
            session: Session::idle(),
            memory,
            cpu_count,
            auto_size_mb: 0,
            memory_usage_percent: 0.0,
            pending_auto_start: false,
        };
        controller.history.recover_crash();
        controller.refresh_idle_metrics();
        controller.persist_all();
        debug!(
            event = "controller_ready",
            cpu_count,
            total_mb = memory.total_mb,
            free_mb = memory.free_mb
        );
        controller
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> SessionState {
        self.session.state
    }

    pub fn history(&self) -> &HistoryRecorder {
        &self.history
    }

    pub fn settings(&self) -> &dyn SettingsBackend {
        self.settings.as_ref()
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn memory(&self) -> MemorySnapshot {
        self.memory
    }

    pub fn cpu_count(&self) -> u32 {
        self.cpu_count
    }

    pub fn auto_start_pending(&self) -> bool {
        self.pending_auto_start
    }

    pub fn memory_usage_percent(&self) -> f64 {
        self.memory_usage_percent
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(u64::from(self.config.poll_interval_ms))
    }

    /// Size the next start would use; the running size while a test runs.
    pub fn test_size(&self) -> u32 {
        if self.session.state.is_running() {
            return self.session.size_mb;
        }
        if self.config.size_is_auto {
            self.auto_size_mb
        } else {
            self.config.size_megabytes
        }
    }

    pub fn apply_startup_args<S: AsRef<str>>(&mut self, tokens: &[S]) -> StartupReport {
        let mut report = StartupReport::default();
        match args::parse(tokens).into_outcome() {
            ArgsOutcome::Empty => {}
            ArgsOutcome::RestoreLog { reset_defaults } => {
                if reset_defaults {
                    self.reset_defaults();
                }
                report.restored_history = self.restore_history();
            }
            ArgsOutcome::Configure {
                reset_defaults,
                delta,
                auto_start,
                errors,
            } => {
                if reset_defaults {
                    self.reset_defaults();
                }
                let cpu_count = self.cpu_count;
                report.warnings = self.mutate_config(|config| config.apply_delta(&delta, cpu_count));
                report.errors = errors;
                report.auto_start = auto_start;
                self.pending_auto_start = auto_start;
            }
        }
        for warning in &report.warnings {
            warn!(event = "startup_arg_warning", %warning);
        }
        if report.has_errors() {
            warn!(event = "startup_args_rejected", count = report.errors.len());
        }
        report
    }

    pub fn start_request(&self) -> StartRequest {
        StartRequest {
            size_mb: self.test_size(),
            threads: self.config.threads,
            free_mb: self.memory.free_mb,
            cpu_count: self.cpu_count,
            stop_on_coverage: self.config.stop_on_coverage,
            coverage_limit: self.config.coverage_limit,
        }
    }

    pub fn start_blockers(&self) -> Vec<StartBlocker> {
        self.start_request().blockers(self.session.state)
    }

    pub fn can_start(&self) -> bool {
        self.start_blockers().is_empty()
    }

    pub fn can_stop(&self) -> bool {
        self.session.state.is_running()
    }

    /// Returns false when the guard refuses or the engine fails to start;
    /// neither is an error.
    pub fn start(&mut self, now: Instant) -> bool {
        let blockers = self.start_blockers();
        if !blockers.is_empty() {
            debug!(event = "start_blocked", blockers = ?blockers);
            return false;
        }

        self.system.reclaim();
        self.engine.set_stress_fpu(self.config.stress_fpu);
        self.engine.set_cpu_cache(self.config.cpu_cache_mode);
        self.engine.set_rng(self.config.rng_mode);
        self.pending_auto_start = false;

        let size_mb = self.test_size();
        let threads = self.config.threads;
        if !self.engine.start_test(size_mb, threads) {
            warn!(event = "engine_start_failed", size_mb, threads);
            return false;
        }

        self.session = Session::begin(now, size_mb, threads);
        info!(event = "test_started", size_mb, threads);
        if self.config.history_enabled {
            self.history.begin_entry(Local::now(), size_mb, threads);
            self.persist_history();
        }
        true
    }

    pub fn stop(&mut self) -> bool {
        if !self.can_stop() {
            return false;
        }
        if !self.engine.stop_test() {
            warn!(event = "engine_stop_failed");
            return false;
        }

        self.session.state = SessionState::JustStopped;
        let summary = self
            .session
            .summary(metrics::usage_percent(u64::from(self.session.size_mb), self.memory.total_mb));
        info!(
            event = "test_stopped",
            coverage_percent = summary.coverage_percent,
            errors = summary.error_count,
            max_speed = summary.max_speed
        );
        if self.config.history_enabled {
            self.history.record_stop(&summary);
            self.persist_history();
        }
        true
    }

    pub fn tick(&mut self, now: Instant) -> TickReport {
        let mut report = TickReport::default();
        self.refresh_memory();

        if !self.session.state.is_running() {
            if self.session.state == SessionState::JustStopped {
                self.session.state = SessionState::Idle;
                self.system.reclaim();
            }
            self.refresh_idle_metrics();
            if self.pending_auto_start && self.can_start() {
                report.started = self.start(now);
            }
        }

        if self.session.state.is_running() {
            self.poll_engine(now, &mut report);
        }
        report
    }

    fn poll_engine(&mut self, now: Instant, report: &mut TickReport) {
        let coverage = self.engine.coverage();
        let error_count = self.engine.error_count();
        let elapsed = self.session.elapsed(now);
        let previous_errors = self.session.metrics.error_count;

        let size_mb = self.session.size_mb;
        self.session.metrics.record_sample(
            coverage,
            error_count,
            elapsed,
            size_mb,
            self.config.max_speed_delay,
        );

        if self.session.metrics.error_count > previous_errors {
            report.new_errors = Some(self.session.metrics.error_count);
            if self.handle_error_event() {
                report.stopped = true;
                return;
            }
        }

        let limit = self.config.coverage_limit;
        if self.config.stop_on_coverage
            && limit > 0
            && f64::from(limit) <= self.session.metrics.coverage_percent()
        {
            self.session.metrics.clamp_coverage(limit);
            report.stopped = self.stop();
        }
    }

    /// Returns whether the event stopped the run.
    fn handle_error_event(&mut self) -> bool {
        let count = self.session.metrics.error_count;
        let limit_hit = self.config.error_limit > 0 && count >= self.config.error_limit;
        warn!(event = "memory_error_reported", count, limit_hit);

        if let Some(note) = self.session.note_error(count) {
            if self.config.history_enabled {
                self.history.record_error(&note);
                self.persist_history();
            }
        }
        if self.config.beep_on_error {
            self.alerts
                .alert(if limit_hit { Tone::LIMIT } else { Tone::ERROR });
        }
        if self.config.stop_on_error && limit_hit {
            return self.stop();
        }
        false
    }

    fn refresh_memory(&mut self) {
        let Some(snapshot) = self.system.snapshot() else {
            return;
        };
        self.memory.total_mb = snapshot.total_mb;
        if snapshot.free_mb.abs_diff(self.memory.free_mb) > MEMORY_REFRESH_THRESHOLD_MB {
            self.memory.free_mb = snapshot.free_mb;
            self.system.reclaim();
        }
    }

    fn refresh_idle_metrics(&mut self) {
        if self.config.size_is_auto {
            self.auto_size_mb =
                metrics::auto_size(self.memory.free_mb, self.config.size_percent, self.config.threads);
        }
        self.memory_usage_percent =
            metrics::usage_percent(u64::from(self.test_size()), self.memory.total_mb);
    }

    /// Applies `change`, then persists exactly the keys it touched.
    fn mutate_config<R>(&mut self, change: impl FnOnce(&mut Configuration) -> R) -> R {
        let before = self.config.clone();
        let result = change(&mut self.config);
        let changed = before.changed_keys(&self.config);
        if !changed.is_empty() {
            debug!(event = "config_changed", keys = ?changed);
            self.config.store_keys(self.settings.as_mut(), &changed);
            self.flush_settings();
            if !self.session.state.is_running() {
                self.refresh_idle_metrics();
            }
        }
        result
    }

    fn running_coverage_percent(&self) -> Option<f64> {
        self.session
            .state
            .is_running()
            .then(|| self.session.metrics.coverage_percent())
    }

    pub fn set_size_auto(&mut self, auto: bool) {
        self.mutate_config(|config| config.size_is_auto = auto);
    }

    /// Clamped to `1..=total` memory; remembered for manual mode.
    pub fn set_size_megabytes(&mut self, megabytes: u32) {
        let total = u32::try_from(self.memory.total_mb).unwrap_or(u32::MAX);
        let megabytes = if total > 0 {
            megabytes.clamp(1, total)
        } else {
            megabytes.max(1)
        };
        self.mutate_config(|config| config.size_megabytes = megabytes);
    }

    pub fn set_size_percent(&mut self, percent: u32) {
        let percent = percent.clamp(crate::config::MIN_SIZE_PERCENT, crate::config::MAX_SIZE_PERCENT);
        self.mutate_config(|config| config.size_percent = percent);
    }

    pub fn set_threads(&mut self, threads: u32) -> Option<ConfigWarning> {
        let cpu_count = self.cpu_count;
        let warning = self.mutate_config(|config| config.set_threads(threads, cpu_count));
        if let Some(warning) = &warning {
            warn!(event = "config_threads_clamped", %warning);
        }
        warning
    }

    pub fn set_cpu_cache_mode(&mut self, mode: CpuCacheMode) {
        self.mutate_config(|config| config.cpu_cache_mode = mode);
    }

    pub fn set_rng_mode(&mut self, mode: RngMode) {
        self.mutate_config(|config| config.rng_mode = mode);
    }

    pub fn set_stress_fpu(&mut self, enabled: bool) {
        self.mutate_config(|config| config.stress_fpu = enabled);
    }

    pub fn set_coverage_limit(&mut self, limit: u32) {
        let running = self.running_coverage_percent();
        self.mutate_config(|config| config.set_coverage_limit(limit, running));
    }

    /// Refuses to enable the stop while a run has already passed the limit.
    pub fn set_stop_on_coverage(&mut self, enabled: bool) -> Option<ConfigWarning> {
        let running = self.running_coverage_percent();
        let warning = self.mutate_config(|config| match running {
            Some(coverage) if enabled && f64::from(config.coverage_limit) < coverage.trunc() => {
                config.stop_on_coverage = false;
                Some(ConfigWarning::CoverageBelowProgress {
                    limit: config.coverage_limit,
                    coverage_percent: coverage as u32,
                })
            }
            _ => {
                config.stop_on_coverage = enabled;
                None
            }
        });
        if let Some(warning) = &warning {
            warn!(event = "coverage_stop_refused", %warning);
        }
        warning
    }

    pub fn set_error_limit(&mut self, limit: u32) {
        self.mutate_config(|config| config.set_error_limit(limit));
    }

    pub fn set_stop_on_error(&mut self, enabled: bool) {
        self.mutate_config(|config| config.stop_on_error = enabled);
    }

    pub fn set_beep_on_error(&mut self, enabled: bool) {
        self.mutate_config(|config| config.beep_on_error = enabled);
    }

    pub fn set_max_speed_delay(&mut self, delay: u32) {
        let delay = delay.min(crate::config::MAX_SPEED_DELAY);
        self.mutate_config(|config| config.max_speed_delay = delay);
    }

    pub fn set_history_enabled(&mut self, enabled: bool) {
        self.mutate_config(|config| config.history_enabled = enabled);
    }

    /// Returns true when the scheduler must re-arm with the new period.
    pub fn set_poll_interval(&mut self, interval_ms: u32) -> bool {
        if !(MIN_POLL_INTERVAL_MS..=MAX_POLL_INTERVAL_MS).contains(&interval_ms)
            || interval_ms == self.config.poll_interval_ms
        {
            return false;
        }
        self.mutate_config(|config| config.poll_interval_ms = clamp_poll_interval(interval_ms));
        true
    }

    /// Restores default configuration. History is kept.
    pub fn reset_defaults(&mut self) {
        let cpu_count = self.cpu_count;
        self.mutate_config(|config| {
            *config = Configuration::default();
            config.threads = validate_threads(config.threads, cpu_count).0;
        });
        info!(event = "config_reset_defaults");
    }

    pub fn clear_history(&mut self) -> bool {
        if self.history.buffer().is_empty() {
            return false;
        }
        self.history.clear();
        self.persist_history();
        true
    }

    pub fn remove_last_history_entry(&mut self) -> bool {
        let removed = self.history.remove_last_entry();
        if removed {
            self.persist_history();
        }
        removed
    }

    pub fn restore_history(&mut self) -> bool {
        let restored = self.history.restore_from_sink();
        if restored {
            self.persist_history();
        }
        restored
    }

    /// Stops a running test and flushes settings. Safe to call repeatedly.
    pub fn shutdown(&mut self) {
        if self.can_stop() && !self.stop() {
            warn!(event = "shutdown_stop_failed");
        }
        self.flush_settings();
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let model = &self.session.metrics;
        let size_mb = self.test_size();
        let threads = if self.session.state.is_running() {
            self.session.threads
        } else {
            self.config.threads
        };
        let finished_in = if self.config.stop_on_coverage {
            model.finished_in(self.config.coverage_limit, size_mb)
        } else {
            None
        };
        StatusSnapshot {
            state: self.session.state,
            size_mode: self.config.size_mode(),
            size_mb,
            threads,
            size_per_thread_mb: metrics::size_per_thread(size_mb, threads),
            memory: self.memory,
            free_memory_percent: self.memory.free_percent(),
            memory_usage_percent: self.memory_usage_percent,
            coverage_percent: model.coverage_percent(),
            speed_mbps: model.speed,
            max_speed_mbps: model.max_speed,
            duration_secs: model.duration.as_secs_f64(),
            error_count: model.error_count,
            next_full_coverage_percent: model.next_full_coverage_percent(),
            next_full_coverage_in_secs: model
                .next_full_coverage_in(size_mb)
                .map(|d| d.as_secs_f64()),
            finished_in_secs: finished_in.map(|d| d.as_secs_f64()),
            auto_start_pending: self.pending_auto_start,
        }
    }

    fn persist_history(&mut self) {
        let text = self.history.buffer().to_string();
        self.settings.put(HISTORY_LOG_KEY, SettingValue::Text(text));
        self.flush_settings();
    }

    fn persist_all(&mut self) {
        self.config.store(self.settings.as_mut());
        self.persist_history();
    }

    fn flush_settings(&mut self) {
        if let Err(err) = self.settings.flush() {
            warn!(event = "settings_flush_failed", error = %err);
        }
    }
}
