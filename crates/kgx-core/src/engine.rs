//! The stress-test engine boundary.

use crate::config::{CpuCacheMode, RngMode, MAX_THREADS};
use std::time::Instant;
use tracing::debug;

/// Operations the controller consumes from a stress-test engine. All calls
/// are synchronous and cheap enough to make at tick cadence.
pub trait Engine {
    fn start_test(&mut self, megabytes: u32, threads: u32) -> bool;
    fn stop_test(&mut self) -> bool;
    fn set_cpu_cache(&mut self, mode: CpuCacheMode);
    fn set_rng(&mut self, mode: RngMode);
    fn set_stress_fpu(&mut self, enabled: bool);
    /// Covered fraction of the test size; 1.0 is one full pass.
    fn coverage(&self) -> f64;
    fn error_count(&self) -> u32;
}

impl<E: Engine + ?Sized> Engine for Box<E> {
    fn start_test(&mut self, megabytes: u32, threads: u32) -> bool {
        (**self).start_test(megabytes, threads)
    }

    fn stop_test(&mut self) -> bool {
        (**self).stop_test()
    }

    fn set_cpu_cache(&mut self, mode: CpuCacheMode) {
        (**self).set_cpu_cache(mode)
    }

    fn set_rng(&mut self, mode: RngMode) {
        (**self).set_rng(mode)
    }

    fn set_stress_fpu(&mut self, enabled: bool) {
        (**self).set_stress_fpu(enabled)
    }

    fn coverage(&self) -> f64 {
        (**self).coverage()
    }

    fn error_count(&self) -> u32 {
        (**self).error_count()
    }
}

pub const DEFAULT_SIM_THROUGHPUT_MBPS: f64 = 2_000.0;

#[derive(Debug, Clone, Copy)]
struct SimRun {
    started_at: Instant,
    megabytes: u32,
}

/// Clock-driven engine: coverage grows at a fixed throughput and errors
/// fire at scheduled coverage fractions.
#[derive(Debug, Clone)]
pub struct SimulatedEngine {
    throughput_mbps: f64,
    error_schedule: Vec<f64>,
    run: Option<SimRun>,
    frozen_coverage: f64,
    cpu_cache: CpuCacheMode,
    rng: RngMode,
    stress_fpu: bool,
}

impl Default for SimulatedEngine {
    fn default() -> Self {
        Self::new(DEFAULT_SIM_THROUGHPUT_MBPS)
    }
}

impl SimulatedEngine {
    pub fn new(throughput_mbps: f64) -> Self {
        Self {
            throughput_mbps: throughput_mbps.max(0.0),
            error_schedule: Vec::new(),
            run: None,
            frozen_coverage: 0.0,
            cpu_cache: CpuCacheMode::default(),
            rng: RngMode::default(),
            stress_fpu: false,
        }
    }

    /// Errors are reported once coverage passes each listed fraction.
    pub fn with_error_schedule(mut self, mut at_coverage: Vec<f64>) -> Self {
        at_coverage.sort_by(|a, b| a.total_cmp(b));
        self.error_schedule = at_coverage;
        self
    }

    pub fn is_running(&self) -> bool {
        self.run.is_some()
    }

    pub fn modes(&self) -> (CpuCacheMode, RngMode, bool) {
        (self.cpu_cache, self.rng, self.stress_fpu)
    }

    pub fn coverage_at(&self, now: Instant) -> f64 {
        match self.run {
            Some(run) if run.megabytes > 0 => {
                let elapsed = now.saturating_duration_since(run.started_at).as_secs_f64();
                elapsed * self.throughput_mbps / f64::from(run.megabytes)
            }
            _ => self.frozen_coverage,
        }
    }

    pub fn errors_at(&self, now: Instant) -> u32 {
        let coverage = self.coverage_at(now);
        let hits = self
            .error_schedule
            .iter()
            .take_while(|at| **at <= coverage)
            .count();
        u32::try_from(hits).unwrap_or(u32::MAX)
    }
}

impl Engine for SimulatedEngine {
    fn start_test(&mut self, megabytes: u32, threads: u32) -> bool {
        if self.run.is_some() || megabytes == 0 || !(1..=MAX_THREADS).contains(&threads) {
            return false;
        }
        debug!(event = "sim_engine_started", megabytes, threads);
        self.frozen_coverage = 0.0;
        self.run = Some(SimRun {
            started_at: Instant::now(),
            megabytes,
        });
        true
    }

    fn stop_test(&mut self) -> bool {
        if self.run.is_none() {
            return false;
        }
        self.frozen_coverage = self.coverage_at(Instant::now());
        self.run = None;
        debug!(event = "sim_engine_stopped", coverage = self.frozen_coverage);
        true
    }

    fn set_cpu_cache(&mut self, mode: CpuCacheMode) {
        self.cpu_cache = mode;
    }

    fn set_rng(&mut self, mode: RngMode) {
        self.rng = mode;
    }

    fn set_stress_fpu(&mut self, enabled: bool) {
        self.stress_fpu = enabled;
    }

    fn coverage(&self) -> f64 {
        self.coverage_at(Instant::now())
    }

    fn error_count(&self) -> u32 {
        self.errors_at(Instant::now())
    }
}

#[cfg(feature = "native-engine")]
pub use native::NativeEngine;

#[cfg(feature = "native-engine")]
mod native {
    use super::Engine;
    use crate::config::{CpuCacheMode, RngMode};
    use std::os::raw::c_int;

    #[link(name = "ramtest")]
    extern "system" {
        fn StartTest(megabytes: u32, threads: u32) -> c_int;
        fn StopTest() -> c_int;
        fn SetCpuCache(mode: c_int);
        fn SetRng(mode: c_int);
        fn SetStressFpu(enabled: c_int);
        fn GetCoverage() -> f64;
        fn GetErrorCount() -> u32;
    }

    /// Binding to the `ramtest` shared library.
    #[derive(Debug, Default)]
    pub struct NativeEngine {
        _private: (),
    }

    impl NativeEngine {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl Engine for NativeEngine {
        fn start_test(&mut self, megabytes: u32, threads: u32) -> bool {
            // SAFETY: plain integer arguments; the library validates ranges.
            unsafe { StartTest(megabytes, threads) != 0 }
        }

        fn stop_test(&mut self) -> bool {
            // SAFETY: no arguments; safe to call when no test is running.
            unsafe { StopTest() != 0 }
        }

        fn set_cpu_cache(&mut self, mode: CpuCacheMode) {
            // SAFETY: mode index is within the library's enum range (0..=3).
            unsafe { SetCpuCache(mode.index() as c_int) }
        }

        fn set_rng(&mut self, mode: RngMode) {
            // SAFETY: mode index is within the library's enum range (0..=1).
            unsafe { SetRng(mode.index() as c_int) }
        }

        fn set_stress_fpu(&mut self, enabled: bool) {
            // SAFETY: BOOL-sized flag.
            unsafe { SetStressFpu(c_int::from(enabled)) }
        }

        fn coverage(&self) -> f64 {
            // SAFETY: read-only query.
            unsafe { GetCoverage() }
        }

        fn error_count(&self) -> u32 {
            // SAFETY: read-only query.
            unsafe { GetErrorCount() }
        }
    }
}
