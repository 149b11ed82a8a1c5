use serde::Serialize;
use std::time::Duration;

/// Telemetry of the current (or last) run. Frozen once the run leaves
/// Running; reset at the next start.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricModel {
    /// Fraction of the test size covered; 1.0 == 100 %.
    pub coverage: f64,
    /// MB/s over the whole run.
    pub speed: f64,
    pub max_speed: f64,
    #[serde(with = "duration_secs")]
    pub duration: Duration,
    pub error_count: u32,
}

impl MetricModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one engine sample into the model. The max speed only tracks
    /// once coverage has reached `max_speed_delay` percent.
    pub fn record_sample(
        &mut self,
        coverage: f64,
        error_count: u32,
        elapsed: Duration,
        size_mb: u32,
        max_speed_delay: u32,
    ) {
        self.coverage = coverage.max(self.coverage);
        self.error_count = error_count.max(self.error_count);
        self.duration = elapsed;
        self.speed = compute_speed(self.coverage, size_mb, elapsed);
        self.max_speed = if self.coverage_percent() >= max_speed_delay as f64 {
            self.speed.max(self.max_speed)
        } else {
            0.0
        };
    }

    pub fn coverage_percent(&self) -> f64 {
        self.coverage * 100.0
    }

    pub fn clamp_coverage(&mut self, limit_percent: u32) {
        self.coverage = limit_percent as f64 / 100.0;
    }

    pub fn next_full_coverage_percent(&self) -> f64 {
        100.0 * (self.coverage + 1.0).floor()
    }

    /// Seconds until coverage reaches the next whole multiple of 100 %.
    pub fn next_full_coverage_in(&self, size_mb: u32) -> Option<Duration> {
        let remaining = self.next_full_coverage_percent() - self.coverage_percent();
        self.remaining_time(remaining, size_mb)
    }

    pub fn finished_in(&self, coverage_limit: u32, size_mb: u32) -> Option<Duration> {
        let remaining = coverage_limit as f64 - self.coverage_percent();
        self.remaining_time(remaining, size_mb)
    }

    fn remaining_time(&self, remaining_percent: f64, size_mb: u32) -> Option<Duration> {
        if self.speed <= 0.0 || remaining_percent < 0.0 {
            return None;
        }
        let seconds = 0.01 * remaining_percent * size_mb as f64 / self.speed;
        Duration::try_from_secs_f64(seconds).ok()
    }
}

pub fn compute_speed(coverage: f64, size_mb: u32, elapsed: Duration) -> f64 {
    let seconds = elapsed.as_secs_f64();
    if seconds <= 0.0 {
        return 0.0;
    }
    coverage * size_mb as f64 / seconds
}

/// Largest multiple of `threads` not above `percent` of free memory.
pub fn auto_size(free_mb: u64, percent: u32, threads: u32) -> u32 {
    let threads = u64::from(threads.max(1));
    let budget = free_mb * u64::from(percent) / 100;
    let size = budget / threads * threads;
    u32::try_from(size).unwrap_or(u32::MAX / threads as u32 * threads as u32)
}

pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub fn usage_percent(part_mb: u64, total_mb: u64) -> f64 {
    if total_mb == 0 {
        return 0.0;
    }
    round1(part_mb as f64 / total_mb as f64 * 100.0)
}

pub fn size_per_thread(size_mb: u32, threads: u32) -> f64 {
    round1(size_mb as f64 / threads.max(1) as f64)
}

/// `d:hh:mm:ss`, as written to the history log.
pub fn format_duration_long(duration: Duration) -> String {
    let total = duration.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;
    format!("{days}:{hours:02}:{minutes:02}:{seconds:02}")
}

/// `hh:mm:ss`, prefixed with `d:` once a day has passed.
pub fn format_duration_short(duration: Duration) -> String {
    let total = duration.as_secs();
    if total >= 86_400 {
        return format_duration_long(duration);
    }
    let hours = total / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }
}
