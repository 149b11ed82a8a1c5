use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tone {
    pub frequency_hz: u32,
    pub duration: Duration,
}

impl Tone {
    /// Short, high tone for each new error.
    pub const ERROR: Tone = Tone {
        frequency_hz: 1_550,
        duration: Duration::from_millis(150),
    };

    /// Longer, lower tone once the error limit is hit.
    pub const LIMIT: Tone = Tone {
        frequency_hz: 1_000,
        duration: Duration::from_millis(450),
    };
}

/// Audible notification. Implementations must return immediately and must
/// not touch controller state.
pub trait AlertSink {
    fn alert(&self, tone: Tone);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SilentAlerts;

impl AlertSink for SilentAlerts {
    fn alert(&self, _tone: Tone) {}
}
