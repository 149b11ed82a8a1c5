use kgx_core::{AlertSink, Tone};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::runtime::Handle;
use tracing::debug;

/// Gap between bells; a tone rings once per gap of its duration.
const BELL_SPACING: Duration = Duration::from_millis(150);

/// Terminal bell on stderr, played on a detached task.
#[derive(Debug, Clone)]
pub struct BellAlert {
    runtime: Option<Handle>,
}

impl BellAlert {
    pub fn new() -> Self {
        Self {
            runtime: Handle::try_current().ok(),
        }
    }
}

impl Default for BellAlert {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertSink for BellAlert {
    fn alert(&self, tone: Tone) {
        let Some(runtime) = &self.runtime else {
            debug!(event = "alert_skipped", reason = "no_runtime");
            return;
        };
        let rings = bell_count(tone);
        runtime.spawn(async move {
            let mut stderr = tokio::io::stderr();
            for ring in 0..rings {
                if ring > 0 {
                    tokio::time::sleep(BELL_SPACING).await;
                }
                if stderr.write_all(b"\x07").await.is_err() {
                    return;
                }
                let _ = stderr.flush().await;
            }
            debug!(event = "alert_played", frequency_hz = tone.frequency_hz, rings);
        });
    }
}

fn bell_count(tone: Tone) -> u32 {
    let rings = tone.duration.as_millis() / BELL_SPACING.as_millis();
    u32::try_from(rings).unwrap_or(u32::MAX).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longer_tones_ring_more() {
        assert_eq!(bell_count(Tone::ERROR), 1);
        assert_eq!(bell_count(Tone::LIMIT), 3);
    }

    #[test]
    fn alert_without_runtime_is_a_no_op() {
        BellAlert::new().alert(Tone::ERROR);
    }

    #[tokio::test]
    async fn alert_returns_immediately_inside_runtime() {
        let alert = BellAlert::new();
        let started = std::time::Instant::now();
        alert.alert(Tone::LIMIT);
        assert!(started.elapsed() < Tone::LIMIT.duration);
    }
}
