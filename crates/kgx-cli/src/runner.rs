//! Poll scheduler: drives `Controller::tick` from a tokio interval until the
//! run finishes, nothing is left to do, or Ctrl-C arrives.

use crate::status::{self, StatusFormat};
use kgx_core::{Controller, Engine, StartBlocker, SystemMemory};
use std::time::Duration;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub status_interval: Duration,
    pub status_format: StatusFormat,
    /// How long a pending auto-start may wait for the start guard.
    pub start_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// No start was requested.
    Idle,
    /// A start was requested but the guard kept refusing it until the
    /// start timeout ran out.
    Blocked(Vec<StartBlocker>),
    /// The guard passed but the engine did not start.
    EngineRefused,
    Finished { error_count: u32 },
    Interrupted { error_count: u32 },
}

impl RunOutcome {
    pub fn exit_code(&self) -> u8 {
        match self {
            RunOutcome::Idle => 0,
            RunOutcome::Finished { error_count: 0 } => 0,
            RunOutcome::Finished { .. } => 1,
            RunOutcome::Blocked(_) | RunOutcome::EngineRefused => 2,
            RunOutcome::Interrupted { .. } => 130,
        }
    }
}

fn poll_ticker(period: Duration) -> Interval {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

pub async fn run<E: Engine, M: SystemMemory>(
    controller: &mut Controller<E, M>,
    options: RunOptions,
) -> RunOutcome {
    let mut period = controller.poll_interval();
    let mut ticker = poll_ticker(period);
    let mut status_ticker = time::interval_at(
        Instant::now() + options.status_interval,
        options.status_interval,
    );
    status_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let start_requested = controller.auto_start_pending();
    let waiting_since = Instant::now();
    let mut ran = false;
    let mut wait_logged = false;

    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(err) = result {
                    warn!(event = "signal_error", error = %err);
                }
                info!(event = "shutdown_requested", running = controller.state().is_running());
                controller.shutdown();
                return if ran {
                    RunOutcome::Interrupted {
                        error_count: controller.session().metrics.error_count,
                    }
                } else {
                    RunOutcome::Idle
                };
            }
            _ = ticker.tick() => {
                let report = controller.tick(std::time::Instant::now());
                if report.started {
                    ran = true;
                    emit(controller, options.status_format);
                }
                if report.new_errors.is_some() {
                    if let Some(line) = controller.session().error_log.last() {
                        println!("{line}");
                    }
                }
                if report.stopped {
                    emit(controller, options.status_format);
                }

                if ran && !controller.state().is_running() {
                    return RunOutcome::Finished {
                        error_count: controller.session().metrics.error_count,
                    };
                }
                if !ran {
                    if !controller.auto_start_pending() {
                        return if start_requested {
                            RunOutcome::EngineRefused
                        } else {
                            RunOutcome::Idle
                        };
                    }
                    let blockers = controller.start_blockers();
                    if waiting_since.elapsed() >= options.start_timeout {
                        return RunOutcome::Blocked(blockers);
                    }
                    if !wait_logged {
                        wait_logged = true;
                        info!(event = "start_waiting", blockers = ?blockers);
                    }
                }

                let next = controller.poll_interval();
                if next != period {
                    debug!(event = "poll_rearmed", period_ms = next.as_millis() as u64);
                    period = next;
                    ticker = poll_ticker(period);
                }
            }
            _ = status_ticker.tick() => {
                if controller.state().is_running() {
                    emit(controller, options.status_format);
                }
            }
        }
    }
}

fn emit<E: Engine, M: SystemMemory>(controller: &Controller<E, M>, format: StatusFormat) {
    println!("{}", status::render(&controller.snapshot(), format));
}
