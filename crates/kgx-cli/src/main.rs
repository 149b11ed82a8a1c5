mod alert;
mod config;
mod help;
mod logging;
mod runner;
mod status;

use alert::BellAlert;
use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use config::{EngineKind, RuntimeConfig};
use kgx_core::{Controller, Engine, PlatformMemory, SimulatedEngine};
use kgx_storage::{HistoryLogFile, RecoveryOutcome, StorageError, TomlSettingsStore};
use runner::{RunOptions, RunOutcome};
use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use tracing::{error, info};

const CONFIG_ERROR_EXIT: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "kgx")]
#[command(about = "Memory stress test controller", long_about = None)]
#[command(disable_help_flag = true, disable_version_flag = true)]
#[command(after_help = help::PARAMETERS)]
struct Cli {
    /// Test parameters, e.g. -size 50% -threads auto --fpu
    #[arg(num_args = 0.., trailing_var_arg = true, allow_hyphen_values = true)]
    tokens: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if help::is_help_request(&cli.tokens) {
        let _ = Cli::command().print_help();
        return ExitCode::SUCCESS;
    }

    let config = RuntimeConfig::from_env();
    let _log_guard = logging::init_logging(&config);
    match run(cli, &config).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            error!(event = "kgx_error", error = %format!("{err:#}"));
            eprintln!("kgx: {err:#}");
            ExitCode::from(CONFIG_ERROR_EXIT)
        }
    }
}

async fn run(cli: Cli, config: &RuntimeConfig) -> Result<u8> {
    let (settings, recovery) =
        TomlSettingsStore::open_with_recovery(&config.settings_path, |err| {
            confirm_recovery(err, config.assume_yes)
        })
        .with_context(|| format!("open settings {}", config.settings_path.display()))?;
    if recovery != RecoveryOutcome::Loaded {
        eprintln!("Settings recovered ({recovery:?}).");
    }
    let history = HistoryLogFile::open(&config.history_path)
        .with_context(|| format!("open history log {}", config.history_path.display()))?;
    let engine = build_engine(config)?;

    let mut controller = Controller::new(
        engine,
        PlatformMemory::new(),
        Box::new(settings),
        Box::new(history),
        Box::new(BellAlert::new()),
    );
    info!(
        event = "kgx_start",
        engine = ?config.engine,
        settings = %config.settings_path.display(),
        history = %config.history_path.display(),
        cpu_count = controller.cpu_count()
    );

    let report = controller.apply_startup_args(&cli.tokens);
    if let Some(message) = report.error_message() {
        controller.shutdown();
        eprintln!("{message}\n\n{}", help::USAGE_HINT);
        return Ok(CONFIG_ERROR_EXIT);
    }
    for warning in &report.warnings {
        eprintln!("warning: {warning}");
    }
    if report.restored_history {
        println!("History restored from {}.", config.history_path.display());
    }

    let options = RunOptions {
        status_interval: config.status_interval,
        status_format: config.status_format,
        start_timeout: config.start_timeout,
    };
    let outcome = runner::run(&mut controller, options).await;
    match &outcome {
        RunOutcome::Idle => {
            println!("{}", status::render(&controller.snapshot(), options.status_format));
            for entry in controller.history().entries() {
                println!("\n{entry}");
            }
        }
        RunOutcome::Blocked(blockers) => {
            eprintln!("Cannot start the test:");
            for blocker in blockers {
                eprintln!("  - {blocker}");
            }
        }
        RunOutcome::EngineRefused => eprintln!("The test engine refused to start."),
        RunOutcome::Finished { .. } | RunOutcome::Interrupted { .. } => {
            if let Some(entry) = controller.history().entries().last() {
                println!("\n{entry}");
            }
        }
    }
    controller.shutdown();
    info!(event = "kgx_exit", outcome = ?outcome);
    Ok(outcome.exit_code())
}

fn build_engine(config: &RuntimeConfig) -> Result<Box<dyn Engine>> {
    match config.engine {
        EngineKind::Simulated => Ok(Box::new(
            SimulatedEngine::new(config.sim_throughput_mbps)
                .with_error_schedule(config.sim_errors.clone()),
        )),
        #[cfg(feature = "native-engine")]
        EngineKind::Native => Ok(Box::new(kgx_core::NativeEngine::new())),
        #[cfg(not(feature = "native-engine"))]
        EngineKind::Native => anyhow::bail!("kgx was built without the native-engine feature"),
    }
}

/// Asks on stderr whether a corrupted settings file may be replaced.
fn confirm_recovery(err: &StorageError, assume_yes: bool) -> bool {
    eprintln!("{err}");
    if assume_yes {
        return true;
    }
    eprint!("Restore settings from backup (or defaults)? [y/N] ");
    let _ = io::stderr().flush();
    let mut answer = String::new();
    if io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    config::is_truthy(&answer) || answer.trim().eq_ignore_ascii_case("y")
}
