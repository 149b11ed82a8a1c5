use crate::config::RuntimeConfig;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

const LOG_FILE_NAME: &str = "kgx.log";

/// Keeps the log file handle alive for the lifetime of `main`.
pub struct LogGuard {
    file: Option<Arc<Mutex<File>>>,
}

/// Installs the global subscriber. Status output owns stdout, so logs go to
/// stderr when `KGX_LOG_STDOUT` is set and to the state-dir log file
/// otherwise.
pub fn init_logging(config: &RuntimeConfig) -> Option<LogGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let guard = if config.log_stdout {
        LogGuard { file: None }
    } else {
        match open_log_file(&config.log_dir) {
            Ok(guard) => guard,
            Err(err) => {
                eprintln!("log_file_error: {err}");
                LogGuard { file: None }
            }
        }
    };
    let file = guard.file.clone();
    let to_stderr = config.log_stdout;
    let make_writer = BoxMakeWriter::new(move || LogWriter::new(file.clone(), to_stderr));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(make_writer)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(guard)
}

fn open_log_file(dir: &Path) -> io::Result<LogGuard> {
    fs::create_dir_all(dir)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE_NAME))?;
    Ok(LogGuard {
        file: Some(Arc::new(Mutex::new(file))),
    })
}

struct LogWriter {
    file: Option<Arc<Mutex<File>>>,
    to_stderr: bool,
}

impl LogWriter {
    fn new(file: Option<Arc<Mutex<File>>>, to_stderr: bool) -> Self {
        Self { file, to_stderr }
    }
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.to_stderr {
            let _ = io::stderr().write_all(buf);
        }
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.write_all(buf);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.to_stderr {
            let _ = io::stderr().flush();
        }
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
        Ok(())
    }
}
