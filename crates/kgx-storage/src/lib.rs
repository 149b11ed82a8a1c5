mod history_log;
mod settings_file;

pub use history_log::HistoryLogFile;
pub use settings_file::{RecoveryOutcome, TomlSettingsStore};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("settings file {path} is corrupted: {source}")]
    Corrupted {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("settings encode error: {0}")]
    Encode(#[from] toml::ser::Error),
    #[error("history log {path} is locked by another process")]
    Locked { path: PathBuf },
    #[error("settings recovery declined")]
    RecoveryDeclined,
}
