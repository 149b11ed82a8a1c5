use crate::StorageError;
use kgx_core::settings::{SettingsBackend, SettingsError};
use kgx_core::SettingValue;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

type SettingsTable = BTreeMap<String, SettingValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    Loaded,
    RestoredFromBackup,
    Defaults,
}

/// Flat TOML table on disk. A `.bak` copy is refreshed after every
/// successful load so a corrupted file can be rolled back.
#[derive(Debug)]
pub struct TomlSettingsStore {
    path: PathBuf,
    values: SettingsTable,
}

impl TomlSettingsStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let values = read_table(&path)?;
        if path.exists() {
            if let Err(err) = fs::copy(&path, backup_path(&path)) {
                warn!(event = "settings_backup_failed", path = %path.display(), error = %err);
            }
        }
        debug!(event = "settings_loaded", path = %path.display(), keys = values.len());
        Ok(Self { path, values })
    }

    /// Opens the store; when the file is corrupted, `confirm` decides
    /// whether to replace it with the backup (or defaults when the backup
    /// is unusable too).
    pub fn open_with_recovery(
        path: impl AsRef<Path>,
        confirm: impl FnOnce(&StorageError) -> bool,
    ) -> Result<(Self, RecoveryOutcome), StorageError> {
        let path = path.as_ref();
        let err = match Self::open(path) {
            Ok(store) => return Ok((store, RecoveryOutcome::Loaded)),
            Err(err @ StorageError::Corrupted { .. }) => err,
            Err(err) => return Err(err),
        };
        warn!(event = "settings_corrupted", error = %err);
        if !confirm(&err) {
            return Err(StorageError::RecoveryDeclined);
        }

        let backup = backup_path(path);
        if let Ok(values) = read_table(&backup) {
            if backup.exists() {
                fs::copy(&backup, path)?;
                warn!(event = "settings_restored_from_backup", path = %path.display());
                return Ok((
                    Self {
                        path: path.to_path_buf(),
                        values,
                    },
                    RecoveryOutcome::RestoredFromBackup,
                ));
            }
        }

        let mut store = Self {
            path: path.to_path_buf(),
            values: SettingsTable::new(),
        };
        store.write()?;
        warn!(event = "settings_reset_to_defaults", path = %path.display());
        Ok((store, RecoveryOutcome::Defaults))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> PathBuf {
        backup_path(&self.path)
    }

    fn write(&mut self) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(&self.values)?;
        let tmp = self.path.with_extension("toml.tmp");
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl SettingsBackend for TomlSettingsStore {
    fn get(&self, key: &str) -> Option<SettingValue> {
        self.values.get(key).cloned()
    }

    fn put(&mut self, key: &str, value: SettingValue) {
        self.values.insert(key.to_string(), value);
    }

    fn flush(&mut self) -> Result<(), SettingsError> {
        self.write().map_err(|err| match err {
            StorageError::Io(io) => SettingsError::Io(io),
            other => SettingsError::Encode(other.to_string()),
        })
    }
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".bak");
    path.with_file_name(name)
}

fn read_table(path: &Path) -> Result<SettingsTable, StorageError> {
    if !path.exists() {
        return Ok(SettingsTable::new());
    }
    let contents = fs::read_to_string(path)?;
    toml::from_str(&contents).map_err(|source| StorageError::Corrupted {
        path: path.to_path_buf(),
        source,
    })
}
