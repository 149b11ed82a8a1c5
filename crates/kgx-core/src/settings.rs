use crate::config::{Configuration, SettingKey, SettingValue};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("settings encode error: {0}")]
    Encode(String),
}

/// Flat key/value persistence for [`Configuration`] and the history buffer.
pub trait SettingsBackend {
    fn get(&self, key: &str) -> Option<SettingValue>;
    fn put(&mut self, key: &str, value: SettingValue);
    fn flush(&mut self) -> Result<(), SettingsError>;
}

impl Configuration {
    /// Builds a configuration from defaults overlaid with whatever the
    /// backend holds.
    pub fn load(backend: &dyn SettingsBackend) -> Self {
        let mut config = Configuration::default();
        for key in SettingKey::ALL {
            if let Some(value) = backend.get(key.as_str()) {
                config.assign(key, &value);
            }
        }
        config
    }

    pub fn store(&self, backend: &mut dyn SettingsBackend) {
        for key in SettingKey::ALL {
            backend.put(key.as_str(), self.value_of(key));
        }
    }

    pub fn store_keys(&self, backend: &mut dyn SettingsBackend, keys: &[SettingKey]) {
        for key in keys {
            backend.put(key.as_str(), self.value_of(*key));
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemorySettings {
    values: BTreeMap<String, SettingValue>,
    flushes: usize,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flush_count(&self) -> usize {
        self.flushes
    }

    pub fn values(&self) -> &BTreeMap<String, SettingValue> {
        &self.values
    }
}

impl SettingsBackend for MemorySettings {
    fn get(&self, key: &str) -> Option<SettingValue> {
        self.values.get(key).cloned()
    }

    fn put(&mut self, key: &str, value: SettingValue) {
        self.values.insert(key.to_string(), value);
    }

    fn flush(&mut self) -> Result<(), SettingsError> {
        self.flushes += 1;
        Ok(())
    }
}
