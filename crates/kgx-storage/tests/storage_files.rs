use kgx_core::config::HISTORY_LOG_KEY;
use kgx_core::history::HistorySink;
use kgx_core::{
    Configuration, Controller, CpuCacheMode, MemorySnapshot, SettingValue, SettingsBackend,
    SilentAlerts, SimulatedEngine, SystemMemory,
};
use kgx_storage::{HistoryLogFile, RecoveryOutcome, StorageError, TomlSettingsStore};
use std::fs;
use std::time::Instant;

struct FixedMemory;

impl SystemMemory for FixedMemory {
    fn snapshot(&self) -> Option<MemorySnapshot> {
        Some(MemorySnapshot {
            total_mb: 16_000,
            free_mb: 8_000,
        })
    }

    fn logical_cpus(&self) -> u32 {
        4
    }
}

#[test]
fn settings_round_trip_through_toml() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("kgx/settings.toml");

    let mut store = TomlSettingsStore::open(&path).expect("open");
    let mut config = Configuration::default();
    config.threads = 3;
    config.cpu_cache_mode = CpuCacheMode::Enabled;
    config.history_enabled = false;
    config.store(&mut store);
    store.put(HISTORY_LOG_KEY, SettingValue::Text("[a]\n\tline\n".to_string()));
    store.flush().expect("flush");

    let reopened = TomlSettingsStore::open(&path).expect("reopen");
    assert_eq!(Configuration::load(&reopened), config);
    assert_eq!(
        reopened.get(HISTORY_LOG_KEY),
        Some(SettingValue::Text("[a]\n\tline\n".to_string()))
    );
    assert!(reopened.backup_path().exists());
}

#[test]
fn corrupt_settings_restore_from_backup_when_confirmed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("settings.toml");

    let mut store = TomlSettingsStore::open(&path).expect("open");
    store.put("threads", SettingValue::UInt(5));
    store.flush().expect("flush");
    drop(store);
    TomlSettingsStore::open(&path).expect("load refreshes backup");

    fs::write(&path, "threads = [[[").expect("corrupt");
    let (store, outcome) =
        TomlSettingsStore::open_with_recovery(&path, |_| true).expect("recover");
    assert_eq!(outcome, RecoveryOutcome::RestoredFromBackup);
    assert_eq!(store.get("threads"), Some(SettingValue::UInt(5)));
}

#[test]
fn corrupt_settings_without_backup_fall_back_to_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("settings.toml");
    fs::write(&path, "not toml at all = =").expect("corrupt");

    let (store, outcome) =
        TomlSettingsStore::open_with_recovery(&path, |_| true).expect("recover");
    assert_eq!(outcome, RecoveryOutcome::Defaults);
    assert_eq!(Configuration::load(&store), Configuration::default());
    assert_eq!(fs::read_to_string(&path).expect("read").trim(), "");
}

#[test]
fn declined_recovery_leaves_file_untouched() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("settings.toml");
    fs::write(&path, "threads = -1").expect("write");

    let result = TomlSettingsStore::open_with_recovery(&path, |err| {
        assert!(matches!(err, StorageError::Corrupted { .. }));
        false
    });
    assert!(matches!(result, Err(StorageError::RecoveryDeclined)));
    assert_eq!(fs::read_to_string(&path).expect("read"), "threads = -1");
}

#[test]
fn history_log_is_exclusive_and_readable() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("state/history.log");

    let mut log = HistoryLogFile::open(&path).expect("open log");
    assert!(!log.has_entries());
    log.append("[x]\n > TESTING:\t1 MB / 1 threads\n").expect("append");
    log.append(" > STOPPED:\tCancelled").expect("append");
    assert!(log.has_entries());
    assert!(log.read_all().expect("read").ends_with("Cancelled"));

    assert!(matches!(
        HistoryLogFile::open(&path),
        Err(StorageError::Locked { .. })
    ));
    drop(log);
    assert!(HistoryLogFile::open(&path).is_ok());
}

#[test]
fn controller_persists_through_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings_path = dir.path().join("settings.toml");
    let log_path = dir.path().join("history.log");

    {
        let settings = TomlSettingsStore::open(&settings_path).expect("settings");
        let log = HistoryLogFile::open(&log_path).expect("log");
        let mut controller = Controller::new(
            SimulatedEngine::new(1_000.0),
            FixedMemory,
            Box::new(settings),
            Box::new(log),
            Box::new(SilentAlerts),
        );
        controller.set_threads(2);
        assert!(controller.start(Instant::now()));
        // Dropped without a stop: the next process must see a crash.
    }

    let settings = TomlSettingsStore::open(&settings_path).expect("settings");
    let log = HistoryLogFile::open(&log_path).expect("log");
    let controller = Controller::new(
        SimulatedEngine::default(),
        FixedMemory,
        Box::new(settings),
        Box::new(log),
        Box::new(SilentAlerts),
    );
    assert_eq!(controller.config().threads, 2);
    assert!(controller.history().buffer().ends_with("! CRASH !"));
    let on_disk = fs::read_to_string(&log_path).expect("read log");
    assert!(on_disk.contains("1000 MB / 2 threads"));
    assert!(on_disk.ends_with("! CRASH !"));
}
