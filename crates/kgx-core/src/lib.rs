pub mod alert;
pub mod args;
pub mod config;
pub mod controller;
pub mod engine;
pub mod history;
pub mod metrics;
pub mod session;
pub mod settings;
pub mod system;

pub use alert::{AlertSink, SilentAlerts, Tone};
pub use args::{parse as parse_args, ArgError, ArgsOutcome, ConfigDelta, ParsedArgs};
pub use config::{
    ConfigWarning, Configuration, CpuCacheMode, RngMode, SettingKey, SettingValue, SizeMode,
    HISTORY_LOG_KEY,
};
pub use controller::{Controller, StartupReport, StatusSnapshot, TickReport};
pub use engine::{Engine, SimulatedEngine};
#[cfg(feature = "native-engine")]
pub use engine::NativeEngine;
pub use history::{HistoryRecorder, HistorySink, MemorySink};
pub use metrics::MetricModel;
pub use session::{RunSummary, Session, SessionState, StartBlocker};
pub use settings::{MemorySettings, SettingsBackend, SettingsError};
pub use system::{MemorySnapshot, PlatformMemory, SystemMemory};
