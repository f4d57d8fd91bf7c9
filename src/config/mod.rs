/// TOML configuration with per-mode defaults
#[allow(clippy::module_inception)]
mod config;

pub use config::{
    AlertsConfig, BackendConfig, BufferConfig, Config, DisplayConfig, FeedsConfig,
    LocationConfig, LocationSource, Mode, MAX_DURATION_SECS, PersistenceConfig, PushConfig,
};
