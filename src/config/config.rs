use crate::alerts::{AlertOrder, Thresholds};
use crate::error::ConfigError;
use crate::feeds::{PollFeedConfig, PushFeedConfig, ReconnectConfig};
use chrono::TimeDelta;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Upper bound for every configured duration, one week
pub const MAX_DURATION_SECS: u64 = 7 * 24 * 60 * 60;

/// Operating mode; selects defaults for buffer size, cadence and feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Live dashboard: all feeds, 1s synthetic cadence, 20-reading buffer
    #[default]
    Interactive,
    /// Offline simulation: synthetic feed only, 3s cadence, 60-reading buffer
    Simulation,
}

/// Application configuration loaded from TOML
///
/// Every section falls back to defaults, so an empty file is valid.
/// Settings left unset in `[buffer]` and `[feeds]` resolve per [`Mode`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Mode used when none is given on the command line
    pub mode: Option<Mode>,
    pub buffer: BufferConfig,
    pub feeds: FeedsConfig,
    pub push: PushConfig,
    pub alerts: AlertsConfig,
    pub thresholds: Thresholds,
    pub persistence: PersistenceConfig,
    pub backend: BackendConfig,
    pub location: LocationConfig,
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BufferConfig {
    /// Rolling buffer capacity; 20 interactive, 60 simulation when unset
    pub capacity: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FeedsConfig {
    /// Enabled in interactive mode, disabled in simulation mode when unset
    pub push_enabled: Option<bool>,
    /// Enabled in interactive mode, disabled in simulation mode when unset
    pub poll_enabled: Option<bool>,
    pub synthetic_enabled: bool,
    /// 1000 interactive, 3000 simulation when unset
    pub synthetic_interval_ms: Option<u64>,
    pub poll_interval_secs: u64,
    pub poll_limit: usize,
    pub fetch_timeout_secs: u64,
    /// Capacity of the channel between feeds and the ingest loop
    pub channel_capacity: usize,
}

impl Default for FeedsConfig {
    fn default() -> Self {
        Self {
            push_enabled: None,
            poll_enabled: None,
            synthetic_enabled: true,
            synthetic_interval_ms: None,
            poll_interval_secs: 30,
            poll_limit: 20,
            fetch_timeout_secs: 10,
            channel_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PushConfig {
    /// Reconnect with backoff after a failed or dropped subscription
    pub reconnect: bool,
    pub connect_timeout_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_secs: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            reconnect: true,
            connect_timeout_secs: 10,
            heartbeat_interval_secs: 30,
            initial_backoff_ms: 1000,
            max_backoff_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlertsConfig {
    pub capacity: usize,
    pub order: AlertOrder,
    /// Suppress repeats of the same condition within this window; 0 disables
    pub repeat_cooldown_secs: u64,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            capacity: 5,
            order: AlertOrder::NewestFirst,
            repeat_cooldown_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Write locally generated readings to the backend
    pub enabled: bool,
    pub queue_capacity: usize,
    pub write_timeout_secs: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_capacity: 64,
            write_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendConfig {
    pub schema: String,
    pub table: String,
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            schema: "public".to_string(),
            table: "health_data".to_string(),
            request_timeout_secs: 10,
        }
    }
}

/// Where the one-shot location lookup gets coordinates
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LocationSource {
    #[default]
    None,
    Fixed,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LocationConfig {
    pub provider: LocationSource,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub url: Option<String>,
    /// Decimal places kept when displaying coordinates
    pub precision: u32,
    pub timeout_secs: u64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            provider: LocationSource::None,
            latitude: None,
            longitude: None,
            url: None,
            precision: 1,
            timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DisplayConfig {
    pub status_interval_secs: u64,
    /// Engine stats are logged at this period; 0 disables
    pub stats_interval_secs: u64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            status_interval_secs: 5,
            stats_interval_secs: 60,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ReadError` if the file cannot be read,
    /// `ConfigError::TomlError` if it is not valid TOML for this schema, and
    /// `ConfigError::ValidationError` if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every value is usable
    ///
    /// Every duration is bounded by [`MAX_DURATION_SECS`] so that deadline
    /// arithmetic on timers and timestamps cannot overflow.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bounded = |value: u64, max: u64, name: &str| {
            if value > max {
                Err(ConfigError::ValidationError(format!(
                    "{} must be at most {}",
                    name, max
                )))
            } else {
                Ok(())
            }
        };
        let positive = |value: u64, name: &str| {
            if value == 0 {
                Err(ConfigError::ValidationError(format!(
                    "{} must be greater than zero",
                    name
                )))
            } else {
                bounded(value, MAX_DURATION_SECS, name)
            }
        };
        let positive_ms = |value: u64, name: &str| {
            if value == 0 {
                Err(ConfigError::ValidationError(format!(
                    "{} must be greater than zero",
                    name
                )))
            } else {
                bounded(value, MAX_DURATION_SECS * 1000, name)
            }
        };

        if self.buffer.capacity == Some(0) {
            return Err(ConfigError::ValidationError(
                "buffer.capacity must be greater than zero".to_string(),
            ));
        }
        if self.alerts.capacity == 0 {
            return Err(ConfigError::ValidationError(
                "alerts.capacity must be greater than zero".to_string(),
            ));
        }
        if self.feeds.poll_limit == 0 {
            return Err(ConfigError::ValidationError(
                "feeds.poll_limit must be greater than zero".to_string(),
            ));
        }
        if self.feeds.channel_capacity == 0 || self.persistence.queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "channel and queue capacities must be greater than zero".to_string(),
            ));
        }

        if let Some(ms) = self.feeds.synthetic_interval_ms {
            positive_ms(ms, "feeds.synthetic_interval_ms")?;
        }
        positive(self.feeds.poll_interval_secs, "feeds.poll_interval_secs")?;
        positive(self.feeds.fetch_timeout_secs, "feeds.fetch_timeout_secs")?;
        positive(self.push.connect_timeout_secs, "push.connect_timeout_secs")?;
        positive(self.push.heartbeat_interval_secs, "push.heartbeat_interval_secs")?;
        positive_ms(self.push.initial_backoff_ms, "push.initial_backoff_ms")?;
        positive(self.push.max_backoff_secs, "push.max_backoff_secs")?;
        positive(self.persistence.write_timeout_secs, "persistence.write_timeout_secs")?;
        positive(self.backend.request_timeout_secs, "backend.request_timeout_secs")?;
        positive(self.display.status_interval_secs, "display.status_interval_secs")?;
        positive(self.location.timeout_secs, "location.timeout_secs")?;
        bounded(
            self.display.stats_interval_secs,
            MAX_DURATION_SECS,
            "display.stats_interval_secs",
        )?;
        bounded(
            self.alerts.repeat_cooldown_secs,
            MAX_DURATION_SECS,
            "alerts.repeat_cooldown_secs",
        )?;

        if self.push.max_backoff_secs.saturating_mul(1000) < self.push.initial_backoff_ms {
            return Err(ConfigError::ValidationError(
                "push.max_backoff_secs must not be below push.initial_backoff_ms".to_string(),
            ));
        }

        let t = &self.thresholds;
        let all_finite = [
            t.heart_rate_low,
            t.heart_rate_high,
            t.spo2_low,
            t.air_quality_high,
            t.temperature_high,
        ]
        .iter()
        .all(|value| value.is_finite());
        if !all_finite {
            return Err(ConfigError::ValidationError(
                "thresholds must be finite numbers".to_string(),
            ));
        }
        if t.heart_rate_low >= t.heart_rate_high {
            return Err(ConfigError::ValidationError(
                "thresholds.heart_rate_low must be below thresholds.heart_rate_high".to_string(),
            ));
        }

        if self.location.precision > 10 {
            return Err(ConfigError::ValidationError(
                "location.precision must be at most 10".to_string(),
            ));
        }

        if self.backend.table.trim().is_empty() || self.backend.schema.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "backend.schema and backend.table must not be empty".to_string(),
            ));
        }

        match self.location.provider {
            LocationSource::Fixed
                if self.location.latitude.is_none() || self.location.longitude.is_none() =>
            {
                Err(ConfigError::ValidationError(
                    "location.provider = \"fixed\" requires latitude and longitude".to_string(),
                ))
            }
            LocationSource::Http if self.location.url.is_none() => Err(
                ConfigError::ValidationError("location.provider = \"http\" requires url".to_string()),
            ),
            _ => Ok(()),
        }
    }

    /// Mode from the command line, else the file, else interactive
    pub fn resolve_mode(&self, cli: Option<Mode>) -> Mode {
        cli.or(self.mode).unwrap_or_default()
    }

    /// Rolling buffer capacity, 20 interactive or 60 simulation unless set
    pub fn buffer_capacity(&self, mode: Mode) -> usize {
        self.buffer.capacity.unwrap_or(match mode {
            Mode::Interactive => 20,
            Mode::Simulation => 60,
        })
    }

    /// Synthetic feed period, 1s interactive or 3s simulation unless set
    pub fn synthetic_interval(&self, mode: Mode) -> Duration {
        Duration::from_millis(self.feeds.synthetic_interval_ms.unwrap_or(match mode {
            Mode::Interactive => 1000,
            Mode::Simulation => 3000,
        }))
    }

    /// Whether the push feed runs; defaults to interactive mode only
    pub fn push_enabled(&self, mode: Mode) -> bool {
        self.feeds
            .push_enabled
            .unwrap_or(mode == Mode::Interactive)
    }

    /// Whether the poll feed runs; defaults to interactive mode only
    pub fn poll_enabled(&self, mode: Mode) -> bool {
        self.feeds
            .poll_enabled
            .unwrap_or(mode == Mode::Interactive)
    }

    /// Whether the backend credentials are mandatory
    pub fn requires_backend(&self, mode: Mode) -> bool {
        self.push_enabled(mode) || self.poll_enabled(mode)
    }

    /// Cooldown for repeated alerts, zero when disabled
    pub fn repeat_cooldown(&self) -> TimeDelta {
        i64::try_from(self.alerts.repeat_cooldown_secs.min(MAX_DURATION_SECS))
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or_else(TimeDelta::zero)
    }

    /// Period of the stats summary log, `None` when disabled
    pub fn stats_interval(&self) -> Option<Duration> {
        match self.display.stats_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs.min(MAX_DURATION_SECS))),
        }
    }

    /// Poll feed settings
    pub fn poll_feed(&self) -> PollFeedConfig {
        PollFeedConfig {
            interval: Duration::from_secs(self.feeds.poll_interval_secs),
            limit: self.feeds.poll_limit,
            fetch_timeout: Duration::from_secs(self.feeds.fetch_timeout_secs),
        }
    }

    /// Push feed settings, including reconnect backoff
    pub fn push_feed(&self) -> PushFeedConfig {
        PushFeedConfig {
            reconnect: self.push.reconnect,
            connect_timeout: Duration::from_secs(self.push.connect_timeout_secs),
            backoff: ReconnectConfig {
                initial_delay: Duration::from_millis(self.push.initial_backoff_ms),
                max_delay: Duration::from_secs(self.push.max_backoff_secs),
                ..ReconnectConfig::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.alerts.capacity, 5);
        assert_eq!(config.alerts.order, AlertOrder::NewestFirst);
        assert_eq!(config.thresholds, Thresholds::default());
        assert_eq!(config.feeds.poll_interval_secs, 30);
        assert!(config.push.reconnect);
    }

    #[test]
    fn test_defaults_differ_by_mode() {
        let config = Config::default();

        assert_eq!(config.buffer_capacity(Mode::Interactive), 20);
        assert_eq!(config.buffer_capacity(Mode::Simulation), 60);
        assert_eq!(config.synthetic_interval(Mode::Interactive), Duration::from_secs(1));
        assert_eq!(config.synthetic_interval(Mode::Simulation), Duration::from_secs(3));
        assert!(config.requires_backend(Mode::Interactive));
        assert!(!config.requires_backend(Mode::Simulation));
    }

    #[test]
    fn test_explicit_values_override_mode() {
        let config = Config::from_toml_str(
            r#"
            mode = "simulation"

            [buffer]
            capacity = 100

            [feeds]
            poll_enabled = true
            synthetic_interval_ms = 500

            [alerts]
            capacity = 10
            order = "newest_last"
            repeat_cooldown_secs = 30

            [thresholds]
            air_quality_high = 150.0
            "#,
        )
        .unwrap();

        let mode = config.resolve_mode(None);
        assert_eq!(mode, Mode::Simulation);
        assert_eq!(config.buffer_capacity(mode), 100);
        assert_eq!(config.synthetic_interval(mode), Duration::from_millis(500));
        assert!(config.poll_enabled(mode));
        assert!(!config.push_enabled(mode));
        assert!(config.requires_backend(mode));
        assert_eq!(config.alerts.order, AlertOrder::NewestLast);
        assert_eq!(config.thresholds.air_quality_high, 150.0);
        assert_eq!(config.thresholds.heart_rate_low, 60.0);
    }

    #[test]
    fn test_cli_mode_wins() {
        let config = Config::from_toml_str("mode = \"simulation\"").unwrap();
        assert_eq!(config.resolve_mode(Some(Mode::Interactive)), Mode::Interactive);
        assert_eq!(Config::default().resolve_mode(None), Mode::Interactive);
    }

    #[test]
    fn test_validation_rejects_zero_capacity() {
        let result = Config::from_toml_str("[alerts]\ncapacity = 0\n");
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));

        let result = Config::from_toml_str("[buffer]\ncapacity = 0\n");
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validation_rejects_oversized_durations() {
        for contents in [
            "[push]\nmax_backoff_secs = 9223372036854775807\n",
            "[push]\ninitial_backoff_ms = 9223372036854775807\n",
            "[alerts]\nrepeat_cooldown_secs = 9223372036854775807\n",
            "[alerts]\nrepeat_cooldown_secs = 604801\n",
            "[display]\nstats_interval_secs = 9223372036854775807\n",
            "[feeds]\npoll_interval_secs = 604801\n",
            "[feeds]\nsynthetic_interval_ms = 604800001\n",
            "[location]\ntimeout_secs = 9223372036854775807\n",
            "[location]\nprecision = 11\n",
        ] {
            let result = Config::from_toml_str(contents);
            assert!(
                matches!(result, Err(ConfigError::ValidationError(_))),
                "accepted {:?}",
                contents
            );
        }
    }

    #[test]
    fn test_validation_accepts_upper_bound() {
        let contents = format!(
            "[alerts]\nrepeat_cooldown_secs = {max}\n[display]\nstats_interval_secs = {max}\n",
            max = MAX_DURATION_SECS
        );
        let config = Config::from_toml_str(&contents).unwrap();
        assert_eq!(
            config.repeat_cooldown(),
            TimeDelta::seconds(MAX_DURATION_SECS as i64)
        );
        assert_eq!(
            config.stats_interval(),
            Some(Duration::from_secs(MAX_DURATION_SECS))
        );
    }

    #[test]
    fn test_duration_getters_clamp_unvalidated_values() {
        let mut config = Config::default();
        config.alerts.repeat_cooldown_secs = u64::MAX;
        config.display.stats_interval_secs = u64::MAX;

        assert_eq!(
            config.repeat_cooldown(),
            TimeDelta::seconds(MAX_DURATION_SECS as i64)
        );
        assert_eq!(
            config.stats_interval(),
            Some(Duration::from_secs(MAX_DURATION_SECS))
        );

        config.alerts.repeat_cooldown_secs = 0;
        config.display.stats_interval_secs = 0;
        assert_eq!(config.repeat_cooldown(), TimeDelta::zero());
        assert_eq!(config.stats_interval(), None);
    }

    #[test]
    fn test_validation_rejects_inverted_heart_rate_bounds() {
        let result = Config::from_toml_str(
            "[thresholds]\nheart_rate_low = 120.0\nheart_rate_high = 100.0\n",
        );
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validation_requires_fixed_coordinates() {
        let result = Config::from_toml_str("[location]\nprovider = \"fixed\"\nlatitude = 1.0\n");
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));

        let config = Config::from_toml_str(
            "[location]\nprovider = \"fixed\"\nlatitude = 1.0\nlongitude = 2.0\n",
        )
        .unwrap();
        assert_eq!(config.location.provider, LocationSource::Fixed);
    }

    #[test]
    fn test_invalid_toml_is_error() {
        let result = Config::from_toml_str("[alerts\ncapacity = ");
        assert!(matches!(result, Err(ConfigError::TomlError(_))));

        let result = Config::from_toml_str("[alerts]\norder = \"sideways\"\n");
        assert!(matches!(result, Err(ConfigError::TomlError(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[feeds]\npoll_interval_secs = 15\npoll_limit = 50").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        let poll = config.poll_feed();
        assert_eq!(poll.interval, Duration::from_secs(15));
        assert_eq!(poll.limit, 50);
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::from_file(&dir.path().join("absent.toml"));
        assert!(matches!(result, Err(ConfigError::ReadError(_))));
    }

    #[test]
    fn test_push_feed_settings() {
        let config = Config::from_toml_str(
            "[push]\nreconnect = false\ninitial_backoff_ms = 250\nmax_backoff_secs = 5\n",
        )
        .unwrap();
        let push = config.push_feed();
        assert!(!push.reconnect);
        assert_eq!(push.backoff.initial_delay, Duration::from_millis(250));
        assert_eq!(push.backoff.max_delay, Duration::from_secs(5));
        assert_eq!(push.backoff.multiplier, 2.0);
    }
}
