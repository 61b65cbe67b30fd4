//! Desk unit configuration management.
//!
//! Handles loading, saving, and validating node configuration including:
//! - Faculty identity (bus topic id, display name)
//! - Target beacon address and RSSI threshold
//! - Presence debounce and grace-period tuning
//! - Adaptive scan cadence per scan mode
//! - Message bus namespace and refresh intervals
//! - Gateway bind address
//!
//! Configuration is read from a TOML file and layered with environment
//! overrides of the form `DESKUNIT__SECTION__KEY` (for example
//! `DESKUNIT__BLUETOOTH__TARGET_ADDRESS`).

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Placeholder address used until a beacon has been configured.
pub const UNCONFIGURED_ADDRESS: &str = "00:00:00:00:00:00";

/// Upper bound for any single scan window.
pub const MAX_SCAN_DURATION_MS: u64 = 10_000;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "DESKUNIT";

static MAC_ADDRESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([0-9A-Fa-f]{2}:){5}[0-9A-Fa-f]{2}$").expect("MAC address pattern is valid")
});

/// Returns `true` if `address` looks like `XX:XX:XX:XX:XX:XX`.
#[must_use]
pub fn is_valid_mac_address(address: &str) -> bool {
    MAC_ADDRESS_RE.is_match(address)
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required configuration file does not exist.
    #[error("configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The file or environment layer could not be read or deserialized.
    #[error("failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    /// Writing the configuration failed.
    #[error("failed to write {}: {source}", path.display())]
    WriteError {
        /// Destination path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Serializing to TOML failed.
    #[error("failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// A single field holds an invalid value.
    #[error("{field}: {message}")]
    ValidationError {
        /// Dotted field path.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields are invalid.
    #[error("{} validation errors", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Main node configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Faculty identity.
    pub faculty: FacultyConfig,

    /// Beacon scanning.
    pub bluetooth: BluetoothConfig,

    /// Presence debounce and grace period.
    pub presence: PresenceConfig,

    /// Adaptive scan cadence.
    pub scheduler: SchedulerConfig,

    /// Message bus.
    pub bus: BusConfig,

    /// Local HTTP gateway.
    pub server: ServerConfig,
}

/// Faculty identity used in topics and status payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FacultyConfig {
    /// Numeric faculty id; appears in every topic.
    pub id: u32,

    /// Display name.
    pub name: String,

    /// Department, shown under the name on an idle panel.
    pub department: Option<String>,
}

impl Default for FacultyConfig {
    fn default() -> Self {
        Self {
            id: 1,
            name: "Faculty".to_string(),
            department: None,
        }
    }
}

/// Beacon target and radio settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// MAC address of the faculty beacon.
    pub target_address: String,

    /// Minimum RSSI (dBm) for a sighting to count. `0` disables filtering.
    pub rssi_threshold: i16,

    /// BlueZ adapter name (e.g. `hci0`). Defaults to the system default adapter.
    pub adapter: Option<String>,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            target_address: UNCONFIGURED_ADDRESS.to_string(),
            rssi_threshold: -80,
            adapter: None,
        }
    }
}

impl BluetoothConfig {
    /// Whether a real beacon address has been set.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.target_address != UNCONFIGURED_ADDRESS
    }

    /// The RSSI floor, if filtering is enabled.
    #[must_use]
    pub const fn rssi_floor(&self) -> Option<i16> {
        if self.rssi_threshold == 0 {
            None
        } else {
            Some(self.rssi_threshold)
        }
    }
}

/// Presence detector tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// Consecutive qualifying scans needed to declare presence.
    pub confirm_scans: u32,

    /// Consecutive misses needed before the grace period starts.
    pub confirm_absence_scans: u32,

    /// Maximum grace period length in milliseconds.
    pub grace_period_ms: u64,

    /// Maximum scans attempted during a grace period.
    pub grace_reconnect_max_attempts: u32,

    /// Scan cadence while in the grace period, in milliseconds.
    pub grace_reconnect_interval_ms: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            confirm_scans: 2,
            confirm_absence_scans: 3,
            grace_period_ms: 60_000,
            grace_reconnect_max_attempts: 12,
            grace_reconnect_interval_ms: 5_000,
        }
    }
}

impl PresenceConfig {
    /// Grace period length.
    #[must_use]
    pub const fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    /// Grace-period scan cadence.
    #[must_use]
    pub const fn grace_reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.grace_reconnect_interval_ms)
    }
}

/// Scan cadence per scan mode. Intervals are measured from the end of one
/// scan to the start of the next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Pause between scans while searching.
    pub searching_interval_ms: u64,
    /// Scan window while searching.
    pub searching_scan_ms: u64,
    /// Pause between scans while monitoring.
    pub monitoring_interval_ms: u64,
    /// Scan window while monitoring.
    pub monitoring_scan_ms: u64,
    /// Pause between scans while verifying.
    pub verifying_interval_ms: u64,
    /// Scan window while verifying.
    pub verifying_scan_ms: u64,
    /// Scan window during a grace period.
    pub grace_scan_ms: u64,
    /// Minimum time spent verifying before leaving the mode.
    pub verify_dwell_ms: u64,
    /// Consecutive detections (or misses) that trigger verification.
    pub verify_trigger_count: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            searching_interval_ms: 2_000,
            searching_scan_ms: 5_000,
            monitoring_interval_ms: 15_000,
            monitoring_scan_ms: 2_000,
            verifying_interval_ms: 3_000,
            verifying_scan_ms: 2_000,
            grace_scan_ms: 2_000,
            verify_dwell_ms: 10_000,
            verify_trigger_count: 2,
        }
    }
}

/// Message bus settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// First topic segment.
    pub namespace: String,

    /// Status republish interval when nothing changes, in seconds.
    pub status_refresh_secs: u64,

    /// Heartbeat interval, in seconds.
    pub heartbeat_secs: u64,

    /// Base URL of the broker bridge that outbound messages are forwarded to.
    pub bridge_url: Option<String>,

    /// Inbound queue capacity (messages and commands).
    pub inbox_capacity: usize,

    /// Outbound queue capacity.
    pub outbox_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            namespace: "consultease".to_string(),
            status_refresh_secs: 300,
            heartbeat_secs: 30,
            bridge_url: None,
            inbox_capacity: 32,
            outbox_capacity: 64,
        }
    }
}

impl BusConfig {
    /// Periodic status refresh interval.
    #[must_use]
    pub const fn status_refresh(&self) -> Duration {
        Duration::from_secs(self.status_refresh_secs)
    }

    /// Heartbeat interval.
    #[must_use]
    pub const fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }
}

/// Local HTTP gateway settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to bind.
    pub bind_address: String,

    /// Use production logging (JSON files + journald-friendly stdout).
    pub production: bool,

    /// Where production log files go. Platform default when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            production: false,
            log_dir: None,
        }
    }
}

impl NodeConfig {
    /// Load configuration from `path` layered with environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if the file does not exist, or a
    /// load/validation error if it cannot be parsed or holds invalid values.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        Self::load_layers(Some(path))
    }

    /// Load configuration from `path` if it exists, otherwise start from
    /// defaults. Environment overrides apply either way.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed, or if the
    /// resulting configuration fails validation.
    pub fn load_or_default(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load_layers(Some(path))
        } else {
            tracing::info!(path = %path.display(), "No configuration file, using defaults");
            Self::load_layers(None)
        }
    }

    fn load_layers(path: Option<&Path>) -> ConfigResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: Self = settings.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Save configuration as pretty TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::WriteError {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::WriteError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check every field, collecting all problems.
    ///
    /// # Errors
    ///
    /// Returns the single error, or [`ConfigError::MultipleValidationErrors`].
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();
        let mut invalid = |field: &'static str, message: String| {
            errors.push(ConfigError::ValidationError { field, message });
        };

        if self.faculty.id == 0 {
            invalid("faculty.id", "must be greater than zero".into());
        }
        if self.faculty.name.trim().is_empty() {
            invalid("faculty.name", "must not be empty".into());
        }

        if !is_valid_mac_address(&self.bluetooth.target_address) {
            invalid(
                "bluetooth.target_address",
                format!(
                    "'{}' is not in XX:XX:XX:XX:XX:XX format",
                    self.bluetooth.target_address
                ),
            );
        }
        if !(-127..=0).contains(&self.bluetooth.rssi_threshold) {
            invalid(
                "bluetooth.rssi_threshold",
                format!("{} dBm is outside -127..=0", self.bluetooth.rssi_threshold),
            );
        }

        let presence = &self.presence;
        if presence.confirm_scans == 0 {
            invalid("presence.confirm_scans", "must be at least 1".into());
        }
        if presence.confirm_absence_scans < presence.confirm_scans {
            invalid(
                "presence.confirm_absence_scans",
                format!(
                    "must be at least confirm_scans ({}) so absence is harder to declare than presence",
                    presence.confirm_scans
                ),
            );
        }
        if presence.grace_period_ms == 0 {
            invalid("presence.grace_period_ms", "must be greater than zero".into());
        }
        if presence.grace_reconnect_max_attempts == 0 {
            invalid(
                "presence.grace_reconnect_max_attempts",
                "must be at least 1".into(),
            );
        }
        if presence.grace_reconnect_interval_ms == 0 {
            invalid(
                "presence.grace_reconnect_interval_ms",
                "must be greater than zero".into(),
            );
        }

        let scheduler = &self.scheduler;
        for (field, value) in [
            ("scheduler.searching_interval_ms", scheduler.searching_interval_ms),
            ("scheduler.monitoring_interval_ms", scheduler.monitoring_interval_ms),
            ("scheduler.verifying_interval_ms", scheduler.verifying_interval_ms),
        ] {
            if value == 0 {
                invalid(field, "must be greater than zero".into());
            }
        }
        for (field, value) in [
            ("scheduler.searching_scan_ms", scheduler.searching_scan_ms),
            ("scheduler.monitoring_scan_ms", scheduler.monitoring_scan_ms),
            ("scheduler.verifying_scan_ms", scheduler.verifying_scan_ms),
            ("scheduler.grace_scan_ms", scheduler.grace_scan_ms),
        ] {
            if value == 0 || value > MAX_SCAN_DURATION_MS {
                invalid(
                    field,
                    format!("{value} ms is outside 1..={MAX_SCAN_DURATION_MS}"),
                );
            }
        }
        if scheduler.monitoring_interval_ms < scheduler.searching_interval_ms {
            invalid(
                "scheduler.monitoring_interval_ms",
                "must not be shorter than searching_interval_ms".into(),
            );
        }
        if scheduler.verify_trigger_count == 0 {
            invalid("scheduler.verify_trigger_count", "must be at least 1".into());
        }

        let bus = &self.bus;
        if bus.namespace.is_empty()
            || bus.namespace.starts_with('/')
            || bus.namespace.ends_with('/')
            || bus.namespace.contains(['+', '#'])
        {
            invalid(
                "bus.namespace",
                format!("'{}' is not a valid topic prefix", bus.namespace),
            );
        }
        if bus.status_refresh_secs == 0 {
            invalid("bus.status_refresh_secs", "must be greater than zero".into());
        }
        if bus.heartbeat_secs == 0 {
            invalid("bus.heartbeat_secs", "must be greater than zero".into());
        }
        if bus.inbox_capacity == 0 {
            invalid("bus.inbox_capacity", "must be at least 1".into());
        }
        if bus.outbox_capacity == 0 {
            invalid("bus.outbox_capacity", "must be at least 1".into());
        }
        if let Some(bridge) = &bus.bridge_url {
            match url::Url::parse(bridge) {
                Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
                Ok(parsed) => invalid(
                    "bus.bridge_url",
                    format!("unsupported scheme '{}'", parsed.scheme()),
                ),
                Err(e) => invalid("bus.bridge_url", e.to_string()),
            }
        }

        if self.server.bind_address.parse::<SocketAddr>().is_err() {
            invalid(
                "server.bind_address",
                format!("'{}' is not a socket address", self.server.bind_address),
            );
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }
}

/// Default configuration file location.
///
/// On Linux: `/etc/deskunit/config.toml`.
/// Elsewhere: the platform config directory.
#[must_use]
pub fn default_config_path() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/etc/deskunit/config.toml")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "deskunit").map_or_else(
            || PathBuf::from("./config.toml"),
            |dirs| dirs.config_dir().join("config.toml"),
        )
    }
}
