//! TOML configuration for the `sessionhub` binary.
//!
//! Every field is optional.  A missing file yields [`AppConfig::default`];
//! a file that only sets a handful of keys gets defaults for the rest.
//!
//! ```toml
//! [manager]
//! log_level = "debug"
//! transport = "bridge"
//! sessions = ["sales", "support"]
//!
//! [reconnect]
//! max_attempts = 5
//! base_delay_ms = 2000
//!
//! [bridge]
//! addr = "127.0.0.1:7400"
//! ```
//!
//! # Serde default values
//!
//! Fields annotated with `#[serde(default = "some_fn")]` use the return value
//! of `some_fn()` when the key is absent, so upgrading from an older file
//! that lacks newer keys keeps working.  Durations are written in
//! milliseconds and converted into a [`SessionPolicy`] by
//! [`AppConfig::to_policy`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sessionhub_core::SessionPolicy;
use thiserror::Error;

use crate::infrastructure::transport::TransportKind;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value parsed but is outside its allowed range.
    #[error("invalid config value for {key}: {reason}")]
    Invalid { key: &'static str, reason: &'static str },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub manager: ManagerConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
    #[serde(default)]
    pub pairing: PairingConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
}

/// Process-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManagerConfig {
    /// `tracing` level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Which transport driver to start with.
    #[serde(default)]
    pub transport: TransportKind,
    /// Where the state snapshot is written.
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    /// One credential file per session lives here.
    #[serde(default = "default_credentials_dir")]
    pub credentials_dir: PathBuf,
    /// Prefixed to destinations that lack it.  Empty disables prefixing.
    #[serde(default = "default_country_code")]
    pub default_country_code: String,
    /// Capacity of the in-memory session log.
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
    /// Sessions initialised at start-up.
    #[serde(default)]
    pub sessions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Upper bound on a single connect call.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthConfig {
    #[serde(default = "default_health_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Consecutive failed probes before a reconnect is forced.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueConfig {
    #[serde(default = "default_queue_max_size")]
    pub max_size: usize,
    #[serde(default = "default_max_send_retries")]
    pub max_send_retries: u32,
    #[serde(default = "default_drain_interval_ms")]
    pub drain_interval_ms: u64,
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_max_messages")]
    pub max_messages: usize,
    #[serde(default = "default_rate_window_ms")]
    pub window_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistenceConfig {
    #[serde(default = "default_persist_interval_ms")]
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShutdownConfig {
    #[serde(default = "default_shutdown_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PairingConfig {
    /// How long `RequestPairing` waits for a challenge.
    #[serde(default = "default_pairing_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeConfig {
    /// `host:port` of the protocol bridge process.
    #[serde(default = "default_bridge_addr")]
    pub addr: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_state_file() -> PathBuf {
    PathBuf::from("sessionhub-state.json")
}
fn default_credentials_dir() -> PathBuf {
    PathBuf::from("credentials")
}
fn default_country_code() -> String {
    "258".to_string()
}
fn default_log_capacity() -> usize {
    500
}
fn default_max_attempts() -> u32 {
    10
}
fn default_base_delay_ms() -> u64 {
    5_000
}
fn default_max_delay_ms() -> u64 {
    300_000
}
fn default_connect_timeout_ms() -> u64 {
    30_000
}
fn default_health_interval_ms() -> u64 {
    60_000
}
fn default_probe_timeout_ms() -> u64 {
    10_000
}
fn default_failure_threshold() -> u32 {
    3
}
fn default_queue_max_size() -> usize {
    1000
}
fn default_max_send_retries() -> u32 {
    3
}
fn default_drain_interval_ms() -> u64 {
    1_000
}
fn default_send_timeout_ms() -> u64 {
    30_000
}
fn default_rate_max_messages() -> usize {
    20
}
fn default_rate_window_ms() -> u64 {
    60_000
}
fn default_persist_interval_ms() -> u64 {
    30_000
}
fn default_shutdown_timeout_ms() -> u64 {
    10_000
}
fn default_pairing_timeout_ms() -> u64 {
    60_000
}
fn default_bridge_addr() -> String {
    "127.0.0.1:7400".to_string()
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            transport: TransportKind::default(),
            state_file: default_state_file(),
            credentials_dir: default_credentials_dir(),
            default_country_code: default_country_code(),
            log_capacity: default_log_capacity(),
            sessions: Vec::new(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_health_interval_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            failure_threshold: default_failure_threshold(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: default_queue_max_size(),
            max_send_retries: default_max_send_retries(),
            drain_interval_ms: default_drain_interval_ms(),
            send_timeout_ms: default_send_timeout_ms(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_messages: default_rate_max_messages(),
            window_ms: default_rate_window_ms(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_persist_interval_ms(),
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_pairing_timeout_ms(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            addr: default_bridge_addr(),
        }
    }
}

impl AppConfig {
    /// Rejects values the runtime cannot honour.  Intervals feed tokio
    /// tickers, which panic on a zero period, and a zero limit or capacity
    /// would stall every session.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("health.interval_ms", self.health.interval_ms),
            ("health.probe_timeout_ms", self.health.probe_timeout_ms),
            ("health.failure_threshold", u64::from(self.health.failure_threshold)),
            ("queue.max_size", self.queue.max_size as u64),
            ("queue.drain_interval_ms", self.queue.drain_interval_ms),
            ("queue.send_timeout_ms", self.queue.send_timeout_ms),
            ("rate_limit.max_messages", self.rate_limit.max_messages as u64),
            ("rate_limit.window_ms", self.rate_limit.window_ms),
            ("reconnect.base_delay_ms", self.reconnect.base_delay_ms),
            ("reconnect.connect_timeout_ms", self.reconnect.connect_timeout_ms),
            ("persistence.interval_ms", self.persistence.interval_ms),
            ("pairing.timeout_ms", self.pairing.timeout_ms),
            ("manager.log_capacity", self.manager.log_capacity as u64),
        ];
        if let Some(&(key, _)) = non_zero.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid {
                key,
                reason: "must be greater than zero",
            });
        }
        if self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
            return Err(ConfigError::Invalid {
                key: "reconnect.max_delay_ms",
                reason: "must not be below reconnect.base_delay_ms",
            });
        }
        Ok(())
    }

    /// Builds the runtime policy shared by every supervisor.
    pub fn to_policy(&self) -> SessionPolicy {
        let ms = Duration::from_millis;
        let country_code = self.manager.default_country_code.trim();
        SessionPolicy {
            max_reconnect_attempts: self.reconnect.max_attempts,
            reconnect_base_delay: ms(self.reconnect.base_delay_ms),
            reconnect_max_delay: ms(self.reconnect.max_delay_ms),
            health_check_interval: ms(self.health.interval_ms),
            health_probe_timeout: ms(self.health.probe_timeout_ms),
            health_failure_threshold: self.health.failure_threshold,
            message_queue_max_size: self.queue.max_size,
            max_send_retries: self.queue.max_send_retries,
            drain_interval: ms(self.queue.drain_interval_ms),
            rate_limit_max_messages: self.rate_limit.max_messages,
            rate_limit_window: ms(self.rate_limit.window_ms),
            send_timeout: ms(self.queue.send_timeout_ms),
            connect_timeout: ms(self.reconnect.connect_timeout_ms),
            pairing_timeout: ms(self.pairing.timeout_ms),
            state_persist_interval: ms(self.persistence.interval_ms),
            shutdown_timeout: ms(self.shutdown.timeout_ms),
            log_capacity: self.manager.log_capacity,
            default_country_code: (!country_code.is_empty()).then(|| country_code.to_string()),
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// [`ConfigError::Parse`] if the TOML is malformed, and
/// [`ConfigError::Invalid`] if a value fails [`AppConfig::validate`].
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let config: AppConfig = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Renders `config` as TOML, e.g. to bootstrap a config file.
pub fn render_config(config: &AppConfig) -> Result<String, ConfigError> {
    Ok(toml::to_string_pretty(config)?)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_maps_to_default_policy() {
        // Arrange
        let cfg = AppConfig::default();

        // Act
        let policy = cfg.to_policy();

        // Assert
        assert_eq!(policy, SessionPolicy::default());
    }

    #[test]
    fn test_partial_file_keeps_defaults_for_missing_keys() {
        let toml_str = r#"
            [reconnect]
            max_attempts = 4

            [manager]
            sessions = ["a", "b"]
        "#;

        let cfg: AppConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(cfg.reconnect.max_attempts, 4);
        assert_eq!(cfg.reconnect.base_delay_ms, 5_000);
        assert_eq!(cfg.manager.sessions, vec!["a", "b"]);
        assert_eq!(cfg.manager.log_level, "info");
        assert_eq!(cfg.rate_limit.max_messages, 20);
    }

    #[test]
    fn test_empty_country_code_disables_prefixing() {
        let mut cfg = AppConfig::default();
        cfg.manager.default_country_code = "  ".to_string();

        assert_eq!(cfg.to_policy().default_country_code, None);
    }

    #[test]
    fn test_transport_kind_parses_from_lowercase() {
        let cfg: AppConfig = toml::from_str("[manager]\ntransport = \"bridge\"\n").unwrap();
        assert_eq!(cfg.manager.transport, TransportKind::Bridge);
    }

    #[test]
    fn test_load_config_missing_file_returns_defaults() {
        let path = std::env::temp_dir().join(format!("sessionhub-missing-{}.toml", uuid::Uuid::new_v4()));

        let cfg = load_config(&path).unwrap();

        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_load_config_malformed_file_is_an_error() {
        // Arrange
        let path = std::env::temp_dir().join(format!("sessionhub-bad-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "[reconnect\nmax_attempts = ").unwrap();

        // Act
        let result = load_config(&path);

        // Assert
        assert!(matches!(result, Err(ConfigError::Parse(_))));
        let _ = std::fs::remove_file(&path);
    }

    fn load_from(contents: &str) -> Result<AppConfig, ConfigError> {
        let path = std::env::temp_dir().join(format!("sessionhub-cfg-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, contents).unwrap();
        let result = load_config(&path);
        let _ = std::fs::remove_file(&path);
        result
    }

    fn rejected_key(contents: &str) -> Option<&'static str> {
        match load_from(contents) {
            Err(ConfigError::Invalid { key, .. }) => Some(key),
            _ => None,
        }
    }

    #[test]
    fn test_zero_persist_interval_is_rejected() {
        assert_eq!(
            rejected_key("[persistence]\ninterval_ms = 0\n"),
            Some("persistence.interval_ms")
        );
    }

    #[test]
    fn test_zero_health_interval_is_rejected() {
        assert_eq!(rejected_key("[health]\ninterval_ms = 0\n"), Some("health.interval_ms"));
    }

    #[test]
    fn test_zero_failure_threshold_is_rejected() {
        assert_eq!(
            rejected_key("[health]\nfailure_threshold = 0\n"),
            Some("health.failure_threshold")
        );
    }

    #[test]
    fn test_zero_rate_limit_is_rejected() {
        assert_eq!(
            rejected_key("[rate_limit]\nmax_messages = 0\n"),
            Some("rate_limit.max_messages")
        );
    }

    #[test]
    fn test_zero_queue_size_is_rejected() {
        assert_eq!(rejected_key("[queue]\nmax_size = 0\n"), Some("queue.max_size"));
    }

    #[test]
    fn test_zero_drain_interval_is_rejected() {
        assert_eq!(
            rejected_key("[queue]\ndrain_interval_ms = 0\n"),
            Some("queue.drain_interval_ms")
        );
    }

    #[test]
    fn test_max_delay_below_base_delay_is_rejected() {
        let result = load_from("[reconnect]\nbase_delay_ms = 10000\nmax_delay_ms = 500\n");

        assert!(matches!(
            result,
            Err(ConfigError::Invalid {
                key: "reconnect.max_delay_ms",
                ..
            })
        ));
    }

    #[test]
    fn test_valid_overrides_load() {
        // Arrange
        let contents = "[rate_limit]\nmax_messages = 5\n\n[queue]\nmax_size = 10\n";

        // Act
        let cfg = load_from(contents).unwrap();

        // Assert
        assert_eq!(cfg.rate_limit.max_messages, 5);
        assert_eq!(cfg.queue.max_size, 10);
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rendered_config_parses_back() {
        let mut cfg = AppConfig::default();
        cfg.bridge.addr = "10.0.0.5:9000".to_string();

        let rendered = render_config(&cfg).expect("serialize");
        let restored: AppConfig = toml::from_str(&rendered).expect("deserialize");

        assert_eq!(cfg, restored);
    }
}
