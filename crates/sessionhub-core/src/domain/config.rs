//! Runtime tunables shared by every session supervisor.
//!
//! [`SessionPolicy`] is the single source of truth for timing, capacity, and
//! retry limits.  It is built once at start-up (from the TOML file in the
//! manager crate, or from defaults) and shared behind an `Arc`.
//!
//! Keeping it a plain struct with no environment reads makes it trivial to
//! construct tight policies in tests.

use std::time::Duration;

/// All runtime limits for sessions.
///
/// | Field                     | Default |
/// |---------------------------|---------|
/// | max_reconnect_attempts    | 10      |
/// | reconnect_base_delay      | 5 s     |
/// | reconnect_max_delay       | 300 s   |
/// | health_check_interval     | 60 s    |
/// | health_probe_timeout      | 10 s    |
/// | health_failure_threshold  | 3       |
/// | message_queue_max_size    | 1000    |
/// | max_send_retries          | 3       |
/// | drain_interval            | 1 s     |
/// | rate_limit_max_messages   | 20      |
/// | rate_limit_window         | 60 s    |
/// | send_timeout              | 30 s    |
/// | connect_timeout           | 30 s    |
/// | pairing_timeout           | 60 s    |
/// | state_persist_interval    | 30 s    |
/// | shutdown_timeout          | 10 s    |
/// | log_capacity              | 500     |
/// | default_country_code      | "258"   |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPolicy {
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
    pub health_check_interval: Duration,
    pub health_probe_timeout: Duration,
    pub health_failure_threshold: u32,
    pub message_queue_max_size: usize,
    pub max_send_retries: u32,
    pub drain_interval: Duration,
    pub rate_limit_max_messages: usize,
    pub rate_limit_window: Duration,
    pub send_timeout: Duration,
    pub connect_timeout: Duration,
    pub pairing_timeout: Duration,
    pub state_persist_interval: Duration,
    pub shutdown_timeout: Duration,
    pub log_capacity: usize,
    pub default_country_code: Option<String>,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 10,
            reconnect_base_delay: Duration::from_secs(5),
            reconnect_max_delay: Duration::from_secs(300),
            health_check_interval: Duration::from_secs(60),
            health_probe_timeout: Duration::from_secs(10),
            health_failure_threshold: 3,
            message_queue_max_size: 1000,
            max_send_retries: 3,
            drain_interval: Duration::from_secs(1),
            rate_limit_max_messages: 20,
            rate_limit_window: Duration::from_secs(60),
            send_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(30),
            pairing_timeout: Duration::from_secs(60),
            state_persist_interval: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(10),
            log_capacity: 500,
            default_country_code: Some("258".to_string()),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
