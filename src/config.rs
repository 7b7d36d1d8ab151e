//! Application-level configuration loading: ticket lifetimes, sweeper cadence and
//! the ingestion tolerances used by the live scoring engine.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "LIVE_SCORE_BACK_CONFIG_PATH";

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    ticket_ttl: Duration,
    ticket_gc_interval: Duration,
    sweep_interval: Duration,
    inactivity_threshold: Duration,
    terminal_retention: Duration,
    stale_sequence_tolerance: u64,
    position_correction_tolerance: u64,
    subscriber_buffer: usize,
    keep_alive: Duration,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(config) => {
                    info!(
                        path = %path.display(),
                        inactivity_secs = config.inactivity_threshold.as_secs(),
                        ticket_ttl_secs = config.ticket_ttl.as_secs(),
                        "loaded live scoring config"
                    );
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse a JSON document into a configuration. Omitted fields keep their defaults.
    pub fn parse(contents: &str) -> serde_json::Result<Self> {
        serde_json::from_str::<RawConfig>(contents).map(Into::into)
    }

    /// Lifetime of a stream ticket between issuance and redemption.
    pub fn ticket_ttl(&self) -> Duration {
        self.ticket_ttl
    }

    /// Interval between two passes of the ticket garbage collector.
    pub fn ticket_gc_interval(&self) -> Duration {
        self.ticket_gc_interval
    }

    /// Interval between two reconciliation sweeps.
    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    /// Idle time after which an active session is considered abandoned.
    pub fn inactivity_threshold(&self) -> Duration {
        self.inactivity_threshold
    }

    /// How long a finalized or abandoned session stays in memory.
    pub fn terminal_retention(&self) -> Duration {
        self.terminal_retention
    }

    /// How far behind the canonical head a client sequence may be before it is stale.
    pub fn stale_sequence_tolerance(&self) -> u64 {
        self.stale_sequence_tolerance
    }

    /// Number of position steps a correction may move backward.
    pub fn position_correction_tolerance(&self) -> u64 {
        self.position_correction_tolerance
    }

    /// Bounded buffer size of each subscriber's outbound channel.
    pub fn subscriber_buffer(&self) -> usize {
        self.subscriber_buffer
    }

    /// Keep-alive interval for SSE streams.
    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        RawConfig::default().into()
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    ticket_ttl_secs: u64,
    ticket_gc_interval_secs: u64,
    sweep_interval_secs: u64,
    inactivity_threshold_secs: u64,
    terminal_retention_secs: u64,
    stale_sequence_tolerance: u64,
    position_correction_tolerance: u64,
    subscriber_buffer: usize,
    keep_alive_secs: u64,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            ticket_ttl_secs: 30,
            ticket_gc_interval_secs: 60,
            sweep_interval_secs: 30,
            inactivity_threshold_secs: 15 * 60,
            terminal_retention_secs: 60 * 60,
            stale_sequence_tolerance: 0,
            position_correction_tolerance: 0,
            subscriber_buffer: 32,
            keep_alive_secs: 15,
        }
    }
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        // Zero-length intervals and channels would panic inside tokio.
        Self {
            ticket_ttl: Duration::from_secs(value.ticket_ttl_secs.max(1)),
            ticket_gc_interval: Duration::from_secs(value.ticket_gc_interval_secs.max(1)),
            sweep_interval: Duration::from_secs(value.sweep_interval_secs.max(1)),
            inactivity_threshold: Duration::from_secs(value.inactivity_threshold_secs),
            terminal_retention: Duration::from_secs(value.terminal_retention_secs),
            stale_sequence_tolerance: value.stale_sequence_tolerance,
            position_correction_tolerance: value.position_correction_tolerance,
            subscriber_buffer: value.subscriber_buffer.max(1),
            keep_alive: Duration::from_secs(value.keep_alive_secs.max(1)),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = AppConfig::parse("{}").unwrap();
        assert_eq!(config.ticket_ttl(), Duration::from_secs(30));
        assert_eq!(config.inactivity_threshold(), Duration::from_secs(900));
        assert_eq!(config.terminal_retention(), Duration::from_secs(3600));
        assert_eq!(config.stale_sequence_tolerance(), 0);
        assert_eq!(config.subscriber_buffer(), 32);
    }

    #[test]
    fn partial_document_overrides_fields() {
        let config =
            AppConfig::parse(r#"{"ticket_ttl_secs": 10, "stale_sequence_tolerance": 2}"#).unwrap();
        assert_eq!(config.ticket_ttl(), Duration::from_secs(10));
        assert_eq!(config.stale_sequence_tolerance(), 2);
        assert_eq!(config.sweep_interval(), Duration::from_secs(30));
    }

    #[test]
    fn zero_values_are_clamped() {
        let config =
            AppConfig::parse(r#"{"subscriber_buffer": 0, "sweep_interval_secs": 0}"#).unwrap();
        assert_eq!(config.subscriber_buffer(), 1);
        assert_eq!(config.sweep_interval(), Duration::from_secs(1));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(AppConfig::parse(r#"{"colors": []}"#).is_err());
    }
}
