use std::{env, time::Duration};

use log::*;
use oms_common::helpers::{parse_boolean_flag, parse_number};
use thiserror::Error;

use crate::ledger::LedgerConfig;

const DEFAULT_DATABASE_URL: &str = "sqlite://data/oms_adjustments.db";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_OUTBOX_CLAIM_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{var} has an invalid value. {reason}")]
    InvalidValue { var: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub database_url: String,
    pub max_connections: u32,
    /// How long a writer waits for the payment gate before giving up with a lock contention error
    pub lock_timeout: Duration,
    pub outbox: OutboxConfig,
    pub ledger: LedgerConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboxConfig {
    /// An `InFlight` outbox entry older than this is considered abandoned and may be claimed again.
    pub claim_timeout: Duration,
    /// If true, queued notifications are dispatched as soon as the transaction that queued them commits.
    pub drain_on_commit: bool,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self { claim_timeout: Duration::from_secs(DEFAULT_OUTBOX_CLAIM_TIMEOUT_SECS), drain_on_commit: true }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
            outbox: OutboxConfig::default(),
            ledger: LedgerConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn new<S: Into<String>>(database_url: S) -> Self {
        Self { database_url: database_url.into(), ..Default::default() }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_outbox(mut self, outbox: OutboxConfig) -> Self {
        self.outbox = outbox;
        self
    }

    /// Loads the configuration from `OMS_*` environment variables. Invalid values are logged and replaced with their
    /// defaults.
    pub fn from_env_or_default() -> Self {
        let (config, errors) = Self::from_lookup(|var| env::var(var).ok());
        for e in errors {
            warn!("🪛️ {e}. Using the default instead.");
        }
        let ledger = LedgerConfig::new_from_env_or_default();
        Self { ledger, ..config }
    }

    /// Builds the database and outbox settings from an arbitrary variable source, returning the settings along with
    /// every invalid value that was replaced by its default.
    pub fn from_lookup<F>(lookup: F) -> (Self, Vec<ConfigError>)
    where F: Fn(&'static str) -> Option<String> {
        let mut errors = vec![];
        let mut number = |var: &'static str, default: u64| {
            parse_number(lookup(var), default).unwrap_or_else(|reason| {
                errors.push(ConfigError::InvalidValue { var, reason });
                default
            })
        };
        let max_connections = number("OMS_DB_MAX_CONNECTIONS", u64::from(DEFAULT_MAX_CONNECTIONS));
        let lock_timeout_ms = number("OMS_LOCK_TIMEOUT_MS", DEFAULT_LOCK_TIMEOUT_MS);
        let claim_timeout_secs = number("OMS_OUTBOX_CLAIM_TIMEOUT_SECS", DEFAULT_OUTBOX_CLAIM_TIMEOUT_SECS);
        let max_connections = u32::try_from(max_connections).unwrap_or_else(|_| {
            errors.push(ConfigError::InvalidValue {
                var: "OMS_DB_MAX_CONNECTIONS",
                reason: format!("{max_connections} is too large"),
            });
            DEFAULT_MAX_CONNECTIONS
        });
        let database_url = lookup("OMS_DATABASE_URL").unwrap_or_else(|| {
            info!("🪛️ OMS_DATABASE_URL is not set. Using the default, {DEFAULT_DATABASE_URL}.");
            DEFAULT_DATABASE_URL.to_string()
        });
        let drain_on_commit = parse_boolean_flag(lookup("OMS_OUTBOX_DRAIN_ON_COMMIT"), true);
        let config = Self {
            database_url,
            max_connections,
            lock_timeout: Duration::from_millis(lock_timeout_ms),
            outbox: OutboxConfig { claim_timeout: Duration::from_secs(claim_timeout_secs), drain_on_commit },
            ledger: LedgerConfig::default(),
        };
        (config, errors)
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&'static str, &str)]) -> impl Fn(&'static str) -> Option<String> {
        let map: HashMap<&'static str, String> = vars.iter().map(|(k, v)| (*k, v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let (config, errors) = EngineConfig::from_lookup(lookup(&[]));
        assert!(errors.is_empty());
        assert_eq!(config.database_url, "sqlite://data/oms_adjustments.db");
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.lock_timeout, Duration::from_secs(5));
        assert_eq!(config.outbox, OutboxConfig::default());
    }

    #[test]
    fn values_are_read() {
        let (config, errors) = EngineConfig::from_lookup(lookup(&[
            ("OMS_DATABASE_URL", "sqlite://tmp/x.db"),
            ("OMS_DB_MAX_CONNECTIONS", "12"),
            ("OMS_LOCK_TIMEOUT_MS", "250"),
            ("OMS_OUTBOX_CLAIM_TIMEOUT_SECS", "30"),
            ("OMS_OUTBOX_DRAIN_ON_COMMIT", "false"),
        ]));
        assert!(errors.is_empty());
        assert_eq!(config.database_url, "sqlite://tmp/x.db");
        assert_eq!(config.max_connections, 12);
        assert_eq!(config.lock_timeout, Duration::from_millis(250));
        assert_eq!(config.outbox.claim_timeout, Duration::from_secs(30));
        assert!(!config.outbox.drain_on_commit);
    }

    #[test]
    fn builder_overrides() {
        let outbox = OutboxConfig { claim_timeout: Duration::from_secs(1), drain_on_commit: false };
        let config =
            EngineConfig::new("sqlite::memory:").with_lock_timeout(Duration::from_millis(50)).with_outbox(outbox);
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.lock_timeout, Duration::from_millis(50));
        assert_eq!(config.outbox, outbox);
        assert_eq!(config.max_connections, 5);
    }

    #[test]
    fn bad_values_fall_back_to_defaults() {
        let (config, errors) = EngineConfig::from_lookup(lookup(&[
            ("OMS_LOCK_TIMEOUT_MS", "soon"),
            ("OMS_DB_MAX_CONNECTIONS", "99999999999"),
        ]));
        assert_eq!(errors.len(), 2);
        assert_eq!(config.lock_timeout, Duration::from_millis(5_000));
        assert_eq!(config.max_connections, 5);
    }
}
