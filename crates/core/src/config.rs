//! Process configuration.
//!
//! Built once at startup and passed explicitly into every component; nothing
//! in the catalog reads the environment after construction.

use std::time::Duration;

use thiserror::Error;

use crate::consistency::ConsistencyPolicy;
use crate::id::RegionCode;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl ConfigError {
    pub fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Timeout and retry budget applied to every store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSettings {
    /// Total attempts per call, including the first.
    pub max_attempts: u32,
    /// Upper bound for a single attempt.
    pub call_timeout: Duration,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            call_timeout: Duration::from_secs(2),
            base_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(1),
        }
    }
}

/// Durable backends; all optional, the in-memory table is the default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistenceSettings {
    /// `USE_PERSISTENT_STORES`
    pub enabled: bool,
    pub database_url: Option<String>,
    /// Read replica serving eventual reads; the primary is used when unset.
    pub database_replica_url: Option<String>,
    /// Change feed transport for the observer worker.
    pub redis_url: Option<String>,
}

/// Catalog configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogConfig {
    pub table_name: String,
    pub home_region: RegionCode,
    /// Second region used by the conflict simulation.
    pub replica_region: RegionCode,
    pub read_consistency: ConsistencyPolicy,
    pub store: StoreSettings,
    /// Artificial replication delay of the in-memory replicated table.
    pub replication_lag: Duration,
    pub heartbeat_interval: Duration,
    pub bind_addr: String,
    pub persistence: PersistenceSettings,
}

impl CatalogConfig {
    pub fn new(home_region: RegionCode, replica_region: RegionCode, policy: ConsistencyPolicy) -> Self {
        Self {
            table_name: "GlobalCatalog".to_string(),
            home_region,
            replica_region,
            read_consistency: policy,
            store: StoreSettings::default(),
            replication_lag: Duration::from_millis(500),
            heartbeat_interval: Duration::from_secs(30),
            bind_addr: "0.0.0.0:8080".to_string(),
            persistence: PersistenceSettings::default(),
        }
    }

    /// Load configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup (tests pass a map).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let home_region = region(&lookup, "HOME_REGION", "us-east-1")?;
        let replica_region = region(&lookup, "REPLICA_REGION", "eu-west-1")?;
        let read_consistency = match lookup("READ_CONSISTENCY") {
            Some(v) => v.parse()?,
            None => ConsistencyPolicy::default(),
        };

        let mut config = Self::new(home_region, replica_region, read_consistency);

        if let Some(name) = lookup("TABLE_NAME") {
            if name.trim().is_empty() {
                return Err(ConfigError::invalid("TABLE_NAME", "cannot be empty"));
            }
            config.table_name = name;
        }
        if let Some(addr) = lookup("BIND_ADDR") {
            config.bind_addr = addr;
        }

        let max_attempts = u32::try_from(number(&lookup, "STORE_MAX_ATTEMPTS", 5)?)
            .map_err(|_| ConfigError::invalid("STORE_MAX_ATTEMPTS", "out of range"))?;
        if max_attempts == 0 {
            return Err(ConfigError::invalid("STORE_MAX_ATTEMPTS", "must be at least 1"));
        }
        config.store.max_attempts = max_attempts;
        config.store.call_timeout = Duration::from_millis(number(&lookup, "STORE_TIMEOUT_MS", 2000)?);
        config.replication_lag = Duration::from_millis(number(&lookup, "REPLICATION_LAG_MS", 500)?);
        config.heartbeat_interval =
            Duration::from_secs(number(&lookup, "HEARTBEAT_INTERVAL_SECS", 30)?);

        config.persistence = PersistenceSettings {
            enabled: flag(&lookup, "USE_PERSISTENT_STORES")?,
            database_url: lookup("DATABASE_URL"),
            database_replica_url: lookup("DATABASE_REPLICA_URL"),
            redis_url: lookup("REDIS_URL"),
        };

        Ok(config)
    }
}

fn flag(lookup: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<bool, ConfigError> {
    match lookup(key).as_deref().map(str::trim) {
        None | Some("") => Ok(false),
        Some(v) if v.eq_ignore_ascii_case("true") || v == "1" => Ok(true),
        Some(v) if v.eq_ignore_ascii_case("false") || v == "0" => Ok(false),
        Some(v) => Err(ConfigError::invalid(key, format!("expected true or false, got {v}"))),
    }
}

fn region(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: &str,
) -> Result<RegionCode, ConfigError> {
    let raw = lookup(key).unwrap_or_else(|| default.to_string());
    RegionCode::new(raw).map_err(|e| ConfigError::invalid(key, e.to_string()))
}

fn number(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: u64,
) -> Result<u64, ConfigError> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|e| ConfigError::invalid(key, e.to_string())),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = CatalogConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.table_name, "GlobalCatalog");
        assert_eq!(config.home_region.as_str(), "us-east-1");
        assert_eq!(config.replica_region.as_str(), "eu-west-1");
        assert_eq!(config.read_consistency, ConsistencyPolicy::StrongLocal);
        assert_eq!(config.store.max_attempts, 5);
        assert_eq!(config.store.call_timeout, Duration::from_secs(2));
        assert_eq!(config.persistence, PersistenceSettings::default());
    }

    #[test]
    fn persistence_settings_are_read() {
        let config = CatalogConfig::from_lookup(lookup(&[
            ("USE_PERSISTENT_STORES", "true"),
            ("DATABASE_URL", "postgres://catalog@localhost/catalog"),
            ("REDIS_URL", "redis://localhost:6379"),
        ]))
        .unwrap();
        assert!(config.persistence.enabled);
        assert!(config.persistence.database_url.is_some());
        assert_eq!(config.persistence.database_replica_url, None);
        assert!(CatalogConfig::from_lookup(lookup(&[("USE_PERSISTENT_STORES", "maybe")])).is_err());
    }

    #[test]
    fn overrides_are_applied() {
        let config = CatalogConfig::from_lookup(lookup(&[
            ("HOME_REGION", "eu-west-1"),
            ("REPLICA_REGION", "ap-south-1"),
            ("READ_CONSISTENCY", "eventual-global"),
            ("STORE_MAX_ATTEMPTS", "3"),
            ("HEARTBEAT_INTERVAL_SECS", "5"),
        ]))
        .unwrap();
        assert_eq!(config.home_region.as_str(), "eu-west-1");
        assert_eq!(config.read_consistency, ConsistencyPolicy::EventualGlobal);
        assert_eq!(config.store.max_attempts, 3);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
    }

    #[test]
    fn invalid_values_are_errors_not_defaults() {
        assert!(CatalogConfig::from_lookup(lookup(&[("READ_CONSISTENCY", "strong")])).is_err());
        assert!(CatalogConfig::from_lookup(lookup(&[("HOME_REGION", "us_east_1")])).is_err());
        assert!(CatalogConfig::from_lookup(lookup(&[("STORE_MAX_ATTEMPTS", "0")])).is_err());
        assert!(CatalogConfig::from_lookup(lookup(&[("STORE_TIMEOUT_MS", "soon")])).is_err());
        assert!(CatalogConfig::from_lookup(lookup(&[("STORE_MAX_ATTEMPTS", "4294967296")])).is_err());
    }
}
