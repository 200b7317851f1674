use std::str::FromStr;

use crate::event_sourcing::store::{EventStoreConfig, SequenceCheck};
use crate::event_sourcing::unit_of_work::DispatchMode;

// ============================================================================
// Runtime Configuration
// ============================================================================
//
// Read from the environment (all keys optional):
//
//   EVENT_RUNTIME_BATCH_SIZE        records per sub-batch insert (default 100)
//   EVENT_RUNTIME_SEQUENCE_CHECK    strict | unchecked (default strict)
//   EVENT_RUNTIME_DISPATCH_MODE     sync | detached (default sync)
//   EVENT_RUNTIME_MAX_CONNECTIONS   PostgreSQL pool size (default 5)
//   DATABASE_URL                    PostgreSQL backend; in-memory when unset
//
// ============================================================================

pub const BATCH_SIZE_KEY: &str = "EVENT_RUNTIME_BATCH_SIZE";
pub const SEQUENCE_CHECK_KEY: &str = "EVENT_RUNTIME_SEQUENCE_CHECK";
pub const DISPATCH_MODE_KEY: &str = "EVENT_RUNTIME_DISPATCH_MODE";
pub const MAX_CONNECTIONS_KEY: &str = "EVENT_RUNTIME_MAX_CONNECTIONS";
pub const DATABASE_URL_KEY: &str = "DATABASE_URL";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub store: EventStoreConfig,
    pub dispatch_mode: DispatchMode,
    /// PostgreSQL connection string; `None` selects the in-memory backend
    pub database_url: Option<String>,
    pub max_connections: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            store: EventStoreConfig::default(),
            dispatch_mode: DispatchMode::Synchronous,
            database_url: None,
            max_connections: 5,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or blank keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let mut config = Self::default();

        if let Some(value) = get(BATCH_SIZE_KEY) {
            let batch_size: usize = parse(BATCH_SIZE_KEY, &value)?;
            config.store = config.store.with_batch_size(batch_size);
        }
        if let Some(value) = get(SEQUENCE_CHECK_KEY) {
            config.store.sequence_check = parse::<SequenceCheck>(SEQUENCE_CHECK_KEY, &value)?;
        }
        if let Some(value) = get(DISPATCH_MODE_KEY) {
            config.dispatch_mode = parse(DISPATCH_MODE_KEY, &value)?;
        }
        if let Some(value) = get(MAX_CONNECTIONS_KEY) {
            config.max_connections = parse::<u32>(MAX_CONNECTIONS_KEY, &value)?.max(1);
        }
        config.database_url = get(DATABASE_URL_KEY);

        Ok(config)
    }
}

fn parse<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_nothing_is_set() {
        let config = RuntimeConfig::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config.store.batch_size, 100);
        assert_eq!(config.store.sequence_check, SequenceCheck::Strict);
        assert_eq!(config.dispatch_mode, DispatchMode::Synchronous);
        assert_eq!(config.database_url, None);
        assert_eq!(config.max_connections, 5);
    }

    #[test]
    fn test_values_are_read() {
        let config = RuntimeConfig::from_lookup(lookup(&[
            (BATCH_SIZE_KEY, "250"),
            (SEQUENCE_CHECK_KEY, "unchecked"),
            (DISPATCH_MODE_KEY, "detached"),
            (MAX_CONNECTIONS_KEY, "12"),
            (DATABASE_URL_KEY, "postgres://localhost/events"),
        ]))
        .unwrap();

        assert_eq!(config.store.batch_size, 250);
        assert_eq!(config.store.sequence_check, SequenceCheck::Unchecked);
        assert_eq!(config.dispatch_mode, DispatchMode::Detached);
        assert_eq!(config.max_connections, 12);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/events"));
    }

    #[test]
    fn test_zero_batch_size_is_clamped() {
        let config = RuntimeConfig::from_lookup(lookup(&[(BATCH_SIZE_KEY, "0")])).unwrap();
        assert_eq!(config.store.batch_size, 1);
    }

    #[test]
    fn test_blank_values_keep_defaults() {
        let config = RuntimeConfig::from_lookup(lookup(&[(DATABASE_URL_KEY, "  "), (BATCH_SIZE_KEY, "")])).unwrap();
        assert_eq!(config.database_url, None);
        assert_eq!(config.store.batch_size, 100);
    }

    #[test]
    fn test_invalid_values_are_reported() {
        let err = RuntimeConfig::from_lookup(lookup(&[(BATCH_SIZE_KEY, "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: BATCH_SIZE_KEY, .. }));

        let err = RuntimeConfig::from_lookup(lookup(&[(SEQUENCE_CHECK_KEY, "sometimes")])).unwrap_err();
        assert!(err.to_string().contains("EVENT_RUNTIME_SEQUENCE_CHECK"));
    }
}
