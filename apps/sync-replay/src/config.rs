use std::env;

use entity_sync::SyncConfig;
use thiserror::Error;

const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid ENTITY_SYNC_DEDUP_WINDOW_MS: {0}")]
    InvalidDedupWindowMs(String),
    #[error("invalid ENTITY_SYNC_GUARD_CAPACITY: {0}")]
    InvalidGuardCapacity(String),
    #[error("invalid ENTITY_SYNC_WORKFLOW_EXECUTION_CAP: {0}")]
    InvalidWorkflowExecutionCap(String),
    #[error("invalid ENTITY_SYNC_SUPPRESS_SELF_ECHO: {0}")]
    InvalidSuppressSelfEcho(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayConfig {
    pub sync: SyncConfig,
    /// Fallback `tracing` filter when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl ReplayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads settings through `lookup` instead of the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = SyncConfig::default();
        let value = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let local_actor_id = value("ENTITY_SYNC_LOCAL_ACTOR_ID");
        let dedup_window_ms = match value("ENTITY_SYNC_DEDUP_WINDOW_MS") {
            Some(raw) => raw
                .parse::<u64>()
                .map_err(|error| ConfigError::InvalidDedupWindowMs(format!("{raw}: {error}")))?,
            None => defaults.dedup_window_ms,
        };
        let guard_capacity = match value("ENTITY_SYNC_GUARD_CAPACITY") {
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|error| ConfigError::InvalidGuardCapacity(format!("{raw}: {error}")))?,
            None => defaults.guard_capacity,
        };
        if guard_capacity == 0 {
            return Err(ConfigError::InvalidGuardCapacity(
                "must be greater than zero".to_string(),
            ));
        }
        let workflow_execution_cap = match value("ENTITY_SYNC_WORKFLOW_EXECUTION_CAP") {
            Some(raw) => raw.parse::<usize>().map_err(|error| {
                ConfigError::InvalidWorkflowExecutionCap(format!("{raw}: {error}"))
            })?,
            None => defaults.workflow_execution_cap,
        };
        let suppress_self_echo = match value("ENTITY_SYNC_SUPPRESS_SELF_ECHO") {
            Some(raw) => parse_bool(&raw).map_err(ConfigError::InvalidSuppressSelfEcho)?,
            None => defaults.suppress_self_echo,
        };
        let log_filter =
            value("ENTITY_SYNC_LOG_FILTER").unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        Ok(Self {
            sync: SyncConfig {
                local_actor_id,
                dedup_window_ms,
                guard_capacity,
                workflow_execution_cap,
                suppress_self_echo,
            },
            log_filter,
        })
    }
}

fn parse_bool(raw: &str) -> Result<bool, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{ConfigError, ReplayConfig};

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let values = pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect::<HashMap<_, _>>();
        move |key| values.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = ReplayConfig::from_lookup(lookup(&[]));
        let Ok(config) = config else {
            assert!(false, "empty environment should load");
            return;
        };
        assert_eq!(config.sync.dedup_window_ms, 2_000);
        assert_eq!(config.sync.workflow_execution_cap, 100);
        assert!(config.sync.suppress_self_echo);
        assert_eq!(config.sync.local_actor_id, None);
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn values_are_read_and_trimmed() {
        let config = ReplayConfig::from_lookup(lookup(&[
            ("ENTITY_SYNC_LOCAL_ACTOR_ID", " user-7 "),
            ("ENTITY_SYNC_DEDUP_WINDOW_MS", "500"),
            ("ENTITY_SYNC_WORKFLOW_EXECUTION_CAP", "10"),
            ("ENTITY_SYNC_SUPPRESS_SELF_ECHO", "off"),
            ("ENTITY_SYNC_LOG_FILTER", "entity_sync=debug"),
        ]));
        let Ok(config) = config else {
            assert!(false, "valid environment should load");
            return;
        };
        assert_eq!(config.sync.local_actor_id.as_deref(), Some("user-7"));
        assert_eq!(config.sync.dedup_window_ms, 500);
        assert_eq!(config.sync.workflow_execution_cap, 10);
        assert!(!config.sync.suppress_self_echo);
        assert_eq!(config.log_filter, "entity_sync=debug");
    }

    #[test]
    fn invalid_values_are_typed_errors() {
        assert!(matches!(
            ReplayConfig::from_lookup(lookup(&[("ENTITY_SYNC_DEDUP_WINDOW_MS", "soon")])),
            Err(ConfigError::InvalidDedupWindowMs(_))
        ));
        assert!(matches!(
            ReplayConfig::from_lookup(lookup(&[("ENTITY_SYNC_SUPPRESS_SELF_ECHO", "maybe")])),
            Err(ConfigError::InvalidSuppressSelfEcho(value)) if value == "maybe"
        ));
        assert!(matches!(
            ReplayConfig::from_lookup(lookup(&[("ENTITY_SYNC_GUARD_CAPACITY", "0")])),
            Err(ConfigError::InvalidGuardCapacity(_))
        ));
    }
}
