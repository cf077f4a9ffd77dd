//! Configuration for the queue core.
//!
//! Nested, serde-deserializable component configs with sensible
//! defaults. Environment variables (`CONVEYOR_*`) override individual
//! fields, which is how deployments tune timings without shipping a
//! config file.

use crate::errors::{ConveyorError, ConveyorResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ConveyorConfig {
    pub claims: ClaimConfig,
    pub resolvers: ResolverConfig,
    pub store: StoreConfig,
    pub backoff: BackoffConfig,
    pub lifecycle: LifecycleConfig,
}

/// Work-claim timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimConfig {
    /// How long a claim lasts before it must be reclaimed, in seconds.
    pub claim_timeout_seconds: u32,
    /// Long-poll ceiling for claimWork, in seconds.
    pub long_poll_seconds: u64,
    /// Sleep between empty polls inside the long-poll window.
    pub poll_interval_ms: u64,
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self {
            claim_timeout_seconds: 1200,
            long_poll_seconds: crate::constants::CLAIM_LONG_POLL_SECONDS,
            poll_interval_ms: 500,
        }
    }
}

impl ClaimConfig {
    pub fn claim_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::from(self.claim_timeout_seconds))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Background resolver loop tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Messages fetched per receive.
    pub batch_size: usize,
    /// Visibility window granted while a handler works a message, in
    /// seconds. Messages left in place reappear after this window.
    pub visibility_seconds: u32,
    /// Sleep between empty polls.
    pub poll_interval_ms: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            batch_size: 16,
            visibility_seconds: 300,
            poll_interval_ms: 1000,
        }
    }
}

impl ResolverConfig {
    pub fn visibility(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::from(self.visibility_seconds))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Store retry behavior under optimistic-concurrency conflicts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Times a `modify` mutator is re-applied before giving up.
    pub max_modify_attempts: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_modify_attempts: 10,
        }
    }
}

/// Capped exponential backoff for transient infrastructure errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter_enabled: bool,
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 100,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter_enabled: true,
            max_attempts: 5,
        }
    }
}

/// Lifecycle policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Creating a task extends its group's expiry to at least the task's
    /// expiry plus this margin, in seconds.
    pub task_group_expires_extension_seconds: i64,
    /// Entries served from the task-definition read cache.
    pub definition_cache_capacity: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            task_group_expires_extension_seconds: 3600,
            definition_cache_capacity: 1024,
        }
    }
}

impl LifecycleConfig {
    pub fn task_group_expires_extension(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.task_group_expires_extension_seconds)
    }
}

impl ConveyorConfig {
    /// Load defaults, then apply `CONVEYOR_*` environment overrides.
    pub fn from_env() -> ConveyorResult<Self> {
        let mut config = Self::default();

        if let Some(v) = env_parse::<u32>("CONVEYOR_CLAIM_TIMEOUT_SECONDS")? {
            config.claims.claim_timeout_seconds = v;
        }
        if let Some(v) = env_parse::<u64>("CONVEYOR_LONG_POLL_SECONDS")? {
            config.claims.long_poll_seconds = v;
        }
        if let Some(v) = env_parse::<usize>("CONVEYOR_RESOLVER_BATCH_SIZE")? {
            config.resolvers.batch_size = v;
        }
        if let Some(v) = env_parse::<u32>("CONVEYOR_RESOLVER_VISIBILITY_SECONDS")? {
            config.resolvers.visibility_seconds = v;
        }
        if let Some(v) = env_parse::<u32>("CONVEYOR_STORE_MAX_MODIFY_ATTEMPTS")? {
            config.store.max_modify_attempts = v;
        }
        if let Some(v) = env_parse::<i64>("CONVEYOR_TASK_GROUP_EXPIRES_EXTENSION_SECONDS")? {
            config.lifecycle.task_group_expires_extension_seconds = v;
        }

        Ok(config)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> ConveyorResult<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw.parse::<T>().map(Some).map_err(|e| {
            ConveyorError::ConfigurationError(format!("{name}={raw} is invalid: {e}"))
        }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = ConveyorConfig::default();
        assert_eq!(config.claims.long_poll_seconds, 20);
        assert_eq!(config.claims.claim_timeout_seconds, 1200);
        assert!(config.resolvers.batch_size > 0);
        assert!(config.store.max_modify_attempts >= 2);
    }

    #[test]
    fn partial_json_deserializes_over_defaults() {
        let config: ConveyorConfig =
            serde_json::from_str(r#"{"claims": {"claim_timeout_seconds": 60}}"#).unwrap();
        assert_eq!(config.claims.claim_timeout_seconds, 60);
        assert_eq!(config.claims.long_poll_seconds, 20);
    }
}
