//! Configuration types for the OffOrder store and its worker.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{OffOrderError, Result, constants};

/// Configuration for one deployment sharing a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OffOrderConfig {
    /// Prefix prepended to every key (isolates environments sharing a store).
    pub namespace: String,
    /// Lease on a user's account lock, in milliseconds.
    pub lock_lease_ms: u64,
    /// Attempts for atomic multi-key operations before reporting contention.
    pub tx_retry_limit: u32,
    /// Compensation policy for the background worker.
    pub worker: WorkerConfig,
}

impl Default for OffOrderConfig {
    fn default() -> Self {
        Self {
            namespace: constants::DEFAULT_NAMESPACE.to_string(),
            lock_lease_ms: constants::DEFAULT_LOCK_LEASE_MS,
            tx_retry_limit: constants::DEFAULT_TX_RETRY_LIMIT,
            worker: WorkerConfig::default(),
        }
    }
}

impl OffOrderConfig {
    /// Default configuration under the given namespace.
    #[must_use]
    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    /// Parse and validate a JSON document. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(json)
            .map_err(|e| OffOrderError::Configuration(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(OffOrderError::Configuration(
                "namespace must not be empty".into(),
            ));
        }
        if self.lock_lease_ms == 0 {
            return Err(OffOrderError::Configuration(
                "lock_lease_ms must be > 0".into(),
            ));
        }
        if self.tx_retry_limit == 0 {
            return Err(OffOrderError::Configuration(
                "tx_retry_limit must be > 0".into(),
            ));
        }
        self.worker.validate()
    }

    #[must_use]
    pub fn lock_lease(&self) -> Duration {
        Duration::from_millis(self.lock_lease_ms)
    }
}

/// How the worker retries a compensating transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Failed attempts after which the item is reported stuck.
    pub escalate_after: u32,
    /// Give up after this many attempts. `None` retries forever.
    pub max_revert_attempts: Option<u32>,
    /// Pause between attempts, in milliseconds.
    pub revert_backoff_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            escalate_after: constants::DEFAULT_REVERT_ESCALATE_AFTER,
            max_revert_attempts: None,
            revert_backoff_ms: constants::DEFAULT_REVERT_BACKOFF_MS,
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.escalate_after == 0 {
            return Err(OffOrderError::Configuration(
                "worker.escalate_after must be > 0".into(),
            ));
        }
        if self.max_revert_attempts == Some(0) {
            return Err(OffOrderError::Configuration(
                "worker.max_revert_attempts must be > 0 when set".into(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn revert_backoff(&self) -> Duration {
        Duration::from_millis(self.revert_backoff_ms)
    }
}
