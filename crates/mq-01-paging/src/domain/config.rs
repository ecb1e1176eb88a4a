//! # Paging Configuration
//!
//! Broker-wide knobs. Per-address limits live in [`AddressSettings`].
//!
//! [`AddressSettings`]: super::settings::AddressSettings

use std::time::Duration;

use super::errors::{PagingError, PagingResult};

/// Configuration for the paging manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagingConfig {
    /// Resident byte limit summed over all addresses. `-1` is unbounded.
    pub global_max_size_bytes: i64,

    /// Period of the background reclamation pass (default: 1s).
    pub reclaim_interval: Duration,

    /// How long `stop` waits for in-flight transactions (default: 10s).
    pub stop_grace: Duration,

    /// Sync transaction records before acknowledging a commit (default: true).
    pub sync_transactions: bool,
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            global_max_size_bytes: -1,
            reclaim_interval: Duration::from_secs(1),
            stop_grace: Duration::from_secs(10),
            sync_transactions: true,
        }
    }
}

impl PagingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_global_max_size(mut self, bytes: i64) -> Self {
        self.global_max_size_bytes = bytes;
        self
    }

    pub fn with_reclaim_interval(mut self, interval: Duration) -> Self {
        self.reclaim_interval = interval;
        self
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn global_max_size(&self) -> Option<u64> {
        (self.global_max_size_bytes >= 0).then_some(self.global_max_size_bytes as u64)
    }

    pub fn validate(&self) -> PagingResult<()> {
        if self.global_max_size_bytes < -1 {
            return Err(PagingError::InvalidConfig {
                reason: format!(
                    "global_max_size_bytes {} is below -1",
                    self.global_max_size_bytes
                ),
            });
        }
        if self.reclaim_interval.is_zero() {
            return Err(PagingError::InvalidConfig {
                reason: "reclaim_interval must be positive".into(),
            });
        }
        Ok(())
    }
}
