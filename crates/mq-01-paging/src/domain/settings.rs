//! # Address Settings
//!
//! Per-address memory limits and the policy applied when a limit is reached.
//!
//! Settings are looked up hierarchically: `orders.eu.paris` falls back to
//! `orders.eu`, then `orders`, then the repository default.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use shared_types::Address;
use std::collections::HashMap;
use std::time::Duration;

use super::errors::{PagingError, PagingResult};

/// Default page file size (10 MiB).
pub const DEFAULT_PAGE_SIZE_BYTES: u64 = 10 * 1024 * 1024;

/// What an address does once its resident bytes reach `max_size_bytes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AddressFullPolicy {
    /// Spill new messages to page files.
    Page,
    /// Suspend producers until space is freed.
    Block,
    /// Silently discard new messages.
    Drop,
    /// Reject new messages with `DestinationFull`.
    Fail,
}

impl std::fmt::Display for AddressFullPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AddressFullPolicy::Page => "PAGE",
            AddressFullPolicy::Block => "BLOCK",
            AddressFullPolicy::Drop => "DROP",
            AddressFullPolicy::Fail => "FAIL",
        };
        f.write_str(name)
    }
}

/// Limits for a single address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddressSettings {
    /// Resident byte limit. `-1` means unbounded.
    pub max_size_bytes: i64,
    /// Size at which the active page file rolls over.
    pub page_size_bytes: u64,
    pub full_policy: AddressFullPolicy,
    /// Upper bound on a BLOCK wait. `None` waits until space or close.
    pub block_timeout_ms: Option<u64>,
    /// Sync page writes of durable messages immediately.
    pub sync_durable_writes: bool,
}

impl Default for AddressSettings {
    fn default() -> Self {
        Self {
            max_size_bytes: -1,
            page_size_bytes: DEFAULT_PAGE_SIZE_BYTES,
            full_policy: AddressFullPolicy::Page,
            block_timeout_ms: None,
            sync_durable_writes: true,
        }
    }
}

impl AddressSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_size(mut self, bytes: i64) -> Self {
        self.max_size_bytes = bytes;
        self
    }

    pub fn with_page_size(mut self, bytes: u64) -> Self {
        self.page_size_bytes = bytes;
        self
    }

    pub fn with_policy(mut self, policy: AddressFullPolicy) -> Self {
        self.full_policy = policy;
        self
    }

    pub fn with_block_timeout(mut self, timeout: Duration) -> Self {
        self.block_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Resident limit, or `None` when unbounded.
    pub fn max_size(&self) -> Option<u64> {
        (self.max_size_bytes >= 0).then_some(self.max_size_bytes as u64)
    }

    pub fn block_timeout(&self) -> Option<Duration> {
        self.block_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> PagingResult<()> {
        if self.max_size_bytes < -1 {
            return Err(PagingError::InvalidConfig {
                reason: format!("max_size_bytes {} is below -1", self.max_size_bytes),
            });
        }
        if self.page_size_bytes == 0 {
            return Err(PagingError::InvalidConfig {
                reason: "page_size_bytes must be positive".into(),
            });
        }
        Ok(())
    }
}

/// Serialized form of a settings repository (`MQ_ADDRESS_SETTINGS` file).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AddressSettingsFile {
    pub default: AddressSettings,
    pub addresses: HashMap<String, AddressSettings>,
}

/// Settings lookup shared by the manager and every store.
#[derive(Debug, Default)]
pub struct AddressSettingsRepository {
    default: RwLock<AddressSettings>,
    by_match: RwLock<HashMap<String, AddressSettings>>,
}

impl AddressSettingsRepository {
    pub fn new(default: AddressSettings) -> Self {
        Self {
            default: RwLock::new(default),
            by_match: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_file(file: AddressSettingsFile) -> PagingResult<Self> {
        file.default.validate()?;
        for settings in file.addresses.values() {
            settings.validate()?;
        }
        Ok(Self {
            default: RwLock::new(file.default),
            by_match: RwLock::new(file.addresses),
        })
    }

    pub fn from_json(json: &str) -> PagingResult<Self> {
        let file: AddressSettingsFile =
            serde_json::from_str(json).map_err(|e| PagingError::InvalidConfig {
                reason: format!("address settings: {}", e),
            })?;
        Self::from_file(file)
    }

    pub fn set(&self, address_match: impl Into<String>, settings: AddressSettings) {
        self.by_match.write().insert(address_match.into(), settings);
    }

    pub fn set_default(&self, settings: AddressSettings) {
        *self.default.write() = settings;
    }

    /// Most specific settings for `address`.
    pub fn get(&self, address: &Address) -> AddressSettings {
        let by_match = self.by_match.read();
        let mut current = Some(address.clone());
        while let Some(candidate) = current {
            if let Some(settings) = by_match.get(candidate.as_str()) {
                return settings.clone();
            }
            current = candidate.parent();
        }
        self.default.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(name: &str) -> Address {
        Address::new(name).unwrap()
    }

    #[test]
    fn test_default_is_unbounded_paging() {
        let settings = AddressSettings::default();
        assert_eq!(settings.max_size(), None);
        assert_eq!(settings.full_policy, AddressFullPolicy::Page);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_lookup_falls_back_through_hierarchy() {
        let repo = AddressSettingsRepository::new(AddressSettings::default());
        repo.set("orders", AddressSettings::new().with_max_size(1000));
        repo.set(
            "orders.eu",
            AddressSettings::new().with_policy(AddressFullPolicy::Block),
        );

        assert_eq!(
            repo.get(&addr("orders.eu.paris")).full_policy,
            AddressFullPolicy::Block
        );
        assert_eq!(repo.get(&addr("orders.us")).max_size(), Some(1000));
        assert_eq!(repo.get(&addr("billing")).max_size(), None);
    }

    #[test]
    fn test_settings_parse_from_json() {
        let json = r#"{
            "default": { "max_size_bytes": 4096 },
            "addresses": {
                "audit": { "full_policy": "DROP", "page_size_bytes": 512 }
            }
        }"#;
        let repo = AddressSettingsRepository::from_json(json).unwrap();
        let audit = repo.get(&addr("audit"));
        assert_eq!(audit.full_policy, AddressFullPolicy::Drop);
        assert_eq!(audit.page_size_bytes, 512);
        assert_eq!(repo.get(&addr("other")).max_size(), Some(4096));
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let json = r#"{ "default": { "page_size_bytes": 0 } }"#;
        assert!(matches!(
            AddressSettingsRepository::from_json(json),
            Err(PagingError::InvalidConfig { .. })
        ));
        assert!(AddressSettings::new().with_max_size(-5).validate().is_err());
    }
}
