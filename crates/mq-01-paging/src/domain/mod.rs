//! Domain Layer
//!
//! Admission rules, page and record formats, cursors and transactions.
//! File access goes through the [`SequentialFile`] port only.
//!
//! [`SequentialFile`]: crate::ports::outbound::SequentialFile

pub mod accounting;
pub mod admission;
pub mod config;
pub mod cursor;
pub mod errors;
pub mod metrics;
pub mod page;
pub mod record;
pub mod session;
pub mod settings;
pub mod transaction;

pub use accounting::GlobalSizeTracker;
pub use admission::{decide, exceeds_limit, AdmissionDecision, PagingState};
pub use config::PagingConfig;
pub use cursor::{CursorCheckpoint, CursorStep, PageCursor, PageIndex, Visibility};
pub use errors::{PagingError, PagingResult};
pub use metrics::{PagingMetrics, ReclaimReport, StoreMetrics};
pub use page::{EntryMeta, Page, PAGE_EXTENSION};
pub use record::{PagedMessage, PAGE_MAGIC};
pub use session::{SendContext, SessionHandle};
pub use settings::{
    AddressFullPolicy, AddressSettings, AddressSettingsFile, AddressSettingsRepository,
    DEFAULT_PAGE_SIZE_BYTES,
};
pub use transaction::{DeliveryId, Transaction, TxOperation, TxRecord, TxState};
