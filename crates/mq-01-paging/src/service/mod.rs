//! Service Layer
//!
//! Paging stores, the manager that owns them, delivery and transactions.

pub mod coordinator;
pub mod journal;
pub mod large_body;
pub mod manager;
pub mod store;
pub mod subscription;


pub use coordinator::{TransactionCoordinator, TransactionHandle};
pub use journal::TransactionJournal;
pub use large_body::LargeBodyStore;
pub use manager::PagingManager;
pub use store::{AdmitOutcome, PagingStore};
pub use subscription::{Delivery, QueueSubscription};
