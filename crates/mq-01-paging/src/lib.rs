//! # Paging Subsystem
//!
//! **Subsystem ID:** mq-01
//! **Status:** Production-Ready
//!
//! ## Purpose
//!
//! Keeps the broker's memory bounded. Each address has a resident byte limit
//! and a full policy; once the limit is crossed, messages either spill to
//! append-only page files on disk (PAGE), make the producer wait (BLOCK), are
//! discarded (DROP) or are refused (FAIL). Queues bound to the address read
//! paged messages back through a per-queue cursor, and pages every cursor has
//! acknowledged are deleted.
//!
//! ## Domain Invariants
//!
//! | Invariant | Enforcement Location |
//! |-----------|---------------------|
//! | Once an address pages, every later message pages until it leaves paging | `domain/admission.rs` - `decide()` |
//! | A queue receives paged messages in append order | `domain/cursor.rs` - `PageCursor::next()` |
//! | A page is deleted only when every cursor's frontier is past it | `service/store.rs` - `reclaim()` |
//! | Leaving paging needs every page consumed and resident bytes within the limit | `service/store.rs` - `reclaim()` |
//! | Uncommitted transactional entries are never delivered | `service/store.rs` - `PageIndex::visibility()` |
//! | Torn record tails are truncated on reload, never delivered | `domain/page.rs` - `Page::load()` |
//! | An I/O failure fences only the address it happened on | `service/store.rs` - `fail_locked()` |
//!
//! ## Address States
//!
//! ```text
//! [NOT_PAGING] ──resident + incoming > max (PAGE policy)──→ [PAGING]
//!       ↑                                                       │
//!       └──all pages acknowledged, resident ≤ max (reclaim)─────┘
//! ```
//!
//! ## Full Policies
//!
//! | Policy | Over limit | While paging |
//! |--------|-----------|--------------|
//! | `PAGE` | Append to page | Append to page |
//! | `BLOCK` | Wait for space, `SendTimeout` / `Closed` | Append to page |
//! | `DROP` | Discard | Append to page |
//! | `FAIL` | `DestinationFull` | `DestinationFull` |
//!
//! ## On-Disk Layout
//!
//! ```text
//! <root>/
//!   LOCK                                 process lock (feature `locking`)
//!   addr-<hex(address)>/
//!     0000000001.page                    MQPAGE magic + records
//!     <hex(queue)>.cursor                JSON cursor checkpoint
//!   transactions/<id>.tx                 MQLOG magic + framed TxRecords
//!   large-messages/<id>.msg              raw large message bodies
//! ```
//!
//! Page record: `[len u32][crc32 u32][message id u64][tx id u64][large body id u64][bincode]`.
//!
//! ## Module Structure (Hexagonal Architecture)
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      OUTER LAYER                                │
//! │  adapters/file.rs   - files on disk, directory lock             │
//! │  adapters/memory.rs - in-memory files with fault injection      │
//! └─────────────────────────────────────────────────────────────────┘
//!                          ↑ implements ↑
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      MIDDLE LAYER                               │
//! │  ports/inbound.rs  - PagingApi trait                            │
//! │  ports/outbound.rs - SequentialFile, PagingStoreFactory traits  │
//! │  service/          - PagingStore, PagingManager, coordinator    │
//! └─────────────────────────────────────────────────────────────────┘
//!                          ↑ uses ↑
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      INNER LAYER                                │
//! │  domain/admission.rs   - policy decisions                       │
//! │  domain/page.rs        - page files and record index            │
//! │  domain/cursor.rs      - per-queue read/ack position            │
//! │  domain/transaction.rs - local and XA transaction state         │
//! │  domain/errors.rs      - PagingError enum                       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! let factory = Arc::new(FilePagingStoreFactory::open("data/paging")?);
//! let settings = Arc::new(AddressSettingsRepository::new(
//!     AddressSettings::new().with_max_size(10 * 1024 * 1024),
//! ));
//! let manager = PagingManager::new(PagingConfig::default(), factory, settings)?;
//! manager.start()?;
//!
//! let sub = manager.bind_queue(address.clone(), queue)?;
//! manager.send(message, &SendContext::detached()).await?;
//! ```

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod service;

#[cfg(test)]
pub(crate) mod test_utils;

pub use adapters::*;
pub use domain::*;
pub use ports::*;
pub use service::*;
