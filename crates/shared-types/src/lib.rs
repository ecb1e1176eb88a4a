//! # Shared Types Crate
//!
//! Entities shared by the paging store (`mq-01`), the large-message
//! streamer (`mq-02`) and the broker runtime.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: message and position types are defined once.
//! - **Validated Names**: `Address` and `QueueName` can only be built through
//!   their checked constructors.
//! - **Serializable**: every type round-trips through serde so it can be
//!   written to page files and transaction records.

pub mod entities;
pub mod errors;

pub use entities::*;
pub use errors::*;
