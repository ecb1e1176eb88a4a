//! # Large Message Subsystem
//!
//! **Subsystem ID:** mq-02
//! **Status:** Production-Ready
//!
//! ## Purpose
//!
//! Moves message bodies too big to travel in one piece. A producer splits the
//! body into bounded chunks and sends them under a confirmation window of its
//! own, separate from normal flow control. The broker spools chunks to the
//! large-message store as they arrive and admits the finished message through
//! the paging layer (`mq-01`) like any other. Consumers read the body back
//! into memory or stream it to a writer.
//!
//! ## Domain Invariants
//!
//! | Invariant | Enforcement Location |
//! |-----------|---------------------|
//! | Chunk offsets are contiguous; a gap fails the transfer | `service/receiver.rs`, `domain/buffer.rs` |
//! | A body is complete only after an explicit `End` | `domain/buffer.rs` - `apply()` |
//! | `End` length must equal the bytes received | `service/receiver.rs` - `finish_locked()` |
//! | Unconfirmed chunk bytes never exceed the window | `service/window.rs` - `CreditWindow` |
//! | A failed or cancelled transfer leaves no body file | `service/receiver.rs` - `teardown()` |
//! | A chunk for a BLOCK address at its limit waits | `service/receiver.rs` - `append_locked()` |
//!
//! ## Transfer
//!
//! ```text
//! Producer                               Broker
//!    │── BEGIN {header} ───────────────────→│ create large-messages/<id>.msg
//!    │── DATA {0, chunk} ──(window credit)─→│ wait_for_capacity, append
//!    │←──────────────────────── confirm ────│
//!    │── DATA {n, chunk} ──────────────────→│ ...
//!    │── END {total} ──────────────────────→│ send / stage in transaction
//! ```
//!
//! ## Module Structure (Hexagonal Architecture)
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  adapters/in_vm.rs  - producer and broker in one process        │
//! └─────────────────────────────────────────────────────────────────┘
//!                          ↑ implements ↑
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  ports/inbound.rs   - LargeMessageReceiverApi                   │
//! │  ports/outbound.rs  - ChunkSink                                 │
//! │  service/           - producer, receiver, window, consumer      │
//! └─────────────────────────────────────────────────────────────────┘
//!                          ↑ uses ↑
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  domain/frame.rs    - ChunkFrame, LargeMessageHeader            │
//! │  domain/splitter.rs - lazy body segmentation                    │
//! │  domain/buffer.rs   - consumer reassembly                       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! let receiver = Arc::new(ChunkReceiver::new(manager.clone()));
//! let window = CreditWindow::new(config.confirmation_window_size);
//! let sink = Arc::new(InVmChunkSink::new(receiver, window.clone(), session.context()));
//! let producer = LargeMessageProducer::new(config, sink, window)?;
//!
//! producer.send(LargeMessageHeader::new(address), File::open(path)?, &ctx).await?;
//! ```

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod service;

pub use adapters::*;
pub use domain::*;
pub use ports::*;
pub use service::*;
