//! Ports Layer
//!
//! - `inbound` - what the broker side of a transfer offers
//! - `outbound` - where a producer sends its frames

pub mod inbound;
pub mod outbound;

pub use inbound::{LargeMessageReceiverApi, ReceivedMessage};
pub use outbound::ChunkSink;
