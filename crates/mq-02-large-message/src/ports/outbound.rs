//! # Outbound Ports (Driven Ports)
//!
//! The transport a producer pushes bodies through. The in-VM adapter hands
//! frames straight to a receiver; a network transport would encode them.

use async_trait::async_trait;

use crate::domain::errors::LargeMessageResult;
use crate::domain::frame::{ChunkFrame, LargeMessageHeader, TransferId};

/// Carries bodies from a producer to the broker.
///
/// Credit for `Data` frames is returned out of band, through the
/// [`CreditWindow`](crate::service::CreditWindow) the producer waits on.
#[async_trait]
pub trait ChunkSink: Send + Sync {
    /// A body under the large-message threshold, in one piece.
    async fn send_inline(&self, header: LargeMessageHeader, body: Vec<u8>)
        -> LargeMessageResult<()>;

    /// One frame of a chunked transfer. Frames of a transfer are sent in
    /// order and never concurrently.
    async fn send_frame(&self, transfer: TransferId, frame: ChunkFrame) -> LargeMessageResult<()>;
}
