//! # Inbound Ports (Driving Ports)
//!
//! The broker side of a transfer: accepts inline bodies and chunk frames,
//! spools large bodies to disk and admits the finished message.

use async_trait::async_trait;
use mq_01_paging::{AdmitOutcome, SendContext, TransactionHandle};
use shared_types::MessageId;

use crate::domain::errors::LargeMessageResult;
use crate::domain::frame::{ChunkFrame, LargeMessageHeader, TransferId};

/// A message the broker has finished receiving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub message_id: MessageId,
    pub length: u64,
    /// `None` when the message was staged in a transaction instead.
    pub admitted: Option<AdmitOutcome>,
}

#[async_trait]
pub trait LargeMessageReceiverApi: Send + Sync {
    async fn receive_inline(
        &self,
        header: LargeMessageHeader,
        body: Vec<u8>,
        tx: Option<&TransactionHandle>,
        ctx: &SendContext,
    ) -> LargeMessageResult<ReceivedMessage>;

    /// Apply one frame. Returns the message once `End` has been applied.
    ///
    /// Any error tears the transfer down and deletes its spooled body.
    async fn receive_frame(
        &self,
        transfer: TransferId,
        frame: ChunkFrame,
        tx: Option<&TransactionHandle>,
        ctx: &SendContext,
    ) -> LargeMessageResult<Option<ReceivedMessage>>;

    /// Transfers begun and not yet ended or cancelled.
    fn active_transfers(&self) -> usize;
}
