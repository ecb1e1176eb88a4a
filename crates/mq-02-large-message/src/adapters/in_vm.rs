//! # In-VM Transport
//!
//! Hands frames straight to a receiver and returns the credit of each `Data`
//! frame once the receiver has applied it.

use async_trait::async_trait;
use mq_01_paging::{SendContext, TransactionHandle};
use parking_lot::Mutex;
use std::sync::Arc;

use crate::domain::errors::LargeMessageResult;
use crate::domain::frame::{ChunkFrame, LargeMessageHeader, TransferId};
use crate::ports::inbound::{LargeMessageReceiverApi, ReceivedMessage};
use crate::ports::outbound::ChunkSink;
use crate::service::window::CreditWindow;

pub struct InVmChunkSink {
    receiver: Arc<dyn LargeMessageReceiverApi>,
    window: CreditWindow,
    ctx: SendContext,
    tx: Option<TransactionHandle>,
    received: Mutex<Vec<ReceivedMessage>>,
}

impl InVmChunkSink {
    pub fn new(
        receiver: Arc<dyn LargeMessageReceiverApi>,
        window: CreditWindow,
        ctx: SendContext,
    ) -> Self {
        Self {
            receiver,
            window,
            ctx,
            tx: None,
            received: Mutex::new(Vec::new()),
        }
    }

    /// Stage everything sent through this sink in `tx`.
    pub fn with_transaction(mut self, tx: TransactionHandle) -> Self {
        self.tx = Some(tx);
        self
    }

    /// Messages the receiver has completed, in order.
    pub fn received(&self) -> Vec<ReceivedMessage> {
        self.received.lock().clone()
    }
}

#[async_trait]
impl ChunkSink for InVmChunkSink {
    async fn send_inline(
        &self,
        header: LargeMessageHeader,
        body: Vec<u8>,
    ) -> LargeMessageResult<()> {
        let done = self
            .receiver
            .receive_inline(header, body, self.tx.as_ref(), &self.ctx)
            .await?;
        self.received.lock().push(done);
        Ok(())
    }

    async fn send_frame(&self, transfer: TransferId, frame: ChunkFrame) -> LargeMessageResult<()> {
        let cost = frame.credit_cost();
        let result = self
            .receiver
            .receive_frame(transfer, frame, self.tx.as_ref(), &self.ctx)
            .await;
        // Credit comes back whether the chunk was kept or the transfer failed.
        self.window.confirm(cost);
        if let Some(done) = result? {
            self.received.lock().push(done);
        }
        Ok(())
    }
}
