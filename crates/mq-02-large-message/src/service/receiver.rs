//! # Chunk Receiver
//!
//! Broker side of a transfer. Each transfer spools its body to the
//! large-message store as chunks arrive and is admitted as an ordinary
//! message, through the paging layer, once `End` arrives.
//!
//! ```text
//! BEGIN ──→ create body file, reserve message id
//! DATA  ──→ offset check ──→ wait_for_capacity (BLOCK) ──→ append
//! END   ──→ length check ──→ sync ──→ send / stage in transaction
//! CANCEL ─→ signal the transfer; whoever holds it deletes the body file
//! error ──→ drop transfer, delete body file
//! ```

use async_trait::async_trait;
use mq_01_paging::{
    PagingApi, PagingError, PagingManager, SendContext, SequentialFile, TransactionHandle,
};
use parking_lot::Mutex;
use shared_types::{Message, MessageId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

use crate::domain::errors::{LargeMessageError, LargeMessageResult};
use crate::domain::frame::{ChunkFrame, LargeMessageHeader, TransferId};
use crate::ports::inbound::{LargeMessageReceiverApi, ReceivedMessage};

struct Transfer {
    header: LargeMessageHeader,
    message_id: MessageId,
    file: Box<dyn SequentialFile>,
    received: u64,
    tx: Option<TransactionHandle>,
}

/// A transfer plus the signal that cancels it. The signal lives outside the
/// lock so a frame suspended while holding the transfer can observe it.
struct TransferSlot {
    cancelled: watch::Sender<bool>,
    state: tokio::sync::Mutex<Transfer>,
}

impl TransferSlot {
    fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }
}

pub struct ChunkReceiver {
    manager: Arc<PagingManager>,
    transfers: Mutex<HashMap<TransferId, Arc<TransferSlot>>>,
}

impl ChunkReceiver {
    pub fn new(manager: Arc<PagingManager>) -> Self {
        Self {
            manager,
            transfers: Mutex::new(HashMap::new()),
        }
    }

    pub fn manager(&self) -> &Arc<PagingManager> {
        &self.manager
    }

    fn begin(
        &self,
        transfer: TransferId,
        header: LargeMessageHeader,
        tx: Option<&TransactionHandle>,
    ) -> LargeMessageResult<()> {
        // Fails fast when paging is stopped or the address cannot be opened.
        self.manager.get_page_store(&header.address)?;

        let mut transfers = self.transfers.lock();
        if transfers.contains_key(&transfer) {
            return Err(LargeMessageError::protocol(format!(
                "{} has already begun",
                transfer
            )));
        }
        let message_id = self.manager.next_message_id();
        let file = self.manager.large_bodies().create(message_id)?;
        if let Some(tx) = tx {
            if let Err(e) = tx.add_large_body(message_id) {
                self.manager.large_bodies().delete_quietly(message_id);
                return Err(e.into());
            }
        }
        tracing::debug!(
            "[mq-02] {} began for {} on {} (declared {:?} bytes)",
            transfer,
            message_id,
            header.address,
            header.declared_length
        );
        let (cancelled, _) = watch::channel(false);
        transfers.insert(
            transfer,
            Arc::new(TransferSlot {
                cancelled,
                state: tokio::sync::Mutex::new(Transfer {
                    header,
                    message_id,
                    file,
                    received: 0,
                    tx: tx.cloned(),
                }),
            }),
        );
        Ok(())
    }

    fn lookup(&self, transfer: TransferId) -> LargeMessageResult<Arc<TransferSlot>> {
        self.transfers
            .lock()
            .get(&transfer)
            .cloned()
            .ok_or_else(|| LargeMessageError::protocol(format!("unknown {}", transfer)))
    }

    async fn append(
        &self,
        transfer: TransferId,
        offset: u64,
        payload: Vec<u8>,
        ctx: &SendContext,
    ) -> LargeMessageResult<()> {
        let slot = self.lookup(transfer)?;
        let mut t = slot.state.lock().await;
        let result = match self.append_locked(&slot, &mut t, offset, &payload, ctx).await {
            Ok(()) if slot.is_cancelled() => Err(LargeMessageError::Cancelled),
            other => other,
        };
        match &result {
            Err(LargeMessageError::Cancelled) => self.discard(transfer, &mut t),
            Err(e) => self.teardown(transfer, &mut t, e),
            Ok(()) => {}
        }
        result
    }

    async fn append_locked(
        &self,
        slot: &TransferSlot,
        t: &mut Transfer,
        offset: u64,
        payload: &[u8],
        ctx: &SendContext,
    ) -> LargeMessageResult<()> {
        if slot.is_cancelled() {
            return Err(LargeMessageError::Cancelled);
        }
        if offset != t.received {
            return Err(LargeMessageError::protocol(format!(
                "chunk at offset {} but {} bytes received",
                offset, t.received
            )));
        }
        // A BLOCK address that filled up mid-transfer holds the next chunk.
        let mut cancelled = slot.cancelled.subscribe();
        tokio::select! {
            waited = self.manager.wait_for_capacity(&t.header.address, ctx) => waited?,
            _ = cancelled.wait_for(|c| *c) => return Err(LargeMessageError::Cancelled),
        }
        let name = t.file.name().to_string();
        t.file
            .write(payload, false)
            .map_err(|e| PagingError::io(name, e))?;
        t.received += payload.len() as u64;
        Ok(())
    }

    async fn finish(
        &self,
        transfer: TransferId,
        total_length: u64,
        ctx: &SendContext,
    ) -> LargeMessageResult<ReceivedMessage> {
        let slot = self
            .transfers
            .lock()
            .remove(&transfer)
            .ok_or_else(|| LargeMessageError::protocol(format!("unknown {}", transfer)))?;
        let mut t = slot.state.lock().await;
        let result = self.finish_locked(&mut t, total_length, ctx).await;
        if let Err(e) = &result {
            self.teardown(transfer, &mut t, e);
        }
        result
    }

    async fn finish_locked(
        &self,
        t: &mut Transfer,
        total_length: u64,
        ctx: &SendContext,
    ) -> LargeMessageResult<ReceivedMessage> {
        if total_length != t.received {
            return Err(LargeMessageError::protocol(format!(
                "END declares {} bytes but {} were received",
                total_length, t.received
            )));
        }
        let name = t.file.name().to_string();
        t.file
            .sync()
            .and_then(|_| t.file.close())
            .map_err(|e| PagingError::io(name, e))?;

        let message = t.header.clone().apply_to(Message::large(
            t.message_id,
            t.header.address.clone(),
            t.received,
        ));
        let admitted = match &t.tx {
            Some(tx) => {
                tx.send(message)?;
                None
            }
            None => Some(self.manager.send(message, ctx).await?),
        };
        tracing::debug!(
            "[mq-02] {} complete: {} bytes as {}",
            t.message_id,
            t.received,
            if admitted.is_some() { "send" } else { "transactional send" }
        );
        Ok(ReceivedMessage {
            message_id: t.message_id,
            length: t.received,
            admitted,
        })
    }

    fn cancel(&self, transfer: TransferId) -> LargeMessageResult<()> {
        let slot = self
            .transfers
            .lock()
            .remove(&transfer)
            .ok_or_else(|| LargeMessageError::protocol(format!("unknown {}", transfer)))?;
        slot.cancelled.send_replace(true);
        // A frame still holding the transfer sees the signal and discards it.
        if let Ok(mut t) = slot.state.try_lock() {
            self.discard(transfer, &mut t);
        }
        Ok(())
    }

    fn discard(&self, transfer: TransferId, t: &mut Transfer) {
        let _ = t.file.close();
        self.manager.large_bodies().delete_quietly(t.message_id);
        tracing::debug!(
            "[mq-02] {} cancelled after {} bytes, {} deleted",
            transfer,
            t.received,
            t.message_id
        );
    }

    fn teardown(&self, transfer: TransferId, t: &mut Transfer, cause: &LargeMessageError) {
        self.transfers.lock().remove(&transfer);
        let _ = t.file.close();
        self.manager.large_bodies().delete_quietly(t.message_id);
        tracing::warn!(
            "[mq-02] {} for {} on {} failed after {} bytes: {}",
            transfer,
            t.message_id,
            t.header.address,
            t.received,
            cause
        );
    }
}

#[async_trait]
impl LargeMessageReceiverApi for ChunkReceiver {
    async fn receive_inline(
        &self,
        header: LargeMessageHeader,
        body: Vec<u8>,
        tx: Option<&TransactionHandle>,
        ctx: &SendContext,
    ) -> LargeMessageResult<ReceivedMessage> {
        let message_id = self.manager.next_message_id();
        let length = body.len() as u64;
        let message = header.inline_message(message_id, body);
        let admitted = match tx {
            Some(tx) => {
                tx.send(message)?;
                None
            }
            None => Some(self.manager.send(message, ctx).await?),
        };
        Ok(ReceivedMessage {
            message_id,
            length,
            admitted,
        })
    }

    async fn receive_frame(
        &self,
        transfer: TransferId,
        frame: ChunkFrame,
        tx: Option<&TransactionHandle>,
        ctx: &SendContext,
    ) -> LargeMessageResult<Option<ReceivedMessage>> {
        match frame {
            ChunkFrame::Begin { header } => self.begin(transfer, header, tx).map(|_| None),
            ChunkFrame::Data { offset, payload } => self
                .append(transfer, offset, payload, ctx)
                .await
                .map(|_| None),
            ChunkFrame::End { total_length } => {
                self.finish(transfer, total_length, ctx).await.map(Some)
            }
            ChunkFrame::Cancel => self.cancel(transfer).map(|_| None),
        }
    }

    fn active_transfers(&self) -> usize {
        self.transfers.lock().len()
    }
}
