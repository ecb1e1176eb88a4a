//! # Large Message Producer
//!
//! Sends a body inline when it is under the threshold and as a chunked
//! transfer otherwise. The body is read lazily; at most one threshold's worth
//! of prefix and one chunk are held at a time.
//!
//! | Declared length | Observed length | Transfer |
//! |-----------------|-----------------|----------|
//! | ≥ threshold | any | chunked |
//! | < threshold or unknown | < threshold | inline |
//! | < threshold or unknown | ≥ threshold | chunked |
//!
//! Each `Data` frame takes credit from the [`CreditWindow`] before it is
//! sent. An exhausted window suspends the send; closing the session cancels
//! it and sends `Cancel` so the broker drops what it spooled.

use mq_01_paging::SendContext;
use std::io::{Cursor, Read};
use std::sync::Arc;

use super::window::CreditWindow;
use crate::domain::config::LargeMessageConfig;
use crate::domain::errors::{LargeMessageError, LargeMessageResult};
use crate::domain::frame::{ChunkFrame, LargeMessageHeader, TransferId};
use crate::domain::splitter::ChunkSplitter;
use crate::ports::outbound::ChunkSink;

/// How a body went out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendReceipt {
    Inline { length: u64 },
    Chunked {
        transfer: TransferId,
        chunks: usize,
        length: u64,
    },
}

impl SendReceipt {
    pub fn length(&self) -> u64 {
        match self {
            SendReceipt::Inline { length } | SendReceipt::Chunked { length, .. } => *length,
        }
    }

    pub fn is_chunked(&self) -> bool {
        matches!(self, SendReceipt::Chunked { .. })
    }
}

pub struct LargeMessageProducer<S> {
    config: LargeMessageConfig,
    sink: Arc<S>,
    window: CreditWindow,
}

impl<S: ChunkSink> LargeMessageProducer<S> {
    pub fn new(
        config: LargeMessageConfig,
        sink: Arc<S>,
        window: CreditWindow,
    ) -> LargeMessageResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            sink,
            window,
        })
    }

    pub fn config(&self) -> &LargeMessageConfig {
        &self.config
    }

    pub fn window(&self) -> &CreditWindow {
        &self.window
    }

    pub async fn send<R: Read + Send>(
        &self,
        header: LargeMessageHeader,
        mut body: R,
        ctx: &SendContext,
    ) -> LargeMessageResult<SendReceipt> {
        let threshold = self.config.min_large_message_size;
        let mut prefix = Vec::new();
        (&mut body)
            .take(threshold as u64)
            .read_to_end(&mut prefix)
            .map_err(|e| LargeMessageError::io("message body", e))?;

        let declared_large = header
            .declared_length
            .is_some_and(|length| length >= threshold as u64);
        if !declared_large && prefix.len() < threshold {
            let length = prefix.len() as u64;
            self.sink.send_inline(header, prefix).await?;
            return Ok(SendReceipt::Inline { length });
        }

        self.send_chunked(header, Cursor::new(prefix).chain(body), ctx)
            .await
    }

    async fn send_chunked<R: Read + Send>(
        &self,
        header: LargeMessageHeader,
        body: R,
        ctx: &SendContext,
    ) -> LargeMessageResult<SendReceipt> {
        let transfer = TransferId::random();
        tracing::debug!(
            "[mq-02] 📦 Sending {} to {} in chunks of {} bytes",
            transfer,
            header.address,
            self.config.chunk_size
        );
        self.sink
            .send_frame(transfer, ChunkFrame::Begin { header })
            .await?;

        let mut chunks = 0;
        for frame in ChunkSplitter::new(body, self.config.chunk_size) {
            let sent = match frame {
                Ok(frame) => self.send_data(transfer, frame, ctx).await,
                Err(e) => Err(LargeMessageError::io("message body", e)),
            };
            match sent {
                Ok(Some(length)) => {
                    return Ok(SendReceipt::Chunked {
                        transfer,
                        chunks,
                        length,
                    })
                }
                Ok(None) => chunks += 1,
                Err(e) => {
                    self.abandon(transfer, &e).await;
                    return Err(e);
                }
            }
        }
        // The splitter always ends with `End` unless it failed first.
        Err(LargeMessageError::protocol(format!(
            "{} ended without an END frame",
            transfer
        )))
    }

    /// Send one splitter frame. Returns the body length once `End` is sent.
    async fn send_data(
        &self,
        transfer: TransferId,
        frame: ChunkFrame,
        ctx: &SendContext,
    ) -> LargeMessageResult<Option<u64>> {
        let end = match &frame {
            ChunkFrame::End { total_length } => Some(*total_length),
            _ => None,
        };
        if ctx.is_closed() {
            return Err(LargeMessageError::Cancelled);
        }
        let cost = frame.credit_cost();
        if cost > 0 {
            tokio::select! {
                acquired = self.window.acquire(cost) => { acquired?; }
                _ = ctx.closed() => return Err(LargeMessageError::Cancelled),
            }
        }
        self.sink.send_frame(transfer, frame).await?;
        Ok(end)
    }

    /// Tell the broker to drop a transfer that failed on this side.
    async fn abandon(&self, transfer: TransferId, cause: &LargeMessageError) {
        if matches!(cause, LargeMessageError::ProtocolViolation { .. }) {
            // The receiver already tore the transfer down.
            return;
        }
        tracing::debug!("[mq-02] Abandoning {}: {}", transfer, cause);
        if let Err(e) = self.sink.send_frame(transfer, ChunkFrame::Cancel).await {
            tracing::debug!("[mq-02] Cancel of {} not delivered: {}", transfer, e);
        }
    }
}
