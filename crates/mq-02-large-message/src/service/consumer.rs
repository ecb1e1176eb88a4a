//! # Large Message Consumer
//!
//! Reads a delivered message's body, either into memory when it fits the
//! consumer buffer limit or straight through to a writer.

use mq_01_paging::LargeBodyStore;
use shared_types::Message;
use std::io::Write;
use std::sync::Arc;

use super::streamer::BodyStreamer;
use crate::domain::buffer::{BufferProgress, LargeMessageBuffer};
use crate::domain::config::LargeMessageConfig;
use crate::domain::errors::{LargeMessageError, LargeMessageResult};

pub struct LargeMessageConsumer {
    streamer: BodyStreamer,
    buffer_limit: usize,
}

impl LargeMessageConsumer {
    pub fn new(bodies: Arc<LargeBodyStore>, config: &LargeMessageConfig) -> Self {
        Self {
            streamer: BodyStreamer::new(bodies, config.chunk_size),
            buffer_limit: config.consumer_buffer_limit,
        }
    }

    /// Whole body in memory. Bodies over the buffer limit need
    /// [`save_to_stream`](Self::save_to_stream).
    pub fn read_body(&self, message: &Message) -> LargeMessageResult<Vec<u8>> {
        let size = message.body.len();
        if size > self.buffer_limit as u64 {
            return Err(LargeMessageError::BodyTooLarge {
                size,
                max: self.buffer_limit as u64,
            });
        }
        let mut buffer = LargeMessageBuffer::in_memory(self.buffer_limit);
        self.drain_into(message, &mut buffer)?;
        buffer.into_body()
    }

    /// Write the body to `out` chunk by chunk. Returns the bytes written.
    pub fn save_to_stream(
        &self,
        message: &Message,
        out: Box<dyn Write + Send>,
    ) -> LargeMessageResult<u64> {
        let mut buffer = LargeMessageBuffer::streaming(out);
        self.drain_into(message, &mut buffer)?;
        Ok(buffer.received())
    }

    fn drain_into(
        &self,
        message: &Message,
        buffer: &mut LargeMessageBuffer,
    ) -> LargeMessageResult<()> {
        for frame in self.streamer.stream(message)? {
            if buffer.apply(frame?)? == BufferProgress::Complete {
                return Ok(());
            }
        }
        Err(LargeMessageError::BodyNotComplete {
            received: buffer.received(),
        })
    }
}
