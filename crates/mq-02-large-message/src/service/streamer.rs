//! Server-side body streaming: a stored message back out as chunk frames.

use mq_01_paging::{LargeBodyStore, SequentialFile};
use shared_types::{Message, MessageBody};
use std::sync::Arc;

use crate::domain::errors::{LargeMessageError, LargeMessageResult};
use crate::domain::frame::{ChunkFrame, LargeMessageHeader};

pub struct BodyStreamer {
    bodies: Arc<LargeBodyStore>,
    chunk_size: usize,
}

impl BodyStreamer {
    pub fn new(bodies: Arc<LargeBodyStore>, chunk_size: usize) -> Self {
        Self {
            bodies,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Frames for `message`: `Begin`, its body in chunks, `End`.
    ///
    /// Large bodies are read from their file one chunk at a time.
    pub fn stream(&self, message: &Message) -> LargeMessageResult<BodyFrames> {
        let source = match &message.body {
            MessageBody::Inline(bytes) => BodySource::Inline(bytes.clone()),
            MessageBody::Large(body) => BodySource::File(self.bodies.open(body.id)?),
        };
        Ok(BodyFrames {
            header: Some(LargeMessageHeader::of(message)),
            source,
            length: message.body.len(),
            offset: 0,
            chunk_size: self.chunk_size,
            done: false,
        })
    }
}

enum BodySource {
    Inline(Vec<u8>),
    File(Box<dyn SequentialFile>),
}

/// Lazy frame sequence over one stored body.
pub struct BodyFrames {
    header: Option<LargeMessageHeader>,
    source: BodySource,
    length: u64,
    offset: u64,
    chunk_size: usize,
    done: bool,
}

impl BodyFrames {
    fn read_chunk(&mut self, len: usize) -> LargeMessageResult<Vec<u8>> {
        match &mut self.source {
            BodySource::Inline(bytes) => {
                let start = self.offset as usize;
                Ok(bytes[start..start + len].to_vec())
            }
            BodySource::File(file) => {
                let name = file.name().to_string();
                file.read(self.offset, len)
                    .map_err(|e| LargeMessageError::io(name, e))
            }
        }
    }

    fn finish(&mut self) {
        self.done = true;
        if let BodySource::File(file) = &mut self.source {
            let _ = file.close();
        }
    }
}

impl Iterator for BodyFrames {
    type Item = LargeMessageResult<ChunkFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(header) = self.header.take() {
            return Some(Ok(ChunkFrame::Begin { header }));
        }
        if self.done {
            return None;
        }
        if self.offset >= self.length {
            self.finish();
            return Some(Ok(ChunkFrame::End {
                total_length: self.length,
            }));
        }
        let len = (self.length - self.offset).min(self.chunk_size as u64) as usize;
        match self.read_chunk(len) {
            Ok(payload) => {
                let frame = ChunkFrame::Data {
                    offset: self.offset,
                    payload,
                };
                self.offset += len as u64;
                Some(Ok(frame))
            }
            Err(e) => {
                self.finish();
                Some(Err(e))
            }
        }
    }
}
