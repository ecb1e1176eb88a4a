//! # Consumer Reassembly
//!
//! Applies a transfer's frames in order. Small bodies collect in memory up to
//! a limit; anything else is written straight through to a caller-supplied
//! [`Write`] so the whole body never has to be resident. The body counts as
//! delivered only once `End` has been applied.

use std::fmt;
use std::io::{self, Write};

use super::errors::{LargeMessageError, LargeMessageResult};
use super::frame::{ChunkFrame, LargeMessageHeader};

/// Where applying a frame left the transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferProgress {
    Partial,
    Complete,
}

enum Target {
    Memory { body: Vec<u8>, limit: u64 },
    Stream(Box<dyn Write + Send>),
}

pub struct LargeMessageBuffer {
    header: Option<LargeMessageHeader>,
    target: Target,
    received: u64,
    complete: bool,
}

impl fmt::Debug for LargeMessageBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LargeMessageBuffer")
            .field("header", &self.header)
            .field("streaming", &self.is_streaming())
            .field("received", &self.received)
            .field("complete", &self.complete)
            .finish()
    }
}

impl LargeMessageBuffer {
    /// Reassemble in memory, failing once the body passes `limit` bytes.
    pub fn in_memory(limit: usize) -> Self {
        Self::with_target(Target::Memory {
            body: Vec::new(),
            limit: limit as u64,
        })
    }

    /// Write each chunk through to `sink` as it arrives.
    pub fn streaming(sink: Box<dyn Write + Send>) -> Self {
        Self::with_target(Target::Stream(sink))
    }

    fn with_target(target: Target) -> Self {
        Self {
            header: None,
            target,
            received: 0,
            complete: false,
        }
    }

    pub fn header(&self) -> Option<&LargeMessageHeader> {
        self.header.as_ref()
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.target, Target::Stream(_))
    }

    pub fn apply(&mut self, frame: ChunkFrame) -> LargeMessageResult<BufferProgress> {
        if self.complete {
            return Err(LargeMessageError::protocol(format!(
                "{} frame after END",
                frame.kind()
            )));
        }
        match frame {
            ChunkFrame::Begin { header } => {
                if self.header.is_some() {
                    return Err(LargeMessageError::protocol("duplicate BEGIN frame"));
                }
                self.header = Some(header);
                Ok(BufferProgress::Partial)
            }
            ChunkFrame::Data { offset, payload } => {
                self.expect_begun("DATA")?;
                if offset != self.received {
                    return Err(LargeMessageError::protocol(format!(
                        "chunk at offset {} but {} bytes received",
                        offset, self.received
                    )));
                }
                let size = self.received + payload.len() as u64;
                match &mut self.target {
                    Target::Memory { body, limit } => {
                        if size > *limit {
                            return Err(LargeMessageError::BodyTooLarge { size, max: *limit });
                        }
                        body.extend_from_slice(&payload);
                    }
                    Target::Stream(sink) => sink
                        .write_all(&payload)
                        .map_err(|e| LargeMessageError::io("consumer sink", e))?,
                }
                self.received = size;
                Ok(BufferProgress::Partial)
            }
            ChunkFrame::End { total_length } => {
                self.expect_begun("END")?;
                if total_length != self.received {
                    return Err(LargeMessageError::protocol(format!(
                        "END declares {} bytes but {} were received",
                        total_length, self.received
                    )));
                }
                if let Target::Stream(sink) = &mut self.target {
                    sink.flush()
                        .map_err(|e| LargeMessageError::io("consumer sink", e))?;
                }
                self.complete = true;
                Ok(BufferProgress::Complete)
            }
            ChunkFrame::Cancel => Err(LargeMessageError::Cancelled),
        }
    }

    fn expect_begun(&self, kind: &str) -> LargeMessageResult<()> {
        if self.header.is_none() {
            return Err(LargeMessageError::protocol(format!(
                "{} frame before BEGIN",
                kind
            )));
        }
        Ok(())
    }

    /// The reassembled body. Only for completed in-memory transfers.
    pub fn body(&self) -> LargeMessageResult<&[u8]> {
        if !self.complete {
            return Err(LargeMessageError::BodyNotComplete {
                received: self.received,
            });
        }
        match &self.target {
            Target::Memory { body, .. } => Ok(body),
            Target::Stream(_) => Err(LargeMessageError::protocol(
                "body was streamed to a sink and is not held in memory",
            )),
        }
    }

    pub fn into_body(self) -> LargeMessageResult<Vec<u8>> {
        self.body()?;
        match self.target {
            Target::Memory { body, .. } => Ok(body),
            Target::Stream(_) => Ok(Vec::new()),
        }
    }

    /// `len` bytes of the completed body starting at `offset`.
    pub fn read_at(&self, offset: u64, len: usize) -> LargeMessageResult<&[u8]> {
        let body = self.body()?;
        let start = offset as usize;
        let end = start.saturating_add(len);
        if start > body.len() || end > body.len() {
            return Err(LargeMessageError::io(
                format!("read of {} bytes at {}", len, offset),
                io::Error::new(io::ErrorKind::UnexpectedEof, "read past end of body"),
            ));
        }
        Ok(&body[start..end])
    }

    /// Copy the completed body to `out` in pieces of at most `chunk_size`.
    pub fn save_to<W: Write>(&self, out: &mut W, chunk_size: usize) -> LargeMessageResult<u64> {
        let body = self.body()?;
        for piece in body.chunks(chunk_size.max(1)) {
            out.write_all(piece)
                .map_err(|e| LargeMessageError::io("output stream", e))?;
        }
        out.flush()
            .map_err(|e| LargeMessageError::io("output stream", e))?;
        Ok(body.len() as u64)
    }
}
