//! # Chunk Frames
//!
//! A chunked transfer is `Begin`, zero or more `Data` frames with contiguous
//! offsets, then `End` (or `Cancel`). `End` carries the real body length;
//! the length declared in the header is only a hint.

use serde::{Deserialize, Serialize};
use shared_types::{Address, Message, MessageId};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Identifies one chunked transfer across producers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferId(pub Uuid);

impl TransferId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transfer-{}", self.0)
    }
}

/// Everything about a message except its body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LargeMessageHeader {
    pub address: Address,
    pub durable: bool,
    pub properties: BTreeMap<String, String>,
    /// Advisory; `None` when the producer does not know the length up front.
    pub declared_length: Option<u64>,
}

impl LargeMessageHeader {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            durable: true,
            properties: BTreeMap::new(),
            declared_length: None,
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    pub fn with_declared_length(mut self, length: u64) -> Self {
        self.declared_length = Some(length);
        self
    }

    /// Header of a stored message, for streaming it back out.
    pub fn of(message: &Message) -> Self {
        Self {
            address: message.address.clone(),
            durable: message.durable,
            properties: message.properties.clone(),
            declared_length: Some(message.body.len()),
        }
    }

    /// Copy header fields onto a message built from the body.
    pub fn apply_to(self, mut message: Message) -> Message {
        message.durable = self.durable;
        message.properties = self.properties;
        message
    }

    pub fn inline_message(self, id: MessageId, body: Vec<u8>) -> Message {
        let address = self.address.clone();
        self.apply_to(Message::new(id, address, body))
    }
}

/// One step of a chunked transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkFrame {
    Begin { header: LargeMessageHeader },
    Data { offset: u64, payload: Vec<u8> },
    End { total_length: u64 },
    Cancel,
}

impl ChunkFrame {
    /// Credit this frame consumes from a confirmation window.
    pub fn credit_cost(&self) -> usize {
        match self {
            ChunkFrame::Data { payload, .. } => payload.len(),
            _ => 0,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ChunkFrame::Begin { .. } => "BEGIN",
            ChunkFrame::Data { .. } => "DATA",
            ChunkFrame::End { .. } => "END",
            ChunkFrame::Cancel => "CANCEL",
        }
    }
}
