//! # Core Entities
//!
//! Messages and the identifiers used to route, page and acknowledge them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::errors::NameError;

/// Maximum length of an address or queue name in bytes.
pub const MAX_NAME_LEN: usize = 255;

fn validate_name(kind: &'static str, name: &str) -> Result<(), NameError> {
    if name.is_empty() {
        return Err(NameError::Empty { kind });
    }
    if name.len() > MAX_NAME_LEN {
        return Err(NameError::TooLong {
            kind,
            len: name.len(),
            max: MAX_NAME_LEN,
        });
    }
    Ok(())
}

/// Named routing destination. Messages are sent to an address and fanned
/// out to every queue bound to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(String);

impl Address {
    pub fn new(name: impl Into<String>) -> Result<Self, NameError> {
        let name = name.into();
        validate_name("address", &name)?;
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The enclosing address in the dotted hierarchy (`orders.eu` -> `orders`).
    pub fn parent(&self) -> Option<Address> {
        self.0
            .rfind('.')
            .filter(|idx| *idx > 0)
            .map(|idx| Address(self.0[..idx].to_string()))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Named consumer-side buffer bound to an address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueueName(String);

impl QueueName {
    pub fn new(name: impl Into<String>) -> Result<Self, NameError> {
        let name = name.into();
        validate_name("queue", &name)?;
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Broker-assigned message identifier. Also names the body file of a large
/// message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Location of a paged message: page number plus ordinal within that page.
///
/// Ordered lexicographically, which matches append order within an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PagePosition {
    pub page_number: u64,
    pub message_nr: u32,
}

impl PagePosition {
    pub const fn new(page_number: u64, message_nr: u32) -> Self {
        Self {
            page_number,
            message_nr,
        }
    }

    /// Next ordinal within the same page.
    pub const fn next_in_page(self) -> Self {
        Self::new(self.page_number, self.message_nr + 1)
    }

    /// First ordinal of the following page.
    pub const fn start_of(page_number: u64) -> Self {
        Self::new(page_number, 0)
    }
}

impl fmt::Display for PagePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.page_number, self.message_nr)
    }
}

/// Reference to a body held in the large-message store rather than inline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LargeBodyRef {
    pub id: MessageId,
    pub length: u64,
}

/// Message payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageBody {
    Inline(Vec<u8>),
    Large(LargeBodyRef),
}

impl MessageBody {
    /// Total body length in bytes, wherever it is stored.
    pub fn len(&self) -> u64 {
        match self {
            MessageBody::Inline(bytes) => bytes.len() as u64,
            MessageBody::Large(body) => body.length,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn large_ref(&self) -> Option<LargeBodyRef> {
        match self {
            MessageBody::Inline(_) => None,
            MessageBody::Large(body) => Some(*body),
        }
    }
}

/// A routable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub address: Address,
    pub durable: bool,
    pub properties: BTreeMap<String, String>,
    pub body: MessageBody,
}

impl Message {
    pub fn new(id: MessageId, address: Address, body: Vec<u8>) -> Self {
        Self {
            id,
            address,
            durable: true,
            properties: BTreeMap::new(),
            body: MessageBody::Inline(body),
        }
    }

    pub fn large(id: MessageId, address: Address, length: u64) -> Self {
        Self {
            id,
            address,
            durable: true,
            properties: BTreeMap::new(),
            body: MessageBody::Large(LargeBodyRef { id, length }),
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

    pub fn is_large(&self) -> bool {
        matches!(self.body, MessageBody::Large(_))
    }

    /// Bytes this message occupies while resident in memory.
    ///
    /// Inline bodies count in full; large bodies live on disk so only the
    /// header counts.
    pub fn memory_estimate(&self) -> u64 {
        let properties: usize = self
            .properties
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum();
        let body = match &self.body {
            MessageBody::Inline(bytes) => bytes.len(),
            MessageBody::Large(_) => 0,
        };
        (properties + body) as u64
    }
}

/// Broker-internal transaction identifier. Tags provisional page entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(pub u64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

/// Global identifier of a branch in a distributed (XA) transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Xid {
    pub format_id: i32,
    pub global_transaction_id: Vec<u8>,
    pub branch_qualifier: Vec<u8>,
}

impl Xid {
    pub fn new(format_id: i32, global_transaction_id: Vec<u8>, branch_qualifier: Vec<u8>) -> Self {
        Self {
            format_id,
            global_transaction_id,
            branch_qualifier,
        }
    }

    /// Fresh xid with a random global id and empty branch qualifier.
    pub fn random() -> Self {
        Self::new(1, uuid::Uuid::new_v4().as_bytes().to_vec(), Vec::new())
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.format_id,
            hex::encode(&self.global_transaction_id),
            hex::encode(&self.branch_qualifier)
        )
    }
}
