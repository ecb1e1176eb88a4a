//! # Queue Subscriptions
//!
//! A queue bound to an address sees two sources: messages kept in memory
//! while the address was not paging, and messages read back from pages
//! through its cursor. Resident messages always predate paged ones, so they
//! are delivered first.

use parking_lot::Mutex;
use shared_types::{Address, Message, QueueName};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::store::PagingStore;
use crate::domain::cursor::PageCursor;
use crate::domain::errors::PagingResult;
use crate::domain::transaction::DeliveryId;

/// A message handed to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: DeliveryId,
    pub message: Message,
    pub redelivered: bool,
}

/// In-memory message shared by every queue it was routed to.
#[derive(Debug)]
pub(crate) struct ResidentMessage {
    pub message: Message,
    pub bytes: u64,
    refs: AtomicUsize,
}

impl ResidentMessage {
    pub fn new(message: Message, bytes: u64, refs: usize) -> Self {
        Self {
            message,
            bytes,
            refs: AtomicUsize::new(refs),
        }
    }

    /// Drop one queue's reference. True when this was the last one.
    pub fn release(&self) -> bool {
        self.refs.fetch_sub(1, Ordering::AcqRel) == 1
    }
}

#[derive(Debug, Default)]
pub(crate) struct ResidentQueue {
    next_seq: u64,
    ready: VecDeque<(u64, Arc<ResidentMessage>)>,
    delivered: BTreeMap<u64, Arc<ResidentMessage>>,
    redeliver: BTreeMap<u64, Arc<ResidentMessage>>,
}

impl ResidentQueue {
    pub fn push(&mut self, message: Arc<ResidentMessage>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.ready.push_back((seq, message));
    }

    fn next(&mut self) -> Option<Delivery> {
        if let Some((seq, message)) = self.redeliver.pop_first() {
            let delivery = Delivery {
                id: DeliveryId::Resident(seq),
                message: message.message.clone(),
                redelivered: true,
            };
            self.delivered.insert(seq, message);
            return Some(delivery);
        }
        let (seq, message) = self.ready.pop_front()?;
        let delivery = Delivery {
            id: DeliveryId::Resident(seq),
            message: message.message.clone(),
            redelivered: false,
        };
        self.delivered.insert(seq, message);
        Some(delivery)
    }

    fn acknowledge(&mut self, seq: u64) -> Option<Arc<ResidentMessage>> {
        self.delivered.remove(&seq)
    }

    fn redeliver(&mut self, seq: u64) -> bool {
        match self.delivered.remove(&seq) {
            Some(message) => {
                self.redeliver.insert(seq, message);
                true
            }
            None => false,
        }
    }

    fn redeliver_all(&mut self) {
        let delivered = std::mem::take(&mut self.delivered);
        self.redeliver.extend(delivered);
    }

    fn pending(&self) -> Vec<Message> {
        self.redeliver
            .values()
            .map(|m| m.message.clone())
            .chain(self.ready.iter().map(|(_, m)| m.message.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.ready.len() + self.delivered.len() + self.redeliver.len()
    }

    /// Remove everything, returning the messages so their bytes can be released.
    pub fn drain(&mut self) -> Vec<Arc<ResidentMessage>> {
        let mut all: Vec<_> = self.ready.drain(..).map(|(_, m)| m).collect();
        all.extend(std::mem::take(&mut self.delivered).into_values());
        all.extend(std::mem::take(&mut self.redeliver).into_values());
        all
    }
}

/// Per-queue state held by the store.
#[derive(Debug)]
pub(crate) struct QueueState {
    pub name: QueueName,
    pub cursor: Mutex<PageCursor>,
    pub resident: Mutex<ResidentQueue>,
}

impl QueueState {
    pub fn new(cursor: PageCursor) -> Self {
        Self {
            name: cursor.queue().clone(),
            cursor: Mutex::new(cursor),
            resident: Mutex::new(ResidentQueue::default()),
        }
    }
}

/// Delivery handle for one queue on one address.
#[derive(Clone)]
pub struct QueueSubscription {
    store: Arc<PagingStore>,
    state: Arc<QueueState>,
}

impl std::fmt::Debug for QueueSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueSubscription")
            .field("address", self.store.address())
            .field("queue", &self.state.name)
            .finish()
    }
}

impl QueueSubscription {
    pub(crate) fn new(store: Arc<PagingStore>, state: Arc<QueueState>) -> Self {
        Self { store, state }
    }

    pub fn address(&self) -> &Address {
        self.store.address()
    }

    pub fn queue(&self) -> &QueueName {
        &self.state.name
    }

    /// Next message for this queue, or `None` if nothing is deliverable now.
    pub fn next_deliverable(&self) -> PagingResult<Option<Delivery>> {
        if let Some(delivery) = self.state.resident.lock().next() {
            return Ok(Some(delivery));
        }
        self.store.next_paged(&self.state)
    }

    /// Acknowledge a delivery. Returns false if it was already acknowledged.
    pub fn acknowledge(&self, id: DeliveryId) -> PagingResult<bool> {
        match id {
            DeliveryId::Resident(seq) => {
                let released = self.state.resident.lock().acknowledge(seq);
                match released {
                    Some(message) => {
                        self.store.release_resident(&message);
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
            DeliveryId::Paged(position) => self.store.acknowledge_paged(&self.state, position),
        }
    }

    /// Put a delivered, unacknowledged message back for another attempt.
    pub fn redeliver(&self, id: DeliveryId) -> bool {
        match id {
            DeliveryId::Resident(seq) => self.state.resident.lock().redeliver(seq),
            DeliveryId::Paged(position) => self.state.cursor.lock().redeliver(position),
        }
    }

    /// Return everything in delivery, as when the consumer disconnects.
    pub fn redeliver_all(&self) {
        self.state.resident.lock().redeliver_all();
        self.state.cursor.lock().redeliver_all();
    }

    /// Unacknowledged messages without consuming them, oldest first.
    pub fn browse(&self, limit: usize) -> PagingResult<Vec<Message>> {
        let mut messages = self.state.resident.lock().pending();
        messages.truncate(limit);
        if messages.len() < limit {
            let paged = self.store.browse_paged(&self.state, limit - messages.len())?;
            messages.extend(paged);
        }
        Ok(messages)
    }

    /// Messages held in memory for this queue, including ones in delivery.
    pub fn resident_count(&self) -> usize {
        self.state.resident.lock().len()
    }
}
