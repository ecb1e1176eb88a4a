//! # Transactions
//!
//! A transaction buffers sends and acknowledgements and applies them at
//! commit. XA branches add an explicit prepare step whose record survives
//! restart.
//!
//! ```text
//! Active ──end──→ Ended ──prepare──→ Prepared ──commit──→ Committed
//!   │               │                   │
//!   └──commit(1pc)──┴──────rollback─────┴──────────────→ RolledBack
//! ```

use serde::{Deserialize, Serialize};
use shared_types::{Address, Message, MessageId, PagePosition, QueueName, TransactionId, Xid};

use super::errors::{PagingError, PagingResult};

/// Identifies one delivered message for acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DeliveryId {
    /// Delivered from the in-memory buffer; gone after restart.
    Resident(u64),
    /// Delivered from a page file.
    Paged(PagePosition),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxOperation {
    Send(Message),
    Acknowledge {
        address: Address,
        queue: QueueName,
        delivery: DeliveryId,
    },
    /// Body file written on behalf of the transaction; removed on rollback.
    LargeBody(MessageId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Active,
    Ended,
    Prepared,
    Committing,
    Committed,
    RolledBack,
}

impl std::fmt::Display for TxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TxState::Active => "ACTIVE",
            TxState::Ended => "ENDED",
            TxState::Prepared => "PREPARED",
            TxState::Committing => "COMMITTING",
            TxState::Committed => "COMMITTED",
            TxState::RolledBack => "ROLLED_BACK",
        };
        f.write_str(name)
    }
}

/// Persistent record in a transaction file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxRecord {
    Prepared {
        id: TransactionId,
        xid: Xid,
        operations: Vec<TxOperation>,
    },
    Committed {
        id: TransactionId,
    },
}

#[derive(Debug, Clone)]
pub struct Transaction {
    id: TransactionId,
    xid: Option<Xid>,
    state: TxState,
    operations: Vec<TxOperation>,
}

impl Transaction {
    pub fn local(id: TransactionId) -> Self {
        Self {
            id,
            xid: None,
            state: TxState::Active,
            operations: Vec::new(),
        }
    }

    pub fn xa(id: TransactionId, xid: Xid) -> Self {
        Self {
            xid: Some(xid),
            ..Self::local(id)
        }
    }

    /// A branch found prepared on disk at startup.
    pub fn recovered(id: TransactionId, xid: Xid, operations: Vec<TxOperation>) -> Self {
        Self {
            id,
            xid: Some(xid),
            state: TxState::Prepared,
            operations,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn xid(&self) -> Option<&Xid> {
        self.xid.as_ref()
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    pub fn operations(&self) -> &[TxOperation] {
        &self.operations
    }

    pub fn sends(&self) -> impl Iterator<Item = &Message> {
        self.operations.iter().filter_map(|op| match op {
            TxOperation::Send(message) => Some(message),
            _ => None,
        })
    }

    pub fn large_bodies(&self) -> Vec<MessageId> {
        self.operations
            .iter()
            .filter_map(|op| match op {
                TxOperation::LargeBody(id) => Some(*id),
                TxOperation::Send(message) => message.body.large_ref().map(|b| b.id),
                TxOperation::Acknowledge { .. } => None,
            })
            .collect()
    }

    fn invalid(&self, operation: &'static str) -> PagingError {
        PagingError::InvalidTransactionState {
            id: self.id,
            state: self.state.to_string(),
            operation,
        }
    }

    fn add(&mut self, operation: &'static str, op: TxOperation) -> PagingResult<()> {
        if self.state != TxState::Active {
            return Err(self.invalid(operation));
        }
        self.operations.push(op);
        Ok(())
    }

    pub fn send(&mut self, message: Message) -> PagingResult<()> {
        self.add("send", TxOperation::Send(message))
    }

    pub fn acknowledge(
        &mut self,
        address: Address,
        queue: QueueName,
        delivery: DeliveryId,
    ) -> PagingResult<()> {
        self.add(
            "acknowledge",
            TxOperation::Acknowledge {
                address,
                queue,
                delivery,
            },
        )
    }

    pub fn add_large_body(&mut self, id: MessageId) -> PagingResult<()> {
        self.add("add large body", TxOperation::LargeBody(id))
    }

    pub fn end(&mut self) -> PagingResult<()> {
        match self.state {
            TxState::Active => {
                self.state = TxState::Ended;
                Ok(())
            }
            TxState::Ended => Ok(()),
            _ => Err(self.invalid("end")),
        }
    }

    pub fn prepare(&mut self) -> PagingResult<()> {
        match self.state {
            TxState::Active | TxState::Ended => {
                self.state = TxState::Prepared;
                Ok(())
            }
            _ => Err(self.invalid("prepare")),
        }
    }

    /// Enter `Committing`. Two-phase commit requires a prior prepare.
    pub fn begin_commit(&mut self, one_phase: bool) -> PagingResult<()> {
        let allowed = match self.state {
            TxState::Prepared => true,
            TxState::Active | TxState::Ended => one_phase,
            _ => false,
        };
        if !allowed {
            return Err(self.invalid("commit"));
        }
        self.state = TxState::Committing;
        Ok(())
    }

    pub fn mark_committed(&mut self) {
        self.state = TxState::Committed;
    }

    pub fn rollback(&mut self) -> PagingResult<()> {
        match self.state {
            TxState::Committed | TxState::RolledBack => Err(self.invalid("rollback")),
            _ => {
                self.state = TxState::RolledBack;
                Ok(())
            }
        }
    }

    /// Record written by prepare.
    pub fn prepared_record(&self) -> Option<TxRecord> {
        self.xid.as_ref().map(|xid| TxRecord::Prepared {
            id: self.id,
            xid: xid.clone(),
            operations: self.operations.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: u64) -> Message {
        Message::new(MessageId(id), Address::new("a").unwrap(), vec![1])
    }

    #[test]
    fn test_local_one_phase_commit() {
        let mut tx = Transaction::local(TransactionId(1));
        tx.send(message(1)).unwrap();
        tx.begin_commit(true).unwrap();
        tx.mark_committed();
        assert_eq!(tx.state(), TxState::Committed);
        assert!(tx.send(message(2)).is_err());
    }

    #[test]
    fn test_two_phase_commit_requires_prepare() {
        let mut tx = Transaction::xa(TransactionId(2), Xid::random());
        tx.end().unwrap();
        assert!(matches!(
            tx.begin_commit(false),
            Err(PagingError::InvalidTransactionState { .. })
        ));
        tx.prepare().unwrap();
        tx.begin_commit(false).unwrap();
    }

    #[test]
    fn test_no_work_after_end() {
        let mut tx = Transaction::xa(TransactionId(3), Xid::random());
        tx.end().unwrap();
        assert!(tx.send(message(1)).is_err());
        assert!(tx.end().is_ok());
    }

    #[test]
    fn test_rollback_after_commit_rejected() {
        let mut tx = Transaction::local(TransactionId(4));
        tx.begin_commit(true).unwrap();
        tx.mark_committed();
        assert!(tx.rollback().is_err());
    }

    #[test]
    fn test_large_bodies_include_sent_large_messages() {
        let mut tx = Transaction::local(TransactionId(5));
        tx.add_large_body(MessageId(9)).unwrap();
        tx.send(Message::large(MessageId(9), Address::new("a").unwrap(), 10))
            .unwrap();
        tx.send(message(3)).unwrap();
        assert_eq!(tx.large_bodies(), vec![MessageId(9), MessageId(9)]);
    }

    #[test]
    fn test_prepared_record_only_for_xa() {
        let local = Transaction::local(TransactionId(6));
        assert!(local.prepared_record().is_none());
        let xa = Transaction::xa(TransactionId(7), Xid::random());
        assert!(matches!(
            xa.prepared_record(),
            Some(TxRecord::Prepared { id: TransactionId(7), .. })
        ));
    }
}
