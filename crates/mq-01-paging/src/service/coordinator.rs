//! # Transaction Coordinator
//!
//! Local transactions and XA branches on top of [`PagingManager`].
//!
//! | Operation | XA call | Effect |
//! |-----------|---------|--------|
//! | `start` | xa_start | New branch for an unused xid |
//! | `end` | xa_end | No more work may be added |
//! | `prepare` | xa_prepare | Operation list written to the journal |
//! | `commit` | xa_commit | Sends admitted, acks applied |
//! | `rollback` | xa_rollback | Acks redelivered, bodies deleted |
//! | `recover` | xa_recover | Xids of prepared branches |
//!
//! Branches prepared before a restart are rebuilt from the journal and can
//! be committed or rolled back as if the restart never happened.

use parking_lot::Mutex;
use shared_types::{Address, Message, MessageId, QueueName, TransactionId, Xid};
use std::collections::HashMap;
use std::sync::Arc;

use super::manager::PagingManager;
use crate::domain::errors::{PagingError, PagingResult};
use crate::domain::session::SendContext;
use crate::domain::transaction::{DeliveryId, Transaction, TxState};

/// Shared handle to a transaction's work list.
#[derive(Debug, Clone)]
pub struct TransactionHandle {
    tx: Arc<Mutex<Transaction>>,
}

impl TransactionHandle {
    fn new(tx: Transaction) -> Self {
        Self {
            tx: Arc::new(Mutex::new(tx)),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.tx.lock().id()
    }

    pub fn xid(&self) -> Option<Xid> {
        self.tx.lock().xid().cloned()
    }

    pub fn state(&self) -> TxState {
        self.tx.lock().state()
    }

    pub fn send(&self, message: Message) -> PagingResult<()> {
        self.tx.lock().send(message)
    }

    pub fn acknowledge(
        &self,
        address: Address,
        queue: QueueName,
        delivery: DeliveryId,
    ) -> PagingResult<()> {
        self.tx.lock().acknowledge(address, queue, delivery)
    }

    pub fn add_large_body(&self, id: MessageId) -> PagingResult<()> {
        self.tx.lock().add_large_body(id)
    }

    fn snapshot(&self) -> Transaction {
        self.tx.lock().clone()
    }
}

pub struct TransactionCoordinator {
    manager: Arc<PagingManager>,
    branches: Mutex<HashMap<Xid, TransactionHandle>>,
}

impl TransactionCoordinator {
    /// Coordinator seeded with the branches the journal found prepared.
    pub fn new(manager: Arc<PagingManager>) -> Self {
        let branches = manager
            .journal()
            .prepared_transactions()
            .into_iter()
            .filter_map(|tx| {
                let xid = tx.xid()?.clone();
                Some((xid, TransactionHandle::new(tx)))
            })
            .collect::<HashMap<_, _>>();
        if !branches.is_empty() {
            tracing::info!(
                "[mq-01] 🔁 {} prepared transactions awaiting recovery",
                branches.len()
            );
        }
        Self {
            manager,
            branches: Mutex::new(branches),
        }
    }

    pub fn manager(&self) -> &Arc<PagingManager> {
        &self.manager
    }

    // =========================================================================
    // LOCAL
    // =========================================================================

    pub fn begin_local(&self) -> TransactionHandle {
        let id = self.manager.journal().next_transaction_id();
        TransactionHandle::new(Transaction::local(id))
    }

    /// One-phase commit of a local transaction.
    pub async fn commit_local(
        &self,
        handle: &TransactionHandle,
        ctx: &SendContext,
    ) -> PagingResult<()> {
        self.commit_handle(handle, true, ctx).await
    }

    pub fn rollback_local(&self, handle: &TransactionHandle) -> PagingResult<()> {
        self.rollback_handle(handle)
    }

    // =========================================================================
    // XA
    // =========================================================================

    pub fn start(&self, xid: Xid) -> PagingResult<TransactionHandle> {
        let mut branches = self.branches.lock();
        if branches.contains_key(&xid) {
            return Err(PagingError::DuplicateTransaction { xid });
        }
        let id = self.manager.journal().next_transaction_id();
        let handle = TransactionHandle::new(Transaction::xa(id, xid.clone()));
        branches.insert(xid, handle.clone());
        Ok(handle)
    }

    fn branch(&self, xid: &Xid) -> PagingResult<TransactionHandle> {
        self.branches
            .lock()
            .get(xid)
            .cloned()
            .ok_or_else(|| PagingError::UnknownTransaction { xid: xid.clone() })
    }

    pub fn end(&self, xid: &Xid) -> PagingResult<()> {
        self.branch(xid)?.tx.lock().end()
    }

    /// Durably record the branch so it survives restart.
    pub fn prepare(&self, xid: &Xid) -> PagingResult<()> {
        let handle = self.branch(xid)?;
        let mut tx = handle.tx.lock();
        tx.prepare()?;
        if let Err(e) = self.manager.journal().write_prepared(&tx) {
            // A branch that cannot be recorded cannot be committed either.
            let _ = tx.rollback();
            return Err(e);
        }
        tracing::debug!("[mq-01] Prepared {} ({})", tx.id(), xid);
        Ok(())
    }

    pub async fn commit(&self, xid: &Xid, one_phase: bool, ctx: &SendContext) -> PagingResult<()> {
        let handle = self.branch(xid)?;
        let result = self.commit_handle(&handle, one_phase, ctx).await;
        let state = handle.state();
        if matches!(state, TxState::Committed | TxState::RolledBack) {
            self.branches.lock().remove(xid);
        }
        result
    }

    pub fn rollback(&self, xid: &Xid) -> PagingResult<()> {
        let handle = self.branch(xid)?;
        self.rollback_handle(&handle)?;
        self.branches.lock().remove(xid);
        Ok(())
    }

    /// Xids of branches that are prepared and undecided.
    pub fn recover(&self) -> Vec<Xid> {
        let mut prepared: Vec<(TransactionId, Xid)> = self
            .branches
            .lock()
            .iter()
            .filter(|(_, handle)| handle.state() == TxState::Prepared)
            .map(|(xid, handle)| (handle.id(), xid.clone()))
            .collect();
        prepared.sort_by_key(|(id, _)| *id);
        prepared.into_iter().map(|(_, xid)| xid).collect()
    }

    // =========================================================================
    // SHARED
    // =========================================================================

    async fn commit_handle(
        &self,
        handle: &TransactionHandle,
        one_phase: bool,
        ctx: &SendContext,
    ) -> PagingResult<()> {
        let (snapshot, prepared) = {
            let mut tx = handle.tx.lock();
            let prepared = tx.state() == TxState::Prepared;
            tx.begin_commit(one_phase)?;
            (tx.clone(), prepared)
        };

        match self.manager.apply_commit(&snapshot, prepared, ctx).await {
            Ok(()) => {
                handle.tx.lock().mark_committed();
                Ok(())
            }
            Err(e) => {
                tracing::warn!("[mq-01] Commit of {} failed, rolling back: {}", snapshot.id(), e);
                let _ = handle.tx.lock().rollback();
                if let Err(rollback) = self.manager.apply_rollback(&snapshot, prepared) {
                    tracing::error!(
                        "[mq-01] Rollback of {} after failed commit also failed: {}",
                        snapshot.id(),
                        rollback
                    );
                }
                Err(e)
            }
        }
    }

    fn rollback_handle(&self, handle: &TransactionHandle) -> PagingResult<()> {
        let prepared = handle.state() == TxState::Prepared;
        handle.tx.lock().rollback()?;
        self.manager.apply_rollback(&handle.snapshot(), prepared)
    }
}
