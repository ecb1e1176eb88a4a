//! # Transaction Journal
//!
//! One file per transaction under `transactions/`, holding framed
//! [`TxRecord`]s:
//!
//! - an XA prepare writes `Prepared` with the full operation list;
//! - a commit that paged anything appends `Committed`;
//! - rollback deletes the file.
//!
//! Page entries tagged with a transaction id are visible after restart only
//! if that id has a `Committed` record. A committed file is pruned once no
//! page refers to its id any more.

use parking_lot::Mutex;
use shared_types::{TransactionId, Xid};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::domain::errors::{PagingError, PagingResult};
use crate::domain::record::{encode_frame, scan_frames, FrameScan, LOG_MAGIC};
use crate::domain::transaction::{Transaction, TxOperation, TxRecord};
use crate::ports::outbound::{SequentialFile, SequentialFileFactory};

pub const TX_EXTENSION: &str = "tx";

#[derive(Debug, Clone)]
struct PreparedEntry {
    xid: Xid,
    operations: Vec<TxOperation>,
}

#[derive(Debug, Default)]
struct JournalState {
    committed: HashSet<TransactionId>,
    prepared: HashMap<TransactionId, PreparedEntry>,
}

pub struct TransactionJournal {
    files: Arc<dyn SequentialFileFactory>,
    sync: bool,
    next_id: AtomicU64,
    state: Mutex<JournalState>,
}

impl TransactionJournal {
    pub fn new(files: Arc<dyn SequentialFileFactory>, sync: bool) -> Self {
        Self {
            files,
            sync,
            next_id: AtomicU64::new(1),
            state: Mutex::new(JournalState::default()),
        }
    }

    pub fn file_name(id: TransactionId) -> String {
        format!("{:020}.{}", id.0, TX_EXTENSION)
    }

    fn parse_file_name(name: &str) -> Option<TransactionId> {
        name.strip_suffix(".tx")?.parse().ok().map(TransactionId)
    }

    /// Read every transaction file.
    ///
    /// A file that cannot be decoded fails the load with
    /// `TransactionRecovery`; it is never skipped. A torn final frame is
    /// cut off.
    pub fn load(&self) -> PagingResult<()> {
        let names = self
            .files
            .list_files(TX_EXTENSION)
            .map_err(|e| PagingError::io(self.files.directory(), e))?;

        let mut state = JournalState::default();
        let mut max_id = 0;
        for name in names {
            let Some(id) = Self::parse_file_name(&name) else {
                continue;
            };
            max_id = max_id.max(id.0);

            let mut file = self.files.create_file(&name);
            let bytes = file
                .open()
                .and_then(|_| file.read_all())
                .map_err(|e| PagingError::io(&name, e))?;
            let scan: FrameScan<TxRecord> =
                scan_frames(&name, &bytes).map_err(|e| PagingError::TransactionRecovery {
                    file: name.clone(),
                    reason: e.to_string(),
                })?;
            if scan.torn {
                tracing::warn!("[mq-01] Truncating torn tail of {}", name);
                file.truncate(scan.valid_len)
                    .map_err(|e| PagingError::io(&name, e))?;
            }

            let mut prepared = None;
            let mut committed = false;
            for record in scan.entries {
                match record {
                    TxRecord::Prepared {
                        id: record_id,
                        xid,
                        operations,
                    } => {
                        if record_id != id {
                            return Err(PagingError::TransactionRecovery {
                                file: name.clone(),
                                reason: format!("record for {} in file of {}", record_id, id),
                            });
                        }
                        prepared = Some(PreparedEntry { xid, operations });
                    }
                    TxRecord::Committed { .. } => committed = true,
                }
            }

            if committed {
                state.committed.insert(id);
            } else if let Some(entry) = prepared {
                state.prepared.insert(id, entry);
            } else {
                file.delete().map_err(|e| PagingError::io(&name, e))?;
            }
        }

        tracing::info!(
            "[mq-01] 💾 Transaction journal: {} committed, {} prepared",
            state.committed.len(),
            state.prepared.len()
        );
        *self.state.lock() = state;
        self.next_id.fetch_max(max_id + 1, Ordering::AcqRel);
        Ok(())
    }

    pub fn next_transaction_id(&self) -> TransactionId {
        TransactionId(self.next_id.fetch_add(1, Ordering::AcqRel))
    }

    fn open_for_append(&self, id: TransactionId) -> PagingResult<Box<dyn SequentialFile>> {
        let name = Self::file_name(id);
        let mut file = self.files.create_file(&name);
        file.open().map_err(|e| PagingError::io(&name, e))?;
        if file.size().map_err(|e| PagingError::io(&name, e))? == 0 {
            file.write(LOG_MAGIC, false)
                .map_err(|e| PagingError::io(&name, e))?;
        }
        Ok(file)
    }

    fn append(&self, id: TransactionId, record: &TxRecord) -> PagingResult<()> {
        let name = Self::file_name(id);
        let frame = encode_frame(record)?;
        let mut file = self.open_for_append(id)?;
        file.write(&frame, self.sync)
            .and_then(|_| file.close())
            .map_err(|e| PagingError::io(&name, e))
    }

    /// Durably record an XA prepare.
    pub fn write_prepared(&self, tx: &Transaction) -> PagingResult<()> {
        let Some(record) = tx.prepared_record() else {
            return Err(PagingError::InvalidTransactionState {
                id: tx.id(),
                state: tx.state().to_string(),
                operation: "prepare without xid",
            });
        };
        self.append(tx.id(), &record)?;
        if let (Some(xid), TxRecord::Prepared { operations, .. }) = (tx.xid(), record) {
            self.state.lock().prepared.insert(
                tx.id(),
                PreparedEntry {
                    xid: xid.clone(),
                    operations,
                },
            );
        }
        Ok(())
    }

    /// Durably mark a transaction committed.
    pub fn write_committed(&self, id: TransactionId) -> PagingResult<()> {
        self.append(id, &TxRecord::Committed { id })?;
        let mut state = self.state.lock();
        state.prepared.remove(&id);
        state.committed.insert(id);
        Ok(())
    }

    /// Forget a transaction and delete its file.
    pub fn remove(&self, id: TransactionId) -> PagingResult<()> {
        let name = Self::file_name(id);
        self.files
            .create_file(&name)
            .delete()
            .map_err(|e| PagingError::io(&name, e))?;
        let mut state = self.state.lock();
        state.prepared.remove(&id);
        state.committed.remove(&id);
        Ok(())
    }

    pub fn is_committed(&self, id: TransactionId) -> bool {
        self.state.lock().committed.contains(&id)
    }

    pub fn committed_ids(&self) -> HashSet<TransactionId> {
        self.state.lock().committed.clone()
    }

    /// Prepared branches found on disk, rebuilt as transactions.
    pub fn prepared_transactions(&self) -> Vec<Transaction> {
        let state = self.state.lock();
        let mut txs: Vec<Transaction> = state
            .prepared
            .iter()
            .map(|(id, entry)| Transaction::recovered(*id, entry.xid.clone(), entry.operations.clone()))
            .collect();
        txs.sort_by_key(|tx| tx.id());
        txs
    }

    /// Delete the committed records among `candidates` that no page refers
    /// to any more. Ids committed after `candidates` was taken are kept.
    pub fn prune(
        &self,
        candidates: &HashSet<TransactionId>,
        live: &HashSet<TransactionId>,
    ) -> PagingResult<usize> {
        let stale: Vec<TransactionId> = {
            let state = self.state.lock();
            candidates
                .iter()
                .filter(|id| state.committed.contains(id) && !live.contains(id))
                .copied()
                .collect()
        };
        for id in &stale {
            self.remove(*id)?;
        }
        Ok(stale.len())
    }
}
