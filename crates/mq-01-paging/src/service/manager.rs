//! # Paging Manager
//!
//! Owns one [`PagingStore`] per address, the global byte tracker,
//! the large body directory and the transaction journal.
//!
//! ## Startup
//!
//! 1. Load the transaction journal (committed and prepared ids).
//! 2. Reload every address directory; page entries of transactions without
//!    a commit marker are discarded.
//! 3. Seed the message id counter above everything found on disk.
//! 4. Remove large bodies no page entry or prepared transaction references.
//!
//! ## Commit
//!
//! Sends are admitted as provisional entries, the touched stores are synced,
//! a commit marker is written if anything reached a page, and only then are
//! the entries made visible. A crash before the marker leaves the entries
//! discarded on reload.

use async_trait::async_trait;
use parking_lot::RwLock;
use shared_types::{Address, Message, MessageId, QueueName, TransactionId};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use super::journal::TransactionJournal;
use super::large_body::LargeBodyStore;
use super::store::{AdmitOutcome, PagingStore};
use super::subscription::QueueSubscription;
use crate::domain::accounting::GlobalSizeTracker;
use crate::domain::config::PagingConfig;
use crate::domain::errors::{PagingError, PagingResult};
use crate::domain::metrics::{PagingMetrics, ReclaimReport};
use crate::domain::session::SendContext;
use crate::domain::settings::{AddressSettings, AddressSettingsRepository};
use crate::domain::transaction::{Transaction, TxOperation};
use crate::ports::inbound::PagingApi;
use crate::ports::outbound::PagingStoreFactory;

pub struct PagingManager {
    config: PagingConfig,
    factory: Arc<dyn PagingStoreFactory>,
    settings: Arc<AddressSettingsRepository>,
    global: Arc<GlobalSizeTracker>,
    bodies: Arc<LargeBodyStore>,
    journal: Arc<TransactionJournal>,
    stores: RwLock<HashMap<Address, Arc<PagingStore>>>,
    next_id: AtomicU64,
    started: AtomicBool,
}

impl std::fmt::Debug for PagingManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagingManager")
            .field("config", &self.config)
            .field("stores", &self.stores.read().len())
            .field("started", &self.started.load(Ordering::Relaxed))
            .finish()
    }
}

impl PagingManager {
    pub fn new(
        config: PagingConfig,
        factory: Arc<dyn PagingStoreFactory>,
        settings: Arc<AddressSettingsRepository>,
    ) -> PagingResult<Self> {
        config.validate()?;
        let bodies = factory
            .large_message_file_factory()
            .map_err(|e| PagingError::io("large message directory", e))?;
        let transactions = factory
            .transaction_file_factory()
            .map_err(|e| PagingError::io("transaction directory", e))?;

        Ok(Self {
            global: Arc::new(GlobalSizeTracker::new(config.global_max_size())),
            journal: Arc::new(TransactionJournal::new(
                transactions,
                config.sync_transactions,
            )),
            bodies: Arc::new(LargeBodyStore::new(bodies)),
            config,
            factory,
            settings,
            stores: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            started: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &PagingConfig {
        &self.config
    }

    pub fn settings(&self) -> &Arc<AddressSettingsRepository> {
        &self.settings
    }

    pub fn large_bodies(&self) -> &Arc<LargeBodyStore> {
        &self.bodies
    }

    pub fn journal(&self) -> &Arc<TransactionJournal> {
        &self.journal
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    fn ensure_started(&self) -> PagingResult<()> {
        if !self.is_started() {
            return Err(PagingError::NotStarted);
        }
        Ok(())
    }

    /// Reload everything on disk and begin accepting sends.
    ///
    /// Calling `start` again after [`stop`](Self::stop) reopens the stores
    /// already loaded.
    pub fn start(&self) -> PagingResult<()> {
        if self.is_started() {
            return Ok(());
        }
        let loaded: Vec<Arc<PagingStore>> = self.stores.read().values().cloned().collect();
        if !loaded.is_empty() {
            for store in loaded {
                store.resume()?;
            }
            self.started.store(true, Ordering::Release);
            return Ok(());
        }

        self.journal.load()?;
        let committed = self.journal.committed_ids();
        let prepared = self.journal.prepared_transactions();

        let addresses = self
            .factory
            .list_addresses()
            .map_err(|e| PagingError::io("paging directory", e))?;

        let mut stores = HashMap::with_capacity(addresses.len());
        let mut max_id = 0u64;
        let mut referenced_bodies: HashSet<MessageId> = HashSet::new();
        for address in addresses {
            let files = self
                .factory
                .new_file_factory(&address)
                .map_err(|e| PagingError::io(address.as_str(), e))?;
            let store = PagingStore::load(
                address.clone(),
                self.settings.get(&address),
                files,
                self.global.clone(),
                self.bodies.clone(),
                &committed,
            )?;
            if let Some(id) = store.max_message_id() {
                max_id = max_id.max(id.0);
            }
            referenced_bodies.extend(store.referenced_large_bodies());
            stores.insert(address, Arc::new(store));
        }

        for tx in &prepared {
            referenced_bodies.extend(tx.large_bodies());
            for message in tx.sends() {
                max_id = max_id.max(message.id.0);
            }
        }
        for id in self.bodies.list()? {
            max_id = max_id.max(id.0);
        }
        self.bodies.sweep_orphans(&referenced_bodies)?;

        self.next_id.fetch_max(max_id + 1, Ordering::AcqRel);
        let count = stores.len();
        *self.stores.write() = stores;
        self.started.store(true, Ordering::Release);

        tracing::info!(
            "[mq-01] 🚀 Paging started: {} addresses, {} prepared transactions",
            count,
            prepared.len()
        );
        Ok(())
    }

    /// Store for `address`, created on first use.
    pub fn get_page_store(&self, address: &Address) -> PagingResult<Arc<PagingStore>> {
        self.ensure_started()?;
        if let Some(store) = self.stores.read().get(address) {
            return Ok(store.clone());
        }

        let mut stores = self.stores.write();
        if let Some(store) = stores.get(address) {
            return Ok(store.clone());
        }
        let files = self
            .factory
            .new_file_factory(address)
            .map_err(|e| PagingError::io(address.as_str(), e))?;
        let store = Arc::new(PagingStore::new(
            address.clone(),
            self.settings.get(address),
            files,
            self.global.clone(),
            self.bodies.clone(),
        ));
        stores.insert(address.clone(), store.clone());
        tracing::debug!("[mq-01] Created paging store for {}", address);
        Ok(store)
    }

    /// Existing store, without creating one.
    pub fn store(&self, address: &Address) -> Option<Arc<PagingStore>> {
        self.stores.read().get(address).cloned()
    }

    pub fn addresses(&self) -> Vec<Address> {
        let mut addresses: Vec<Address> = self.stores.read().keys().cloned().collect();
        addresses.sort();
        addresses
    }

    pub fn subscription(&self, address: &Address, queue: &QueueName) -> Option<QueueSubscription> {
        self.store(address)?.subscription(queue)
    }

    /// True when paged plus resident bytes across every address exceed the
    /// global limit, whatever each address's own limit says.
    pub fn is_global_full(&self) -> bool {
        self.global.is_full()
    }

    pub fn global_resident_bytes(&self) -> u64 {
        self.global.used()
    }

    pub fn global_paged_bytes(&self) -> u64 {
        self.global.paged()
    }

    /// Suspend until `address` has room, if its policy is BLOCK.
    pub async fn wait_for_capacity(
        &self,
        address: &Address,
        ctx: &SendContext,
    ) -> PagingResult<()> {
        let store = self.get_page_store(address)?;
        store.wait_for_capacity(ctx).await
    }

    /// Apply new settings to every matching store.
    pub fn update_address_settings(
        &self,
        address_match: &str,
        settings: AddressSettings,
    ) -> PagingResult<()> {
        settings.validate()?;
        self.settings.set(address_match, settings);
        for (address, store) in self.stores.read().iter() {
            store.update_settings(self.settings.get(address));
        }
        Ok(())
    }

    // =========================================================================
    // TRANSACTIONS
    // =========================================================================

    /// Make a transaction's work visible.
    ///
    /// On failure every store the transaction touched is rolled back and
    /// nothing becomes visible.
    pub async fn apply_commit(
        &self,
        tx: &Transaction,
        prepared: bool,
        ctx: &SendContext,
    ) -> PagingResult<()> {
        self.ensure_started()?;
        let id = tx.id();
        let mut touched: Vec<Arc<PagingStore>> = Vec::new();
        let mut paged = false;

        for message in tx.sends() {
            let admitted = match self.get_page_store(&message.address) {
                Ok(store) => {
                    if !touched.iter().any(|s| Arc::ptr_eq(s, &store)) {
                        touched.push(store.clone());
                    }
                    store.admit(message.clone(), Some(id), ctx).await
                }
                Err(e) => Err(e),
            };
            match admitted {
                Ok(AdmitOutcome::Paged(_)) => paged = true,
                Ok(_) => {}
                Err(e) => {
                    self.abort_in(&touched, id);
                    return Err(e);
                }
            }
        }

        if paged {
            let durable = touched
                .iter()
                .try_for_each(|store| store.sync())
                .and_then(|_| self.journal.write_committed(id));
            if let Err(e) = durable {
                self.abort_in(&touched, id);
                return Err(e);
            }
        } else if prepared {
            self.journal.remove(id)?;
        }

        for store in &touched {
            store.commit_tx(id);
        }

        for op in tx.operations() {
            if let TxOperation::Acknowledge {
                address,
                queue,
                delivery,
            } = op
            {
                let Some(subscription) = self.subscription(address, queue) else {
                    tracing::warn!(
                        "[mq-01] {} acknowledged on unbound queue {}/{}",
                        id,
                        address,
                        queue
                    );
                    continue;
                };
                if let Err(e) = subscription.acknowledge(*delivery) {
                    tracing::warn!("[mq-01] {} could not apply acknowledgement: {}", id, e);
                }
            }
        }

        tracing::debug!(
            "[mq-01] Committed {} ({} operations, paged: {})",
            id,
            tx.operations().len(),
            paged
        );
        Ok(())
    }

    fn abort_in(&self, stores: &[Arc<PagingStore>], id: TransactionId) {
        for store in stores {
            store.abort_tx(id);
        }
    }

    /// Undo a transaction that never reached commit.
    ///
    /// Acknowledged deliveries go back for redelivery and large bodies the
    /// transaction wrote are deleted.
    pub fn apply_rollback(&self, tx: &Transaction, prepared: bool) -> PagingResult<()> {
        for op in tx.operations() {
            if let TxOperation::Acknowledge {
                address,
                queue,
                delivery,
            } = op
            {
                if let Some(subscription) = self.subscription(address, queue) {
                    subscription.redeliver(*delivery);
                }
            }
        }
        let mut bodies = tx.large_bodies();
        bodies.sort();
        bodies.dedup();
        for id in bodies {
            self.bodies.delete_quietly(id);
        }
        if prepared {
            self.journal.remove(tx.id())?;
        }
        tracing::debug!("[mq-01] Rolled back {}", tx.id());
        Ok(())
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Reclaim every store, persist cursors and prune transaction records no
    /// page refers to any more.
    ///
    /// Only ids already committed when the pass begins are pruned. Their page
    /// entries were appended before the commit marker, so every store visited
    /// afterwards still reports them while they exist.
    pub fn reclaim_all(&self) -> PagingResult<ReclaimReport> {
        let candidates = self.journal.committed_ids();
        let stores: Vec<Arc<PagingStore>> = self.stores.read().values().cloned().collect();
        let mut report = ReclaimReport::default();
        let mut live = HashSet::new();
        for store in &stores {
            match store.reclaim() {
                Ok(r) => report.merge(r),
                Err(e) => tracing::warn!("[mq-01] Reclaim of {} failed: {}", store.address(), e),
            }
            if let Err(e) = store.persist_cursors() {
                tracing::warn!(
                    "[mq-01] Could not persist cursors of {}: {}",
                    store.address(),
                    e
                );
            }
            live.extend(store.referenced_transactions());
        }
        let pruned = self.journal.prune(&candidates, &live)?;
        if pruned > 0 {
            tracing::debug!("[mq-01] Pruned {} transaction records", pruned);
        }
        Ok(report)
    }

    /// Stop every store.
    ///
    /// Each store waits up to the grace period for its in-flight
    /// transactions. Stores that are still busy are reported in
    /// `StopTimeout` after the rest have stopped.
    pub async fn stop(&self) -> PagingResult<()> {
        if !self.started.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let stores: Vec<Arc<PagingStore>> = self.stores.read().values().cloned().collect();
        let grace = self.config.stop_grace;
        let mut busy = Vec::new();
        let mut first_error = None;

        for store in stores {
            match store.stop(grace).await {
                Ok(()) => {}
                Err(PagingError::StopTimeout { addresses, .. }) => busy.extend(addresses),
                Err(e) => {
                    tracing::error!("[mq-01] Failed to stop {}: {}", store.address(), e);
                    first_error.get_or_insert(e);
                }
            }
        }
        self.factory.stop();

        if !busy.is_empty() {
            busy.sort();
            return Err(PagingError::StopTimeout {
                grace,
                addresses: busy,
            });
        }
        if let Some(e) = first_error {
            return Err(e);
        }
        tracing::info!("[mq-01] 🛑 Paging stopped");
        Ok(())
    }
}

#[async_trait]
impl PagingApi for PagingManager {
    async fn send(&self, message: Message, ctx: &SendContext) -> PagingResult<AdmitOutcome> {
        let store = self.get_page_store(&message.address)?;
        store.admit(message, None, ctx).await
    }

    fn bind_queue(&self, address: Address, queue: QueueName) -> PagingResult<QueueSubscription> {
        self.get_page_store(&address)?.bind_queue(queue)
    }

    fn unbind_queue(&self, address: &Address, queue: &QueueName) -> PagingResult<bool> {
        match self.store(address) {
            Some(store) => store.unbind_queue(queue),
            None => Ok(false),
        }
    }

    fn next_message_id(&self) -> MessageId {
        MessageId(self.next_id.fetch_add(1, Ordering::AcqRel))
    }

    fn reclaim(&self) -> PagingResult<ReclaimReport> {
        self.reclaim_all()
    }

    fn metrics(&self) -> PagingMetrics {
        let mut stores: Vec<_> = self
            .stores
            .read()
            .values()
            .map(|store| store.metrics())
            .collect();
        stores.sort_by(|a, b| a.address.cmp(&b.address));
        PagingMetrics {
            global_resident_bytes: self.global.used(),
            global_paged_bytes: self.global.paged(),
            global_max_size_bytes: self.config.global_max_size_bytes,
            stores,
        }
    }
}
