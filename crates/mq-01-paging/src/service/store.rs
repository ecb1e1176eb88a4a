//! # Paging Store
//!
//! Memory accounting and page files for one address.
//!
//! ## Locking
//!
//! `inner` guards pages, byte counts and transaction staging. Lock order is
//! cursor → inner → queue resident buffer; nothing holds `inner` while
//! taking a cursor lock.

use parking_lot::{Mutex, RwLock};
use shared_types::{Address, Message, MessageId, PagePosition, QueueName, TransactionId};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::large_body::LargeBodyStore;
use super::subscription::{Delivery, QueueState, QueueSubscription, ResidentMessage};
use crate::domain::accounting::GlobalSizeTracker;
use crate::domain::admission::{decide, exceeds_limit, AdmissionDecision, PagingState};
use crate::domain::cursor::{CursorCheckpoint, CursorStep, PageCursor, PageIndex, Visibility};
use crate::domain::errors::{PagingError, PagingResult};
use crate::domain::metrics::{ReclaimReport, StoreMetrics};
use crate::domain::page::{Page, PAGE_EXTENSION};
use crate::domain::record::{encode_page_record, PagedMessage};
use crate::domain::session::SendContext;
use crate::domain::settings::{AddressFullPolicy, AddressSettings};
use crate::domain::transaction::DeliveryId;
use crate::ports::outbound::SequentialFileFactory;

/// Extension of cursor checkpoint files.
pub const CURSOR_EXTENSION: &str = "cursor";

/// What happened to an admitted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitOutcome {
    /// Held in memory (or staged in memory for its transaction).
    Accepted,
    /// Appended to a page file.
    Paged(PagePosition),
    /// Discarded by the DROP policy.
    Dropped,
}

/// Work a transaction has done in this store but not yet made visible.
#[derive(Debug, Default)]
struct StagedTx {
    resident: Vec<(Message, u64)>,
    reserved_bytes: u64,
    paged: usize,
}

#[derive(Debug, Default)]
struct StoreCounters {
    paged: AtomicU64,
    dropped: AtomicU64,
    rejected: AtomicU64,
    blocked: AtomicU64,
}

struct StoreInner {
    state: PagingState,
    resident_bytes: u64,
    paged_bytes: u64,
    pages: BTreeMap<u64, Page>,
    next_page_number: u64,
    in_flight: HashMap<TransactionId, StagedTx>,
    discarded: HashSet<TransactionId>,
    failed: Option<String>,
}

impl StoreInner {
    fn empty() -> Self {
        Self {
            state: PagingState::NotPaging,
            resident_bytes: 0,
            paged_bytes: 0,
            pages: BTreeMap::new(),
            next_page_number: 1,
            in_flight: HashMap::new(),
            discarded: HashSet::new(),
            failed: None,
        }
    }

    /// Position the next appended message will get.
    fn end_position(&self) -> PagePosition {
        match self.pages.last_key_value() {
            Some((number, page)) => PagePosition::new(*number, page.message_count()),
            None => PagePosition::start_of(self.next_page_number),
        }
    }

    fn contains(&self, position: PagePosition) -> bool {
        self.pages
            .get(&position.page_number)
            .is_some_and(|page| position.message_nr < page.message_count())
    }
}

impl PageIndex for StoreInner {
    fn message_count(&self, page: u64) -> Option<u32> {
        self.pages.get(&page).map(Page::message_count)
    }

    fn next_page_after(&self, page: u64) -> Option<u64> {
        self.pages.range(page + 1..).next().map(|(n, _)| *n)
    }

    fn visibility(&self, position: PagePosition) -> Visibility {
        let tx = self
            .pages
            .get(&position.page_number)
            .and_then(|page| page.entry(position.message_nr))
            .and_then(|entry| entry.tx_id);
        match tx {
            Some(tx) if self.in_flight.contains_key(&tx) => Visibility::Pending,
            Some(tx) if self.discarded.contains(&tx) => Visibility::Discarded,
            _ => Visibility::Visible,
        }
    }
}

/// Counts a sender as blocked for as long as it is held.
struct BlockedGuard<'a>(&'a AtomicU64);

impl<'a> BlockedGuard<'a> {
    fn enter(gauge: &'a AtomicU64) -> Self {
        gauge.fetch_add(1, Ordering::Relaxed);
        Self(gauge)
    }
}

impl Drop for BlockedGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Clears the reclaiming flag when a pass ends.
struct ReclaimGuard<'a>(&'a AtomicBool);

impl Drop for ReclaimGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct PagingStore {
    address: Address,
    settings: RwLock<AddressSettings>,
    files: Arc<dyn SequentialFileFactory>,
    global: Arc<GlobalSizeTracker>,
    bodies: Arc<LargeBodyStore>,
    inner: Mutex<StoreInner>,
    queues: RwLock<BTreeMap<QueueName, Arc<QueueState>>>,
    space_freed: Notify,
    tx_resolved: Notify,
    stopped: AtomicBool,
    reclaiming: AtomicBool,
    counters: StoreCounters,
}

impl std::fmt::Debug for PagingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagingStore")
            .field("address", &self.address)
            .field("directory", &self.files.directory())
            .finish()
    }
}

impl PagingStore {
    /// Empty store for a new address.
    pub fn new(
        address: Address,
        settings: AddressSettings,
        files: Arc<dyn SequentialFileFactory>,
        global: Arc<GlobalSizeTracker>,
        bodies: Arc<LargeBodyStore>,
    ) -> Self {
        Self {
            address,
            settings: RwLock::new(settings),
            files,
            global,
            bodies,
            inner: Mutex::new(StoreInner::empty()),
            queues: RwLock::new(BTreeMap::new()),
            space_freed: Notify::new(),
            tx_resolved: Notify::new(),
            stopped: AtomicBool::new(false),
            reclaiming: AtomicBool::new(false),
            counters: StoreCounters::default(),
        }
    }

    /// Rebuild a store from its directory.
    ///
    /// Page entries tagged with a transaction not in `committed` are
    /// discarded. Only record headers are read.
    pub fn load(
        address: Address,
        settings: AddressSettings,
        files: Arc<dyn SequentialFileFactory>,
        global: Arc<GlobalSizeTracker>,
        bodies: Arc<LargeBodyStore>,
        committed: &HashSet<TransactionId>,
    ) -> PagingResult<Self> {
        let store = Self::new(address, settings, files, global, bodies);
        {
            let mut inner = store.inner.lock();
            let names = store
                .files
                .list_files(PAGE_EXTENSION)
                .map_err(|e| PagingError::io(store.files.directory(), e))?;

            for number in names.iter().filter_map(|n| Page::parse_file_name(n)) {
                let (page, _torn) = Page::load(number, store.files.as_ref())?;
                for entry in page.entries() {
                    if let Some(tx) = entry.tx_id {
                        if !committed.contains(&tx) {
                            inner.discarded.insert(tx);
                        }
                    }
                }
                inner.paged_bytes += page.size();
                store.global.add_paged(page.size());
                inner.next_page_number = inner.next_page_number.max(number + 1);
                inner.pages.insert(number, page);
            }

            if inner.pages.values().any(|p| !p.is_empty()) {
                inner.state = PagingState::Paging;
            }

            let mut queues = store.queues.write();
            for checkpoint in store.read_checkpoints()? {
                let mut cursor = PageCursor::from_checkpoint(checkpoint);
                cursor.compact(&*inner);
                let state = Arc::new(QueueState::new(cursor));
                queues.insert(state.name.clone(), state);
            }

            tracing::info!(
                "[mq-01] 💾 Reloaded {}: {} pages, {} bytes, {} queues, state {}",
                store.address,
                inner.pages.len(),
                inner.paged_bytes,
                queues.len(),
                inner.state
            );
        }
        Ok(store)
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn settings(&self) -> AddressSettings {
        self.settings.read().clone()
    }

    /// Swap in new settings and wake blocked senders so they re-evaluate.
    pub fn update_settings(&self, settings: AddressSettings) {
        *self.settings.write() = settings;
        self.space_freed.notify_waiters();
    }

    pub fn state(&self) -> PagingState {
        self.inner.lock().state
    }

    pub fn is_paging(&self) -> bool {
        self.state() == PagingState::Paging
    }

    pub fn resident_bytes(&self) -> u64 {
        self.inner.lock().resident_bytes
    }

    pub fn page_count(&self) -> usize {
        self.inner.lock().pages.len()
    }

    pub fn is_failed(&self) -> bool {
        self.inner.lock().failed.is_some()
    }

    fn ensure_running(&self) -> PagingResult<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(PagingError::NotStarted);
        }
        Ok(())
    }

    // =========================================================================
    // ADMISSION
    // =========================================================================

    /// Route one message through the address's policy.
    ///
    /// With `tx` set, an accepted message is staged until [`commit_tx`] and a
    /// paged one is written as a provisional entry.
    ///
    /// [`commit_tx`]: Self::commit_tx
    pub async fn admit(
        &self,
        message: Message,
        tx: Option<TransactionId>,
        ctx: &SendContext,
    ) -> PagingResult<AdmitOutcome> {
        let incoming = message.memory_estimate();
        let deadline = self.block_deadline(ctx);

        loop {
            self.ensure_running()?;
            let store_freed = self.space_freed.notified();
            let global_freed = self.global.freed().notified();
            tokio::pin!(store_freed, global_freed);
            store_freed.as_mut().enable();
            global_freed.as_mut().enable();

            {
                let settings = self.settings.read().clone();
                let mut inner = self.inner.lock();
                if inner.failed.is_some() {
                    return Err(PagingError::StoreFailed {
                        address: self.address.clone(),
                    });
                }
                let over_address =
                    exceeds_limit(inner.resident_bytes, incoming, settings.max_size(), false);
                let reserved = !over_address && self.global.try_reserve(incoming);
                let decision = decide(settings.full_policy, inner.state, !reserved);
                if reserved && decision != AdmissionDecision::Accept {
                    self.global.cancel_reservation(incoming);
                }

                match decision {
                    AdmissionDecision::Reject => {
                        self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                        return Err(PagingError::DestinationFull {
                            address: self.address.clone(),
                            used: inner.resident_bytes,
                            max: settings.max_size().unwrap_or(u64::MAX),
                        });
                    }
                    AdmissionDecision::Drop => {
                        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(
                            "[mq-01] Dropped message {} on full address {}",
                            message.id,
                            self.address
                        );
                        if let Some(body) = message.body.large_ref() {
                            self.bodies.delete_quietly(body.id);
                        }
                        return Ok(AdmitOutcome::Dropped);
                    }
                    AdmissionDecision::Page => {
                        let position = self.page_locked(&mut inner, &settings, message, tx)?;
                        return Ok(AdmitOutcome::Paged(position));
                    }
                    AdmissionDecision::Accept => {
                        self.accept_locked(&mut inner, message, incoming, tx);
                        return Ok(AdmitOutcome::Accepted);
                    }
                    AdmissionDecision::Block => {}
                }
            }

            self.wait_for_space(&mut store_freed, &mut global_freed, ctx, deadline)
                .await?;
        }
    }

    /// Suspend while a BLOCK address is at its limit. Returns immediately for
    /// other policies. Used to gate large-message chunks.
    pub async fn wait_for_capacity(&self, ctx: &SendContext) -> PagingResult<()> {
        let deadline = self.block_deadline(ctx);
        loop {
            self.ensure_running()?;
            let store_freed = self.space_freed.notified();
            let global_freed = self.global.freed().notified();
            tokio::pin!(store_freed, global_freed);
            store_freed.as_mut().enable();
            global_freed.as_mut().enable();

            {
                let settings = self.settings.read().clone();
                if settings.full_policy != AddressFullPolicy::Block {
                    return Ok(());
                }
                let inner = self.inner.lock();
                let blocked = exceeds_limit(
                    inner.resident_bytes,
                    1,
                    settings.max_size(),
                    self.global.would_exceed(1),
                );
                if !blocked {
                    return Ok(());
                }
            }

            self.wait_for_space(&mut store_freed, &mut global_freed, ctx, deadline)
                .await?;
        }
    }

    fn block_deadline(&self, ctx: &SendContext) -> Option<(Instant, Duration)> {
        let timeout = ctx.timeout().or_else(|| self.settings.read().block_timeout());
        timeout.map(|t| (Instant::now() + t, t))
    }

    async fn wait_for_space(
        &self,
        store_freed: &mut std::pin::Pin<&mut tokio::sync::futures::Notified<'_>>,
        global_freed: &mut std::pin::Pin<&mut tokio::sync::futures::Notified<'_>>,
        ctx: &SendContext,
        deadline: Option<(Instant, Duration)>,
    ) -> PagingResult<()> {
        if ctx.is_closed() {
            return Err(PagingError::Closed {
                address: self.address.clone(),
            });
        }
        let _blocked = BlockedGuard::enter(&self.counters.blocked);
        let expiry = async {
            match deadline {
                Some((at, _)) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = store_freed => Ok(()),
            _ = global_freed => Ok(()),
            _ = ctx.closed() => Err(PagingError::Closed {
                address: self.address.clone(),
            }),
            _ = expiry => Err(PagingError::SendTimeout {
                address: self.address.clone(),
                waited: deadline.map(|(_, t)| t).unwrap_or_default(),
            }),
        }
    }

    /// Keep a message whose bytes are already reserved globally.
    fn accept_locked(
        &self,
        inner: &mut StoreInner,
        message: Message,
        bytes: u64,
        tx: Option<TransactionId>,
    ) {
        inner.resident_bytes += bytes;
        match tx {
            Some(tx) => {
                let staged = inner.in_flight.entry(tx).or_default();
                staged.reserved_bytes += bytes;
                staged.resident.push((message, bytes));
            }
            None => self.route_resident_locked(inner, message, bytes),
        }
    }

    /// Hand an already-counted resident message to every bound queue.
    fn route_resident_locked(&self, inner: &mut StoreInner, message: Message, bytes: u64) {
        let queues = self.queues.read();
        if queues.is_empty() {
            inner.resident_bytes = inner.resident_bytes.saturating_sub(bytes);
            self.global.release(bytes);
            if let Some(body) = message.body.large_ref() {
                self.bodies.delete_quietly(body.id);
            }
            return;
        }
        let shared = Arc::new(ResidentMessage::new(message, bytes, queues.len()));
        for state in queues.values() {
            state.resident.lock().push(shared.clone());
        }
    }

    fn page_locked(
        &self,
        inner: &mut StoreInner,
        settings: &AddressSettings,
        message: Message,
        tx: Option<TransactionId>,
    ) -> PagingResult<PagePosition> {
        let sync = settings.sync_durable_writes && message.durable && tx.is_none();
        let entry = PagedMessage { message, tx_id: tx };
        let record = encode_page_record(&entry)?;
        let record_len = record.len() as u64;

        let needs_new_page = match inner.pages.last_key_value() {
            Some((_, page)) => page.is_full_for(record_len, settings.page_size_bytes),
            None => true,
        };
        if needs_new_page {
            let synced = match inner.pages.values_mut().next_back() {
                Some(last) => last.sync(),
                None => Ok(()),
            };
            if let Err(e) = synced {
                return Err(self.fail_locked(inner, e));
            }
            let number = inner.next_page_number;
            let page = match Page::create(number, self.files.as_ref()) {
                Ok(page) => page,
                Err(e) => return Err(self.fail_locked(inner, e)),
            };
            inner.next_page_number += 1;
            inner.paged_bytes += page.size();
            self.global.add_paged(page.size());
            inner.pages.insert(number, page);
            tracing::debug!("[mq-01] {} opened page {}", self.address, number);
        }

        let appended = match inner.pages.last_entry() {
            Some(mut last) => last
                .get_mut()
                .append(&record, &entry, sync)
                .map(|nr| PagePosition::new(*last.key(), nr)),
            None => Err(PagingError::corruption(
                self.files.directory(),
                "no active page after rollover",
            )),
        };
        let position = match appended {
            Ok(position) => position,
            Err(e) => return Err(self.fail_locked(inner, e)),
        };

        inner.paged_bytes += record_len;
        self.global.add_paged(record_len);
        if let Some(tx) = tx {
            inner.in_flight.entry(tx).or_default().paged += 1;
        }
        if inner.state == PagingState::NotPaging {
            inner.state = PagingState::Paging;
            tracing::info!(
                "[mq-01] 📄 {} started paging at {} resident bytes",
                self.address,
                inner.resident_bytes
            );
        }
        self.counters.paged.fetch_add(1, Ordering::Relaxed);
        Ok(position)
    }

    /// Fence the store after an I/O failure. Other addresses are unaffected.
    fn fail_locked(&self, inner: &mut StoreInner, error: PagingError) -> PagingError {
        if error.is_fatal_for_store() && inner.failed.is_none() {
            tracing::error!("[mq-01] ❌ Paging store {} failed: {}", self.address, error);
            inner.failed = Some(error.to_string());
        }
        error
    }

    /// Flush the active page.
    pub fn sync(&self) -> PagingResult<()> {
        let mut inner = self.inner.lock();
        let result = match inner.pages.values_mut().next_back() {
            Some(page) => page.sync(),
            None => Ok(()),
        };
        result.map_err(|e| self.fail_locked(&mut inner, e))
    }

    // =========================================================================
    // TRANSACTIONS
    // =========================================================================

    /// Make everything `tx` staged here visible.
    pub fn commit_tx(&self, tx: TransactionId) {
        let mut inner = self.inner.lock();
        let staged = inner.in_flight.remove(&tx);
        if let Some(staged) = staged {
            for (message, bytes) in staged.resident {
                self.route_resident_locked(&mut inner, message, bytes);
            }
        }
        drop(inner);
        self.tx_resolved.notify_waiters();
    }

    /// Undo everything `tx` staged here. Provisional page entries become
    /// invisible and are skipped by cursors.
    pub fn abort_tx(&self, tx: TransactionId) {
        let released = {
            let mut inner = self.inner.lock();
            let staged = inner.in_flight.remove(&tx);
            staged.map(|staged| {
                inner.resident_bytes = inner.resident_bytes.saturating_sub(staged.reserved_bytes);
                if staged.paged > 0 {
                    inner.discarded.insert(tx);
                }
                staged.reserved_bytes
            })
        };
        if let Some(bytes) = released {
            self.global.release(bytes);
            self.space_freed.notify_waiters();
        }
        self.tx_resolved.notify_waiters();
    }

    /// Transaction ids still referenced by page entries.
    pub fn referenced_transactions(&self) -> HashSet<TransactionId> {
        let inner = self.inner.lock();
        inner
            .pages
            .values()
            .flat_map(|p| p.entries().iter().filter_map(|e| e.tx_id))
            .collect()
    }

    // =========================================================================
    // DELIVERY
    // =========================================================================

    /// Bind a queue. New queues see messages sent from now on; an existing
    /// binding is returned unchanged.
    pub fn bind_queue(self: &Arc<Self>, queue: QueueName) -> PagingResult<QueueSubscription> {
        if let Some(state) = self.queues.read().get(&queue) {
            return Ok(QueueSubscription::new(self.clone(), state.clone()));
        }

        let state = {
            let inner = self.inner.lock();
            let mut queues = self.queues.write();
            if let Some(state) = queues.get(&queue) {
                state.clone()
            } else {
                let cursor = PageCursor::new(queue.clone(), inner.end_position());
                let state = Arc::new(QueueState::new(cursor));
                queues.insert(queue.clone(), state.clone());
                state
            }
        };
        self.write_checkpoint(&state.cursor.lock().checkpoint())?;
        tracing::debug!("[mq-01] Bound queue {} to {}", queue, self.address);
        Ok(QueueSubscription::new(self.clone(), state))
    }

    pub fn subscription(self: &Arc<Self>, queue: &QueueName) -> Option<QueueSubscription> {
        let state = self.queues.read().get(queue).cloned()?;
        Some(QueueSubscription::new(self.clone(), state))
    }

    pub fn queue_names(&self) -> Vec<QueueName> {
        self.queues.read().keys().cloned().collect()
    }

    /// Remove a queue, releasing its resident messages and its checkpoint.
    pub fn unbind_queue(&self, queue: &QueueName) -> PagingResult<bool> {
        let Some(state) = self.queues.write().remove(queue) else {
            return Ok(false);
        };
        let held = state.resident.lock().drain();
        for message in held {
            self.release_resident(&message);
        }
        let name = Self::checkpoint_name(queue);
        self.files
            .create_file(&name)
            .delete()
            .map_err(|e| PagingError::io(&name, e))?;
        tracing::debug!("[mq-01] Unbound queue {} from {}", queue, self.address);
        Ok(true)
    }

    /// Return one queue reference to a resident message; frees its bytes when
    /// it was the last.
    pub(crate) fn release_resident(&self, message: &ResidentMessage) {
        if !message.release() {
            return;
        }
        {
            let mut inner = self.inner.lock();
            inner.resident_bytes = inner.resident_bytes.saturating_sub(message.bytes);
        }
        self.global.release(message.bytes);
        if let Some(body) = message.message.body.large_ref() {
            self.bodies.delete_quietly(body.id);
        }
        self.space_freed.notify_waiters();
    }

    pub(crate) fn next_paged(&self, queue: &QueueState) -> PagingResult<Option<Delivery>> {
        let mut cursor = queue.cursor.lock();
        let mut inner = self.inner.lock();
        let (position, redelivered) = match cursor.next(&*inner) {
            CursorStep::Deliver(position) => (position, false),
            CursorStep::Redeliver(position) => (position, true),
            CursorStep::Stalled | CursorStep::CaughtUp => return Ok(None),
        };
        let Some(page) = inner.pages.get_mut(&position.page_number) else {
            return Ok(None);
        };
        match page.read(position.message_nr) {
            Ok(entry) => Ok(Some(Delivery {
                id: DeliveryId::Paged(position),
                message: entry.message,
                redelivered,
            })),
            Err(e) => {
                cursor.redeliver(position);
                Err(e)
            }
        }
    }

    pub(crate) fn acknowledge_paged(
        &self,
        queue: &QueueState,
        position: PagePosition,
    ) -> PagingResult<bool> {
        let mut cursor = queue.cursor.lock();
        let inner = self.inner.lock();
        if !inner.contains(position) {
            let reclaimed = inner
                .pages
                .first_key_value()
                .map_or(true, |(first, _)| position.page_number < *first);
            if reclaimed || cursor.is_acked(position) {
                return Ok(false);
            }
            return Err(PagingError::UnknownPosition {
                queue: queue.name.to_string(),
                position,
            });
        }
        Ok(cursor.acknowledge(&*inner, position))
    }

    pub(crate) fn browse_paged(&self, queue: &QueueState, limit: usize) -> PagingResult<Vec<Message>> {
        let mut view = PageCursor::from_checkpoint(queue.cursor.lock().checkpoint());
        let mut inner = self.inner.lock();
        let mut messages = Vec::new();
        while messages.len() < limit {
            let position = match view.next(&*inner) {
                CursorStep::Deliver(p) | CursorStep::Redeliver(p) => p,
                CursorStep::Stalled | CursorStep::CaughtUp => break,
            };
            if let Some(page) = inner.pages.get_mut(&position.page_number) {
                messages.push(page.read(position.message_nr)?.message);
            }
        }
        Ok(messages)
    }

    // =========================================================================
    // RECLAMATION
    // =========================================================================

    /// Delete pages every queue has acknowledged, and leave paging once
    /// nothing paged is outstanding and resident bytes fit again.
    ///
    /// Returns an empty report if another pass on this store is running.
    pub fn reclaim(&self) -> PagingResult<ReclaimReport> {
        if self.reclaiming.swap(true, Ordering::AcqRel) {
            return Ok(ReclaimReport::default());
        }
        let _guard = ReclaimGuard(&self.reclaiming);

        let queues: Vec<Arc<QueueState>> = self.queues.read().values().cloned().collect();
        let mut min_frontier: Option<PagePosition> = None;
        for state in &queues {
            let mut cursor = state.cursor.lock();
            let inner = self.inner.lock();
            cursor.compact(&*inner);
            let frontier = cursor.ack_frontier();
            min_frontier = Some(min_frontier.map_or(frontier, |m| m.min(frontier)));
        }

        let settings = self.settings.read().clone();
        let mut report = ReclaimReport::default();
        let mut inner = self.inner.lock();
        let end = inner.end_position();
        let active = inner.pages.last_key_value().map(|(n, _)| *n);
        let all_consumed = min_frontier.map_or(true, |f| f >= end);

        let can_leave_paging = inner.state == PagingState::Paging
            && all_consumed
            && inner.in_flight.values().all(|s| s.paged == 0)
            && !exceeds_limit(inner.resident_bytes, 0, settings.max_size(), false);

        let doomed: Vec<u64> = inner
            .pages
            .keys()
            .copied()
            .filter(|n| {
                let behind = min_frontier.map_or(true, |f| *n < f.page_number);
                (Some(*n) != active && behind) || (can_leave_paging && Some(*n) == active)
            })
            .collect();

        for number in doomed {
            let Some(mut page) = inner.pages.remove(&number) else {
                continue;
            };
            let discarded = &inner.discarded;
            let bodies: Vec<MessageId> = page
                .entries()
                .iter()
                .filter(|e| !e.tx_id.is_some_and(|tx| discarded.contains(&tx)))
                .filter_map(|e| e.large_body)
                .collect();
            if let Err(e) = page.delete() {
                tracing::warn!("[mq-01] Could not delete page {} of {}: {}", number, self.address, e);
                inner.pages.insert(number, page);
                continue;
            }
            inner.paged_bytes = inner.paged_bytes.saturating_sub(page.size());
            self.global.release_paged(page.size());
            report.freed_bytes += page.size();
            report.deleted_pages.push(number);
            for id in bodies {
                self.bodies.delete_quietly(id);
                report.released_bodies.push(id);
            }
        }

        if can_leave_paging && inner.pages.is_empty() {
            inner.state = PagingState::NotPaging;
            inner.discarded.clear();
            report.left_paging = true;
            tracing::info!("[mq-01] ✅ {} stopped paging", self.address);
        }
        drop(inner);

        if !report.is_empty() {
            tracing::debug!(
                "[mq-01] Reclaimed {} pages ({} bytes) from {}",
                report.deleted_pages.len(),
                report.freed_bytes,
                self.address
            );
            self.space_freed.notify_waiters();
        }
        Ok(report)
    }

    // =========================================================================
    // CHECKPOINTS
    // =========================================================================

    fn checkpoint_name(queue: &QueueName) -> String {
        format!("{}.{}", hex::encode(queue.as_str()), CURSOR_EXTENSION)
    }

    fn write_checkpoint(&self, checkpoint: &CursorCheckpoint) -> PagingResult<()> {
        let name = Self::checkpoint_name(&checkpoint.queue);
        let tmp = format!("{}.tmp", name);
        let bytes = serde_json::to_vec(checkpoint)
            .map_err(|e| PagingError::corruption(&name, e.to_string()))?;

        let mut file = self.files.create_file(&tmp);
        let written = file
            .open()
            .and_then(|_| file.truncate(0))
            .and_then(|_| file.write(&bytes, true))
            .and_then(|_| file.close());
        written.map_err(|e| PagingError::io(&tmp, e))?;
        self.files
            .rename(&tmp, &name)
            .map_err(|e| PagingError::io(&name, e))
    }

    fn read_checkpoints(&self) -> PagingResult<Vec<CursorCheckpoint>> {
        let names = self
            .files
            .list_files(CURSOR_EXTENSION)
            .map_err(|e| PagingError::io(self.files.directory(), e))?;
        let mut checkpoints = Vec::with_capacity(names.len());
        for name in names {
            let mut file = self.files.create_file(&name);
            let bytes = file
                .open()
                .and_then(|_| file.read_all())
                .map_err(|e| PagingError::io(&name, e))?;
            let checkpoint = serde_json::from_slice(&bytes)
                .map_err(|e| PagingError::corruption(&name, e.to_string()))?;
            checkpoints.push(checkpoint);
        }
        Ok(checkpoints)
    }

    /// Persist every queue's acknowledgement position.
    pub fn persist_cursors(&self) -> PagingResult<()> {
        let queues: Vec<Arc<QueueState>> = self.queues.read().values().cloned().collect();
        for state in queues {
            let checkpoint = state.cursor.lock().checkpoint();
            self.write_checkpoint(&checkpoint)?;
        }
        Ok(())
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Refuse new sends, wait for in-flight transactions, then persist
    /// cursors and close pages.
    pub async fn stop(&self, grace: Duration) -> PagingResult<()> {
        self.stopped.store(true, Ordering::Release);
        self.space_freed.notify_waiters();

        let deadline = Instant::now() + grace;
        loop {
            let resolved = self.tx_resolved.notified();
            tokio::pin!(resolved);
            resolved.as_mut().enable();
            if self.inner.lock().in_flight.is_empty() {
                break;
            }
            if tokio::time::timeout_at(deadline, resolved).await.is_err() {
                return Err(PagingError::StopTimeout {
                    grace,
                    addresses: vec![self.address.clone()],
                });
            }
        }

        self.persist_cursors()?;
        let mut inner = self.inner.lock();
        for page in inner.pages.values_mut() {
            page.close()?;
        }
        Ok(())
    }

    /// Reopen a stopped store for sends.
    pub fn resume(&self) -> PagingResult<()> {
        {
            let mut inner = self.inner.lock();
            for page in inner.pages.values_mut() {
                page.reopen()?;
            }
        }
        self.stopped.store(false, Ordering::Release);
        Ok(())
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Highest message id in any page.
    pub fn max_message_id(&self) -> Option<MessageId> {
        let inner = self.inner.lock();
        inner
            .pages
            .values()
            .flat_map(|p| p.entries().iter().map(|e| e.message_id))
            .max()
    }

    /// Large bodies referenced by live page entries.
    pub fn referenced_large_bodies(&self) -> HashSet<MessageId> {
        let inner = self.inner.lock();
        inner
            .pages
            .values()
            .flat_map(|p| p.entries().iter())
            .filter(|e| !e.tx_id.is_some_and(|tx| inner.discarded.contains(&tx)))
            .filter_map(|e| e.large_body)
            .collect()
    }

    pub fn metrics(&self) -> StoreMetrics {
        let settings = self.settings.read().clone();
        let queues = self.queues.read().len();
        let inner = self.inner.lock();
        StoreMetrics {
            address: self.address.clone(),
            paging: inner.state == PagingState::Paging,
            policy: settings.full_policy,
            resident_bytes: inner.resident_bytes,
            max_size_bytes: settings.max_size_bytes,
            paged_bytes: inner.paged_bytes,
            page_count: inner.pages.len(),
            messages_paged: self.counters.paged.load(Ordering::Relaxed),
            messages_dropped: self.counters.dropped.load(Ordering::Relaxed),
            messages_rejected: self.counters.rejected.load(Ordering::Relaxed),
            blocked_senders: self.counters.blocked.load(Ordering::Relaxed),
            queues,
            failed: inner.failed.is_some(),
        }
    }
}
