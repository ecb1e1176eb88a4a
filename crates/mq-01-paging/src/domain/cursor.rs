//! # Page Cursor
//!
//! Per-queue read and acknowledgement position over an address's pages.
//!
//! ## Invariants
//!
//! | Invariant | Description |
//! |-----------|-------------|
//! | Frontier monotonic | `ack_frontier` never moves backwards |
//! | No re-delivery of acked | Positions before the frontier or in the ahead-set are skipped |
//! | Ordered delivery | Visible entries are delivered in position order |
//! | Stall on provisional | A cursor waits at an entry whose transaction is still committing |
//!
//! The cursor owns no file handles; it asks a [`PageIndex`] what exists.

use serde::{Deserialize, Serialize};
use shared_types::{PagePosition, QueueName};
use std::collections::BTreeSet;

/// Whether a paged entry may be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    /// Written by a transaction that has not finished committing.
    Pending,
    /// Written by a transaction that rolled back; treated as acknowledged.
    Discarded,
}

/// Read-only view of an address's pages.
pub trait PageIndex {
    /// Messages in `page`, or `None` if the page does not exist.
    fn message_count(&self, page: u64) -> Option<u32>;

    /// Lowest existing page number strictly greater than `page`.
    fn next_page_after(&self, page: u64) -> Option<u64>;

    fn visibility(&self, position: PagePosition) -> Visibility;
}

/// Result of asking a cursor for its next message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorStep {
    Deliver(PagePosition),
    /// A previously delivered message returned for another attempt.
    Redeliver(PagePosition),
    /// Blocked behind a provisional entry.
    Stalled,
    /// Nothing left to read right now.
    CaughtUp,
}

/// Durable part of a cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorCheckpoint {
    pub queue: QueueName,
    /// First position not yet acknowledged.
    pub ack_frontier: PagePosition,
    /// Acknowledged positions beyond the frontier.
    pub acked_ahead: Vec<PagePosition>,
}

#[derive(Debug, Clone)]
pub struct PageCursor {
    queue: QueueName,
    ack_frontier: PagePosition,
    acked_ahead: BTreeSet<PagePosition>,
    read_position: PagePosition,
    delivered: BTreeSet<PagePosition>,
    redeliveries: BTreeSet<PagePosition>,
}

/// Move `position` off the end of a page that has a successor.
fn normalize(index: &dyn PageIndex, mut position: PagePosition) -> PagePosition {
    loop {
        let exhausted = match index.message_count(position.page_number) {
            Some(count) => position.message_nr >= count,
            None => true,
        };
        if !exhausted {
            return position;
        }
        match index.next_page_after(position.page_number) {
            Some(next) => position = PagePosition::start_of(next),
            None => return position,
        }
    }
}

fn exists(index: &dyn PageIndex, position: PagePosition) -> bool {
    index
        .message_count(position.page_number)
        .is_some_and(|count| position.message_nr < count)
}

impl PageCursor {
    /// Cursor that sees everything from `start` on.
    pub fn new(queue: QueueName, start: PagePosition) -> Self {
        Self {
            queue,
            ack_frontier: start,
            acked_ahead: BTreeSet::new(),
            read_position: start,
            delivered: BTreeSet::new(),
            redeliveries: BTreeSet::new(),
        }
    }

    /// Cursor resumed after restart. Unacknowledged messages are delivered again.
    pub fn from_checkpoint(checkpoint: CursorCheckpoint) -> Self {
        Self {
            queue: checkpoint.queue,
            ack_frontier: checkpoint.ack_frontier,
            acked_ahead: checkpoint.acked_ahead.into_iter().collect(),
            read_position: checkpoint.ack_frontier,
            delivered: BTreeSet::new(),
            redeliveries: BTreeSet::new(),
        }
    }

    pub fn queue(&self) -> &QueueName {
        &self.queue
    }

    /// First position not yet acknowledged.
    pub fn ack_frontier(&self) -> PagePosition {
        self.ack_frontier
    }

    pub fn is_acked(&self, position: PagePosition) -> bool {
        position < self.ack_frontier || self.acked_ahead.contains(&position)
    }

    /// Next position to hand to the queue.
    pub fn next(&mut self, index: &dyn PageIndex) -> CursorStep {
        if let Some(position) = self.redeliveries.pop_first() {
            self.delivered.insert(position);
            return CursorStep::Redeliver(position);
        }

        loop {
            let position = normalize(index, self.read_position.max(self.ack_frontier));
            self.read_position = position;
            if !exists(index, position) {
                return CursorStep::CaughtUp;
            }
            if self.is_acked(position) {
                self.read_position = position.next_in_page();
                continue;
            }
            match index.visibility(position) {
                Visibility::Pending => return CursorStep::Stalled,
                Visibility::Discarded => {
                    self.read_position = position.next_in_page();
                    self.acknowledge(index, position);
                }
                Visibility::Visible => {
                    self.read_position = position.next_in_page();
                    self.delivered.insert(position);
                    return CursorStep::Deliver(position);
                }
            }
        }
    }

    /// Record an acknowledgement. Returns false if it was already acknowledged.
    pub fn acknowledge(&mut self, index: &dyn PageIndex, position: PagePosition) -> bool {
        if self.is_acked(position) {
            return false;
        }
        self.delivered.remove(&position);
        self.redeliveries.remove(&position);
        self.acked_ahead.insert(position);
        self.compact(index);
        true
    }

    /// Fold contiguous acknowledgements into the frontier.
    pub fn compact(&mut self, index: &dyn PageIndex) {
        loop {
            let frontier = normalize(index, self.ack_frontier);
            self.ack_frontier = frontier;
            if self.acked_ahead.remove(&frontier) {
                self.ack_frontier = frontier.next_in_page();
                continue;
            }
            if exists(index, frontier) && index.visibility(frontier) == Visibility::Discarded {
                self.ack_frontier = frontier.next_in_page();
                continue;
            }
            break;
        }
        let frontier = self.ack_frontier;
        self.acked_ahead.retain(|p| *p >= frontier);
    }

    /// Return a delivered message to the cursor for another attempt.
    pub fn redeliver(&mut self, position: PagePosition) -> bool {
        if self.delivered.remove(&position) {
            self.redeliveries.insert(position);
            true
        } else {
            false
        }
    }

    /// Return every in-delivery message, e.g. when the consumer goes away.
    pub fn redeliver_all(&mut self) -> usize {
        let delivered = std::mem::take(&mut self.delivered);
        let count = delivered.len();
        self.redeliveries.extend(delivered);
        count
    }

    /// True when every existing message has been acknowledged.
    #[cfg(test)]
    pub fn is_fully_acked(&self, index: &dyn PageIndex) -> bool {
        !exists(index, normalize(index, self.ack_frontier))
    }

    pub fn checkpoint(&self) -> CursorCheckpoint {
        CursorCheckpoint {
            queue: self.queue.clone(),
            ack_frontier: self.ack_frontier,
            acked_ahead: self.acked_ahead.iter().copied().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashMap};

    #[derive(Default)]
    struct FakeIndex {
        pages: BTreeMap<u64, u32>,
        visibility: HashMap<PagePosition, Visibility>,
    }

    impl FakeIndex {
        fn with_pages(pages: &[(u64, u32)]) -> Self {
            Self {
                pages: pages.iter().copied().collect(),
                ..Default::default()
            }
        }
    }

    impl PageIndex for FakeIndex {
        fn message_count(&self, page: u64) -> Option<u32> {
            self.pages.get(&page).copied()
        }

        fn next_page_after(&self, page: u64) -> Option<u64> {
            self.pages.range(page + 1..).next().map(|(n, _)| *n)
        }

        fn visibility(&self, position: PagePosition) -> Visibility {
            self.visibility
                .get(&position)
                .copied()
                .unwrap_or(Visibility::Visible)
        }
    }

    fn queue() -> QueueName {
        QueueName::new("q").unwrap()
    }

    fn pos(page: u64, nr: u32) -> PagePosition {
        PagePosition::new(page, nr)
    }

    fn drain(cursor: &mut PageCursor, index: &FakeIndex) -> Vec<PagePosition> {
        let mut out = Vec::new();
        while let CursorStep::Deliver(p) = cursor.next(index) {
            out.push(p);
        }
        out
    }

    #[test]
    fn test_delivers_across_pages_in_order() {
        let index = FakeIndex::with_pages(&[(1, 2), (2, 1), (3, 2)]);
        let mut cursor = PageCursor::new(queue(), pos(1, 0));
        assert_eq!(
            drain(&mut cursor, &index),
            vec![pos(1, 0), pos(1, 1), pos(2, 0), pos(3, 0), pos(3, 1)]
        );
        assert_eq!(cursor.next(&index), CursorStep::CaughtUp);
    }

    #[test]
    fn test_out_of_order_acks_compact_into_frontier() {
        let index = FakeIndex::with_pages(&[(1, 3), (2, 1)]);
        let mut cursor = PageCursor::new(queue(), pos(1, 0));
        drain(&mut cursor, &index);

        assert!(cursor.acknowledge(&index, pos(1, 2)));
        assert_eq!(cursor.ack_frontier(), pos(1, 0));
        assert!(cursor.acknowledge(&index, pos(1, 0)));
        assert_eq!(cursor.ack_frontier(), pos(1, 1));
        assert!(cursor.acknowledge(&index, pos(1, 1)));
        assert_eq!(cursor.ack_frontier(), pos(2, 0));
        assert!(!cursor.is_fully_acked(&index));

        assert!(cursor.acknowledge(&index, pos(2, 0)));
        assert!(cursor.is_fully_acked(&index));
    }

    #[test]
    fn test_duplicate_ack_is_noop() {
        let index = FakeIndex::with_pages(&[(1, 2)]);
        let mut cursor = PageCursor::new(queue(), pos(1, 0));
        assert!(cursor.acknowledge(&index, pos(1, 0)));
        let before = cursor.checkpoint();
        assert!(!cursor.acknowledge(&index, pos(1, 0)));
        assert_eq!(cursor.checkpoint(), before);
    }

    #[test]
    fn test_stalls_at_pending_entry() {
        let mut index = FakeIndex::with_pages(&[(1, 3)]);
        index.visibility.insert(pos(1, 1), Visibility::Pending);
        let mut cursor = PageCursor::new(queue(), pos(1, 0));

        assert_eq!(cursor.next(&index), CursorStep::Deliver(pos(1, 0)));
        assert_eq!(cursor.next(&index), CursorStep::Stalled);
        assert_eq!(cursor.next(&index), CursorStep::Stalled);

        index.visibility.remove(&pos(1, 1));
        assert_eq!(drain(&mut cursor, &index), vec![pos(1, 1), pos(1, 2)]);
    }

    #[test]
    fn test_discarded_entries_skipped_and_count_as_acked() {
        let mut index = FakeIndex::with_pages(&[(1, 3)]);
        index.visibility.insert(pos(1, 0), Visibility::Discarded);
        index.visibility.insert(pos(1, 1), Visibility::Discarded);
        let mut cursor = PageCursor::new(queue(), pos(1, 0));

        assert_eq!(drain(&mut cursor, &index), vec![pos(1, 2)]);
        assert_eq!(cursor.ack_frontier(), pos(1, 2));
    }

    #[test]
    fn test_redelivery_comes_first() {
        let index = FakeIndex::with_pages(&[(1, 3)]);
        let mut cursor = PageCursor::new(queue(), pos(1, 0));
        assert_eq!(cursor.next(&index), CursorStep::Deliver(pos(1, 0)));
        assert_eq!(cursor.next(&index), CursorStep::Deliver(pos(1, 1)));

        assert!(cursor.redeliver(pos(1, 0)));
        assert!(!cursor.redeliver(pos(1, 2)));
        assert_eq!(cursor.next(&index), CursorStep::Redeliver(pos(1, 0)));
        assert_eq!(cursor.next(&index), CursorStep::Deliver(pos(1, 2)));
    }

    #[test]
    fn test_checkpoint_resume_skips_acked() {
        let index = FakeIndex::with_pages(&[(1, 4)]);
        let mut cursor = PageCursor::new(queue(), pos(1, 0));
        drain(&mut cursor, &index);
        cursor.acknowledge(&index, pos(1, 0));
        cursor.acknowledge(&index, pos(1, 2));

        let mut resumed = PageCursor::from_checkpoint(cursor.checkpoint());
        assert_eq!(drain(&mut resumed, &index), vec![pos(1, 1), pos(1, 3)]);
    }

    #[test]
    fn test_cursor_waits_for_page_not_yet_written() {
        let mut index = FakeIndex::with_pages(&[(1, 1)]);
        let mut cursor = PageCursor::new(queue(), pos(2, 0));
        assert_eq!(cursor.next(&index), CursorStep::CaughtUp);

        index.pages.insert(2, 1);
        assert_eq!(cursor.next(&index), CursorStep::Deliver(pos(2, 0)));
    }

    #[test]
    fn test_reclaimed_pages_are_skipped() {
        let index = FakeIndex::with_pages(&[(5, 1)]);
        let mut cursor = PageCursor::new(queue(), pos(2, 0));
        assert_eq!(cursor.next(&index), CursorStep::Deliver(pos(5, 0)));
    }
}
