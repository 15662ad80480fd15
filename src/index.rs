//! Shared pagination index with a background scan and an escalation path.
//!
//! [`PageIndex`] maps every computed page boundary ([`PositionKey`]) to its
//! [`PageInfo`]. A [`Scanner`] thread walks the document's items in reading
//! order, asking the attached [`PageMeasurer`] (the rendering engine) for
//! each item's page boundaries and inserting them under lock. Foreground
//! navigation queries never wait on the scan: if a query needs an item the
//! scan has not reached, the containing item is measured synchronously and
//! out of order (escalation), and the scan later skips it.
//!
//! Locking is deliberately non-re-entrant: one plain mutex guards the map
//! and item set, and measurement always runs with that lock released. A
//! result is merged only if the document generation observed before
//! measuring still matches, so work finished after a document switch is
//! dropped, never merged.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use log::{debug, error, warn};
use smallvec::SmallVec;

use crate::error::PaginateError;
use crate::position::{PageInfo, PositionKey};

/// One measured page within an item: where it starts and how long it is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageSlice {
    /// Byte offset of the page start within the item.
    pub offset: i32,
    /// Length of the page content in bytes.
    pub size: i32,
}

impl PageSlice {
    /// Page starting at `offset` with `size` content bytes.
    pub const fn new(offset: i32, size: i32) -> Self {
        Self { offset, size }
    }
}

/// Page boundaries for one item, smallest-footprint first.
pub type ItemPages = SmallVec<[PageSlice; 16]>;

/// The rendering engine's measurement seam.
///
/// `paginate` produces the page boundaries for one item. The first page of
/// an item with any content must start at offset 0. Measurement is the
/// expensive step and is always invoked with the index lock released.
pub trait PageMeasurer: Send {
    /// Compute the page boundaries of item `item`.
    fn paginate(&mut self, item: i16) -> Result<ItemPages, PaginateError>;
}

/// Progress report from the background scan, for UI consumption.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanEvent {
    /// One item's boundaries were merged into the index.
    Item {
        /// The item that was scanned.
        item: i16,
        /// Number of pages the item produced.
        pages: usize,
    },
    /// The whole document has been covered and page numbers assigned.
    Completed {
        /// Total page count of the document.
        total_pages: usize,
    },
}

#[derive(Default)]
struct IndexState {
    pages: BTreeMap<PositionKey, PageInfo>,
    known: BTreeSet<i16>,
    item_count: i16,
    current_item: i16,
    completed: bool,
    generation: u64,
}

/// Thread-safe pagination index for one open document at a time.
#[derive(Default)]
pub struct PageIndex {
    state: Mutex<IndexState>,
    measurer: Mutex<Option<Box<dyn PageMeasurer>>>,
}

impl PageIndex {
    /// Empty index with no document and no measurer.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_state(&self) -> MutexGuard<'_, IndexState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_measurer(&self) -> MutexGuard<'_, Option<Box<dyn PageMeasurer>>> {
        self.measurer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach the measurement engine used by the scan and by escalation.
    /// Call before [`Self::reset_for_document`].
    pub fn set_measurer(&self, measurer: Box<dyn PageMeasurer>) {
        *self.lock_measurer() = Some(measurer);
    }

    /// Start over for a newly opened document with `item_count` items.
    ///
    /// Clears all state, bumps the document generation (cancelling any
    /// in-flight scan and invalidating unfinished escalations), and leaves
    /// the completion flag unset.
    pub fn reset_for_document(&self, item_count: i16) {
        let mut st = self.lock_state();
        st.pages.clear();
        st.known.clear();
        st.item_count = item_count;
        st.current_item = 0;
        st.completed = false;
        st.generation += 1;
        debug!(
            "index reset for document with {} items (generation {})",
            item_count, st.generation
        );
    }

    /// Unconditional reset to empty. Also cancels in-flight work.
    pub fn clear(&self) {
        self.reset_for_document(0);
    }

    /// Insert one page boundary and mark its item as known.
    ///
    /// This is the worker-facing write API; foreground code never inserts.
    pub fn insert(&self, key: PositionKey, info: PageInfo) {
        let mut st = self.lock_state();
        st.pages.insert(key, info);
        st.known.insert(key.item);
    }

    /// Signal that every item has been scanned. Assigns final page numbers
    /// in key order and unlocks aggregate queries.
    pub fn mark_complete(&self) {
        let mut st = self.lock_state();
        complete_locked(&mut st);
    }

    /// Exact-match lookup of a page boundary.
    pub fn lookup(&self, key: PositionKey) -> Option<PageInfo> {
        self.lock_state().pages.get(&key).copied()
    }

    /// The boundary of the page containing `key`, escalating if the item
    /// has not been measured yet. None if `key` is out of range.
    pub fn at(&self, key: PositionKey) -> Option<PositionKey> {
        self.ensure_item(key.item);
        containing(&self.lock_state(), key)
    }

    /// The boundary `count` pages after the page containing `key`.
    ///
    /// Escalates measurement of the containing item and of any unmeasured
    /// item the walk crosses, so page-forward navigation works ahead of the
    /// background scan. None when the document ends first or the data
    /// cannot be computed.
    pub fn next(&self, key: PositionKey, count: usize) -> Option<PositionKey> {
        self.ensure_item(key.item);
        let mut current = containing(&self.lock_state(), key)?;
        for _ in 0..count {
            current = self.step_next(current)?;
        }
        Some(current)
    }

    /// The boundary `count` pages before the page containing `key`.
    ///
    /// Mirror of [`Self::next`], escalating preceding items as needed.
    pub fn prev(&self, key: PositionKey, count: usize) -> Option<PositionKey> {
        self.ensure_item(key.item);
        let mut current = containing(&self.lock_state(), key)?;
        for _ in 0..count {
            current = self.step_prev(current)?;
        }
        Some(current)
    }

    /// The boundary immediately after `current`.
    ///
    /// The map successor is only trusted once every item between the two
    /// boundaries is known; a gap in the middle would otherwise be skipped
    /// silently. Gap items are measured (nearest first) until the successor
    /// is genuinely adjacent or the document ends.
    fn step_next(&self, current: PositionKey) -> Option<PositionKey> {
        use std::ops::Bound::{Excluded, Unbounded};
        loop {
            let gap = {
                let st = self.lock_state();
                let successor = st
                    .pages
                    .range((Excluded(current), Unbounded))
                    .next()
                    .map(|(k, _)| *k);
                let limit = successor.map_or(st.item_count, |k| k.item);
                match ((current.item + 1)..limit).find(|i| !st.known.contains(i)) {
                    None => return successor,
                    Some(item) => item,
                }
            };
            if !self.ensure_item(gap) {
                return None;
            }
        }
    }

    /// The boundary immediately before `current`. Mirror of
    /// [`Self::step_next`].
    fn step_prev(&self, current: PositionKey) -> Option<PositionKey> {
        loop {
            let gap = {
                let st = self.lock_state();
                let predecessor = st.pages.range(..current).next_back().map(|(k, _)| *k);
                let lower = predecessor.map_or(-1, |k| k.item);
                match ((lower + 1)..current.item).rev().find(|i| !st.known.contains(i)) {
                    None => return predecessor,
                    Some(item) => item,
                }
            };
            if !self.ensure_item(gap) {
                return None;
            }
        }
    }

    /// Total page count, or None until the scan has completed.
    ///
    /// Deliberately withheld before completion even when partial data
    /// exists; a partial figure would be an under-count.
    pub fn total_pages(&self) -> Option<usize> {
        let st = self.lock_state();
        st.completed.then(|| st.pages.len())
    }

    /// Final page number of the boundary at exactly `key`, or None until
    /// the scan has completed (or if `key` is not a boundary).
    pub fn page_number(&self, key: PositionKey) -> Option<i16> {
        let st = self.lock_state();
        if !st.completed {
            return None;
        }
        st.pages.get(&key).map(|info| info.page_number)
    }

    /// Whether the whole document has been scanned.
    pub fn is_complete(&self) -> bool {
        self.lock_state().completed
    }

    /// Number of items in the current document.
    pub fn item_count(&self) -> i16 {
        self.lock_state().item_count
    }

    /// Record the item the reader is currently positioned in. The table of
    /// contents consults this when back-filling entry offsets.
    pub fn set_current_item(&self, item: i16) {
        self.lock_state().current_item = item;
    }

    /// The item the reader is currently positioned in.
    pub fn current_item(&self) -> i16 {
        self.lock_state().current_item
    }

    /// Make sure `item` has been measured, measuring it synchronously and
    /// out of scan order if necessary. True once the item is known.
    ///
    /// The state lock is released around the measurement; the result is
    /// merged only if the document generation is unchanged, otherwise it
    /// belongs to a document that is no longer open and is dropped.
    fn ensure_item(&self, item: i16) -> bool {
        if item < 0 {
            return false;
        }
        let generation = {
            let st = self.lock_state();
            if item >= st.item_count {
                return false;
            }
            if st.known.contains(&item) {
                return true;
            }
            st.generation
        };

        let pages = {
            let mut guard = self.lock_measurer();
            let Some(measurer) = guard.as_mut() else {
                debug!("item {} unavailable: no measurer attached", item);
                return false;
            };
            match measurer.paginate(item) {
                Ok(pages) => pages,
                Err(e) => {
                    error!("pagination of item {} failed: {}", item, e);
                    return false;
                }
            }
        };

        let mut st = self.lock_state();
        if st.generation != generation {
            debug!("dropping stale pagination result for item {}", item);
            return false;
        }
        if !st.known.contains(&item) {
            apply_item(&mut st, item, &pages);
        }
        true
    }

    /// Body of the background scan; runs on the [`Scanner`] thread.
    ///
    /// Walks items in reading order, skipping any the escalation path got
    /// to first, and exits quietly as soon as the generation changes.
    fn run_scan(&self, events: Sender<ScanEvent>) {
        let generation = self.lock_state().generation;
        debug!("pagination scan started (generation {})", generation);
        loop {
            let next = {
                let st = self.lock_state();
                if st.generation != generation {
                    debug!("pagination scan cancelled by document switch");
                    return;
                }
                (0..st.item_count).find(|i| !st.known.contains(i))
            };
            let Some(item) = next else { break };

            let pages = {
                let mut guard = self.lock_measurer();
                let Some(measurer) = guard.as_mut() else {
                    warn!("pagination scan stopped: no measurer attached");
                    return;
                };
                match measurer.paginate(item) {
                    Ok(pages) => pages,
                    Err(e) => {
                        error!("pagination scan aborted at item {}: {}", item, e);
                        return;
                    }
                }
            };

            let mut st = self.lock_state();
            if st.generation != generation {
                debug!("pagination scan cancelled by document switch");
                return;
            }
            if !st.known.contains(&item) {
                let count = pages.len();
                apply_item(&mut st, item, &pages);
                drop(st);
                let _ = events.send(ScanEvent::Item { item, pages: count });
            }
        }

        let mut st = self.lock_state();
        if st.generation != generation {
            debug!("pagination scan cancelled before completion");
            return;
        }
        complete_locked(&mut st);
        let total = st.pages.len();
        drop(st);
        let _ = events.send(ScanEvent::Completed { total_pages: total });
        debug!("pagination scan completed: {} pages", total);
    }
}

fn apply_item(st: &mut IndexState, item: i16, pages: &[PageSlice]) {
    for slice in pages {
        st.pages.insert(
            PositionKey::new(item, slice.offset),
            PageInfo::sized(slice.size),
        );
    }
    st.known.insert(item);
}

fn complete_locked(st: &mut IndexState) {
    st.completed = true;
    for (number, info) in st.pages.values_mut().enumerate() {
        info.page_number = number as i16;
    }
}

/// The boundary of the page containing `key`: the greatest boundary at or
/// before `key` in the same item, provided `key` falls inside that page.
fn containing(st: &IndexState, key: PositionKey) -> Option<PositionKey> {
    let (boundary, info) = st.pages.range(..=key).next_back()?;
    (boundary.item == key.item && key.offset < boundary.offset + info.size).then(|| *boundary)
}

/// Background pagination scan over one document generation.
///
/// The thread ends on its own when the scan completes, when the measurer
/// fails, or when the document is switched (generation bump). Dropping the
/// scanner detaches the thread; it still exits via those paths.
pub struct Scanner {
    handle: Option<JoinHandle<()>>,
    events: Receiver<ScanEvent>,
}

impl Scanner {
    /// Spawn the scan thread over `index`'s current document.
    pub fn spawn(index: Arc<PageIndex>) -> Self {
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || index.run_scan(tx));
        Self {
            handle: Some(handle),
            events: rx,
        }
    }

    /// Progress events, ending with [`ScanEvent::Completed`] on a full scan.
    pub fn events(&self) -> &Receiver<ScanEvent> {
        &self.events
    }

    /// Wait for the scan thread to finish.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Weak;

    /// Measurer backed by a fixed table of page sizes per item.
    struct TableMeasurer {
        // sizes[item][page] = page size in bytes
        sizes: Vec<Vec<i32>>,
    }

    impl TableMeasurer {
        fn new(sizes: Vec<Vec<i32>>) -> Self {
            Self { sizes }
        }
    }

    impl PageMeasurer for TableMeasurer {
        fn paginate(&mut self, item: i16) -> Result<ItemPages, PaginateError> {
            let sizes = self
                .sizes
                .get(item as usize)
                .ok_or_else(|| PaginateError::Structure(format!("no item {}", item)))?;
            let mut pages = ItemPages::new();
            let mut offset = 0;
            for &size in sizes {
                pages.push(PageSlice::new(offset, size));
                offset += size;
            }
            Ok(pages)
        }
    }

    fn seeded_index() -> PageIndex {
        // Four boundaries in one item: (0,0), (0,50), (0,120), (0,200).
        let index = PageIndex::new();
        index.reset_for_document(1);
        index.insert(PositionKey::new(0, 0), PageInfo::sized(50));
        index.insert(PositionKey::new(0, 50), PageInfo::sized(70));
        index.insert(PositionKey::new(0, 120), PageInfo::sized(80));
        index.insert(PositionKey::new(0, 200), PageInfo::sized(40));
        index
    }

    #[test]
    fn lookup_returns_last_inserted_for_key() {
        let index = PageIndex::new();
        index.reset_for_document(2);
        let key = PositionKey::new(1, 10);
        index.insert(key, PageInfo::sized(100));
        index.insert(key, PageInfo::sized(250));
        assert_eq!(index.lookup(key), Some(PageInfo::sized(250)));
        assert_eq!(index.lookup(PositionKey::new(1, 11)), None);
    }

    #[test]
    fn next_follows_total_order() {
        let index = seeded_index();
        assert_eq!(
            index.next(PositionKey::new(0, 50), 2),
            Some(PositionKey::new(0, 200))
        );
        assert_eq!(
            index.next(PositionKey::new(0, 0), 1),
            Some(PositionKey::new(0, 50))
        );
        assert_eq!(
            index.next(PositionKey::new(0, 0), 0),
            Some(PositionKey::new(0, 0))
        );
        // Runs off the end of the document.
        assert_eq!(index.next(PositionKey::new(0, 200), 1), None);
    }

    #[test]
    fn prev_follows_total_order() {
        let index = seeded_index();
        assert_eq!(
            index.prev(PositionKey::new(0, 200), 2),
            Some(PositionKey::new(0, 50))
        );
        assert_eq!(
            index.prev(PositionKey::new(0, 50), 1),
            Some(PositionKey::new(0, 0))
        );
        assert_eq!(index.prev(PositionKey::new(0, 0), 1), None);
    }

    #[test]
    fn at_returns_containing_page() {
        let index = seeded_index();
        assert_eq!(
            index.at(PositionKey::new(0, 60)),
            Some(PositionKey::new(0, 50))
        );
        assert_eq!(
            index.at(PositionKey::new(0, 50)),
            Some(PositionKey::new(0, 50))
        );
        // Past the last page's end.
        assert_eq!(index.at(PositionKey::new(0, 240)), None);
    }

    #[test]
    fn aggregates_withheld_until_complete() {
        let index = seeded_index();
        assert_eq!(index.total_pages(), None);
        assert_eq!(index.page_number(PositionKey::new(0, 120)), None);

        index.mark_complete();
        assert_eq!(index.total_pages(), Some(4));
        assert_eq!(index.page_number(PositionKey::new(0, 0)), Some(0));
        assert_eq!(index.page_number(PositionKey::new(0, 120)), Some(2));
        assert_eq!(index.page_number(PositionKey::new(0, 130)), None);
    }

    #[test]
    fn renumbering_is_monotonic_across_out_of_order_inserts() {
        let index = PageIndex::new();
        index.reset_for_document(3);
        // Items arrive out of order, as escalation makes them.
        index.insert(PositionKey::new(2, 0), PageInfo::sized(10));
        index.insert(PositionKey::new(0, 0), PageInfo::sized(10));
        index.insert(PositionKey::new(1, 40), PageInfo::sized(10));
        index.insert(PositionKey::new(1, 0), PageInfo::sized(40));
        index.mark_complete();

        let numbers: Vec<i16> = [
            PositionKey::new(0, 0),
            PositionKey::new(1, 0),
            PositionKey::new(1, 40),
            PositionKey::new(2, 0),
        ]
        .iter()
        .map(|k| index.page_number(*k).unwrap())
        .collect();
        assert_eq!(numbers, vec![0, 1, 2, 3]);
    }

    #[test]
    fn escalation_fills_only_the_needed_item() {
        let index = PageIndex::new();
        index.set_measurer(Box::new(TableMeasurer::new(vec![
            vec![100, 100],
            vec![50, 50, 50],
            vec![200],
        ])));
        index.reset_for_document(3);

        // Query lands in item 1; items 0 and 2 stay unmeasured.
        assert_eq!(
            index.at(PositionKey::new(1, 75)),
            Some(PositionKey::new(1, 50))
        );
        assert_eq!(index.lookup(PositionKey::new(1, 100)), Some(PageInfo::sized(50)));
        assert_eq!(index.lookup(PositionKey::new(0, 0)), None);
        assert_eq!(index.lookup(PositionKey::new(2, 0)), None);
    }

    #[test]
    fn next_walks_into_unmeasured_item() {
        let index = PageIndex::new();
        index.set_measurer(Box::new(TableMeasurer::new(vec![
            vec![100],
            vec![50, 50],
        ])));
        index.reset_for_document(2);

        // From the only page of item 0, two pages forward is (1, 50).
        assert_eq!(
            index.next(PositionKey::new(0, 0), 2),
            Some(PositionKey::new(1, 50))
        );
    }

    #[test]
    fn prev_walks_into_unmeasured_item() {
        let index = PageIndex::new();
        index.set_measurer(Box::new(TableMeasurer::new(vec![
            vec![100, 100],
            vec![50],
        ])));
        index.reset_for_document(2);

        assert_eq!(
            index.prev(PositionKey::new(1, 0), 1),
            Some(PositionKey::new(0, 100))
        );
    }

    #[test]
    fn walk_measures_gap_items_instead_of_skipping() {
        let index = PageIndex::new();
        index.set_measurer(Box::new(TableMeasurer::new(vec![
            vec![100],
            vec![50, 50],
            vec![30],
        ])));
        index.reset_for_document(3);
        // The scan has covered items 0 and 2; item 1 is a gap.
        index.insert(PositionKey::new(0, 0), PageInfo::sized(100));
        index.insert(PositionKey::new(2, 0), PageInfo::sized(30));

        // One page forward from (0,0) is the first page of the gap item,
        // not the already-known page of item 2.
        assert_eq!(
            index.next(PositionKey::new(0, 0), 1),
            Some(PositionKey::new(1, 0))
        );
        assert_eq!(
            index.prev(PositionKey::new(2, 0), 1),
            Some(PositionKey::new(1, 50))
        );
        // Three pages forward spans the gap and lands on item 2.
        assert_eq!(
            index.next(PositionKey::new(0, 0), 3),
            Some(PositionKey::new(2, 0))
        );
    }

    #[test]
    fn queries_fail_soft_without_measurer() {
        let index = PageIndex::new();
        index.reset_for_document(2);
        assert_eq!(index.at(PositionKey::new(0, 0)), None);
        assert_eq!(index.next(PositionKey::new(0, 0), 1), None);
    }

    #[test]
    fn out_of_range_items_are_unavailable() {
        let index = PageIndex::new();
        index.set_measurer(Box::new(TableMeasurer::new(vec![vec![10]])));
        index.reset_for_document(1);
        assert_eq!(index.at(PositionKey::new(5, 0)), None);
        assert_eq!(index.at(PositionKey::new(-2, 0)), None);
    }

    /// Measurer that switches the document mid-measurement, as when the
    /// user opens another book while an escalation is in flight.
    struct SwitchingMeasurer {
        index: Weak<PageIndex>,
    }

    impl PageMeasurer for SwitchingMeasurer {
        fn paginate(&mut self, _item: i16) -> Result<ItemPages, PaginateError> {
            if let Some(index) = self.index.upgrade() {
                index.reset_for_document(7);
            }
            let mut pages = ItemPages::new();
            pages.push(PageSlice::new(0, 10));
            Ok(pages)
        }
    }

    #[test]
    fn stale_escalation_results_are_dropped() {
        let index = Arc::new(PageIndex::new());
        index.set_measurer(Box::new(SwitchingMeasurer {
            index: Arc::downgrade(&index),
        }));
        index.reset_for_document(3);

        // The measurement completes against a closed document; nothing of
        // it may be merged into the new one.
        assert_eq!(index.at(PositionKey::new(0, 0)), None);
        assert_eq!(index.lookup(PositionKey::new(0, 0)), None);
        assert_eq!(index.item_count(), 7);
    }

    #[test]
    fn current_item_roundtrips_and_resets() {
        let index = PageIndex::new();
        index.reset_for_document(4);
        index.set_current_item(3);
        assert_eq!(index.current_item(), 3);
        index.reset_for_document(2);
        assert_eq!(index.current_item(), 0);
    }
}
