use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

use garble_types::{InstrNumber, PhysSlot, VirtPageNumber};

/// An entry extracted from the index: the resident page whose next use is
/// farthest in the future.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// The page's next-use instruction number (or a sentinel).
    pub next_use: InstrNumber,
    /// The slot the page occupies.
    pub slot: PhysSlot,
    /// The page itself.
    pub page: VirtPageNumber,
}

/// Ordered next-use index over the resident pages.
///
/// An ordered map keyed by `(next_use, Reverse(slot))` provides
/// extract-max with deterministic smallest-slot tie-breaking; a parallel
/// map from slot to its current key locates entries for update and
/// removal in logarithmic time. Every resident page has exactly one
/// entry, and its key always equals the page's current next-use
/// annotation.
#[derive(Debug, Default)]
pub struct NextUseIndex {
    order: BTreeMap<(InstrNumber, Reverse<PhysSlot>), VirtPageNumber>,
    key_by_slot: HashMap<PhysSlot, InstrNumber>,
}

impl NextUseIndex {
    /// An empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of indexed pages.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Add an entry for `page` resident in `slot`. The slot must not
    /// already be indexed.
    pub fn insert(&mut self, slot: PhysSlot, page: VirtPageNumber, next_use: InstrNumber) {
        let previous = self.key_by_slot.insert(slot, next_use);
        debug_assert!(previous.is_none(), "slot {slot} indexed twice");
        self.order.insert((next_use, Reverse(slot)), page);
    }

    /// Replace the next-use key of the entry for `slot`.
    pub fn update(&mut self, slot: PhysSlot, page: VirtPageNumber, next_use: InstrNumber) {
        if let Some(old_key) = self.key_by_slot.insert(slot, next_use) {
            self.order.remove(&(old_key, Reverse(slot)));
        }
        self.order.insert((next_use, Reverse(slot)), page);
    }

    /// Remove the entry for `slot`, if one exists.
    pub fn remove(&mut self, slot: PhysSlot) -> Option<IndexEntry> {
        let next_use = self.key_by_slot.remove(&slot)?;
        let page = self.order.remove(&(next_use, Reverse(slot)))?;
        Some(IndexEntry {
            next_use,
            slot,
            page,
        })
    }

    /// Extract the entry with the largest next-use key, ties broken by
    /// the smaller slot.
    pub fn pop_max(&mut self) -> Option<IndexEntry> {
        let (&(next_use, Reverse(slot)), &page) = self.order.iter().next_back()?;
        self.order.remove(&(next_use, Reverse(slot)));
        self.key_by_slot.remove(&slot);
        Some(IndexEntry {
            next_use,
            slot,
            page,
        })
    }

    /// Put back an entry previously extracted with [`NextUseIndex::pop_max`].
    pub fn restore(&mut self, entry: IndexEntry) {
        self.insert(entry.slot, entry.page, entry.next_use);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use garble_types::{LIVE_OUTPUT, NEVER};

    #[test]
    fn pop_max_orders_by_next_use() {
        let mut index = NextUseIndex::new();
        index.insert(0, 100, 7);
        index.insert(1, 101, 3);
        index.insert(2, 102, 12);

        assert_eq!(index.pop_max().unwrap().page, 102);
        assert_eq!(index.pop_max().unwrap().page, 100);
        assert_eq!(index.pop_max().unwrap().page, 101);
        assert!(index.pop_max().is_none());
    }

    #[test]
    fn never_outranks_live_output() {
        let mut index = NextUseIndex::new();
        index.insert(0, 100, LIVE_OUTPUT);
        index.insert(1, 101, NEVER);

        let first = index.pop_max().unwrap();
        assert_eq!(first.page, 101);
        assert_eq!(first.next_use, NEVER);
        assert_eq!(index.pop_max().unwrap().next_use, LIVE_OUTPUT);
    }

    #[test]
    fn ties_break_deterministically_by_smallest_slot() {
        let mut index = NextUseIndex::new();
        index.insert(2, 102, 5);
        index.insert(0, 100, 5);
        index.insert(1, 101, 5);

        assert_eq!(index.pop_max().unwrap().slot, 0);
        assert_eq!(index.pop_max().unwrap().slot, 1);
        assert_eq!(index.pop_max().unwrap().slot, 2);
    }

    #[test]
    fn update_moves_an_entry() {
        let mut index = NextUseIndex::new();
        index.insert(0, 100, 2);
        index.insert(1, 101, 9);

        index.update(1, 101, 1);
        assert_eq!(index.pop_max().unwrap().page, 100);
        assert_eq!(index.pop_max().unwrap().page, 101);
    }

    #[test]
    fn remove_by_slot() {
        let mut index = NextUseIndex::new();
        index.insert(0, 100, 2);
        index.insert(1, 101, 9);

        let removed = index.remove(1).unwrap();
        assert_eq!(removed.page, 101);
        assert_eq!(removed.next_use, 9);
        assert!(index.remove(1).is_none());
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn restore_after_pop() {
        let mut index = NextUseIndex::new();
        index.insert(0, 100, 2);
        index.insert(1, 101, 9);

        let top = index.pop_max().unwrap();
        index.restore(top);
        assert_eq!(index.len(), 2);
        assert_eq!(index.pop_max().unwrap().page, 101);
    }
}
