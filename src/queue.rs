//! Intrusive array-backed binary heap for scheduled tasks.
//!
//! Every entry records its own position in the heap, which makes removing
//! an arbitrary element (a cancelled scheduled task) O(log n) instead of a
//! linear scan. Not thread-safe by contract: the owning event loop
//! serializes all access to its own queue.

use crate::error::Error;

/// Sentinel index meaning "not currently in any queue".
pub(crate) const NOT_IN_QUEUE: usize = usize::MAX;

/// Capacity at which growth switches from doubling to 50% increments.
const HALVING_THRESHOLD: usize = 64;

/// An element that carries its own heap position.
///
/// `heap_index` must return the value of the last `set_heap_index` call,
/// and [`NOT_IN_QUEUE`] when the entry has never been offered or was
/// removed. `precedes` is the strict ordering used to maintain the heap.
pub(crate) trait HeapEntry: Clone {
    fn heap_index(&self) -> usize;
    fn set_heap_index(&self, idx: usize);
    fn precedes(&self, other: &Self) -> bool;
    /// Identity comparison; used to verify a recorded index still refers
    /// to this entry before removing it.
    fn same(&self, other: &Self) -> bool;
}

/// Min-heap of intrusive entries.
pub(crate) struct PriorityQueue<T: HeapEntry> {
    items: Vec<T>,
}

impl<T: HeapEntry> PriorityQueue<T> {
    pub(crate) fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Insert an entry. Rejects entries that are already in a queue.
    pub(crate) fn offer(&mut self, entry: T) -> Result<(), Error> {
        if entry.heap_index() != NOT_IN_QUEUE {
            return Err(Error::IllegalState("entry is already in a queue"));
        }
        self.grow_if_full();
        let idx = self.items.len();
        entry.set_heap_index(idx);
        self.items.push(entry);
        self.sift_up(idx);
        Ok(())
    }

    /// The minimum entry, without removing it.
    pub(crate) fn peek(&self) -> Option<&T> {
        self.items.first()
    }

    /// Remove and return the minimum entry.
    pub(crate) fn poll(&mut self) -> Option<T> {
        if self.items.is_empty() {
            return None;
        }
        let last = self.items.len() - 1;
        self.items.swap(0, last);
        let min = self.items.pop().expect("non-empty");
        min.set_heap_index(NOT_IN_QUEUE);
        if !self.items.is_empty() {
            self.items[0].set_heap_index(0);
            self.sift_down(0);
        }
        Some(min)
    }

    /// Remove an arbitrary entry by its recorded index.
    ///
    /// Returns false if the entry is not in this queue.
    pub(crate) fn remove(&mut self, entry: &T) -> bool {
        let idx = entry.heap_index();
        if idx == NOT_IN_QUEUE || idx >= self.items.len() || !self.items[idx].same(entry) {
            return false;
        }
        entry.set_heap_index(NOT_IN_QUEUE);
        let last = self.items.len() - 1;
        if idx == last {
            self.items.pop();
            return true;
        }
        self.items.swap(idx, last);
        self.items.pop();
        let moved = self.items[idx].clone();
        moved.set_heap_index(idx);
        // The replacement came from the bottom; it may need to move either way.
        self.sift_down(idx);
        if moved.heap_index() == idx {
            self.sift_up(idx);
        }
        true
    }

    /// Restore heap order locally around an entry whose sort key changed,
    /// without a full rebuild. No runtime caller yet; exercised by the
    /// unit tests below.
    #[cfg_attr(not(test), allow(dead_code))]
    pub(crate) fn change_priority(&mut self, entry: &T) {
        let idx = entry.heap_index();
        if idx == NOT_IN_QUEUE || idx >= self.items.len() || !self.items[idx].same(entry) {
            return;
        }
        self.sift_up(idx);
        self.sift_down(entry.heap_index());
    }

    /// Remove every entry, returning them in arbitrary order.
    pub(crate) fn drain(&mut self) -> Vec<T> {
        for item in &self.items {
            item.set_heap_index(NOT_IN_QUEUE);
        }
        std::mem::take(&mut self.items)
    }

    /// Doubling growth below [`HALVING_THRESHOLD`], 50% beyond it.
    fn grow_if_full(&mut self) {
        let cap = self.items.capacity();
        if self.items.len() < cap {
            return;
        }
        let additional = if cap == 0 {
            8
        } else if cap < HALVING_THRESHOLD {
            cap
        } else {
            cap / 2
        };
        self.items.reserve_exact(additional);
    }

    fn sift_up(&mut self, mut idx: usize) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if !self.items[idx].precedes(&self.items[parent]) {
                break;
            }
            self.swap_entries(idx, parent);
            idx = parent;
        }
    }

    fn sift_down(&mut self, mut idx: usize) {
        let len = self.items.len();
        loop {
            let left = 2 * idx + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let mut smallest = left;
            if right < len && self.items[right].precedes(&self.items[left]) {
                smallest = right;
            }
            if !self.items[smallest].precedes(&self.items[idx]) {
                break;
            }
            self.swap_entries(idx, smallest);
            idx = smallest;
        }
    }

    fn swap_entries(&mut self, a: usize, b: usize) {
        self.items.swap(a, b);
        self.items[a].set_heap_index(a);
        self.items[b].set_heap_index(b);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone)]
    struct Entry {
        key: u64,
        seq: u64,
        index: Arc<AtomicUsize>,
    }

    impl Entry {
        fn new(key: u64, seq: u64) -> Self {
            Entry {
                key,
                seq,
                index: Arc::new(AtomicUsize::new(NOT_IN_QUEUE)),
            }
        }
    }

    impl HeapEntry for Entry {
        fn heap_index(&self) -> usize {
            self.index.load(Ordering::Relaxed)
        }
        fn set_heap_index(&self, idx: usize) {
            self.index.store(idx, Ordering::Relaxed);
        }
        fn precedes(&self, other: &Self) -> bool {
            (self.key, self.seq) < (other.key, other.seq)
        }
        fn same(&self, other: &Self) -> bool {
            Arc::ptr_eq(&self.index, &other.index)
        }
    }

    fn check_heap_order(q: &PriorityQueue<Entry>) {
        for idx in 1..q.items.len() {
            let parent = (idx - 1) / 2;
            assert!(
                !q.items[idx].precedes(&q.items[parent]),
                "heap order violated at {idx}"
            );
            assert_eq!(q.items[idx].heap_index(), idx);
        }
    }

    #[test]
    fn polls_in_key_order() {
        let mut q = PriorityQueue::new();
        for (i, key) in [5u64, 1, 9, 3, 7, 2].iter().enumerate() {
            q.offer(Entry::new(*key, i as u64)).unwrap();
        }
        let mut keys = Vec::new();
        while let Some(e) = q.poll() {
            keys.push(e.key);
        }
        assert_eq!(keys, vec![1, 2, 3, 5, 7, 9]);
    }

    #[test]
    fn equal_keys_fifo_by_sequence() {
        let mut q = PriorityQueue::new();
        for seq in 0..8u64 {
            q.offer(Entry::new(42, seq)).unwrap();
        }
        let mut seqs = Vec::new();
        while let Some(e) = q.poll() {
            seqs.push(e.seq);
        }
        assert_eq!(seqs, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn double_offer_rejected() {
        let mut q = PriorityQueue::new();
        let e = Entry::new(1, 0);
        q.offer(e.clone()).unwrap();
        assert!(q.offer(e).is_err());
    }

    #[test]
    fn remove_arbitrary_restores_heap_order() {
        let mut q = PriorityQueue::new();
        let entries: Vec<_> = (0..32u64).map(|k| Entry::new(k * 31 % 17, k)).collect();
        for e in &entries {
            q.offer(e.clone()).unwrap();
        }

        let victim = &entries[13];
        let before = q.len();
        assert!(q.remove(victim));
        assert_eq!(q.len(), before - 1);
        assert_eq!(victim.heap_index(), NOT_IN_QUEUE);
        check_heap_order(&q);

        // Removing again is a no-op.
        assert!(!q.remove(victim));
    }

    #[test]
    fn poll_clears_index() {
        let mut q = PriorityQueue::new();
        let e = Entry::new(3, 0);
        q.offer(e.clone()).unwrap();
        let polled = q.poll().unwrap();
        assert_eq!(polled.heap_index(), NOT_IN_QUEUE);
        assert_eq!(e.heap_index(), NOT_IN_QUEUE);
        assert!(q.is_empty());
    }

    #[test]
    fn change_priority_resorts_entry() {
        let mut q = PriorityQueue::new();
        let entries: Vec<_> = (1..=8u64).map(|k| Entry::new(k * 10, k)).collect();
        for e in &entries {
            q.offer(e.clone()).unwrap();
        }

        // Mutate the largest entry's key in place, then re-validate order.
        let idx = entries[7].heap_index();
        q.items[idx].key = 0;
        let updated = q.items[idx].clone();
        q.change_priority(&updated);
        check_heap_order(&q);
        assert_eq!(q.poll().unwrap().seq, 8);
    }

    #[test]
    fn drain_empties_and_resets_indices() {
        let mut q = PriorityQueue::new();
        let entries: Vec<_> = (0..5u64).map(|k| Entry::new(k, k)).collect();
        for e in &entries {
            q.offer(e.clone()).unwrap();
        }
        let drained = q.drain();
        assert_eq!(drained.len(), 5);
        assert!(q.is_empty());
        for e in &entries {
            assert_eq!(e.heap_index(), NOT_IN_QUEUE);
        }
    }
}
