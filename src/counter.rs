//! Sharded counter storage for loop-thread metrics.
//!
//! Each event loop writes to its own shard (assigned via
//! [`set_loop_shard`] when the loop thread starts), so counters bumped on
//! every task execution never bounce cache lines between loops. The
//! [`Counter`] type references one slot of a [`CounterGroup`] and
//! implements [`metriken::Metric`] for exposition.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

const CACHE_LINE: usize = 64;
const SLOTS: usize = CACHE_LINE / 8; // 8 counters per cache line
const NUM_SHARDS: usize = 32;

thread_local! {
    /// Shard assigned to this thread. Threads that never called
    /// [`set_loop_shard`] (external submitters) fall back to shard 0.
    static SHARD_ID: Cell<usize> = const { Cell::new(0) };
}

/// Assign a metrics shard to the current thread.
///
/// Called once per loop thread at startup with the loop's index so each
/// loop owns a distinct shard.
pub fn set_loop_shard(id: usize) {
    SHARD_ID.set(id % NUM_SHARDS);
}

#[repr(C, align(64))]
struct Shard {
    slots: [AtomicU64; SLOTS],
}

/// Sharded storage for up to 8 counters.
pub struct CounterGroup {
    shards: [Shard; NUM_SHARDS],
}

impl CounterGroup {
    /// Create a new counter group with all slots zeroed.
    #[allow(clippy::declare_interior_mutable_const)]
    pub const fn new() -> Self {
        const ZERO: AtomicU64 = AtomicU64::new(0);
        const SHARD: Shard = Shard {
            slots: [ZERO; SLOTS],
        };
        Self {
            shards: [SHARD; NUM_SHARDS],
        }
    }

    #[inline]
    fn add(&self, slot: usize, value: u64) {
        debug_assert!(slot < SLOTS, "slot index out of bounds");
        let shard = SHARD_ID.get();
        self.shards[shard].slots[slot].fetch_add(value, Ordering::Relaxed);
    }

    fn value(&self, slot: usize) -> u64 {
        debug_assert!(slot < SLOTS, "slot index out of bounds");
        self.shards
            .iter()
            .map(|s| s.slots[slot].load(Ordering::Relaxed))
            .sum()
    }
}

impl Default for CounterGroup {
    fn default() -> Self {
        Self::new()
    }
}

/// A sharded counter referencing one slot of a [`CounterGroup`].
pub struct Counter {
    group: &'static CounterGroup,
    slot: usize,
}

impl Counter {
    /// Create a counter backed by a slot in the given group.
    pub const fn new(group: &'static CounterGroup, slot: usize) -> Self {
        Self { group, slot }
    }

    /// Increment the counter by 1.
    #[inline]
    pub fn increment(&self) {
        self.group.add(self.slot, 1);
    }

    /// Add a value to the counter.
    #[inline]
    pub fn add(&self, value: u64) {
        self.group.add(self.slot, value);
    }

    /// Current value, aggregated across all shards.
    pub fn value(&self) -> u64 {
        self.group.value(self.slot)
    }
}

impl metriken::Metric for Counter {
    fn as_any(&self) -> Option<&dyn std::any::Any> {
        Some(self)
    }

    fn value(&self) -> Option<metriken::Value<'_>> {
        Some(metriken::Value::Counter(Counter::value(self)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increment_and_add() {
        static GROUP: CounterGroup = CounterGroup::new();
        let counter = Counter::new(&GROUP, 0);

        assert_eq!(counter.value(), 0);
        counter.increment();
        counter.add(4);
        assert_eq!(counter.value(), 5);
    }

    #[test]
    fn slots_are_independent() {
        static GROUP: CounterGroup = CounterGroup::new();
        let a = Counter::new(&GROUP, 1);
        let b = Counter::new(&GROUP, 2);

        a.increment();
        b.add(7);
        assert_eq!(a.value(), 1);
        assert_eq!(b.value(), 7);
    }

    #[test]
    fn aggregates_across_shards() {
        use std::sync::Arc;
        use std::thread;

        static GROUP: CounterGroup = CounterGroup::new();
        let counter = Arc::new(Counter::new(&GROUP, 3));

        let handles: Vec<_> = (0..4)
            .map(|shard| {
                let c = Arc::clone(&counter);
                thread::spawn(move || {
                    set_loop_shard(shard);
                    for _ in 0..100 {
                        c.increment();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(counter.value(), 400);
    }
}
