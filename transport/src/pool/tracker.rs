//! Fragment-tracker slab pool.
//!
//! Trackers record per-fragment retransmission bookkeeping for an in-flight
//! I-frame (send side) or an in-progress reassembly (receive side). They
//! come from one of five fixed capacity classes so the pool never needs to
//! resize an individual tracker's slot array.

use std::sync::Mutex;

use crate::error::{Error, Result};

/// Capacity classes a tracker can be allocated from, smallest first.
pub const CLASSES: [usize; 5] = [1, 32, 128, 256, 512];

/// Per-fragment bookkeeping slot.
#[derive(Debug, Clone, Copy, Default)]
pub struct Slot {
    pub frag_index: u16,
    pub last_send_seq: u32,
    pub last_send_time_ms: u64,
    pub retransmission_count: u32,
    pub acknowledged: bool,
}

/// A slab of per-fragment slots sized to the smallest class that fits the
/// requested fragment count.
pub struct Tracker {
    class: usize,
    slots: Vec<Slot>,
}

impl Tracker {
    fn new(class: usize, len: usize) -> Self {
        let mut slots = vec![Slot::default(); len];
        for (i, slot) in slots.iter_mut().enumerate() {
            slot.frag_index = i as u16;
        }
        Tracker { class, slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index)
    }

    pub fn slot_mut(&mut self, index: usize) -> Option<&mut Slot> {
        self.slots.get_mut(index)
    }

    pub fn all_acknowledged(&self) -> bool {
        self.slots.iter().all(|s| s.acknowledged)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Slot> {
        self.slots.iter_mut()
    }

    fn reset(&mut self) {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            *slot = Slot {
                frag_index: i as u16,
                ..Slot::default()
            };
        }
    }
}

/// Pool of [`Tracker`] slabs, one free list per capacity class.
pub struct TrackerPool {
    free: [Mutex<Vec<Tracker>>; CLASSES.len()],
}

impl Default for TrackerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackerPool {
    pub fn new() -> Self {
        TrackerPool {
            free: Default::default(),
        }
    }

    /// Acquires a tracker with at least `n` fragment slots. Fails with
    /// [`Error::PacketTooLarge`] when `n` exceeds the largest class.
    pub fn acquire(&self, n: usize) -> Result<Tracker> {
        let (class_index, class_size) = CLASSES
            .iter()
            .enumerate()
            .find(|(_, &c)| c >= n)
            .ok_or(Error::PacketTooLarge)?;
        let mut tracker = {
            let mut free = self.free[class_index].lock().unwrap();
            free.pop()
        }
        .unwrap_or_else(|| Tracker::new(*class_size, *class_size));
        tracker.reset();
        tracker.slots.truncate(n);
        if tracker.slots.len() < n {
            tracker.slots.resize_with(n, Slot::default);
            for (i, slot) in tracker.slots.iter_mut().enumerate() {
                slot.frag_index = i as u16;
            }
        }
        Ok(tracker)
    }

    /// Returns `tracker` to its class's free list for reuse.
    pub fn release(&self, mut tracker: Tracker) {
        let class_index = CLASSES
            .iter()
            .position(|&c| c == tracker.class)
            .unwrap_or(CLASSES.len() - 1);
        tracker.slots.resize_with(CLASSES[class_index], Slot::default);
        self.free[class_index].lock().unwrap().push(tracker);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_picks_smallest_sufficient_class() {
        let pool = TrackerPool::new();
        let tracker = pool.acquire(4).unwrap();
        assert_eq!(tracker.len(), 4);
    }

    #[test]
    fn acquire_rejects_oversized_request() {
        let pool = TrackerPool::new();
        assert_eq!(pool.acquire(513).unwrap_err(), Error::PacketTooLarge);
    }

    #[test]
    fn slots_start_unacknowledged_and_unreceived() {
        let pool = TrackerPool::new();
        let tracker = pool.acquire(3).unwrap();
        assert!(!tracker.all_acknowledged());
        for i in 0..3 {
            assert_eq!(tracker.slot(i).unwrap().retransmission_count, 0);
        }
    }

    #[test]
    fn release_and_reacquire_reuses_slab() {
        let pool = TrackerPool::new();
        let mut tracker = pool.acquire(10).unwrap();
        tracker.slot_mut(0).unwrap().acknowledged = true;
        pool.release(tracker);
        let reacquired = pool.acquire(10).unwrap();
        assert!(!reacquired.slot(0).unwrap().acknowledged);
    }
}
