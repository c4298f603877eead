//! Endpoint statistics, updated under their own lock so a stats read never
//! competes with the queue/pool locks above it in the lock order.

use std::sync::Mutex;

/// Snapshot of an endpoint's lifetime counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub retransmitted_packets: u64,
    pub dropped_checksum: u64,
    pub dropped_invalid: u64,
    pub dropped_no_memory: u64,
    pub lost_packets: u64,
    pub dup_packets: u64,
    pub incomplete_frames: u64,
}

#[derive(Default)]
struct Counters(StatsSnapshot);

/// Thread-safe holder for an endpoint's [`StatsSnapshot`].
#[derive(Default)]
pub struct Stats {
    inner: Mutex<Counters>,
}

macro_rules! counter_method {
    ($name:ident) => {
        pub fn $name(&self) {
            self.inner.lock().unwrap().0.$name += 1;
        }
    };
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    counter_method!(packets_sent);
    counter_method!(packets_received);
    counter_method!(retransmitted_packets);
    counter_method!(dropped_checksum);
    counter_method!(dropped_invalid);
    counter_method!(dropped_no_memory);
    counter_method!(dup_packets);
    counter_method!(incomplete_frames);

    pub fn add_lost_packets(&self, n: u64) {
        self.inner.lock().unwrap().0.lost_packets += n;
    }

    pub fn add_incomplete_frames(&self, n: u64) {
        self.inner.lock().unwrap().0.incomplete_frames += n;
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.inner.lock().unwrap().0
    }
}
