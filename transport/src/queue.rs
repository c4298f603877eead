//! Ordered, lock-protected collection of retained frames, indexed by
//! `frame_id`.
//!
//! Used both for the send side's reliable-data queue and the receive side's
//! in-progress reassembly queue. Queue depths stay small in practice (one
//! retained I-frame plus a handful of in-flight reliable datagrams, or a
//! few frames mid-reassembly), so a linear scan for `find`/`remove` is the
//! right tradeoff against an indirection-heavy indexed structure.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::pool::Frame;

struct Inner {
    frames: VecDeque<Frame>,
}

/// A queue of retained [`Frame`] handles, keyed by `frame_id`.
pub struct FrameQueue {
    inner: Mutex<Inner>,
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameQueue {
    pub fn new() -> Self {
        FrameQueue {
            inner: Mutex::new(Inner {
                frames: VecDeque::new(),
            }),
        }
    }

    /// Retains `frame` and appends it to the tail of the queue.
    pub fn push(&self, frame: Frame) {
        self.inner.lock().unwrap().frames.push_back(frame);
    }

    /// Detaches and returns the frame at the head of the queue, if any.
    /// Does not touch the frame's refcount — ownership simply transfers to
    /// the caller.
    pub fn pop(&self) -> Option<Frame> {
        self.inner.lock().unwrap().frames.pop_front()
    }

    /// Returns a clone of the frame with the given `frame_id`, if present.
    pub fn find(&self, frame_id: u16) -> Option<Frame> {
        self.inner
            .lock()
            .unwrap()
            .frames
            .iter()
            .find(|f| f.frame_id() == frame_id)
            .cloned()
    }

    /// Detaches the frame with `frame_id` from the queue and releases the
    /// queue's retained handle on it (the caller's own handles, if any,
    /// keep the buffer alive until they too are dropped).
    pub fn remove(&self, frame_id: u16) -> Option<Frame> {
        let mut inner = self.inner.lock().unwrap();
        let pos = inner.frames.iter().position(|f| f.frame_id() == frame_id)?;
        inner.frames.remove(pos)
    }

    /// Releases every frame older than `max_age_ms` as of `now_ms`, judged
    /// by each frame's `last_receive_time_ms` (or `send_time_ms` for
    /// send-side queues, whichever the queue's role uses). Returns how many
    /// were swept.
    pub fn sweep(&self, now_ms: u64, max_age_ms: u64, age_of: impl Fn(&Frame) -> u64) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.frames.len();
        inner
            .frames
            .retain(|f| now_ms.saturating_sub(age_of(f)) < max_age_ms);
        before - inner.frames.len()
    }

    /// Keeps only the frames for which `keep` returns `true`, releasing the
    /// rest. `keep` may perform side effects (such as re-sending a
    /// fragment) before returning its verdict.
    pub fn retain(&self, keep: impl FnMut(&Frame) -> bool) {
        self.inner.lock().unwrap().frames.retain(keep);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drains and releases every frame in the queue, for shutdown.
    pub fn drain(&self) -> Vec<Frame> {
        self.inner.lock().unwrap().frames.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{FramePool, SizeClass};

    #[test]
    fn push_pop_preserves_order() {
        let pool = FramePool::new();
        let queue = FrameQueue::new();
        let a = pool.acquire(SizeClass::Control);
        a.set_frame_id(1);
        let b = pool.acquire(SizeClass::Control);
        b.set_frame_id(2);
        queue.push(a);
        queue.push(b);
        assert_eq!(queue.pop().unwrap().frame_id(), 1);
        assert_eq!(queue.pop().unwrap().frame_id(), 2);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn find_and_remove_by_frame_id() {
        let pool = FramePool::new();
        let queue = FrameQueue::new();
        let a = pool.acquire(SizeClass::Control);
        a.set_frame_id(5);
        queue.push(a);
        assert!(queue.find(5).is_some());
        assert!(queue.find(6).is_none());
        let removed = queue.remove(5).unwrap();
        assert_eq!(removed.frame_id(), 5);
        assert!(queue.find(5).is_none());
    }

    #[test]
    fn sweep_drops_stale_frames_only() {
        let pool = FramePool::new();
        let queue = FrameQueue::new();
        let fresh = pool.acquire(SizeClass::Control);
        fresh.set_frame_id(1);
        fresh.set_last_receive_time_ms(1_000);
        let stale = pool.acquire(SizeClass::Control);
        stale.set_frame_id(2);
        stale.set_last_receive_time_ms(0);
        queue.push(fresh);
        queue.push(stale);

        let swept = queue.sweep(1_000, 100, |f| f.last_receive_time_ms());
        assert_eq!(swept, 1);
        assert_eq!(queue.len(), 1);
        assert!(queue.find(1).is_some());
    }
}
