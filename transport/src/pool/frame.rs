//! Ref-counted frame buffers, pooled in two size classes.
//!
//! A [`Frame`] is an owning handle backed by `Arc`: cloning it is the
//! "retain" operation described by the frame lifecycle, and dropping the
//! last handle is "release" — the backing buffer is reset and returned to
//! its pool's free list automatically, with no manual refcounting required
//! of callers.

use std::sync::{Arc, Mutex, Weak};

use crate::error::{Error, Result};
use crate::pool::tracker::Tracker;
use crate::wire::FrameType;

/// Size class a [`Frame`] was allocated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeClass {
    Media,
    Control,
}

impl SizeClass {
    pub const fn capacity(self) -> usize {
        match self {
            SizeClass::Media => 512 * 1024,
            SizeClass::Control => 128,
        }
    }
}

/// Lifecycle of a frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Free,
    Receiving,
    Complete,
    Sending,
}

pub(crate) struct FrameBuf {
    pub data: Vec<u8>,
    pub len: usize,
    pub frame_id: u16,
    pub frame_type: FrameType,
    pub state: FrameState,
    pub total_frags: u16,
    pub recv_frags: u16,
    pub tracker: Option<Tracker>,
    pub first_receive_time_ms: u64,
    pub last_receive_time_ms: u64,
    pub send_time_ms: u64,
    pub retransmission_count: u32,
}

impl FrameBuf {
    fn new(capacity: usize) -> Self {
        FrameBuf {
            data: vec![0u8; capacity],
            len: 0,
            frame_id: 0,
            frame_type: FrameType::I,
            state: FrameState::Free,
            total_frags: 0,
            recv_frags: 0,
            tracker: None,
            retransmission_count: 0,
            first_receive_time_ms: 0,
            last_receive_time_ms: 0,
            send_time_ms: 0,
        }
    }

    fn reset(&mut self) {
        self.len = 0;
        self.frame_id = 0;
        self.state = FrameState::Free;
        self.total_frags = 0;
        self.recv_frags = 0;
        self.tracker = None;
        self.first_receive_time_ms = 0;
        self.last_receive_time_ms = 0;
        self.send_time_ms = 0;
        self.retransmission_count = 0;
    }
}

struct FrameInner {
    class: SizeClass,
    pool: Weak<FramePoolShared>,
    buf: Mutex<FrameBuf>,
}

impl Drop for FrameInner {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            let buf = self.buf.get_mut().unwrap();
            buf.reset();
            let owned = std::mem::replace(buf, FrameBuf::new(0));
            pool.reclaim(self.class, owned);
        }
    }
}

/// An owning, clonable handle to a pooled frame buffer.
#[derive(Clone)]
pub struct Frame(Arc<FrameInner>);

impl Frame {
    pub fn size_class(&self) -> SizeClass {
        self.0.class
    }

    pub fn capacity(&self) -> usize {
        self.0.class.capacity()
    }

    pub fn frame_id(&self) -> u16 {
        self.0.buf.lock().unwrap().frame_id
    }

    pub fn set_frame_id(&self, id: u16) {
        self.0.buf.lock().unwrap().frame_id = id;
    }

    pub fn frame_type(&self) -> FrameType {
        self.0.buf.lock().unwrap().frame_type
    }

    pub fn set_frame_type(&self, ty: FrameType) {
        self.0.buf.lock().unwrap().frame_type = ty;
    }

    pub fn state(&self) -> FrameState {
        self.0.buf.lock().unwrap().state
    }

    pub fn set_state(&self, state: FrameState) {
        self.0.buf.lock().unwrap().state = state;
    }

    pub fn len(&self) -> usize {
        self.0.buf.lock().unwrap().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies `payload` into the frame buffer starting at `offset`.
    pub fn write_at(&self, offset: usize, payload: &[u8]) -> Result<()> {
        let mut buf = self.0.buf.lock().unwrap();
        let end = offset.checked_add(payload.len()).ok_or(Error::Overflow)?;
        if end > buf.data.len() {
            return Err(Error::FrameInvalid);
        }
        buf.data[offset..end].copy_from_slice(payload);
        if end > buf.len {
            buf.len = end;
        }
        Ok(())
    }

    /// Reads back a copy of the frame's current payload bytes.
    pub fn to_vec(&self) -> Vec<u8> {
        let buf = self.0.buf.lock().unwrap();
        buf.data[..buf.len].to_vec()
    }

    pub fn with_payload<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let buf = self.0.buf.lock().unwrap();
        f(&buf.data[..buf.len])
    }

    pub fn set_total_frags(&self, total: u16) {
        self.0.buf.lock().unwrap().total_frags = total;
    }

    pub fn total_frags(&self) -> u16 {
        self.0.buf.lock().unwrap().total_frags
    }

    pub fn recv_frags(&self) -> u16 {
        self.0.buf.lock().unwrap().recv_frags
    }

    pub fn increment_recv_frags(&self) -> u16 {
        let mut buf = self.0.buf.lock().unwrap();
        buf.recv_frags += 1;
        buf.recv_frags
    }

    pub fn install_tracker(&self, tracker: Tracker) {
        self.0.buf.lock().unwrap().tracker = Some(tracker);
    }

    pub fn with_tracker<R>(&self, f: impl FnOnce(Option<&mut Tracker>) -> R) -> R {
        let mut buf = self.0.buf.lock().unwrap();
        f(buf.tracker.as_mut())
    }

    pub fn take_tracker(&self) -> Option<Tracker> {
        self.0.buf.lock().unwrap().tracker.take()
    }

    pub fn set_send_time_ms(&self, t: u64) {
        self.0.buf.lock().unwrap().send_time_ms = t;
    }

    pub fn send_time_ms(&self) -> u64 {
        self.0.buf.lock().unwrap().send_time_ms
    }

    pub fn retransmission_count(&self) -> u32 {
        self.0.buf.lock().unwrap().retransmission_count
    }

    pub fn increment_retransmission_count(&self) -> u32 {
        let mut buf = self.0.buf.lock().unwrap();
        buf.retransmission_count += 1;
        buf.retransmission_count
    }

    pub fn set_first_receive_time_ms(&self, t: u64) {
        self.0.buf.lock().unwrap().first_receive_time_ms = t;
    }

    pub fn first_receive_time_ms(&self) -> u64 {
        self.0.buf.lock().unwrap().first_receive_time_ms
    }

    pub fn set_last_receive_time_ms(&self, t: u64) {
        self.0.buf.lock().unwrap().last_receive_time_ms = t;
    }

    pub fn last_receive_time_ms(&self) -> u64 {
        self.0.buf.lock().unwrap().last_receive_time_ms
    }

    /// Strong-reference count: how many outstanding handles share this
    /// buffer, including this one.
    pub fn refcount(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

struct FramePoolShared {
    free_media: Mutex<Vec<Box<FrameBuf>>>,
    free_control: Mutex<Vec<Box<FrameBuf>>>,
}

impl FramePoolShared {
    fn reclaim(&self, class: SizeClass, buf: FrameBuf) {
        let list = match class {
            SizeClass::Media => &self.free_media,
            SizeClass::Control => &self.free_control,
        };
        list.lock().unwrap().push(Box::new(buf));
    }
}

/// Pool of [`Frame`] buffers in the media and control size classes.
///
/// `acquire` never blocks: it pops a reset buffer off the free list, or
/// allocates a new one if the free list is empty. The pool grows without
/// bound; buffers are only ever reclaimed, never freed back to the
/// allocator, for the lifetime of the pool.
pub struct FramePool {
    shared: Arc<FramePoolShared>,
}

impl Default for FramePool {
    fn default() -> Self {
        Self::new()
    }
}

impl FramePool {
    pub fn new() -> Self {
        FramePool {
            shared: Arc::new(FramePoolShared {
                free_media: Mutex::new(Vec::new()),
                free_control: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Acquires a buffer from `class`, either reused or freshly allocated.
    pub fn acquire(&self, class: SizeClass) -> Frame {
        let list = match class {
            SizeClass::Media => &self.shared.free_media,
            SizeClass::Control => &self.shared.free_control,
        };
        let popped = list.lock().unwrap().pop();
        let buf = popped.unwrap_or_else(|| Box::new(FrameBuf::new(class.capacity())));
        Frame(Arc::new(FrameInner {
            class,
            pool: Arc::downgrade(&self.shared),
            buf: Mutex::new(*buf),
        }))
    }

    /// Number of buffers currently sitting on the free lists.
    pub fn pooled(&self) -> usize {
        self.shared.free_media.lock().unwrap().len() + self.shared.free_control.lock().unwrap().len()
    }

    /// Number of [`Frame`] handles acquired from this pool that haven't
    /// been released back to the free lists yet.
    pub fn outstanding(&self) -> usize {
        Arc::strong_count(&self.shared) - 1
    }
}

impl Drop for FramePool {
    fn drop(&mut self) {
        let outstanding = self.outstanding();
        if outstanding > 0 {
            log::warn!("frame pool dropped with {outstanding} outstanding handle(s)");
        }
    }
}
