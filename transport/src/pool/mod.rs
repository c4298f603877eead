//! Pooled allocation for frame buffers and fragment trackers.

pub mod frame;
pub mod tracker;

pub use frame::{Frame, FramePool, FrameState, SizeClass};
pub use tracker::{Tracker, TrackerPool};
