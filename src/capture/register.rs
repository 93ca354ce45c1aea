//! Latest-value frame register
//!
//! Single-slot handoff between a capture source and the compositor.
//! Publishing overwrites any unread previous value: the compositor always
//! sees the freshest frame and a stalled consumer never backpressures the
//! producer.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::frame::Frame;

/// Single-slot, overwrite-on-publish frame handoff.
#[derive(Default)]
pub struct FrameRegister {
    slot: Mutex<Option<Arc<Frame>>>,
}

impl FrameRegister {
    pub fn new() -> Self {
        FrameRegister {
            slot: Mutex::new(None),
        }
    }

    /// Publish a frame, discarding any unread predecessor.
    pub fn publish(&self, frame: Frame) {
        *self.slot.lock() = Some(Arc::new(frame));
    }

    /// Most recently published frame, or `None` if nothing was ever
    /// published (or the register was cleared). Non-blocking; does not
    /// consume the value.
    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.slot.lock().clone()
    }

    /// Drop the held frame. Used when a source is lost, so the compositor
    /// stops blending stale camera data.
    pub fn clear(&self) {
        *self.slot.lock() = None;
    }
}
