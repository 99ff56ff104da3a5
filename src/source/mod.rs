//! Where frames come from.
//!
//! The stream loop only sees [`FrameSource`]. The real capture thread talks
//! to it through a [`FrameHandoff`]: one shared slot between a single
//! producer and a single consumer. The producer never blocks. While a frame
//! is pending, or the consumer still holds the last one, new frames are
//! dropped, so the first frame published after `reset_flag` is the one the
//! consumer gets next.

pub mod capture;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::frame::{PixelFormat, RawFrame};

/// The capture side as the stream loop sees it.
///
/// `fetch_frame` may only be called after `is_frame_ready` returned true, and
/// the returned frame stays valid until `reset_flag`.
pub trait FrameSource {
    /// Cheap, non-blocking check.
    fn is_frame_ready(&mut self) -> bool;

    /// Borrow the current frame, or `None` if nothing is ready.
    fn fetch_frame(&mut self) -> Option<RawFrame<'_>>;

    /// Release the current frame so the next one can be handed over.
    fn reset_flag(&mut self);

    /// False once the producer has gone away for good.
    fn is_alive(&self) -> bool {
        true
    }
}

/// A frame owned by the handoff, copied out of the capturer.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub width: u32,
    pub height: u32,
    pub row_stride: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl CapturedFrame {
    pub fn as_raw(&self) -> RawFrame<'_> {
        RawFrame {
            width: self.width,
            height: self.height,
            row_stride: self.row_stride,
            format: self.format,
            data: &self.data,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Accepted,
    /// Slot busy, frame discarded.
    Dropped,
    /// Consumer is gone; the producer should stop.
    Closed,
}

#[derive(Default)]
struct Slot {
    pending: Option<CapturedFrame>,
    /// Consumer holds a frame it has not released yet.
    held: bool,
    producer_gone: bool,
    consumer_gone: bool,
}

type SharedSlot = Arc<Mutex<Slot>>;

fn lock(slot: &SharedSlot) -> MutexGuard<'_, Slot> {
    // a panic on the other side leaves the slot itself consistent
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct FrameHandoff;

impl FrameHandoff {
    pub fn channel() -> (FrameProducer, FrameConsumer) {
        let slot = SharedSlot::default();
        (
            FrameProducer { slot: slot.clone() },
            FrameConsumer {
                slot,
                current: None,
                closed: false,
            },
        )
    }
}

pub struct FrameProducer {
    slot: SharedSlot,
}

impl FrameProducer {
    /// True when a frame published now would be accepted.
    ///
    /// Lets the capture thread skip copying frames nobody will take.
    pub fn wants_frame(&self) -> bool {
        let slot = lock(&self.slot);
        !slot.consumer_gone && !slot.held && slot.pending.is_none()
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.slot).consumer_gone
    }

    pub fn publish(&self, frame: CapturedFrame) -> PublishOutcome {
        let mut slot = lock(&self.slot);
        if slot.consumer_gone {
            return PublishOutcome::Closed;
        }
        if slot.held || slot.pending.is_some() {
            return PublishOutcome::Dropped;
        }
        slot.pending = Some(frame);
        PublishOutcome::Accepted
    }
}

impl Drop for FrameProducer {
    fn drop(&mut self) {
        lock(&self.slot).producer_gone = true;
    }
}

pub struct FrameConsumer {
    slot: SharedSlot,
    current: Option<CapturedFrame>,
    closed: bool,
}

impl FrameConsumer {
    /// Take the pending frame, if any, without waiting.
    ///
    /// The slot stays held until `reset_flag`, so nothing is queued behind
    /// the frame just taken.
    pub fn try_take(&mut self) -> Option<CapturedFrame> {
        let mut slot = lock(&self.slot);
        let frame = slot.pending.take();
        if frame.is_some() {
            slot.held = true;
        } else if slot.producer_gone {
            self.closed = true;
        }
        frame
    }
}

impl FrameSource for FrameConsumer {
    fn is_frame_ready(&mut self) -> bool {
        if self.current.is_none() {
            self.current = self.try_take();
        }
        self.current.is_some()
    }

    fn fetch_frame(&mut self) -> Option<RawFrame<'_>> {
        self.current.as_ref().map(CapturedFrame::as_raw)
    }

    fn reset_flag(&mut self) {
        self.current = None;
        lock(&self.slot).held = false;
    }

    fn is_alive(&self) -> bool {
        !self.closed || self.current.is_some()
    }
}

impl Drop for FrameConsumer {
    fn drop(&mut self) {
        lock(&self.slot).consumer_gone = true;
    }
}
