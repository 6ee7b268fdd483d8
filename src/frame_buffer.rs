//! Latest-wins handoff between the network path and readers
//!
//! The network path replaces the slot contents as frames arrive; readers
//! clone out whatever is newest. Nothing queues behind the slot, so a reader
//! that falls behind simply sees a later frame next time.

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::watch;

/// Immutable copy of the slot at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameSnapshot {
    /// Increments on every store; 0 means nothing stored yet
    pub sequence: u64,
    pub sender_ticks: i64,
    pub depth: Bytes,
    pub color: Bytes,
}

/// Single-slot frame store shared by one writer and any number of readers.
#[derive(Debug)]
pub struct FrameBuffer {
    slot: Mutex<FrameSnapshot>,
    sequence: watch::Sender<u64>,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBuffer {
    pub fn new() -> Self {
        let (sequence, _) = watch::channel(0);
        Self { slot: Mutex::new(FrameSnapshot::default()), sequence }
    }

    /// Replace depth and color together.
    pub fn store_frame(&self, sender_ticks: i64, depth: Bytes, color: Bytes) -> u64 {
        let sequence = {
            let mut slot = self.slot.lock();
            slot.sequence += 1;
            slot.sender_ticks = sender_ticks;
            slot.depth = depth;
            slot.color = color;
            slot.sequence
        };
        self.sequence.send_replace(sequence);
        sequence
    }

    /// Replace only the color image, keeping the last depth image.
    pub fn store_color(&self, sender_ticks: i64, color: Bytes) -> u64 {
        let sequence = {
            let mut slot = self.slot.lock();
            slot.sequence += 1;
            slot.sender_ticks = sender_ticks;
            slot.color = color;
            slot.sequence
        };
        self.sequence.send_replace(sequence);
        sequence
    }

    /// Newest depth image, empty before the first frame.
    pub fn latest_depth(&self) -> Bytes {
        self.slot.lock().depth.clone()
    }

    /// Newest color image, empty before the first frame.
    pub fn latest_color(&self) -> Bytes {
        self.slot.lock().color.clone()
    }

    pub fn snapshot(&self) -> FrameSnapshot {
        self.slot.lock().clone()
    }

    pub fn sequence(&self) -> u64 {
        self.slot.lock().sequence
    }

    /// Watch the sequence number; it changes on every store.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.sequence.subscribe()
    }
}
