//! Bus-side color feed

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::bus::Subscriber;
use crate::codec::{decode_size, decode_stamped};
use crate::frame_buffer::FrameBuffer;
use crate::latency::LatencyTracker;
use crate::types::Image;

/// Topic announcing the color frame resolution
pub const SIZE_TOPIC: &str = "Size";
/// Topic carrying timestamped color frames
pub const FRAME_TOPIC: &str = "Frame";

/// Writes color frames published on the bus into a [`FrameBuffer`].
///
/// Frames are ignored until a `Size` message has announced their
/// resolution. Every accepted frame is also recorded by the latency tracker.
pub struct ColorFeed {
    size: Arc<Mutex<Option<(u32, u32)>>>,
    frames: Arc<FrameBuffer>,
}

impl ColorFeed {
    /// Register `Size` and `Frame` handlers on `subscriber`.
    pub fn attach(subscriber: &Subscriber, frames: Arc<FrameBuffer>, latency: LatencyTracker) -> Self {
        let size = Arc::new(Mutex::new(None));

        let size_slot = size.clone();
        subscriber.add_topic_callback(SIZE_TOPIC, move |payload: Bytes| match decode_size(&payload) {
            Ok(dims) => {
                let previous = size_slot.lock().replace(dims);
                if previous != Some(dims) {
                    debug!("Color frame size is {}x{}", dims.0, dims.1);
                }
            }
            Err(e) => warn!("Ignoring size message: {}", e),
        });

        let size_slot = size.clone();
        let sink = frames.clone();
        subscriber.add_topic_callback(FRAME_TOPIC, move |payload: Bytes| {
            if size_slot.lock().is_none() {
                trace!("Skipping frame received before its size");
                return;
            }
            match decode_stamped(&payload) {
                Ok(stamped) => {
                    latency.record(stamped.sender_ticks);
                    sink.store_color(stamped.sender_ticks, stamped.payload);
                }
                Err(e) => warn!("Ignoring frame message: {}", e),
            }
        });

        Self { size, frames }
    }

    /// Resolution from the latest `Size` message.
    pub fn size(&self) -> Option<(u32, u32)> {
        *self.size.lock()
    }

    /// Newest color frame with its announced resolution.
    pub fn latest_color_frame(&self) -> Option<Image> {
        let (width, height) = self.size()?;
        let snapshot = self.frames.snapshot();
        (snapshot.sequence > 0).then(|| Image::new(snapshot.color, width, height))
    }

    /// Remove the handlers from `subscriber`.
    pub fn detach(self, subscriber: &Subscriber) {
        subscriber.remove_topic(SIZE_TOPIC);
        subscriber.remove_topic(FRAME_TOPIC);
    }
}
