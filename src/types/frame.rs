//! Frame types flowing from the wire into the frame buffer

use bytes::Bytes;

/// Decoded `Frame` reply: one depth image and one color-in-depth image.
///
/// Buffers are zero-copy slices of the reply message.
#[derive(Debug, Clone, PartialEq)]
pub struct FramePacket {
    /// Send time in the capture host's tick domain
    pub sender_ticks: i64,

    /// Raw depth image bytes
    pub depth: Bytes,

    /// Raw color image registered into depth space
    pub color: Bytes,
}

impl FramePacket {
    /// Create a new frame packet
    pub fn new(sender_ticks: i64, depth: impl Into<Bytes>, color: impl Into<Bytes>) -> Self {
        Self { sender_ticks, depth: depth.into(), color: color.into() }
    }
}

/// Timestamped payload carried on the bus `Frame` topic.
#[derive(Debug, Clone, PartialEq)]
pub struct StampedPayload {
    pub sender_ticks: i64,
    pub payload: Bytes,
}

/// An image handed to collaborators: raw bytes plus resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
}

impl Image {
    pub fn new(data: impl Into<Bytes>, width: u32, height: u32) -> Self {
        Self { data: data.into(), width, height }
    }

    /// Bytes per pixel implied by the buffer size, if it divides evenly.
    pub fn bytes_per_pixel(&self) -> Option<usize> {
        let pixels = (self.width as usize).checked_mul(self.height as usize)?;
        if pixels == 0 || self.data.len() % pixels != 0 {
            return None;
        }
        Some(self.data.len() / pixels)
    }
}
