//! `Frame` reply: timestamp plus depth and color sub-buffers

use bytes::{BufMut, Bytes, BytesMut};

use super::{len_to_i32, parse_i64_le, parse_len_le};
use crate::types::FramePacket;
use crate::{LinkError, Result};

const CONTEXT: &str = "frame reply";

/// Fixed header: i64 timestamp, i32 depth length, i32 color length.
pub const FRAME_HEADER_LEN: usize = 8 + 4 + 4;

/// Encode a `Frame` reply.
pub fn encode_frame(sender_ticks: i64, depth: &[u8], color: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + depth.len() + color.len());
    buf.put_i64_le(sender_ticks);
    buf.put_i32_le(len_to_i32(depth.len()));
    buf.put_i32_le(len_to_i32(color.len()));
    buf.put_slice(depth);
    buf.put_slice(color);
    buf.freeze()
}

/// Decode a `Frame` reply.
///
/// The declared lengths plus the header must equal the buffer length exactly.
/// The returned buffers share the reply's allocation.
pub fn decode_frame(data: &Bytes) -> Result<FramePacket> {
    let sender_ticks = parse_i64_le(data, 0, CONTEXT)?;
    let depth_len = parse_len_le(data, 8, CONTEXT, "depthLen")?;
    let color_len = parse_len_le(data, 12, CONTEXT, "colorLen")?;

    let declared = FRAME_HEADER_LEN
        .checked_add(depth_len)
        .and_then(|n| n.checked_add(color_len))
        .ok_or_else(|| LinkError::decode(CONTEXT, "declared length overflows"))?;
    if declared != data.len() {
        return Err(LinkError::decode(
            CONTEXT,
            format!(
                "declared {} bytes (depth {} + color {} + header {}), buffer holds {}",
                declared,
                depth_len,
                color_len,
                FRAME_HEADER_LEN,
                data.len()
            ),
        ));
    }

    let depth_end = FRAME_HEADER_LEN + depth_len;
    Ok(FramePacket {
        sender_ticks,
        depth: data.slice(FRAME_HEADER_LEN..depth_end),
        color: data.slice(depth_end..),
    })
}
