//! Binary payload encoding and decoding
//!
//! Every payload exchanged with the capture host is a flat little-endian
//! record. Decoders check each embedded length against the real buffer size
//! and return [`LinkError::Decode`](crate::LinkError::Decode) on any mismatch;
//! nothing in this module panics on malformed input.
//!
//! ## Payload Layouts
//!
//! ```text
//! Camera   [i32 calibLen][i32 sizeLen][16 x f32 matrix][6 x i32 dimensions]
//! Lookup   raw bytes, three parts concatenated in order
//! Frame    [i64 senderTicks][i32 depthLen][i32 colorLen][depth][color]
//! Size     [i32 width][i32 height]                 (bus topic)
//! Stamped  [i64 senderTicks][payload]              (bus Frame topic)
//! ```

mod bus;
mod camera;
mod frame;
mod lookup;

pub use bus::{decode_size, decode_stamped, encode_size, encode_stamped};
pub use camera::{decode_camera, encode_camera};
pub use frame::{FRAME_HEADER_LEN, decode_frame, encode_frame};
pub use lookup::split_lookup;

use crate::{LinkError, Result};

pub(crate) fn parse_i32_le(data: &[u8], offset: usize, context: &str) -> Result<i32> {
    let bytes = data.get(offset..offset + 4).ok_or_else(|| {
        LinkError::decode(
            context,
            format!(
                "insufficient data for i32 at offset {} (need 4 bytes, have {})",
                offset,
                data.len().saturating_sub(offset)
            ),
        )
    })?;
    Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

pub(crate) fn parse_i64_le(data: &[u8], offset: usize, context: &str) -> Result<i64> {
    let bytes = data.get(offset..offset + 8).ok_or_else(|| {
        LinkError::decode(
            context,
            format!(
                "insufficient data for i64 at offset {} (need 8 bytes, have {})",
                offset,
                data.len().saturating_sub(offset)
            ),
        )
    })?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    Ok(i64::from_le_bytes(raw))
}

/// Read a length or dimension field that must not be negative.
pub(crate) fn parse_len_le(data: &[u8], offset: usize, context: &str, field: &str) -> Result<usize> {
    let value = parse_i32_le(data, offset, context)?;
    usize::try_from(value)
        .map_err(|_| LinkError::decode(context, format!("{} is negative ({})", field, value)))
}

/// Encode a dimension field. Values above i32::MAX have no wire form.
pub(crate) fn dim_to_i32(value: u32, context: &str, field: &str) -> Result<i32> {
    i32::try_from(value)
        .map_err(|_| LinkError::decode(context, format!("{} {} exceeds i32::MAX", field, value)))
}

/// Encode a length field. Buffers beyond i32::MAX saturate and fail to decode
/// on the receiving side.
pub(crate) fn len_to_i32(len: usize) -> i32 {
    i32::try_from(len).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_helpers_report_short_buffers() {
        let data = [1u8, 0, 0];
        let err = parse_i32_le(&data, 0, "test").unwrap_err();
        assert!(err.to_string().contains("need 4 bytes, have 3"));

        let err = parse_i64_le(&data, 2, "test").unwrap_err();
        assert!(err.is_decode());

        // offset past the end must not underflow
        assert!(parse_i32_le(&data, 10, "test").is_err());
    }

    #[test]
    fn negative_lengths_are_decode_errors() {
        let data = (-1i32).to_le_bytes();
        let err = parse_len_le(&data, 0, "frame", "depthLen").unwrap_err();
        assert!(err.to_string().contains("depthLen is negative"));
    }

    #[test]
    fn oversized_dimensions_have_no_wire_form() {
        assert_eq!(dim_to_i32(i32::MAX as u32, "size payload", "width").unwrap(), i32::MAX);
        let err = dim_to_i32(3_000_000_000, "size payload", "width").unwrap_err();
        assert!(err.to_string().contains("width 3000000000 exceeds"));
    }
}
