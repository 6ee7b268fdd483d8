//! Payloads of the well-known bus topics `Size` and `Frame`

use bytes::{BufMut, Bytes, BytesMut};

use super::{dim_to_i32, parse_i64_le, parse_len_le};
use crate::types::StampedPayload;
use crate::{LinkError, Result};

/// Encode a `Size` payload. Either dimension above i32::MAX is an error.
pub fn encode_size(width: u32, height: u32) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(8);
    buf.put_i32_le(dim_to_i32(width, "size payload", "width")?);
    buf.put_i32_le(dim_to_i32(height, "size payload", "height")?);
    Ok(buf.freeze())
}

/// Decode a `Size` payload; it must be exactly two i32 values.
pub fn decode_size(data: &[u8]) -> Result<(u32, u32)> {
    if data.len() != 8 {
        return Err(LinkError::decode(
            "size payload",
            format!("expected 8 bytes, got {}", data.len()),
        ));
    }
    let width = parse_len_le(data, 0, "size payload", "width")?;
    let height = parse_len_le(data, 4, "size payload", "height")?;
    // Both came from non-negative i32 values
    Ok((width as u32, height as u32))
}

/// Encode a timestamped `Frame` topic payload.
pub fn encode_stamped(sender_ticks: i64, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(8 + payload.len());
    buf.put_i64_le(sender_ticks);
    buf.put_slice(payload);
    buf.freeze()
}

/// Decode a timestamped `Frame` topic payload.
pub fn decode_stamped(data: &Bytes) -> Result<StampedPayload> {
    let sender_ticks = parse_i64_le(data, 0, "stamped payload")?;
    Ok(StampedPayload { sender_ticks, payload: data.slice(8..) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_round_trip() {
        assert_eq!(decode_size(&encode_size(1280, 720).unwrap()).unwrap(), (1280, 720));
    }

    #[test]
    fn size_refuses_dimensions_beyond_wire_range() {
        assert!(encode_size(u32::MAX, 720).unwrap_err().is_decode());
        assert!(encode_size(1280, i32::MAX as u32 + 1).is_err());
        assert!(encode_size(i32::MAX as u32, i32::MAX as u32).is_ok());
    }

    #[test]
    fn size_rejects_wrong_length() {
        assert!(decode_size(&[0u8; 7]).unwrap_err().is_decode());
        assert!(decode_size(&[0u8; 12]).unwrap_err().is_decode());
    }

    #[test]
    fn size_rejects_negative_dimensions() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&(-1i32).to_le_bytes());
        raw.extend_from_slice(&10i32.to_le_bytes());
        assert!(decode_size(&raw).is_err());
    }

    #[test]
    fn stamped_splits_timestamp_from_payload() {
        let decoded = decode_stamped(&encode_stamped(99, b"bgra")).unwrap();
        assert_eq!(decoded.sender_ticks, 99);
        assert_eq!(decoded.payload.as_ref(), b"bgra");
    }

    #[test]
    fn stamped_requires_timestamp() {
        assert!(decode_stamped(&Bytes::from_static(&[1, 2, 3])).unwrap_err().is_decode());
    }
}
