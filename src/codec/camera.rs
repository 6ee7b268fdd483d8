//! `Camera` bootstrap reply

use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

use super::{dim_to_i32, parse_i32_le, parse_len_le};
use crate::types::CalibrationRecord;
use crate::{LinkError, Result};

const CONTEXT: &str = "camera reply";
const HEADER_LEN: usize = 8;

/// Encode a calibration record as a `Camera` reply.
///
/// Fails when a dimension does not fit the wire's i32 fields.
pub fn encode_camera(record: &CalibrationRecord) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(
        HEADER_LEN + CalibrationRecord::MATRIX_LEN + CalibrationRecord::DIMENSIONS_LEN,
    );
    buf.put_i32_le(CalibrationRecord::MATRIX_LEN as i32);
    buf.put_i32_le(CalibrationRecord::DIMENSIONS_LEN as i32);
    for value in record.color_to_depth {
        buf.put_f32_le(value);
    }
    for dim in record.dimensions() {
        buf.put_i32_le(dim_to_i32(dim, CONTEXT, "dimension")?);
    }
    Ok(buf.freeze())
}

/// Decode a `Camera` reply into a calibration record.
///
/// The two length fields must describe exactly 16 floats and 6 integers and
/// must account for every byte of the reply.
pub fn decode_camera(data: &[u8]) -> Result<CalibrationRecord> {
    let calib_len = parse_len_le(data, 0, CONTEXT, "calibLen")?;
    let size_len = parse_len_le(data, 4, CONTEXT, "sizeLen")?;

    let declared = HEADER_LEN + calib_len + size_len;
    if declared != data.len() {
        return Err(LinkError::decode(
            CONTEXT,
            format!("declared {} bytes, buffer holds {}", declared, data.len()),
        ));
    }
    if calib_len != CalibrationRecord::MATRIX_LEN {
        return Err(LinkError::decode(
            CONTEXT,
            format!(
                "calibration block is {} bytes, expected {}",
                calib_len,
                CalibrationRecord::MATRIX_LEN
            ),
        ));
    }
    if size_len != CalibrationRecord::DIMENSIONS_LEN {
        return Err(LinkError::decode(
            CONTEXT,
            format!(
                "dimension block is {} bytes, expected {}",
                size_len,
                CalibrationRecord::DIMENSIONS_LEN
            ),
        ));
    }

    let mut color_to_depth = [0.0f32; 16];
    for (i, value) in color_to_depth.iter_mut().enumerate() {
        *value = f32::from_bits(parse_i32_le(data, HEADER_LEN + i * 4, CONTEXT)? as u32);
    }

    let dims_offset = HEADER_LEN + calib_len;
    let mut dims = [0u32; 6];
    for (i, dim) in dims.iter_mut().enumerate() {
        let value = parse_len_le(data, dims_offset + i * 4, CONTEXT, "dimension")?;
        *dim = u32::try_from(value)
            .map_err(|_| LinkError::decode(CONTEXT, format!("dimension {} out of range", value)))?;
    }

    trace!("Decoded camera reply: dims={:?}", dims);

    Ok(CalibrationRecord {
        color_to_depth,
        color_width: dims[0],
        color_height: dims[1],
        depth_width: dims[2],
        depth_height: dims[3],
        ir_width: dims[4],
        ir_height: dims[5],
    })
}
