//! XY lookup table transferred in three parts

use bytes::{Bytes, BytesMut};

use super::CalibrationRecord;
use crate::{LinkError, Result};

/// Bytes per lookup entry: one 4 x f32 vector per depth pixel.
pub const LOOKUP_ENTRY_LEN: usize = 16;

/// One of the three independently requested lookup parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LookupPart {
    First,
    Second,
    Third,
}

impl LookupPart {
    /// All parts in reassembly order.
    pub const ALL: [LookupPart; 3] = [LookupPart::First, LookupPart::Second, LookupPart::Third];

    /// Zero-based position of the part.
    pub fn index(self) -> usize {
        match self {
            LookupPart::First => 0,
            LookupPart::Second => 1,
            LookupPart::Third => 2,
        }
    }

    /// One-based part number as used in request labels.
    pub fn number(self) -> u8 {
        self.index() as u8 + 1
    }

    /// Request label for this part (`Lookup1`, `Lookup2`, `Lookup3`).
    pub fn label(self) -> &'static str {
        match self {
            LookupPart::First => "Lookup1",
            LookupPart::Second => "Lookup2",
            LookupPart::Third => "Lookup3",
        }
    }

    /// Parse a request label back into a part.
    pub fn from_label(label: &str) -> Option<Self> {
        LookupPart::ALL.into_iter().find(|part| part.label() == label)
    }
}

/// Reassembled per-pixel unprojection table.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupTable {
    data: Bytes,
}

impl LookupTable {
    /// Wrap raw table bytes.
    pub fn new(data: Bytes) -> Self {
        Self { data }
    }

    /// Expected table size for a depth image of the given resolution, or
    /// `None` when it does not fit in `usize`.
    pub fn expected_len(depth_width: u32, depth_height: u32) -> Option<usize> {
        (depth_width as usize)
            .checked_mul(depth_height as usize)?
            .checked_mul(LOOKUP_ENTRY_LEN)
    }

    /// Raw table bytes.
    pub fn as_bytes(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Check the table size against the depth resolution of `calibration`.
    pub fn validate_for(&self, calibration: &CalibrationRecord) -> Result<()> {
        let expected = Self::expected_len(calibration.depth_width, calibration.depth_height)
            .ok_or_else(|| {
                LinkError::decode(
                    "lookup table",
                    format!(
                        "size for {}x{} depth overflows",
                        calibration.depth_width, calibration.depth_height
                    ),
                )
            })?;
        if self.data.len() != expected {
            return Err(LinkError::decode(
                "lookup table",
                format!(
                    "expected {} bytes for {}x{} depth, got {}",
                    expected,
                    calibration.depth_width,
                    calibration.depth_height,
                    self.data.len()
                ),
            ));
        }
        Ok(())
    }

    /// Ray vector for depth pixel (`x`, `y`) in an image `width` pixels wide.
    pub fn ray(&self, x: u32, y: u32, width: u32) -> Option<[f32; 4]> {
        if x >= width {
            return None;
        }
        let offset = (y as usize)
            .checked_mul(width as usize)?
            .checked_add(x as usize)?
            .checked_mul(LOOKUP_ENTRY_LEN)?;
        let entry = self.data.get(offset..offset.checked_add(LOOKUP_ENTRY_LEN)?)?;

        let mut ray = [0.0f32; 4];
        for (i, chunk) in entry.chunks_exact(4).enumerate() {
            ray[i] = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Some(ray)
    }
}

/// Collects the three lookup parts and concatenates them in order.
///
/// Assembly is refused until every part has arrived; a partial table is
/// never produced.
#[derive(Debug, Default)]
pub struct LookupAssembler {
    parts: [Option<Bytes>; 3],
}

impl LookupAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a part, replacing any earlier copy of the same part.
    pub fn insert(&mut self, part: LookupPart, data: Bytes) {
        self.parts[part.index()] = Some(data);
    }

    /// Whether `part` has been received.
    pub fn has(&self, part: LookupPart) -> bool {
        self.parts[part.index()].is_some()
    }

    pub fn is_complete(&self) -> bool {
        self.parts.iter().all(Option::is_some)
    }

    /// Parts that have not been received yet.
    pub fn missing(&self) -> Vec<LookupPart> {
        LookupPart::ALL.into_iter().filter(|part| !self.has(*part)).collect()
    }

    /// Concatenate parts 1, 2, 3 into one table.
    pub fn assemble(&self) -> Result<LookupTable> {
        let mut total = 0;
        for part in LookupPart::ALL {
            match &self.parts[part.index()] {
                Some(data) => total += data.len(),
                None => {
                    let missing: Vec<u8> = self.missing().into_iter().map(LookupPart::number).collect();
                    return Err(LinkError::decode(
                        "lookup table",
                        format!("incomplete: missing parts {:?}", missing),
                    ));
                }
            }
        }

        let mut table = BytesMut::with_capacity(total);
        for data in self.parts.iter().flatten() {
            table.extend_from_slice(data);
        }
        Ok(LookupTable::new(table.freeze()))
    }

    /// Discard every received part.
    pub fn reset(&mut self) {
        self.parts = Default::default();
    }
}
