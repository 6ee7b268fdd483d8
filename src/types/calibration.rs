//! Sensor calibration received during bootstrap

/// Calibration record served by the capture host in reply to `Camera`.
///
/// Holds the color-to-depth transform plus the resolution of every sensor
/// stream. Created once per session and never mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationRecord {
    /// Color-to-depth transform, 16 floats in wire order
    pub color_to_depth: [f32; 16],
    pub color_width: u32,
    pub color_height: u32,
    pub depth_width: u32,
    pub depth_height: u32,
    pub ir_width: u32,
    pub ir_height: u32,
}

impl CalibrationRecord {
    /// Number of bytes in the encoded transform.
    pub const MATRIX_LEN: usize = 16 * 4;

    /// Number of bytes in the encoded dimension vector.
    pub const DIMENSIONS_LEN: usize = 6 * 4;

    /// 4x4 identity transform.
    pub const IDENTITY: [f32; 16] =
        [1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0];

    /// Dimensions in wire order: color, depth, infrared (width then height).
    pub fn dimensions(&self) -> [u32; 6] {
        [
            self.color_width,
            self.color_height,
            self.depth_width,
            self.depth_height,
            self.ir_width,
            self.ir_height,
        ]
    }

    /// Number of pixels in one depth image, or `None` if it overflows `usize`.
    pub fn depth_pixels(&self) -> Option<usize> {
        (self.depth_width as usize).checked_mul(self.depth_height as usize)
    }

    /// Element of the transform at `row`, `col`, or `None` when out of range.
    ///
    /// Wire order is column-major, matching the capture host's matrix layout.
    pub fn transform_at(&self, row: usize, col: usize) -> Option<f32> {
        if row >= 4 || col >= 4 {
            return None;
        }
        Some(self.color_to_depth[col * 4 + row])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinect_record() -> CalibrationRecord {
        CalibrationRecord {
            color_to_depth: CalibrationRecord::IDENTITY,
            color_width: 1920,
            color_height: 1080,
            depth_width: 640,
            depth_height: 576,
            ir_width: 640,
            ir_height: 576,
        }
    }

    #[test]
    fn dimensions_follow_wire_order() {
        assert_eq!(kinect_record().dimensions(), [1920, 1080, 640, 576, 640, 576]);
    }

    #[test]
    fn depth_pixels_multiplies_depth_resolution() {
        assert_eq!(kinect_record().depth_pixels(), Some(640 * 576));
    }

    #[test]
    fn transform_lookup_is_column_major() {
        let mut record = kinect_record();
        record.color_to_depth[12] = 5.0; // column 3, row 0: translation x

        assert_eq!(record.transform_at(0, 3), Some(5.0));
        assert_eq!(record.transform_at(3, 3), Some(1.0));
        assert_eq!(record.transform_at(4, 0), None);
    }
}
