//! Update rate control for frame streams

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Update rate for frame streams
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum UpdateRate {
    /// Every frame the network path stores
    Native,

    /// Throttled to maximum Hz, latest frame wins
    Max(u32),
}

impl UpdateRate {
    /// Normalize the rate; `Max(0)` means no limit.
    pub fn normalize(self) -> Self {
        match self {
            UpdateRate::Max(0) => UpdateRate::Native,
            other => other,
        }
    }

    /// Check if throttling is needed
    pub fn needs_throttle(self) -> bool {
        self.throttle_interval().is_some()
    }

    /// Get throttle interval if needed
    pub fn throttle_interval(self) -> Option<Duration> {
        match self.normalize() {
            UpdateRate::Native => None,
            UpdateRate::Max(hz) => Some(Duration::from_secs_f64(1.0 / hz as f64)),
        }
    }
}
