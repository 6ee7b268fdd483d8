//! Core types for sensor data moving across the link.
//!
//! ## Architecture
//!
//! - [`CalibrationRecord`] is the decoded `Camera` bootstrap reply
//! - [`LookupAssembler`] collects the three lookup parts into a [`LookupTable`]
//! - [`FramePacket`] is a decoded `Frame` reply, [`Image`] what collaborators read
//! - [`LinkState`] tracks a polling session from connect to streaming
//! - [`ticks`] converts between wall-clock time and the sender's tick domain
//!
//! ## Usage Example
//!
//! ```rust
//! use depthlink::types::{LookupAssembler, LookupPart};
//! use bytes::Bytes;
//!
//! let mut assembler = LookupAssembler::new();
//! assembler.insert(LookupPart::First, Bytes::from(vec![0u8; 100]));
//! assembler.insert(LookupPart::Second, Bytes::from(vec![0u8; 100]));
//! assert!(assembler.assemble().is_err());
//!
//! assembler.insert(LookupPart::Third, Bytes::from(vec![0u8; 56]));
//! assert_eq!(assembler.assemble().unwrap().len(), 256);
//! ```

mod calibration;
mod frame;
mod lookup;
mod state;
pub mod ticks;
mod update_rate;

// Re-export all public types
pub use calibration::CalibrationRecord;
pub use frame::{FramePacket, Image, StampedPayload};
pub use lookup::{LOOKUP_ENTRY_LEN, LookupAssembler, LookupPart, LookupTable};
pub use state::LinkState;
pub use update_rate::UpdateRate;
