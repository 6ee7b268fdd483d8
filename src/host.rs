//! Capture host side of the request/reply protocol
//!
//! Serves `Camera`, `Lookup1..3` and `Frame` from in-memory state. The
//! calibration and lookup table are fixed for the life of the host; the
//! frame is replaced whenever the sensor produces a new one.

use bytes::Bytes;
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::codec::{encode_camera, encode_frame, split_lookup};
use crate::config::LinkConfig;
use crate::reqrep::{CAMERA, FRAME, Replier, Request};
use crate::types::{CalibrationRecord, LookupPart, LookupTable, ticks};
use crate::Result;

struct HostState {
    camera: Bytes,
    lookup: [Bytes; 3],
    /// Encoded `Frame` reply; `None` until the first frame
    frame: RwLock<Option<Bytes>>,
}

impl HostState {
    fn reply(&self, request: &Request) -> Option<Bytes> {
        match request.label.as_str() {
            CAMERA => Some(self.camera.clone()),
            FRAME => self.frame.read().clone(),
            label => match LookupPart::from_label(label) {
                Some(part) => Some(self.lookup[part.index()].clone()),
                None => {
                    debug!("Unknown request '{}'", label);
                    None
                }
            },
        }
    }
}

/// A replier that serves one sensor's calibration, lookup table and frames.
pub struct CaptureHost {
    state: Arc<HostState>,
    replier: Replier,
}

impl CaptureHost {
    /// Bind `addr` and start serving.
    ///
    /// `Frame` requests go unanswered until [`CaptureHost::update_frame`]
    /// has been called once.
    pub async fn bind(
        addr: &str,
        config: &LinkConfig,
        calibration: CalibrationRecord,
        lookup: LookupTable,
    ) -> Result<Self> {
        lookup.validate_for(&calibration)?;

        let state = Arc::new(HostState {
            camera: encode_camera(&calibration)?,
            lookup: split_lookup(lookup.as_bytes()),
            frame: RwLock::new(None),
        });
        let handler_state = state.clone();
        let replier = Replier::bind(addr, config, move |request: &Request| handler_state.reply(request)).await?;

        info!(
            "Capture host serving {}x{} depth on {}",
            calibration.depth_width,
            calibration.depth_height,
            replier.local_addr()
        );
        Ok(Self { state, replier })
    }

    /// Replace the frame served to `Frame` requests, stamped with the current time.
    pub fn update_frame(&self, depth: &[u8], color: &[u8]) {
        self.update_frame_at(ticks::now_ticks(), depth, color);
    }

    /// Replace the served frame with an explicit sender timestamp.
    pub fn update_frame_at(&self, sender_ticks: i64, depth: &[u8], color: &[u8]) {
        let encoded = encode_frame(sender_ticks, depth, color);
        *self.state.frame.write() = Some(encoded);
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.replier.local_addr()
    }

    pub async fn dispose(&mut self) {
        self.replier.dispose().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode_camera, decode_frame};

    fn calibration() -> CalibrationRecord {
        CalibrationRecord {
            color_to_depth: CalibrationRecord::IDENTITY,
            color_width: 4,
            color_height: 4,
            depth_width: 2,
            depth_height: 2,
            ir_width: 2,
            ir_height: 2,
        }
    }

    fn state() -> HostState {
        let table = Bytes::from(vec![1u8; LookupTable::expected_len(2, 2).unwrap()]);
        HostState {
            camera: encode_camera(&calibration()).unwrap(),
            lookup: split_lookup(&table),
            frame: RwLock::new(None),
        }
    }

    #[test]
    fn serves_bootstrap_replies() {
        let state = state();
        let camera = state.reply(&Request::camera()).unwrap();
        assert_eq!(decode_camera(&camera).unwrap(), calibration());

        let total: usize = LookupPart::ALL
            .into_iter()
            .map(|part| state.reply(&Request::lookup(part)).unwrap().len())
            .sum();
        assert_eq!(total, 64);
    }

    #[test]
    fn frame_is_unanswered_until_first_update() {
        let state = state();
        assert!(state.reply(&Request::frame()).is_none());

        *state.frame.write() = Some(encode_frame(3, &[1], &[2]));
        let frame = decode_frame(&state.reply(&Request::frame()).unwrap()).unwrap();
        assert_eq!(frame.sender_ticks, 3);
    }

    #[test]
    fn unknown_labels_get_no_reply() {
        assert!(state().reply(&Request::new("Lookup4")).is_none());
    }

    #[tokio::test]
    async fn rejects_lookup_that_does_not_fit() {
        let result = CaptureHost::bind(
            "127.0.0.1:0",
            &LinkConfig::default(),
            calibration(),
            LookupTable::new(Bytes::from_static(b"tiny")),
        )
        .await;
        assert!(result.err().unwrap().is_decode());
    }
}
