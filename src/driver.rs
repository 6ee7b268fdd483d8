//! Driver spawns and manages the request/reply session task

use bytes::Bytes;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::codec::{decode_camera, decode_frame};
use crate::exchange::Exchange;
use crate::frame_buffer::FrameBuffer;
use crate::latency::LatencyTracker;
use crate::reqrep::Request;
use crate::types::{CalibrationRecord, LinkState, LookupAssembler, LookupPart, LookupTable};
use crate::LinkError;

/// Bootstrap results, written once by the driver and read by the connection.
#[derive(Debug, Default)]
pub struct SessionData {
    pub calibration: OnceLock<CalibrationRecord>,
    pub lookup: OnceLock<LookupTable>,
}

/// Everything the session task needs besides its exchange
#[derive(Debug, Clone)]
pub struct DriverContext {
    pub request_timeout: Duration,
    pub retry_backoff: Duration,
    pub frames: Arc<FrameBuffer>,
    pub latency: LatencyTracker,
    pub session: Arc<SessionData>,
}

/// Result of spawning the session task
pub struct DriverChannels {
    /// Receiver for state transitions
    pub state: watch::Receiver<LinkState>,
    /// Cancellation token for graceful shutdown
    pub cancel: CancellationToken,
    /// The session task; finishes shortly after `cancel` fires
    pub task: JoinHandle<()>,
}

/// Driver runs the bootstrap handshake and then polls frames until cancelled
///
/// The task owns the exchange, so exactly one request is ever in flight.
/// Every wait races the cancellation token.
pub struct Driver;

impl Driver {
    /// Spawn the session task for the given exchange
    pub fn spawn<E>(exchange: E, context: DriverContext) -> DriverChannels
    where
        E: Exchange,
    {
        let (state_tx, state_rx) = watch::channel(LinkState::Disconnected);
        let cancel = CancellationToken::new();

        let cancel_task = cancel.clone();
        let task = tokio::spawn(async move {
            Self::session_task(exchange, context, state_tx, cancel_task).await;
        });

        DriverChannels { state: state_rx, cancel, task }
    }

    async fn session_task<E>(
        mut exchange: E,
        context: DriverContext,
        state: watch::Sender<LinkState>,
        cancel: CancellationToken,
    ) where
        E: Exchange,
    {
        info!("Session task started for {}", exchange.endpoint());
        state.send_replace(LinkState::Connected);

        let Some(calibration) = Self::fetch_calibration(&mut exchange, &context, &state, &cancel).await
        else {
            info!("Session cancelled during calibration");
            return;
        };
        let _ = context.session.calibration.set(calibration);

        let Some(table) =
            Self::fetch_lookup(&mut exchange, &context, &calibration, &state, &cancel).await
        else {
            info!("Session cancelled during lookup transfer");
            return;
        };
        let _ = context.session.lookup.set(table);

        state.send_replace(LinkState::Streaming);
        info!(
            "Streaming from {} ({}x{} depth, {}x{} color)",
            exchange.endpoint(),
            calibration.depth_width,
            calibration.depth_height,
            calibration.color_width,
            calibration.color_height
        );

        let frame_count = Self::stream_frames(&mut exchange, &context, &cancel).await;
        info!("Session task ended (received {} frames)", frame_count);
    }

    /// Request `Camera` until a reply decodes.
    async fn fetch_calibration<E: Exchange>(
        exchange: &mut E,
        context: &DriverContext,
        state: &watch::Sender<LinkState>,
        cancel: &CancellationToken,
    ) -> Option<CalibrationRecord> {
        state.send_replace(LinkState::AwaitingCameraData);
        loop {
            let reply = Self::request_until_reply(exchange, &Request::camera(), context, cancel).await?;
            match decode_camera(&reply) {
                Ok(calibration) => {
                    debug!("Calibration received: {:?}", calibration.dimensions());
                    return Some(calibration);
                }
                Err(e) => {
                    warn!("Discarding camera reply: {}", e);
                    if !Self::pause(context.retry_backoff, cancel).await {
                        return None;
                    }
                }
            }
        }
    }

    /// Request the three lookup parts until they assemble into a table that
    /// fits the calibration.
    async fn fetch_lookup<E: Exchange>(
        exchange: &mut E,
        context: &DriverContext,
        calibration: &CalibrationRecord,
        state: &watch::Sender<LinkState>,
        cancel: &CancellationToken,
    ) -> Option<LookupTable> {
        let mut assembler = LookupAssembler::new();
        loop {
            for part in LookupPart::ALL {
                state.send_replace(LinkState::awaiting(part));
                let data =
                    Self::request_until_reply(exchange, &Request::lookup(part), context, cancel).await?;
                debug!("Lookup part {} received ({} bytes)", part.number(), data.len());
                assembler.insert(part, data);
            }

            match assembler.assemble().and_then(|table| table.validate_for(calibration).map(|()| table)) {
                Ok(table) => return Some(table),
                Err(e) => {
                    warn!("Discarding lookup table: {}", e);
                    assembler.reset();
                    if !Self::pause(context.retry_backoff, cancel).await {
                        return None;
                    }
                }
            }
        }
    }

    /// Poll `Frame` until cancelled; returns the number of frames stored.
    async fn stream_frames<E: Exchange>(
        exchange: &mut E,
        context: &DriverContext,
        cancel: &CancellationToken,
    ) -> u64 {
        let request = Request::frame();
        let mut frame_count = 0u64;

        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = exchange.request(&request, context.request_timeout) => result,
            };

            match result {
                Ok(reply) => match decode_frame(&reply) {
                    Ok(packet) => {
                        let sample = context.latency.record(packet.sender_ticks);
                        let sequence =
                            context.frames.store_frame(packet.sender_ticks, packet.depth, packet.color);
                        frame_count += 1;
                        trace!("Frame {}: delay={:.2}ms", sequence, sample.delay_ms);
                    }
                    Err(e) => warn!("Skipping frame: {}", e),
                },
                Err(LinkError::Timeout { duration }) => {
                    warn!("Frame request timed out after {:?}, retrying", duration);
                }
                Err(e) => {
                    warn!("Frame request failed: {}", e);
                    if !Self::pause(context.retry_backoff, cancel).await {
                        break;
                    }
                }
            }
        }
        frame_count
    }

    /// Issue `request` until some reply arrives, waiting the backoff between
    /// attempts. `None` once cancelled.
    async fn request_until_reply<E: Exchange>(
        exchange: &mut E,
        request: &Request,
        context: &DriverContext,
        cancel: &CancellationToken,
    ) -> Option<Bytes> {
        let mut attempt = 0u64;
        loop {
            attempt += 1;
            let result = tokio::select! {
                _ = cancel.cancelled() => return None,
                result = exchange.request(request, context.request_timeout) => result,
            };
            match result {
                Ok(reply) => return Some(reply),
                Err(e) => {
                    warn!("'{}' attempt {} failed: {}", request.label, attempt, e);
                    if !Self::pause(context.retry_backoff, cancel).await {
                        return None;
                    }
                }
            }
        }
    }

    /// Sleep for `duration`; `false` if cancelled first.
    async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}
