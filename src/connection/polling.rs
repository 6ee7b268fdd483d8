//! Request/reply session with the capture host

use futures::{Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::LinkConfig;
use crate::driver::{Driver, DriverContext, SessionData};
use crate::exchange::Exchange;
use crate::frame_buffer::{FrameBuffer, FrameSnapshot};
use crate::latency::LatencyTracker;
use crate::reqrep::RequestClient;
use crate::stream::ThrottleExt;
use crate::types::{CalibrationRecord, Image, LinkState, LookupTable, UpdateRate};
use crate::{LinkError, Result};

/// Polling connection to a capture host
///
/// Owns one background task that bootstraps calibration and lookup data and
/// then polls frames into a [`FrameBuffer`] for as long as the connection lives.
pub struct PollingConnection {
    /// State watch receiver
    state: watch::Receiver<LinkState>,

    /// Calibration and lookup table once bootstrap has produced them
    session: Arc<SessionData>,

    frames: Arc<FrameBuffer>,
    latency: LatencyTracker,

    /// Cancellation token for stopping the task
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PollingConnection {
    /// Connect to the request endpoint named by `config`.
    ///
    /// Fails only if the initial TCP connect fails; everything after that is
    /// retried in the background.
    pub async fn connect(config: &LinkConfig) -> Result<Self> {
        let endpoint = config.request_endpoint();
        info!("Connecting to capture host at {}", endpoint);
        let client = RequestClient::connect(&endpoint, config).await?;
        Ok(Self::with_exchange(client, config))
    }

    /// Run a session over any exchange.
    pub fn with_exchange<E: Exchange>(exchange: E, config: &LinkConfig) -> Self {
        let session = Arc::new(SessionData::default());
        let frames = Arc::new(FrameBuffer::new());
        let latency = LatencyTracker::from_config(config);

        let channels = Driver::spawn(
            exchange,
            DriverContext {
                request_timeout: config.request_timeout(),
                retry_backoff: config.retry_backoff(),
                frames: frames.clone(),
                latency: latency.clone(),
                session: session.clone(),
            },
        );

        Self {
            state: channels.state,
            session,
            frames,
            latency,
            cancel: channels.cancel,
            task: Some(channels.task),
        }
    }

    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// Current state followed by every transition.
    pub fn state_updates(&self) -> impl Stream<Item = LinkState> + 'static {
        WatchStream::new(self.state.clone())
    }

    /// Wait until bootstrap has finished.
    pub async fn wait_for_streaming(&self, timeout: Duration) -> Result<()> {
        let mut state = self.state.clone();
        match tokio::time::timeout(timeout, state.wait_for(|s| *s == LinkState::Streaming)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(LinkError::Closed),
            Err(_) => Err(LinkError::Timeout { duration: timeout }),
        }
    }

    /// Calibration from the `Camera` reply, once received.
    pub fn calibration(&self) -> Option<CalibrationRecord> {
        self.session.calibration.get().copied()
    }

    /// Reassembled lookup table, once all three parts are validated.
    pub fn lookup_table(&self) -> Option<LookupTable> {
        self.session.lookup.get().cloned()
    }

    /// Newest depth image at depth resolution.
    pub fn latest_depth_frame(&self) -> Option<Image> {
        let calibration = self.calibration()?;
        let snapshot = self.frames.snapshot();
        (snapshot.sequence > 0).then(|| {
            Image::new(snapshot.depth, calibration.depth_width, calibration.depth_height)
        })
    }

    /// Newest color image registered into depth space (infrared resolution).
    pub fn latest_color_frame(&self) -> Option<Image> {
        let calibration = self.calibration()?;
        let snapshot = self.frames.snapshot();
        (snapshot.sequence > 0)
            .then(|| Image::new(snapshot.color, calibration.ir_width, calibration.ir_height))
    }

    /// Stream of frame snapshots, newest wins.
    ///
    /// With [`UpdateRate::Max`] at most one snapshot is yielded per interval;
    /// frames stored in between are skipped.
    pub fn frame_updates(&self, rate: UpdateRate) -> impl Stream<Item = FrameSnapshot> + 'static {
        let frames = self.frames.clone();
        let snapshots = WatchStream::from_changes(self.frames.subscribe())
            .map(move |_| frames.snapshot());

        match rate.throttle_interval() {
            None => snapshots.boxed(),
            Some(interval) => snapshots.throttle(interval).boxed(),
        }
    }

    /// The slot the session task writes into.
    pub fn frames(&self) -> &Arc<FrameBuffer> {
        &self.frames
    }

    pub fn latency(&self) -> &LatencyTracker {
        &self.latency
    }

    /// Stop the session task and wait for it to finish. Later calls do nothing.
    pub async fn dispose(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                debug!("Session task ended abnormally: {}", e);
            }
            self.latency.sync_log().await;
            info!("Polling connection disposed");
        }
    }
}

impl Drop for PollingConnection {
    fn drop(&mut self) {
        debug!("Dropping polling connection");
        self.cancel.cancel();
    }
}
