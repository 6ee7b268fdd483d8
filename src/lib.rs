//! Low-latency transport for depth and color sensor frames.
//!
//! depthlink moves calibration data and live depth/color frames from a
//! capture host to consumers on the local network. Consumers always see the
//! freshest frame; anything older that could not be delivered in time is
//! dropped rather than queued.
//!
//! # Features
//!
//! - **Request/Reply**: bootstrap handshake (`Camera`, `Lookup1..3`) followed by frame polling
//! - **Publish/Subscribe**: topic-filtered bus with high-water marks on both ends
//! - **Wire Codec**: bit-exact little-endian payload layouts
//! - **Latency**: per-frame delay history and an optional CSV delay log
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use depthlink::{DepthLink, LinkConfig, UpdateRate};
//! use futures::StreamExt;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> depthlink::Result<()> {
//!     let config = LinkConfig::default();
//!     let connection = DepthLink::poll(&config).await?;
//!     connection.wait_for_streaming(Duration::from_secs(10)).await?;
//!
//!     let mut frames = Box::pin(connection.frame_updates(UpdateRate::Max(30)));
//!     while let Some(frame) = frames.next().await {
//!         println!("frame {}: {} depth bytes", frame.sequence, frame.depth.len());
//!     }
//!     Ok(())
//! }
//! ```

// Core types and error handling
pub mod codec;
pub mod config;
mod error;
pub mod types;

// Messaging substrate
pub mod bus;
pub mod reqrep;
pub mod transport;

// Session machinery
pub mod connection;
pub mod driver;
pub mod exchange;
pub mod frame_buffer;
pub mod host;
pub mod latency;
pub mod stream;

// Core exports
pub use config::LinkConfig;
pub use error::*;
pub use types::*;

// Main API exports
pub use bus::{Envelope, Publisher, Subscriber};
pub use connection::{ColorFeed, PollingConnection};
pub use exchange::Exchange;
pub use frame_buffer::{FrameBuffer, FrameSnapshot};
pub use host::CaptureHost;
pub use latency::{DelaySample, DelaySummary, LatencyTracker};
pub use reqrep::{Replier, Request, RequestClient};

/// Unified entry point for consumer connections.
///
/// # Examples
///
/// ## Polling a capture host
/// ```rust,no_run
/// use depthlink::{DepthLink, LinkConfig};
///
/// #[tokio::main]
/// async fn main() -> depthlink::Result<()> {
///     let connection = DepthLink::poll(&LinkConfig::default()).await?;
///     // Use connection...
///     Ok(())
/// }
/// ```
///
/// ## Listening on the bus
/// ```rust,no_run
/// use depthlink::{DepthLink, LinkConfig};
///
/// #[tokio::main]
/// async fn main() -> depthlink::Result<()> {
///     let subscriber = DepthLink::subscribe(&LinkConfig::default()).await?;
///     subscriber.add_topic_callback("Size", |payload| println!("{} bytes", payload.len()));
///     Ok(())
/// }
/// ```
pub struct DepthLink;

impl DepthLink {
    /// Start a polling session against `config.request_endpoint()`.
    ///
    /// # Errors
    ///
    /// Returns a `Connection` error if the request endpoint cannot be
    /// reached. Later failures are retried in the background.
    pub async fn poll(config: &LinkConfig) -> Result<PollingConnection> {
        config.validate()?;
        PollingConnection::connect(config).await
    }

    /// Connect a subscriber to `config.bus_endpoint()`.
    pub async fn subscribe(config: &LinkConfig) -> Result<Subscriber> {
        config.validate()?;
        Subscriber::connect(&config.bus_endpoint(), config).await
    }
}
