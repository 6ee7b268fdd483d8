//! Collaborator-facing connections
//!
//! - [`PollingConnection`] runs the request/reply bootstrap and frame polling
//! - [`ColorFeed`] consumes color frames published on the bus
//!
//! Both write into a [`FrameBuffer`](crate::FrameBuffer); readers copy out
//! the newest frame whenever they are ready for one.

mod feed;
mod polling;

pub use feed::{ColorFeed, FRAME_TOPIC, SIZE_TOPIC};
pub use polling::PollingConnection;

#[cfg(test)]
mod tests;
