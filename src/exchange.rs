//! Exchange trait for request/reply channels

use bytes::Bytes;
use std::time::Duration;

use crate::reqrep::Request;
use crate::Result;

/// A half-duplex call/response channel
///
/// Exchanges abstract over where replies come from (a network
/// [`RequestClient`](crate::RequestClient) or a scripted double in tests).
/// `&mut self` keeps exactly one request in flight.
#[async_trait::async_trait]
pub trait Exchange: Send + 'static {
    /// Send `request` and wait up to `timeout` for its reply
    ///
    /// Returns:
    /// - `Ok(body)` - The reply to this request
    /// - `Err(LinkError::Timeout)` - No reply before the deadline
    /// - `Err(LinkError::Connection)` - The channel broke; the next call reconnects
    async fn request(&mut self, request: &Request, timeout: Duration) -> Result<Bytes>;

    /// Where requests go, for logging
    fn endpoint(&self) -> &str;
}
