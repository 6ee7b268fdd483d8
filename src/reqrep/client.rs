//! Request side of request/reply

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, trace, warn};

use super::{Request, decode_reply, encode_request};
use crate::config::LinkConfig;
use crate::exchange::Exchange;
use crate::transport::{self, MultipartStream};
use crate::{LinkError, Result};

/// Network client for labeled requests.
///
/// A broken connection is dropped and re-established on the next request.
pub struct RequestClient {
    endpoint: String,
    max_message_bytes: usize,
    stream: Option<MultipartStream>,
    next_id: u32,
}

impl RequestClient {
    /// Connect to a replier at `endpoint`.
    pub async fn connect(endpoint: &str, config: &LinkConfig) -> Result<Self> {
        let stream = transport::connect(endpoint, config.max_message_bytes).await?;
        info!("Request client connected to {}", endpoint);
        Ok(Self {
            endpoint: endpoint.to_string(),
            max_message_bytes: config.max_message_bytes,
            stream: Some(stream),
            next_id: 0,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn broken(&mut self, reason: impl Into<String>) -> LinkError {
        self.stream = None;
        LinkError::Connection { endpoint: self.endpoint.clone(), reason: reason.into(), source: None }
    }

    /// Send `request` and wait up to `timeout` for the reply carrying its id.
    pub async fn request(&mut self, request: &Request, timeout: Duration) -> Result<Bytes> {
        let deadline = Instant::now() + timeout;
        self.next_id = self.next_id.wrapping_add(1);
        let id = self.next_id;

        if self.stream.is_none() {
            debug!("Reconnecting to {}", self.endpoint);
            let stream = timeout_at(deadline, transport::connect(&self.endpoint, self.max_message_bytes))
                .await
                .map_err(|_| LinkError::Timeout { duration: timeout })??;
            self.stream = Some(stream);
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(LinkError::Closed);
        };

        trace!("Request {} '{}'", id, request.label);
        match timeout_at(deadline, stream.send(encode_request(id, request))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(self.broken(format!("send failed: {}", e))),
            Err(_) => {
                // A partly written request leaves the stream unusable
                warn!("Request {} to {} not sent within {:?}", id, self.endpoint, timeout);
                self.broken("send timed out");
                return Err(LinkError::Timeout { duration: timeout });
            }
        }

        loop {
            let Some(stream) = self.stream.as_mut() else {
                return Err(LinkError::Closed);
            };
            let received = match timeout_at(deadline, stream.next()).await {
                Ok(received) => received,
                Err(_) => return Err(LinkError::Timeout { duration: timeout }),
            };
            let message = match received {
                Some(Ok(message)) => message,
                Some(Err(e)) => return Err(self.broken(format!("receive failed: {}", e))),
                None => return Err(self.broken("replier closed the connection")),
            };

            match decode_reply(message) {
                Ok((reply_id, body)) if reply_id == id => return Ok(body),
                Ok((reply_id, _)) => debug!("Discarding stale reply {} (waiting for {})", reply_id, id),
                Err(e) => warn!("Discarding malformed reply from {}: {}", self.endpoint, e),
            }
        }
    }
}

#[async_trait::async_trait]
impl Exchange for RequestClient {
    async fn request(&mut self, request: &Request, timeout: Duration) -> Result<Bytes> {
        RequestClient::request(self, request, timeout).await
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}
