//! Reply side of request/reply

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{Request, decode_request, encode_reply};
use crate::config::LinkConfig;
use crate::transport::{self, MultipartStream};
use crate::{LinkError, Result};

/// Produces the reply body for a request; `None` sends no reply at all.
pub type RequestHandler = Arc<dyn Fn(&Request) -> Option<Bytes> + Send + Sync>;

/// Answers labeled requests from any number of clients.
pub struct Replier {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    accept_task: Option<JoinHandle<()>>,
}

impl Replier {
    /// Bind `addr` and answer every request with `handler`.
    pub async fn bind<F>(addr: &str, config: &LinkConfig, handler: F) -> Result<Self>
    where
        F: Fn(&Request) -> Option<Bytes> + Send + Sync + 'static,
    {
        let listener = transport::bind(addr).await?;
        let local_addr = listener.local_addr().map_err(|e| LinkError::connection_io(addr, e))?;
        let cancel = CancellationToken::new();

        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::new(handler),
            config.max_message_bytes,
            cancel.clone(),
        ));

        info!("Replier bound to {}", local_addr);
        Ok(Self { local_addr, cancel, accept_task: Some(accept_task) })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and close every client connection. Later calls do nothing.
    pub async fn dispose(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.accept_task.take() {
            let _ = task.await;
            info!("Replier on {} disposed", self.local_addr);
        }
    }
}

impl Drop for Replier {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    handler: RequestHandler,
    max_message_bytes: usize,
    cancel: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, addr)) => {
                debug!("Request client connected from {}", addr);
                let framed = transport::wrap(stream, &addr.to_string(), max_message_bytes);
                tokio::spawn(serve(addr, framed, handler.clone(), cancel.child_token()));
            }
            Err(e) => warn!("Accept failed: {}", e),
        }
    }
}

async fn serve(
    addr: SocketAddr,
    mut framed: MultipartStream,
    handler: RequestHandler,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = framed.next() => message,
        };
        let message = match message {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                debug!("Read from {} failed: {}", addr, e);
                break;
            }
            None => break,
        };

        let (id, request) = match decode_request(message) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Ignoring request from {}: {}", addr, e);
                continue;
            }
        };

        match handler(&request) {
            Some(body) => {
                trace!("Reply {} '{}' ({} bytes)", id, request.label, body.len());
                if let Err(e) = framed.send(encode_reply(id, body)).await {
                    debug!("Write to {} failed: {}", addr, e);
                    break;
                }
            }
            None => trace!("No reply for {} '{}'", id, request.label),
        }
    }
    debug!("Request client {} disconnected", addr);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reqrep::RequestClient;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn echoes_labels() {
        let config = LinkConfig::default();
        let mut replier = Replier::bind("127.0.0.1:0", &config, |request: &Request| {
            Some(Bytes::from(request.label.clone()))
        })
        .await
        .unwrap();

        let endpoint = replier.local_addr().to_string();
        let mut client = RequestClient::connect(&endpoint, &config).await.unwrap();
        let reply = client.request(&Request::camera(), Duration::from_secs(1)).await.unwrap();
        assert_eq!(reply.as_ref(), b"Camera");

        replier.dispose().await;
        replier.dispose().await;
    }

    #[tokio::test]
    async fn silent_handler_times_out_then_recovers() {
        let config = LinkConfig::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let replier = Replier::bind("127.0.0.1:0", &config, move |request: &Request| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n == 0 { None } else { Some(Bytes::from(format!("{}#{}", request.label, n))) }
        })
        .await
        .unwrap();

        let endpoint = replier.local_addr().to_string();
        let mut client = RequestClient::connect(&endpoint, &config).await.unwrap();

        let err = client.request(&Request::frame(), Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(err, LinkError::Timeout { .. }));

        let reply = client.request(&Request::frame(), Duration::from_secs(1)).await.unwrap();
        assert_eq!(reply.as_ref(), b"Frame#1");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn client_skips_replies_to_other_ids() {
        let listener = transport::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (stream, addr) = listener.accept().await.unwrap();
            let mut framed = transport::wrap(stream, &addr.to_string(), 1024);
            let message = framed.next().await.unwrap().unwrap();
            let (id, _) = decode_request(message).unwrap();

            framed.send(encode_reply(id.wrapping_sub(1), Bytes::from_static(b"late"))).await.unwrap();
            framed.send(encode_reply(id, Bytes::from_static(b"fresh"))).await.unwrap();
        });

        let mut client = RequestClient::connect(&endpoint, &LinkConfig::default()).await.unwrap();
        let reply = client.request(&Request::camera(), Duration::from_secs(1)).await.unwrap();
        assert_eq!(reply.as_ref(), b"fresh");
    }

    #[tokio::test]
    async fn stalled_replier_times_out_the_send() {
        let listener = transport::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();
        let (release, hold) = tokio::sync::oneshot::channel::<()>();

        // Accept but never read, so the socket buffers fill up
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let _ = hold.await;
            drop(stream);
        });

        let mut client = RequestClient::connect(&endpoint, &LinkConfig::default()).await.unwrap();
        let request = Request::frame().with_payload(vec![0u8; 32 * 1024 * 1024]);

        let start = std::time::Instant::now();
        let err = client.request(&request, Duration::from_millis(300)).await.unwrap_err();
        assert!(matches!(err, LinkError::Timeout { .. }), "got {:?}", err);
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(!client.is_connected());

        let _ = release.send(());
    }

    #[tokio::test]
    async fn closed_replier_is_a_connection_error() {
        let listener = transport::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let mut client = RequestClient::connect(&endpoint, &LinkConfig::default()).await.unwrap();
        let err = client.request(&Request::camera(), Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, LinkError::Connection { .. }));
        assert!(!client.is_connected());
    }
}
