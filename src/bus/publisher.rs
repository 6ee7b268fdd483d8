//! Bind side of the bus

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{Control, Envelope};
use crate::config::LinkConfig;
use crate::transport::{self, MultipartStream};
use crate::{LinkError, Result};

/// Outcome of offering an envelope to one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Offer {
    Queued,
    NotSubscribed,
    /// Queue at its high-water mark, envelope dropped
    Dropped,
    /// Peer task has exited
    Gone,
}

/// A connected subscriber as seen from the publisher.
struct PeerHandle {
    id: u64,
    addr: SocketAddr,
    /// Topic prefixes; a prefix may appear more than once
    subscriptions: Arc<RwLock<Vec<String>>>,
    outbox: mpsc::Sender<Envelope>,
}

impl PeerHandle {
    fn matches(&self, topic: &str) -> bool {
        self.subscriptions.read().iter().any(|prefix| topic.starts_with(prefix.as_str()))
    }

    fn offer(&self, topic: &str, payload: &Bytes) -> Offer {
        if !self.matches(topic) {
            return Offer::NotSubscribed;
        }
        match self.outbox.try_send(Envelope::new(topic, payload.clone())) {
            Ok(()) => Offer::Queued,
            Err(TrySendError::Full(_)) => Offer::Dropped,
            Err(TrySendError::Closed(_)) => Offer::Gone,
        }
    }
}

type PeerList = Arc<Mutex<Vec<PeerHandle>>>;

/// Publishes envelopes to every subscriber whose subscriptions match.
///
/// Each subscriber gets an outbound queue bounded by
/// [`LinkConfig::send_high_water_mark`]. When that queue is full the new
/// envelope is dropped for that subscriber only.
pub struct Publisher {
    local_addr: SocketAddr,
    peers: PeerList,
    cancel: CancellationToken,
    accept_task: Option<JoinHandle<()>>,
}

impl Publisher {
    /// Bind `addr` and start accepting subscribers.
    pub async fn bind(addr: &str, config: &LinkConfig) -> Result<Self> {
        let listener = transport::bind(addr).await?;
        let local_addr = listener.local_addr().map_err(|e| LinkError::connection_io(addr, e))?;

        let peers: PeerList = Arc::new(Mutex::new(Vec::new()));
        let cancel = CancellationToken::new();
        let accept_task = tokio::spawn(accept_loop(
            listener,
            peers.clone(),
            config.send_high_water_mark,
            config.max_message_bytes,
            cancel.clone(),
        ));

        info!("Publisher bound to {}", local_addr);
        Ok(Self { local_addr, peers, cancel, accept_task: Some(accept_task) })
    }

    /// Queue `payload` on `topic` for every matching subscriber.
    ///
    /// Never blocks. Returns `false` when the publisher is disposed or when a
    /// matching subscriber's queue was full.
    pub fn publish(&self, topic: &str, payload: impl Into<Bytes>) -> bool {
        self.try_publish(topic, payload).is_ok()
    }

    /// Like [`Publisher::publish`] with the reason for a drop.
    pub fn try_publish(&self, topic: &str, payload: impl Into<Bytes>) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(LinkError::Closed);
        }
        let payload = payload.into();

        let mut saturated = false;
        let mut gone = Vec::new();
        {
            let peers = self.peers.lock();
            for peer in peers.iter() {
                match peer.offer(topic, &payload) {
                    Offer::Queued | Offer::NotSubscribed => {}
                    Offer::Dropped => {
                        trace!("Dropping '{}' for {}: queue full", topic, peer.addr);
                        saturated = true;
                    }
                    Offer::Gone => gone.push(peer.id),
                }
            }
        }
        if !gone.is_empty() {
            self.peers.lock().retain(|peer| !gone.contains(&peer.id));
        }

        if saturated { Err(LinkError::Saturated { topic: topic.to_string() }) } else { Ok(()) }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of connected subscribers.
    pub fn peer_count(&self) -> usize {
        self.peers.lock().len()
    }

    /// Stop accepting, disconnect every subscriber and wait for the accept task.
    ///
    /// Later calls do nothing.
    pub async fn dispose(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.accept_task.take() {
            let _ = task.await;
            self.peers.lock().clear();
            info!("Publisher on {} disposed", self.local_addr);
        }
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    peers: PeerList,
    high_water_mark: usize,
    max_message_bytes: usize,
    cancel: CancellationToken,
) {
    let mut next_id = 0u64;
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let (stream, addr) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Accept failed: {}", e);
                continue;
            }
        };

        next_id += 1;
        let (outbox, inbox) = mpsc::channel(high_water_mark);
        let subscriptions = Arc::new(RwLock::new(Vec::new()));
        peers.lock().push(PeerHandle {
            id: next_id,
            addr,
            subscriptions: subscriptions.clone(),
            outbox,
        });
        debug!("Subscriber {} connected from {}", next_id, addr);

        let framed = transport::wrap(stream, &addr.to_string(), max_message_bytes);
        tokio::spawn(peer_task(
            next_id,
            addr,
            framed,
            inbox,
            subscriptions,
            peers.clone(),
            cancel.child_token(),
        ));
    }
    debug!("Accept loop ended");
}

async fn peer_task(
    id: u64,
    addr: SocketAddr,
    mut framed: MultipartStream,
    mut inbox: mpsc::Receiver<Envelope>,
    subscriptions: Arc<RwLock<Vec<String>>>,
    peers: PeerList,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            Some(envelope) = inbox.recv() => {
                if let Err(e) = framed.send(envelope.into_message()).await {
                    debug!("Write to {} failed: {}", addr, e);
                    break;
                }
            }
            message = framed.next() => match message {
                Some(Ok(message)) => match Control::from_message(&message) {
                    Ok(Control::Subscribe(topic)) => {
                        debug!("{} subscribed to '{}'", addr, topic);
                        subscriptions.write().push(topic);
                    }
                    Ok(Control::Unsubscribe(topic)) => {
                        debug!("{} unsubscribed from '{}'", addr, topic);
                        let mut subscriptions = subscriptions.write();
                        if let Some(pos) = subscriptions.iter().position(|t| *t == topic) {
                            subscriptions.remove(pos);
                        }
                    }
                    Err(e) => warn!("Ignoring control message from {}: {}", addr, e),
                },
                Some(Err(e)) => {
                    debug!("Read from {} failed: {}", addr, e);
                    break;
                }
                None => break,
            },
        }
    }

    peers.lock().retain(|peer| peer.id != id);
    debug!("Subscriber {} ({}) disconnected", id, addr);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(capacity: usize, prefixes: &[&str]) -> (PeerHandle, mpsc::Receiver<Envelope>) {
        let (outbox, inbox) = mpsc::channel(capacity);
        let handle = PeerHandle {
            id: 1,
            addr: "127.0.0.1:1".parse().unwrap(),
            subscriptions: Arc::new(RwLock::new(prefixes.iter().map(|p| p.to_string()).collect())),
            outbox,
        };
        (handle, inbox)
    }

    #[test]
    fn prefix_matching() {
        let (handle, _inbox) = peer(1, &["Fr"]);
        assert!(handle.matches("Frame"));
        assert!(!handle.matches("Size"));

        let (everything, _inbox) = peer(1, &[""]);
        assert!(everything.matches("Size"));
    }

    #[test]
    fn full_queue_drops_newest() {
        let (handle, mut inbox) = peer(2, &["Frame"]);
        let payload = |n: u8| Bytes::from(vec![n]);

        assert_eq!(handle.offer("Frame", &payload(1)), Offer::Queued);
        assert_eq!(handle.offer("Frame", &payload(2)), Offer::Queued);
        assert_eq!(handle.offer("Frame", &payload(3)), Offer::Dropped);
        assert_eq!(handle.offer("Size", &payload(4)), Offer::NotSubscribed);

        assert_eq!(inbox.try_recv().unwrap().payload, payload(1));
        assert_eq!(inbox.try_recv().unwrap().payload, payload(2));
        assert!(inbox.try_recv().is_err());
    }

    #[test]
    fn closed_queue_reports_gone() {
        let (handle, inbox) = peer(1, &["Frame"]);
        drop(inbox);
        assert_eq!(handle.offer("Frame", &Bytes::new()), Offer::Gone);
    }

    #[tokio::test]
    async fn publish_without_subscribers_succeeds() {
        let mut publisher = Publisher::bind("127.0.0.1:0", &LinkConfig::default()).await.unwrap();
        assert!(publisher.publish("Frame", Bytes::from_static(b"x")));
        assert_eq!(publisher.peer_count(), 0);

        publisher.dispose().await;
        assert!(!publisher.publish("Frame", Bytes::from_static(b"x")));
        assert!(matches!(publisher.try_publish("Frame", Bytes::new()), Err(LinkError::Closed)));

        // second dispose is a no-op
        publisher.dispose().await;
    }

    #[tokio::test]
    async fn bind_failure_is_a_connection_error() {
        let err = Publisher::bind("256.0.0.1:0", &LinkConfig::default()).await.err().unwrap();
        assert!(matches!(err, LinkError::Connection { .. }));
    }
}
