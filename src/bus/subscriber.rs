//! Connect side of the bus
//!
//! One listener task owns the socket. Callers never touch it: topic changes
//! travel to the listener over an unbounded command channel and are applied
//! between receives.

use bytes::Bytes;
use futures::{FutureExt, SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{Control, Envelope};
use crate::config::LinkConfig;
use crate::transport::{self, MultipartStream};
use crate::Result;

/// Callback run on the listener task for every envelope on its topic.
pub type TopicHandler = Box<dyn FnMut(Bytes) + Send + 'static>;

/// Upper bound on one receive attempt before commands are checked again.
const RECEIVE_TIMEOUT: Duration = Duration::from_millis(100);

enum Command {
    Subscribe { topic: String, handler: TopicHandler },
    Unsubscribe { topic: String },
}

/// Receives envelopes for a runtime-changeable set of topics.
pub struct Subscriber {
    endpoint: String,
    commands: mpsc::UnboundedSender<Command>,
    topics: Mutex<HashSet<String>>,
    cancel: CancellationToken,
    listener: Option<JoinHandle<()>>,
}

impl Subscriber {
    /// Connect to a publisher at `endpoint` and start the listener task.
    pub async fn connect(endpoint: &str, config: &LinkConfig) -> Result<Self> {
        let stream = transport::connect(endpoint, config.max_message_bytes).await?;
        info!("Subscriber connected to {}", endpoint);

        let (commands, command_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let listener = Listener {
            endpoint: endpoint.to_string(),
            stream: Some(stream),
            commands: command_rx,
            handlers: HashMap::new(),
            backlog: Backlog::new(config.receive_high_water_mark),
            reconnect_interval: config.reconnect_interval(),
            max_message_bytes: config.max_message_bytes,
            cancel: cancel.clone(),
        };
        let listener = tokio::spawn(listener.run());

        Ok(Self {
            endpoint: endpoint.to_string(),
            commands,
            topics: Mutex::new(HashSet::new()),
            cancel,
            listener: Some(listener),
        })
    }

    /// Run `handler` for every envelope on `topic`, replacing any earlier handler.
    ///
    /// Takes effect once the listener has applied the subscription.
    pub fn add_topic_callback<F>(&self, topic: &str, handler: F)
    where
        F: FnMut(Bytes) + Send + 'static,
    {
        self.topics.lock().insert(topic.to_string());
        let command = Command::Subscribe { topic: topic.to_string(), handler: Box::new(handler) };
        if self.commands.send(command).is_err() {
            debug!("Listener for {} is gone, subscription to '{}' ignored", self.endpoint, topic);
        }
    }

    /// Drop the handler for `topic`; returns `false` if none was registered.
    pub fn remove_topic(&self, topic: &str) -> bool {
        if !self.topics.lock().remove(topic) {
            debug!("Not subscribed to '{}'", topic);
            return false;
        }
        if self.commands.send(Command::Unsubscribe { topic: topic.to_string() }).is_err() {
            debug!("Listener for {} is gone, unsubscribe from '{}' ignored", self.endpoint, topic);
        }
        true
    }

    /// Topics with a registered handler.
    pub fn topics(&self) -> Vec<String> {
        self.topics.lock().iter().cloned().collect()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Stop the listener and release the connection. Later calls do nothing.
    pub async fn dispose(&mut self) {
        self.cancel.cancel();
        if let Some(listener) = self.listener.take() {
            if let Err(e) = listener.await {
                debug!("Listener ended abnormally: {}", e);
            }
            info!("Subscriber to {} disposed", self.endpoint);
        }
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Received envelopes waiting for dispatch, oldest dropped first.
#[derive(Debug)]
struct Backlog {
    queue: VecDeque<Envelope>,
    capacity: usize,
    dropped: u64,
}

impl Backlog {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { queue: VecDeque::with_capacity(capacity), capacity, dropped: 0 }
    }

    fn push(&mut self, envelope: Envelope) {
        if self.queue.len() == self.capacity {
            self.queue.pop_front();
            self.dropped += 1;
        }
        self.queue.push_back(envelope);
    }

    fn pop(&mut self) -> Option<Envelope> {
        self.queue.pop_front()
    }

    fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn clear(&mut self) {
        self.queue.clear();
    }
}

struct Listener {
    endpoint: String,
    stream: Option<MultipartStream>,
    commands: mpsc::UnboundedReceiver<Command>,
    handlers: HashMap<String, TopicHandler>,
    backlog: Backlog,
    reconnect_interval: Duration,
    max_message_bytes: usize,
    cancel: CancellationToken,
}

impl Listener {
    async fn run(mut self) {
        debug!("Listener for {} started", self.endpoint);

        while !self.cancel.is_cancelled() {
            if !self.apply_pending_commands().await {
                break;
            }

            if self.stream.is_none() {
                self.reconnect().await;
                continue;
            }

            if self.backlog.is_empty() && !self.receive().await {
                break;
            }

            if let Some(envelope) = self.backlog.pop() {
                self.dispatch(envelope);
            }
        }

        if self.backlog.dropped > 0 {
            debug!("Listener for {} dropped {} stale envelopes", self.endpoint, self.backlog.dropped);
        }
        debug!("Listener for {} ended", self.endpoint);
    }

    /// Apply queued commands; `false` once every sender is gone.
    async fn apply_pending_commands(&mut self) -> bool {
        loop {
            match self.commands.try_recv() {
                Ok(command) => self.apply(command).await,
                Err(mpsc::error::TryRecvError::Empty) => return true,
                Err(mpsc::error::TryRecvError::Disconnected) => return false,
            }
        }
    }

    async fn apply(&mut self, command: Command) {
        let control = match command {
            Command::Subscribe { topic, handler } => {
                let replaced = self.handlers.insert(topic.clone(), handler).is_some();
                if replaced {
                    // The publisher already has this subscription
                    return;
                }
                Control::Subscribe(topic)
            }
            Command::Unsubscribe { topic } => {
                if self.handlers.remove(&topic).is_none() {
                    return;
                }
                Control::Unsubscribe(topic)
            }
        };
        self.send_control(control).await;
    }

    async fn send_control(&mut self, control: Control) {
        let Some(stream) = self.stream.as_mut() else {
            // Replayed on reconnect
            return;
        };
        if let Err(e) = stream.send(control.into_message()).await {
            warn!("Lost connection to {} while updating subscriptions: {}", self.endpoint, e);
            self.stream = None;
        }
    }

    /// Wait up to [`RECEIVE_TIMEOUT`] for envelopes and buffer every one
    /// already readable. Returns `false` when the listener must stop.
    async fn receive(&mut self) -> bool {
        let Some(stream) = self.stream.as_mut() else {
            return true;
        };

        let first = tokio::select! {
            _ = self.cancel.cancelled() => return false,
            command = self.commands.recv() => {
                match command {
                    Some(command) => self.apply(command).await,
                    None => return false,
                }
                return true;
            }
            _ = tokio::time::sleep(RECEIVE_TIMEOUT) => return true,
            message = stream.next() => message,
        };

        let mut next = first;
        loop {
            match next {
                Some(Ok(message)) => match Envelope::from_message(message) {
                    Ok(envelope) => self.backlog.push(envelope),
                    Err(e) => warn!("Discarding envelope from {}: {}", self.endpoint, e),
                },
                Some(Err(e)) => {
                    warn!("Receive from {} failed: {}", self.endpoint, e);
                    self.drop_connection();
                    return true;
                }
                None => {
                    info!("Publisher at {} closed the connection", self.endpoint);
                    self.drop_connection();
                    return true;
                }
            }

            let Some(stream) = self.stream.as_mut() else {
                return true;
            };
            match stream.next().now_or_never() {
                Some(message) => next = message,
                None => return true,
            }
        }
    }

    fn dispatch(&mut self, envelope: Envelope) {
        let Some(handler) = self.handlers.get_mut(&envelope.topic) else {
            trace!("No handler for '{}'", envelope.topic);
            return;
        };
        let payload = envelope.payload;
        if catch_unwind(AssertUnwindSafe(|| handler(payload))).is_err() {
            warn!("Handler for '{}' panicked", envelope.topic);
        }
    }

    fn drop_connection(&mut self) {
        self.stream = None;
        self.backlog.clear();
    }

    /// Wait the reconnect interval, connect, and replay subscriptions.
    async fn reconnect(&mut self) {
        tokio::select! {
            _ = self.cancel.cancelled() => return,
            _ = tokio::time::sleep(self.reconnect_interval) => {}
        }

        match transport::connect(&self.endpoint, self.max_message_bytes).await {
            Ok(stream) => {
                info!("Reconnected to {}", self.endpoint);
                self.stream = Some(stream);
                let topics: Vec<String> = self.handlers.keys().cloned().collect();
                for topic in topics {
                    self.send_control(Control::Subscribe(topic)).await;
                }
            }
            Err(e) => debug!("Reconnect to {} failed: {}", self.endpoint, e),
        }
    }
}
