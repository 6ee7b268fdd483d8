//! Topic-filtered publish/subscribe
//!
//! A [`Publisher`] binds one endpoint and fans envelopes out to every
//! connected [`Subscriber`] whose subscriptions match the topic. Delivery is
//! best effort: a slow subscriber loses envelopes instead of slowing the
//! publisher down.
//!
//! ## Wire messages
//!
//! - data: `[topic][payload]`
//! - control, subscriber to publisher: `[0x01 | 0x00, topic...]` (subscribe / unsubscribe)
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use depthlink::{LinkConfig, Publisher, Subscriber};
//!
//! # async fn example() -> depthlink::Result<()> {
//! let config = LinkConfig::default();
//! let publisher = Publisher::bind("127.0.0.1:5556", &config).await?;
//! let subscriber = Subscriber::connect("127.0.0.1:5556", &config).await?;
//!
//! subscriber.add_topic_callback("Size", |payload| {
//!     println!("size message: {} bytes", payload.len());
//! });
//! publisher.publish("Size", depthlink::codec::encode_size(1920, 1080)?);
//! # Ok(())
//! # }
//! ```

mod publisher;
mod subscriber;

pub use publisher::Publisher;
pub use subscriber::{Subscriber, TopicHandler};

use bytes::{BufMut, Bytes, BytesMut};

use crate::transport::Multipart;
use crate::{LinkError, Result};

const CONTROL_SUBSCRIBE: u8 = 0x01;
const CONTROL_UNSUBSCRIBE: u8 = 0x00;

/// A topic and its opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub topic: String,
    pub payload: Bytes,
}

impl Envelope {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self { topic: topic.into(), payload: payload.into() }
    }

    pub(crate) fn into_message(self) -> Multipart {
        vec![Bytes::from(self.topic.into_bytes()), self.payload]
    }

    pub(crate) fn from_message(mut message: Multipart) -> Result<Self> {
        if message.len() != 2 {
            return Err(LinkError::decode(
                "bus envelope",
                format!("expected 2 parts, got {}", message.len()),
            ));
        }
        let payload = message.pop().unwrap_or_default();
        let topic = message.pop().unwrap_or_default();
        let topic = String::from_utf8(topic.to_vec())
            .map_err(|_| LinkError::decode("bus envelope", "topic is not valid UTF-8"))?;
        Ok(Self { topic, payload })
    }
}

/// Subscription change sent from a subscriber to the publisher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Control {
    Subscribe(String),
    Unsubscribe(String),
}

impl Control {
    pub(crate) fn into_message(self) -> Multipart {
        let (flag, topic) = match self {
            Control::Subscribe(topic) => (CONTROL_SUBSCRIBE, topic),
            Control::Unsubscribe(topic) => (CONTROL_UNSUBSCRIBE, topic),
        };
        let mut buf = BytesMut::with_capacity(1 + topic.len());
        buf.put_u8(flag);
        buf.put_slice(topic.as_bytes());
        vec![buf.freeze()]
    }

    pub(crate) fn from_message(message: &Multipart) -> Result<Self> {
        let [frame] = message.as_slice() else {
            return Err(LinkError::decode(
                "bus control",
                format!("expected 1 part, got {}", message.len()),
            ));
        };
        let Some((&flag, topic)) = frame.split_first() else {
            return Err(LinkError::decode("bus control", "empty control frame"));
        };
        let topic = std::str::from_utf8(topic)
            .map_err(|_| LinkError::decode("bus control", "topic is not valid UTF-8"))?
            .to_string();
        match flag {
            CONTROL_SUBSCRIBE => Ok(Control::Subscribe(topic)),
            CONTROL_UNSUBSCRIBE => Ok(Control::Unsubscribe(topic)),
            other => Err(LinkError::decode("bus control", format!("unknown flag {:#04x}", other))),
        }
    }
}
