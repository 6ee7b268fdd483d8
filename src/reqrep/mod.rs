//! Labeled request/reply over multipart messages
//!
//! ```text
//! request: [u32 id][label][payload?]
//! reply:   [u32 id][body]
//! ```
//!
//! The id is echoed back so a client can tell the reply to its current
//! request from one that arrived after an earlier request timed out.

mod client;
mod server;

pub use client::RequestClient;
pub use server::{Replier, RequestHandler};

use bytes::Bytes;

use crate::transport::Multipart;
use crate::types::LookupPart;
use crate::{LinkError, Result};

/// Label of the calibration request
pub const CAMERA: &str = "Camera";
/// Label of the depth/color frame request
pub const FRAME: &str = "Frame";

/// A labeled request with an optional body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub label: String,
    pub payload: Option<Bytes>,
}

impl Request {
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into(), payload: None }
    }

    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn camera() -> Self {
        Self::new(CAMERA)
    }

    pub fn lookup(part: LookupPart) -> Self {
        Self::new(part.label())
    }

    pub fn frame() -> Self {
        Self::new(FRAME)
    }
}

fn encode_id(id: u32) -> Bytes {
    Bytes::copy_from_slice(&id.to_le_bytes())
}

fn decode_id(part: &Bytes, context: &str) -> Result<u32> {
    let raw: [u8; 4] = part.as_ref().try_into().map_err(|_| {
        LinkError::decode(context, format!("id part is {} bytes, expected 4", part.len()))
    })?;
    Ok(u32::from_le_bytes(raw))
}

pub(crate) fn encode_request(id: u32, request: &Request) -> Multipart {
    let mut message = vec![encode_id(id), Bytes::copy_from_slice(request.label.as_bytes())];
    if let Some(payload) = &request.payload {
        message.push(payload.clone());
    }
    message
}

pub(crate) fn decode_request(message: Multipart) -> Result<(u32, Request)> {
    if !(2..=3).contains(&message.len()) {
        return Err(LinkError::decode(
            "request",
            format!("expected 2 or 3 parts, got {}", message.len()),
        ));
    }
    let mut parts = message.into_iter();
    let id = decode_id(&parts.next().unwrap_or_default(), "request")?;
    let label = parts.next().unwrap_or_default();
    let label = String::from_utf8(label.to_vec())
        .map_err(|_| LinkError::decode("request", "label is not valid UTF-8"))?;
    Ok((id, Request { label, payload: parts.next() }))
}

pub(crate) fn encode_reply(id: u32, body: Bytes) -> Multipart {
    vec![encode_id(id), body]
}

pub(crate) fn decode_reply(message: Multipart) -> Result<(u32, Bytes)> {
    let [id, body]: [Bytes; 2] = message.try_into().map_err(|message: Multipart| {
        LinkError::decode("reply", format!("expected 2 parts, got {}", message.len()))
    })?;
    Ok((decode_id(&id, "reply")?, body))
}
