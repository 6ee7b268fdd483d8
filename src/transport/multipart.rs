//! Multipart message framing
//!
//! A message is one or more parts. Each part travels as a length-delimited
//! frame whose first byte carries flags:
//!
//! ```text
//! ┌───────────────────┬───────────┬─────────────────┐
//! │ Length (4 bytes)  │ Flags (1) │ Body (variable) │
//! │ Little-endian u32 │ bit0=MORE │                 │
//! └───────────────────┴───────────┴─────────────────┘
//! ```
//!
//! The length counts the flag byte plus the body. A part with `MORE` set is
//! followed by another part of the same message.

use bytes::{BufMut, Bytes, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

/// A complete multipart message.
pub type Multipart = Vec<Bytes>;

const FLAG_MORE: u8 = 0x01;

/// Codec turning a byte stream into [`Multipart`] messages and back.
#[derive(Debug)]
pub struct MultipartCodec {
    inner: LengthDelimitedCodec,
    pending: Multipart,
    max_message_bytes: usize,
    pending_bytes: usize,
}

impl MultipartCodec {
    /// Create a codec that rejects messages larger than `max_message_bytes`.
    pub fn new(max_message_bytes: usize) -> Self {
        let inner = LengthDelimitedCodec::builder()
            .little_endian()
            .length_field_type::<u32>()
            .max_frame_length(max_message_bytes.saturating_add(1))
            .new_codec();
        Self { inner, pending: Vec::new(), max_message_bytes, pending_bytes: 0 }
    }
}

impl Decoder for MultipartCodec {
    type Item = Multipart;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Multipart>, io::Error> {
        loop {
            let Some(mut frame) = self.inner.decode(src)? else {
                return Ok(None);
            };
            if frame.is_empty() {
                self.pending.clear();
                self.pending_bytes = 0;
                return Err(io::Error::new(io::ErrorKind::InvalidData, "frame without flag byte"));
            }

            let flags = frame[0];
            let body = frame.split_off(1).freeze();
            self.pending_bytes += body.len();
            if self.pending_bytes > self.max_message_bytes {
                self.pending.clear();
                self.pending_bytes = 0;
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("message exceeds {} bytes", self.max_message_bytes),
                ));
            }
            self.pending.push(body);

            if flags & FLAG_MORE == 0 {
                self.pending_bytes = 0;
                return Ok(Some(std::mem::take(&mut self.pending)));
            }
        }
    }
}

impl Encoder<Multipart> for MultipartCodec {
    type Error = io::Error;

    fn encode(&mut self, parts: Multipart, dst: &mut BytesMut) -> Result<(), io::Error> {
        if parts.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty multipart message"));
        }

        let last = parts.len() - 1;
        for (i, part) in parts.into_iter().enumerate() {
            let mut frame = BytesMut::with_capacity(1 + part.len());
            frame.put_u8(if i < last { FLAG_MORE } else { 0 });
            frame.put_slice(&part);
            self.inner.encode(frame.freeze(), dst)?;
        }
        Ok(())
    }
}
