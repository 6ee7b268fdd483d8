//! TCP plumbing shared by the bus and request/reply sockets

mod multipart;

pub use multipart::{Multipart, MultipartCodec};

use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tracing::debug;

use crate::{LinkError, Result};

/// A TCP stream carrying multipart messages.
pub type MultipartStream = Framed<TcpStream, MultipartCodec>;

/// Connect to `endpoint` and wrap the socket in the multipart codec.
pub(crate) async fn connect(endpoint: &str, max_message_bytes: usize) -> Result<MultipartStream> {
    let stream =
        TcpStream::connect(endpoint).await.map_err(|e| LinkError::connection_io(endpoint, e))?;
    Ok(wrap(stream, endpoint, max_message_bytes))
}

/// Bind a listener on `addr`.
pub(crate) async fn bind(addr: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr).await.map_err(|e| LinkError::connection_io(addr, e))?;
    debug!("Bound {}", addr);
    Ok(listener)
}

/// Wrap an accepted or connected socket.
pub(crate) fn wrap(stream: TcpStream, peer: &str, max_message_bytes: usize) -> MultipartStream {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Could not disable Nagle on {}: {}", peer, e);
    }
    Framed::new(stream, MultipartCodec::new(max_message_bytes))
}
