//! Connection halves produced by drivers

use tokio::io::{AsyncRead, AsyncWrite};

/// Boxed read half of a connection
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Boxed write half of a connection
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// One bidirectional byte stream between a publisher and a subscriber
pub struct Connection {
    /// Incoming bytes
    pub reader: BoxedReader,
    /// Outgoing bytes
    pub writer: BoxedWriter,
    /// Human readable description of the other end
    pub peer: String,
}

impl Connection {
    /// Create a connection from its two halves
    pub fn new<R, W>(reader: R, writer: W, peer: impl Into<String>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            peer: peer.into(),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").field("peer", &self.peer).finish()
    }
}
