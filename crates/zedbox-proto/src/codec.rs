//! Length-prefixed frame codec for async streams

use crate::{BusMessage, Frame, ProtocolError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame size (16MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Frame codec for one direction pair of a bus connection.
///
/// Outgoing frames are numbered by the codec; incoming frames are checked
/// to arrive in strictly increasing order.
pub struct FrameCodec {
    /// Read buffer for incoming data
    read_buf: BytesMut,
    /// Maximum frame size allowed
    max_frame_size: usize,
    /// Sequence assigned to the next outgoing frame
    next_sequence: u64,
    /// Sequence of the last frame received
    last_received: Option<u64>,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    /// Create a new frame codec with default settings
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }

    /// Create a new frame codec with custom max frame size
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            read_buf: BytesMut::with_capacity(8192),
            max_frame_size,
            next_sequence: 0,
            last_received: None,
        }
    }

    /// Encode a frame to bytes with length prefix
    pub fn encode_frame(&self, frame: &Frame) -> Result<Bytes, ProtocolError> {
        let frame_bytes = frame.to_msgpack()?;

        if frame_bytes.len() > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: frame_bytes.len(),
                max: self.max_frame_size,
            });
        }

        let mut buf = BytesMut::with_capacity(4 + frame_bytes.len());
        buf.put_u32(frame_bytes.len() as u32);
        buf.put_slice(&frame_bytes);

        Ok(buf.freeze())
    }

    /// Write a frame to an async writer
    pub async fn write_frame<W>(&self, writer: &mut W, frame: &Frame) -> Result<(), ProtocolError>
    where
        W: AsyncWrite + Unpin,
    {
        let encoded = self.encode_frame(frame)?;
        writer.write_all(&encoded).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Wrap a message in the next data frame and write it
    pub async fn send<W>(&mut self, writer: &mut W, message: &BusMessage) -> Result<(), ProtocolError>
    where
        W: AsyncWrite + Unpin,
    {
        let frame = Frame::data(self.take_sequence(), message.to_payload()?);
        self.write_frame(writer, &frame).await
    }

    /// Tell the peer no more frames follow
    pub async fn send_end<W>(&mut self, writer: &mut W) -> Result<(), ProtocolError>
    where
        W: AsyncWrite + Unpin,
    {
        let frame = Frame::end_stream(self.take_sequence());
        self.write_frame(writer, &frame).await
    }

    /// Report a failure to the peer
    pub async fn send_error<W>(&mut self, writer: &mut W, reason: &str) -> Result<(), ProtocolError>
    where
        W: AsyncWrite + Unpin,
    {
        let frame = Frame::error(self.take_sequence(), reason);
        self.write_frame(writer, &frame).await
    }

    /// Read the next message.
    ///
    /// Returns `Ok(None)` on a clean end of stream, either EOF on a frame
    /// boundary or an explicit end-of-stream frame.
    pub async fn recv<R>(&mut self, reader: &mut R) -> Result<Option<BusMessage>, ProtocolError>
    where
        R: AsyncRead + Unpin,
    {
        let Some(frame) = self.read_frame(reader).await? else {
            return Ok(None);
        };
        if let Some(reason) = frame.error_reason() {
            return Err(ProtocolError::Peer(reason));
        }
        if frame.is_end_stream() {
            return Ok(None);
        }
        BusMessage::from_payload(&frame.payload).map(Some)
    }

    /// Read a frame from an async reader
    pub async fn read_frame<R>(&mut self, reader: &mut R) -> Result<Option<Frame>, ProtocolError>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            if let Some(frame) = self.try_decode_frame()? {
                return Ok(Some(frame));
            }

            let mut temp_buf = [0u8; 8192];
            let n = reader.read(&mut temp_buf).await?;

            if n == 0 {
                if self.read_buf.is_empty() {
                    return Ok(None);
                } else {
                    return Err(ProtocolError::InvalidFrame);
                }
            }

            self.read_buf.extend_from_slice(&temp_buf[..n]);
        }
    }

    /// Try to decode a frame from the internal buffer
    pub fn try_decode_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        if self.read_buf.len() < 4 {
            return Ok(None);
        }

        // Peek the length prefix without consuming it
        let frame_len = (&self.read_buf[..4]).get_u32() as usize;

        if frame_len > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: frame_len,
                max: self.max_frame_size,
            });
        }

        if self.read_buf.len() < 4 + frame_len {
            return Ok(None);
        }

        self.read_buf.advance(4);
        let frame_data = self.read_buf.split_to(frame_len);
        let frame = Frame::from_msgpack(&frame_data)?;

        if let Some(last) = self.last_received {
            if frame.sequence <= last {
                return Err(ProtocolError::InvalidFrame);
            }
        }
        self.last_received = Some(frame.sequence);

        Ok(Some(frame))
    }

    /// Get the current buffer size
    pub fn buffer_size(&self) -> usize {
        self.read_buf.len()
    }

    fn take_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }
}
