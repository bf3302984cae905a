//! Frame structure and serialization

use serde::{Deserialize, Serialize};
use bytes::Bytes;
use crate::ProtocolError;

/// Frame flags for protocol control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameFlags(pub u8);

impl FrameFlags {
    /// No special flags
    pub const NONE: Self = Self(0);
    /// Sender is going away; no further frames follow
    pub const END_STREAM: Self = Self(1);
    /// Payload carries an error string instead of a message
    pub const ERROR: Self = Self(2);

    /// Check if a flag is set
    pub fn has_flag(self, flag: FrameFlags) -> bool {
        (self.0 & flag.0) != 0
    }

    /// Set a flag
    pub fn set_flag(&mut self, flag: FrameFlags) {
        self.0 |= flag.0;
    }
}

/// A single unit on a bus connection.
///
/// Each connection carries exactly one topic, so frames only need a
/// per-connection sequence number to detect drops and reordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    /// Sequence number, strictly increasing per connection
    pub sequence: u64,
    /// Frame flags
    pub flags: FrameFlags,
    /// Frame payload
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame
    pub fn new(sequence: u64, flags: FrameFlags, payload: Bytes) -> Self {
        Self { sequence, flags, payload }
    }

    /// Create a data frame
    pub fn data(sequence: u64, payload: Bytes) -> Self {
        Self::new(sequence, FrameFlags::NONE, payload)
    }

    /// Create an end-of-stream frame
    pub fn end_stream(sequence: u64) -> Self {
        Self::new(sequence, FrameFlags::END_STREAM, Bytes::new())
    }

    /// Create an error frame carrying a UTF-8 reason
    pub fn error(sequence: u64, reason: &str) -> Self {
        Self::new(sequence, FrameFlags::ERROR, Bytes::copy_from_slice(reason.as_bytes()))
    }

    /// Serialize frame to MessagePack bytes
    pub fn to_msgpack(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(rmp_serde::to_vec(self)?)
    }

    /// Deserialize frame from MessagePack bytes
    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    /// Check if this is an end-of-stream frame
    pub fn is_end_stream(&self) -> bool {
        self.flags.has_flag(FrameFlags::END_STREAM)
    }

    /// Check if this is an error frame
    pub fn is_error(&self) -> bool {
        self.flags.has_flag(FrameFlags::ERROR)
    }

    /// Error reason carried by an error frame
    pub fn error_reason(&self) -> Option<String> {
        self.is_error()
            .then(|| String::from_utf8_lossy(&self.payload).into_owned())
    }
}
