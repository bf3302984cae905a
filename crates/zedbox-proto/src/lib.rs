//! # zedbox protocol
//!
//! Framing, codec and message types spoken between publishers and
//! subscribers of the zedbox bus.

#![warn(missing_docs)]

/// Frame structure and serialization
pub mod frame;

/// Bus message types
pub mod message;

/// Frame codec for async streams
pub mod codec;

/// Error types for protocol operations
pub mod error;

pub use frame::{Frame, FrameFlags};
pub use message::{BusMessage, Item};
pub use codec::{FrameCodec, MAX_FRAME_SIZE};
pub use error::ProtocolError;
