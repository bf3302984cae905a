//! Bus error types

use thiserror::Error;
use std::io;
use zedbox_proto::ProtocolError;

/// Errors raised by the bus handle and its drivers
#[derive(Debug, Error)]
pub enum PubSubError {
    /// Nobody publishes the requested topic
    #[error("{agent}/{topic} is not published")]
    NotPublished {
        /// Publishing agent
        agent: String,
        /// Topic name
        topic: String,
    },

    /// Item cannot fit in a single frame
    #[error("Item {key} is {size} bytes, limit is {max}")]
    ItemTooLarge {
        /// Item key
        key: String,
        /// Encoded key and value size
        size: usize,
        /// Largest accepted size
        max: usize,
    },

    /// Transport could not be set up
    #[error("Connection error: {0}")]
    Connection(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Wire protocol violation or peer error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Value could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid driver or handle configuration
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<rmp_serde::encode::Error> for PubSubError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Serialization(format!("MessagePack encode error: {}", err))
    }
}

impl From<rmp_serde::decode::Error> for PubSubError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Serialization(format!("MessagePack decode error: {}", err))
    }
}
