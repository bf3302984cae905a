//! Bus message types

use serde::{Deserialize, Serialize};
use bytes::Bytes;
use uuid::Uuid;
use crate::ProtocolError;

/// One keyed value of a publication.
///
/// The value is opaque to the bus; publishers and subscribers agree on its
/// encoding (msgpack of the topic's type).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Key, unique within the publication
    pub key: String,
    /// Encoded value
    pub value: Bytes,
}

impl Item {
    /// Create a new item
    pub fn new(key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self { key: key.into(), value: value.into() }
    }
}

/// Messages exchanged on a single publisher/subscriber connection.
///
/// The exchange is: subscriber sends `Subscribe`; publisher answers with
/// `Hello`, one or more `Sync` batches holding every current item, then
/// `Complete`. After that the publisher streams `Modify`, `Delete` and
/// `Restarted` as they happen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BusMessage {
    /// Subscriber announces itself
    Subscribe {
        /// Name of the subscribing agent
        subscriber: String,
        /// Topic the subscriber expects
        topic: String,
    },

    /// Publisher identifies itself
    Hello {
        /// Name of the publishing agent
        publisher: String,
        /// Topic served on this connection
        topic: String,
        /// Identifies one lifetime of the publication
        instance: Uuid,
    },

    /// One batch of the initial snapshot
    Sync {
        /// Items at connect time
        items: Vec<Item>,
    },

    /// Initial snapshot fully delivered
    Complete,

    /// Item added or changed
    Modify {
        /// The new item
        item: Item,
    },

    /// Item removed
    Delete {
        /// Key of the removed item
        key: String,
    },

    /// Publisher restarted and has re-published its state
    Restarted,
}

impl BusMessage {
    /// Encode as a frame payload
    pub fn to_payload(&self) -> Result<Bytes, ProtocolError> {
        Ok(Bytes::from(rmp_serde::to_vec(self)?))
    }

    /// Decode from a frame payload
    pub fn from_payload(payload: &[u8]) -> Result<Self, ProtocolError> {
        Ok(rmp_serde::from_slice(payload)?)
    }

    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "subscribe",
            Self::Hello { .. } => "hello",
            Self::Sync { .. } => "sync",
            Self::Complete => "complete",
            Self::Modify { .. } => "modify",
            Self::Delete { .. } => "delete",
            Self::Restarted => "restarted",
        }
    }
}
