//! # zedbox pubsub
//!
//! The bus handle handed to every agent, and the local transport under it.
//!
//! A publication of `topic` by agent `a` is reachable by any process on the
//! device through the driver; the handle itself is never shared between
//! processes.

#![warn(missing_docs)]

/// Transport abstraction
pub mod driver;

/// Unix domain socket transport
pub mod socket;

/// Connection halves produced by drivers
pub mod connection;

/// Bus handle, publications and subscriptions
pub mod pubsub;

/// Bus error types
pub mod error;

pub use driver::{Driver, Listener};
pub use socket::SocketDriver;
pub use connection::Connection;
pub use pubsub::{Change, PubSub, Publication, Subscription, MAX_ITEM_SIZE};
pub use error::PubSubError;
