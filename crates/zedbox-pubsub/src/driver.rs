//! Transport abstraction beneath the bus handle

use async_trait::async_trait;
use crate::{Connection, PubSubError};

/// A transport that can serve and reach publications.
///
/// Addresses are derived from the publishing agent's name and the topic;
/// how they map to the underlying medium is up to the driver.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Short driver name, used in logs
    fn name(&self) -> &'static str;

    /// Start accepting subscribers for `agent`'s publication of `topic`
    async fn listen(&self, agent: &str, topic: &str) -> Result<Box<dyn Listener>, PubSubError>;

    /// Reach the publication of `topic` owned by `agent`
    async fn connect(&self, agent: &str, topic: &str) -> Result<Connection, PubSubError>;
}

/// Accept side of a publication
#[async_trait]
pub trait Listener: Send {
    /// Wait for the next subscriber
    async fn accept(&mut self) -> Result<Connection, PubSubError>;

    /// Address subscribers use to reach this listener
    fn address(&self) -> String;
}
