//! Bus handle, publications and subscriptions

use crate::{Connection, Driver, Listener, PubSubError};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn, Instrument, Span};
use uuid::Uuid;
use zedbox_proto::{BusMessage, FrameCodec, Item, ProtocolError, MAX_FRAME_SIZE};

/// Live updates buffered per subscriber before it is considered lagging
const UPDATE_BACKLOG: usize = 1024;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Room left in a frame for the frame and message envelope around items
const ENVELOPE_RESERVE: usize = 64 * 1024;

/// Per-item encoding overhead counted against a snapshot batch
const ITEM_OVERHEAD: usize = 16;

/// Largest encoded key plus value a publication accepts
pub const MAX_ITEM_SIZE: usize = MAX_FRAME_SIZE - ENVELOPE_RESERVE;

/// Handle through which an agent publishes and subscribes.
///
/// One handle is built per process. Cloning is cheap and shares the driver.
#[derive(Clone)]
pub struct PubSub {
    driver: Arc<dyn Driver>,
    agent_name: String,
    span: Span,
}

impl std::fmt::Debug for PubSub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubSub")
            .field("driver", &self.driver.name())
            .field("agent_name", &self.agent_name)
            .finish()
    }
}

impl PubSub {
    /// Create a handle for `agent_name` over `driver`.
    ///
    /// Background work spawned by the handle runs inside `span`, so records
    /// it emits carry the owning agent's fields.
    pub fn new(driver: Arc<dyn Driver>, agent_name: impl Into<String>, span: Span) -> Self {
        Self {
            driver,
            agent_name: agent_name.into(),
            span,
        }
    }

    /// Agent owning this handle
    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    /// Name of the underlying driver
    pub fn driver_name(&self) -> &'static str {
        self.driver.name()
    }

    /// Publish `topic` as this agent
    pub async fn new_publication<T>(&self, topic: &str) -> Result<Publication<T>, PubSubError>
    where
        T: Serialize + DeserializeOwned,
    {
        let listener = self.driver.listen(&self.agent_name, topic).await?;
        info!("Publishing {} at {}", topic, listener.address());

        let (updates, _) = broadcast::channel(UPDATE_BACKLOG);
        let state = Arc::new(PublicationState {
            publisher: self.agent_name.clone(),
            topic: topic.to_string(),
            instance: Uuid::new_v4(),
            inner: RwLock::new(Published {
                items: BTreeMap::new(),
                restarted: false,
            }),
            updates,
        });

        let accept_task = tokio::spawn(
            accept_loop(listener, Arc::clone(&state)).instrument(self.span.clone()),
        );

        Ok(Publication {
            state,
            accept_task,
            _marker: PhantomData,
        })
    }

    /// Subscribe to `publisher`'s publication of `topic`
    pub async fn new_subscription<T>(&self, publisher: &str, topic: &str) -> Result<Subscription<T>, PubSubError>
    where
        T: DeserializeOwned + Clone,
    {
        let mut conn = self.driver.connect(publisher, topic).await?;
        let mut codec = FrameCodec::new();

        codec
            .send(&mut conn.writer, &BusMessage::Subscribe {
                subscriber: self.agent_name.clone(),
                topic: topic.to_string(),
            })
            .await?;

        let instance = match codec.recv(&mut conn.reader).await? {
            Some(BusMessage::Hello { topic: served, instance, .. }) if served == topic => instance,
            Some(BusMessage::Hello { .. }) => {
                return Err(ProtocolError::UnexpectedMessage("hello for another topic").into())
            }
            Some(_) => return Err(ProtocolError::UnexpectedMessage("expected hello").into()),
            None => return Err(ProtocolError::ConnectionClosed.into()),
        };
        debug!("Subscribed to {}/{} (instance {})", publisher, topic, instance);

        Ok(Subscription {
            publisher: publisher.to_string(),
            topic: topic.to_string(),
            instance,
            conn,
            codec,
            items: BTreeMap::new(),
            pending: VecDeque::new(),
            synchronized: false,
            restarted: false,
        })
    }
}

struct Published {
    items: BTreeMap<String, Bytes>,
    restarted: bool,
}

struct PublicationState {
    publisher: String,
    topic: String,
    instance: Uuid,
    inner: RwLock<Published>,
    updates: broadcast::Sender<BusMessage>,
}

/// Publisher end of a topic.
///
/// Dropping it stops serving subscribers and removes the transport address.
pub struct Publication<T> {
    state: Arc<PublicationState>,
    accept_task: JoinHandle<()>,
    _marker: PhantomData<fn(T) -> T>,
}

impl<T> Publication<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Topic served
    pub fn topic(&self) -> &str {
        &self.state.topic
    }

    /// Add or replace the item stored under `key`
    pub async fn publish(&self, key: &str, value: &T) -> Result<(), PubSubError> {
        let encoded = Bytes::from(rmp_serde::to_vec(value)?);
        let size = key.len() + encoded.len();
        if size > MAX_ITEM_SIZE {
            return Err(PubSubError::ItemTooLarge {
                key: key.to_string(),
                size,
                max: MAX_ITEM_SIZE,
            });
        }
        let mut inner = self.state.inner.write().await;
        inner.items.insert(key.to_string(), encoded.clone());
        // No receivers just means nobody is subscribed yet
        let _ = self.state.updates.send(BusMessage::Modify { item: Item::new(key, encoded) });
        Ok(())
    }

    /// Remove the item stored under `key`; removing a missing key is a no-op
    pub async fn unpublish(&self, key: &str) {
        let mut inner = self.state.inner.write().await;
        if inner.items.remove(key).is_some() {
            let _ = self.state.updates.send(BusMessage::Delete { key: key.to_string() });
        }
    }

    /// Tell subscribers this agent restarted and has re-published its state
    pub async fn signal_restarted(&self) {
        let mut inner = self.state.inner.write().await;
        inner.restarted = true;
        let _ = self.state.updates.send(BusMessage::Restarted);
    }

    /// Current value under `key`
    pub async fn get(&self, key: &str) -> Result<Option<T>, PubSubError> {
        let inner = self.state.inner.read().await;
        inner
            .items
            .get(key)
            .map(|bytes| rmp_serde::from_slice(bytes).map_err(PubSubError::from))
            .transpose()
    }

    /// All current keys, in order
    pub async fn keys(&self) -> Vec<String> {
        self.state.inner.read().await.items.keys().cloned().collect()
    }
}

impl<T> Drop for Publication<T> {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(mut listener: Box<dyn Listener>, state: Arc<PublicationState>) {
    // Dropping the set when this task is aborted tears down every subscriber
    let mut subscribers = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(conn) => {
                    let state = Arc::clone(&state);
                    subscribers.spawn(async move {
                        let peer = conn.peer.clone();
                        if let Err(e) = serve_subscriber(conn, state).await {
                            warn!("Subscriber {} dropped: {}", peer, e);
                        }
                    }.in_current_span());
                }
                Err(e) => {
                    warn!("Accept failed on {}: {}", state.topic, e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
            Some(_) = subscribers.join_next(), if !subscribers.is_empty() => {}
        }
    }
}

async fn serve_subscriber(mut conn: Connection, state: Arc<PublicationState>) -> Result<(), PubSubError> {
    let mut codec = FrameCodec::new();

    let subscriber = match codec.recv(&mut conn.reader).await? {
        Some(BusMessage::Subscribe { subscriber, topic }) if topic == state.topic => subscriber,
        Some(BusMessage::Subscribe { topic, .. }) => {
            codec
                .send_error(&mut conn.writer, &format!("{} does not publish {}", state.publisher, topic))
                .await?;
            return Ok(());
        }
        Some(_) => {
            codec.send_error(&mut conn.writer, "expected subscribe").await?;
            return Ok(());
        }
        None => return Ok(()),
    };
    debug!("{} subscribed to {}", subscriber, state.topic);

    // Snapshot and receiver are taken under one lock so no update falls between them
    let (items, restarted, mut updates) = {
        let inner = state.inner.read().await;
        let items: Vec<Item> = inner
            .items
            .iter()
            .map(|(key, value)| Item::new(key.clone(), value.clone()))
            .collect();
        (items, inner.restarted, state.updates.subscribe())
    };

    codec
        .send(&mut conn.writer, &BusMessage::Hello {
            publisher: state.publisher.clone(),
            topic: state.topic.clone(),
            instance: state.instance,
        })
        .await?;
    for batch in snapshot_batches(items, MAX_ITEM_SIZE) {
        codec.send(&mut conn.writer, &BusMessage::Sync { items: batch }).await?;
    }
    codec.send(&mut conn.writer, &BusMessage::Complete).await?;
    if restarted {
        codec.send(&mut conn.writer, &BusMessage::Restarted).await?;
    }

    loop {
        match updates.recv().await {
            Ok(message) => codec.send(&mut conn.writer, &message).await?,
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                codec
                    .send_error(&mut conn.writer, &format!("subscriber lagged by {} updates", missed))
                    .await?;
                return Ok(());
            }
            Err(broadcast::error::RecvError::Closed) => {
                codec.send_end(&mut conn.writer).await?;
                return Ok(());
            }
        }
    }
}

/// Split a snapshot into batches of at most `budget` bytes each.
///
/// An item larger than the budget still gets a batch of its own.
fn snapshot_batches(items: Vec<Item>, budget: usize) -> Vec<Vec<Item>> {
    let mut batches = Vec::new();
    let mut batch = Vec::new();
    let mut used = 0;
    for item in items {
        let size = item.key.len() + item.value.len() + ITEM_OVERHEAD;
        if !batch.is_empty() && used + size > budget {
            batches.push(std::mem::take(&mut batch));
            used = 0;
        }
        used += size;
        batch.push(item);
    }
    if !batch.is_empty() {
        batches.push(batch);
    }
    batches
}

/// One observed change of a subscribed topic
#[derive(Debug, Clone, PartialEq)]
pub enum Change<T> {
    /// A key appeared
    Created {
        /// Key
        key: String,
        /// New value
        value: T,
    },
    /// An existing key changed
    Modified {
        /// Key
        key: String,
        /// New value
        value: T,
    },
    /// A key was removed; carries the last value seen, if any
    Deleted {
        /// Key
        key: String,
        /// Previous value
        value: Option<T>,
    },
    /// The initial snapshot has been fully delivered
    Synchronized,
    /// The publisher restarted
    Restarted,
}

/// Subscriber end of a topic, holding a local copy of its items
pub struct Subscription<T> {
    publisher: String,
    topic: String,
    instance: Uuid,
    conn: Connection,
    codec: FrameCodec,
    items: BTreeMap<String, T>,
    pending: VecDeque<Change<T>>,
    synchronized: bool,
    restarted: bool,
}

impl<T> Subscription<T>
where
    T: DeserializeOwned + Clone,
{
    /// Publishing agent
    pub fn publisher(&self) -> &str {
        &self.publisher
    }

    /// Topic subscribed to
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Identifies the publication lifetime this subscription is attached to
    pub fn instance(&self) -> Uuid {
        self.instance
    }

    /// Whether the initial snapshot has been received
    pub fn is_synchronized(&self) -> bool {
        self.synchronized
    }

    /// Whether the publisher has signalled a restart
    pub fn is_restarted(&self) -> bool {
        self.restarted
    }

    /// Local copy of the item under `key`
    pub fn get(&self, key: &str) -> Option<&T> {
        self.items.get(key)
    }

    /// Local copy of every item
    pub fn items(&self) -> &BTreeMap<String, T> {
        &self.items
    }

    /// Wait for the next change.
    ///
    /// Returns `Ok(None)` once the publisher has gone away.
    pub async fn next_change(&mut self) -> Result<Option<Change<T>>, PubSubError> {
        loop {
            if let Some(change) = self.pending.pop_front() {
                return Ok(Some(change));
            }

            let Some(message) = self.codec.recv(&mut self.conn.reader).await? else {
                debug!("Publisher of {}/{} went away", self.publisher, self.topic);
                return Ok(None);
            };

            match message {
                BusMessage::Sync { items } => {
                    for item in items {
                        let change = self.apply_modify(item)?;
                        self.pending.push_back(change);
                    }
                }
                BusMessage::Complete => {
                    self.synchronized = true;
                    return Ok(Some(Change::Synchronized));
                }
                BusMessage::Modify { item } => return self.apply_modify(item).map(Some),
                BusMessage::Delete { key } => {
                    let value = self.items.remove(&key);
                    return Ok(Some(Change::Deleted { key, value }));
                }
                BusMessage::Restarted => {
                    self.restarted = true;
                    return Ok(Some(Change::Restarted));
                }
                other @ (BusMessage::Subscribe { .. } | BusMessage::Hello { .. }) => {
                    warn!("Unexpected {} on {}/{}", other.kind(), self.publisher, self.topic);
                    return Err(ProtocolError::UnexpectedMessage("handshake after subscribe").into());
                }
            }
        }
    }

    fn apply_modify(&mut self, item: Item) -> Result<Change<T>, PubSubError> {
        let value: T = rmp_serde::from_slice(&item.value)?;
        let existed = self.items.insert(item.key.clone(), value.clone()).is_some();
        Ok(if existed {
            Change::Modified { key: item.key, value }
        } else {
            Change::Created { key: item.key, value }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SocketDriver;
    use anyhow::Result;
    use serde::Deserialize;
    use std::time::Duration;
    use tokio::time::timeout;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct PortStatus {
        ifname: String,
        up: bool,
    }

    fn port(ifname: &str, up: bool) -> PortStatus {
        PortStatus { ifname: ifname.to_string(), up }
    }

    fn handle(root: &std::path::Path, agent: &str) -> PubSub {
        PubSub::new(Arc::new(SocketDriver::new(root)), agent, Span::none())
    }

    async fn next(sub: &mut Subscription<PortStatus>) -> Result<Change<PortStatus>> {
        let change = timeout(Duration::from_secs(5), sub.next_change()).await??;
        change.ok_or_else(|| anyhow::anyhow!("publisher went away"))
    }

    #[tokio::test]
    async fn test_snapshot_then_live_updates() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let nim = handle(dir.path(), "nim");
        let zedrouter = handle(dir.path(), "zedrouter");

        let publication = nim.new_publication::<PortStatus>("PortStatus").await?;
        publication.publish("eth0", &port("eth0", true)).await?;

        let mut sub = zedrouter.new_subscription::<PortStatus>("nim", "PortStatus").await?;
        assert!(!sub.is_synchronized());
        assert_eq!(next(&mut sub).await?, Change::Created { key: "eth0".into(), value: port("eth0", true) });
        assert_eq!(next(&mut sub).await?, Change::Synchronized);
        assert!(sub.is_synchronized());

        publication.publish("eth0", &port("eth0", false)).await?;
        assert_eq!(next(&mut sub).await?, Change::Modified { key: "eth0".into(), value: port("eth0", false) });

        publication.unpublish("eth0").await;
        assert_eq!(
            next(&mut sub).await?,
            Change::Deleted { key: "eth0".into(), value: Some(port("eth0", false)) }
        );
        assert!(sub.items().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_restart_seen_by_late_subscriber() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let nim = handle(dir.path(), "nim");
        let publication = nim.new_publication::<PortStatus>("PortStatus").await?;
        publication.signal_restarted().await;

        let mut sub = handle(dir.path(), "zedagent").new_subscription::<PortStatus>("nim", "PortStatus").await?;
        assert_eq!(next(&mut sub).await?, Change::Synchronized);
        assert_eq!(next(&mut sub).await?, Change::Restarted);
        assert!(sub.is_restarted());
        Ok(())
    }

    #[tokio::test]
    async fn test_publication_get_and_keys() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let publication = handle(dir.path(), "nim").new_publication::<PortStatus>("PortStatus").await?;
        publication.publish("eth1", &port("eth1", true)).await?;
        publication.publish("eth0", &port("eth0", true)).await?;
        publication.unpublish("wlan0").await;

        assert_eq!(publication.keys().await, vec!["eth0".to_string(), "eth1".to_string()]);
        assert_eq!(publication.get("eth1").await?, Some(port("eth1", true)));
        assert_eq!(publication.get("wlan0").await?, None);
        assert_eq!(publication.topic(), "PortStatus");
        Ok(())
    }

    #[tokio::test]
    async fn test_subscribe_to_unpublished_topic() {
        let dir = tempfile::tempdir().unwrap();
        let result = handle(dir.path(), "zedagent")
            .new_subscription::<PortStatus>("nim", "PortStatus")
            .await;
        assert!(matches!(result, Err(PubSubError::NotPublished { .. })));
    }

    #[tokio::test]
    async fn test_dropped_publication_ends_subscription() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let publication = handle(dir.path(), "nim").new_publication::<PortStatus>("PortStatus").await?;
        let mut sub = handle(dir.path(), "zedagent").new_subscription::<PortStatus>("nim", "PortStatus").await?;
        assert_eq!(next(&mut sub).await?, Change::Synchronized);

        drop(publication);
        let end = timeout(Duration::from_secs(5), sub.next_change()).await?;
        assert!(matches!(end, Ok(None) | Err(_)));
        Ok(())
    }

    #[tokio::test]
    async fn test_snapshot_larger_than_one_frame() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let publication = handle(dir.path(), "nim").new_publication::<String>("Blobs").await?;
        let blob = "x".repeat(1024 * 1024);
        for i in 0..20 {
            publication.publish(&format!("blob{:02}", i), &blob).await?;
        }

        let mut sub = handle(dir.path(), "zedagent").new_subscription::<String>("nim", "Blobs").await?;
        let mut created = 0;
        loop {
            let change = timeout(Duration::from_secs(10), sub.next_change())
                .await??
                .ok_or_else(|| anyhow::anyhow!("publisher went away"))?;
            match change {
                Change::Created { value, .. } => {
                    assert_eq!(value.len(), blob.len());
                    created += 1;
                }
                Change::Synchronized => break,
                other => panic!("unexpected change {:?}", other),
            }
        }
        assert_eq!(created, 20);
        assert_eq!(sub.items().len(), 20);
        Ok(())
    }

    #[tokio::test]
    async fn test_publish_rejects_item_over_frame_limit() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let publication = handle(dir.path(), "nim").new_publication::<String>("Blobs").await?;

        let result = publication.publish("huge", &"x".repeat(MAX_FRAME_SIZE)).await;

        assert!(matches!(result, Err(PubSubError::ItemTooLarge { ref key, .. }) if key == "huge"));
        assert!(publication.keys().await.is_empty());
        Ok(())
    }

    #[test]
    fn test_snapshot_batches_respect_budget() {
        let items: Vec<Item> = (0..10).map(|i| Item::new(format!("k{}", i), vec![0u8; 40])).collect();
        let batches = snapshot_batches(items, 100);

        assert_eq!(batches.len(), 5);
        assert!(batches.iter().all(|batch| batch.len() == 2));
        assert!(snapshot_batches(Vec::new(), 100).is_empty());

        let oversized = snapshot_batches(vec![Item::new("big", vec![0u8; 500])], 100);
        assert_eq!(oversized.len(), 1);
    }

    #[test]
    fn test_handle_debug_names_driver() {
        let ps = PubSub::new(Arc::new(SocketDriver::default()), "nim", Span::none());
        assert_eq!(ps.driver_name(), "socket");
        assert_eq!(ps.agent_name(), "nim");
        assert!(format!("{:?}", ps).contains("socket"));
    }
}
