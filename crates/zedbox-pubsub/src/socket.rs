//! Unix domain socket transport

use async_trait::async_trait;
use crate::{Connection, Driver, Listener, PubSubError};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, warn};

/// Default directory holding one sub-directory of sockets per agent
pub const DEFAULT_RUN_DIR: &str = "/run";

/// Driver serving publications as unix sockets at `<root>/<agent>/<topic>.sock`
#[derive(Debug, Clone)]
pub struct SocketDriver {
    root: PathBuf,
}

impl Default for SocketDriver {
    fn default() -> Self {
        Self::new(DEFAULT_RUN_DIR)
    }
}

impl SocketDriver {
    /// Create a driver rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory under which agent socket directories live
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Socket path for `agent`'s publication of `topic`
    pub fn socket_path(&self, agent: &str, topic: &str) -> Result<PathBuf, PubSubError> {
        validate_component("agent", agent)?;
        validate_component("topic", topic)?;
        Ok(self.root.join(agent).join(format!("{}.sock", topic)))
    }
}

fn validate_component(what: &str, value: &str) -> Result<(), PubSubError> {
    if value.is_empty() || value.contains('/') || value == "." || value == ".." {
        return Err(PubSubError::Configuration(format!("invalid {} name: {:?}", what, value)));
    }
    Ok(())
}

#[async_trait]
impl Driver for SocketDriver {
    fn name(&self) -> &'static str {
        "socket"
    }

    async fn listen(&self, agent: &str, topic: &str) -> Result<Box<dyn Listener>, PubSubError> {
        let path = self.socket_path(agent, topic)?;
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        // A previous instance of the agent may have left its socket behind
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!("Removed stale socket {}", path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let listener = UnixListener::bind(&path)
            .map_err(|e| PubSubError::Connection(format!("bind {}: {}", path.display(), e)))?;
        debug!("Listening on {}", path.display());
        Ok(Box::new(SocketListener { listener, path }))
    }

    async fn connect(&self, agent: &str, topic: &str) -> Result<Connection, PubSubError> {
        let path = self.socket_path(agent, topic)?;
        match UnixStream::connect(&path).await {
            Ok(stream) => {
                let (reader, writer) = stream.into_split();
                Ok(Connection::new(reader, writer, path.display().to_string()))
            }
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::ConnectionRefused) => {
                Err(PubSubError::NotPublished {
                    agent: agent.to_string(),
                    topic: topic.to_string(),
                })
            }
            Err(e) => Err(PubSubError::Connection(format!("connect {}: {}", path.display(), e))),
        }
    }
}

/// Accept side of a socket publication; removes its socket file on drop
struct SocketListener {
    listener: UnixListener,
    path: PathBuf,
}

#[async_trait]
impl Listener for SocketListener {
    async fn accept(&mut self) -> Result<Connection, PubSubError> {
        let (stream, _) = self.listener.accept().await?;
        let (reader, writer) = stream.into_split();
        Ok(Connection::new(reader, writer, format!("subscriber@{}", self.path.display())))
    }

    fn address(&self) -> String {
        self.path.display().to_string()
    }
}

impl Drop for SocketListener {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!("Failed to remove socket {}: {}", self.path.display(), e);
            }
        }
    }
}
