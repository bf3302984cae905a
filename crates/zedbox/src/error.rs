//! Error types for dispatch and bootstrap

use std::io;
use std::path::PathBuf;
use thiserror::Error;
use zedbox_pubsub::PubSubError;

/// Failures that end the process before or instead of running an agent
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Supervisor environment initialization failed
    #[error("Environment initialization failed: {0}")]
    Bootstrap(#[from] CertDirError),

    /// Bus handle could not be constructed
    #[error("Messaging bus bootstrap failed: {0}")]
    Bus(#[from] PubSubError),
}

impl DispatchError {
    /// Process exit status for this failure
    pub fn exit_code(&self) -> i32 {
        crate::dispatcher::EXIT_FATAL
    }
}

/// Registry construction errors
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Two runners claimed the same identity
    #[error("Duplicate agent identity: {0}")]
    DuplicateIdentity(String),

    /// Identity can never be an invocation basename
    #[error("Invalid agent identity: {0:?}")]
    InvalidIdentity(String),
}

/// Certificate directory initialization errors
#[derive(Debug, Error)]
pub enum CertDirError {
    /// Path exists but is something other than a directory
    #[error("{} exists and is not a directory", .path.display())]
    NotADirectory {
        /// Offending path
        path: PathBuf,
    },

    /// Directory could not be inspected or created
    #[error("Failed to create {}: {source}", .path.display())]
    Create {
        /// Directory path
        path: PathBuf,
        /// Underlying failure
        #[source]
        source: io::Error,
    },
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Environment could not be read or deserialized
    #[error("Configuration error: {0}")]
    Load(#[from] ::config::ConfigError),
}
