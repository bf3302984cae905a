//! # zedbox
//!
//! One executable, many agents. The basename the binary is invoked under
//! selects which agent runs; every agent receives the same bootstrap (a
//! logging context and a bus handle) and its return value becomes the
//! process exit status.
//!
//! ```text
//! /usr/bin/nim -> zedbox      runs the nim agent
//! /usr/bin/zedbox             prepares the certificate directory
//! ```

#![warn(missing_docs)]

pub use zedbox_pubsub as pubsub;

/// Error types for dispatch and bootstrap
pub mod error;

/// Configuration loaded from the environment
pub mod config;

/// Logging bootstrap
pub mod agentlog;

/// The contract every agent implements
pub mod runner;

/// Identity to runner table
pub mod registry;

/// Supervisor-only environment initialization
pub mod certdir;

/// Identity resolution and dispatch
pub mod dispatcher;

/// Generic service lifecycle bound to builtin identities
pub mod agents;

pub use agentlog::{AgentLog, LogObject, Logger};
pub use crate::config::{LogConfig, LogFormat, ZedboxConfig};
pub use dispatcher::{
    bootstrap_bus, resolve_identity, run, Dispatch, Dispatcher, EXIT_FATAL,
    EXIT_UNKNOWN_PACKAGE, SUPERVISOR_IDENTITY,
};
pub use error::{CertDirError, ConfigError, DispatchError, RegistryError};
pub use registry::{Registry, RegistryBuilder, BUILTIN_AGENTS};
pub use runner::Runner;
