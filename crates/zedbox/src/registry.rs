//! Identity to runner table
//!
//! The registry is the single source of truth for which identities a build
//! supports. It is assembled once through [`RegistryBuilder`] and is
//! read-only afterwards.

use crate::agents::ServiceAgent;
use crate::error::RegistryError;
use crate::runner::Runner;
use std::collections::HashMap;
use std::sync::Arc;

/// Every agent identity shipped in the suite
pub const BUILTIN_AGENTS: [&str; 33] = [
    "client",
    "command",
    "diag",
    "domainmgr",
    "downloader",
    "executor",
    "faultinjection",
    "hardwaremodel",
    "ledmanager",
    "loguploader",
    "nim",
    "nodeagent",
    "verifier",
    "volumemgr",
    "waitforaddr",
    "zedagent",
    "zedkube",
    "zedmanager",
    "zedrouter",
    "ipcmonitor",
    "baseosmgr",
    "wstunnelclient",
    "conntrack",
    "pbuf",
    "tpmmgr",
    "vaultmgr",
    "upgradeconverter",
    "watcher",
    "zfsmanager",
    "usbmanager",
    "collectinfo",
    "vcomlink",
    "monitor",
];

/// Immutable map from identity to runner
#[derive(Clone, Default)]
pub struct Registry {
    entries: HashMap<String, Arc<dyn Runner>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").field("identities", &self.identities()).finish()
    }
}

impl Registry {
    /// Start an empty registry
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// The shipped suite, each identity bound to a [`ServiceAgent`]
    pub fn builtin() -> Result<Self, RegistryError> {
        BUILTIN_AGENTS
            .iter()
            .try_fold(Self::builder(), |builder, &name| {
                builder.register(name, Arc::new(ServiceAgent::new(name)))
            })
            .map(RegistryBuilder::build)
    }

    /// Runner registered for `identity`
    pub fn lookup(&self, identity: &str) -> Option<Arc<dyn Runner>> {
        self.entries.get(identity).cloned()
    }

    /// Whether `identity` is registered
    pub fn contains(&self, identity: &str) -> bool {
        self.entries.contains_key(identity)
    }

    /// Registered identities, sorted
    pub fn identities(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered identities
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Collects registrations; duplicates are rejected
#[derive(Default)]
pub struct RegistryBuilder {
    entries: HashMap<String, Arc<dyn Runner>>,
}

impl RegistryBuilder {
    /// Bind `identity` to `runner`
    pub fn register(mut self, identity: impl Into<String>, runner: Arc<dyn Runner>) -> Result<Self, RegistryError> {
        let identity = identity.into();
        if identity.is_empty() || identity.contains('/') {
            return Err(RegistryError::InvalidIdentity(identity));
        }
        if self.entries.contains_key(&identity) {
            return Err(RegistryError::DuplicateIdentity(identity));
        }
        self.entries.insert(identity, runner);
        Ok(self)
    }

    /// Freeze the registry
    pub fn build(self) -> Registry {
        Registry { entries: self.entries }
    }
}
