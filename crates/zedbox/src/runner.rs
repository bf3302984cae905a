//! The contract every agent implements

use crate::agentlog::AgentLog;
use async_trait::async_trait;
use zedbox_pubsub::PubSub;

/// An agent the dispatcher can run to completion.
///
/// The returned status becomes the process exit code unchanged: zero for
/// success, anything else per the agent's own conventions. The dispatcher
/// applies no timeout, retry or supervision; long-lived agents simply do
/// not return until they are done.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Run the agent.
    ///
    /// * `ps` - bus handle built for this process
    /// * `log` - logger and log object tagged with the invocation identity
    /// * `args` - command line arguments following the program name
    /// * `base_dir` - reserved; the dispatcher always passes `""`
    async fn run(&self, ps: &PubSub, log: &AgentLog, args: &[String], base_dir: &str) -> i32;
}
