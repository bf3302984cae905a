//! Generic service lifecycle bound to the builtin identities.
//!
//! [`ServiceAgent`] announces the agent on the bus and stays up until the
//! process is asked to stop. Agents with their own logic register their own
//! [`Runner`] under the same identity instead.

use crate::agentlog::AgentLog;
use crate::runner::Runner;
use async_trait::async_trait;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::io::Write;
use tracing::{error, info, warn, Instrument};
use zedbox_pubsub::{PubSub, PubSubError};

/// Topic agents report their lifecycle on
pub const STATUS_TOPIC: &str = "AgentStatus";

#[derive(Debug, Parser)]
#[command(about = "zedbox managed agent")]
struct ServiceArgs {
    /// Topic to publish lifecycle status on
    #[arg(long, default_value = STATUS_TOPIC)]
    status_topic: String,

    /// Publish status and return instead of running until stopped
    #[arg(long)]
    once: bool,
}

/// Lifecycle state reported on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentState {
    /// Agent is up
    Running,
    /// Agent is shutting down
    Stopping,
}

/// Status item published under the agent's own name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStatus {
    /// Agent identity
    pub name: String,
    /// Process id
    pub pid: u32,
    /// Lifecycle state
    pub state: AgentState,
    /// Arguments the agent was started with
    pub args: Vec<String>,
}

/// Runner providing the shared agent lifecycle
#[derive(Debug, Clone)]
pub struct ServiceAgent {
    name: String,
}

impl ServiceAgent {
    /// Lifecycle for the agent called `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Agent identity
    pub fn name(&self) -> &str {
        &self.name
    }

    fn report_usage<W: Write>(&self, e: &clap::Error, log: &AgentLog, out: &mut W) -> i32 {
        if let Err(io) = write!(out, "{}", e.render()).and_then(|()| out.flush()) {
            log.span().in_scope(|| warn!("Cannot print usage for {}: {}", self.name, io));
        }
        e.exit_code()
    }

    async fn serve(&self, ps: &PubSub, log: &AgentLog, opts: &ServiceArgs, args: &[String]) -> Result<(), PubSubError> {
        let status = |state| AgentStatus {
            name: self.name.clone(),
            pid: log.object().pid(),
            state,
            args: args.to_vec(),
        };

        let publication = ps.new_publication::<AgentStatus>(&opts.status_topic).await?;
        publication.publish(&self.name, &status(AgentState::Running)).await?;
        info!("{} running", self.name);

        if opts.once {
            return Ok(());
        }

        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot wait for shutdown signal: {}", e);
        }
        info!("{} stopping", self.name);
        publication.publish(&self.name, &status(AgentState::Stopping)).await?;
        Ok(())
    }
}

#[async_trait]
impl Runner for ServiceAgent {
    async fn run(&self, ps: &PubSub, log: &AgentLog, args: &[String], _base_dir: &str) -> i32 {
        let argv = std::iter::once(self.name.as_str()).chain(args.iter().map(String::as_str));
        let opts = match ServiceArgs::try_parse_from(argv) {
            Ok(opts) => opts,
            // Covers --help as well as usage errors
            Err(e) if e.use_stderr() => return self.report_usage(&e, log, &mut std::io::stderr()),
            Err(e) => return self.report_usage(&e, log, &mut std::io::stdout()),
        };

        match self.serve(ps, log, &opts, args).instrument(log.span().clone()).await {
            Ok(()) => 0,
            Err(e) => {
                log.span().in_scope(|| error!("{} failed: {}", self.name, e));
                1
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agentlog;
    use crate::config::LogConfig;
    use std::sync::Arc;
    use tracing::Span;
    use zedbox_pubsub::SocketDriver;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_once_publishes_and_returns_zero() {
        let dir = tempfile::tempdir().unwrap();
        let ps = PubSub::new(Arc::new(SocketDriver::new(dir.path())), "ledmanager", Span::none());
        let log = agentlog::init("ledmanager", &LogConfig::default());

        let code = ServiceAgent::new("ledmanager").run(&ps, &log, &args(&["--once"]), "").await;
        assert_eq!(code, 0);
    }

    #[tokio::test]
    async fn test_usage_error_returns_clap_code() {
        let ps = PubSub::new(Arc::new(SocketDriver::default()), "nim", Span::none());
        let log = agentlog::init("nim", &LogConfig::default());

        let code = ServiceAgent::new("nim").run(&ps, &log, &args(&["-x", "y"]), "").await;
        assert_eq!(code, 2);
    }

    #[tokio::test]
    async fn test_help_returns_zero() {
        let ps = PubSub::new(Arc::new(SocketDriver::default()), "nim", Span::none());
        let log = agentlog::init("nim", &LogConfig::default());

        let code = ServiceAgent::new("nim").run(&ps, &log, &args(&["--help"]), "").await;
        assert_eq!(code, 0);
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_usage_report_survives_write_failure() {
        let log = agentlog::init("nim", &LogConfig::default());
        let agent = ServiceAgent::new("nim");
        let err = ServiceArgs::try_parse_from(["nim", "-x"]).unwrap_err();

        assert_eq!(agent.report_usage(&err, &log, &mut BrokenPipe), 2);

        let mut out: Vec<u8> = Vec::new();
        assert_eq!(agent.report_usage(&err, &log, &mut out), 2);
        assert!(String::from_utf8(out).unwrap().contains("-x"));
    }

    #[tokio::test]
    async fn test_bus_failure_returns_one() {
        let ps = PubSub::new(Arc::new(SocketDriver::default()), "nim", Span::none());
        let log = agentlog::init("nim", &LogConfig::default());

        let code = ServiceAgent::new("nim")
            .run(&ps, &log, &args(&["--once", "--status-topic", "bad/topic"]), "")
            .await;
        assert_eq!(code, 1);
    }
}
