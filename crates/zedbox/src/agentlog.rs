//! Logging bootstrap
//!
//! Installs the process-wide `tracing` subscriber and hands back an
//! [`AgentLog`] tagged with the invocation identity. The dispatcher builds
//! it before looking the identity up and passes it explicitly to the agent.

use crate::config::{LogConfig, LogFormat};
use tracing::{debug, error, warn, Span};
use tracing_subscriber::EnvFilter;

/// The logger half: how records are filtered and rendered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Logger {
    directive: String,
    format: LogFormat,
    installed: bool,
}

impl Logger {
    /// Effective filter directive
    pub fn directive(&self) -> &str {
        &self.directive
    }

    /// Output format
    pub fn format(&self) -> LogFormat {
        self.format
    }

    /// Whether this bootstrap installed the global subscriber, as opposed to
    /// finding one already in place
    pub fn installed(&self) -> bool {
        self.installed
    }
}

/// The log object half: identifies the agent behind each record
#[derive(Debug, Clone)]
pub struct LogObject {
    agent_name: String,
    pid: u32,
    span: Span,
}

impl LogObject {
    /// Identity the process was invoked as
    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    /// Process id
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Span carrying `agent` and `pid`; instrument work with it
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Record a failure the process cannot continue from
    pub fn fatal(&self, err: &dyn std::error::Error) {
        self.span.in_scope(|| error!(fatal = true, "{}", err));
    }
}

/// Logger and log object pair handed to every agent
#[derive(Debug, Clone)]
pub struct AgentLog {
    logger: Logger,
    object: LogObject,
}

impl AgentLog {
    /// The logger half
    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// The log object half
    pub fn object(&self) -> &LogObject {
        &self.object
    }

    /// Shorthand for `object().agent_name()`
    pub fn agent_name(&self) -> &str {
        self.object.agent_name()
    }

    /// Shorthand for `object().span()`
    pub fn span(&self) -> &Span {
        self.object.span()
    }
}

/// Level used when the requested directive cannot be parsed
const FALLBACK_DIRECTIVE: &str = "info";

/// Initialize logging for `identity`.
///
/// `RUST_LOG` takes precedence over the configured level. Records go to
/// stderr so stdout stays free for user-facing messages. Calling this more
/// than once keeps the first subscriber.
pub fn init(identity: &str, config: &LogConfig) -> AgentLog {
    let requested = std::env::var(EnvFilter::DEFAULT_ENV)
        .ok()
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| config.level.clone());

    let (directive, filter, rejected) = match EnvFilter::try_new(&requested) {
        Ok(filter) => (requested, filter, None),
        Err(e) => (
            FALLBACK_DIRECTIVE.to_string(),
            EnvFilter::new(FALLBACK_DIRECTIVE),
            Some((requested, e)),
        ),
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let installed = match config.format {
        LogFormat::Text => builder.try_init().is_ok(),
        LogFormat::Json => builder.json().try_init().is_ok(),
    };

    // The span must be created after the subscriber is in place or it is
    // permanently disabled. Error level keeps it enabled under any filter
    // short of "off", so every record carries the identity.
    let pid = std::process::id();
    let span = tracing::error_span!("agent", agent = %identity, pid);
    if !installed {
        span.in_scope(|| debug!("Global subscriber already set, reusing it"));
    }
    if let Some((requested, e)) = rejected {
        span.in_scope(|| warn!("Invalid log filter {:?} ({}), using {}", requested, e, FALLBACK_DIRECTIVE));
    }

    AgentLog {
        logger: Logger {
            directive,
            format: config.format,
            installed,
        },
        object: LogObject {
            agent_name: identity.to_string(),
            pid,
            span,
        },
    }
}
