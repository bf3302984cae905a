//! Identity resolution and dispatch

use crate::agentlog::{self, AgentLog};
use crate::certdir::{CertDir, EnvironmentInit};
use crate::config::ZedboxConfig;
use crate::error::DispatchError;
use crate::registry::Registry;
use crate::runner::Runner;
use std::ffi::{OsStr, OsString};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, warn, Instrument};
use zedbox_pubsub::{PubSub, PubSubError, SocketDriver};

/// Identity of the binary invoked under its own name
pub const SUPERVISOR_IDENTITY: &str = "zedbox";

/// Exit status for an identity nothing is registered under
pub const EXIT_UNKNOWN_PACKAGE: i32 = 1;

/// Exit status after a fatal bootstrap failure
pub const EXIT_FATAL: i32 = 1;

/// Derive the identity from the invocation path: its final segment.
///
/// An empty or segment-less path yields the empty identity, which is never
/// registered.
pub fn resolve_identity(argv0: &OsStr) -> String {
    Path::new(argv0)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// What a dispatch ended with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// A runner was invoked and returned this status
    Exited(i32),
    /// Nothing is registered under this identity
    UnknownPackage(String),
}

impl Dispatch {
    /// Process exit status
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Exited(code) => *code,
            Self::UnknownPackage(_) => EXIT_UNKNOWN_PACKAGE,
        }
    }
}

/// Build the bus handle for `log`'s agent.
///
/// Either returns a usable handle or fails as a whole.
pub fn bootstrap_bus(config: &ZedboxConfig, log: &AgentLog) -> Result<PubSub, DispatchError> {
    if !config.run_dir.is_absolute() {
        return Err(PubSubError::Configuration(format!(
            "run directory {} is not absolute",
            config.run_dir.display()
        ))
        .into());
    }
    let driver = SocketDriver::new(&config.run_dir);
    Ok(PubSub::new(Arc::new(driver), log.agent_name(), log.span().clone()))
}

/// Routes one invocation to one runner.
///
/// Holds everything it needs explicitly: the registry, the logging context
/// built for this process and the configuration.
pub struct Dispatcher {
    registry: Registry,
    log: AgentLog,
    config: ZedboxConfig,
    environment: Arc<dyn EnvironmentInit>,
}

impl Dispatcher {
    /// Create a dispatcher; the supervisor prepares `config.cert_dir`
    pub fn new(registry: Registry, log: AgentLog, config: ZedboxConfig) -> Self {
        let environment = Arc::new(CertDir::new(config.cert_dir.clone()));
        Self {
            registry,
            log,
            config,
            environment,
        }
    }

    /// Replace the supervisor's environment initialization
    pub fn with_environment(mut self, environment: Arc<dyn EnvironmentInit>) -> Self {
        self.environment = environment;
        self
    }

    /// Registry in use
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Dispatch `identity` with `args`.
    ///
    /// Exactly one of these happens:
    /// * a registered runner is run to completion,
    /// * the supervisor identity initializes its environment, then falls
    ///   through to the unknown package report,
    /// * the unknown package report is written to `out`.
    pub async fn dispatch<W: Write>(
        &self,
        identity: &str,
        args: Vec<String>,
        out: &mut W,
    ) -> Result<Dispatch, DispatchError> {
        if let Some(runner) = self.registry.lookup(identity) {
            return self
                .run_agent(identity, runner, args)
                .instrument(self.log.span().clone())
                .await;
        }

        // The supervisor has no runner of its own; after initialization it
        // reports itself as unknown like any other unregistered name
        if identity == SUPERVISOR_IDENTITY {
            if let Err(e) = self.environment.initialize(&self.log) {
                self.log.object().fatal(&e);
                return Err(e.into());
            }
        }

        if let Err(e) = writeln!(out, "{}: Unknown package: {}", SUPERVISOR_IDENTITY, identity) {
            self.log.span().in_scope(|| warn!("Cannot report unknown package: {}", e));
        }
        Ok(Dispatch::UnknownPackage(identity.to_string()))
    }

    async fn run_agent(
        &self,
        identity: &str,
        runner: Arc<dyn Runner>,
        args: Vec<String>,
    ) -> Result<Dispatch, DispatchError> {
        debug!("Running inline command {} args: {:?}", identity, args);
        let ps = bootstrap_bus(&self.config, &self.log).inspect_err(|e| self.log.object().fatal(e))?;
        let code = runner.run(&ps, &self.log, &args, "").await;
        debug!("{} exited with {}", identity, code);
        Ok(Dispatch::Exited(code))
    }
}

/// Whole-process flow behind `main`: returns the exit status.
///
/// `args` is the full argument vector, program path first.
pub async fn run<I>(args: I) -> i32
where
    I: IntoIterator<Item = OsString>,
{
    let mut args = args.into_iter();
    let identity = args
        .next()
        .map(|argv0| resolve_identity(&argv0))
        .unwrap_or_default();
    let arguments: Vec<String> = args
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect();

    // Logging has to come up even when the configuration is broken, so
    // the failure is reported once it can be
    let (config, config_error) = match ZedboxConfig::load() {
        Ok(config) => (config, None),
        Err(e) => (ZedboxConfig::default(), Some(e)),
    };
    let log = agentlog::init(&identity, &config.log);
    if let Some(e) = config_error {
        log.span().in_scope(|| warn!("{}; using defaults", e));
    }

    let registry = match Registry::builtin() {
        Ok(registry) => registry,
        Err(e) => {
            log.span().in_scope(|| error!(fatal = true, "{}", e));
            return EXIT_FATAL;
        }
    };

    let dispatcher = Dispatcher::new(registry, log, config);
    let mut stdout = std::io::stdout();
    match dispatcher.dispatch(&identity, arguments, &mut stdout).await {
        Ok(outcome) => outcome.exit_code(),
        Err(e) => e.exit_code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogConfig;
    use crate::error::CertDirError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(Vec<String>, String, String)>>,
    }

    #[async_trait]
    impl Runner for Recorder {
        async fn run(&self, ps: &PubSub, _log: &AgentLog, args: &[String], base_dir: &str) -> i32 {
            self.calls
                .lock()
                .unwrap()
                .push((args.to_vec(), base_dir.to_string(), ps.agent_name().to_string()));
            7
        }
    }

    struct CountingInit {
        calls: AtomicUsize,
        fail: bool,
    }

    impl EnvironmentInit for CountingInit {
        fn initialize(&self, _log: &AgentLog) -> Result<(), CertDirError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(CertDirError::NotADirectory { path: "/persist/certs".into() })
            } else {
                Ok(())
            }
        }
    }

    fn dispatcher(identity: &str, recorder: Arc<Recorder>, config: ZedboxConfig) -> Dispatcher {
        let registry = Registry::builder().register("nim", recorder).unwrap().build();
        Dispatcher::new(registry, agentlog::init(identity, &LogConfig::default()), config)
    }

    #[test]
    fn test_resolve_identity() {
        assert_eq!(resolve_identity(OsStr::new("/usr/bin/nim")), "nim");
        assert_eq!(resolve_identity(OsStr::new("nim")), "nim");
        assert_eq!(resolve_identity(OsStr::new("./opt/zedbox/")), "zedbox");
        assert_eq!(resolve_identity(OsStr::new("")), "");
        assert_eq!(resolve_identity(OsStr::new("/")), "");
    }

    #[tokio::test]
    async fn test_hit_forwards_args_and_code() {
        let recorder = Arc::new(Recorder::default());
        let d = dispatcher("nim", recorder.clone(), ZedboxConfig::default());
        let mut out: Vec<u8> = Vec::new();

        let outcome = d.dispatch("nim", vec!["-x".into(), "y".into()], &mut out).await.unwrap();

        assert_eq!(outcome, Dispatch::Exited(7));
        assert_eq!(outcome.exit_code(), 7);
        assert!(out.is_empty());
        let calls = recorder.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], (vec!["-x".to_string(), "y".to_string()], String::new(), "nim".to_string()));
    }

    #[tokio::test]
    async fn test_miss_reports_unknown_package() {
        let recorder = Arc::new(Recorder::default());
        let d = dispatcher("not-a-real-agent", recorder.clone(), ZedboxConfig::default());
        let mut out: Vec<u8> = Vec::new();

        let outcome = d.dispatch("not-a-real-agent", Vec::new(), &mut out).await.unwrap();

        assert_eq!(outcome.exit_code(), EXIT_UNKNOWN_PACKAGE);
        assert_eq!(String::from_utf8(out).unwrap(), "zedbox: Unknown package: not-a-real-agent\n");
        assert!(recorder.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_relative_run_dir_is_fatal_before_runner() {
        let recorder = Arc::new(Recorder::default());
        let config = ZedboxConfig { run_dir: "run".into(), ..ZedboxConfig::default() };
        let d = dispatcher("nim", recorder.clone(), config);

        let result = d.dispatch("nim", Vec::new(), &mut Vec::<u8>::new()).await;

        assert!(matches!(result, Err(DispatchError::Bus(_))));
        assert_eq!(result.unwrap_err().exit_code(), EXIT_FATAL);
        assert!(recorder.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_supervisor_init_failure_is_fatal() {
        let recorder = Arc::new(Recorder::default());
        let init = Arc::new(CountingInit { calls: AtomicUsize::new(0), fail: true });
        let d = dispatcher(SUPERVISOR_IDENTITY, recorder.clone(), ZedboxConfig::default())
            .with_environment(init.clone());
        let mut out: Vec<u8> = Vec::new();

        let result = d.dispatch(SUPERVISOR_IDENTITY, Vec::new(), &mut out).await;

        assert!(matches!(result, Err(DispatchError::Bootstrap(_))));
        assert_eq!(init.calls.load(Ordering::SeqCst), 1);
        assert!(out.is_empty());
        assert!(recorder.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_supervisor_miss_skips_initialization() {
        let init = Arc::new(CountingInit { calls: AtomicUsize::new(0), fail: true });
        let d = dispatcher("diag", Arc::new(Recorder::default()), ZedboxConfig::default())
            .with_environment(init.clone());

        let outcome = d.dispatch("diag", Vec::new(), &mut Vec::<u8>::new()).await.unwrap();

        assert_eq!(outcome, Dispatch::UnknownPackage("diag".into()));
        assert_eq!(init.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_bootstrap_bus_uses_socket_driver() {
        let log = agentlog::init("zedagent", &LogConfig::default());
        let ps = bootstrap_bus(&ZedboxConfig::default(), &log).unwrap();
        assert_eq!(ps.driver_name(), "socket");
        assert_eq!(ps.agent_name(), "zedagent");
    }
}
