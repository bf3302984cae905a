//! Supervisor-only environment initialization

use crate::agentlog::AgentLog;
use crate::error::CertDirError;
use std::io::ErrorKind;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One-time setup performed when the binary runs under its own name
pub trait EnvironmentInit: Send + Sync {
    /// Prepare the environment
    fn initialize(&self, log: &AgentLog) -> Result<(), CertDirError>;
}

/// Ensures the certificate directory exists, owner-only
#[derive(Debug, Clone)]
pub struct CertDir {
    path: PathBuf,
}

impl CertDir {
    /// Manage the directory at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Directory managed
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EnvironmentInit for CertDir {
    fn initialize(&self, log: &AgentLog) -> Result<(), CertDirError> {
        let _entered = log.span().enter();
        match std::fs::metadata(&self.path) {
            Ok(meta) if meta.is_dir() => {
                debug!("Certificate directory {} present", self.path.display());
                Ok(())
            }
            Ok(_) => Err(CertDirError::NotADirectory { path: self.path.clone() }),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("Creating certificate directory {}", self.path.display());
                std::fs::DirBuilder::new()
                    .recursive(true)
                    .mode(0o700)
                    .create(&self.path)
                    .map_err(|source| CertDirError::Create { path: self.path.clone(), source })
            }
            Err(source) => Err(CertDirError::Create { path: self.path.clone(), source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agentlog;
    use crate::config::LogConfig;
    use std::os::unix::fs::PermissionsExt;

    fn log() -> AgentLog {
        agentlog::init("zedbox", &LogConfig::default())
    }

    #[test]
    fn test_creates_missing_directory_owner_only() {
        let dir = tempfile::tempdir().unwrap();
        let certs = dir.path().join("persist").join("certs");

        CertDir::new(&certs).initialize(&log()).unwrap();

        let meta = std::fs::metadata(&certs).unwrap();
        assert!(meta.is_dir());
        assert_eq!(meta.permissions().mode() & 0o777, 0o700);
    }

    #[test]
    fn test_existing_directory_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("device.cert.pem"), b"pem").unwrap();

        CertDir::new(dir.path()).initialize(&log()).unwrap();
        assert!(dir.path().join("device.cert.pem").exists());
    }

    #[test]
    fn test_file_in_the_way() {
        let dir = tempfile::tempdir().unwrap();
        let certs = dir.path().join("certs");
        std::fs::write(&certs, b"not a dir").unwrap();

        let result = CertDir::new(&certs).initialize(&log());
        assert!(matches!(result, Err(CertDirError::NotADirectory { .. })));
    }
}
