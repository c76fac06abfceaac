//! Error handling for unilock.
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by [`Filelock`](crate::filelock::Filelock) operations.
///
/// A contended non-blocking attempt is *not* an error: the try-variants
/// report it as `Ok(false)` so callers can distinguish "try again later"
/// from real failure.
#[derive(Debug, Error)]
pub enum FilelockError {
    /// An open/lock/unlock syscall failed, wrapped with the operation
    /// name and the lock path.
    #[error("{op} on {path:?} failed: {source}")]
    Io {
        /// The operation that failed (`open`, `lock`, `unlock`, ...).
        op: &'static str,
        /// The lock file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The target platform has no advisory locking primitive.
    #[error("file locking is not supported on this platform ({op} on {path:?})")]
    NotSupported {
        /// The operation that was attempted.
        op: &'static str,
        /// The lock file path.
        path: PathBuf,
    },

    /// A polling wait was cancelled through its token.
    #[error("lock wait cancelled")]
    Cancelled,

    /// A polling wait ran past its deadline.
    #[error("lock wait deadline exceeded")]
    DeadlineExceeded,

    /// An accessor needed an open handle but no lock is held.
    #[error("no lock held on {path:?}")]
    NotHeld {
        /// The lock file path.
        path: PathBuf,
    },
}

/// Error type for PID file operations.
#[derive(Debug, Error)]
pub enum PidFileError {
    /// Error from the underlying advisory lock.
    #[error("PID file lock error: {0}")]
    Lock(#[from] FilelockError),

    /// Error reading or writing the PID file itself.
    #[error("PID file I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// PID file content is not a valid decimal integer.
    #[error("invalid PID file content: {0}")]
    Parse(#[from] std::num::ParseIntError),

    /// Another live instance already holds the lock on this PID file.
    #[error("another instance already holds {path:?}")]
    AlreadyRunning {
        /// The contended PID file path.
        path: PathBuf,
    },

    /// The PID file was never claimed (run directory absent) or has been
    /// closed, so there is nothing to read.
    #[error("PID file {path:?} is not claimed")]
    NotClaimed {
        /// The configured PID file path.
        path: PathBuf,
    },
}

/// Error type for service-control dispatch.
#[derive(Debug, Error)]
pub enum ServiceControlError {
    /// No backend on this host reported itself usable.
    #[error("no usable service-control backend on this platform")]
    NoBackend,

    /// Error spawning the backend's control tool.
    #[error("failed to run {tool} for service '{service}': {source}")]
    SpawnError {
        /// The control tool that could not be spawned.
        tool: &'static str,
        /// The service being controlled.
        service: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// The backend's control tool exited with a non-zero status.
    #[error("{tool} {command} for service '{service}' exited with status {status:?}")]
    CommandFailed {
        /// The control tool that was invoked.
        tool: &'static str,
        /// The subcommand that was dispatched.
        command: String,
        /// The service being controlled.
        service: String,
        /// The exit code, if any.
        status: Option<i32>,
    },
}

/// Top-level error aggregating every failure a
/// [`ServiceManager`](crate::control::ServiceManager) can surface to its
/// caller.
#[derive(Debug, Error)]
pub enum ServiceManagerError {
    /// Error reading a service configuration file.
    #[error("failed to read config file: {0}")]
    ConfigReadError(#[from] std::io::Error),

    /// Error parsing YAML configuration.
    #[error("invalid YAML format: {0}")]
    ConfigParseError(#[from] serde_yaml::Error),

    /// Error from the advisory file lock.
    #[error("file lock error: {0}")]
    FilelockError(#[from] FilelockError),

    /// Error from the PID file lifecycle.
    #[error("PID file error: {0}")]
    PidFileError(#[from] PidFileError),

    /// Error from the service-control backend.
    #[error("service control error: {0}")]
    ControlError(#[from] ServiceControlError),

    /// Another instance of the named service is already running.
    #[error("service '{service}' is already running (PID file {path:?} is locked)")]
    AlreadyRunning {
        /// The service name.
        service: String,
        /// The contended PID file path.
        path: PathBuf,
    },
}
