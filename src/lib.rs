//! Unilock is a single-instance coordination library for Unix-like operating
//! systems. It layers a process-wide advisory file lock, a PID-file lifecycle
//! bound to that lock, and a thin service-control dispatcher so a program can
//! guarantee one running copy of itself and wire that guarantee into the
//! host's service manager.

/// Cancellation tokens and bounded-wait contexts.
pub mod cancel;

/// Service configuration loading.
pub mod config;

/// Service-control command dispatch.
pub mod control;

/// Error handling.
pub mod error;

/// Cross-process advisory file locking.
pub mod filelock;

/// PID-file claiming and lifecycle.
pub mod pidfile;

/// Shutdown-time peripheral registry.
pub mod registry;
