//! Cancellation and deadline plumbing for polled lock waits.
//!
//! Blocking [`Filelock::lock`](crate::filelock::Filelock::lock) calls park
//! in the OS primitive and cannot be interrupted; the polling variants take
//! a [`WaitContext`] instead, which bounds the wait with a deadline, a
//! [`CancelToken`], or both.
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::{Duration, Instant};

use crate::error::FilelockError;

/// Cloneable cancellation flag shared between the waiter and whoever may
/// interrupt it (another thread, a signal handler).
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Flips the token; every wait holding a clone observes it on its next
    /// poll boundary.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether the token has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Bounds for a polled lock wait: an optional deadline and an optional
/// cancellation token. The default ([`WaitContext::background`]) never
/// expires.
#[derive(Debug, Clone, Default)]
pub struct WaitContext {
    deadline: Option<Instant>,
    token: Option<CancelToken>,
}

impl WaitContext {
    /// A context that is never done; the wait only ends on lock success or
    /// I/O failure.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context that expires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// A context that expires at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            token: None,
        }
    }

    /// A context cancelled through `token`.
    pub fn with_token(token: CancelToken) -> Self {
        Self {
            deadline: None,
            token: Some(token),
        }
    }

    /// Attaches a cancellation token to an existing context.
    pub fn token(mut self, token: CancelToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Reports why the context is done, or `None` while it is still live.
    /// Cancellation is checked before the deadline, mirroring the order
    /// the waiter observes them.
    pub fn error(&self) -> Option<FilelockError> {
        if let Some(token) = &self.token
            && token.is_cancelled()
        {
            return Some(FilelockError::Cancelled);
        }

        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            return Some(FilelockError::DeadlineExceeded);
        }

        None
    }

    /// Caps a poll sleep so it never runs past the deadline.
    pub fn clamp(&self, delay: Duration) -> Duration {
        match self.deadline {
            Some(deadline) => delay.min(deadline.saturating_duration_since(Instant::now())),
            None => delay,
        }
    }
}

/// Wires SIGINT/Ctrl-C into a [`CancelToken`] so an interrupted startup
/// abandons its lock wait instead of dying mid-claim.
///
/// The process-wide handler can only be installed once; a second call
/// reports the `ctrlc` error.
pub fn cancel_on_ctrlc() -> Result<CancelToken, ctrlc::Error> {
    let token = CancelToken::new();
    let handle = token.clone();
    ctrlc::set_handler(move || handle.cancel())?;
    Ok(token)
}
