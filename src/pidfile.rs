//! PID-file lifecycle: a best-effort single-instance guarantee per service.
//!
//! A [`PidFile`] claims an advisory lock on `{run_dir}/{name}.pid`, records
//! the current process id there for external inspection (stop/restart
//! tooling reads it back), and removes the file on close.
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use nix::sys::signal;
use nix::unistd::{Pid, geteuid};
use tracing::{debug, info, warn};

use crate::cancel::WaitContext;
use crate::error::{FilelockError, PidFileError};
use crate::filelock::Filelock;
use crate::registry::Peripheral;

/// The claim outcome: exactly one arm is active at a time.
#[derive(Debug)]
enum PidHandle {
    /// Run directory absent, or the claim has been closed. No instance
    /// guarantee is in effect.
    Inactive,
    /// Plain created file, written after the escalated-removal path ran.
    Owned(File),
    /// Normal claim: the lock handle doubles as the file handle.
    Locked(Filelock),
}

/// Claims and owns a service's PID file.
///
/// A missing run directory is treated as a deployment without instance
/// tracking: the claim succeeds silently and no guarantee is attempted.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    handle: PidHandle,
}

impl PidFile {
    /// Attempts to claim `{run_dir}/{name}.pid` without waiting.
    ///
    /// Returns [`PidFileError::AlreadyRunning`] when another live instance
    /// holds the lock; the caller decides whether that is fatal.
    pub fn claim(run_dir: &Path, name: &str) -> Result<Self, PidFileError> {
        Self::claim_inner(run_dir, name, None, Duration::ZERO)
    }

    /// Like [`PidFile::claim`], but polls for the lock until `ctx` is
    /// done, for startup flows that wait out a previous instance. A claim
    /// still contended at the deadline surfaces as
    /// [`FilelockError::DeadlineExceeded`] (or `Cancelled`) through the
    /// lock error arm.
    pub fn claim_wait(
        run_dir: &Path,
        name: &str,
        ctx: &WaitContext,
        retry_delay: Duration,
    ) -> Result<Self, PidFileError> {
        Self::claim_inner(run_dir, name, Some(ctx), retry_delay)
    }

    fn claim_inner(
        run_dir: &Path,
        name: &str,
        ctx: Option<&WaitContext>,
        retry_delay: Duration,
    ) -> Result<Self, PidFileError> {
        let path = run_dir.join(format!("{name}.pid"));

        if !run_dir.is_dir() {
            debug!(
                "Run directory {:?} does not exist; skipping PID file for '{}'",
                run_dir, name
            );
            return Ok(Self {
                path,
                handle: PidHandle::Inactive,
            });
        }

        let pid = std::process::id();
        let lock = Filelock::new(&path);

        let attempt = match ctx {
            Some(ctx) => lock.try_lock_context(ctx, retry_delay),
            None => lock.try_lock(),
        };

        match attempt {
            Ok(true) => {
                lock.write_contents(&pid.to_string())?;
                info!("PID file created: {:?} (pid {})", path, pid);
                Ok(Self {
                    path,
                    handle: PidHandle::Locked(lock),
                })
            }
            Ok(false) => Err(PidFileError::AlreadyRunning { path }),
            Err(FilelockError::Io { source, .. })
                if source.kind() == io::ErrorKind::PermissionDenied
                    && !owns_path(&path) =>
            {
                Self::claim_escalated(path, pid)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Hardening path for a stale PID file owned by another account:
    /// remove it with elevated privileges and retry the claim once.
    fn claim_escalated(path: PathBuf, pid: u32) -> Result<Self, PidFileError> {
        warn!(
            "PID file {:?} is not accessible; retrying after escalated removal",
            path
        );
        escalated_remove(&path)?;

        let lock = Filelock::new(&path);
        match lock.try_lock()? {
            false => Err(PidFileError::AlreadyRunning { path }),
            true => {
                // The lock outlived its purpose once the path is ours
                // again; hold the re-created file directly.
                lock.unlock()?;
                let mut file = File::create(&path)?;
                file.write_all(pid.to_string().as_bytes())?;
                file.flush()?;
                info!("PID file re-created after removal: {:?} (pid {})", path, pid);
                Ok(Self {
                    path,
                    handle: PidHandle::Owned(file),
                })
            }
        }
    }

    /// The configured PID file path, whether or not it was claimed.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a claim is in effect (false when the run directory was
    /// absent or after close).
    pub fn claimed(&self) -> bool {
        !matches!(self.handle, PidHandle::Inactive)
    }

    /// Parses the decimal PID recorded in the file.
    pub fn read_pid(&self) -> Result<i32, PidFileError> {
        let contents = match &self.handle {
            PidHandle::Inactive => {
                return Err(PidFileError::NotClaimed {
                    path: self.path.clone(),
                });
            }
            PidHandle::Locked(lock) => lock.read_contents()?,
            PidHandle::Owned(_) => fs::read_to_string(&self.path)?,
        };

        Ok(contents.trim().parse()?)
    }

    /// Signal-0 probe of the recorded PID.
    ///
    /// A resolvable PID only proves *some* process has that id; after PID
    /// reuse it may not be this service. Deliberately kept at the weak
    /// robustness level rather than comparing command lines or start
    /// times.
    pub fn is_running(&self) -> bool {
        match self.read_pid() {
            Ok(pid) => signal::kill(Pid::from_raw(pid as libc::pid_t), None).is_ok(),
            Err(_) => false,
        }
    }

    /// Releases the lock or file handle and deletes the PID file.
    /// Teardown failures are logged, not escalated. Idempotent.
    pub fn close(&mut self) {
        let handle = std::mem::replace(&mut self.handle, PidHandle::Inactive);
        match handle {
            PidHandle::Inactive => return,
            PidHandle::Owned(file) => drop(file),
            PidHandle::Locked(lock) => {
                if let Err(err) = lock.close() {
                    warn!("Failed to release PID file lock {:?}: {}", self.path, err);
                }
            }
        }

        match fs::remove_file(&self.path) {
            Ok(()) => info!("PID file removed: {:?}", self.path),
            Err(err) => warn!("Failed to remove PID file {:?}: {}", self.path, err),
        }
    }
}

impl Peripheral for PidFile {
    fn close(&mut self) {
        PidFile::close(self);
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        self.close();
    }
}

/// Whether the current effective user owns `path` (a root caller owns
/// everything for this purpose).
fn owns_path(path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    let euid = geteuid();
    if euid.is_root() {
        return true;
    }

    match fs::metadata(path) {
        Ok(meta) => meta.uid() == euid.as_raw(),
        // Can't stat it; treat as foreign so the escalated path may run.
        Err(_) => false,
    }
}

/// Removes a foreign-owned stale PID file via `sudo rm -f`.
fn escalated_remove(path: &Path) -> io::Result<()> {
    let status = Command::new("sudo").arg("rm").arg("-f").arg(path).status()?;
    if !status.success() {
        return Err(io::Error::other(format!(
            "sudo rm -f {:?} exited with {status}",
            path
        )));
    }
    Ok(())
}
