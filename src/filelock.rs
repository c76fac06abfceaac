//! Advisory file locking bound to a filesystem path.
//!
//! A [`Filelock`] mediates exclusive or shared access to a named resource
//! represented by a path. Contention between instances in the same process
//! and between processes is resolved by the OS advisory-lock primitive;
//! the instance's internal mutex only protects its own bookkeeping.
//!
//! `lock`/`rlock` park the calling thread in the OS call and cannot be
//! cancelled. Callers that need a bounded wait use the polling
//! `try_*_context` variants with a [`WaitContext`].
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

use tracing::debug;

use crate::cancel::WaitContext;
use crate::error::FilelockError;

/// Open configuration for the backing lock file.
///
/// The default creates the file if missing and opens it read-write with
/// permissions `0o600`. `OpenOptions` cannot create a file without write
/// access, so create-if-missing implies a writable handle; use
/// [`LockOptions::read_only`] to lock a directory or a pre-existing file
/// the caller may not write.
#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    create: bool,
    write: bool,
    mode: u32,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            create: true,
            write: true,
            mode: 0o600,
        }
    }
}

impl LockOptions {
    /// Create-if-missing, read-write. The default.
    pub fn read_write() -> Self {
        Self::default()
    }

    /// Open an existing path read-only without creating it. Required for
    /// locking directories.
    pub fn read_only() -> Self {
        Self {
            create: false,
            write: false,
            mode: 0o600,
        }
    }

    /// Permission bits applied when the file is created.
    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }
}

#[derive(Debug, Default)]
struct LockState {
    handle: Option<File>,
    exclusive: bool,
    shared: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockMode {
    Exclusive,
    Shared,
}

/// Cross-process advisory lock on a filesystem path.
///
/// Construction performs no I/O; the backing file is opened lazily on the
/// first acquire attempt. An instance may be locked, unlocked, re-locked
/// and closed repeatedly over its lifetime.
#[derive(Debug)]
pub struct Filelock {
    path: PathBuf,
    opts: LockOptions,
    state: Mutex<LockState>,
}

impl Filelock {
    /// Creates a lock bound to `path` with default open options.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_options(path, LockOptions::default())
    }

    /// Creates a lock bound to `path` with explicit open options.
    pub fn with_options(path: impl Into<PathBuf>, opts: LockOptions) -> Self {
        Self {
            path: path.into(),
            opts,
            state: Mutex::new(LockState::default()),
        }
    }

    /// The path this lock is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this instance holds the exclusive lock.
    ///
    /// Warning: the state may change the moment this returns; the snapshot
    /// is only useful for diagnostics.
    pub fn locked(&self) -> bool {
        self.state().exclusive
    }

    /// Whether this instance holds a shared lock. Racy in the same way as
    /// [`Filelock::locked`].
    pub fn rlocked(&self) -> bool {
        self.state().shared
    }

    /// Blocking exclusive acquire. Returns immediately if this instance
    /// already holds the exclusive lock. The wait parks in the OS
    /// primitive and cannot be cancelled.
    pub fn lock(&self) -> Result<(), FilelockError> {
        self.acquire(LockMode::Exclusive)
    }

    /// Blocking shared acquire; idempotent like [`Filelock::lock`].
    pub fn rlock(&self) -> Result<(), FilelockError> {
        self.acquire(LockMode::Shared)
    }

    /// Non-blocking exclusive acquire. `Ok(true)` on success (or when the
    /// exclusive lock is already held), `Ok(false)` when another holder
    /// prevents acquisition, `Err` on I/O failure. A contended attempt
    /// that leaves no lock held also closes the transient file handle.
    pub fn try_lock(&self) -> Result<bool, FilelockError> {
        self.try_acquire(LockMode::Exclusive)
    }

    /// Shared analogue of [`Filelock::try_lock`].
    pub fn try_rlock(&self) -> Result<bool, FilelockError> {
        self.try_acquire(LockMode::Shared)
    }

    /// Polls [`Filelock::try_lock`] every `retry_delay` until it succeeds,
    /// fails with an I/O error, or `ctx` is done. An already-done context
    /// returns its error without attempting a lock. Only the contended
    /// outcome is retried.
    pub fn try_lock_context(
        &self,
        ctx: &WaitContext,
        retry_delay: Duration,
    ) -> Result<bool, FilelockError> {
        self.try_context(ctx, retry_delay, LockMode::Exclusive)
    }

    /// Shared analogue of [`Filelock::try_lock_context`].
    pub fn try_rlock_context(
        &self,
        ctx: &WaitContext,
        retry_delay: Duration,
    ) -> Result<bool, FilelockError> {
        self.try_context(ctx, retry_delay, LockMode::Shared)
    }

    /// Releases whichever lock is held and closes the backing handle.
    /// Idempotent: unlocking an unlocked instance is a no-op.
    pub fn unlock(&self) -> Result<(), FilelockError> {
        let mut st = self.state();

        if (!st.exclusive && !st.shared) || st.handle.is_none() {
            st.exclusive = false;
            st.shared = false;
            st.handle = None;
            return Ok(());
        }

        let result = match st.handle.as_ref() {
            Some(file) => sys::unlock(file),
            None => Ok(()),
        };

        match result {
            Ok(()) => {
                st.exclusive = false;
                st.shared = false;
                st.handle = None;
                debug!("Released lock on {:?}", self.path);
                Ok(())
            }
            Err(source) => Err(self.map_err("unlock", source)),
        }
    }

    /// Equivalent to [`Filelock::unlock`]. Does not remove the file from
    /// disk; that is the owner's job.
    pub fn close(&self) -> Result<(), FilelockError> {
        self.unlock()
    }

    /// Replaces the backing file's content through the held handle.
    /// Fails when no lock is held.
    pub fn write_contents(&self, data: &str) -> Result<(), FilelockError> {
        let mut st = self.state();
        let Some(file) = st.handle.as_mut() else {
            return Err(FilelockError::NotHeld {
                path: self.path.clone(),
            });
        };

        let result: io::Result<()> = (|| {
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            file.write_all(data.as_bytes())?;
            file.flush()
        })();

        result.map_err(|source| FilelockError::Io {
            op: "write",
            path: self.path.clone(),
            source,
        })
    }

    /// Reads the backing file's content through the held handle.
    pub fn read_contents(&self) -> Result<String, FilelockError> {
        let mut st = self.state();
        let Some(file) = st.handle.as_mut() else {
            return Err(FilelockError::NotHeld {
                path: self.path.clone(),
            });
        };

        let result: io::Result<String> = (|| {
            file.seek(SeekFrom::Start(0))?;
            let mut buf = String::new();
            file.read_to_string(&mut buf)?;
            Ok(buf)
        })();

        result.map_err(|source| FilelockError::Io {
            op: "read",
            path: self.path.clone(),
            source,
        })
    }

    fn state(&self) -> MutexGuard<'_, LockState> {
        // Bookkeeping stays consistent even if a panic poisoned the mutex.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn held(st: &LockState, mode: LockMode) -> bool {
        match mode {
            LockMode::Exclusive => st.exclusive,
            LockMode::Shared => st.shared,
        }
    }

    fn record(st: &mut LockState, mode: LockMode) {
        match mode {
            LockMode::Exclusive => {
                st.exclusive = true;
                st.shared = false;
            }
            LockMode::Shared => {
                st.shared = true;
                st.exclusive = false;
            }
        }
    }

    fn acquire(&self, mode: LockMode) -> Result<(), FilelockError> {
        let op = match mode {
            LockMode::Exclusive => "lock",
            LockMode::Shared => "rlock",
        };

        let mut st = self.state();
        if Self::held(&st, mode) {
            return Ok(());
        }

        self.ensure_open(&mut st)?;

        let result = match st.handle.as_ref() {
            Some(file) => sys::lock(file, mode == LockMode::Exclusive),
            None => Ok(()),
        };

        match result {
            Ok(()) => {
                Self::record(&mut st, mode);
                debug!("Acquired {} on {:?}", op, self.path);
                Ok(())
            }
            Err(source) => {
                Self::release_if_unheld(&mut st);
                Err(self.map_err(op, source))
            }
        }
    }

    fn try_acquire(&self, mode: LockMode) -> Result<bool, FilelockError> {
        let op = match mode {
            LockMode::Exclusive => "try_lock",
            LockMode::Shared => "try_rlock",
        };

        let mut st = self.state();
        if Self::held(&st, mode) {
            return Ok(true);
        }

        self.ensure_open(&mut st)?;

        let result = match st.handle.as_ref() {
            Some(file) => sys::try_lock(file, mode == LockMode::Exclusive),
            None => Ok(()),
        };

        match result {
            Ok(()) => {
                Self::record(&mut st, mode);
                Ok(true)
            }
            Err(source) if sys::is_contended(&source) => {
                Self::release_if_unheld(&mut st);
                Ok(false)
            }
            Err(source) => {
                Self::release_if_unheld(&mut st);
                Err(self.map_err(op, source))
            }
        }
    }

    fn try_context(
        &self,
        ctx: &WaitContext,
        retry_delay: Duration,
        mode: LockMode,
    ) -> Result<bool, FilelockError> {
        loop {
            if let Some(err) = ctx.error() {
                return Err(err);
            }

            if self.try_acquire(mode)? {
                return Ok(true);
            }

            thread::sleep(ctx.clamp(retry_delay));
        }
    }

    fn ensure_open(&self, st: &mut LockState) -> Result<(), FilelockError> {
        if st.handle.is_some() {
            return Ok(());
        }

        let mut opts = OpenOptions::new();
        opts.read(true);
        if self.opts.write {
            opts.write(true);
        }
        if self.opts.create {
            opts.create(true);
            #[cfg(unix)]
            opts.mode(self.opts.mode);
        }

        match opts.open(&self.path) {
            Ok(file) => {
                st.handle = Some(file);
                Ok(())
            }
            Err(source) => Err(FilelockError::Io {
                op: "open",
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Closes the transient handle when neither lock survives, so a failed
    /// attempt leaves no descriptor behind.
    fn release_if_unheld(st: &mut LockState) {
        if !st.exclusive && !st.shared {
            st.handle = None;
        }
    }

    fn map_err(&self, op: &'static str, source: io::Error) -> FilelockError {
        if source.kind() == io::ErrorKind::Unsupported {
            FilelockError::NotSupported {
                op,
                path: self.path.clone(),
            }
        } else {
            FilelockError::Io {
                op,
                path: self.path.clone(),
                source,
            }
        }
    }
}

impl fmt::Display for Filelock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

#[cfg(any(unix, windows))]
mod sys {
    use fs2::FileExt;
    use std::fs::File;
    use std::io;

    // Fully-qualified calls throughout: std's File grew inherent
    // `lock_shared`/`unlock` methods in 1.89 that would otherwise shadow
    // the fs2 trait methods.
    pub fn lock(file: &File, exclusive: bool) -> io::Result<()> {
        if exclusive {
            FileExt::lock_exclusive(file)
        } else {
            FileExt::lock_shared(file)
        }
    }

    pub fn try_lock(file: &File, exclusive: bool) -> io::Result<()> {
        if exclusive {
            FileExt::try_lock_exclusive(file)
        } else {
            FileExt::try_lock_shared(file)
        }
    }

    pub fn unlock(file: &File) -> io::Result<()> {
        FileExt::unlock(file)
    }

    pub fn is_contended(err: &io::Error) -> bool {
        err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
    }
}

#[cfg(not(any(unix, windows)))]
mod sys {
    use std::fs::File;
    use std::io;

    fn unsupported() -> io::Error {
        io::Error::new(io::ErrorKind::Unsupported, "no advisory lock primitive")
    }

    pub fn lock(_file: &File, _exclusive: bool) -> io::Result<()> {
        Err(unsupported())
    }

    // Degrades to the blocking variant's (failing) result.
    pub fn try_lock(file: &File, exclusive: bool) -> io::Result<()> {
        lock(file, exclusive)
    }

    pub fn unlock(_file: &File) -> io::Result<()> {
        Err(unsupported())
    }

    pub fn is_contended(_err: &io::Error) -> bool {
        false
    }
}
