//! Whole-workdir mutual exclusion across processes.
//!
//! One invocation at a time may touch the registry, the Vagrantfile and the
//! vagrant data directory. The lock blocks without a timeout and is released
//! when the guard is dropped, on error paths included. A process killed while
//! holding a marker lock leaves the lock file behind; it must be removed by hand.

use fs2::FileExt;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use crate::error::FleetError;

/// Chosen per invocation. Marker holders also take the advisory lock where the
/// filesystem supports it, so mixed strategies on one workdir still exclude
/// each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LockStrategy {
    /// Advisory lock, falling back to an exclusive marker file.
    Auto,
    /// `flock`-style advisory lock on the lock file.
    Advisory,
    /// Exclusive creation of the lock file; waits while it exists.
    Marker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMechanism {
    Advisory,
    Marker,
}

type ExclusiveLockFn = fn(&File) -> io::Result<()>;

#[derive(Clone)]
pub struct LockManager {
    path: PathBuf,
    strategy: LockStrategy,
    poll: Duration,
    lock_exclusive: ExclusiveLockFn,
}

impl fmt::Debug for LockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockManager")
            .field("path", &self.path)
            .field("strategy", &self.strategy)
            .field("poll", &self.poll)
            .finish()
    }
}

/// Held lock. Dropping it removes the lock file.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    file: Option<File>,
    mechanism: LockMechanism,
}

enum Attempt {
    Acquired(LockGuard),
    Unsupported(io::Error),
}

impl LockManager {
    pub fn new(path: &Path, strategy: LockStrategy, poll: Duration) -> Self {
        Self {
            path: path.to_path_buf(),
            strategy,
            poll,
            lock_exclusive: flock_exclusive,
        }
    }

    #[cfg(test)]
    fn with_lock_fn(mut self, lock_exclusive: ExclusiveLockFn) -> Self {
        self.lock_exclusive = lock_exclusive;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn acquire(&self) -> Result<LockGuard, FleetError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let attempt = match self.strategy {
            LockStrategy::Advisory => self.acquire_advisory()?,
            LockStrategy::Marker => self.acquire_marker()?,
            LockStrategy::Auto => match self.acquire_advisory()? {
                Attempt::Acquired(guard) => Attempt::Acquired(guard),
                Attempt::Unsupported(err) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %err,
                        "advisory locking unavailable, falling back to marker file"
                    );
                    self.acquire_marker()?
                }
            },
        };
        match attempt {
            Attempt::Acquired(guard) => {
                tracing::debug!(
                    path = %self.path.display(),
                    mechanism = ?guard.mechanism,
                    "lock acquired"
                );
                Ok(guard)
            }
            Attempt::Unsupported(err) => Err(FleetError::LockingUnsupported {
                path: self.path.display().to_string(),
                reason: err.to_string(),
            }),
        }
    }

    fn acquire_advisory(&self) -> Result<Attempt, FleetError> {
        loop {
            let (file, created) = open_or_create(&self.path)?;
            if let Err(err) = (self.lock_exclusive)(&file) {
                if is_unsupported(&err) {
                    // A file we created ourselves would otherwise block the
                    // marker fallback forever.
                    drop(file);
                    if created {
                        remove_lock_file(&self.path)?;
                    }
                    return Ok(Attempt::Unsupported(err));
                }
                return Err(err.into());
            }
            // The previous holder unlinks the file on release; a lock taken on
            // an unlinked inode excludes nobody.
            if same_file(&file, &self.path) {
                return Ok(Attempt::Acquired(LockGuard {
                    path: self.path.clone(),
                    file: Some(file),
                    mechanism: LockMechanism::Advisory,
                }));
            }
            let _ = file.unlock();
        }
    }

    fn acquire_marker(&self) -> Result<Attempt, FleetError> {
        let mut warned = false;
        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.path)
            {
                Ok(mut file) => {
                    let _ = writeln!(file, "{}", std::process::id());
                    let file = match (self.lock_exclusive)(&file) {
                        Ok(()) if same_file(&file, &self.path) => Some(file),
                        // An advisory holder opened our marker and has since
                        // released and unlinked it.
                        Ok(()) => {
                            let _ = file.unlock();
                            continue;
                        }
                        Err(err) if is_unsupported(&err) => None,
                        Err(err) => {
                            drop(file);
                            remove_lock_file(&self.path)?;
                            return Err(err.into());
                        }
                    };
                    return Ok(Attempt::Acquired(LockGuard {
                        path: self.path.clone(),
                        file,
                        mechanism: LockMechanism::Marker,
                    }));
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    if !warned {
                        tracing::info!(
                            path = %self.path.display(),
                            "waiting for lock held by another invocation"
                        );
                        warned = true;
                    }
                    thread::sleep(self.poll);
                }
                Err(err) if is_unsupported(&err) => return Ok(Attempt::Unsupported(err)),
                Err(err) => return Err(err.into()),
            }
        }
    }
}

impl LockGuard {
    pub fn mechanism(&self) -> LockMechanism {
        self.mechanism
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            if err.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %err, "failed to remove lock file");
            }
        }
        if let Some(file) = self.file.take() {
            let _ = file.unlock();
        }
        tracing::debug!(path = %self.path.display(), "lock released");
    }
}

fn flock_exclusive(file: &File) -> io::Result<()> {
    file.lock_exclusive()
}

/// Opens the lock file, reporting whether this call created it.
fn open_or_create(path: &Path) -> io::Result<(File, bool)> {
    loop {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => return Ok((file, true)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
            Err(err) => return Err(err),
        }
        match OpenOptions::new().write(true).open(path) {
            Ok(file) => return Ok((file, false)),
            // Released between the two opens.
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => return Err(err),
        }
    }
}

fn remove_lock_file(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

fn is_unsupported(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::Unsupported || is_no_lock_daemon(err)
}

/// NFS without a lock daemon.
#[cfg(unix)]
fn is_no_lock_daemon(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ENOLCK)
}

#[cfg(not(unix))]
fn is_no_lock_daemon(_err: &io::Error) -> bool {
    false
}

#[cfg(unix)]
fn same_file(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (file.metadata(), fs::metadata(path)) {
        (Ok(held), Ok(current)) => held.dev() == current.dev() && held.ino() == current.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn same_file(_file: &File, path: &Path) -> bool {
    path.exists()
}
