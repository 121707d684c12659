//! Makes sure only one update agent runs at a time.
//!
//! The lock is a file holding the pid of its owner. A lock whose owner is gone (the agent was
//! killed, or the router lost power mid run) is stale and taken over. Signals that would
//! terminate the agent are caught by [`SignalCleanup`], which removes the lock before exiting.

use std::{
    fs::{self, OpenOptions},
    io::{self, Write as _},
    path::{Path, PathBuf},
    process,
};

use nix::{
    errno::Errno,
    sys::signal::{kill, SigSet, Signal},
    unistd::Pid,
};
use tracing::{debug, error, info, warn};

/// Attempts at creating the lock file before giving up on a lock that keeps changing hands.
const MAX_ACQUIRE_ATTEMPTS: u32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("another update agent is already running with pid {pid}")]
    AlreadyRunning { pid: i32 },
    #[error("lock kept changing hands while trying to acquire it")]
    Contended,
    #[error("failed creating lock")]
    Create(#[source] io::Error),
    #[error("failed removing stale lock")]
    RemoveStale(#[source] io::Error),
}

/// Storage for the pid of the running agent.
pub trait LockStore: Send {
    /// Atomically creates the lock holding `pid`. Returns `false` if a lock already exists.
    fn try_create(&self, pid: u32) -> io::Result<bool>;
    /// The raw contents of the lock, `None` if there is none.
    fn read(&self) -> io::Result<Option<String>>;
    /// Removes the lock. Removing a missing lock is not an error.
    fn remove(&self) -> io::Result<()>;
    /// Removes the lock only if it still holds `seen`. Returns `false` if it changed hands or
    /// vanished since it was read.
    fn remove_stale(&self, seen: &str) -> io::Result<bool>;
}

/// Tells whether a process is still alive.
pub trait ProcessProbe {
    fn is_alive(&self, pid: i32) -> bool;
}

/// Probes processes by sending them the null signal.
#[derive(Clone, Copy, Debug, Default)]
pub struct SignalProbe;

impl ProcessProbe for SignalProbe {
    fn is_alive(&self, pid: i32) -> bool {
        // 0 and negative pids address process groups.
        if pid <= 0 {
            return false;
        }
        match kill(Pid::from_raw(pid), None) {
            Ok(()) => true,
            // exists, but belongs to somebody else
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct FileLockStore {
    path: PathBuf,
}

impl FileLockStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where a lock is moved while checking that it is still the stale one.
    fn aside_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{}.stale", process::id()));
        PathBuf::from(name)
    }

    /// Removes the lock only if it holds `pid`.
    pub fn remove_if_owned(&self, pid: u32) -> io::Result<bool> {
        match self.read()? {
            Some(contents) if contents.trim() == pid.to_string() => {
                self.remove()?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

impl LockStore for FileLockStore {
    fn try_create(&self, pid: u32) -> io::Result<bool> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(e),
        };
        writeln!(file, "{pid}")?;
        file.sync_all()?;
        Ok(true)
    }

    fn read(&self) -> io::Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn remove(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    /// Renames the lock out of the way first, so that only one agent can claim a given file.
    /// A lock that turns out to have been replaced in the meantime is linked back in place.
    fn remove_stale(&self, seen: &str) -> io::Result<bool> {
        let aside = self.aside_path();
        match fs::rename(&self.path, &aside) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        }
        if fs::read_to_string(&aside).ok().as_deref() == Some(seen) {
            fs::remove_file(&aside)?;
            return Ok(true);
        }
        let restored = match fs::hard_link(&aside, &self.path) {
            Ok(()) => Ok(false),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                warn!("lock was replaced again while being restored");
                Ok(false)
            }
            Err(e) => Err(e),
        };
        fs::remove_file(&aside)?;
        restored
    }
}

/// Proof of being the only running agent. The lock is removed on drop.
pub struct RunLock {
    store: Box<dyn LockStore>,
    released: bool,
}

impl std::fmt::Debug for RunLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLock")
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl RunLock {
    /// Takes the lock for the current process.
    ///
    /// An existing lock is honored only if the process it names is alive and is not this
    /// process. Unreadable or unparsable locks are treated as stale.
    pub fn acquire(
        store: impl LockStore + 'static,
        probe: &dyn ProcessProbe,
    ) -> Result<Self, Error> {
        let own_pid = process::id();
        for _ in 0..MAX_ACQUIRE_ATTEMPTS {
            if store.try_create(own_pid).map_err(Error::Create)? {
                debug!("acquired run lock for pid {own_pid}");
                return Ok(Self {
                    store: Box::new(store),
                    released: false,
                });
            }
            let seen = match store.read() {
                Ok(Some(contents)) => Some(contents),
                // vanished in between, just try again
                Ok(None) => continue,
                Err(e) => {
                    warn!("failed reading existing lock: {e}");
                    None
                }
            };
            let holder = seen
                .as_deref()
                .and_then(|contents| contents.trim().parse::<i32>().ok());
            match holder {
                Some(pid) if pid as u32 == own_pid => {
                    warn!("existing lock names this very process; taking it over");
                }
                Some(pid) if probe.is_alive(pid) => {
                    return Err(Error::AlreadyRunning { pid });
                }
                Some(pid) => warn!("removing stale lock of dead process {pid}"),
                None => warn!("removing unreadable lock"),
            }
            let removed = match &seen {
                Some(contents) => store.remove_stale(contents),
                None => store.remove().map(|()| true),
            }
            .map_err(Error::RemoveStale)?;
            if !removed {
                debug!("lock changed hands while removing it; trying again");
            }
        }
        Err(Error::Contended)
    }

    /// Removes the lock. Failures are logged, there is nothing else left to do about them.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match self.store.remove() {
            Ok(()) => debug!("released run lock"),
            Err(e) => warn!("failed removing run lock: {e}"),
        }
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// Signals that would otherwise kill the agent with the lock still in place.
fn terminating_signals() -> SigSet {
    let mut set = SigSet::empty();
    set.add(Signal::SIGINT);
    set.add(Signal::SIGTERM);
    set.add(Signal::SIGHUP);
    set
}

/// Removes the lock file and exits with status 1 when SIGINT, SIGTERM or SIGHUP arrive.
///
/// The signals are blocked on the calling thread, which must be the main thread and must not
/// have spawned other threads yet, and waited for on a dedicated thread.
#[derive(Debug)]
pub struct SignalCleanup {
    signals: SigSet,
}

impl SignalCleanup {
    pub fn install(lock: FileLockStore) -> io::Result<Self> {
        let signals = terminating_signals();
        signals.thread_block()?;
        let own_pid = process::id();
        std::thread::Builder::new()
            .name("signal-cleanup".into())
            .spawn(move || match signals.wait() {
                Ok(signal) => {
                    error!("received {signal}; removing run lock and exiting");
                    if let Err(e) = lock.remove_if_owned(own_pid) {
                        warn!("failed removing run lock: {e}");
                    }
                    process::exit(1);
                }
                Err(e) => warn!("stopped waiting for signals: {e}"),
            })?;
        info!("installed cleanup for {signals:?}");
        Ok(Self { signals })
    }

    /// The signals blocked on the main thread. They must be unblocked before exec'ing another
    /// program, since the signal mask survives exec.
    pub fn signals(&self) -> SigSet {
        self.signals
    }
}
