use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::join_all;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::model::{DateLock, LockOwner};

#[derive(Debug)]
pub enum LockError {
    Io(io::Error),
}

impl std::fmt::Display for LockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockError::Io(e) => write!(f, "lock store I/O error: {e}"),
        }
    }
}

impl std::error::Error for LockError {}

impl From<io::Error> for LockError {
    fn from(e: io::Error) -> Self {
        LockError::Io(e)
    }
}

// ── Lock stores ──────────────────────────────────────────────────

/// Shared per-date lock table. At most one live lock per date.
#[async_trait]
pub trait DateLockStore: Send + Sync {
    /// Atomic insert-if-absent. `Ok(true)` iff this call created the lock;
    /// an existing lock is left untouched.
    async fn try_acquire(&self, date: NaiveDate, owner: &LockOwner) -> Result<bool, LockError>;

    /// Remove the lock on `date` if `owner` holds it. A missing lock is a no-op.
    async fn release(&self, date: NaiveDate, owner: &LockOwner) -> Result<(), LockError>;
}

#[async_trait]
impl<T: DateLockStore + ?Sized> DateLockStore for Arc<T> {
    async fn try_acquire(&self, date: NaiveDate, owner: &LockOwner) -> Result<bool, LockError> {
        (**self).try_acquire(date, owner).await
    }

    async fn release(&self, date: NaiveDate, owner: &LockOwner) -> Result<(), LockError> {
        (**self).release(date, owner).await
    }
}

/// Process-local lock table.
#[derive(Debug, Default)]
pub struct InMemoryDateLocks {
    locks: DashMap<NaiveDate, LockOwner>,
}

impl InMemoryDateLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn holder(&self, date: NaiveDate) -> Option<DateLock> {
        self.locks.get(&date).map(|e| DateLock {
            date,
            owner: e.value().clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[async_trait]
impl DateLockStore for InMemoryDateLocks {
    async fn try_acquire(&self, date: NaiveDate, owner: &LockOwner) -> Result<bool, LockError> {
        match self.locks.entry(date) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(owner.clone());
                Ok(true)
            }
        }
    }

    async fn release(&self, date: NaiveDate, owner: &LockOwner) -> Result<(), LockError> {
        self.locks.remove_if(&date, |_, held| held == owner);
        Ok(())
    }
}

/// Lock table shared between processes through a directory: one
/// `<date>.lock` file per held date holding the owner token. A lock is
/// taken by hard-linking a staged owner file into place, which fails if the
/// date is already held.
#[derive(Debug, Clone)]
pub struct FsDateLocks {
    dir: PathBuf,
}

impl FsDateLocks {
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{date}.lock"))
    }

    fn staging_path_for(&self, date: NaiveDate, owner: &LockOwner) -> PathBuf {
        self.dir.join(format!("{date}.{owner}.tmp"))
    }

    pub async fn holder(&self, date: NaiveDate) -> Result<Option<DateLock>, LockError> {
        match tokio::fs::read_to_string(self.path_for(date)).await {
            Ok(owner) => Ok(Some(DateLock {
                date,
                owner: LockOwner::from(owner),
            })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl DateLockStore for FsDateLocks {
    async fn try_acquire(&self, date: NaiveDate, owner: &LockOwner) -> Result<bool, LockError> {
        // The owner is written to a private file first and published with a
        // hard link, so `<date>.lock` never exists without its full owner.
        let staged = self.staging_path_for(date, owner);
        let written = async {
            let mut file = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&staged)
                .await?;
            file.write_all(owner.as_str().as_bytes()).await?;
            file.sync_all().await
        }
        .await;
        let linked = match written {
            Ok(()) => match tokio::fs::hard_link(&staged, self.path_for(date)).await {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
                Err(e) => Err(e.into()),
            },
            Err(e) => Err(e.into()),
        };
        if let Err(e) = tokio::fs::remove_file(&staged).await {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("could not remove staged lock {}: {e}", staged.display());
            }
        }
        linked
    }

    async fn release(&self, date: NaiveDate, owner: &LockOwner) -> Result<(), LockError> {
        let path = self.path_for(date);
        let held = match tokio::fs::read_to_string(&path).await {
            Ok(held) => held,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if held != owner.as_str() {
            debug!("lock on {date} held by {held}, not {owner}; leaving it");
            return Ok(());
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ── Coordinators ─────────────────────────────────────────────────

/// Outcome of one `acquire_all` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Acquisition {
    /// Dates this call newly locked. The only dates the caller may release.
    pub acquired: Vec<NaiveDate>,
    /// Dates already locked by someone else (or that could not be attempted).
    pub contended: Vec<NaiveDate>,
}

impl Acquisition {
    pub fn is_complete(&self) -> bool {
        self.contended.is_empty()
    }
}

/// Serializes booking attempts on overlapping dates. Never waits: a
/// contended date is reported immediately.
#[async_trait]
pub trait DateLockCoordinator: Send + Sync {
    async fn acquire_all(&self, dates: &[NaiveDate], owner: &LockOwner) -> Acquisition;

    /// Best-effort. Failures are logged, never returned.
    async fn release_all(&self, dates: &[NaiveDate], owner: &LockOwner);
}

/// One lock per date in a shared [`DateLockStore`]. Works across processes
/// when the store does.
pub struct PerDateCoordinator<S> {
    store: S,
}

impl<S: DateLockStore> PerDateCoordinator<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

#[async_trait]
impl<S: DateLockStore> DateLockCoordinator for PerDateCoordinator<S> {
    async fn acquire_all(&self, dates: &[NaiveDate], owner: &LockOwner) -> Acquisition {
        // Every date is attempted, even after one fails, so the caller learns
        // exactly which locks it now owns.
        let attempts = join_all(dates.iter().map(|&date| async move {
            (date, self.store.try_acquire(date, owner).await)
        }))
        .await;

        let mut acquisition = Acquisition::default();
        for (date, attempt) in attempts {
            match attempt {
                Ok(true) => acquisition.acquired.push(date),
                Ok(false) => acquisition.contended.push(date),
                Err(e) => {
                    warn!("lock attempt on {date} for {owner} failed: {e}");
                    acquisition.contended.push(date);
                }
            }
        }
        acquisition
    }

    async fn release_all(&self, dates: &[NaiveDate], owner: &LockOwner) {
        let results = join_all(dates.iter().map(|&date| async move {
            (date, self.store.release(date, owner).await)
        }))
        .await;
        for (date, result) in results {
            if let Err(e) = result {
                warn!("failed to release lock on {date} for {owner}: {e}");
                metrics::counter!(crate::observability::LOCK_RELEASE_FAILURES_TOTAL).increment(1);
            }
        }
    }
}

/// Single process-wide mutex behind the same interface. Whoever holds it
/// holds every date; correct only for a single-instance deployment.
#[derive(Debug, Default)]
pub struct GlobalCoordinator {
    holder: Mutex<Option<LockOwner>>,
}

impl GlobalCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn holder(&self) -> Option<LockOwner> {
        self.holder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl DateLockCoordinator for GlobalCoordinator {
    async fn acquire_all(&self, dates: &[NaiveDate], owner: &LockOwner) -> Acquisition {
        if dates.is_empty() {
            return Acquisition::default();
        }
        let mut holder = self.holder.lock().unwrap_or_else(PoisonError::into_inner);
        if holder.is_some() {
            return Acquisition {
                acquired: Vec::new(),
                contended: dates.to_vec(),
            };
        }
        *holder = Some(owner.clone());
        Acquisition {
            acquired: dates.to_vec(),
            contended: Vec::new(),
        }
    }

    async fn release_all(&self, dates: &[NaiveDate], owner: &LockOwner) {
        if dates.is_empty() {
            return;
        }
        let mut holder = self.holder.lock().unwrap_or_else(PoisonError::into_inner);
        if holder.as_ref() == Some(owner) {
            *holder = None;
        }
    }
}
