//! Asynchronous handle over an [`Engine`].
//!
//! Every operation completes a single future. Engine work runs on tokio's
//! blocking pool, so awaiting an operation never blocks the caller's task on
//! file I/O. A future that is dropped before it is first polled schedules
//! nothing; once scheduled, the blocking work runs to completion.

use config::{EngineConfig, OpenOptions};
use parking_lot::{RwLock, RwLockWriteGuard};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::spawn_blocking;
use tracing::debug;

use crate::batch::WriteBatch;
use crate::catchup::CatchUpOutcome;
use crate::error::{Error, Result};
use crate::gate::WriteGate;
use crate::view::ManifestView;
use crate::Engine;

/// Clonable handle to an open primary or secondary.
///
/// Clones share one engine. Reads may run concurrently; writes are
/// serialised. After [`close`](Db::close) every other operation fails with
/// [`Error::Closed`].
#[derive(Clone)]
pub struct Db {
    inner: Arc<DbInner>,
}

struct DbInner {
    location: PathBuf,
    gate: WriteGate,
    secondary: bool,
    closed: AtomicBool,
    engine: RwLock<Option<Engine>>,
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    match spawn_blocking(f).await {
        Ok(result) => result,
        Err(join_err) => Err(Error::Background(join_err.to_string())),
    }
}

impl Db {
    /// Opens `location` with default engine tuning.
    pub async fn open<P: AsRef<Path>>(location: P, options: OpenOptions) -> Result<Self> {
        Self::open_with_config(location, options, EngineConfig::default()).await
    }

    /// Opens `location`.
    ///
    /// Option validation happens before any work is scheduled, so a rejected
    /// configuration never touches the filesystem.
    pub async fn open_with_config<P: AsRef<Path>>(
        location: P,
        options: OpenOptions,
        config: EngineConfig,
    ) -> Result<Self> {
        let location = location.as_ref().to_path_buf();
        options.validate(&location)?;

        let path = location.clone();
        let engine = run_blocking(move || Engine::open(&path, &options, &config)).await?;
        debug!(target: "tidepool::db", location = %location.display(), mode = engine.mode().name(), "handle opened");

        Ok(Self {
            inner: Arc::new(DbInner {
                location,
                gate: engine.write_gate(),
                secondary: engine.is_secondary(),
                closed: AtomicBool::new(false),
                engine: RwLock::new(Some(engine)),
            }),
        })
    }

    pub fn location(&self) -> &Path {
        &self.inner.location
    }

    #[must_use]
    pub fn is_secondary(&self) -> bool {
        self.inner.secondary
    }

    #[must_use]
    pub fn write_gate(&self) -> WriteGate {
        self.inner.gate
    }

    /// Whether [`close`](Db::close) has taken the engine on any clone.
    /// Never waits for an operation in progress.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub async fn put<K, V>(&self, key: K, value: V) -> Result<()>
    where
        K: Into<Vec<u8>>,
        V: Into<Vec<u8>>,
    {
        self.inner.gate.check()?;
        let (key, value) = (key.into(), value.into());
        self.with_engine_mut(move |engine| engine.set(key, value)).await
    }

    pub async fn delete<K: Into<Vec<u8>>>(&self, key: K) -> Result<()> {
        self.inner.gate.check()?;
        let key = key.into();
        self.with_engine_mut(move |engine| engine.del(key)).await
    }

    /// Applies a batch atomically.
    pub async fn write(&self, batch: WriteBatch) -> Result<()> {
        self.inner.gate.check()?;
        self.with_engine_mut(move |engine| engine.write(batch)).await
    }

    pub async fn get<K: Into<Vec<u8>>>(&self, key: K) -> Result<Option<Vec<u8>>> {
        let key = key.into();
        let inner = Arc::clone(&self.inner);
        run_blocking(move || inner.get(&key)).await
    }

    /// Live pairs with `start <= key < end`; an empty bound is open.
    pub async fn scan<S, E>(&self, start: S, end: E) -> Result<Vec<(Vec<u8>, Vec<u8>)>>
    where
        S: Into<Vec<u8>>,
        E: Into<Vec<u8>>,
    {
        let (start, end) = (start.into(), end.into());
        let inner = Arc::clone(&self.inner);
        run_blocking(move || inner.scan(&start, &end)).await
    }

    /// Explicit refresh of a secondary. No-op on a primary.
    pub async fn catch_up(&self) -> Result<CatchUpOutcome> {
        self.with_engine_mut(Engine::try_catch_up).await
    }

    /// Manifest view in use. Waits for a running flush, compaction or
    /// refresh on the blocking pool, not on the caller's task.
    pub async fn current_view(&self) -> Result<ManifestView> {
        let inner = Arc::clone(&self.inner);
        run_blocking(move || {
            let guard = inner.engine.read();
            guard.as_ref().map(Engine::current_view).ok_or(Error::Closed)
        })
        .await
    }

    /// Closes the instance for every clone of this handle.
    ///
    /// A primary flushes and releases the location lock; a secondary
    /// reclaims its workspace. Closing an already closed handle is `Ok`.
    pub async fn close(&self) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        run_blocking(move || {
            let engine = inner.engine.write().take();
            inner.closed.store(true, Ordering::Release);
            match engine {
                Some(engine) => engine.close(),
                None => Ok(()),
            }
        })
        .await
    }

    async fn with_engine_mut<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Engine) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        run_blocking(move || {
            let mut guard = inner.engine.write();
            let engine = guard.as_mut().ok_or(Error::Closed)?;
            f(engine)
        })
        .await
    }
}

#[cfg(test)]
impl Db {
    /// Holds the engine exclusively, as a flush or refresh would.
    pub(crate) fn lock_engine_exclusive(&self) -> RwLockWriteGuard<'_, Option<Engine>> {
        self.inner.engine.write()
    }
}

impl DbInner {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let found = self.read_with(|engine| engine.lookup(key), |engine| engine.get(key))?;
        Ok(found.map(|(_, value)| value))
    }

    fn scan(&self, start: &[u8], end: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.read_with(|engine| engine.range(start, end), |engine| engine.scan(start, end))
    }

    /// Runs `read` under a shared lock. A secondary first refreshes under the
    /// exclusive lock and then downgrades; if the read still races with the
    /// primary it falls back to `retry`, which refreshes and retries.
    fn read_with<T, R, M>(&self, read: R, retry: M) -> Result<T>
    where
        R: Fn(&Engine) -> Result<T>,
        M: FnOnce(&mut Engine) -> Result<T>,
    {
        if !self.secondary {
            let guard = self.engine.read();
            let engine = guard.as_ref().ok_or(Error::Closed)?;
            return read(engine);
        }

        let mut guard = self.engine.write();
        let engine = guard.as_mut().ok_or(Error::Closed)?;
        engine.refresh_for_read()?;

        let guard = RwLockWriteGuard::downgrade(guard);
        let engine = guard.as_ref().ok_or(Error::Closed)?;
        let result = read(engine);
        drop(guard);

        match result {
            Err(e) if e.is_retryable_race() => {
                let mut guard = self.engine.write();
                let engine = guard.as_mut().ok_or(Error::Closed)?;
                retry(engine)
            }
            other => other,
        }
    }
}
