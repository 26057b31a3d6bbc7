//! Connection pool management.
//!
//! A bounded set of live sessions handed out one operation at a time.
//!
//! # Design Decisions
//!
//! - **`Semaphore` with `max_size` permits**: every leased handle owns a permit, so
//!   callers beyond `max_size` wait in FIFO order and give up after the acquire timeout
//! - **`std::sync::Mutex` for the idle set**: it is never held across an await point
//! - **Lazy open**: a permit holder that finds no idle session opens one; a failed open
//!   releases the permit and is not retried
//! - **Weak reaper**: the idle reaper holds a `Weak` reference and exits once the pool
//!   is dropped
//! - **`size` counts opens in flight**: a [`PendingOpen`] reservation is taken before
//!   connecting and given back if the connect fails or its future is dropped
//!
//! # Release Protocol
//!
//! [`ConnectionHandle::release`] must be called with the health of the session. A
//! healthy session goes back to the idle set before the permit is returned; an
//! unhealthy one is closed and a replacement is opened in the background when the
//! pool has fallen below `min_size`. A handle dropped without `release` is treated
//! as unhealthy: the server is asked to cancel whatever it was running and the
//! session is closed in the background.

use crate::config::PoolSettings;
use crate::db::session::{Connector, Session};
use crate::error::{DbError, DbResult};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Upper bound on a best-effort cancel request.
const CANCEL_TIMEOUT: Duration = Duration::from_secs(5);

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PoolStatus {
    /// Open sessions (idle + leased)
    pub size: u32,
    pub idle: usize,
    pub leased: usize,
}

/// One slot of `size` held by a session that is still being opened.
struct PendingOpen<'a> {
    size: &'a AtomicU32,
    opened: bool,
}

impl<'a> PendingOpen<'a> {
    fn reserve(size: &'a AtomicU32) -> Self {
        size.fetch_add(1, Ordering::AcqRel);
        Self {
            size,
            opened: false,
        }
    }

    /// The session exists; it now owns the slot.
    fn opened(mut self) {
        self.opened = true;
    }
}

impl Drop for PendingOpen<'_> {
    fn drop(&mut self) {
        if !self.opened {
            self.size.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

struct IdleSession<S> {
    id: u64,
    session: S,
    idle_since: Instant,
}

struct PoolInner<C: Connector> {
    connector: C,
    settings: PoolSettings,
    permits: Arc<Semaphore>,
    idle: Mutex<VecDeque<IdleSession<C::Session>>>,
    size: AtomicU32,
    next_id: AtomicU64,
    closed: AtomicBool,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl<C: Connector> PoolInner<C> {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn pop_idle(&self) -> Option<IdleSession<C::Session>> {
        self.idle.lock().unwrap().pop_back()
    }

    /// Park a session in the idle set, or hand it back if the pool is closed.
    ///
    /// `closed` is checked under the idle lock, so a session can never slip in after
    /// `close` has drained the set.
    #[must_use]
    fn push_idle(&self, id: u64, session: C::Session) -> Option<C::Session> {
        let mut idle = self.idle.lock().unwrap();
        if self.is_closed() {
            return Some(session);
        }
        idle.push_back(IdleSession {
            id,
            session,
            idle_since: Instant::now(),
        });
        None
    }

    /// Open one session and park it in the idle set.
    async fn open_idle(&self) -> DbResult<()> {
        let pending = PendingOpen::reserve(&self.size);
        let session = self.connector.connect().await?;
        pending.opened();

        let id = self.next_id();
        debug!(handle_id = id, "Opened pooled connection");
        if let Some(session) = self.push_idle(id, session) {
            self.size.fetch_sub(1, Ordering::AcqRel);
            session.close().await;
        }
        Ok(())
    }

    /// Ask the server to abandon whatever `backend_pid` is running.
    async fn cancel_backend(&self, handle_id: u64, backend_pid: i32) {
        match tokio::time::timeout(CANCEL_TIMEOUT, self.connector.cancel(backend_pid)).await {
            Ok(Ok(())) => debug!(handle_id, backend_pid, "Cancelled in-flight statement"),
            Ok(Err(e)) => warn!(
                handle_id,
                backend_pid,
                error = %e,
                "Failed to cancel in-flight statement"
            ),
            Err(_) => warn!(handle_id, backend_pid, "Timed out cancelling in-flight statement"),
        }
    }

    /// Open a replacement after a discard, if the pool fell below `min_size`.
    async fn replenish(self: Arc<Self>) {
        if self.is_closed() || self.size.load(Ordering::Acquire) >= self.settings.min_size {
            return;
        }
        // Only top up when nobody is waiting; a waiter will open lazily anyway.
        let Ok(_permit) = Arc::clone(&self.permits).try_acquire_owned() else {
            return;
        };
        if self.size.load(Ordering::Acquire) >= self.settings.min_size {
            return;
        }
        match self.open_idle().await {
            Ok(()) => debug!("Replenished pool to minimum size"),
            Err(e) => warn!(error = %e, "Failed to replenish connection pool"),
        }
    }

    /// Close idle sessions above `min_size` that have been idle past the timeout.
    async fn reap_idle(&self) {
        let now = Instant::now();
        let expired: Vec<IdleSession<C::Session>> = {
            let mut idle = self.idle.lock().unwrap();
            let mut expired = Vec::new();
            // Front holds the least recently used sessions.
            while let Some(front) = idle.front() {
                let size = self.size.load(Ordering::Acquire);
                if size <= self.settings.min_size
                    || now.saturating_duration_since(front.idle_since) < self.settings.idle_timeout
                {
                    break;
                }
                if let Some(entry) = idle.pop_front() {
                    self.size.fetch_sub(1, Ordering::AcqRel);
                    expired.push(entry);
                }
            }
            expired
        }; // Lock released here

        for entry in expired {
            debug!(handle_id = entry.id, "Closing idle connection");
            entry.session.close().await;
        }
    }

    fn discard_in_background(self: &Arc<Self>, id: u64, session: C::Session) {
        self.size.fetch_sub(1, Ordering::AcqRel);
        let inner = Arc::clone(self);
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                if let Some(backend_pid) = session.backend_pid() {
                    inner.cancel_backend(id, backend_pid).await;
                }
                session.close().await;
                debug!(handle_id = id, "Closed discarded connection");
                inner.replenish().await;
            });
        }
    }
}

/// Bounded pool of database sessions.
pub struct ConnectionPool<C: Connector> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Connector> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> ConnectionPool<C> {
    /// Create the pool and open `min_size` warm sessions.
    ///
    /// Fails with `ConnectFailed` if any warm session cannot be opened.
    pub async fn open(connector: C, settings: PoolSettings) -> DbResult<Self> {
        settings.validate().map_err(DbError::invalid_input)?;

        let inner = Arc::new(PoolInner {
            connector,
            settings,
            permits: Arc::new(Semaphore::new(settings.max_size as usize)),
            idle: Mutex::new(VecDeque::with_capacity(settings.max_size as usize)),
            size: AtomicU32::new(0),
            next_id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            reaper: Mutex::new(None),
        });
        let pool = Self { inner };

        for _ in 0..settings.min_size {
            if let Err(e) = pool.inner.open_idle().await {
                pool.close().await;
                return Err(e);
            }
        }

        // Reaper holds a weak reference so it never keeps the pool alive
        let weak = Arc::downgrade(&pool.inner);
        let handle = tokio::spawn(Self::reap_task(weak, settings.reap_interval));
        *pool.inner.reaper.lock().unwrap() = Some(handle);

        info!(
            min_size = settings.min_size,
            max_size = settings.max_size,
            "Connection pool ready"
        );
        Ok(pool)
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.inner.settings
    }

    /// Lease a session, waiting up to the configured acquire timeout.
    pub async fn acquire(&self) -> DbResult<ConnectionHandle<C>> {
        self.acquire_with_timeout(self.inner.settings.acquire_timeout)
            .await
    }

    /// Lease a session, waiting up to `timeout` for one to become free.
    pub async fn acquire_with_timeout(&self, timeout: Duration) -> DbResult<ConnectionHandle<C>> {
        if self.inner.is_closed() {
            return Err(DbError::connection("Connection pool is closed"));
        }

        let permit = match tokio::time::timeout(
            timeout,
            Arc::clone(&self.inner.permits).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(DbError::connection("Connection pool is closed")),
            Err(_) => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Timed out waiting for a pooled connection"
                );
                return Err(DbError::pool_exhausted(timeout));
            }
        };

        if let Some(entry) = self.inner.pop_idle() {
            debug!(handle_id = entry.id, "Leased idle connection");
            return Ok(ConnectionHandle::new(
                entry.id,
                entry.session,
                Arc::clone(&self.inner),
                permit,
            ));
        }

        let pending = PendingOpen::reserve(&self.inner.size);
        match self.inner.connector.connect().await {
            Ok(session) => {
                pending.opened();
                let id = self.inner.next_id();
                debug!(handle_id = id, "Leased new connection");
                Ok(ConnectionHandle::new(
                    id,
                    session,
                    Arc::clone(&self.inner),
                    permit,
                ))
            }
            Err(e) => {
                warn!(error = %e, "Failed to open connection");
                Err(e)
            }
        }
    }

    pub fn status(&self) -> PoolStatus {
        let idle = self.inner.idle.lock().unwrap().len();
        let leased = self.inner.settings.max_size as usize - self.inner.permits.available_permits();
        PoolStatus {
            size: self.inner.size.load(Ordering::Acquire),
            idle,
            leased,
        }
    }

    /// Close every idle session and refuse further acquires.
    ///
    /// Sessions still leased are closed when their handles are released.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.permits.close();

        {
            let mut reaper = self.inner.reaper.lock().unwrap();
            if let Some(handle) = reaper.take() {
                handle.abort();
            }
        }

        let drained: Vec<IdleSession<C::Session>> =
            self.inner.idle.lock().unwrap().drain(..).collect();
        for entry in drained {
            self.inner.size.fetch_sub(1, Ordering::AcqRel);
            entry.session.close().await;
        }
        info!("Connection pool closed");
    }

    async fn reap_task(weak: Weak<PoolInner<C>>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let Some(inner) = weak.upgrade() else {
                debug!("Connection pool dropped, reaper exiting");
                return;
            };
            inner.reap_idle().await;

            // Drop strong reference before sleeping to allow pool deallocation
            drop(inner);
        }
    }
}

impl<C: Connector> std::fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("settings", &self.inner.settings)
            .field("status", &self.status())
            .finish()
    }
}

/// Exclusive lease on one session.
///
/// Never shared between concurrent operations. Return it with
/// [`release`](Self::release).
pub struct ConnectionHandle<C: Connector> {
    id: u64,
    session: Option<C::Session>,
    pool: Arc<PoolInner<C>>,
    _permit: OwnedSemaphorePermit,
}

impl<C: Connector> std::fmt::Debug for ConnectionHandle<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl<C: Connector> ConnectionHandle<C> {
    fn new(id: u64, session: C::Session, pool: Arc<PoolInner<C>>, permit: OwnedSemaphorePermit) -> Self {
        Self {
            id,
            session: Some(session),
            pool,
            _permit: permit,
        }
    }

    /// Pool-unique id of the underlying session.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn session(&mut self) -> DbResult<&mut C::Session> {
        self.session
            .as_mut()
            .ok_or_else(|| DbError::internal("connection handle already released"))
    }

    /// Ask the server to abandon the statement this session is running.
    ///
    /// The session itself is left as is; release it unhealthy afterwards.
    pub async fn cancel_statement(&mut self) {
        if let Some(backend_pid) = self.session.as_ref().and_then(|s| s.backend_pid()) {
            self.pool.cancel_backend(self.id, backend_pid).await;
        }
    }

    /// Return the session to the pool.
    ///
    /// `healthy = false` closes the session instead; it is never handed out again.
    pub async fn release(mut self, healthy: bool) {
        let Some(session) = self.session.take() else {
            return;
        };

        let session = if healthy {
            match self.pool.push_idle(self.id, session) {
                None => {
                    debug!(handle_id = self.id, "Released connection to pool");
                    return;
                }
                Some(session) => session,
            }
        } else {
            warn!(handle_id = self.id, "Discarding unhealthy connection");
            session
        };

        self.pool.size.fetch_sub(1, Ordering::AcqRel);
        session.close().await;
        if !healthy {
            tokio::spawn(Arc::clone(&self.pool).replenish());
        }
    }
}

impl<C: Connector> Drop for ConnectionHandle<C> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            warn!(
                handle_id = self.id,
                "Connection handle dropped without release, discarding"
            );
            self.pool.discard_in_background(self.id, session);
        }
    }
}
