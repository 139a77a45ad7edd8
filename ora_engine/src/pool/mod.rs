pub mod manager;

pub use manager::ConnectionPoolManager;

use crate::engine::connection_info::{ConnectionInfo, PoolKey};
use crate::error::{OraError, Result};
use crate::native::{Credentials, NativeDriver, Session};
use r2d2::event::ReleaseEvent;
use r2d2::{Pool, PooledConnection};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Pool behaviour shared by every pool a [`ConnectionPoolManager`] creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOptions {
    acquire_timeout: Duration,
    test_on_check_out: bool,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            test_on_check_out: false,
        }
    }
}

impl PoolOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// How long `acquire` blocks on an exhausted pool before failing with
    /// [`OraError::PoolTimeout`]. Must be non-zero.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Validate idle sessions (server version round trip) before handing them out.
    pub fn with_test_on_check_out(mut self, enabled: bool) -> Self {
        self.test_on_check_out = enabled;
        self
    }

    pub fn acquire_timeout(&self) -> Duration {
        self.acquire_timeout
    }

    pub fn test_on_check_out(&self) -> bool {
        self.test_on_check_out
    }
}

/// Native sessions owned by one pool. `live` counts every session that is
/// idle, checked out, staged or being opened, so growth stays within
/// `MAX POOL SIZE`.
struct SessionSource {
    driver: Arc<dyn NativeDriver>,
    credentials: Credentials,
    disposed: AtomicBool,
    max_size: u32,
    /// Longest a refill waits for a free slot.
    slot_wait: Duration,
    live: AtomicU32,
    /// Opened by `acquire` or warm-up and not yet adopted by r2d2.
    staged: Mutex<Vec<Session>>,
    /// Signalled when a session is staged or a slot frees up.
    ready: Condvar,
}

impl SessionSource {
    fn try_reserve(&self) -> bool {
        self.live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max_size).then(|| n + 1)
            })
            .is_ok()
    }

    fn unreserve(&self) {
        let _ = self
            .live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        drop(self.staged());
        self.ready.notify_all();
    }

    /// One native connect attempt on an already reserved slot.
    fn open(&self) -> Result<Session> {
        match self.driver.connect(&self.credentials) {
            Ok(native) => {
                log::debug!(
                    "Pool opened session for {}@{}",
                    self.credentials.username,
                    self.credentials.database
                );
                Ok(Session::new(native))
            }
            Err(e) => {
                self.unreserve();
                Err(e)
            }
        }
    }

    fn staged(&self) -> MutexGuard<'_, Vec<Session>> {
        self.staged.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stage(&self, session: Session) {
        self.staged().push(session);
        self.ready.notify_all();
    }

    fn discard_staged(&self) {
        let leftover = std::mem::take(&mut *self.staged());
        for _ in &leftover {
            self.unreserve();
        }
    }
}

pub struct SessionManager {
    source: Arc<SessionSource>,
}

impl r2d2::ManageConnection for SessionManager {
    type Connection = Session;
    type Error = OraError;

    fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        if self.source.disposed.load(Ordering::Acquire) {
            return Err(OraError::PoolDisposed);
        }
        let source = &self.source;
        let mut staged = source.staged();
        loop {
            if let Some(session) = staged.pop() {
                return Ok(session);
            }
            if source.try_reserve() {
                drop(staged);
                return source.open();
            }
            // The last slot belongs to an acquire still connecting; its
            // session arrives staged.
            let (guard, wait) = source
                .ready
                .wait_timeout(staged, source.slot_wait)
                .unwrap_or_else(PoisonError::into_inner);
            if wait.timed_out() && guard.is_empty() {
                return Err(OraError::PoolTimeout(
                    "no session slot became free".to_string(),
                ));
            }
            staged = guard;
        }
    }

    fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.server_version().map(|_| ())
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        // Sessions returned after dispose are dropped, which disconnects them.
        self.source.disposed.load(Ordering::Acquire) || !conn.is_connected()
    }
}

#[derive(Debug)]
struct PoolErrorLogger;

impl r2d2::HandleError<OraError> for PoolErrorLogger {
    fn handle_error(&self, error: OraError) {
        match error {
            OraError::PoolDisposed => log::trace!("Skipped session refill on disposed pool"),
            other => log::warn!("Pool failed to open a session: {}", other),
        }
    }
}

/// Frees the `live` slot of every session r2d2 closes.
struct SessionReleaseTracker {
    source: Arc<SessionSource>,
}

impl fmt::Debug for SessionReleaseTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionReleaseTracker")
            .field("live", &self.source.live.load(Ordering::Relaxed))
            .finish()
    }
}

impl r2d2::HandleEvent for SessionReleaseTracker {
    fn handle_release(&self, event: ReleaseEvent) {
        log::trace!("Pool closed session {} after {:?}", event.connection_id(), event.age());
        self.source.unreserve();
    }
}

/// A session checked out of a [`ConnectionPool`]. Dropping it releases the
/// session back to the pool.
pub type PooledSession = PooledConnection<SessionManager>;

/// Bounded set of native sessions sharing one [`PoolKey`].
pub struct ConnectionPool {
    key: PoolKey,
    pool: Mutex<Option<Pool<SessionManager>>>,
    source: Arc<SessionSource>,
    /// Serializes pool growth so concurrent opens do not overshoot.
    growth: Mutex<()>,
    min_size: u32,
    max_size: u32,
}

impl ConnectionPool {
    /// Opens `MIN POOL SIZE` sessions, one attempt each. The first native
    /// failure is returned as is and no pool is created.
    pub fn new(
        driver: Arc<dyn NativeDriver>,
        info: &ConnectionInfo,
        options: &PoolOptions,
    ) -> Result<Self> {
        if options.acquire_timeout().is_zero() {
            return Err(OraError::Configuration(
                "Pool acquire timeout must be greater than zero".to_string(),
            ));
        }

        let source = Arc::new(SessionSource {
            driver,
            credentials: info.credentials(None),
            disposed: AtomicBool::new(false),
            max_size: info.max_pool_size(),
            slot_wait: options.acquire_timeout(),
            live: AtomicU32::new(0),
            staged: Mutex::new(Vec::new()),
            ready: Condvar::new(),
        });
        for _ in 0..info.min_pool_size() {
            if !source.try_reserve() {
                break;
            }
            let session = source.open()?;
            source.stage(session);
        }

        // min_idle must always be explicit: r2d2 treats None as max_size.
        // build() returns once the staged sessions are adopted.
        let pool = Pool::builder()
            .max_size(info.max_pool_size())
            .min_idle(Some(info.min_pool_size()))
            .connection_timeout(options.acquire_timeout())
            .test_on_check_out(options.test_on_check_out())
            .max_lifetime(info.connection_lifetime())
            .idle_timeout(None)
            .error_handler(Box::new(PoolErrorLogger))
            .event_handler(Box::new(SessionReleaseTracker {
                source: Arc::clone(&source),
            }))
            .build(SessionManager {
                source: Arc::clone(&source),
            })?;

        let key = info.pool_key();
        log::info!(
            "Created connection pool {:?} (min {}, max {})",
            key,
            info.min_pool_size(),
            info.max_pool_size()
        );

        Ok(Self {
            key,
            pool: Mutex::new(Some(pool)),
            source,
            growth: Mutex::new(()),
            min_size: info.min_pool_size(),
            max_size: info.max_pool_size(),
        })
    }

    fn inner(&self) -> Result<Option<Pool<SessionManager>>> {
        let guard = self
            .pool
            .lock()
            .map_err(|_| OraError::InternalError("Failed to lock pool".to_string()))?;
        Ok(guard.clone())
    }

    /// Takes an idle session, opens a new one below `max_size`, or waits up to
    /// the acquire timeout for a release.
    ///
    /// A new session gets exactly one native connect attempt; its error is
    /// returned unchanged.
    pub fn acquire(&self) -> Result<PooledSession> {
        let pool = self.inner()?.ok_or(OraError::PoolDisposed)?;
        if let Some(session) = pool.try_get() {
            log::trace!("Acquired idle session from pool {:?}", self.key);
            return Ok(session);
        }

        let growth = self.growth.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(session) = pool.try_get() {
            log::trace!("Acquired idle session from pool {:?}", self.key);
            return Ok(session);
        }
        let staged = !self.source.staged().is_empty();
        if !staged && self.source.try_reserve() {
            let session = self.source.open().map_err(|e| {
                log::warn!("Pool {:?} failed to open a session: {}", self.key, e);
                e
            })?;
            self.source.stage(session);
            // r2d2 adopts the staged session through SessionManager::connect.
            let result = pool.get();
            drop(growth);
            return self.checked_out(result);
        }
        drop(growth);
        self.checked_out(pool.get())
    }

    fn checked_out(
        &self,
        result: std::result::Result<PooledSession, r2d2::Error>,
    ) -> Result<PooledSession> {
        let session = result.map_err(|e| {
            log::warn!("Acquire on pool {:?} failed: {}", self.key, e);
            OraError::from(e)
        })?;
        log::trace!("Acquired session from pool {:?}", self.key);
        Ok(session)
    }

    /// Returns a session to the pool. Equivalent to dropping it; a disposed
    /// pool disconnects it instead.
    pub fn release(&self, session: PooledSession) {
        drop(session);
        log::trace!("Released session to pool {:?}", self.key);
    }

    /// Stops handing out sessions. Idle sessions are disconnected once no
    /// checked-out session refers to the pool anymore; checked-out sessions
    /// are disconnected on release.
    pub fn dispose(&self) {
        if self.source.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        match self.pool.lock() {
            Ok(mut guard) => {
                guard.take();
            }
            Err(poisoned) => {
                poisoned.into_inner().take();
            }
        }
        self.source.discard_staged();
        log::info!("Disposed connection pool {:?}", self.key);
    }

    pub fn is_disposed(&self) -> bool {
        self.source.disposed.load(Ordering::Acquire)
    }

    pub fn key(&self) -> &PoolKey {
        &self.key
    }

    pub fn min_size(&self) -> u32 {
        self.min_size
    }

    pub fn max_size(&self) -> u32 {
        self.max_size
    }

    pub fn state(&self) -> PoolState {
        match self.inner() {
            Ok(Some(pool)) => {
                let state = pool.state();
                PoolState {
                    size: state.connections,
                    idle: state.idle_connections,
                    in_use: state.connections.saturating_sub(state.idle_connections),
                }
            }
            _ => PoolState::default(),
        }
    }
}

/// Snapshot of a pool. `size` counts established sessions, idle or checked out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolState {
    pub size: u32,
    pub idle: u32,
    pub in_use: u32,
}
