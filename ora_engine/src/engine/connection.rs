use super::command::OraCommand;
use super::connection_info::{self, ConnectionInfo};
use super::transaction::{IsolationLevel, Transaction, TransactionShared, TransactionState};
use crate::error::{OraError, Result};
use crate::native::{LocaleItem, Session, StatementHandle};
use crate::pool::{ConnectionPool, ConnectionPoolManager, PooledSession};
use crate::security::Secret;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Open,
}

/// Number and currency separators of the session's locale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFormat {
    pub group_separator: String,
    pub decimal_separator: String,
    pub currency_group_separator: String,
    pub currency_decimal_separator: String,
}

/// Called with `(previous, current)` after every open/close transition.
pub type StateChangeListener = Arc<dyn Fn(ConnectionState, ConnectionState) + Send + Sync>;

pub(crate) enum SessionSlot {
    Pooled {
        session: PooledSession,
        pool: Arc<ConnectionPool>,
    },
    Private(Session),
}

impl SessionSlot {
    fn session_mut(&mut self) -> &mut Session {
        match self {
            SessionSlot::Pooled { session, .. } => &mut **session,
            SessionSlot::Private(session) => session,
        }
    }

    fn release(self) {
        match self {
            SessionSlot::Pooled { session, pool } => pool.release(session),
            SessionSlot::Private(mut session) => {
                if let Err(e) = session.disconnect() {
                    log::warn!("Private session disconnect failed: {}", e);
                }
            }
        }
    }
}

pub(crate) struct ConnectionInner {
    connection_string: String,
    info: ConnectionInfo,
    state: ConnectionState,
    session: Option<SessionSlot>,
    /// Bumped on every open; handles from an older session are never released
    /// against a newer one.
    generation: u64,
    statements: HashSet<StatementHandle>,
    transaction: Option<Arc<TransactionShared>>,
    open_reader: Option<u64>,
    format: Option<SessionFormat>,
    new_password: Option<Secret>,
    security_stripped: bool,
    listeners: Vec<StateChangeListener>,
}

impl ConnectionInner {
    fn new(connection_string: &str, info: ConnectionInfo) -> Self {
        Self {
            connection_string: connection_string.to_string(),
            info,
            state: ConnectionState::Closed,
            session: None,
            generation: 0,
            statements: HashSet::new(),
            transaction: None,
            open_reader: None,
            format: None,
            new_password: None,
            security_stripped: false,
            listeners: Vec::new(),
        }
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.state != ConnectionState::Open {
            return Err(OraError::state("The connection is not open."));
        }
        Ok(())
    }

    pub(crate) fn session_mut(&mut self) -> Result<&mut Session> {
        self.ensure_open()?;
        self.session
            .as_mut()
            .map(SessionSlot::session_mut)
            .ok_or_else(|| OraError::state("The connection is not open."))
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn transaction(&self) -> Option<&Arc<TransactionShared>> {
        self.transaction.as_ref()
    }

    pub(crate) fn is_current_transaction(&self, txn: &Arc<TransactionShared>) -> bool {
        self.transaction
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, txn))
    }

    pub(crate) fn clear_transaction(&mut self) {
        self.transaction = None;
    }

    pub(crate) fn allocate_statement(&mut self) -> Result<StatementHandle> {
        let handle = self.session_mut()?.allocate_statement()?;
        self.statements.insert(handle);
        Ok(handle)
    }

    /// Tracks a handle the native layer created on our behalf (output cursors).
    pub(crate) fn adopt_statement(&mut self, handle: StatementHandle) {
        self.statements.insert(handle);
    }

    /// Releases a statement handle if it still belongs to the current session.
    pub(crate) fn release_statement(
        &mut self,
        handle: StatementHandle,
        generation: u64,
    ) -> Result<()> {
        if generation != self.generation || self.state != ConnectionState::Open {
            return Ok(());
        }
        if !self.statements.remove(&handle) {
            return Ok(());
        }
        self.session_mut()?.release_statement(handle)
    }

    pub(crate) fn release_statement_quietly(&mut self, handle: StatementHandle, generation: u64) {
        if let Err(e) = self.release_statement(handle, generation) {
            log::warn!("Failed to release statement {:?}: {}", handle, e);
        }
    }

    pub(crate) fn open_reader(&self) -> Option<u64> {
        self.open_reader
    }

    pub(crate) fn set_open_reader(&mut self, reader_id: u64) {
        self.open_reader = Some(reader_id);
    }

    pub(crate) fn clear_open_reader(&mut self, reader_id: u64) {
        if self.open_reader == Some(reader_id) {
            self.open_reader = None;
        }
    }

    /// Rolls back, frees statements and gives the session up. Returns whether
    /// the connection was open.
    fn shutdown(&mut self) -> bool {
        if self.state == ConnectionState::Closed {
            return false;
        }

        let transaction = self.transaction.take();
        let statements: Vec<StatementHandle> = self.statements.drain().collect();
        if let Some(slot) = self.session.as_mut() {
            let session = slot.session_mut();
            if let Some(txn) = transaction {
                log::debug!("Rolling back transaction {} on close", txn.id());
                if let Err(e) = session.rollback(txn.handle()) {
                    log::warn!("Rollback on close failed: {}", e);
                }
                if let Err(e) = session.release_transaction(txn.handle()) {
                    log::warn!("Failed to release transaction on close: {}", e);
                }
                txn.set_state(TransactionState::RolledBack);
            }
            for handle in statements {
                if let Err(e) = session.release_statement(handle) {
                    log::warn!("Failed to release statement {:?} on close: {}", handle, e);
                }
            }
        }

        if let Some(slot) = self.session.take() {
            slot.release();
        }
        self.open_reader = None;
        self.format = None;
        self.state = ConnectionState::Closed;
        true
    }
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        if self.shutdown() {
            log::debug!("Connection dropped while open; session given back");
        }
    }
}

/// A database connection.
///
/// `OraConnection` is a handle: clones (held by commands, readers and
/// transactions) refer to the same connection. The session is given back when
/// the connection is closed or the last handle is dropped.
#[derive(Clone)]
pub struct OraConnection {
    inner: Arc<Mutex<ConnectionInner>>,
    pools: Arc<ConnectionPoolManager>,
}

impl OraConnection {
    pub(crate) fn new(pools: Arc<ConnectionPoolManager>, connection_string: &str) -> Result<Self> {
        let info = ConnectionInfo::parse(connection_string)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(ConnectionInner::new(connection_string, info))),
            pools,
        })
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, ConnectionInner>> {
        self.inner
            .lock()
            .map_err(|_| OraError::InternalError("Failed to lock connection".to_string()))
    }

    pub fn ptr_eq(&self, other: &OraConnection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Opens the connection: a private session when pooling is off or a
    /// password change is pending, otherwise a session from the shared pool.
    /// No-op when already open.
    pub fn open(&self) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.state == ConnectionState::Open {
            return Ok(());
        }

        let private = !inner.info.pooling() || inner.new_password.is_some();
        let slot = if private {
            let credentials = inner.info.credentials(inner.new_password.as_ref());
            let native = self.pools.driver().connect(&credentials)?;
            SessionSlot::Private(Session::new(native))
        } else {
            let pool = self.pools.get_pool(&inner.info)?;
            let session = pool.acquire()?;
            SessionSlot::Pooled { session, pool }
        };

        if let Some(new_password) = inner.new_password.take() {
            inner.info.set_password(new_password);
        }
        inner.session = Some(slot);
        inner.state = ConnectionState::Open;
        inner.generation += 1;
        if !inner.info.persist_security_info() {
            inner.security_stripped = true;
        }
        log::debug!(
            "Opened {} connection to {}",
            if private { "private" } else { "pooled" },
            inner.info.database()
        );

        let listeners = inner.listeners.clone();
        drop(inner);
        notify(&listeners, ConnectionState::Closed, ConnectionState::Open);
        Ok(())
    }

    /// Rolls back any active transaction, then releases (pooled) or
    /// disconnects (private) the session. No-op when already closed.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.lock()?;
        if !inner.shutdown() {
            return Ok(());
        }
        log::debug!("Closed connection to {}", inner.info.database());
        let listeners = inner.listeners.clone();
        drop(inner);
        notify(&listeners, ConnectionState::Open, ConnectionState::Closed);
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        match self.inner.lock() {
            Ok(inner) => inner.state,
            Err(poisoned) => poisoned.into_inner().state,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn begin_transaction(&self, isolation_level: IsolationLevel) -> Result<Transaction> {
        let mut inner = self.lock()?;
        inner.ensure_open()?;
        if inner.transaction.is_some() {
            return Err(OraError::state(
                "OraConnection does not support parallel transactions.",
            ));
        }

        let session = inner.session_mut()?;
        let handle = session.allocate_transaction()?;
        if let Err(e) = session.begin_transaction(handle, isolation_level) {
            if let Err(release) = session.release_transaction(handle) {
                log::warn!("Failed to release transaction after begin error: {}", release);
            }
            return Err(e);
        }

        let shared = Arc::new(TransactionShared::new(handle, isolation_level));
        inner.transaction = Some(Arc::clone(&shared));
        log::debug!(
            "Began transaction {} ({})",
            shared.id(),
            isolation_level.to_sql_keyword()
        );
        Ok(Transaction::new(shared, self.clone()))
    }

    /// The active transaction, if any.
    pub fn transaction(&self) -> Option<Transaction> {
        let inner = self.lock().ok()?;
        inner
            .transaction
            .as_ref()
            .map(|shared| Transaction::new(Arc::clone(shared), self.clone()))
    }

    pub fn create_command(&self) -> OraCommand {
        let mut command = OraCommand::new("");
        command.set_connection(Some(self.clone()));
        command
    }

    pub fn server_version(&self) -> Result<String> {
        let mut inner = self.lock()?;
        inner.session_mut()?.server_version()
    }

    /// The configured data source (`DATA SOURCE` / `SERVER`).
    pub fn data_source(&self) -> String {
        self.lock()
            .map(|inner| inner.info.database().to_string())
            .unwrap_or_default()
    }

    /// Always empty: sessions are not bound to a named database.
    pub fn database(&self) -> String {
        String::new()
    }

    pub fn change_database(&self, _database: &str) -> Result<()> {
        Err(OraError::NotSupported("ChangeDatabase".to_string()))
    }

    /// The connection string, without the password once the connection has
    /// been opened unless `PERSIST SECURITY INFO` is true.
    pub fn connection_string(&self) -> String {
        match self.lock() {
            Ok(inner) if inner.security_stripped => {
                connection_info::strip_password(&inner.connection_string)
            }
            Ok(inner) => inner.connection_string.clone(),
            Err(_) => String::new(),
        }
    }

    /// Replaces the configuration. Only allowed while closed.
    pub fn set_connection_string(&self, connection_string: &str) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.state == ConnectionState::Open {
            return Err(OraError::state(
                "Not allowed to change the connection string while the connection is open.",
            ));
        }
        inner.info = ConnectionInfo::parse(connection_string)?;
        inner.connection_string = connection_string.to_string();
        inner.security_stripped = false;
        Ok(())
    }

    pub fn connection_info(&self) -> Result<ConnectionInfo> {
        Ok(self.lock()?.info.clone())
    }

    /// Requests a password change on the next open. That open uses a private
    /// session; on success the new password replaces the configured one.
    pub fn set_new_password(&self, new_password: &str) -> Result<()> {
        let mut inner = self.lock()?;
        inner.new_password = Some(Secret::from(new_password));
        Ok(())
    }

    pub fn session_format(&self) -> Result<SessionFormat> {
        let mut inner = self.lock()?;
        if let Some(format) = &inner.format {
            return Ok(format.clone());
        }
        let session = inner.session_mut()?;
        let format = SessionFormat {
            group_separator: session.locale_info(LocaleItem::GroupSeparator)?,
            decimal_separator: session.locale_info(LocaleItem::DecimalSeparator)?,
            currency_group_separator: session.locale_info(LocaleItem::CurrencyGroupSeparator)?,
            currency_decimal_separator: session
                .locale_info(LocaleItem::CurrencyDecimalSeparator)?,
        };
        inner.format = Some(format.clone());
        Ok(format)
    }

    pub fn on_state_change<F>(&self, listener: F) -> Result<()>
    where
        F: Fn(ConnectionState, ConnectionState) + Send + Sync + 'static,
    {
        self.lock()?.listeners.push(Arc::new(listener));
        Ok(())
    }

    pub fn pools(&self) -> &Arc<ConnectionPoolManager> {
        &self.pools
    }
}

fn notify(listeners: &[StateChangeListener], previous: ConnectionState, current: ConnectionState) {
    for listener in listeners {
        listener(previous, current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::environment::OraEnvironment;
    use crate::mock::MockDriver;
    use crate::native::CredentialType;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn env(driver: &MockDriver) -> OraEnvironment {
        OraEnvironment::new(driver.shared())
    }

    #[test]
    fn test_open_close_state_transitions() {
        let driver = MockDriver::new();
        let conn = env(&driver).create_connection("SERVER=db1;UID=u;PWD=p").unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);

        conn.open().unwrap();
        assert!(conn.is_open());
        conn.open().unwrap();
        assert_eq!(driver.stats().sessions_connected, 1);

        conn.close().unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
        conn.close().unwrap();
    }

    #[test]
    fn test_listeners_see_transitions_once() {
        let driver = MockDriver::new();
        let conn = env(&driver).create_connection("UID=u;PWD=p").unwrap();
        let opens = Arc::new(AtomicUsize::new(0));
        let closes = Arc::new(AtomicUsize::new(0));
        {
            let opens = Arc::clone(&opens);
            let closes = Arc::clone(&closes);
            conn.on_state_change(move |previous, current| match (previous, current) {
                (ConnectionState::Closed, ConnectionState::Open) => {
                    opens.fetch_add(1, Ordering::SeqCst);
                }
                _ => {
                    closes.fetch_add(1, Ordering::SeqCst);
                }
            })
            .unwrap();
        }

        conn.open().unwrap();
        conn.open().unwrap();
        conn.close().unwrap();
        conn.close().unwrap();
        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pooled_close_returns_session() {
        let driver = MockDriver::new();
        let env = env(&driver);
        let conn = env.create_connection("UID=u;PWD=p").unwrap();
        conn.open().unwrap();
        conn.close().unwrap();
        conn.open().unwrap();

        let stats = driver.stats();
        assert_eq!(stats.sessions_connected, 1);
        assert_eq!(stats.sessions_disconnected, 0);
    }

    #[test]
    fn test_private_session_when_pooling_disabled() {
        let driver = MockDriver::new();
        let env = env(&driver);
        let conn = env.create_connection("UID=u;PWD=p;POOLING=false").unwrap();
        conn.open().unwrap();
        assert_eq!(env.pools().pool_count(), 0);
        conn.close().unwrap();
        assert_eq!(driver.stats().sessions_disconnected, 1);
    }

    #[test]
    fn test_new_password_forces_private_session() {
        let driver = MockDriver::new();
        let env = env(&driver);
        let conn = env.create_connection("UID=u;PWD=old").unwrap();
        conn.set_new_password("new").unwrap();
        conn.open().unwrap();

        assert_eq!(env.pools().pool_count(), 0);
        let seen = driver.credentials_seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(
            seen[0].new_password.as_ref().map(|s| s.as_bytes()),
            Some(&b"new"[..])
        );

        conn.close().unwrap();
        conn.open().unwrap();
        assert_eq!(env.pools().pool_count(), 1);
    }

    #[test]
    fn test_integrated_security_uses_external_credentials() {
        let driver = MockDriver::new();
        let conn = env(&driver)
            .create_connection("INTEGRATED SECURITY=yes;SERVER=db1")
            .unwrap();
        conn.open().unwrap();
        assert_eq!(
            driver.credentials_seen()[0].credential_type,
            CredentialType::External
        );
    }

    #[test]
    fn test_close_rolls_back_active_transaction() {
        let driver = MockDriver::new();
        let conn = env(&driver).create_connection("UID=u;PWD=p").unwrap();
        conn.open().unwrap();
        let txn = conn.begin_transaction(IsolationLevel::default()).unwrap();

        conn.close().unwrap();
        assert_eq!(txn.state(), TransactionState::RolledBack);
        let stats = driver.stats();
        assert_eq!(stats.rollbacks, 1);
        assert_eq!(stats.commits, 0);
    }

    #[test]
    fn test_begin_transaction_requires_open() {
        let driver = MockDriver::new();
        let conn = env(&driver).create_connection("UID=u;PWD=p").unwrap();
        let err = conn.begin_transaction(IsolationLevel::default()).err().unwrap();
        assert_eq!(err, OraError::state("The connection is not open."));
    }

    #[test]
    fn test_parallel_transactions_rejected() {
        let driver = MockDriver::new();
        let conn = env(&driver).create_connection("UID=u;PWD=p").unwrap();
        conn.open().unwrap();
        let _txn = conn.begin_transaction(IsolationLevel::default()).unwrap();
        let err = conn.begin_transaction(IsolationLevel::default()).err().unwrap();
        assert!(err.to_string().contains("parallel transactions"));
    }

    #[test]
    fn test_server_version_requires_open() {
        let driver = MockDriver::new();
        let conn = env(&driver).create_connection("UID=u;PWD=p").unwrap();
        assert!(conn.server_version().is_err());
        conn.open().unwrap();
        assert!(conn.server_version().unwrap().contains("Oracle"));
    }

    #[test]
    fn test_properties() {
        let driver = MockDriver::new();
        let conn = env(&driver).create_connection("SERVER=orcl;UID=u;PWD=p").unwrap();
        assert_eq!(conn.data_source(), "orcl");
        assert_eq!(conn.database(), "");
        assert!(matches!(
            conn.change_database("other"),
            Err(OraError::NotSupported(_))
        ));
    }

    #[test]
    fn test_connection_string_hides_password_after_open() {
        let driver = MockDriver::new();
        let conn = env(&driver).create_connection("SERVER=db1;UID=u;PWD=p").unwrap();
        assert_eq!(conn.connection_string(), "SERVER=db1;UID=u;PWD=p");
        conn.open().unwrap();
        assert_eq!(conn.connection_string(), "SERVER=db1;UID=u");
    }

    #[test]
    fn test_connection_string_persist_security_info() {
        let driver = MockDriver::new();
        let conn = env(&driver)
            .create_connection("UID=u;PWD=p;PERSIST SECURITY INFO=true")
            .unwrap();
        conn.open().unwrap();
        assert!(conn.connection_string().contains("PWD=p"));
    }

    #[test]
    fn test_set_connection_string_only_when_closed() {
        let driver = MockDriver::new();
        let conn = env(&driver).create_connection("UID=u;PWD=p").unwrap();
        conn.set_connection_string("UID=v;PWD=q").unwrap();
        conn.open().unwrap();
        assert!(conn.set_connection_string("UID=w").is_err());
        assert_eq!(conn.connection_info().unwrap().username(), "v");
    }

    #[test]
    fn test_session_format_cached_while_open() {
        let driver = MockDriver::new();
        let conn = env(&driver).create_connection("UID=u;PWD=p").unwrap();
        assert!(conn.session_format().is_err());
        conn.open().unwrap();
        let format = conn.session_format().unwrap();
        assert_eq!(format.decimal_separator, ".");
        assert_eq!(format.group_separator, ",");
        assert_eq!(conn.session_format().unwrap(), format);
    }

    #[test]
    fn test_drop_gives_session_back() {
        let driver = MockDriver::new();
        let env = env(&driver);
        {
            let conn = env.create_connection("UID=u;PWD=p;MAX POOL SIZE=1").unwrap();
            conn.open().unwrap();
        }
        let conn = env.create_connection("UID=u;PWD=p;MAX POOL SIZE=1").unwrap();
        conn.open().unwrap();
        assert_eq!(driver.stats().sessions_connected, 1);
    }
}
