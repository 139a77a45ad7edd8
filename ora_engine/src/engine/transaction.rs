use super::connection::OraConnection;
use crate::error::{OraError, Result};
use crate::native::TransactionHandle;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn to_sql_keyword(self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
}

/// State shared between a [`Transaction`] handle and the connection it runs on.
pub(crate) struct TransactionShared {
    id: u64,
    handle: TransactionHandle,
    isolation_level: IsolationLevel,
    state: Mutex<TransactionState>,
}

impl TransactionShared {
    pub(crate) fn new(handle: TransactionHandle, isolation_level: IsolationLevel) -> Self {
        Self {
            id: NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed),
            handle,
            isolation_level,
            state: Mutex::new(TransactionState::Active),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn handle(&self) -> TransactionHandle {
        self.handle
    }

    pub(crate) fn state(&self) -> TransactionState {
        match self.state.lock() {
            Ok(s) => *s,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub(crate) fn set_state(&self, next: TransactionState) {
        match self.state.lock() {
            Ok(mut s) => *s = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}

/// A local transaction bound to one [`OraConnection`].
///
/// Cheap to clone; clones refer to the same native transaction. Once committed
/// or rolled back the transaction is finished and every further
/// `commit`/`rollback` fails.
#[derive(Clone)]
pub struct Transaction {
    shared: Arc<TransactionShared>,
    connection: OraConnection,
}

impl Transaction {
    pub(crate) fn new(shared: Arc<TransactionShared>, connection: OraConnection) -> Self {
        Self { shared, connection }
    }

    pub(crate) fn shared(&self) -> &Arc<TransactionShared> {
        &self.shared
    }

    pub fn connection(&self) -> &OraConnection {
        &self.connection
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.shared.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        self.shared.state()
    }

    pub fn is_active(&self) -> bool {
        self.state() == TransactionState::Active
    }

    pub fn ptr_eq(&self, other: &Transaction) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub fn commit(&self) -> Result<()> {
        self.finish(TransactionState::Committed)
    }

    pub fn rollback(&self) -> Result<()> {
        self.finish(TransactionState::RolledBack)
    }

    fn finish(&self, target: TransactionState) -> Result<()> {
        let verb = match target {
            TransactionState::Committed => "commit",
            _ => "rollback",
        };
        let mut inner = self.connection.lock()?;
        let current = self.shared.state();
        if current != TransactionState::Active {
            return Err(OraError::state(format!(
                "Cannot {}: transaction state is {:?}",
                verb, current
            )));
        }
        if !inner.is_current_transaction(&self.shared) {
            return Err(OraError::state(
                "The transaction is not associated with an open connection.",
            ));
        }

        let handle = self.shared.handle();
        let session = inner.session_mut()?;
        match target {
            TransactionState::Committed => session.commit(handle)?,
            _ => session.rollback(handle)?,
        }
        if let Err(e) = session.release_transaction(handle) {
            log::warn!("Failed to release transaction {}: {}", self.shared.id(), e);
        }
        self.shared.set_state(target);
        inner.clear_transaction();
        log::debug!("Transaction {} finished with {}", self.shared.id(), verb);
        Ok(())
    }

    /// Makes the native session run under this transaction. Safe to call
    /// repeatedly; commands call it before every execution.
    pub fn attach_to_context(&self) -> Result<()> {
        let mut inner = self.connection.lock()?;
        if !self.is_active() || !inner.is_current_transaction(&self.shared) {
            return Err(OraError::state(
                "The transaction is not active on this connection.",
            ));
        }
        inner.session_mut()?.attach_transaction(self.shared.handle())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::environment::OraEnvironment;
    use crate::mock::MockDriver;

    fn open_connection(driver: &MockDriver) -> OraConnection {
        let env = OraEnvironment::new(driver.shared());
        let conn = env.create_connection("SERVER=db1;UID=u;PWD=p").unwrap();
        conn.open().unwrap();
        conn
    }

    #[test]
    fn test_isolation_level_default_and_keyword() {
        assert_eq!(IsolationLevel::default(), IsolationLevel::ReadCommitted);
        assert_eq!(IsolationLevel::Serializable.to_sql_keyword(), "SERIALIZABLE");
    }

    #[test]
    fn test_commit_finishes_transaction() {
        let driver = MockDriver::new();
        let conn = open_connection(&driver);
        let txn = conn.begin_transaction(IsolationLevel::Serializable).unwrap();
        assert!(txn.is_active());
        assert_eq!(txn.isolation_level(), IsolationLevel::Serializable);

        txn.commit().unwrap();
        assert_eq!(txn.state(), TransactionState::Committed);
        assert_eq!(driver.stats().commits, 1);
        assert_eq!(driver.stats().transactions_released, 1);
        assert!(conn.transaction().is_none());
    }

    #[test]
    fn test_second_commit_fails() {
        let driver = MockDriver::new();
        let conn = open_connection(&driver);
        let txn = conn.begin_transaction(IsolationLevel::default()).unwrap();
        txn.rollback().unwrap();

        let err = txn.commit().unwrap_err();
        assert!(matches!(err, OraError::InvalidState(_)));
        let err = txn.rollback().unwrap_err();
        assert!(matches!(err, OraError::InvalidState(_)));
        assert_eq!(driver.stats().rollbacks, 1);
        assert_eq!(driver.stats().commits, 0);
    }

    #[test]
    fn test_attach_is_idempotent() {
        let driver = MockDriver::new();
        let conn = open_connection(&driver);
        let txn = conn.begin_transaction(IsolationLevel::default()).unwrap();
        txn.attach_to_context().unwrap();
        txn.attach_to_context().unwrap();
        assert_eq!(driver.stats().transactions_attached, 2);
        assert!(txn.is_active());
    }

    #[test]
    fn test_attach_after_commit_fails() {
        let driver = MockDriver::new();
        let conn = open_connection(&driver);
        let txn = conn.begin_transaction(IsolationLevel::default()).unwrap();
        txn.commit().unwrap();
        assert!(txn.attach_to_context().is_err());
    }

    #[test]
    fn test_new_transaction_after_finish() {
        let driver = MockDriver::new();
        let conn = open_connection(&driver);
        let first = conn.begin_transaction(IsolationLevel::default()).unwrap();
        first.commit().unwrap();
        let second = conn.begin_transaction(IsolationLevel::default()).unwrap();
        assert!(!first.ptr_eq(&second));
        assert!(second.is_active());
    }
}
