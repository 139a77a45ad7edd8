//! Seam to the native client library.
//!
//! The engine never talks to the wire itself: every round trip goes through a
//! [`NativeSession`] obtained from a [`NativeDriver`]. Handles are opaque ids
//! owned by the session that issued them.

use crate::engine::IsolationLevel;
use crate::error::Result;
use crate::protocol::{ColumnInfo, NativeType, ParameterDirection, Row, Value};
use crate::security::Secret;
use std::fmt;
use std::ops::{Deref, DerefMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatementHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LobLocator(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialType {
    /// Username and password checked by the server.
    Rdbms,
    /// Operating-system / external authentication.
    External,
}

/// Everything the native layer needs to authenticate a session.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: Secret,
    pub database: String,
    pub credential_type: CredentialType,
    /// Set when the session must change its password while logging in.
    pub new_password: Option<Secret>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("database", &self.database)
            .field("credential_type", &self.credential_type)
            .field("new_password", &self.new_password.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    /// Statement kind code, see [`crate::protocol::StatementKind::from_code`].
    StatementType,
    /// Rows processed by the last execute / fetched so far.
    RowCount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocaleItem {
    GroupSeparator,
    DecimalSeparator,
    CurrencyGroupSeparator,
    CurrencyDecimalSeparator,
}

/// One parameter binding, 1-based position in declaration order.
#[derive(Debug, Clone, Copy)]
pub struct Binding<'a> {
    pub position: usize,
    pub name: &'a str,
    pub value: &'a Value,
    pub direction: ParameterDirection,
    pub native_type: NativeType,
    pub size: usize,
}

pub trait NativeDriver: Send + Sync {
    fn connect(&self, credentials: &Credentials) -> Result<Box<dyn NativeSession>>;
}

/// An authenticated server session. Not shared between threads at the same time;
/// the pool hands it to one connection at a time.
pub trait NativeSession: Send {
    fn disconnect(&mut self) -> Result<()>;

    fn allocate_statement(&mut self) -> Result<StatementHandle>;
    fn prepare(&mut self, stmt: StatementHandle, sql: &str) -> Result<()>;
    fn bind(&mut self, stmt: StatementHandle, binding: &Binding<'_>) -> Result<()>;
    /// Returns true when the statement produced rows to fetch.
    fn execute(&mut self, stmt: StatementHandle, auto_commit: bool, schema_only: bool)
        -> Result<bool>;
    fn describe(&mut self, stmt: StatementHandle) -> Result<Vec<ColumnInfo>>;
    fn fetch_row(&mut self, stmt: StatementHandle) -> Result<Option<Row>>;
    /// Value written back into an output parameter by the last execute.
    fn output_value(&mut self, stmt: StatementHandle, position: usize) -> Result<Value>;
    fn attribute(&mut self, stmt: StatementHandle, kind: AttributeKind) -> Result<i64>;
    fn release_statement(&mut self, stmt: StatementHandle) -> Result<()>;

    fn read_lob(&mut self, lob: LobLocator) -> Result<Value>;
    fn close_lob(&mut self, lob: LobLocator) -> Result<()>;

    fn allocate_transaction(&mut self) -> Result<TransactionHandle>;
    fn begin_transaction(&mut self, txn: TransactionHandle, isolation: IsolationLevel)
        -> Result<()>;
    fn attach_transaction(&mut self, txn: TransactionHandle) -> Result<()>;
    fn commit(&mut self, txn: TransactionHandle) -> Result<()>;
    fn rollback(&mut self, txn: TransactionHandle) -> Result<()>;
    fn release_transaction(&mut self, txn: TransactionHandle) -> Result<()>;

    fn server_version(&mut self) -> Result<String>;
    fn locale_info(&mut self, item: LocaleItem) -> Result<String>;
}

/// Owned native session. Disconnects on drop unless already disconnected.
pub struct Session {
    native: Box<dyn NativeSession>,
    connected: bool,
}

impl Session {
    pub fn new(native: Box<dyn NativeSession>) -> Self {
        Self {
            native,
            connected: true,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn disconnect(&mut self) -> Result<()> {
        if !self.connected {
            return Ok(());
        }
        self.connected = false;
        self.native.disconnect()
    }
}

impl Deref for Session {
    type Target = dyn NativeSession;

    fn deref(&self) -> &Self::Target {
        self.native.as_ref()
    }
}

impl DerefMut for Session {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.native.as_mut()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.disconnect() {
            log::warn!("Session disconnect failed during drop: {}", e);
        }
    }
}
