//! In-memory native driver for tests and benches.
//!
//! SQL text is matched literally against scripts registered with
//! [`MockDriver::script`]. Every handle and LOB the driver hands out is
//! counted, so tests can assert that the engine releases what it allocates.

use crate::engine::IsolationLevel;
use crate::error::{OraError, Result};
use crate::native::{
    AttributeKind, Binding, Credentials, LobLocator, LocaleItem, NativeDriver, NativeSession,
    StatementHandle, TransactionHandle,
};
use crate::protocol::{ColumnInfo, Row, StatementKind, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub const MOCK_SERVER_VERSION: &str = "Oracle Database 19c Mock Release 19.0.0.0.0";

/// Rows and columns of one result set.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Row>,
}

impl ResultSet {
    pub fn new(columns: Vec<ColumnInfo>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }
}

/// Server-side behaviour of one SQL text.
#[derive(Debug, Clone)]
pub struct ScriptedStatement {
    kind: StatementKind,
    result: ResultSet,
    rows_affected: i64,
    outputs: Vec<(usize, Value)>,
    cursors: Vec<(usize, ResultSet)>,
    error: Option<OraError>,
}

impl ScriptedStatement {
    fn of_kind(kind: StatementKind) -> Self {
        Self {
            kind,
            result: ResultSet::default(),
            rows_affected: 0,
            outputs: Vec::new(),
            cursors: Vec::new(),
            error: None,
        }
    }

    pub fn query(columns: Vec<ColumnInfo>, rows: Vec<Row>) -> Self {
        let mut statement = Self::of_kind(StatementKind::Select);
        statement.result = ResultSet::new(columns, rows);
        statement
    }

    pub fn non_query(kind: StatementKind, rows_affected: i64) -> Self {
        let mut statement = Self::of_kind(kind);
        statement.rows_affected = rows_affected;
        statement
    }

    /// Anonymous PL/SQL block, as produced for stored procedure calls.
    pub fn procedure() -> Self {
        Self::of_kind(StatementKind::Begin)
    }

    /// Value written to the output parameter at 1-based `position`.
    pub fn with_output(mut self, position: usize, value: Value) -> Self {
        self.outputs.push((position, value));
        self
    }

    /// Opens a cursor over `result` into the parameter at `position`.
    pub fn with_cursor(mut self, position: usize, result: ResultSet) -> Self {
        self.cursors.push((position, result));
        self
    }

    /// Execution fails with `ORA-code`.
    pub fn failing(mut self, code: i32, message: &str) -> Self {
        self.error = Some(OraError::provider(code, message));
        self
    }
}

/// One call to execute, as the server saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedStatement {
    pub sql: String,
    pub auto_commit: bool,
    pub schema_only: bool,
    /// (name, value) in position order.
    pub bindings: Vec<(String, Value)>,
    pub transaction: Option<TransactionHandle>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockStats {
    /// Every `connect` call, including failed ones.
    pub connect_attempts: usize,
    pub sessions_connected: usize,
    pub sessions_disconnected: usize,
    pub statements_allocated: usize,
    pub statements_released: usize,
    /// Statement handles allocated and not yet released.
    pub live_statements: usize,
    pub lobs_read: usize,
    pub lobs_closed: usize,
    pub transactions_begun: usize,
    pub transactions_attached: usize,
    pub commits: usize,
    pub rollbacks: usize,
    pub transactions_released: usize,
    pub server_version_calls: usize,
}

#[derive(Default)]
struct StatementState {
    sql: Option<String>,
    kind: Option<StatementKind>,
    bindings: BTreeMap<usize, (String, Value)>,
    columns: Vec<ColumnInfo>,
    rows: VecDeque<Row>,
    fetched: i64,
    rows_affected: i64,
    outputs: HashMap<usize, Value>,
}

#[derive(Default)]
struct MockState {
    scripts: HashMap<String, ScriptedStatement>,
    lobs: HashMap<LobLocator, Value>,
    statements: HashMap<StatementHandle, StatementState>,
    transactions: HashMap<TransactionHandle, bool>,
    next_handle: u64,
    connect_error: Option<OraError>,
    stats: MockStats,
    executed: Vec<ExecutedStatement>,
    credentials: Vec<Credentials>,
}

impl MockState {
    fn next_id(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn new_statement(&mut self, state: StatementState) -> StatementHandle {
        let handle = StatementHandle(self.next_id());
        self.statements.insert(handle, state);
        self.stats.statements_allocated += 1;
        handle
    }

    fn statement(&mut self, handle: StatementHandle) -> Result<&mut StatementState> {
        self.statements
            .get_mut(&handle)
            .ok_or_else(|| OraError::provider(1001, "invalid cursor"))
    }

    fn known_transaction(&self, handle: TransactionHandle) -> Result<()> {
        if self.transactions.contains_key(&handle) {
            Ok(())
        } else {
            Err(OraError::provider(24327, "invalid transaction handle"))
        }
    }
}

/// Scripted stand-in for the native client library. Clones share state.
#[derive(Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The driver as the engine consumes it.
    pub fn shared(&self) -> Arc<dyn NativeDriver> {
        Arc::new(self.clone())
    }

    /// Registers (or replaces) the behaviour of `sql`.
    pub fn script(&self, sql: &str, statement: ScriptedStatement) {
        self.lock().scripts.insert(sql.to_string(), statement);
    }

    pub fn add_lob(&self, content: Value) -> LobLocator {
        let mut state = self.lock();
        let locator = LobLocator(state.next_id());
        state.lobs.insert(locator, content);
        locator
    }

    /// Makes every following connect fail with `error`, until reset with `None`.
    pub fn set_connect_error(&self, error: Option<OraError>) {
        self.lock().connect_error = error;
    }

    pub fn stats(&self) -> MockStats {
        let state = self.lock();
        let mut stats = state.stats.clone();
        stats.live_statements = state.statements.len();
        stats
    }

    pub fn executed(&self) -> Vec<ExecutedStatement> {
        self.lock().executed.clone()
    }

    pub fn credentials_seen(&self) -> Vec<Credentials> {
        self.lock().credentials.clone()
    }
}

impl NativeDriver for MockDriver {
    fn connect(&self, credentials: &Credentials) -> Result<Box<dyn NativeSession>> {
        let mut state = self.lock();
        state.stats.connect_attempts += 1;
        if let Some(error) = &state.connect_error {
            return Err(error.clone());
        }
        state.credentials.push(credentials.clone());
        state.stats.sessions_connected += 1;
        Ok(Box::new(MockSession {
            driver: self.clone(),
            connected: true,
            attached: None,
        }))
    }
}

struct MockSession {
    driver: MockDriver,
    connected: bool,
    attached: Option<TransactionHandle>,
}

impl MockSession {
    fn state(&self) -> Result<MutexGuard<'_, MockState>> {
        if !self.connected {
            return Err(OraError::provider(3114, "not connected to ORACLE"));
        }
        Ok(self.driver.lock())
    }
}

impl NativeSession for MockSession {
    fn disconnect(&mut self) -> Result<()> {
        let mut state = self.state()?;
        state.stats.sessions_disconnected += 1;
        drop(state);
        self.connected = false;
        Ok(())
    }

    fn allocate_statement(&mut self) -> Result<StatementHandle> {
        Ok(self.state()?.new_statement(StatementState::default()))
    }

    fn prepare(&mut self, stmt: StatementHandle, sql: &str) -> Result<()> {
        let mut state = self.state()?;
        let kind = state
            .scripts
            .get(sql)
            .map(|s| s.kind)
            .ok_or_else(|| OraError::provider(900, "invalid SQL statement"))?;
        let statement = state.statement(stmt)?;
        statement.sql = Some(sql.to_string());
        statement.kind = Some(kind);
        statement.bindings.clear();
        Ok(())
    }

    fn bind(&mut self, stmt: StatementHandle, binding: &Binding<'_>) -> Result<()> {
        let mut state = self.state()?;
        state.statement(stmt)?.bindings.insert(
            binding.position,
            (binding.name.to_string(), binding.value.clone()),
        );
        Ok(())
    }

    fn execute(&mut self, stmt: StatementHandle, auto_commit: bool, schema_only: bool) -> Result<bool> {
        let attached = self.attached;
        let mut state = self.state()?;
        let statement = state.statement(stmt)?;
        let sql = statement
            .sql
            .clone()
            .ok_or_else(|| OraError::provider(24337, "statement handle not prepared"))?;
        let bindings = statement.bindings.values().cloned().collect();

        state.executed.push(ExecutedStatement {
            sql: sql.clone(),
            auto_commit,
            schema_only,
            bindings,
            transaction: attached,
        });
        let script = state
            .scripts
            .get(&sql)
            .cloned()
            .ok_or_else(|| OraError::provider(900, "invalid SQL statement"))?;
        if let Some(error) = script.error {
            return Err(error);
        }

        let mut outputs: HashMap<usize, Value> = script.outputs.into_iter().collect();
        for (position, result) in script.cursors {
            let cursor = state.new_statement(StatementState {
                kind: Some(StatementKind::Select),
                columns: result.columns,
                rows: result.rows.into(),
                ..StatementState::default()
            });
            outputs.insert(position, Value::Cursor(cursor));
        }

        let statement = state.statement(stmt)?;
        statement.columns = script.result.columns;
        statement.rows = if schema_only {
            VecDeque::new()
        } else {
            script.result.rows.into()
        };
        statement.fetched = 0;
        statement.rows_affected = script.rows_affected;
        statement.outputs = outputs;
        Ok(!statement.rows.is_empty())
    }

    fn describe(&mut self, stmt: StatementHandle) -> Result<Vec<ColumnInfo>> {
        Ok(self.state()?.statement(stmt)?.columns.clone())
    }

    fn fetch_row(&mut self, stmt: StatementHandle) -> Result<Option<Row>> {
        let mut state = self.state()?;
        let statement = state.statement(stmt)?;
        let row = statement.rows.pop_front();
        if row.is_some() {
            statement.fetched += 1;
        }
        Ok(row)
    }

    fn output_value(&mut self, stmt: StatementHandle, position: usize) -> Result<Value> {
        let mut state = self.state()?;
        let statement = state.statement(stmt)?;
        let value = statement
            .outputs
            .get(&position)
            .or_else(|| statement.bindings.get(&position).map(|(_, v)| v))
            .cloned()
            .unwrap_or_default();
        Ok(value)
    }

    fn attribute(&mut self, stmt: StatementHandle, kind: AttributeKind) -> Result<i64> {
        let mut state = self.state()?;
        let statement = state.statement(stmt)?;
        let statement_kind = statement.kind.unwrap_or(StatementKind::Other(0));
        Ok(match kind {
            AttributeKind::StatementType => statement_kind.code(),
            AttributeKind::RowCount if statement_kind.is_query() => statement.fetched,
            AttributeKind::RowCount => statement.rows_affected,
        })
    }

    fn release_statement(&mut self, stmt: StatementHandle) -> Result<()> {
        let mut state = self.state()?;
        state
            .statements
            .remove(&stmt)
            .ok_or_else(|| OraError::provider(1001, "invalid cursor"))?;
        state.stats.statements_released += 1;
        Ok(())
    }

    fn read_lob(&mut self, lob: LobLocator) -> Result<Value> {
        let mut state = self.state()?;
        let content = state
            .lobs
            .get(&lob)
            .cloned()
            .ok_or_else(|| OraError::provider(22275, "invalid LOB locator specified"))?;
        state.stats.lobs_read += 1;
        Ok(content)
    }

    fn close_lob(&mut self, _lob: LobLocator) -> Result<()> {
        self.state()?.stats.lobs_closed += 1;
        Ok(())
    }

    fn allocate_transaction(&mut self) -> Result<TransactionHandle> {
        let mut state = self.state()?;
        let handle = TransactionHandle(state.next_id());
        state.transactions.insert(handle, false);
        Ok(handle)
    }

    fn begin_transaction(&mut self, txn: TransactionHandle, _isolation: IsolationLevel) -> Result<()> {
        let mut state = self.state()?;
        state.known_transaction(txn)?;
        state.transactions.insert(txn, true);
        state.stats.transactions_begun += 1;
        drop(state);
        self.attached = Some(txn);
        Ok(())
    }

    fn attach_transaction(&mut self, txn: TransactionHandle) -> Result<()> {
        let mut state = self.state()?;
        state.known_transaction(txn)?;
        state.stats.transactions_attached += 1;
        drop(state);
        self.attached = Some(txn);
        Ok(())
    }

    fn commit(&mut self, txn: TransactionHandle) -> Result<()> {
        let mut state = self.state()?;
        state.known_transaction(txn)?;
        state.stats.commits += 1;
        drop(state);
        if self.attached == Some(txn) {
            self.attached = None;
        }
        Ok(())
    }

    fn rollback(&mut self, txn: TransactionHandle) -> Result<()> {
        let mut state = self.state()?;
        state.known_transaction(txn)?;
        state.stats.rollbacks += 1;
        drop(state);
        if self.attached == Some(txn) {
            self.attached = None;
        }
        Ok(())
    }

    fn release_transaction(&mut self, txn: TransactionHandle) -> Result<()> {
        let mut state = self.state()?;
        state.known_transaction(txn)?;
        state.transactions.remove(&txn);
        state.stats.transactions_released += 1;
        Ok(())
    }

    fn server_version(&mut self) -> Result<String> {
        self.state()?.stats.server_version_calls += 1;
        Ok(MOCK_SERVER_VERSION.to_string())
    }

    fn locale_info(&mut self, item: LocaleItem) -> Result<String> {
        self.state()?;
        let value = match item {
            LocaleItem::GroupSeparator | LocaleItem::CurrencyGroupSeparator => ",",
            LocaleItem::DecimalSeparator | LocaleItem::CurrencyDecimalSeparator => ".",
        };
        Ok(value.to_string())
    }
}
