use super::connection::{ConnectionInner, OraConnection};
use super::cursor_chain::{lock_chain, CursorChain, SharedCursorChain};
use super::parameter::OraParameter;
use super::parameter_collection::ParameterCollection;
use super::reader::{materialize_lob, DataReader};
use super::transaction::Transaction;
use crate::error::{OraError, Result};
use crate::native::{AttributeKind, Binding, StatementHandle};
use crate::protocol::{NativeType, StatementKind, Value};
use std::ops::BitOr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandType {
    Text,
    StoredProcedure,
    TableDirect,
}

/// Flags for [`OraCommand::execute_reader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandBehavior(u8);

impl CommandBehavior {
    pub const DEFAULT: Self = Self(0);
    /// Describe the result columns without fetching rows.
    pub const SCHEMA_ONLY: Self = Self(1);
    /// Closing the reader closes the connection.
    pub const CLOSE_CONNECTION: Self = Self(2);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for CommandBehavior {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy)]
struct PreparedStatement {
    handle: StatementHandle,
    generation: u64,
}

/// One execution in flight, while the connection lock is held.
struct Execution {
    handle: StatementHandle,
    generation: u64,
    from_cache: bool,
    kind: StatementKind,
    rows_affected: i64,
    /// Output cursors in parameter order, not yet handed to a reader.
    cursors: Vec<StatementHandle>,
    /// Set when a reader took ownership of `handle`.
    handle_taken: bool,
}

/// SQL text or stored procedure call against an [`OraConnection`].
pub struct OraCommand {
    text: String,
    command_type: CommandType,
    connection: Option<OraConnection>,
    transaction: Option<Transaction>,
    parameters: ParameterCollection,
    prepared: Option<PreparedStatement>,
    chain: SharedCursorChain,
}

impl OraCommand {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            command_type: CommandType::Text,
            connection: None,
            transaction: None,
            parameters: ParameterCollection::new(),
            prepared: None,
            chain: CursorChain::shared_empty(),
        }
    }

    pub fn with_connection(text: impl Into<String>, connection: &OraConnection) -> Self {
        let mut command = Self::new(text);
        command.connection = Some(connection.clone());
        command
    }

    pub fn command_text(&self) -> &str {
        &self.text
    }

    pub fn set_command_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    pub fn command_type(&self) -> CommandType {
        self.command_type
    }

    pub fn set_command_type(&mut self, command_type: CommandType) -> Result<()> {
        if command_type == CommandType::TableDirect {
            return Err(OraError::NotSupported(
                "TableDirect command type".to_string(),
            ));
        }
        self.command_type = command_type;
        Ok(())
    }

    /// Always 0: executions are never timed out.
    pub fn command_timeout(&self) -> u32 {
        0
    }

    pub fn connection(&self) -> Option<&OraConnection> {
        self.connection.as_ref()
    }

    /// Rebinding the command drops any prepared statement.
    pub fn set_connection(&mut self, connection: Option<OraConnection>) {
        self.release_prepared();
        self.connection = connection;
    }

    pub fn transaction(&self) -> Option<&Transaction> {
        self.transaction.as_ref()
    }

    pub fn set_transaction(&mut self, transaction: Option<Transaction>) {
        self.transaction = transaction;
    }

    pub fn parameters(&self) -> &ParameterCollection {
        &self.parameters
    }

    pub fn parameters_mut(&mut self) -> &mut ParameterCollection {
        &mut self.parameters
    }

    pub fn create_parameter(&self) -> OraParameter {
        OraParameter::new("", NativeType::VarChar)
    }

    pub fn cancel(&self) -> Result<()> {
        Err(OraError::NotSupported("Cancel".to_string()))
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared.is_some()
    }

    fn require_connection(&self) -> Result<OraConnection> {
        self.connection
            .clone()
            .ok_or_else(|| OraError::state("An open connection is required to continue."))
    }

    /// SQL sent to the server: stored procedures become an anonymous block
    /// binding every parameter by name.
    fn statement_text(&self) -> String {
        match self.command_type {
            CommandType::StoredProcedure => {
                let args = self
                    .parameters
                    .iter()
                    .map(|p| {
                        let name = p.name();
                        format!("{}=>:{}", name, name)
                    })
                    .collect::<Vec<_>>()
                    .join(",");
                format!("begin {}({}); end;", self.text, args)
            }
            _ => self.text.clone(),
        }
    }

    fn validate(&self, inner: &ConnectionInner) -> Result<()> {
        inner.ensure_open()?;

        let own = self.transaction.as_ref().filter(|t| t.is_active());
        match (inner.transaction(), own) {
            (None, None) => {}
            (Some(current), Some(own)) if Arc::ptr_eq(current, own.shared()) => {}
            (Some(_), _) => {
                return Err(OraError::state(
                    "Execute requires the command to have a transaction when the connection \
                     has a pending local transaction.",
                ))
            }
            (None, Some(_)) => {
                return Err(OraError::state(
                    "The transaction is not associated with this command's connection.",
                ))
            }
        }

        if self.text.is_empty() {
            return Err(OraError::state(
                "The command text for this command has not been set.",
            ));
        }
        if inner.open_reader().is_some() {
            return Err(OraError::state(
                "There is already an open reader on this connection; close it first.",
            ));
        }
        Ok(())
    }

    fn attached_transaction(&self) -> Option<&Transaction> {
        self.transaction.as_ref().filter(|t| t.is_active())
    }

    fn cached_handle(&self, inner: &ConnectionInner) -> Option<StatementHandle> {
        self.prepared
            .filter(|p| p.generation == inner.generation())
            .map(|p| p.handle)
    }

    fn allocate_and_prepare(&self, inner: &mut ConnectionInner) -> Result<StatementHandle> {
        let handle = inner.allocate_statement()?;
        let sql = self.statement_text();
        log::debug!("Preparing statement: {}", sql);
        if let Err(e) = inner.session_mut().and_then(|s| s.prepare(handle, &sql)) {
            let generation = inner.generation();
            inner.release_statement_quietly(handle, generation);
            return Err(e);
        }
        Ok(handle)
    }

    /// Statement type, binds, execute, output values and row count.
    fn run_statement(
        &self,
        inner: &mut ConnectionInner,
        exec: &mut Execution,
        schema_only: bool,
    ) -> Result<()> {
        let transaction_attached = self.attached_transaction().is_some();
        let session = inner.session_mut()?;

        exec.kind = StatementKind::from_code(
            session.attribute(exec.handle, AttributeKind::StatementType)?,
        );

        for (i, parameter) in self.parameters.iter().enumerate() {
            // A cursor written back by an earlier execution belongs to that
            // execution; output cursors always go out unbound.
            let value = if parameter.native_type() == NativeType::Cursor
                && parameter.direction().is_output()
            {
                Value::Null
            } else {
                parameter.value()
            };
            let name = parameter.name();
            session.bind(
                exec.handle,
                &Binding {
                    position: i + 1,
                    name: &name,
                    value: &value,
                    direction: parameter.direction(),
                    native_type: parameter.native_type(),
                    size: parameter.size(),
                },
            )?;
        }

        if exec.kind.is_query() {
            session.execute(exec.handle, false, schema_only)?;
        } else {
            session.execute(exec.handle, !transaction_attached, false)?;
        }

        let mut adopted = Vec::new();
        for (i, parameter) in self.parameters.iter().enumerate() {
            if !parameter.direction().is_output() {
                continue;
            }
            let value = session.output_value(exec.handle, i + 1)?;
            if parameter.native_type() == NativeType::Cursor {
                if let Some(cursor) = value.as_cursor() {
                    adopted.push(cursor);
                }
            }
            parameter.set_value(value);
        }

        exec.rows_affected = session.attribute(exec.handle, AttributeKind::RowCount)?;
        for cursor in adopted {
            inner.adopt_statement(cursor);
            exec.cursors.push(cursor);
        }
        Ok(())
    }

    /// Shared execution path. `finish` runs under the connection lock after
    /// the statement executed; cursors it leaves in `exec.cursors` become the
    /// pending results of this command.
    fn run<T, F>(&mut self, schema_only: bool, finish: F) -> Result<T>
    where
        F: FnOnce(&mut ConnectionInner, &mut Execution, &OraConnection, &SharedCursorChain) -> Result<T>,
    {
        let connection = self.require_connection()?;
        // Declared before the guard: an old chain is dropped only after the
        // connection unlocks.
        let retired_chain: SharedCursorChain;
        let mut inner = connection.lock()?;
        self.validate(&inner)?;

        retired_chain = std::mem::replace(&mut self.chain, CursorChain::shared_empty());
        if let Some(transaction) = self.attached_transaction() {
            inner
                .session_mut()?
                .attach_transaction(transaction.shared().handle())?;
        }

        let (handle, from_cache) = match self.cached_handle(&inner) {
            Some(handle) => (handle, true),
            None => {
                self.prepared = None;
                (self.allocate_and_prepare(&mut inner)?, false)
            }
        };
        let mut exec = Execution {
            handle,
            generation: inner.generation(),
            from_cache,
            kind: StatementKind::Other(0),
            rows_affected: 0,
            cursors: Vec::new(),
            handle_taken: false,
        };

        let chain = Arc::clone(&self.chain);
        let outcome = self
            .run_statement(&mut inner, &mut exec, schema_only)
            .and_then(|()| finish(&mut inner, &mut exec, &connection, &chain));

        match outcome {
            Ok(value) => {
                if exec.handle_taken && exec.from_cache {
                    self.prepared = None;
                } else if !exec.handle_taken && !exec.from_cache {
                    inner.release_statement_quietly(exec.handle, exec.generation);
                }
                let pending = std::mem::take(&mut exec.cursors);
                drop(inner);
                drop(retired_chain);
                *lock_chain(&self.chain) = CursorChain::new(connection, exec.generation, pending);
                Ok(value)
            }
            Err(e) => {
                log::debug!("Execution failed: {}", e);
                if !exec.from_cache && !exec.handle_taken {
                    inner.release_statement_quietly(exec.handle, exec.generation);
                }
                for cursor in exec.cursors.drain(..) {
                    inner.release_statement_quietly(cursor, exec.generation);
                }
                Err(e)
            }
        }
    }

    /// Executes and returns the provider-reported row count.
    pub fn execute_non_query(&mut self) -> Result<i64> {
        self.run(false, |_, exec, _, _| {
            log::debug!(
                "Executed {:?} statement, {} row(s) affected",
                exec.kind,
                exec.rows_affected
            );
            Ok(exec.rows_affected)
        })
    }

    /// First column of the first row. `None` when the query returns no rows or
    /// the statement is not a query; `Some(Value::Null)` for a NULL cell.
    /// LOB values are read in full.
    pub fn execute_scalar(&mut self) -> Result<Option<Value>> {
        self.run(false, |inner, exec, _, _| {
            if !exec.kind.is_query() {
                return Ok(None);
            }
            let session = inner.session_mut()?;
            let Some(row) = session.fetch_row(exec.handle)? else {
                return Ok(None);
            };
            let Some(mut value) = row.into_values().into_iter().next() else {
                return Ok(None);
            };
            materialize_lob(session, &mut value)?;
            Ok(Some(value))
        })
    }

    /// Opens a reader.
    ///
    /// When the execution produced output cursors the reader starts on the
    /// first one and [`DataReader::next_result`] walks the rest. Otherwise a
    /// query reads its own result set, and any other statement yields an
    /// empty reader carrying the affected-row count.
    pub fn execute_reader(&mut self, behavior: CommandBehavior) -> Result<DataReader> {
        let schema_only = behavior.contains(CommandBehavior::SCHEMA_ONLY);
        self.run(schema_only, |inner, exec, connection, chain| {
            if let Some(&cursor) = exec.cursors.first() {
                let reader = DataReader::open(
                    connection.clone(),
                    inner,
                    Some(cursor),
                    behavior,
                    -1,
                    Arc::clone(chain),
                )?;
                exec.cursors.remove(0);
                return Ok(reader);
            }
            if exec.kind.is_query() {
                let reader = DataReader::open(
                    connection.clone(),
                    inner,
                    Some(exec.handle),
                    behavior,
                    -1,
                    Arc::clone(chain),
                )?;
                exec.handle_taken = true;
                return Ok(reader);
            }
            DataReader::open(
                connection.clone(),
                inner,
                None,
                behavior,
                exec.rows_affected,
                Arc::clone(chain),
            )
        })
    }

    /// Reader over the next pending output cursor of the last execution, or
    /// `None` once all of them have been handed out.
    pub fn next_result(&mut self) -> Result<Option<DataReader>> {
        let connection = self.require_connection()?;
        let mut chain = lock_chain(&self.chain);
        let mut inner = connection.lock()?;
        if inner.open_reader().is_some() {
            return Err(OraError::state(
                "There is already an open reader on this connection; close it first.",
            ));
        }
        let Some((handle, generation)) = chain.pop() else {
            return Ok(None);
        };
        if generation != inner.generation() {
            return Err(OraError::state(
                "The connection was closed while results were pending.",
            ));
        }
        let reader = DataReader::open(
            connection.clone(),
            &mut inner,
            Some(handle),
            CommandBehavior::DEFAULT,
            -1,
            Arc::clone(&self.chain),
        );
        if reader.is_err() {
            inner.release_statement_quietly(handle, generation);
        }
        reader.map(Some)
    }

    /// Prepares the statement once and reuses the handle for later executions
    /// until the command is dropped or rebound.
    pub fn prepare(&mut self) -> Result<()> {
        let connection = self.require_connection()?;
        let mut inner = connection.lock()?;
        inner.ensure_open()?;
        if let Some(previous) = self.prepared.take() {
            inner.release_statement_quietly(previous.handle, previous.generation);
        }
        let handle = self.allocate_and_prepare(&mut inner)?;
        self.prepared = Some(PreparedStatement {
            handle,
            generation: inner.generation(),
        });
        Ok(())
    }

    fn release_prepared(&mut self) {
        let Some(prepared) = self.prepared.take() else {
            return;
        };
        let Some(connection) = &self.connection else {
            return;
        };
        match connection.lock() {
            Ok(mut inner) => inner.release_statement_quietly(prepared.handle, prepared.generation),
            Err(e) => log::warn!("Prepared statement not released: {}", e),
        }
    }
}

impl Drop for OraCommand {
    fn drop(&mut self) {
        self.release_prepared();
    }
}
