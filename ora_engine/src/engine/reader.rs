use super::command::CommandBehavior;
use super::connection::{ConnectionInner, OraConnection};
use super::cursor_chain::{lock_chain, SharedCursorChain};
use crate::error::{OraError, Result};
use crate::native::{Session, StatementHandle};
use crate::protocol::{ColumnInfo, Row, Value};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_READER_ID: AtomicU64 = AtomicU64::new(1);

/// Replaces a LOB locator by its full content and closes the locator.
pub(crate) fn materialize_lob(session: &mut Session, value: &mut Value) -> Result<()> {
    if let Value::Lob(locator) = *value {
        let content = session.read_lob(locator)?;
        session.close_lob(locator)?;
        *value = content;
    }
    Ok(())
}

/// Forward-only reader over one result set at a time.
///
/// The reader owns its statement handle and releases it on `close`, on
/// `next_result` and on drop. Output cursors of the same execution that
/// have not been read yet are reached with [`DataReader::next_result`].
pub struct DataReader {
    id: u64,
    connection: OraConnection,
    generation: u64,
    statement: Option<StatementHandle>,
    columns: Vec<ColumnInfo>,
    peeked: Option<Row>,
    exhausted: bool,
    behavior: CommandBehavior,
    records_affected: i64,
    chain: Option<SharedCursorChain>,
    closed: bool,
}

impl DataReader {
    /// Registers a reader over `statement` (an executed query or an output
    /// cursor) as the connection's open reader. `None` gives an empty reader.
    pub(crate) fn open(
        connection: OraConnection,
        inner: &mut ConnectionInner,
        statement: Option<StatementHandle>,
        behavior: CommandBehavior,
        records_affected: i64,
        chain: SharedCursorChain,
    ) -> Result<Self> {
        let columns = match statement {
            Some(handle) => inner.session_mut()?.describe(handle)?,
            None => Vec::new(),
        };
        let id = NEXT_READER_ID.fetch_add(1, Ordering::Relaxed);
        inner.set_open_reader(id);
        log::trace!("Opened reader {} over {:?}", id, statement);

        Ok(Self {
            id,
            generation: inner.generation(),
            connection,
            exhausted: statement.is_none(),
            statement,
            columns,
            peeked: None,
            behavior,
            records_affected,
            chain: Some(chain),
            closed: false,
        })
    }

    fn ensure_not_closed(&self) -> Result<()> {
        if self.closed {
            return Err(OraError::state(
                "Invalid attempt to read when the reader is closed.",
            ));
        }
        Ok(())
    }

    fn ensure_same_session(&self, inner: &ConnectionInner) -> Result<()> {
        inner.ensure_open()?;
        if inner.generation() != self.generation {
            return Err(OraError::state(
                "The connection was closed while the reader was open.",
            ));
        }
        Ok(())
    }

    fn fetch_next(&mut self) -> Result<Option<Row>> {
        let Some(statement) = self.statement else {
            return Ok(None);
        };
        if self.exhausted || self.behavior.contains(CommandBehavior::SCHEMA_ONLY) {
            return Ok(None);
        }

        let mut inner = self.connection.lock()?;
        self.ensure_same_session(&inner)?;
        let session = inner.session_mut()?;
        match session.fetch_row(statement)? {
            Some(mut row) => {
                for value in row.values_mut() {
                    materialize_lob(session, value)?;
                }
                Ok(Some(row))
            }
            None => {
                self.exhausted = true;
                Ok(None)
            }
        }
    }

    /// Next row of the current result set, `None` at the end.
    pub fn fetch(&mut self) -> Result<Option<Row>> {
        self.ensure_not_closed()?;
        if let Some(row) = self.peeked.take() {
            return Ok(Some(row));
        }
        self.fetch_next()
    }

    pub fn has_rows(&mut self) -> Result<bool> {
        self.ensure_not_closed()?;
        if self.peeked.is_none() {
            self.peeked = self.fetch_next()?;
        }
        Ok(self.peeked.is_some())
    }

    /// Moves to the next pending output cursor. Returns false once every
    /// cursor of the execution has been handed out.
    pub fn next_result(&mut self) -> Result<bool> {
        self.ensure_not_closed()?;
        let next = match &self.chain {
            Some(chain) => lock_chain(chain).pop(),
            None => None,
        };

        let mut inner = self.connection.lock()?;
        if let Some(current) = self.statement.take() {
            inner.release_statement_quietly(current, self.generation);
        }
        self.columns.clear();
        self.peeked = None;
        self.exhausted = true;

        let Some((handle, generation)) = next else {
            return Ok(false);
        };
        if generation != inner.generation() {
            return Err(OraError::state(
                "The connection was closed while results were pending.",
            ));
        }
        match inner.session_mut().and_then(|s| s.describe(handle)) {
            Ok(columns) => {
                self.columns = columns;
                self.statement = Some(handle);
                self.exhausted = false;
                Ok(true)
            }
            Err(e) => {
                inner.release_statement_quietly(handle, generation);
                Err(e)
            }
        }
    }

    /// Releases the statement. With [`CommandBehavior::CLOSE_CONNECTION`] the
    /// connection is closed too, exactly once.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.peeked = None;
        {
            let mut inner = self.connection.lock()?;
            if let Some(statement) = self.statement.take() {
                inner.release_statement_quietly(statement, self.generation);
            }
            inner.clear_open_reader(self.id);
        }
        // Dropped after the connection lock: the last chain reference
        // releases unread cursors through the connection.
        drop(self.chain.take());
        log::trace!("Closed reader {}", self.id);

        if self.behavior.contains(CommandBehavior::CLOSE_CONNECTION) {
            self.connection.close()?;
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn field_count(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    /// Column position by name: exact match first, then case-insensitive.
    pub fn get_ordinal(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .or_else(|| {
                self.columns
                    .iter()
                    .position(|c| c.name.eq_ignore_ascii_case(name))
            })
            .ok_or_else(|| OraError::IndexOutOfRange(format!("No column named '{}'", name)))
    }

    /// Rows changed by a non-query execution, -1 for result sets.
    pub fn records_affected(&self) -> i64 {
        self.records_affected
    }

    pub fn behavior(&self) -> CommandBehavior {
        self.behavior
    }

    pub fn connection(&self) -> &OraConnection {
        &self.connection
    }
}

impl Drop for DataReader {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Reader {} close on drop failed: {}", self.id, e);
        }
    }
}
