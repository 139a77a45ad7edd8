use super::connection::OraConnection;
use crate::native::StatementHandle;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Output cursors of one execution still waiting to be read, in parameter
/// order.
///
/// Shared between a command and the readers it hands out. Never drop the last
/// reference while holding the connection lock: dropping releases the
/// remaining cursor handles through the connection.
pub(crate) struct CursorChain {
    connection: Option<OraConnection>,
    generation: u64,
    pending: VecDeque<StatementHandle>,
}

pub(crate) type SharedCursorChain = Arc<Mutex<CursorChain>>;

impl CursorChain {
    pub(crate) fn empty() -> Self {
        Self {
            connection: None,
            generation: 0,
            pending: VecDeque::new(),
        }
    }

    pub(crate) fn new(
        connection: OraConnection,
        generation: u64,
        pending: Vec<StatementHandle>,
    ) -> Self {
        Self {
            connection: Some(connection),
            generation,
            pending: pending.into(),
        }
    }

    pub(crate) fn shared_empty() -> SharedCursorChain {
        Arc::new(Mutex::new(Self::empty()))
    }

    /// Next cursor handle and the connection generation it belongs to.
    pub(crate) fn pop(&mut self) -> Option<(StatementHandle, u64)> {
        self.pending.pop_front().map(|h| (h, self.generation))
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }
}

pub(crate) fn lock_chain(chain: &SharedCursorChain) -> MutexGuard<'_, CursorChain> {
    chain.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Drop for CursorChain {
    fn drop(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let Some(connection) = self.connection.take() else {
            return;
        };
        let locked = connection.lock();
        match locked {
            Ok(mut inner) => {
                for handle in self.pending.drain(..) {
                    inner.release_statement_quietly(handle, self.generation);
                }
            }
            Err(e) => log::warn!("Unread cursors not released: {}", e),
        }
    }
}
