pub mod engine;
mod error;
#[cfg(feature = "test-helpers")]
pub mod mock;
pub mod native;
pub mod pool;
pub mod protocol;
pub mod security;

pub use engine::{
    CommandBehavior, CommandType, ConnectionInfo, ConnectionState, DataReader, DbCommand,
    DbConnection, DbDataReader, DbParameter, DbTransaction, IsolationLevel, OraCommand,
    OraConnection, OraEnvironment, OraParameter, ParameterCollection, SessionFormat, Transaction,
    TransactionState,
};
pub use error::{ErrorCategory, OraError, Result};
pub use native::{NativeDriver, NativeSession};
pub use pool::{ConnectionPoolManager, PoolOptions, PoolState};
pub use protocol::{ColumnInfo, NativeType, ParameterDirection, Row, StatementKind, Value};
pub use security::Secret;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDriver;

    #[test]
    fn test_environment_creation() {
        let env = OraEnvironment::new(MockDriver::new().shared());
        assert_eq!(env.pools().pool_count(), 0);
    }

    #[test]
    fn test_connection_empty_string() {
        let env = OraEnvironment::new(MockDriver::new().shared());
        let conn = env.create_connection("").unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(conn.data_source(), "");
    }
}
