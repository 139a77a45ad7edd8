pub mod command;
pub mod connection;
pub mod connection_info;
mod cursor_chain;
pub mod data_access;
pub mod environment;
pub mod parameter;
pub mod parameter_collection;
pub mod reader;
pub mod transaction;

pub use command::{CommandBehavior, CommandType, OraCommand};
pub use connection::{ConnectionState, OraConnection, SessionFormat, StateChangeListener};
pub use connection_info::{ConnectionInfo, PoolCredential, PoolKey};
pub use data_access::{DbCommand, DbConnection, DbDataReader, DbParameter, DbTransaction};
pub use environment::OraEnvironment;
pub use parameter::OraParameter;
pub use parameter_collection::ParameterCollection;
pub use reader::DataReader;
pub use transaction::{IsolationLevel, Transaction, TransactionState};
