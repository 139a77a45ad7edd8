//! Provider-neutral data-access traits, implemented by the `Ora*` types.
//!
//! Code written against these traits does not name the concrete provider.

use super::command::{CommandBehavior, OraCommand};
use super::connection::{ConnectionState, OraConnection};
use super::parameter::OraParameter;
use super::reader::DataReader;
use super::transaction::{IsolationLevel, Transaction};
use crate::error::Result;
use crate::protocol::{ParameterDirection, Row, Value};

pub trait DbConnection {
    type Command: DbCommand;
    type Transaction: DbTransaction;

    fn open(&self) -> Result<()>;

    fn close(&self) -> Result<()>;

    fn state(&self) -> ConnectionState;

    fn begin_transaction(&self, isolation_level: IsolationLevel) -> Result<Self::Transaction>;

    fn create_command(&self) -> Self::Command;

    fn server_version(&self) -> Result<String>;

    fn data_source(&self) -> String;

    fn database(&self) -> String;

    fn change_database(&self, database: &str) -> Result<()>;
}

pub trait DbTransaction {
    fn commit(&self) -> Result<()>;

    fn rollback(&self) -> Result<()>;

    fn isolation_level(&self) -> IsolationLevel;
}

pub trait DbCommand {
    type Parameter: DbParameter;
    type Reader: DbDataReader;

    fn command_text(&self) -> &str;

    fn set_command_text(&mut self, text: &str);

    fn create_parameter(&self) -> Self::Parameter;

    /// Appends a parameter and returns its index.
    fn add_parameter(&mut self, parameter: Self::Parameter) -> Result<usize>;

    fn execute_non_query(&mut self) -> Result<i64>;

    fn execute_scalar(&mut self) -> Result<Option<Value>>;

    fn execute_reader(&mut self, behavior: CommandBehavior) -> Result<Self::Reader>;

    fn prepare(&mut self) -> Result<()>;

    fn cancel(&self) -> Result<()>;
}

pub trait DbParameter {
    fn name(&self) -> String;

    fn set_name(&self, name: &str);

    fn value(&self) -> Value;

    fn set_value(&self, value: Value);

    fn direction(&self) -> ParameterDirection;

    fn set_direction(&self, direction: ParameterDirection);
}

pub trait DbDataReader {
    fn fetch(&mut self) -> Result<Option<Row>>;

    fn next_result(&mut self) -> Result<bool>;

    fn close(&mut self) -> Result<()>;

    fn is_closed(&self) -> bool;

    fn field_count(&self) -> usize;

    fn records_affected(&self) -> i64;

    fn get_ordinal(&self, name: &str) -> Result<usize>;
}

impl DbConnection for OraConnection {
    type Command = OraCommand;
    type Transaction = Transaction;

    fn open(&self) -> Result<()> {
        OraConnection::open(self)
    }

    fn close(&self) -> Result<()> {
        OraConnection::close(self)
    }

    fn state(&self) -> ConnectionState {
        OraConnection::state(self)
    }

    fn begin_transaction(&self, isolation_level: IsolationLevel) -> Result<Transaction> {
        OraConnection::begin_transaction(self, isolation_level)
    }

    fn create_command(&self) -> OraCommand {
        OraConnection::create_command(self)
    }

    fn server_version(&self) -> Result<String> {
        OraConnection::server_version(self)
    }

    fn data_source(&self) -> String {
        OraConnection::data_source(self)
    }

    fn database(&self) -> String {
        OraConnection::database(self)
    }

    fn change_database(&self, database: &str) -> Result<()> {
        OraConnection::change_database(self, database)
    }
}

impl DbTransaction for Transaction {
    fn commit(&self) -> Result<()> {
        Transaction::commit(self)
    }

    fn rollback(&self) -> Result<()> {
        Transaction::rollback(self)
    }

    fn isolation_level(&self) -> IsolationLevel {
        Transaction::isolation_level(self)
    }
}

impl DbCommand for OraCommand {
    type Parameter = OraParameter;
    type Reader = DataReader;

    fn command_text(&self) -> &str {
        OraCommand::command_text(self)
    }

    fn set_command_text(&mut self, text: &str) {
        OraCommand::set_command_text(self, text)
    }

    fn create_parameter(&self) -> OraParameter {
        OraCommand::create_parameter(self)
    }

    fn add_parameter(&mut self, parameter: OraParameter) -> Result<usize> {
        self.parameters_mut().add(parameter)
    }

    fn execute_non_query(&mut self) -> Result<i64> {
        OraCommand::execute_non_query(self)
    }

    fn execute_scalar(&mut self) -> Result<Option<Value>> {
        OraCommand::execute_scalar(self)
    }

    fn execute_reader(&mut self, behavior: CommandBehavior) -> Result<DataReader> {
        OraCommand::execute_reader(self, behavior)
    }

    fn prepare(&mut self) -> Result<()> {
        OraCommand::prepare(self)
    }

    fn cancel(&self) -> Result<()> {
        OraCommand::cancel(self)
    }
}

impl DbParameter for OraParameter {
    fn name(&self) -> String {
        OraParameter::name(self)
    }

    fn set_name(&self, name: &str) {
        OraParameter::set_name(self, name)
    }

    fn value(&self) -> Value {
        OraParameter::value(self)
    }

    fn set_value(&self, value: Value) {
        OraParameter::set_value(self, value)
    }

    fn direction(&self) -> ParameterDirection {
        OraParameter::direction(self)
    }

    fn set_direction(&self, direction: ParameterDirection) {
        OraParameter::set_direction(self, direction)
    }
}

impl DbDataReader for DataReader {
    fn fetch(&mut self) -> Result<Option<Row>> {
        DataReader::fetch(self)
    }

    fn next_result(&mut self) -> Result<bool> {
        DataReader::next_result(self)
    }

    fn close(&mut self) -> Result<()> {
        DataReader::close(self)
    }

    fn is_closed(&self) -> bool {
        DataReader::is_closed(self)
    }

    fn field_count(&self) -> usize {
        DataReader::field_count(self)
    }

    fn records_affected(&self) -> i64 {
        DataReader::records_affected(self)
    }

    fn get_ordinal(&self, name: &str) -> Result<usize> {
        DataReader::get_ordinal(self, name)
    }
}
