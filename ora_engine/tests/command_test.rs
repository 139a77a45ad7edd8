use ora_engine::mock::{MockDriver, ScriptedStatement};
use ora_engine::{
    CommandBehavior, CommandType, ConnectionState, IsolationLevel, NativeType, OraCommand,
    OraError, OraParameter, ParameterDirection, StatementKind, Value,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

mod helpers;
use helpers::{conn_str, cursor_procedure, env_for, init_logging, int_rows, number_column, open_connection};

fn cursor_command(conn: &ora_engine::OraConnection, names: &[&str]) -> OraCommand {
    let mut cmd = OraCommand::with_connection("pkg.get_sets", conn);
    cmd.set_command_type(CommandType::StoredProcedure).unwrap();
    for name in names {
        cmd.parameters_mut()
            .add(OraParameter::new(*name, NativeType::Cursor).direction_of(ParameterDirection::Out))
            .unwrap();
    }
    cmd
}

fn first_value(reader: &mut ora_engine::DataReader) -> Value {
    reader.fetch().unwrap().unwrap().get(0).cloned().unwrap()
}

#[test]
fn test_three_output_cursors_read_in_order() {
    init_logging();
    let driver = MockDriver::new();
    driver.script(
        "begin pkg.get_sets(P1=>:P1,P2=>:P2,P3=>:P3); end;",
        cursor_procedure(&[10, 20, 30]),
    );
    let env = env_for(&driver);
    let conn = open_connection(&env, &conn_str(&[]));
    let mut cmd = cursor_command(&conn, &["P1", "P2", "P3"]);

    let mut reader = cmd.execute_reader(CommandBehavior::DEFAULT).unwrap();
    assert_eq!(reader.records_affected(), -1);
    assert_eq!(first_value(&mut reader), Value::Integer(10));

    assert!(reader.next_result().unwrap());
    assert_eq!(first_value(&mut reader), Value::Integer(20));
    assert!(reader.next_result().unwrap());
    assert_eq!(first_value(&mut reader), Value::Integer(30));
    assert!(!reader.next_result().unwrap());
    assert!(!reader.next_result().unwrap());
    reader.close().unwrap();

    assert_eq!(driver.stats().live_statements, 0);
}

#[test]
fn test_command_next_result_walks_remaining_cursors() {
    init_logging();
    let driver = MockDriver::new();
    driver.script(
        "begin pkg.get_sets(P1=>:P1,P2=>:P2,P3=>:P3); end;",
        cursor_procedure(&[1, 2, 3]),
    );
    let env = env_for(&driver);
    let conn = open_connection(&env, &conn_str(&[]));
    let mut cmd = cursor_command(&conn, &["P1", "P2", "P3"]);

    let mut first = cmd.execute_reader(CommandBehavior::DEFAULT).unwrap();
    assert_eq!(first_value(&mut first), Value::Integer(1));
    first.close().unwrap();

    let mut values = Vec::new();
    while let Some(mut reader) = cmd.next_result().unwrap() {
        values.push(first_value(&mut reader));
        reader.close().unwrap();
    }
    assert_eq!(values, vec![Value::Integer(2), Value::Integer(3)]);
    assert!(cmd.next_result().unwrap().is_none());
}

#[test]
fn test_reexecution_restarts_cursor_chain() {
    init_logging();
    let driver = MockDriver::new();
    driver.script(
        "begin pkg.get_sets(P1=>:P1,P2=>:P2); end;",
        cursor_procedure(&[1, 2]),
    );
    let env = env_for(&driver);
    let conn = open_connection(&env, &conn_str(&[]));
    let mut cmd = cursor_command(&conn, &["P1", "P2"]);

    for _ in 0..2 {
        let mut reader = cmd.execute_reader(CommandBehavior::DEFAULT).unwrap();
        assert_eq!(first_value(&mut reader), Value::Integer(1));
        assert!(reader.next_result().unwrap());
        assert_eq!(first_value(&mut reader), Value::Integer(2));
        reader.close().unwrap();
    }
    assert_eq!(driver.stats().live_statements, 0);
}

#[test]
fn test_input_cursor_parameters_are_not_chained() {
    init_logging();
    let driver = MockDriver::new();
    driver.script(
        "begin pkg.get_sets(IN_CUR=>:IN_CUR,OUT_CUR=>:OUT_CUR); end;",
        ScriptedStatement::procedure().with_cursor(
            2,
            ora_engine::mock::ResultSet::new(number_column("N"), int_rows(&[5])),
        ),
    );
    let env = env_for(&driver);
    let conn = open_connection(&env, &conn_str(&[]));
    let mut cmd = OraCommand::with_connection("pkg.get_sets", &conn);
    cmd.set_command_type(CommandType::StoredProcedure).unwrap();
    cmd.parameters_mut()
        .add(OraParameter::new("IN_CUR", NativeType::Cursor))
        .unwrap();
    cmd.parameters_mut()
        .add(OraParameter::new("OUT_CUR", NativeType::Cursor).direction_of(ParameterDirection::Out))
        .unwrap();

    let mut reader = cmd.execute_reader(CommandBehavior::DEFAULT).unwrap();
    assert_eq!(first_value(&mut reader), Value::Integer(5));
    assert!(!reader.next_result().unwrap());
}

#[test]
fn test_delete_returns_affected_rows() {
    init_logging();
    let driver = MockDriver::new();
    driver.script(
        "DELETE FROM t",
        ScriptedStatement::non_query(StatementKind::Delete, 3),
    );
    let env = env_for(&driver);
    let conn = open_connection(&env, &conn_str(&[]));

    let mut cmd = conn.create_command();
    cmd.set_command_text("DELETE FROM t");
    assert_eq!(cmd.execute_non_query().unwrap(), 3);
    assert!(driver.executed()[0].auto_commit);
}

#[test]
fn test_transaction_disables_autocommit() {
    init_logging();
    let driver = MockDriver::new();
    driver.script(
        "UPDATE t SET a = 1",
        ScriptedStatement::non_query(StatementKind::Update, 2),
    );
    let env = env_for(&driver);
    let conn = open_connection(&env, &conn_str(&[]));
    let txn = conn.begin_transaction(IsolationLevel::ReadCommitted).unwrap();

    let mut cmd = OraCommand::with_connection("UPDATE t SET a = 1", &conn);
    let err = cmd.execute_non_query().unwrap_err();
    assert!(matches!(err, OraError::InvalidState(_)));
    assert!(driver.executed().is_empty());

    cmd.set_transaction(Some(txn.clone()));
    assert_eq!(cmd.execute_non_query().unwrap(), 2);
    let executed = driver.executed();
    assert!(!executed[0].auto_commit);
    assert!(executed[0].transaction.is_some());

    txn.commit().unwrap();
    // A finished transaction on the command counts as none.
    assert_eq!(cmd.execute_non_query().unwrap(), 2);
    assert!(driver.executed()[1].auto_commit);
}

#[test]
fn test_transaction_from_other_connection_rejected() {
    init_logging();
    let driver = MockDriver::new();
    driver.script(
        "UPDATE t SET a = 1",
        ScriptedStatement::non_query(StatementKind::Update, 1),
    );
    let env = env_for(&driver);
    let first = open_connection(&env, &conn_str(&[]));
    let second = open_connection(&env, &conn_str(&[]));
    let txn = second.begin_transaction(IsolationLevel::default()).unwrap();

    let mut cmd = OraCommand::with_connection("UPDATE t SET a = 1", &first);
    cmd.set_transaction(Some(txn));
    assert!(matches!(
        cmd.execute_non_query(),
        Err(OraError::InvalidState(_))
    ));
}

#[test]
fn test_close_connection_behavior_closes_once() {
    init_logging();
    let driver = MockDriver::new();
    driver.script(
        "SELECT n FROM t",
        ScriptedStatement::query(number_column("N"), int_rows(&[1, 2, 3])),
    );
    let env = env_for(&driver);
    let conn = open_connection(&env, &conn_str(&[]));
    let closes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&closes);
    conn.on_state_change(move |_, current| {
        if current == ConnectionState::Closed {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    })
    .unwrap();

    let mut cmd = OraCommand::with_connection("SELECT n FROM t", &conn);
    let mut reader = cmd
        .execute_reader(CommandBehavior::CLOSE_CONNECTION)
        .unwrap();
    let mut rows = 0;
    while reader.fetch().unwrap().is_some() {
        rows += 1;
    }
    assert_eq!(rows, 3);

    reader.close().unwrap();
    reader.close().unwrap();
    drop(reader);
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_reader_get_ordinal_and_has_rows() {
    init_logging();
    let driver = MockDriver::new();
    driver.script(
        "SELECT id, name FROM emp",
        ScriptedStatement::query(
            vec![
                ora_engine::ColumnInfo::new("ID", NativeType::Number),
                ora_engine::ColumnInfo::new("NAME", NativeType::VarChar),
            ],
            vec![ora_engine::Row::new(vec![Value::Integer(1), Value::from("KING")])],
        ),
    );
    let env = env_for(&driver);
    let conn = open_connection(&env, &conn_str(&[]));
    let mut cmd = OraCommand::with_connection("SELECT id, name FROM emp", &conn);
    let mut reader = cmd.execute_reader(CommandBehavior::DEFAULT).unwrap();

    assert_eq!(reader.get_ordinal("name").unwrap(), 1);
    assert!(reader.get_ordinal("salary").is_err());
    assert!(reader.has_rows().unwrap());
    let row = reader.fetch().unwrap().unwrap();
    assert_eq!(row.get(1), Some(&Value::from("KING")));
    assert!(!reader.has_rows().unwrap());

    reader.close().unwrap();
    assert!(reader.fetch().is_err());
}

#[test]
fn test_connection_close_invalidates_reader() {
    init_logging();
    let driver = MockDriver::new();
    driver.script(
        "SELECT n FROM t",
        ScriptedStatement::query(number_column("N"), int_rows(&[1, 2])),
    );
    let env = env_for(&driver);
    let conn = open_connection(&env, &conn_str(&[]));
    let mut cmd = OraCommand::with_connection("SELECT n FROM t", &conn);
    let mut reader = cmd.execute_reader(CommandBehavior::DEFAULT).unwrap();

    conn.close().unwrap();
    assert!(reader.fetch().is_err());
    reader.close().unwrap();
    assert_eq!(driver.stats().live_statements, 0);

    conn.open().unwrap();
    assert_eq!(cmd.execute_scalar().unwrap(), Some(Value::Integer(1)));
}

#[test]
fn test_no_statement_leaks_across_mixed_workload() {
    init_logging();
    let driver = MockDriver::new();
    driver.script(
        "SELECT n FROM t",
        ScriptedStatement::query(number_column("N"), int_rows(&[1, 2])),
    );
    driver.script(
        "INSERT INTO t VALUES (:n)",
        ScriptedStatement::non_query(StatementKind::Insert, 1),
    );
    driver.script(
        "begin pkg.get_sets(P1=>:P1,P2=>:P2); end;",
        cursor_procedure(&[1, 2]),
    );
    let env = env_for(&driver);
    let conn = open_connection(&env, &conn_str(&[]));

    for i in 0..10 {
        let mut insert = OraCommand::with_connection("INSERT INTO t VALUES (:n)", &conn);
        insert.parameters_mut().add_with_value("n", i).unwrap();
        insert.execute_non_query().unwrap();

        let mut select = OraCommand::with_connection("SELECT n FROM t", &conn);
        let _ = select.execute_scalar().unwrap();
        let mut reader = select.execute_reader(CommandBehavior::DEFAULT).unwrap();
        reader.fetch().unwrap();
        drop(reader);

        let mut procedure = cursor_command(&conn, &["P1", "P2"]);
        let reader = procedure.execute_reader(CommandBehavior::DEFAULT).unwrap();
        drop(reader);
    }
    assert_eq!(driver.stats().live_statements, 0);
}
