//! Scripted server content for the integration suites.

use ora_engine::mock::{MockDriver, ResultSet, ScriptedStatement};
use ora_engine::{ColumnInfo, NativeType, OraConnection, OraEnvironment, Row, Value};

pub fn number_column(name: &str) -> Vec<ColumnInfo> {
    vec![ColumnInfo::new(name, NativeType::Number)]
}

pub fn int_rows(values: &[i32]) -> Vec<Row> {
    values
        .iter()
        .map(|v| Row::new(vec![Value::Integer(*v)]))
        .collect()
}

/// Stored procedure `sql` opening one single-row cursor per entry of
/// `firsts`, at positions 1..=n.
pub fn cursor_procedure(firsts: &[i32]) -> ScriptedStatement {
    firsts
        .iter()
        .enumerate()
        .fold(ScriptedStatement::procedure(), |script, (i, v)| {
            script.with_cursor(i + 1, ResultSet::new(number_column("N"), int_rows(&[*v])))
        })
}

pub fn open_connection(env: &OraEnvironment, conn_str: &str) -> OraConnection {
    let conn = env
        .create_connection(conn_str)
        .expect("connection string should parse");
    conn.open().expect("open should succeed");
    conn
}

pub fn env_for(driver: &MockDriver) -> OraEnvironment {
    OraEnvironment::new(driver.shared())
}
