use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ora_engine::mock::{MockDriver, ScriptedStatement};
use ora_engine::{ColumnInfo, NativeType, OraCommand, OraEnvironment, Row, Value};

const CONN_STR: &str = "SERVER=bench;UID=u;PWD=p;MIN POOL SIZE=1;MAX POOL SIZE=4";

fn benchmark_open_close_pooled(c: &mut Criterion) {
    let driver = MockDriver::new();
    let env = OraEnvironment::new(driver.shared());
    let conn = env.create_connection(CONN_STR).unwrap();
    c.bench_function("open_close_pooled", |b| {
        b.iter(|| {
            conn.open().unwrap();
            conn.close().unwrap();
        });
    });
}

fn benchmark_open_close_private(c: &mut Criterion) {
    let driver = MockDriver::new();
    let env = OraEnvironment::new(driver.shared());
    let conn = env
        .create_connection("SERVER=bench;UID=u;PWD=p;POOLING=false")
        .unwrap();
    c.bench_function("open_close_private", |b| {
        b.iter(|| {
            conn.open().unwrap();
            conn.close().unwrap();
        });
    });
}

fn benchmark_execute_scalar(c: &mut Criterion) {
    let driver = MockDriver::new();
    driver.script(
        "SELECT n FROM dual",
        ScriptedStatement::query(
            vec![ColumnInfo::new("N", NativeType::Number)],
            vec![Row::new(vec![Value::Integer(1)])],
        ),
    );
    let env = OraEnvironment::new(driver.shared());
    let conn = env.create_connection(CONN_STR).unwrap();
    conn.open().unwrap();

    let mut adhoc = OraCommand::with_connection("SELECT n FROM dual", &conn);
    c.bench_function("execute_scalar_unprepared", |b| {
        b.iter(|| black_box(adhoc.execute_scalar().unwrap()));
    });

    let mut prepared = OraCommand::with_connection("SELECT n FROM dual", &conn);
    prepared.prepare().unwrap();
    c.bench_function("execute_scalar_prepared", |b| {
        b.iter(|| black_box(prepared.execute_scalar().unwrap()));
    });
}

fn benchmark_parse_connection_string(c: &mut Criterion) {
    c.bench_function("parse_connection_string", |b| {
        b.iter(|| black_box(ora_engine::ConnectionInfo::parse(black_box(CONN_STR)).unwrap()));
    });
}

criterion_group!(
    benches,
    benchmark_open_close_pooled,
    benchmark_open_close_private,
    benchmark_execute_scalar,
    benchmark_parse_connection_string
);
criterion_main!(benches);
