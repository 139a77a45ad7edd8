//! Logging and configuration shared by the integration suites.

use ora_engine::PoolOptions;
use std::time::Duration;

/// Routes engine logs to the test output. Safe to call from every test.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Connection string for the mock server `db1` with extra `KEY=VALUE`
/// segments appended.
pub fn conn_str(extra: &[&str]) -> String {
    let mut parts = vec!["SERVER=db1", "UID=u", "PWD=p"];
    parts.extend_from_slice(extra);
    parts.join(";")
}

/// Short acquire timeout so exhaustion tests fail fast. Overridable with
/// `ORA_TEST_ACQUIRE_TIMEOUT_MS`.
pub fn test_pool_options() -> PoolOptions {
    let millis = std::env::var("ORA_TEST_ACQUIRE_TIMEOUT_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(200);
    PoolOptions::new().with_acquire_timeout(Duration::from_millis(millis))
}
