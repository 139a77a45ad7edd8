pub mod env;
pub mod fixtures;

#[allow(unused_imports)]
pub use env::{conn_str, init_logging, test_pool_options};
#[allow(unused_imports)]
pub use fixtures::{cursor_procedure, env_for, int_rows, number_column, open_connection};
