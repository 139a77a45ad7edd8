pub mod row;
pub mod types;
pub mod value;

pub use row::Row;
pub use types::{ColumnInfo, NativeType, ParameterDirection, StatementKind};
pub use value::Value;
