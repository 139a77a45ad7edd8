use crate::native::{LobLocator, StatementHandle};

/// A single parameter or column value.
///
/// `Lob` and `Cursor` are native references: a LOB locator still to be read,
/// or a statement handle positioned on an output cursor.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Integer(i32),
    BigInt(i64),
    Double(f64),
    Decimal(String),
    String(String),
    Binary(Vec<u8>),
    Lob(LobLocator),
    Cursor(StatementHandle),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Decimal(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(i64::from(*n)),
            Value::BigInt(n) => Some(*n),
            Value::Decimal(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_cursor(&self) -> Option<StatementHandle> {
        match self {
            Value::Cursor(h) => Some(*h),
            _ => None,
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Binary(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}
