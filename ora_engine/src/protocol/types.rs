/// Native data type tag carried by parameters and result columns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NativeType {
    VarChar,
    NVarChar,
    Char,
    Number,
    Int32,
    Int64,
    Double,
    DateTime,
    Timestamp,
    Raw,
    Blob,
    Clob,
    NClob,
    RowId,
    Cursor,
}

impl NativeType {
    pub fn is_lob(self) -> bool {
        matches!(self, Self::Blob | Self::Clob | Self::NClob)
    }

    pub fn is_cursor(self) -> bool {
        self == Self::Cursor
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ParameterDirection {
    In,
    Out,
    InOut,
}

impl ParameterDirection {
    /// True when the native layer writes a value back after execution.
    pub fn is_output(self) -> bool {
        matches!(self, Self::Out | Self::InOut)
    }
}

/// Statement kind as reported by the native statement-type attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Update,
    Delete,
    Insert,
    Create,
    Drop,
    Alter,
    Begin,
    Declare,
    Other(i64),
}

impl StatementKind {
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => Self::Select,
            2 => Self::Update,
            3 => Self::Delete,
            4 => Self::Insert,
            5 => Self::Create,
            6 => Self::Drop,
            7 => Self::Alter,
            8 => Self::Begin,
            9 => Self::Declare,
            other => Self::Other(other),
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Self::Select => 1,
            Self::Update => 2,
            Self::Delete => 3,
            Self::Insert => 4,
            Self::Create => 5,
            Self::Drop => 6,
            Self::Alter => 7,
            Self::Begin => 8,
            Self::Declare => 9,
            Self::Other(code) => code,
        }
    }

    /// Only SELECT statements produce a result set of their own.
    pub fn is_query(self) -> bool {
        self == Self::Select
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub native_type: NativeType,
    pub size: usize,
    pub nullable: bool,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, native_type: NativeType) -> Self {
        Self {
            name: name.into(),
            native_type,
            size: 0,
            nullable: true,
        }
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}
