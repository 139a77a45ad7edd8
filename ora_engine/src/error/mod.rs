use thiserror::Error;

/// Broad class of an [`OraError`], for callers deciding how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Unsupported or malformed connection configuration
    Configuration,
    /// Invalid call sequence on a connection, command, reader or collection
    State,
    /// Failure reported by the native layer (or pool exhaustion)
    Provider,
    /// Operation the engine does not implement
    NotSupported,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OraError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection parameter not supported: '{0}'")]
    UnsupportedKey(String),

    #[error("Invalid operation: {0}")]
    InvalidState(String),

    #[error("Parameter ownership error: {0}")]
    ParameterOwnership(String),

    #[error("Index out of range: {0}")]
    IndexOutOfRange(String),

    #[error("ORA-{code:05}: {message}")]
    Provider { code: i32, message: String },

    #[error("Timed out waiting for a pooled session: {0}")]
    PoolTimeout(String),

    #[error("Connection pool has been disposed")]
    PoolDisposed,

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<r2d2::Error> for OraError {
    fn from(err: r2d2::Error) -> Self {
        OraError::PoolTimeout(err.to_string())
    }
}

impl OraError {
    pub fn provider(code: i32, message: impl Into<String>) -> Self {
        OraError::Provider {
            code,
            message: message.into(),
        }
    }

    pub fn state(message: impl Into<String>) -> Self {
        OraError::InvalidState(message.into())
    }

    /// Provider error code, 0 for errors raised locally.
    pub fn code(&self) -> i32 {
        match self {
            OraError::Provider { code, .. } => *code,
            _ => 0,
        }
    }

    pub fn message(&self) -> String {
        match self {
            OraError::Provider { message, .. } => message.clone(),
            _ => self.to_string(),
        }
    }

    /// Returns true if the same call may succeed later without any change by the caller.
    /// The engine never retries on its own.
    pub fn is_transient(&self) -> bool {
        matches!(self, OraError::PoolTimeout(_))
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            OraError::Configuration(_) | OraError::UnsupportedKey(_) => {
                ErrorCategory::Configuration
            }
            OraError::InvalidState(_)
            | OraError::ParameterOwnership(_)
            | OraError::IndexOutOfRange(_)
            | OraError::PoolDisposed
            | OraError::InternalError(_) => ErrorCategory::State,
            OraError::Provider { .. } | OraError::PoolTimeout(_) => ErrorCategory::Provider,
            OraError::NotSupported(_) => ErrorCategory::NotSupported,
        }
    }
}

pub type Result<T> = std::result::Result<T, OraError>;
