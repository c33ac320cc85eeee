//! Error types for transactional sink operations.

use thiserror::Error;

/// Error codes for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// E101: Store unreachable or pool creation failed
    E101ConnectFailed,
    /// E102: Transaction could not be started
    E102BeginFailed,
    /// E103: Statement execution failed inside a transaction
    E103ExecuteFailed,
    /// E104: Commit failed; the transaction is gone
    E104CommitFailed,
    /// E105: Rollback failed
    E105RollbackFailed,
    /// E106: Schema bootstrap failed
    E106SchemaFailed,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::E101ConnectFailed => "E101",
            Self::E102BeginFailed => "E102",
            Self::E103ExecuteFailed => "E103",
            Self::E104CommitFailed => "E104",
            Self::E105RollbackFailed => "E105",
            Self::E106SchemaFailed => "E106",
        }
    }
}

/// Errors that can occur while talking to the store
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("[{code}] Failed to connect to store: {message}")]
    Connect { code: &'static str, message: String },

    #[error("[{code}] Failed to begin transaction: {message}")]
    Begin { code: &'static str, message: String },

    #[error("[{code}] Statement execution failed: {message}")]
    Execute { code: &'static str, message: String },

    #[error("[{code}] Commit failed: {message}")]
    Commit { code: &'static str, message: String },

    #[error("[{code}] Rollback failed: {message}")]
    Rollback { code: &'static str, message: String },

    #[error("[{code}] Schema bootstrap failed on `{statement}`: {message}")]
    Schema {
        code: &'static str,
        statement: String,
        message: String,
    },
}

impl SinkError {
    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect {
            code: ErrorCode::E101ConnectFailed.as_str(),
            message: message.into(),
        }
    }

    pub fn begin(message: impl Into<String>) -> Self {
        Self::Begin {
            code: ErrorCode::E102BeginFailed.as_str(),
            message: message.into(),
        }
    }

    pub fn execute(message: impl Into<String>) -> Self {
        Self::Execute {
            code: ErrorCode::E103ExecuteFailed.as_str(),
            message: message.into(),
        }
    }

    pub fn commit(message: impl Into<String>) -> Self {
        Self::Commit {
            code: ErrorCode::E104CommitFailed.as_str(),
            message: message.into(),
        }
    }

    pub fn rollback(message: impl Into<String>) -> Self {
        Self::Rollback {
            code: ErrorCode::E105RollbackFailed.as_str(),
            message: message.into(),
        }
    }

    pub fn schema(statement: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Schema {
            code: ErrorCode::E106SchemaFailed.as_str(),
            statement: statement.into(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Connect { .. } => ErrorCode::E101ConnectFailed,
            Self::Begin { .. } => ErrorCode::E102BeginFailed,
            Self::Execute { .. } => ErrorCode::E103ExecuteFailed,
            Self::Commit { .. } => ErrorCode::E104CommitFailed,
            Self::Rollback { .. } => ErrorCode::E105RollbackFailed,
            Self::Schema { .. } => ErrorCode::E106SchemaFailed,
        }
    }
}

/// Result type alias for SinkError
pub type Result<T> = std::result::Result<T, SinkError>;
