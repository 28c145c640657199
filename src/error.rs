use thiserror::Error;

/// Application error type
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid {field}: {reason}")]
    InvalidArgument { field: &'static str, reason: String },

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Executor has been shut down")]
    ExecutorShutdown,

    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    /// Error code reported back across the engine boundary.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidArgument { .. } => "INVALID_ARGUMENT",
            AppError::Storage(_) => "STORAGE",
            AppError::Io(_) | AppError::Codec(_) => "IO",
            AppError::ExecutorShutdown => "SHUT_DOWN",
            AppError::LockPoisoned | AppError::Internal(_) => "INTERNAL",
            AppError::Engine(_) => "ENGINE",
        }
    }
}

/// Failure modes of the platform usage-tracking service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsageError {
    #[error("usage access has not been granted")]
    PermissionDenied,

    #[error("usage service unavailable: {0}")]
    Unavailable(String),
}

/// Check if a rusqlite error is a busy/locked database (another process holds the write lock)
pub fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(err, _)
        if err.code == rusqlite::ffi::ErrorCode::DatabaseBusy
            || err.code == rusqlite::ffi::ErrorCode::DatabaseLocked)
}
