use thiserror::Error;

/// Custom error type for ingestion and query compilation.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("Unknown stream: {0}")]
    UnknownStream(String),

    #[error("Truncated input: needed {needed} bytes, {available} remaining")]
    TruncatedInput { needed: usize, available: usize },

    #[error("Append to stream {stream} failed: {reason}")]
    AppendFailure { stream: String, reason: String },

    /// Unrecoverable failure reading a stream's log. Halts the reading table.
    #[error("Unable to read from log {stream}: {reason}")]
    LogReadFailure { stream: String, reason: String },

    /// The log was closed while a reader was waiting on it.
    #[error("Log closed: {0}")]
    LogClosed(String),

    #[error("Unknown table {table}: {reason}")]
    UnknownTable { table: String, reason: String },

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("Conflicting GROUP BY: {0}")]
    ConflictingGroupBy(String),

    #[error("Aggregate {expr} not allowed in {clause}")]
    AggregateInPredicate { clause: String, expr: String },

    #[error("Syntax error at line {line}, column {column}: {message}")]
    SyntaxError {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization Error: {0}")]
    Serialization(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("Configuration Error: {0}")]
    ConfigError(String),

    #[error("Corruption detected: {details}")]
    Corruption {
        details: String,
        stream: Option<String>,
        offset: Option<u64>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

// Implement conversion from lock poison errors for convenience
impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        DbError::LockError(format!("Mutex/RwLock poisoned: {}", err))
    }
}

impl From<config::ConfigError> for DbError {
    fn from(err: config::ConfigError) -> Self {
        DbError::ConfigError(err.to_string())
    }
}
