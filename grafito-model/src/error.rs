use thiserror::Error;

/// The crate-wide error type, covering every error kind named by the error
/// handling design: parse/semantic query errors, missing entities,
/// constraint violations, transaction misuse, storage I/O, index problems,
/// bad configuration, runtime evaluation errors, and malformed import data.
#[derive(Debug, Error)]
pub enum Error {
    #[error("parse error at line {line}, column {column}: {message}")]
    ParseError { line: usize, column: usize, message: String },

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: i64 },

    #[error("constraint violation: {message}")]
    ConstraintViolation { message: String },

    #[error("transaction error: {message}")]
    TransactionError { message: String },

    #[error("storage error: {0}")]
    StorageError(#[from] rusqlite::Error),

    #[error("index error: {message}")]
    IndexError { message: String },

    #[error("configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("query execution error: {message}")]
    QueryExecutionError { message: String },

    #[error("import error: {message}")]
    ImportError { message: String },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn not_found(kind: &'static str, id: i64) -> Self {
        Error::NotFound { kind, id }
    }

    pub fn constraint(message: impl Into<String>) -> Self {
        Error::ConstraintViolation { message: message.into() }
    }

    pub fn transaction(message: impl Into<String>) -> Self {
        Error::TransactionError { message: message.into() }
    }

    pub fn index(message: impl Into<String>) -> Self {
        Error::IndexError { message: message.into() }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Error::ConfigurationError { message: message.into() }
    }

    pub fn query_execution(message: impl Into<String>) -> Self {
        Error::QueryExecutionError { message: message.into() }
    }

    pub fn import(message: impl Into<String>) -> Self {
        Error::ImportError { message: message.into() }
    }

    pub fn parse(line: usize, column: usize, message: impl Into<String>) -> Self {
        Error::ParseError { line, column, message: message.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, Error::ConstraintViolation { .. })
    }
}
