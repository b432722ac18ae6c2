//! Error types for the data-access context.
//!
//! Driver failures keep the driver's message and SQL state. Mapping failures
//! and lifecycle misuse get their own variants so callers can tell a bad
//! conversion apart from a broken connection.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Transaction error: {message} (transaction: {transaction_id})")]
    Transaction {
        message: String,
        transaction_id: String,
    },

    #[error("Cannot map column '{column}': expected {expected}, found {found}")]
    Mapping {
        column: String,
        expected: String,
        found: String,
    },

    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a transaction error.
    pub fn transaction(message: impl Into<String>, transaction_id: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
            transaction_id: transaction_id.into(),
        }
    }

    /// Create a mapping error for a value that cannot be coerced.
    pub fn mapping(
        column: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Self::Mapping {
            column: column.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Create an invalid state error (operation on a finished scope or closed connection).
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    ///
    /// Nothing in this crate retries; the flag is for callers.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    /// Attach a column name to a mapping error raised without one.
    pub(crate) fn with_column(self, name: &str) -> Self {
        match self {
            Self::Mapping {
                column,
                expected,
                found,
            } if column.is_empty() => Self::Mapping {
                column: name.to_string(),
                expected,
                found,
            },
            other => other,
        }
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::mapping(col.to_string(), "existing column", "nothing")
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::internal(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::mapping(index, "decodable value", source.to_string())
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DbError::connection("Failed to connect", "Check credentials");
        assert!(err.to_string().contains("Connection failed"));
    }

    #[test]
    fn test_error_suggestion() {
        let err = DbError::database(
            "Syntax error",
            Some("42601".to_string()),
            "Check SQL syntax",
        );
        assert_eq!(err.suggestion(), Some("Check SQL syntax"));
        assert_eq!(DbError::invalid_state("closed").suggestion(), None);
    }

    #[test]
    fn test_error_retryable() {
        assert!(DbError::connection("err", "sugg").is_retryable());
        assert!(!DbError::invalid_state("completed").is_retryable());
        assert!(!DbError::mapping("id", "i32", "text").is_retryable());
    }

    #[test]
    fn test_mapping_error_message() {
        let err = DbError::mapping("age", "i32", "text 'abc'");
        assert_eq!(
            err.to_string(),
            "Cannot map column 'age': expected i32, found text 'abc'"
        );
    }

    #[test]
    fn test_with_column_fills_only_empty_column() {
        let err = DbError::mapping("", "i64", "bool").with_column("count");
        assert!(matches!(err, DbError::Mapping { ref column, .. } if column == "count"));

        let err = DbError::mapping("id", "i64", "bool").with_column("other");
        assert!(matches!(err, DbError::Mapping { ref column, .. } if column == "id"));

        let err = DbError::internal("boom").with_column("x");
        assert!(matches!(err, DbError::Internal { .. }));
    }

    #[test]
    fn test_column_decode_maps_to_mapping() {
        let err: DbError = sqlx::Error::ColumnNotFound("missing".to_string()).into();
        assert!(matches!(err, DbError::Mapping { ref column, .. } if column == "missing"));
    }
}
