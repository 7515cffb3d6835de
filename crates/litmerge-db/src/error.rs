//! Database error types.

use litmerge_common::LitmergeError;
use thiserror::Error;
use tokio_postgres::error::SqlState;

pub type Result<T> = std::result::Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    /// The store cannot be reached or the connection was lost.
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Duplicate entry: {0}")]
    Duplicate(String),
}

impl From<tokio_postgres::Error> for DbError {
    fn from(err: tokio_postgres::Error) -> Self {
        classify(err.code(), err.as_db_error().is_some(), err.to_string())
    }
}

/// Anything the server did not answer with an SQL error (socket reset,
/// closed connection, I/O failure) means the store is unreachable.
fn classify(code: Option<&SqlState>, server_side: bool, message: String) -> DbError {
    match code {
        Some(code) if *code == SqlState::UNIQUE_VIOLATION => DbError::Duplicate(message),
        _ if !server_side => DbError::Connection(message),
        // 08xxx connection exceptions, 57P0x shutdowns
        Some(code) if code.code().starts_with("08") || code.code().starts_with("57P") => {
            DbError::Connection(message)
        }
        _ => DbError::Query(message),
    }
}

impl From<DbError> for LitmergeError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Connection(msg) => LitmergeError::upstream("database", msg),
            DbError::Duplicate(msg) => LitmergeError::Conflict(msg),
            DbError::NotFound(msg) => LitmergeError::NoResults(msg),
            DbError::Serialization(e) => LitmergeError::Serialization(e),
            DbError::Query(msg) => LitmergeError::Other(anyhow::anyhow!("database query failed: {msg}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_loss_is_run_fatal() {
        let err: LitmergeError = DbError::Connection("reset by peer".into()).into();
        assert!(err.is_run_fatal());
    }

    #[test]
    fn test_duplicate_maps_to_conflict() {
        let err: LitmergeError = DbError::Duplicate("doi".into()).into();
        assert!(matches!(err, LitmergeError::Conflict(_)));
        assert!(!err.is_run_fatal());
    }

    #[test]
    fn test_transport_failures_are_connection_errors() {
        let reset = classify(None, false, "error communicating with the server: connection reset".into());
        assert!(matches!(reset, DbError::Connection(_)));
        assert!(LitmergeError::from(reset).is_run_fatal());

        let shutdown = classify(Some(&SqlState::ADMIN_SHUTDOWN), true, "terminating connection".into());
        assert!(matches!(shutdown, DbError::Connection(_)));
    }

    #[test]
    fn test_server_sql_errors_stay_per_item() {
        let dup = classify(Some(&SqlState::UNIQUE_VIOLATION), true, "duplicate key".into());
        assert!(matches!(dup, DbError::Duplicate(_)));

        let bad = classify(Some(&SqlState::UNDEFINED_COLUMN), true, "column does not exist".into());
        assert!(matches!(bad, DbError::Query(_)));
        assert!(!LitmergeError::from(bad).is_run_fatal());
    }
}
