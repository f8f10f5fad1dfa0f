//! Offline Queue Error Types

use thiserror::Error;

/// SQLite result code for "database or disk is full"
const SQLITE_FULL: &str = "13";

/// Rejected input at enqueue time. Never persisted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid endpoint '{name}'. Valid endpoints: {}", .valid.join(", "))]
    InvalidEndpoint { name: String, valid: Vec<String> },

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Queue item {id} is {status}, expected {expected}")]
    InvalidState {
        id: i64,
        status: String,
        expected: String,
    },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Queue item not found: {0}")]
    NotFound(i64),

    #[error("Corrupt queue row {id}: {message}")]
    Corrupt { id: i64, message: String },

    #[error("Unsupported schema version {found} (this build supports up to {supported})")]
    SchemaVersion { found: i64, supported: i64 },

    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            if db.code().as_deref() == Some(SQLITE_FULL) {
                return StoreError::QuotaExceeded(db.message().to_string());
            }
        }
        StoreError::Database(e)
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Failure reported by a remote call. Always retried by the sync engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteCallError {
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("{0}")]
    Rejected(String),
}

impl RemoteCallError {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Storage quota exceeded: {message}")]
    StorageQuota { message: String },

    #[error("Persistence error: {message}")]
    Persistence { message: String },

    #[error("Queue item not found: {id}")]
    NotFound { id: i64 },
}

impl QueueError {
    pub fn is_quota(&self) -> bool {
        matches!(self, Self::StorageQuota { .. })
    }
}

impl From<StoreError> for QueueError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::QuotaExceeded(message) => Self::StorageQuota { message },
            StoreError::NotFound(id) => Self::NotFound { id },
            other => Self::Persistence {
                message: other.to_string(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_endpoint_lists_valid_names() {
        let err = ValidationError::InvalidEndpoint {
            name: "nonexistent".to_string(),
            valid: vec!["autobanco".to_string(), "autodiversos".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Invalid endpoint 'nonexistent'. Valid endpoints: autobanco, autodiversos"
        );
    }

    #[test]
    fn test_store_error_mapping() {
        let quota: QueueError = StoreError::QuotaExceeded("limit 10".into()).into();
        assert!(quota.is_quota());

        let missing: QueueError = StoreError::NotFound(7).into();
        assert!(matches!(missing, QueueError::NotFound { id: 7 }));

        let other: QueueError = StoreError::Corrupt { id: 1, message: "bad json".into() }.into();
        assert!(matches!(other, QueueError::Persistence { .. }));
    }

    #[test]
    fn test_remote_call_status_code() {
        let err = RemoteCallError::Status { status: 503, body: "down".into() };
        assert_eq!(err.status_code(), Some(503));
        assert_eq!(err.to_string(), "HTTP 503: down");
        assert_eq!(RemoteCallError::Rejected("nope".into()).status_code(), None);
    }
}
