use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Queue Item Types
// ============================================================================

/// Lifecycle state of a queued write.
///
/// `Pending` and `Failed` items are eligible for delivery while their retry
/// budget lasts; `Completed` is terminal and only removed by retention cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Processing,
    Failed,
    Completed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Failed => "failed",
            QueueStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = ProconError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(QueueStatus::Pending),
            "processing" => Ok(QueueStatus::Processing),
            "failed" => Ok(QueueStatus::Failed),
            "completed" => Ok(QueueStatus::Completed),
            other => Err(ProconError::InvalidStatus(other.to_string())),
        }
    }
}

/// A write operation persisted in the offline queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: i64,
    pub endpoint: String,
    pub payload: serde_json::Value,
    pub status: QueueStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub priority: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Insert request for a new queue item. The store assigns id, status and timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct NewQueueItem {
    pub endpoint: String,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Listing filter for inspection UIs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueFilter {
    pub status: Option<QueueStatus>,
    pub endpoint: Option<String>,
}

// ============================================================================
// Stats & Sync Result Types
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub failed: u64,
    pub completed: u64,
    pub total: u64,
    /// Failed items whose retry budget is spent
    pub exhausted: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_pending_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncErrorEntry {
    pub item_id: i64,
    pub endpoint: String,
    pub error: String,
}

/// Aggregate outcome of one sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub success: u32,
    pub failed: u32,
    pub skipped: u32,
    pub errors: Vec<SyncErrorEntry>,
}

impl SyncResult {
    pub fn processed(&self) -> u32 {
        self.success + self.failed + self.skipped
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.skipped > 0
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ProconError {
    #[error("Invalid queue status: {0}")]
    InvalidStatus(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ProconError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(status: QueueStatus, retry_count: u32) -> QueueItem {
        let now = Utc::now();
        QueueItem {
            id: 1,
            endpoint: "autobanco".to_string(),
            payload: json!({"placa": "ABC1234"}),
            status,
            created_at: now,
            updated_at: now,
            retry_count,
            last_error: None,
            priority: 0,
            metadata: None,
        }
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("pending".parse::<QueueStatus>().unwrap(), QueueStatus::Pending);
        assert_eq!(" Completed ".parse::<QueueStatus>().unwrap(), QueueStatus::Completed);
        assert!("done".parse::<QueueStatus>().is_err());
        for status in [
            QueueStatus::Pending,
            QueueStatus::Processing,
            QueueStatus::Failed,
            QueueStatus::Completed,
        ] {
            assert_eq!(status.as_str().parse::<QueueStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_item_serializes_camel_case() {
        let value = serde_json::to_value(item(QueueStatus::Failed, 1)).unwrap();
        assert_eq!(value["status"], "failed");
        assert_eq!(value["retryCount"], 1);
        assert!(value.get("createdAt").is_some());
        assert!(value.get("metadata").is_none());
    }

    #[test]
    fn test_sync_result_failures() {
        let mut result = SyncResult { success: 2, ..Default::default() };
        assert_eq!(result.processed(), 2);
        assert!(!result.has_failures());

        result.skipped = 1;
        assert_eq!(result.processed(), 3);
        assert!(result.has_failures());
    }
}
