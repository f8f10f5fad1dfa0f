//! Enqueue API

use pc_common::NewQueueItem;
use serde_json::{Map, Value};
use tracing::{error, info};

use crate::error::{QueueError, Result, ValidationError};
use crate::notifier::Notice;
use crate::OfflineQueue;

#[derive(Debug, Clone, PartialEq)]
pub struct EnqueueOptions {
    /// Stored with the item; does not reorder delivery.
    pub priority: i32,
    pub metadata: Option<Map<String, Value>>,
    /// Emit a "queued offline" notice on success.
    pub show_notification: bool,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            metadata: None,
            show_notification: true,
        }
    }
}

impl EnqueueOptions {
    pub fn silent() -> Self {
        Self {
            show_notification: false,
            ..Default::default()
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Payloads must be non-empty JSON objects. Required domain fields are the caller's business.
pub fn validate_payload(payload: &Value) -> std::result::Result<(), ValidationError> {
    match payload {
        Value::Object(map) if !map.is_empty() => Ok(()),
        Value::Object(_) => Err(ValidationError::InvalidPayload(
            "payload must not be empty".to_string(),
        )),
        Value::Null => Err(ValidationError::InvalidPayload(
            "payload is required".to_string(),
        )),
        other => Err(ValidationError::InvalidPayload(format!(
            "payload must be a JSON object, got {}",
            json_kind(other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl OfflineQueue {
    /// Validate and store a write for later delivery. Returns the new item id.
    ///
    /// Invalid input fails before the store is touched. The stored payload is
    /// an owned copy, so later changes to `payload` do not reach the queue.
    /// When the backend is reachable a debounced background sync is requested.
    pub async fn add_to_offline_queue(
        &self,
        endpoint: &str,
        payload: &Value,
        options: EnqueueOptions,
    ) -> Result<i64> {
        self.registry.validate_endpoint(endpoint)?;
        validate_payload(payload)?;

        let item = NewQueueItem {
            endpoint: endpoint.to_string(),
            payload: payload.clone(),
            priority: options.priority,
            metadata: options.metadata,
        };

        let id = match self.repository.insert(item).await {
            Ok(id) => id,
            Err(e) => {
                let err = QueueError::from(e);
                error!(endpoint = %endpoint, "Failed to queue offline write: {}", err);
                let notice = if err.is_quota() {
                    Notice::StorageQuotaExceeded {
                        endpoint: endpoint.to_string(),
                    }
                } else {
                    Notice::PersistenceFailed {
                        endpoint: endpoint.to_string(),
                        message: err.to_string(),
                    }
                };
                self.notifier.notify(notice);
                return Err(err);
            }
        };

        info!(item_id = id, endpoint = %endpoint, "Queued offline write");

        if options.show_notification {
            self.notifier.notify(Notice::QueuedOffline {
                item_id: id,
                endpoint: endpoint.to_string(),
            });
        }

        if self.connectivity.is_online() {
            self.scheduler.request();
        }

        Ok(id)
    }
}
