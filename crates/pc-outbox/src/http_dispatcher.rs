//! HTTP Dispatcher for the PROCON API
//!
//! Posts queued payloads to the backend REST endpoints.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pc_config::ApiSettings;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::RemoteCallError;
use crate::registry::RemoteCall;

/// HTTP dispatcher configuration
#[derive(Debug, Clone)]
pub struct HttpDispatcherConfig {
    /// PROCON API base URL
    pub api_base_url: String,
    /// Optional Bearer token for authentication
    pub api_token: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for HttpDispatcherConfig {
    fn default() -> Self {
        Self::from(&ApiSettings::default())
    }
}

impl From<&ApiSettings> for HttpDispatcherConfig {
    fn from(settings: &ApiSettings) -> Self {
        Self {
            api_base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_token: settings.token.clone(),
            connect_timeout: settings.connect_timeout(),
            request_timeout: settings.request_timeout(),
        }
    }
}

/// Shared HTTP client for every endpoint of the registry
pub struct HttpDispatcher {
    config: HttpDispatcherConfig,
    client: reqwest::Client,
}

impl HttpDispatcher {
    pub fn new(config: HttpDispatcherConfig) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { config, client })
    }

    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base_url, path)
    }

    /// POST `payload` as JSON to `path`. Any non-2xx answer is an error.
    pub async fn post(&self, path: &str, payload: &Value) -> Result<(), RemoteCallError> {
        let url = self.url_for(path);
        debug!("Posting queued payload to {}", url);

        let mut request = self.client.post(&url).json(payload);

        if let Some(ref token) = self.config.api_token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request
            .send()
            .await
            .map_err(|e| RemoteCallError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        warn!("Request to {} failed with status {}: {}", url, status, body);
        Err(RemoteCallError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

/// Remote call bound to one REST path
pub struct HttpRemoteCall {
    dispatcher: Arc<HttpDispatcher>,
    path: String,
}

impl HttpRemoteCall {
    pub fn new(dispatcher: Arc<HttpDispatcher>, path: impl Into<String>) -> Self {
        Self {
            dispatcher,
            path: path.into(),
        }
    }
}

#[async_trait]
impl RemoteCall for HttpRemoteCall {
    async fn call(&self, payload: &Value) -> Result<(), RemoteCallError> {
        self.dispatcher.post(&self.path, payload).await
    }
}
