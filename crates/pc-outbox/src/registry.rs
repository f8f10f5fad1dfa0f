//! Endpoint Registry
//!
//! Closed mapping from logical endpoint names to the remote calls that deliver
//! their payloads. Built once at startup; there is no runtime mutation API.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use pc_config::ApiSettings;
use serde_json::Value;

use crate::error::{RemoteCallError, ValidationError};
use crate::http_dispatcher::{HttpDispatcher, HttpDispatcherConfig, HttpRemoteCall};

/// Delivers one queued payload to the backend.
#[async_trait]
pub trait RemoteCall: Send + Sync {
    async fn call(&self, payload: &Value) -> Result<(), RemoteCallError>;
}

/// A PROCON enforcement-record endpoint and the REST path it posts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointDefinition {
    pub name: &'static str,
    pub path: &'static str,
}

pub const PROCON_ENDPOINTS: &[EndpointDefinition] = &[
    EndpointDefinition { name: "autobanco", path: "/api/fiscalizacao/autos-banco/" },
    EndpointDefinition { name: "autosupermercado", path: "/api/fiscalizacao/autos-supermercado/" },
    EndpointDefinition { name: "autodiversos", path: "/api/fiscalizacao/autos-diversos/" },
    EndpointDefinition { name: "autopostocombustivel", path: "/api/fiscalizacao/autos-posto-combustivel/" },
    EndpointDefinition { name: "autoinfracao", path: "/api/fiscalizacao/autos-infracao/" },
    EndpointDefinition { name: "autoapreensao", path: "/api/fiscalizacao/autos-apreensao/" },
    EndpointDefinition { name: "autoinutilizacao", path: "/api/fiscalizacao/autos-inutilizacao/" },
    EndpointDefinition { name: "autoconstatacao", path: "/api/fiscalizacao/autos-constatacao/" },
    EndpointDefinition { name: "autosanitario", path: "/api/fiscalizacao/autos-sanitario/" },
];

#[derive(Clone, Default)]
pub struct EndpointRegistry {
    calls: BTreeMap<String, Arc<dyn RemoteCall>>,
}

impl EndpointRegistry {
    pub fn builder() -> EndpointRegistryBuilder {
        EndpointRegistryBuilder::default()
    }

    /// Registry posting every PROCON endpoint to the configured API over HTTP.
    pub fn procon_http(settings: &ApiSettings) -> reqwest::Result<Self> {
        let dispatcher = Arc::new(HttpDispatcher::new(HttpDispatcherConfig::from(settings))?);
        let registry = PROCON_ENDPOINTS
            .iter()
            .fold(Self::builder(), |builder, def| {
                builder.register(def.name, HttpRemoteCall::new(dispatcher.clone(), def.path))
            })
            .build();
        Ok(registry)
    }

    /// Fails when `name` is empty or not registered. The error lists the valid names.
    pub fn validate_endpoint(&self, name: &str) -> Result<(), ValidationError> {
        if !name.trim().is_empty() && self.calls.contains_key(name) {
            return Ok(());
        }
        Err(ValidationError::InvalidEndpoint {
            name: name.to_string(),
            valid: self.names(),
        })
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn RemoteCall>> {
        self.calls.get(name).cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.calls.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

impl fmt::Debug for EndpointRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointRegistry")
            .field("endpoints", &self.names())
            .finish()
    }
}

#[derive(Default)]
pub struct EndpointRegistryBuilder {
    calls: BTreeMap<String, Arc<dyn RemoteCall>>,
}

impl EndpointRegistryBuilder {
    /// Register a remote call. A later registration for the same name replaces the earlier one.
    pub fn register(mut self, name: impl Into<String>, call: impl RemoteCall + 'static) -> Self {
        self.calls.insert(name.into(), Arc::new(call));
        self
    }

    pub fn build(self) -> EndpointRegistry {
        EndpointRegistry { calls: self.calls }
    }
}
