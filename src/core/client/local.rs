// src/core/client/local.rs

use super::Connector;
use crate::core::errors::CoredgeError;
use crate::core::handler::RequestHandler;
use crate::core::protocol::{Request, Response};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

/// Routes calls to in-process handlers keyed by client address.
#[derive(Debug, Default)]
pub struct LocalConnector {
    handlers: DashMap<String, RequestHandler>,
}

impl LocalConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, address: impl Into<String>, handler: RequestHandler) {
        self.handlers.insert(address.into(), handler);
    }

    /// Makes `address` unreachable, as if its process went away.
    pub fn shutdown(&self, address: &str) -> bool {
        let removed = self.handlers.remove(address).is_some();
        if removed {
            info!("Local member at {} is no longer reachable.", address);
        }
        removed
    }

    pub fn is_registered(&self, address: &str) -> bool {
        self.handlers.contains_key(address)
    }
}

#[async_trait]
impl Connector for LocalConnector {
    async fn call(&self, address: &str, request: Request) -> Result<Response, CoredgeError> {
        // Clone out of the map so no shard lock is held across the await.
        let handler = self
            .handlers
            .get(address)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CoredgeError::Unreachable {
                address: address.to_string(),
            })?;
        Ok(handler.handle(request).await)
    }
}
