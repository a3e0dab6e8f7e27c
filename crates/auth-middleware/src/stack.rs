//! Ordered middleware stack attached to a client

use std::fmt;
use std::sync::Arc;

use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use tracing::debug;

use crate::{ChallengeOutcome, Middleware, Result};

/// Composable chain of authentication middleware.
///
/// Layers run in insertion order. Cloning a stack shares the layers (and any
/// state they hold, such as cached tokens or digest nonces).
#[derive(Clone, Default)]
pub struct HandlerStack {
    layers: Vec<Arc<dyn Middleware>>,
}

impl HandlerStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a layer.
    pub fn push<M: Middleware + 'static>(&mut self, middleware: M) {
        self.layers.push(Arc::new(middleware));
    }

    /// Append an already shared layer.
    pub fn push_shared(&mut self, middleware: Arc<dyn Middleware>) {
        self.layers.push(middleware);
    }

    /// Builder-style `push`.
    pub fn with<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.push(middleware);
        self
    }

    /// Append every layer of `other` after this stack's layers.
    pub fn extend(&mut self, other: &HandlerStack) {
        self.layers.extend(other.layers.iter().cloned());
    }

    pub fn layers(&self) -> &[Arc<dyn Middleware>] {
        &self.layers
    }

    /// Layer identifiers in execution order.
    pub fn ids(&self) -> Vec<&str> {
        self.layers.iter().map(|layer| layer.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Non-secret description of every layer, in order.
    pub fn describe(&self) -> serde_json::Value {
        serde_json::Value::Array(self.layers.iter().map(|layer| layer.describe()).collect())
    }

    /// Run every layer's `prepare_request` in order.
    pub async fn prepare(&self, request: &mut reqwest::Request) -> Result<()> {
        for layer in &self.layers {
            layer.prepare_request(request).await?;
        }
        Ok(())
    }

    /// Offer a `401` to every layer. Returns true if any layer asked for a retry.
    ///
    /// All layers see the challenge even after one has asked for a retry, so
    /// each can update its own state.
    pub async fn challenge(&self, status: StatusCode, headers: &HeaderMap) -> Result<bool> {
        let mut retry = false;
        for layer in &self.layers {
            if layer.handle_challenge(status, headers).await? == ChallengeOutcome::Retry {
                debug!(layer = layer.id(), "middleware requested retry after challenge");
                retry = true;
            }
        }
        Ok(retry)
    }
}

impl fmt::Debug for HandlerStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerStack")
            .field("layers", &self.ids())
            .finish()
    }
}
