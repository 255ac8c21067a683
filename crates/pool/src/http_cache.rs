//! Shared HTTP client cache.
//!
//! Provider factories obtain their transport client here instead of building
//! one per kernel. Entries are keyed by [`ClientCacheKey`] and owned by the
//! cache, not by the registry: adapters remove them explicitly when they
//! remove the matching registration.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use kernel_pool_common::ClientCacheKey;

use crate::errors::{ClientCacheError, SlotError};
use crate::slot::CachedResourceSlot;

/// Default user agent sent by cached clients
pub const DEFAULT_USER_AGENT: &str = concat!("kernel-pool/", env!("CARGO_PKG_VERSION"));

/// Settings for building a transport client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpClientOptions {
    /// Whole-request timeout
    #[serde(default)]
    pub timeout: Option<Duration>,

    #[serde(default)]
    pub connect_timeout: Option<Duration>,

    /// How long idle pooled connections are kept
    #[serde(default = "default_pool_idle_timeout")]
    pub pool_idle_timeout: Option<Duration>,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_pool_idle_timeout() -> Option<Duration> {
    Some(Duration::from_secs(90))
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

impl Default for HttpClientOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            connect_timeout: None,
            pool_idle_timeout: default_pool_idle_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl HttpClientOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Build a client from these options.
    pub fn build_client(&self) -> Result<reqwest::Client, reqwest::Error> {
        let mut builder = reqwest::Client::builder()
            .user_agent(self.user_agent.as_str())
            .pool_idle_timeout(self.pool_idle_timeout);
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(timeout) = self.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        builder.build()
    }
}

/// Keyed cache of transport clients.
#[async_trait]
pub trait HttpClientCache: Send + Sync {
    /// Return the client cached under `key`, building it with `options` on
    /// first use. `options` is not called when a client is already cached.
    async fn get(
        &self,
        key: &ClientCacheKey,
        options: &(dyn Fn() -> HttpClientOptions + Send + Sync),
        cancel: &CancellationToken,
    ) -> Result<reqwest::Client, ClientCacheError>;

    /// Discard the client cached under `key`. Unknown keys are ignored.
    async fn remove(
        &self,
        key: &ClientCacheKey,
        cancel: &CancellationToken,
    ) -> Result<(), ClientCacheError>;
}

/// In-process [`HttpClientCache`].
#[derive(Debug, Default)]
pub struct MemoryHttpClientCache {
    slots: DashMap<ClientCacheKey, Arc<CachedResourceSlot<reqwest::Client>>>,
}

impl MemoryHttpClientCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &ClientCacheKey) -> bool {
        self.slots.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot(&self, key: &ClientCacheKey) -> Arc<CachedResourceSlot<reqwest::Client>> {
        self.slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(CachedResourceSlot::new(key.to_string())))
            .clone()
    }
}

#[async_trait]
impl HttpClientCache for MemoryHttpClientCache {
    async fn get(
        &self,
        key: &ClientCacheKey,
        options: &(dyn Fn() -> HttpClientOptions + Send + Sync),
        cancel: &CancellationToken,
    ) -> Result<reqwest::Client, ClientCacheError> {
        loop {
            let slot = self.slot(key);
            let construct = |_token: CancellationToken| {
                let options = options();
                trace!(key = %key, timeout = ?options.timeout, "Building HTTP client");
                async move { options.build_client().map_err(anyhow::Error::from) }
            };

            match slot.get_or_create(construct, cancel).await {
                Ok(client) => return Ok(client.as_ref().clone()),
                Err(SlotError::Cancelled) => return Err(ClientCacheError::Cancelled),
                Err(SlotError::ConstructionFailed(reason)) => {
                    return Err(ClientCacheError::Build {
                        key: key.clone(),
                        reason,
                    })
                }
                // Removed or evicted while we waited; start over on a fresh slot
                Err(SlotError::Closed) | Err(SlotError::Evicted) => continue,
            }
        }
    }

    async fn remove(
        &self,
        key: &ClientCacheKey,
        cancel: &CancellationToken,
    ) -> Result<(), ClientCacheError> {
        if cancel.is_cancelled() {
            return Err(ClientCacheError::Cancelled);
        }
        if let Some((_, slot)) = self.slots.remove(key) {
            let had_client = slot.close().is_some();
            debug!(key = %key, had_client, "Removed cached HTTP client");
        }
        Ok(())
    }
}
