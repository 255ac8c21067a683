//! `add_mistral` / `remove_mistral` on [`KernelPool`].

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use kernel_pool::{
    HttpClientCache, Kernel, KernelPool, PoolError, RegistrationOptions, ResourceKind,
};
use kernel_pool_common::{Credential, EntryKey, PoolId, RateLimits, RegistrationKey};

use crate::errors::MistralError;
use crate::factory::{resolve_endpoint, MistralKernelFactory, PROVIDER};

/// Everything needed to register one Mistral model.
#[derive(Debug, Clone)]
pub struct MistralRegistration {
    pub pool_id: PoolId,
    pub key: EntryKey,
    pub kind: ResourceKind,
    pub model_id: String,
    pub api_key: Option<Credential>,
    /// Base URL; the public API when unset
    pub endpoint: Option<String>,
    pub limits: RateLimits,
}

impl MistralRegistration {
    pub fn new(
        pool_id: impl Into<PoolId>,
        key: impl Into<EntryKey>,
        kind: ResourceKind,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            pool_id: pool_id.into(),
            key: key.into(),
            kind,
            model_id: model_id.into(),
            api_key: None,
            endpoint: None,
            limits: RateLimits::default(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<Credential>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_limits(mut self, limits: RateLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn registration_key(&self) -> RegistrationKey {
        RegistrationKey::new(self.pool_id.clone(), self.key.clone())
    }
}

/// Mistral registration helpers for a kernel pool.
#[async_trait]
pub trait KernelPoolMistralExt {
    /// Register a Mistral chat or embedding model.
    ///
    /// The kernel is built on first acquisition with a transport client
    /// cached in `client_cache` under `mistral:{pool}:{key}`.
    async fn add_mistral(
        &self,
        registration: MistralRegistration,
        client_cache: Arc<dyn HttpClientCache>,
        cancel: &CancellationToken,
    ) -> Result<(), MistralError>;

    /// Remove the registration and its cached transport client.
    ///
    /// The cached client is removed even when the registration does not
    /// exist; the registry error is reported afterwards.
    async fn remove_mistral(
        &self,
        pool_id: &str,
        key: &str,
        client_cache: &dyn HttpClientCache,
        cancel: &CancellationToken,
    ) -> Result<(), MistralError>;
}

#[async_trait]
impl KernelPoolMistralExt for KernelPool<Kernel> {
    async fn add_mistral(
        &self,
        registration: MistralRegistration,
        client_cache: Arc<dyn HttpClientCache>,
        cancel: &CancellationToken,
    ) -> Result<(), MistralError> {
        if let ResourceKind::Other(kind) = &registration.kind {
            return Err(PoolError::Unsupported(kind.clone()).into());
        }
        let endpoint = resolve_endpoint(registration.endpoint.as_deref())?;

        let key = registration.registration_key();
        let factory = MistralKernelFactory::new(key.client_cache_key(PROVIDER), client_cache);

        let mut options: RegistrationOptions<Kernel> =
            RegistrationOptions::new(registration.kind, registration.model_id, Arc::new(factory))
                .with_endpoint(endpoint)
                .with_limits(registration.limits);
        options.credential = registration.api_key;

        debug!(
            pool = %key.pool(),
            key = %key.key(),
            provider = PROVIDER,
            "Adding Mistral registration"
        );
        self.add(registration.pool_id, registration.key, options, cancel)
            .await?;
        Ok(())
    }

    async fn remove_mistral(
        &self,
        pool_id: &str,
        key: &str,
        client_cache: &dyn HttpClientCache,
        cancel: &CancellationToken,
    ) -> Result<(), MistralError> {
        let registration = RegistrationKey::new(pool_id, key);

        let removed = self.remove(pool_id, key, cancel).await;
        let cleared = client_cache
            .remove(&registration.client_cache_key(PROVIDER), cancel)
            .await;

        info!(
            pool = %registration.pool(),
            key = %registration.key(),
            provider = PROVIDER,
            registry_removed = removed.is_ok(),
            client_cleared = cleared.is_ok(),
            "Removed Mistral registration"
        );

        removed?;
        cleared?;
        Ok(())
    }
}
