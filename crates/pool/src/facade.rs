//! Public add/remove surface used by provider adapters.
//!
//! # Removal contract
//!
//! Removing a registration takes two steps:
//!
//! 1. [`KernelPool::remove`] discards the registry entry and releases its
//!    cached resource.
//! 2. The adapter removes every secondary cache entry (for example a cached
//!    HTTP client) that its factory created for the registration.
//!
//! The pool cannot see what a factory cached elsewhere, so step two is the
//! adapter's job. Adapters should attempt it even when step one reports
//! [`PoolError::NotFound`].

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use kernel_pool_common::{EntryKey, PoolId, RegistrationKey};

use crate::errors::PoolError;
use crate::kernel::Kernel;
use crate::options::RegistrationOptions;
use crate::registry::{RegistryConfig, ResourceRegistry};

/// Handle to a shared kernel registry. Cheap to clone.
pub struct KernelPool<R: Send + Sync + 'static = Kernel> {
    registry: Arc<ResourceRegistry<R>>,
}

impl<R> Clone for KernelPool<R>
where
    R: Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<R> Default for KernelPool<R>
where
    R: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<R> KernelPool<R>
where
    R: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        Self::from_registry(Arc::new(ResourceRegistry::new(config)))
    }

    pub fn from_registry(registry: Arc<ResourceRegistry<R>>) -> Self {
        Self { registry }
    }

    /// The underlying registry, for stats and invalidation.
    pub fn registry(&self) -> &Arc<ResourceRegistry<R>> {
        &self.registry
    }

    /// Register `options` under (`pool_id`, `key`).
    pub async fn add(
        &self,
        pool_id: impl Into<PoolId>,
        key: impl Into<EntryKey>,
        options: RegistrationOptions<R>,
        cancel: &CancellationToken,
    ) -> Result<(), PoolError> {
        if cancel.is_cancelled() {
            return Err(PoolError::Cancelled);
        }
        self.registry
            .add(RegistrationKey::new(pool_id, key), options)
            .await
    }

    /// Step one of the removal contract.
    pub async fn remove(
        &self,
        pool_id: impl Into<PoolId>,
        key: impl Into<EntryKey>,
        cancel: &CancellationToken,
    ) -> Result<(), PoolError> {
        if cancel.is_cancelled() {
            return Err(PoolError::Cancelled);
        }
        self.registry
            .remove(&RegistrationKey::new(pool_id, key))
            .await
    }

    pub async fn get(
        &self,
        pool_id: impl Into<PoolId>,
        key: impl Into<EntryKey>,
        cancel: &CancellationToken,
    ) -> Result<Arc<R>, PoolError> {
        self.registry
            .get(&RegistrationKey::new(pool_id, key), cancel)
            .await
    }

    /// Acquire the resource, charging `tokens` against the daily budget.
    pub async fn acquire(
        &self,
        pool_id: impl Into<PoolId>,
        key: impl Into<EntryKey>,
        tokens: u64,
        cancel: &CancellationToken,
    ) -> Result<Arc<R>, PoolError> {
        self.registry
            .acquire(&RegistrationKey::new(pool_id, key), tokens, cancel)
            .await
    }
}
