//! Keyed registry of lazily constructed, rate limited resources.
//!
//! Each [`RegistrationKey`] maps to one [`RegistryEntry`] holding the
//! registration options, a [`RateLimiter`] and a [`CachedResourceSlot`].
//! Acquisitions are admitted by the limiter before anything is constructed
//! or returned; construction happens at most once at a time per key.
//!
//! Map guards are never held across an await: lookups clone the entry's
//! `Arc` and release the shard before touching the slot.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use kernel_pool_common::{PoolId, RateLimitDecision, RateLimitSnapshot, RegistrationKey};

use crate::errors::{PoolError, SlotError};
use crate::options::RegistrationOptions;
use crate::rate_limit::RateLimiter;
use crate::slot::{CachedResourceSlot, SlotStatus};

// =============================================================================
// Configuration
// =============================================================================

/// What `add` does when the key is already registered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Replace the existing entry and release its resource
    #[default]
    Overwrite,
    /// Fail with [`PoolError::AlreadyRegistered`]
    Reject,
}

impl ConflictPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "overwrite" => Some(Self::Overwrite),
            "reject" => Some(Self::Reject),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Overwrite => "overwrite",
            Self::Reject => "reject",
        }
    }
}

/// Registry configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub on_conflict: ConflictPolicy,
}

// =============================================================================
// Entries
// =============================================================================

/// One registration: options, limiter and cached resource.
pub struct RegistryEntry<R: Send + Sync + 'static> {
    key: RegistrationKey,
    options: Arc<RegistrationOptions<R>>,
    limiter: RateLimiter,
    slot: CachedResourceSlot<R>,
    registered_at: Instant,
    granted: AtomicU64,
    rejected: AtomicU64,
}

impl<R> RegistryEntry<R>
where
    R: Send + Sync + 'static,
{
    fn new(key: RegistrationKey, options: RegistrationOptions<R>) -> Self {
        let name = key.to_string();
        Self {
            limiter: RateLimiter::with_name(options.limits, name.clone()),
            slot: CachedResourceSlot::new(name),
            options: Arc::new(options),
            key,
            registered_at: Instant::now(),
            granted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    pub fn key(&self) -> &RegistrationKey {
        &self.key
    }

    pub fn options(&self) -> &RegistrationOptions<R> {
        &self.options
    }

    pub fn status(&self) -> SlotStatus {
        self.slot.status()
    }

    /// Close the slot and hand any cached resource to the factory's
    /// release hook.
    async fn retire(&self) {
        if let Some(resource) = self.slot.close() {
            self.options.factory.release(resource).await;
        }
    }

    fn stats(&self) -> EntryStats {
        EntryStats {
            key: self.key.clone(),
            kind: self.options.kind.name().to_string(),
            model_id: self.options.model_id.clone(),
            status: self.slot.status(),
            constructions: self.slot.constructions(),
            granted: self.granted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            usage: self.limiter.snapshot(),
            age_ms: self.registered_at.elapsed().as_millis() as u64,
        }
    }
}

/// Per-entry statistics
#[derive(Debug, Clone, Serialize)]
pub struct EntryStats {
    pub key: RegistrationKey,
    pub kind: String,
    pub model_id: String,
    pub status: SlotStatus,
    /// Constructions started since registration
    pub constructions: u64,
    /// Acquisitions admitted by the rate limiter
    pub granted: u64,
    /// Acquisitions rejected by the rate limiter
    pub rejected: u64,
    pub usage: RateLimitSnapshot,
    pub age_ms: u64,
}

/// Registry-wide statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryStats {
    pub entries: usize,
    pub ready: usize,
    pub constructing: usize,
    pub total_requests: u64,
    pub total_rejections: u64,
}

// =============================================================================
// Registry
// =============================================================================

/// Keyed store of registrations.
pub struct ResourceRegistry<R: Send + Sync + 'static> {
    config: RegistryConfig,
    entries: DashMap<RegistrationKey, Arc<RegistryEntry<R>>>,
    shutting_down: AtomicBool,
    total_requests: AtomicU64,
    total_rejections: AtomicU64,
}

impl<R> ResourceRegistry<R>
where
    R: Send + Sync + 'static,
{
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            entries: DashMap::new(),
            shutting_down: AtomicBool::new(false),
            total_requests: AtomicU64::new(0),
            total_rejections: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Register `options` under `key`. Never constructs eagerly.
    pub async fn add(
        &self,
        key: RegistrationKey,
        options: RegistrationOptions<R>,
    ) -> Result<(), PoolError> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(PoolError::ShuttingDown);
        }

        let kind = options.kind.name().to_string();
        let model_id = options.model_id.clone();
        let entry = Arc::new(RegistryEntry::new(key.clone(), options));

        let previous = match self.config.on_conflict {
            ConflictPolicy::Overwrite => self.entries.insert(key.clone(), Arc::clone(&entry)),
            ConflictPolicy::Reject => match self.entries.entry(key.clone()) {
                Entry::Occupied(_) => return Err(PoolError::AlreadyRegistered(key)),
                Entry::Vacant(vacant) => {
                    vacant.insert(Arc::clone(&entry));
                    None
                }
            },
        };

        if let Some(previous) = previous {
            debug!(pool = %key.pool(), key = %key.key(), "Replacing existing registration");
            previous.retire().await;
        }

        // Lost a race with shutdown; do not leave the entry behind
        if self.shutting_down.load(Ordering::Acquire) {
            if let Some((_, entry)) = self.entries.remove_if(&key, |_, e| Arc::ptr_eq(e, &entry)) {
                entry.retire().await;
            }
            return Err(PoolError::ShuttingDown);
        }

        info!(
            pool = %key.pool(),
            key = %key.key(),
            kind = %kind,
            model_id = %model_id,
            "Registered kernel"
        );
        Ok(())
    }

    /// Acquire the resource without charging the token budget.
    pub async fn get(
        &self,
        key: &RegistrationKey,
        cancel: &CancellationToken,
    ) -> Result<Arc<R>, PoolError> {
        self.acquire(key, 0, cancel).await
    }

    /// Admit one request of `tokens` through the rate limiter, then return
    /// the cached resource, constructing it on first use.
    pub async fn acquire(
        &self,
        key: &RegistrationKey,
        tokens: u64,
        cancel: &CancellationToken,
    ) -> Result<Arc<R>, PoolError> {
        if cancel.is_cancelled() {
            return Err(PoolError::Cancelled);
        }

        let mut entry = self.lookup(key)?;
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.admit(key, &entry, tokens)?;

        loop {
            let options = Arc::clone(&entry.options);
            let failed_key = key.clone();
            let construct = move |token: CancellationToken| async move {
                let result = options.factory.construct(&options, token).await;
                if let Err(e) = &result {
                    warn!(
                        pool = %failed_key.pool(),
                        key = %failed_key.key(),
                        model_id = %options.model_id,
                        error = %format!("{:#}", e),
                        "Kernel construction failed"
                    );
                }
                result
            };

            match entry.slot.get_or_create(construct, cancel).await {
                Ok(resource) => return Ok(resource),
                Err(SlotError::Cancelled) => return Err(PoolError::Cancelled),
                Err(SlotError::ConstructionFailed(reason)) => {
                    return Err(PoolError::ConstructionFailed {
                        key: key.clone(),
                        reason,
                    })
                }
                // Removed, replaced or invalidated mid-construction. A removed
                // key surfaces as NotFound; a replacement entry charges its own
                // limiter before serving.
                Err(SlotError::Closed) | Err(SlotError::Evicted) => {
                    trace!(pool = %key.pool(), key = %key.key(), "Construction evicted, retrying");
                    let current = self.lookup(key)?;
                    if !Arc::ptr_eq(&current, &entry) {
                        self.admit(key, &current, tokens)?;
                    }
                    entry = current;
                }
            }
        }
    }

    /// Charge one request of `tokens` against the entry's limiter.
    fn admit(
        &self,
        key: &RegistrationKey,
        entry: &RegistryEntry<R>,
        tokens: u64,
    ) -> Result<(), PoolError> {
        match entry.limiter.check(tokens) {
            RateLimitDecision::Allowed { tokens_remaining } => {
                entry.granted.fetch_add(1, Ordering::Relaxed);
                trace!(
                    pool = %key.pool(),
                    key = %key.key(),
                    tokens,
                    tokens_remaining = ?tokens_remaining,
                    "Acquisition admitted"
                );
                Ok(())
            }
            RateLimitDecision::Limited {
                ceiling,
                retry_after,
            } => {
                entry.rejected.fetch_add(1, Ordering::Relaxed);
                self.total_rejections.fetch_add(1, Ordering::Relaxed);
                trace!(
                    pool = %key.pool(),
                    key = %key.key(),
                    tokens,
                    ceiling = %ceiling,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Acquisition rate limited"
                );
                Err(PoolError::RateLimited {
                    key: key.clone(),
                    ceiling,
                    retry_after,
                })
            }
        }
    }

    /// Remove the entry and release its resource.
    ///
    /// Later lookups return [`PoolError::NotFound`]. Waiters on an in-flight
    /// construction also receive `NotFound`. Holders of the resource keep
    /// their `Arc`.
    pub async fn remove(&self, key: &RegistrationKey) -> Result<(), PoolError> {
        let (_, entry) = self
            .entries
            .remove(key)
            .ok_or_else(|| PoolError::NotFound(key.clone()))?;

        entry.retire().await;
        info!(pool = %key.pool(), key = %key.key(), "Removed kernel registration");
        Ok(())
    }

    /// Evict the cached resource so the next acquisition reconstructs it.
    ///
    /// The entry and its rate limiter survive. Returns whether a
    /// constructed resource was evicted.
    pub async fn invalidate(&self, key: &RegistrationKey) -> Result<bool, PoolError> {
        let entry = self.lookup(key)?;
        match entry.slot.invalidate() {
            Some(resource) => {
                debug!(pool = %key.pool(), key = %key.key(), "Invalidated cached kernel");
                entry.options.factory.release(resource).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn contains(&self, key: &RegistrationKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered keys in sorted order, optionally restricted to one pool.
    pub fn keys(&self, pool: Option<&PoolId>) -> Vec<RegistrationKey> {
        let mut keys: Vec<_> = self
            .entries
            .iter()
            .map(|e| e.key().clone())
            .filter(|k| pool.map_or(true, |p| k.pool() == p))
            .collect();
        keys.sort();
        keys
    }

    pub fn entry_stats(&self, key: &RegistrationKey) -> Option<EntryStats> {
        self.entries.get(key).map(|e| e.stats())
    }

    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats {
            entries: 0,
            ready: 0,
            constructing: 0,
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
        };
        for entry in self.entries.iter() {
            stats.entries += 1;
            match entry.slot.status() {
                SlotStatus::Ready => stats.ready += 1,
                SlotStatus::Constructing => stats.constructing += 1,
                _ => {}
            }
        }
        stats
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Remove every entry and release every resource. Later adds fail with
    /// [`PoolError::ShuttingDown`]. Returns the number of entries drained.
    pub async fn shutdown(&self) -> usize {
        self.shutting_down.store(true, Ordering::Release);
        info!(entries = self.entries.len(), "Shutting down kernel registry");

        let mut drained = 0;
        for key in self.keys(None) {
            if let Some((_, entry)) = self.entries.remove(&key) {
                entry.retire().await;
                drained += 1;
            }
        }

        info!(drained, "Kernel registry shutdown complete");
        drained
    }

    fn lookup(&self, key: &RegistrationKey) -> Result<Arc<RegistryEntry<R>>, PoolError> {
        self.entries
            .get(key)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| PoolError::NotFound(key.clone()))
    }
}

impl<R> Default for ResourceRegistry<R>
where
    R: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}
