//! Kernel Pool
//!
//! A keyed registry of expensive model clients ("kernels") that are built
//! lazily, shared across callers and guarded by per-registration rate limits.
//!
//! - **Registry**: at most one construction in flight per key, fail-fast rate
//!   limiting, linearizable removal
//! - **Slots**: single-flight lazy construction with waiter-scoped cancellation
//! - **HTTP client cache**: shared transport clients keyed per provider
//! - **Facade**: the add/remove surface used by provider adapters
//!
//! # Example
//!
//! ```ignore
//! use kernel_pool::{KernelPool, RegistrationOptions, ResourceKind};
//! use tokio_util::sync::CancellationToken;
//!
//! let pool: KernelPool = KernelPool::new();
//! let cancel = CancellationToken::new();
//! let options = RegistrationOptions::new(ResourceKind::chat(), "mistral-small-latest", factory);
//! pool.add("assistants", "chat", options, &cancel).await?;
//! let kernel = pool.acquire("assistants", "chat", 512, &cancel).await?;
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod errors;
pub mod facade;
pub mod http_cache;
pub mod kernel;
pub mod options;
pub mod rate_limit;
pub mod registry;
pub mod slot;

// ============================================================================
// Public API Re-exports
// ============================================================================

pub use errors::{ClientCacheError, PoolError, SlotError};
pub use facade::KernelPool;
pub use http_cache::{HttpClientCache, HttpClientOptions, MemoryHttpClientCache};
pub use kernel::{Kernel, KernelBuilder, KernelService, ServiceBinding};
pub use options::{ChatParams, EmbeddingParams, RegistrationOptions, ResourceFactory, ResourceKind};
pub use rate_limit::RateLimiter;
pub use registry::{
    ConflictPolicy, EntryStats, RegistryConfig, RegistryEntry, RegistryStats, ResourceRegistry,
};
pub use slot::{CachedResourceSlot, SlotStatus};

pub use kernel_pool_common::{
    Ceiling, ClientCacheKey, Credential, EntryKey, LimitWindow, PoolId, RateLimitDecision,
    RateLimitSnapshot, RateLimits, RegistrationKey,
};
