//! Kernel pool error types.

use std::time::Duration;
use thiserror::Error;

use kernel_pool_common::{Ceiling, ClientCacheKey, RegistrationKey};

/// Registry and pool errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PoolError {
    #[error("Registration not found: {0}")]
    NotFound(RegistrationKey),

    #[error("Registration already exists: {0}")]
    AlreadyRegistered(RegistrationKey),

    #[error("Rate limited on {key} ({ceiling}), retry after {retry_after:?}")]
    RateLimited {
        key: RegistrationKey,
        ceiling: Ceiling,
        retry_after: Duration,
    },

    #[error("Construction failed for {key}: {reason}")]
    ConstructionFailed { key: RegistrationKey, reason: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Unsupported resource kind: {0}")]
    Unsupported(String),

    #[error("Registry is shutting down")]
    ShuttingDown,
}

impl PoolError {
    /// Whether the caller may succeed by retrying later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::ConstructionFailed { .. })
    }

    /// Suggested back-off for retryable errors.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Errors surfaced by a [`CachedResourceSlot`](crate::CachedResourceSlot).
///
/// Cloneable because one construction outcome is delivered to every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SlotError {
    #[error("construction failed: {0}")]
    ConstructionFailed(String),

    #[error("wait cancelled")]
    Cancelled,

    #[error("resource evicted during construction")]
    Evicted,

    #[error("slot closed")]
    Closed,
}

/// HTTP client cache errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientCacheError {
    #[error("failed to build HTTP client {key}: {reason}")]
    Build { key: ClientCacheKey, reason: String },

    #[error("client cache operation cancelled")]
    Cancelled,
}
