//! Common identifiers and limit types for the kernel pool.
//!
//! Shared by the registry, the configuration loader and provider adapters.

pub mod credential;
pub mod ids;
pub mod limits;

pub use credential::Credential;
pub use ids::{ClientCacheKey, EntryKey, PoolId, RegistrationKey};
pub use limits::{Ceiling, LimitWindow, RateLimitDecision, RateLimitSnapshot, RateLimits};
