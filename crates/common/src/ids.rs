//! Type-safe identifier newtypes for the kernel pool.
//!
//! These types provide compile-time safety for identifiers, preventing
//! accidental mixing of different ID types (e.g., passing an EntryKey
//! where a PoolId is expected).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Pool identifier.
///
/// Names a collection of registrations. Pools are purely a namespace;
/// they carry no state of their own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PoolId(String);

impl PoolId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PoolId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PoolId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Entry key.
///
/// Distinguishes one registration within a pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryKey(String);

impl EntryKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntryKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EntryKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Composite registry key: (pool, entry key).
///
/// Identifies exactly one registration in a registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegistrationKey {
    pool: PoolId,
    key: EntryKey,
}

impl RegistrationKey {
    pub fn new(pool: impl Into<PoolId>, key: impl Into<EntryKey>) -> Self {
        Self {
            pool: pool.into(),
            key: key.into(),
        }
    }

    pub fn pool(&self) -> &PoolId {
        &self.pool
    }

    pub fn key(&self) -> &EntryKey {
        &self.key
    }

    /// Derive the client cache key a provider uses for this registration.
    pub fn client_cache_key(&self, provider: impl Into<String>) -> ClientCacheKey {
        ClientCacheKey::new(provider, self.clone())
    }
}

impl fmt::Display for RegistrationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.pool, self.key)
    }
}

/// Key of a transport client in the secondary client cache.
///
/// The provider is kept as its own field so two providers registering the
/// same (pool, key) never share a client. Displays as
/// `provider:pool:key`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientCacheKey {
    provider: String,
    registration: RegistrationKey,
}

impl ClientCacheKey {
    pub fn new(provider: impl Into<String>, registration: RegistrationKey) -> Self {
        Self {
            provider: provider.into(),
            registration,
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn registration(&self) -> &RegistrationKey {
        &self.registration
    }
}

impl fmt::Display for ClientCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.provider,
            self.registration.pool(),
            self.registration.key()
        )
    }
}
