//! Mistral provider adapter for the kernel pool.
//!
//! Registers Mistral chat-completion and embedding models into a
//! [`KernelPool`](kernel_pool::KernelPool) and removes them again together
//! with their cached HTTP client.
//!
//! # Example
//!
//! ```ignore
//! use kernel_pool_mistral::{KernelPoolMistralExt, MistralRegistration};
//!
//! let registration = MistralRegistration::new("assistants", "chat", ResourceKind::chat(), "mistral-small-latest")
//!     .with_api_key(api_key)
//!     .with_limits(RateLimits::default().with_per_minute(60));
//! pool.add_mistral(registration, client_cache.clone(), &cancel).await?;
//! // ...
//! pool.remove_mistral("assistants", "chat", client_cache.as_ref(), &cancel).await?;
//! ```

pub mod errors;
pub mod extension;
pub mod factory;

pub use errors::MistralError;
pub use extension::{KernelPoolMistralExt, MistralRegistration};
pub use factory::{resolve_endpoint, MistralKernelFactory, DEFAULT_ENDPOINT, DEFAULT_TIMEOUT, PROVIDER};
