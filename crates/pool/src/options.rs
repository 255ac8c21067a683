//! Registration options and the resource factory seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use kernel_pool_common::{Credential, RateLimits};

// =============================================================================
// Resource Kind
// =============================================================================

/// Construction parameters for a chat-completion resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatParams {
    /// Upper bound on generated tokens per request
    #[serde(default)]
    pub max_output_tokens: Option<u32>,

    #[serde(default)]
    pub request_timeout: Option<Duration>,
}

/// Construction parameters for an embedding resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingParams {
    /// Output vector size, when the model supports truncation
    #[serde(default)]
    pub dimensions: Option<u32>,

    #[serde(default)]
    pub request_timeout: Option<Duration>,
}

/// What a registration constructs.
///
/// Factories match exhaustively and reject kinds they do not serve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Chat(ChatParams),
    Embedding(EmbeddingParams),
    Other(String),
}

impl ResourceKind {
    pub fn chat() -> Self {
        Self::Chat(ChatParams::default())
    }

    pub fn embedding() -> Self {
        Self::Embedding(EmbeddingParams::default())
    }

    /// Short name used in logs and configuration files.
    pub fn name(&self) -> &str {
        match self {
            Self::Chat(_) => "chat",
            Self::Embedding(_) => "embedding",
            Self::Other(name) => name,
        }
    }

    /// Parse a kind name with default parameters. Unknown names map to
    /// [`ResourceKind::Other`].
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "chat" | "chat-completion" => Self::chat(),
            "embedding" | "embeddings" => Self::embedding(),
            _ => Self::Other(name.to_string()),
        }
    }

    /// Per-request timeout carried by the kind's parameters
    pub fn request_timeout(&self) -> Option<Duration> {
        match self {
            Self::Chat(p) => p.request_timeout,
            Self::Embedding(p) => p.request_timeout,
            Self::Other(_) => None,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Factory
// =============================================================================

/// Constructs the pooled resource for one registration.
///
/// `construct` runs on its own task and may outlive the caller that
/// triggered it; it should watch `cancel`, which fires when every waiter
/// has gone or the entry was removed.
#[async_trait]
pub trait ResourceFactory<R>: Send + Sync
where
    R: Send + Sync + 'static,
{
    async fn construct(
        &self,
        options: &RegistrationOptions<R>,
        cancel: CancellationToken,
    ) -> anyhow::Result<R>;

    /// Called once for every resource the registry evicts.
    async fn release(&self, _resource: Arc<R>) {}
}

// =============================================================================
// Registration Options
// =============================================================================

/// Immutable descriptor of one registration.
pub struct RegistrationOptions<R: Send + Sync + 'static> {
    pub kind: ResourceKind,
    pub model_id: String,
    pub endpoint: Option<String>,
    pub credential: Option<Credential>,
    pub limits: RateLimits,
    pub factory: Arc<dyn ResourceFactory<R>>,
}

impl<R> RegistrationOptions<R>
where
    R: Send + Sync + 'static,
{
    pub fn new(
        kind: ResourceKind,
        model_id: impl Into<String>,
        factory: Arc<dyn ResourceFactory<R>>,
    ) -> Self {
        Self {
            kind,
            model_id: model_id.into(),
            endpoint: None,
            credential: None,
            limits: RateLimits::default(),
            factory,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_credential(mut self, credential: impl Into<Credential>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    pub fn with_limits(mut self, limits: RateLimits) -> Self {
        self.limits = limits;
        self
    }
}

impl<R: Send + Sync + 'static> Clone for RegistrationOptions<R> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind.clone(),
            model_id: self.model_id.clone(),
            endpoint: self.endpoint.clone(),
            credential: self.credential.clone(),
            limits: self.limits,
            factory: Arc::clone(&self.factory),
        }
    }
}

impl<R: Send + Sync + 'static> fmt::Debug for RegistrationOptions<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationOptions")
            .field("kind", &self.kind)
            .field("model_id", &self.model_id)
            .field("endpoint", &self.endpoint)
            .field("credential", &self.credential)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}
