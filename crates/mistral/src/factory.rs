//! Kernel factory for Mistral registrations.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use kernel_pool::{
    HttpClientCache, HttpClientOptions, Kernel, PoolError, RegistrationOptions, ResourceFactory,
    ResourceKind, ServiceBinding,
};
use kernel_pool_common::ClientCacheKey;

use crate::errors::MistralError;

/// Provider name used in client cache keys and service bindings
pub const PROVIDER: &str = "mistral";

/// Endpoint used when a registration does not name one
pub const DEFAULT_ENDPOINT: &str = "https://api.mistral.ai/v1";

/// Request timeout for cached Mistral clients
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Resolve the endpoint for a registration, defaulting to the public API.
pub fn resolve_endpoint(endpoint: Option<&str>) -> Result<String, MistralError> {
    let endpoint = endpoint.unwrap_or(DEFAULT_ENDPOINT);
    let url = url::Url::parse(endpoint).map_err(|e| MistralError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(MistralError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: format!("scheme must be http or https, not '{}'", url.scheme()),
        });
    }
    Ok(endpoint.trim_end_matches('/').to_string())
}

/// Builds a [`Kernel`] with one Mistral service, using a transport client
/// from the shared HTTP client cache.
pub struct MistralKernelFactory {
    cache_key: ClientCacheKey,
    client_cache: Arc<dyn HttpClientCache>,
}

impl MistralKernelFactory {
    pub fn new(cache_key: ClientCacheKey, client_cache: Arc<dyn HttpClientCache>) -> Self {
        Self {
            cache_key,
            client_cache,
        }
    }

    pub fn cache_key(&self) -> &ClientCacheKey {
        &self.cache_key
    }

    async fn client(
        &self,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> anyhow::Result<reqwest::Client> {
        let timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);
        let options = move || HttpClientOptions::default().with_timeout(timeout);
        Ok(self.client_cache.get(&self.cache_key, &options, cancel).await?)
    }
}

#[async_trait]
impl ResourceFactory<Kernel> for MistralKernelFactory {
    async fn construct(
        &self,
        options: &RegistrationOptions<Kernel>,
        cancel: CancellationToken,
    ) -> anyhow::Result<Kernel> {
        let endpoint = resolve_endpoint(options.endpoint.as_deref())?;

        let kernel = match &options.kind {
            ResourceKind::Chat(params) => {
                let client = self.client(params.request_timeout, &cancel).await?;
                let binding = binding(options, endpoint, client);
                Kernel::builder()
                    .add_chat_completion(binding, params.max_output_tokens)
                    .build()
            }
            ResourceKind::Embedding(params) => {
                let client = self.client(params.request_timeout, &cancel).await?;
                let binding = binding(options, endpoint, client);
                Kernel::builder()
                    .add_embedding_generator(binding, params.dimensions)
                    .build()
            }
            ResourceKind::Other(kind) => {
                return Err(PoolError::Unsupported(kind.clone()).into());
            }
        };

        debug!(
            key = %self.cache_key,
            kind = %options.kind,
            model_id = %options.model_id,
            "Built Mistral kernel"
        );
        Ok(kernel)
    }
}

fn binding(
    options: &RegistrationOptions<Kernel>,
    endpoint: String,
    client: reqwest::Client,
) -> ServiceBinding {
    ServiceBinding {
        provider: PROVIDER.to_string(),
        model_id: options.model_id.clone(),
        endpoint,
        credential: options.credential.clone(),
        client,
    }
}
