//! The pooled kernel: a bundle of configured model services.

use std::fmt;

use kernel_pool_common::Credential;

/// Connection details shared by every service kind.
#[derive(Clone)]
pub struct ServiceBinding {
    pub provider: String,
    pub model_id: String,
    pub endpoint: String,
    pub credential: Option<Credential>,
    /// Transport client, usually shared through an HTTP client cache
    pub client: reqwest::Client,
}

impl fmt::Debug for ServiceBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceBinding")
            .field("provider", &self.provider)
            .field("model_id", &self.model_id)
            .field("endpoint", &self.endpoint)
            .field("credential", &self.credential)
            .finish_non_exhaustive()
    }
}

/// A model service attached to a kernel.
#[derive(Debug, Clone)]
pub enum KernelService {
    ChatCompletion {
        binding: ServiceBinding,
        max_output_tokens: Option<u32>,
    },
    EmbeddingGenerator {
        binding: ServiceBinding,
        dimensions: Option<u32>,
    },
}

impl KernelService {
    pub fn binding(&self) -> &ServiceBinding {
        match self {
            Self::ChatCompletion { binding, .. } | Self::EmbeddingGenerator { binding, .. } => {
                binding
            }
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::ChatCompletion { .. } => "chat",
            Self::EmbeddingGenerator { .. } => "embedding",
        }
    }
}

/// Constructed per-registration object held by the pool.
#[derive(Debug, Clone, Default)]
pub struct Kernel {
    services: Vec<KernelService>,
}

impl Kernel {
    pub fn builder() -> KernelBuilder {
        KernelBuilder::default()
    }

    /// Services in registration order
    pub fn services(&self) -> &[KernelService] {
        &self.services
    }

    /// First chat-completion service, if any.
    pub fn chat_completion(&self) -> Option<&ServiceBinding> {
        self.services.iter().find_map(|s| match s {
            KernelService::ChatCompletion { binding, .. } => Some(binding),
            _ => None,
        })
    }

    /// First embedding service, if any.
    pub fn embedding_generator(&self) -> Option<&ServiceBinding> {
        self.services.iter().find_map(|s| match s {
            KernelService::EmbeddingGenerator { binding, .. } => Some(binding),
            _ => None,
        })
    }
}

/// Builder for [`Kernel`].
#[derive(Debug, Default)]
pub struct KernelBuilder {
    services: Vec<KernelService>,
}

impl KernelBuilder {
    pub fn add_chat_completion(mut self, binding: ServiceBinding, max_output_tokens: Option<u32>) -> Self {
        self.services.push(KernelService::ChatCompletion {
            binding,
            max_output_tokens,
        });
        self
    }

    pub fn add_embedding_generator(mut self, binding: ServiceBinding, dimensions: Option<u32>) -> Self {
        self.services
            .push(KernelService::EmbeddingGenerator { binding, dimensions });
        self
    }

    pub fn build(self) -> Kernel {
        Kernel {
            services: self.services,
        }
    }
}
