//! Kernel pool configuration.
//!
//! Registrations are declared in a KDL file:
//!
//! ```kdl
//! registry {
//!     on-conflict "overwrite"
//! }
//!
//! pool "assistants" {
//!     mistral "small-chat" {
//!         kind "chat"
//!         model-id "mistral-small-latest"
//!         api-key-env "MISTRAL_API_KEY"
//!         rate-limit {
//!             requests-per-minute 60
//!             tokens-per-day 1000000
//!         }
//!     }
//! }
//! ```
//!
//! Credentials named by `api-key-env` are resolved from the environment at
//! load time. Use [`Config::validate`] for errors and [`lint_config`] for
//! best-practice warnings.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, info};

use kernel_pool::{RegistryConfig, ResourceKind};
use kernel_pool_common::{Credential, EntryKey, PoolId, RateLimits, RegistrationKey};

pub mod kdl;
pub mod validate;

pub use validate::{lint_config, ErrorCategory, ValidationError, ValidationResult, ValidationWarning};

/// Where an entry's API key comes from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CredentialSource {
    #[default]
    None,
    /// Read from an environment variable at load time
    Env {
        var: String,
        /// `None` when the variable was unset or empty
        value: Option<Credential>,
    },
    /// Written directly in the configuration file
    Inline(Credential),
}

impl CredentialSource {
    /// Look up `var` in the process environment.
    pub fn from_env(var: impl Into<String>) -> Self {
        let var = var.into();
        let value = std::env::var(&var)
            .ok()
            .filter(|v| !v.is_empty())
            .map(Credential::new);
        Self::Env { var, value }
    }

    /// The resolved credential, if any.
    pub fn credential(&self) -> Option<&Credential> {
        match self {
            Self::None => None,
            Self::Env { value, .. } => value.as_ref(),
            Self::Inline(credential) => Some(credential),
        }
    }
}

/// One declared registration.
#[derive(Debug, Clone)]
pub struct EntryConfig {
    /// Provider adapter that serves this entry, e.g. `mistral`
    pub provider: String,
    pub key: EntryKey,
    pub kind: ResourceKind,
    pub model_id: String,
    pub endpoint: Option<String>,
    pub credential: CredentialSource,
    pub limits: RateLimits,
}

/// A named group of registrations.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub id: PoolId,
    pub entries: Vec<EntryConfig>,
}

/// Whole configuration file
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub registry: RegistryConfig,
    pub pools: Vec<PoolConfig>,
}

impl Config {
    /// Load and parse a KDL configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading configuration file");

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_kdl(&content)
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;

        info!(
            path = %path.display(),
            pools = config.pools.len(),
            entries = config.entry_count(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Parse configuration from KDL text.
    pub fn from_kdl(content: &str) -> Result<Self> {
        kdl::parse_document(content)
    }

    /// Every entry paired with its registration key, in file order.
    pub fn entries(&self) -> impl Iterator<Item = (RegistrationKey, &EntryConfig)> {
        self.pools.iter().flat_map(|pool| {
            pool.entries
                .iter()
                .map(move |entry| (RegistrationKey::new(pool.id.clone(), entry.key.clone()), entry))
        })
    }

    pub fn entry_count(&self) -> usize {
        self.pools.iter().map(|p| p.entries.len()).sum()
    }

    /// Check the configuration for errors.
    pub fn validate(&self) -> ValidationResult {
        validate::validate_entries(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
registry {
    on-conflict "reject"
}

pool "assistants" {
    mistral "small-chat" {
        kind "chat"
        model-id "mistral-small-latest"
        api-key "sk-inline"
        rate-limit {
            requests-per-second 2
            tokens-per-day 1000
        }
    }
    mistral "embed" {
        kind "embedding"
        model-id "mistral-embed"
    }
}
"#;

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.entry_count(), 2);
        assert_eq!(
            config.registry.on_conflict,
            kernel_pool::ConflictPolicy::Reject
        );

        let keys: Vec<_> = config.entries().map(|(k, _)| k.to_string()).collect();
        assert_eq!(keys, vec!["assistants/small-chat", "assistants/embed"]);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::from_file(dir.path().join("absent.kdl")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_credential_from_env() {
        std::env::set_var("KERNEL_POOL_TEST_KEY_PRESENT", "sk-env");
        let source = CredentialSource::from_env("KERNEL_POOL_TEST_KEY_PRESENT");
        assert_eq!(source.credential().map(|c| c.expose()), Some("sk-env"));

        let missing = CredentialSource::from_env("KERNEL_POOL_TEST_KEY_ABSENT");
        assert!(missing.credential().is_none());
    }
}
