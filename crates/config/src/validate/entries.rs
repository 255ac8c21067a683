//! Registration entry validation
//!
//! Checks that every entry can actually be registered: known provider,
//! unique key, usable endpoint and credential.

use std::collections::HashSet;

use kernel_pool::ResourceKind;

use super::{ErrorCategory, ValidationError, ValidationResult};
use crate::{Config, CredentialSource};

/// Providers with an adapter in this workspace
pub const SUPPORTED_PROVIDERS: &[&str] = &["mistral"];

/// Validate every declared entry
pub fn validate_entries(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();
    let mut seen = HashSet::new();

    for (key, entry) in config.entries() {
        if !seen.insert(key.clone()) {
            result.add_error(ValidationError::new(
                ErrorCategory::Registry,
                format!(
                    "Entry '{}' is declared more than once (on-conflict {} would apply at load)",
                    key,
                    config.registry.on_conflict.as_str()
                ),
            ));
        }

        if !SUPPORTED_PROVIDERS.contains(&entry.provider.as_str()) {
            result.add_error(ValidationError::new(
                ErrorCategory::Provider,
                format!(
                    "Entry '{}' uses unknown provider '{}'. Supported providers: {}",
                    key,
                    entry.provider,
                    SUPPORTED_PROVIDERS.join(", ")
                ),
            ));
        }

        if let ResourceKind::Other(kind) = &entry.kind {
            result.add_error(ValidationError::new(
                ErrorCategory::Provider,
                format!(
                    "Entry '{}' has unsupported kind '{}'. Valid kinds: chat, embedding",
                    key, kind
                ),
            ));
        }

        if entry.model_id.trim().is_empty() {
            result.add_error(ValidationError::new(
                ErrorCategory::Provider,
                format!("Entry '{}' has an empty model-id", key),
            ));
        }

        if let Some(endpoint) = &entry.endpoint {
            match url::Url::parse(endpoint) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => {}
                Ok(url) => {
                    result.add_error(ValidationError::new(
                        ErrorCategory::Endpoint,
                        format!(
                            "Entry '{}' endpoint '{}' must use http or https, not '{}'",
                            key,
                            endpoint,
                            url.scheme()
                        ),
                    ));
                }
                Err(e) => {
                    result.add_error(ValidationError::new(
                        ErrorCategory::Endpoint,
                        format!("Entry '{}' endpoint '{}' is not a valid URL: {}", key, endpoint, e),
                    ));
                }
            }
        }

        if let CredentialSource::Env { var, value: None } = &entry.credential {
            result.add_error(ValidationError::new(
                ErrorCategory::Credential,
                format!(
                    "Entry '{}' reads its API key from '{}', which is not set",
                    key, var
                ),
            ));
        }

        let limits = &entry.limits;
        if limits.request_ceilings().any(|(_, limit)| limit == 0) || limits.tokens_per_day == Some(0) {
            result.add_error(ValidationError::new(
                ErrorCategory::RateLimit,
                format!(
                    "Entry '{}' has a zero rate limit, which rejects every request",
                    key
                ),
            ));
        }
    }

    result
}
