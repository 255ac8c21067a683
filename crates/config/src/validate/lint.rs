//! Configuration linting for best practices
//!
//! Checks configuration for missing best practices and potential issues.

use super::{ValidationResult, ValidationWarning};
use crate::{Config, CredentialSource};

/// Lint configuration for best practices
pub fn lint_config(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    for pool in &config.pools {
        if pool.entries.is_empty() {
            result.add_warning(ValidationWarning::new(format!(
                "Pool '{}' declares no entries",
                pool.id
            )));
        }
    }

    for (key, entry) in config.entries() {
        // Unbounded entries can exhaust provider quotas
        if entry.limits.is_unlimited() {
            result.add_warning(ValidationWarning::new(format!(
                "Entry '{}' has no rate limit (recommended for production)",
                key
            )));
        } else if entry.limits.tokens_per_day.is_none() {
            result.add_warning(ValidationWarning::new(format!(
                "Entry '{}' has no daily token budget",
                key
            )));
        }

        match &entry.credential {
            CredentialSource::Inline(_) => {
                result.add_warning(ValidationWarning::new(format!(
                    "Entry '{}' stores its API key inline (prefer api-key-env)",
                    key
                )));
            }
            CredentialSource::None => {
                result.add_warning(ValidationWarning::new(format!(
                    "Entry '{}' has no API key configured",
                    key
                )));
            }
            CredentialSource::Env { .. } => {}
        }

        if let Some(endpoint) = &entry.endpoint {
            if endpoint.starts_with("http://") {
                result.add_warning(ValidationWarning::new(format!(
                    "Entry '{}' endpoint '{}' is not using TLS",
                    key, endpoint
                )));
            }
        }
    }

    result
}
