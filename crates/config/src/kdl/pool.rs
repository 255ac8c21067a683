//! Pool and registration entry KDL parsing.

use anyhow::Result;
use std::time::Duration;
use tracing::trace;

use kernel_pool::{ChatParams, EmbeddingParams, ResourceKind};
use kernel_pool_common::{Credential, EntryKey, PoolId, RateLimits};

use crate::{CredentialSource, EntryConfig, PoolConfig};

use super::helpers::{get_child, get_first_arg_string, get_limit_entry, get_string_entry};

/// Parse `pool "id" { <provider> "key" { ... } ... }`
pub fn parse_pool(node: &kdl::KdlNode) -> Result<PoolConfig> {
    let id = get_first_arg_string(node).ok_or_else(|| {
        anyhow::anyhow!("Pool requires an ID argument, e.g., pool \"assistants\" {{ ... }}")
    })?;

    trace!(pool_id = %id, "Parsing pool");

    let mut entries = Vec::new();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            entries.push(parse_entry(&id, child)?);
        }
    }

    trace!(pool_id = %id, entry_count = entries.len(), "Parsed pool");
    Ok(PoolConfig {
        id: PoolId::new(id),
        entries,
    })
}

/// Parse one registration. The node name is the provider.
pub fn parse_entry(pool_id: &str, node: &kdl::KdlNode) -> Result<EntryConfig> {
    let provider = node.name().value().to_string();
    let key = get_first_arg_string(node).ok_or_else(|| {
        anyhow::anyhow!(
            "Entry in pool '{}' requires a key argument, e.g., {} \"small-chat\" {{ ... }}",
            pool_id,
            provider
        )
    })?;
    let context = format!("Entry '{}/{}'", pool_id, key);

    let model_id = get_string_entry(node, "model-id").ok_or_else(|| {
        anyhow::anyhow!(
            "{} requires a 'model-id' field, e.g., model-id \"mistral-small-latest\"",
            context
        )
    })?;

    let kind_name = get_string_entry(node, "kind").ok_or_else(|| {
        anyhow::anyhow!("{} requires a 'kind' field: chat or embedding", context)
    })?;
    let request_timeout = get_limit_entry::<u64>(node, "request-timeout-secs", &context)?
        .map(Duration::from_secs);
    let kind = match ResourceKind::parse(&kind_name) {
        ResourceKind::Chat(_) => ResourceKind::Chat(ChatParams {
            max_output_tokens: get_limit_entry(node, "max-output-tokens", &context)?,
            request_timeout,
        }),
        ResourceKind::Embedding(_) => ResourceKind::Embedding(EmbeddingParams {
            dimensions: get_limit_entry(node, "dimensions", &context)?,
            request_timeout,
        }),
        other => other,
    };

    let credential = match (
        get_string_entry(node, "api-key-env"),
        get_string_entry(node, "api-key"),
    ) {
        (Some(_), Some(_)) => {
            return Err(anyhow::anyhow!(
                "{} sets both 'api-key-env' and 'api-key'; use one",
                context
            ));
        }
        (Some(var), None) => CredentialSource::from_env(var),
        (None, Some(secret)) => CredentialSource::Inline(Credential::new(secret)),
        (None, None) => CredentialSource::None,
    };

    let limits = match get_child(node, "rate-limit") {
        Some(rate_limit) => parse_rate_limit(rate_limit, &context)?,
        None => RateLimits::unlimited(),
    };

    trace!(
        pool_id = %pool_id,
        key = %key,
        provider = %provider,
        kind = %kind,
        model_id = %model_id,
        "Parsed entry"
    );

    Ok(EntryConfig {
        provider,
        key: EntryKey::new(key),
        kind,
        model_id,
        endpoint: get_string_entry(node, "endpoint"),
        credential,
        limits,
    })
}

/// Parse a `rate-limit { ... }` block.
pub fn parse_rate_limit(node: &kdl::KdlNode, context: &str) -> Result<RateLimits> {
    Ok(RateLimits {
        per_second: get_limit_entry(node, "requests-per-second", context)?,
        per_minute: get_limit_entry(node, "requests-per-minute", context)?,
        per_day: get_limit_entry(node, "requests-per-day", context)?,
        tokens_per_day: get_limit_entry(node, "tokens-per-day", context)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_node(text: &str) -> kdl::KdlNode {
        let doc: kdl::KdlDocument = text.parse().unwrap();
        doc.nodes()[0].clone()
    }

    #[test]
    fn test_parse_full_entry() {
        let node = first_node(
            r#"
pool "assistants" {
    mistral "small-chat" {
        kind "chat"
        model-id "mistral-small-latest"
        endpoint "https://eu.api.mistral.ai/v1"
        max-output-tokens 1024
        request-timeout-secs 30
        rate-limit {
            requests-per-second 2
            requests-per-minute 60
            requests-per-day 10000
            tokens-per-day 1000000
        }
    }
}
"#,
        );
        let pool = parse_pool(&node).unwrap();
        assert_eq!(pool.id.as_str(), "assistants");

        let entry = &pool.entries[0];
        assert_eq!(entry.provider, "mistral");
        assert_eq!(entry.key.as_str(), "small-chat");
        assert_eq!(entry.model_id, "mistral-small-latest");
        assert_eq!(entry.endpoint.as_deref(), Some("https://eu.api.mistral.ai/v1"));
        assert_eq!(
            entry.kind,
            ResourceKind::Chat(ChatParams {
                max_output_tokens: Some(1024),
                request_timeout: Some(Duration::from_secs(30)),
            })
        );
        assert_eq!(
            entry.limits,
            RateLimits::default()
                .with_per_second(2)
                .with_per_minute(60)
                .with_per_day(10000)
                .with_tokens_per_day(1_000_000)
        );
        assert_eq!(entry.credential, CredentialSource::None);
    }

    #[test]
    fn test_embedding_entry_without_limits() {
        let node = first_node(
            r#"
pool "search" {
    mistral "embed" {
        kind "embedding"
        model-id "mistral-embed"
        dimensions 1024
        api-key "sk-inline"
    }
}
"#,
        );
        let entry = &parse_pool(&node).unwrap().entries[0];
        assert!(matches!(
            entry.kind,
            ResourceKind::Embedding(EmbeddingParams {
                dimensions: Some(1024),
                ..
            })
        ));
        assert!(entry.limits.is_unlimited());
        assert!(matches!(entry.credential, CredentialSource::Inline(_)));
    }

    #[test]
    fn test_missing_model_id() {
        let node = first_node(r#"pool "p" { mistral "k" { kind "chat" } }"#);
        let err = parse_pool(&node).unwrap_err();
        assert!(err.to_string().contains("Entry 'p/k' requires a 'model-id' field"));
    }

    #[test]
    fn test_missing_pool_id() {
        let node = first_node("pool { }");
        let err = parse_pool(&node).unwrap_err();
        assert!(err.to_string().contains("Pool requires an ID argument"));
    }

    #[test]
    fn test_both_credential_sources() {
        let node = first_node(
            r#"pool "p" { mistral "k" { kind "chat"; model-id "m"; api-key "a"; api-key-env "B" } }"#,
        );
        let err = parse_pool(&node).unwrap_err();
        assert!(err.to_string().contains("sets both 'api-key-env' and 'api-key'"));
    }

    #[test]
    fn test_negative_limit_rejected() {
        let node = first_node(
            r#"
pool "p" {
    mistral "k" {
        kind "chat"
        model-id "m"
        rate-limit {
            requests-per-minute -5
        }
    }
}
"#,
        );
        let err = parse_pool(&node).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_non_integer_limit_rejected() {
        let node = first_node(
            r#"
pool "p" {
    mistral "k" {
        kind "chat"
        model-id "m"
        rate-limit {
            tokens-per-day "lots"
        }
    }
}
"#,
        );
        let err = parse_pool(&node).unwrap_err();
        assert!(err.to_string().contains("must be an integer"));
    }

    #[test]
    fn test_unknown_kind_kept_as_other() {
        let node = first_node(r#"pool "p" { mistral "k" { kind "image"; model-id "m" } }"#);
        let entry = &parse_pool(&node).unwrap().entries[0];
        assert_eq!(entry.kind, ResourceKind::Other("image".to_string()));
    }
}
