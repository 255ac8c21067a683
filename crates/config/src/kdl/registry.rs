//! Registry settings block.

use anyhow::Result;
use tracing::trace;

use kernel_pool::{ConflictPolicy, RegistryConfig};

use super::helpers::get_string_entry;

/// Parse `registry { on-conflict "overwrite" }`
pub fn parse_registry_config(node: &kdl::KdlNode) -> Result<RegistryConfig> {
    trace!("Parsing registry configuration block");

    let on_conflict = match get_string_entry(node, "on-conflict") {
        Some(value) => ConflictPolicy::parse(&value).ok_or_else(|| {
            anyhow::anyhow!(
                "Invalid on-conflict policy '{}'. Valid policies: overwrite, reject",
                value
            )
        })?,
        None => ConflictPolicy::default(),
    };

    Ok(RegistryConfig { on_conflict })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_node(text: &str) -> kdl::KdlNode {
        let doc: kdl::KdlDocument = text.parse().unwrap();
        doc.nodes()[0].clone()
    }

    #[test]
    fn test_policy_parsing() {
        let node = first_node(r#"registry { on-conflict "reject" }"#);
        assert_eq!(
            parse_registry_config(&node).unwrap().on_conflict,
            ConflictPolicy::Reject
        );

        let node = first_node("registry {}");
        assert_eq!(
            parse_registry_config(&node).unwrap().on_conflict,
            ConflictPolicy::Overwrite
        );
    }

    #[test]
    fn test_invalid_policy() {
        let node = first_node(r#"registry { on-conflict "merge" }"#);
        let err = parse_registry_config(&node).unwrap_err();
        assert!(err.to_string().contains("Invalid on-conflict policy 'merge'"));
    }
}
