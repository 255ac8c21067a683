//! KDL configuration parsing.

use anyhow::Result;
use tracing::trace;

use crate::Config;

mod helpers;
mod pool;
mod registry;

pub use pool::{parse_entry, parse_pool, parse_rate_limit};
pub use registry::parse_registry_config;

/// Parse a whole configuration document.
pub fn parse_document(content: &str) -> Result<Config> {
    let doc: kdl::KdlDocument = content
        .parse()
        .map_err(|e: kdl::KdlError| anyhow::anyhow!("Failed to parse KDL: {}", e))?;

    let mut config = Config::default();
    let mut seen_registry = false;

    for node in doc.nodes() {
        match node.name().value() {
            "registry" => {
                if seen_registry {
                    return Err(anyhow::anyhow!(
                        "Duplicate 'registry' block; declare registry settings once"
                    ));
                }
                seen_registry = true;
                config.registry = parse_registry_config(node)?;
            }
            "pool" => config.pools.push(parse_pool(node)?),
            other => {
                return Err(anyhow::anyhow!(
                    "Unknown top-level block '{}'. Valid blocks: registry, pool",
                    other
                ));
            }
        }
    }

    trace!(
        pools = config.pools.len(),
        on_conflict = config.registry.on_conflict.as_str(),
        "Parsed configuration document"
    );
    Ok(config)
}
