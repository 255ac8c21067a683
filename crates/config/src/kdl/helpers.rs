//! Small accessors over KDL nodes.
//!
//! Fields are written as child nodes with a single argument:
//! `model-id "mistral-small-latest"`.

use anyhow::Result;

/// First child node named `name`.
pub fn get_child<'a>(node: &'a kdl::KdlNode, name: &str) -> Option<&'a kdl::KdlNode> {
    node.children()?
        .nodes()
        .iter()
        .find(|child| child.name().value() == name)
}

/// First positional argument of a field node.
fn get_field_value<'a>(node: &'a kdl::KdlNode, name: &str) -> Option<&'a kdl::KdlValue> {
    get_child(node, name)?
        .entries()
        .iter()
        .find(|entry| entry.name().is_none())
        .map(|entry| entry.value())
}

/// First positional argument of the node itself, e.g. the id in
/// `pool "assistants" { ... }`.
pub fn get_first_arg_string(node: &kdl::KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|entry| entry.name().is_none())
        .and_then(|entry| entry.value().as_string())
        .map(|s| s.to_string())
}

pub fn get_string_entry(node: &kdl::KdlNode, name: &str) -> Option<String> {
    get_field_value(node, name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

pub fn get_int_entry(node: &kdl::KdlNode, name: &str) -> Option<i128> {
    get_field_value(node, name).and_then(|v| v.as_integer())
}

/// Integer field that must be present with a non-negative value fitting `T`.
pub fn get_limit_entry<T>(node: &kdl::KdlNode, name: &str, context: &str) -> Result<Option<T>>
where
    T: TryFrom<i128>,
{
    if get_child(node, name).is_none() {
        return Ok(None);
    }
    let value = get_int_entry(node, name).ok_or_else(|| {
        anyhow::anyhow!("{}: '{}' must be an integer, e.g., {} 60", context, name, name)
    })?;
    T::try_from(value).map(Some).map_err(|_| {
        anyhow::anyhow!("{}: '{}' value {} is out of range", context, name, value)
    })
}
