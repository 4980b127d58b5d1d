//! Recursive data aggregation
//!
//! `get_data` walks a subtree bottom-up: each child exports its data under
//! its local key and the parent merges those entries over its own model.
//! `set_data` walks top-down: a keyed payload is sliced per child key, each
//! slice is consumed by that child, and whatever is left becomes the
//! parent's own model.

mod emptiness;

pub use emptiness::{cascade_state_change, is_empty_value, Emptiness, PendingEmptiness};

use crate::node::NodeRef;
use canopy_core::NodeId;
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::error;

/// Children allowed to contribute to a filtered `get_data`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataFilter(HashSet<NodeId>);

impl DataFilter {
    /// Filter admitting exactly `nodes`.
    pub fn from_nodes<'a>(nodes: impl IntoIterator<Item = &'a NodeRef>) -> Self {
        Self(nodes.into_iter().map(|node| node.id()).collect())
    }

    /// Whether `node` may contribute.
    pub fn admits(&self, node: &NodeRef) -> bool {
        self.0.contains(&node.id())
    }

    /// Number of admitted nodes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no node is admitted.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Result of `set_data`.
#[derive(Debug, Clone)]
pub struct SetDataResult {
    /// Whether the node and all its children accepted their data
    pub success: bool,
    /// Emptiness of the node after the import
    pub emptiness: Emptiness,
}

impl SetDataResult {
    /// Accepted, with the given emptiness.
    pub fn ok(emptiness: Emptiness) -> Self {
        Self {
            success: true,
            emptiness,
        }
    }

    /// Rejected; emptiness is reported as empty.
    pub fn failed() -> Self {
        Self {
            success: false,
            emptiness: Emptiness::Empty,
        }
    }

    /// Shorthand for the known emptiness, if any.
    pub fn is_empty(&self) -> Option<bool> {
        self.emptiness.known()
    }
}

/// Default export: local model merged with children's exports.
///
/// Children are authoritative for their own keys. A scalar model cannot
/// absorb child entries; that mismatch is logged and the model is returned
/// whole.
pub fn collect(node: &NodeRef, filter: Option<&DataFilter>) -> Option<Value> {
    let hooks = node.component().as_data_hooks();
    let children = node.children();
    let model = node.model();

    if children.is_empty() {
        return hooks.and_then(|h| h.local_data(node)).or(model);
    }

    let mut children_data = Map::new();
    for (key, child) in &children {
        if filter.is_some_and(|f| !f.admits(child)) {
            continue;
        }
        if let Some(value) = child.get_data() {
            children_data.insert(key.clone(), value);
        }
        if let Some(extra) = child
            .component()
            .as_data_hooks()
            .and_then(|h| h.data_for_parent(child))
        {
            children_data.extend(extra);
        }
    }

    let mut merged = match model {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map,
        Some(scalar) => {
            if !children_data.is_empty() {
                error!(
                    node = %node.id(),
                    component = node.type_name(),
                    "composite child data cannot merge into a scalar model"
                );
            }
            return Some(scalar);
        }
    };
    merged.extend(children_data);

    if let Some(Value::Object(local)) = hooks.and_then(|h| h.local_data(node)) {
        merged.extend(local);
    }
    Some(Value::Object(merged))
}

/// Default import: slice keyed data across children, keep the rest.
pub fn distribute(node: &NodeRef, data: Option<Value>, _extra: Option<Value>) -> SetDataResult {
    let children = node.children();

    if children.is_empty() {
        node.set_model(data);
        return SetDataResult::ok(emptiness::local_emptiness(node, &[]));
    }

    let mut remaining = match data {
        Some(Value::Object(map)) => map,
        other => {
            node.set_model(other);
            let results: Vec<Emptiness> = children
                .iter()
                .map(|(_, child)| child.cascade_state_change())
                .collect();
            return SetDataResult::ok(emptiness::local_emptiness(node, &results));
        }
    };

    let original = remaining.clone();
    let mut success = true;
    let mut results = Vec::with_capacity(children.len());
    for (key, child) in &children {
        let extra = child
            .component()
            .as_data_hooks()
            .and_then(|h| h.extract_parent_data(&original));
        let slice = remaining.remove(key);
        let result = child.set_data_with(slice, extra);
        success &= result.success;
        results.push(result.emptiness);
    }

    node.set_model(if remaining.is_empty() {
        None
    } else {
        Some(Value::Object(remaining))
    });

    SetDataResult {
        success,
        emptiness: emptiness::local_emptiness(node, &results),
    }
}
