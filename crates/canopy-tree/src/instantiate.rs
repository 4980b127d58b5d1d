//! Child instantiation
//!
//! Children of one definition are created and resolved concurrently; a
//! node's instantiation completes only once every child's whole subtree has
//! resolved its own definitions (fan-out, then join).
//!
//! Options for a child are layered as component defaults, then declared
//! options, then extended options pushed down by the parent. Extended
//! options are keyed by child key: the `options` entry applies to that
//! child, every other entry is passed further down to the child's own
//! children, taking precedence over what the child's definition declares.

use crate::component::ChildDefinition;
use crate::lifecycle::LifecycleState;
use crate::node::{LoadContext, Node, NodeRef};
use canopy_core::{deep_merge, CanopyError, Options};
use futures::future::{try_join_all, BoxFuture, FutureExt};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Key of the options entry inside a child's extended options.
pub const EXTENDED_OPTIONS_KEY: &str = "options";

/// Resolve `node`'s children definition and instantiate its whole subtree.
///
/// Children are attached to `node` only after all of them resolved.
pub fn resolve_subtree<'a>(
    node: &'a NodeRef,
    context: &'a Arc<LoadContext>,
) -> BoxFuture<'a, Result<(), CanopyError>> {
    async move {
        node.set_load_context(context.clone());
        let definition = node
            .component()
            .resolve_children(node, &context.args)
            .await?;
        if node.is_root() {
            node.set_state(LifecycleState::DefinitionResolved);
        }

        let Some(definition) = definition else {
            return Ok(());
        };
        if definition.is_empty() {
            return Err(CanopyError::structural(format!(
                "empty children definition on {}",
                node.type_name()
            )));
        }

        let extended = node.extended_options();
        let instances = try_join_all(definition.iter().map(|(key, child_definition)| {
            let extended = &extended;
            async move {
                let child = instantiate_child(node, key, child_definition, extended, context)?;
                resolve_subtree(&child, context).await?;
                Ok::<_, CanopyError>((key.clone(), child))
            }
        }))
        .await?;

        debug!(
            node = %node.id(),
            component = node.type_name(),
            children = instances.len(),
            "children instantiated"
        );
        for (key, child) in instances {
            node.attach_child(key, child)?;
        }
        Ok(())
    }
    .boxed()
}

/// Create one child node from its definition without resolving its subtree.
pub fn instantiate_child(
    parent: &NodeRef,
    key: &str,
    definition: &ChildDefinition,
    parent_extended: &Options,
    context: &Arc<LoadContext>,
) -> Result<NodeRef, CanopyError> {
    let component = context
        .registry
        .create(&definition.component, &definition.options)?;

    let pushed = match parent_extended.get(key) {
        Some(Value::Object(pushed)) => Some(pushed),
        _ => None,
    };
    let forced = pushed.and_then(|p| match p.get(EXTENDED_OPTIONS_KEY) {
        Some(Value::Object(options)) => Some(options),
        _ => None,
    });

    let mut child_extended = definition.extended_options.clone();
    if let Some(pushed) = pushed {
        let mut further = pushed.clone();
        further.remove(EXTENDED_OPTIONS_KEY);
        deep_merge(&mut child_extended, &further);
    }

    let child = Node::with_layers(component, &definition.options, forced);
    child.set_extended_options(child_extended);
    child.set_insertion_target(definition.insertion_target.clone());
    child.set_parent(parent);
    child.set_load_context(context.clone());
    Ok(child)
}
