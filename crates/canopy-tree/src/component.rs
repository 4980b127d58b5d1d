//! Component types and their capabilities
//!
//! A [`Component`] is the behaviour attached to one node. The node owns the
//! tree bookkeeping (identity, children, model, bus); the component decides
//! what children to declare, what resources to request and how data flows
//! through it. Optional capabilities are separate traits reached through
//! `as_*` accessors, so a concrete type opts into exactly what it supports:
//!
//! - [`Renderable`]: configured once resources are available
//! - [`Validatable`]: validated before a save
//! - [`Trackable`]: fires extra events that count as modifications
//! - [`EmptinessAware`]: overrides emptiness propagation
//! - [`DataHooks`]: adjusts how data is exported and imported

use crate::data::{DataFilter, Emptiness, SetDataResult};
use crate::node::{Node, NodeRef};
use async_trait::async_trait;
use canopy_core::{CanopyError, Options, ValidationError};
use canopy_resource::ResourceRequests;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// Declaration of one child in a children definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChildDefinition {
    /// Registered component type name
    pub component: String,
    /// Where the child renders inside its parent, if not appended
    pub insertion_target: Option<String>,
    /// Options declared for the child
    pub options: Options,
    /// Options pushed further down to the child's own children, keyed by child key
    pub extended_options: Options,
}

impl ChildDefinition {
    /// Definition of a child of type `component` with no options.
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            ..Self::default()
        }
    }

    /// Set declared options.
    #[must_use]
    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    /// Set extended options for the child's children.
    #[must_use]
    pub fn with_extended_options(mut self, extended: Options) -> Self {
        self.extended_options = extended;
        self
    }

    /// Set the insertion target.
    #[must_use]
    pub fn with_insertion_target(mut self, target: impl Into<String>) -> Self {
        self.insertion_target = Some(target.into());
        self
    }
}

/// Children of a node, keyed by local key.
pub type ChildrenDefinition = IndexMap<String, ChildDefinition>;

/// Option key holding a node's static children definition.
pub const CHILDREN_OPTION: &str = "children";

/// Callback applied when an option changes through [`Node::set_option`].
pub type OptionSetter = Arc<dyn Fn(&NodeRef, &Value) + Send + Sync>;

/// Setters registered by a component type, by option name.
pub type OptionSetters = HashMap<&'static str, OptionSetter>;

/// Object-safe access to the concrete component type.
pub trait AsAny {
    /// Upcast to `Any` for downcasting.
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Behaviour attached to a node.
///
/// A component instance belongs to exactly one node; factories in the
/// [`ComponentRegistry`](crate::ComponentRegistry) create a fresh instance per node.
#[async_trait]
pub trait Component: AsAny + Send + Sync {
    /// Registered type name, for logs.
    fn type_name(&self) -> &str;

    /// Defaults underneath declared options.
    fn default_options(&self) -> Options {
        Options::new()
    }

    /// Resources this node needs before it can be configured.
    fn resource_requests(&self, _node: &Node) -> ResourceRequests {
        ResourceRequests::default()
    }

    /// Children to instantiate under this node.
    ///
    /// The default reads the static definition from the `children` option.
    /// `Ok(None)` means the node has no children.
    async fn resolve_children(
        &self,
        node: &NodeRef,
        _args: &Value,
    ) -> Result<Option<ChildrenDefinition>, CanopyError> {
        node.declared_children()
    }

    /// Setters invoked when options change after construction.
    fn option_setters(&self) -> OptionSetters {
        OptionSetters::new()
    }

    /// Export this node's data.
    fn get_data(&self, node: &NodeRef, filter: Option<&DataFilter>) -> Option<Value> {
        crate::data::collect(node, filter)
    }

    /// Import data into this node. `extra` comes from [`DataHooks::extract_parent_data`].
    fn set_data(&self, node: &NodeRef, data: Option<Value>, extra: Option<Value>) -> SetDataResult {
        crate::data::distribute(node, data, extra)
    }

    /// Called once while the node is destroyed, after its children.
    fn on_destroy(&self, _node: &NodeRef) {}

    /// Rendering capability.
    fn as_renderable(&self) -> Option<&dyn Renderable> {
        None
    }

    /// Validation capability.
    fn as_validatable(&self) -> Option<&dyn Validatable> {
        None
    }

    /// Change-tracking capability.
    fn as_trackable(&self) -> Option<&dyn Trackable> {
        None
    }

    /// Emptiness override capability.
    fn as_emptiness_aware(&self) -> Option<&dyn EmptinessAware> {
        None
    }

    /// Data import/export hooks.
    fn as_data_hooks(&self) -> Option<&dyn DataHooks> {
        None
    }
}

/// A node that takes part in the configure phase.
pub trait Renderable: Send + Sync {
    /// Configure the node. Runs after resources are loaded and the bus is
    /// assigned, parent before children.
    fn configure(&self, node: &NodeRef) -> Result<(), CanopyError>;
}

/// A node that validates itself before a save.
///
/// Validation of such a node is expected to cover its own subtree, so the
/// save sequence does not recurse into its children.
pub trait Validatable: Send + Sync {
    /// Validate the node's current state.
    fn validate(&self, node: &NodeRef) -> Vec<ValidationError>;

    /// Put the node back into edit mode after a failed validation.
    fn reactivate_edit(&self, _node: &NodeRef) {}
}

/// A node that fires events which count as modifications.
pub trait Trackable: Send + Sync {
    /// Event names, in addition to `node:modified`, that mark the firing node as changed.
    fn modification_events(&self) -> Vec<&'static str>;
}

/// A node that overrides emptiness propagation.
pub trait EmptinessAware: Send + Sync {
    /// Emptiness of this node given its children's results.
    ///
    /// `None` falls back to the default combining rule.
    fn check_local_emptiness(&self, node: &NodeRef, children: &[Emptiness]) -> Option<Emptiness>;
}

/// Adjustments to the default data export/import.
pub trait DataHooks: Send + Sync {
    /// Data overriding the merged export of this node.
    fn local_data(&self, _node: &NodeRef) -> Option<Value> {
        None
    }

    /// Extra keys merged into the parent's export next to this node's own entry.
    fn data_for_parent(&self, _node: &NodeRef) -> Option<Map<String, Value>> {
        None
    }

    /// Cross-cutting data taken from the parent's original, un-sliced payload.
    fn extract_parent_data(&self, _parent_payload: &Map<String, Value>) -> Option<Value> {
        None
    }
}
