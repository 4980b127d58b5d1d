//! Test Components
//!
//! Small components covering each capability: [`Field`] is a renderable,
//! trackable leaf, [`Group`] a renderable composite, [`RequiredField`] a
//! validating leaf. Configure calls are appended to a shared [`PhaseLog`]
//! so tests can assert on ordering.

use canopy_core::{CanopyError, Options, ValidationError};
use canopy_resource::ResourceRequests;
use canopy_tree::{
    ChildDefinition, Component, ComponentRegistry, Node, NodeRef, Renderable, Trackable,
    Validatable, CHILDREN_OPTION,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Event a [`Field`] fires when edited.
pub const FIELD_EDITED: &str = "field:edited";

/// Shared, ordered record of lifecycle callbacks.
#[derive(Debug, Clone, Default)]
pub struct PhaseLog(Arc<Mutex<Vec<String>>>);

impl PhaseLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry.
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    /// Entries so far.
    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    /// Position of `entry`, if logged.
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.0.lock().iter().position(|e| e == entry)
    }
}

fn label(node: &NodeRef) -> String {
    node.option("label")
        .and_then(|v| v.as_str().map(str::to_string))
        .or_else(|| node.key())
        .unwrap_or_else(|| "root".to_string())
}

/// Leaf holding a scalar value.
///
/// Requests the `field` template and the localization bundle named by its
/// `l10n` option.
#[derive(Debug, Default)]
pub struct Field {
    log: PhaseLog,
}

impl Field {
    /// Field logging into `log`.
    pub fn new(log: PhaseLog) -> Self {
        Self { log }
    }
}

impl Component for Field {
    fn type_name(&self) -> &str {
        "field"
    }

    fn resource_requests(&self, node: &Node) -> ResourceRequests {
        let requests = ResourceRequests::new().with_template("field");
        match node.option("l10n").and_then(|v| v.as_str().map(str::to_string)) {
            Some(bundle) => requests.with_localization(bundle),
            None => requests,
        }
    }

    fn as_renderable(&self) -> Option<&dyn Renderable> {
        Some(self)
    }

    fn as_trackable(&self) -> Option<&dyn Trackable> {
        Some(self)
    }
}

impl Renderable for Field {
    fn configure(&self, node: &NodeRef) -> Result<(), CanopyError> {
        self.log.push(format!("configure:{}", label(node)));
        Ok(())
    }
}

impl Trackable for Field {
    fn modification_events(&self) -> Vec<&'static str> {
        vec![FIELD_EDITED]
    }
}

/// Composite whose children come from its `children` option.
#[derive(Debug, Default)]
pub struct Group {
    log: PhaseLog,
}

impl Group {
    /// Group logging into `log`.
    pub fn new(log: PhaseLog) -> Self {
        Self { log }
    }
}

impl Component for Group {
    fn type_name(&self) -> &str {
        "group"
    }

    fn resource_requests(&self, _node: &Node) -> ResourceRequests {
        ResourceRequests::new().with_template("group")
    }

    fn as_renderable(&self) -> Option<&dyn Renderable> {
        Some(self)
    }
}

impl Renderable for Group {
    fn configure(&self, node: &NodeRef) -> Result<(), CanopyError> {
        self.log.push(format!("configure:{}", label(node)));
        Ok(())
    }
}

/// Leaf that fails validation while its value is missing or blank.
#[derive(Debug, Default)]
pub struct RequiredField {
    reactivated: AtomicUsize,
}

impl RequiredField {
    /// How often the field was put back into edit mode.
    pub fn reactivated(&self) -> usize {
        self.reactivated.load(Ordering::SeqCst)
    }
}

impl Component for RequiredField {
    fn type_name(&self) -> &str {
        "required"
    }

    fn as_validatable(&self) -> Option<&dyn Validatable> {
        Some(self)
    }
}

impl Validatable for RequiredField {
    fn validate(&self, node: &NodeRef) -> Vec<ValidationError> {
        match node.model() {
            Some(Value::String(text)) if !text.trim().is_empty() => Vec::new(),
            _ => {
                let error = ValidationError::new(node.id(), "value is required");
                vec![match node.key() {
                    Some(key) => error.with_field(key),
                    None => error,
                }]
            }
        }
    }

    fn reactivate_edit(&self, _node: &NodeRef) {
        self.reactivated.fetch_add(1, Ordering::SeqCst);
    }
}

/// Registry with `field`, `group`, `required` and an `items` list of fields.
pub fn test_registry(log: &PhaseLog) -> ComponentRegistry {
    let mut registry = ComponentRegistry::new();
    let field_log = log.clone();
    registry.register("field", move |_| {
        Ok(Arc::new(Field::new(field_log.clone())) as Arc<dyn Component>)
    });
    let group_log = log.clone();
    registry.register("group", move |_| {
        Ok(Arc::new(Group::new(group_log.clone())) as Arc<dyn Component>)
    });
    registry.register("required", |_| {
        Ok(Arc::new(RequiredField::default()) as Arc<dyn Component>)
    });
    registry.register_list("items", ChildDefinition::new("field"));
    registry
}

/// Unloaded root [`Group`] declaring `children`.
pub fn group_root(log: &PhaseLog, children: Value) -> NodeRef {
    let mut options = Options::new();
    options.insert(CHILDREN_OPTION.to_string(), children);
    options.insert("label".to_string(), Value::String("root".to_string()));
    Node::new(Arc::new(Group::new(log.clone())), options)
}
