//! Tree nodes
//!
//! A [`Node`] holds identity, a weak parent link, its attached and detached
//! children, its local model and its options. Nodes are shared as
//! [`NodeRef`] (`Arc<Node>`); parents own their children, children only
//! point back weakly.
//!
//! # Invariants
//!
//! - `id` never changes.
//! - A live child is in exactly one of its parent's `children` or
//!   `detached` maps.
//! - Detached subtrees have no bus and ignore bus events.
//!
//! Locks are never held while calling into components or other nodes;
//! accessors hand out snapshots.

use crate::bus::{BusEvent, EventBus, SubscriptionId};
use crate::component::{
    ChildrenDefinition, Component, OptionSetter, CHILDREN_OPTION,
};
use crate::data::{self, DataFilter, Emptiness, SetDataResult};
use crate::events;
use crate::lifecycle::LifecycleState;
use crate::registry::ComponentRegistry;
use canopy_core::{flag, merge_layers, CanopyError, NodeId, Options};
use canopy_resource::ResourceManager;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

/// Shared handle to a node.
pub type NodeRef = Arc<Node>;

/// Option: the node exports no data and reports empty when false.
pub const VISIBLE_OPTION: &str = "visible";

/// Option: the node is displayed but not editable.
pub const READ_ONLY_OPTION: &str = "readOnly";

/// Collaborators a node keeps from the load that created it, so that
/// children created later (list items) are built the same way.
#[derive(Clone)]
pub struct LoadContext {
    /// Component types available to the tree
    pub registry: Arc<ComponentRegistry>,
    /// Shared resource manager
    pub resources: Arc<ResourceManager>,
    /// Arguments the tree was loaded with
    pub args: Value,
}

impl fmt::Debug for LoadContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadContext")
            .field("registry", &self.registry)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

struct Subscription {
    bus: Weak<EventBus>,
    event: String,
    id: SubscriptionId,
}

/// Element of a component tree.
pub struct Node {
    id: NodeId,
    component: Arc<dyn Component>,
    setters: HashMap<&'static str, OptionSetter>,
    options: RwLock<Options>,
    extended_options: RwLock<Options>,
    insertion_target: RwLock<Option<String>>,
    parent: RwLock<Weak<Node>>,
    children: RwLock<IndexMap<String, NodeRef>>,
    detached: RwLock<IndexMap<String, NodeRef>>,
    model: RwLock<Option<Value>>,
    bus: RwLock<Option<Arc<EventBus>>>,
    subscriptions: Mutex<Vec<Subscription>>,
    load_context: RwLock<Option<Arc<LoadContext>>>,
    state: RwLock<LifecycleState>,
    setting_data: AtomicBool,
    destroyed: AtomicBool,
}

impl Node {
    /// Create a node whose options are the component defaults under `declared`.
    pub fn new(component: Arc<dyn Component>, declared: Options) -> NodeRef {
        Self::with_layers(component, &declared, None)
    }

    /// Create a node from the three option layers.
    pub fn with_layers(
        component: Arc<dyn Component>,
        declared: &Options,
        extended: Option<&Options>,
    ) -> NodeRef {
        let options = merge_layers(&component.default_options(), declared, extended);
        let setters = component.option_setters();
        let node = Arc::new(Self {
            id: NodeId::new(),
            component,
            setters,
            options: RwLock::new(options),
            extended_options: RwLock::new(Options::new()),
            insertion_target: RwLock::new(None),
            parent: RwLock::new(Weak::new()),
            children: RwLock::new(IndexMap::new()),
            detached: RwLock::new(IndexMap::new()),
            model: RwLock::new(None),
            bus: RwLock::new(None),
            subscriptions: Mutex::new(Vec::new()),
            load_context: RwLock::new(None),
            state: RwLock::new(LifecycleState::Created),
            setting_data: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
        });
        trace!(node = %node.id, component = node.component.type_name(), "node created");
        node
    }

    // ─── Identity and configuration ───

    /// Identifier assigned at construction.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Component attached to this node.
    pub fn component(&self) -> &Arc<dyn Component> {
        &self.component
    }

    /// Component type name.
    pub fn type_name(&self) -> &str {
        self.component.type_name()
    }

    /// Concrete component, if it is a `T`.
    pub fn component_as<T: Component + 'static>(&self) -> Option<&T> {
        let component: &dyn Component = self.component.as_ref();
        component.as_any().downcast_ref::<T>()
    }

    /// Snapshot of the effective options.
    pub fn options(&self) -> Options {
        self.options.read().clone()
    }

    /// One option value.
    pub fn option(&self, name: &str) -> Option<Value> {
        self.options.read().get(name).cloned()
    }

    /// Whether the node is visible (`visible` option, default true).
    pub fn is_visible(&self) -> bool {
        flag(&self.options.read(), VISIBLE_OPTION, true)
    }

    /// Whether the node is read-only (`readOnly` option, default false).
    pub fn is_read_only(&self) -> bool {
        flag(&self.options.read(), READ_ONLY_OPTION, false)
    }

    /// Change an option after construction and run its registered setter.
    ///
    /// With `recursive`, the change is also applied to every descendant that
    /// declares the option or registers a setter for it. Returns the number
    /// of nodes updated.
    pub fn set_option(self: &Arc<Self>, name: &str, value: Value, recursive: bool) -> usize {
        self.apply_option(name, &value);
        let mut updated = 1;
        if recursive {
            for (_, child) in self.children() {
                updated += child.set_option_descendant(name, &value);
            }
        }
        updated
    }

    fn set_option_descendant(self: &Arc<Self>, name: &str, value: &Value) -> usize {
        let mut updated = 0;
        if self.declares_option(name) {
            self.apply_option(name, value);
            updated += 1;
        }
        for (_, child) in self.children() {
            updated += child.set_option_descendant(name, value);
        }
        updated
    }

    fn apply_option(self: &Arc<Self>, name: &str, value: &Value) {
        self.options.write().insert(name.to_string(), value.clone());
        if let Some(setter) = self.setters.get(name) {
            setter(self, value);
        }
    }

    fn declares_option(&self, name: &str) -> bool {
        self.setters.contains_key(name) || self.options.read().contains_key(name)
    }

    /// Static children definition from the `children` option.
    pub fn declared_children(&self) -> Result<Option<ChildrenDefinition>, CanopyError> {
        match self.options.read().get(CHILDREN_OPTION) {
            None | Some(Value::Null) => Ok(None),
            Some(raw) => serde_json::from_value(raw.clone()).map(Some).map_err(|err| {
                CanopyError::structural(format!(
                    "invalid children definition on {}: {err}",
                    self.component.type_name()
                ))
            }),
        }
    }

    /// Options this node pushes down to its children, keyed by child key.
    pub fn extended_options(&self) -> Options {
        self.extended_options.read().clone()
    }

    pub(crate) fn set_extended_options(&self, extended: Options) {
        *self.extended_options.write() = extended;
    }

    /// Where this node renders inside its parent.
    pub fn insertion_target(&self) -> Option<String> {
        self.insertion_target.read().clone()
    }

    pub(crate) fn set_insertion_target(&self, target: Option<String>) {
        *self.insertion_target.write() = target;
    }

    // ─── Structure ───

    /// Parent node, if this is not a root and the parent is alive.
    pub fn parent(&self) -> Option<NodeRef> {
        self.parent.read().upgrade()
    }

    /// True when the node has no parent.
    pub fn is_root(&self) -> bool {
        self.parent().is_none()
    }

    pub(crate) fn set_parent(&self, parent: &NodeRef) {
        *self.parent.write() = Arc::downgrade(parent);
    }

    /// Local key of this node under its parent (attached or detached).
    pub fn key(&self) -> Option<String> {
        self.parent()?.key_of(self.id)
    }

    fn key_of(&self, id: NodeId) -> Option<String> {
        let find = |map: &IndexMap<String, NodeRef>| {
            map.iter()
                .find(|(_, child)| child.id == id)
                .map(|(key, _)| key.clone())
        };
        find(&self.children.read()).or_else(|| find(&self.detached.read()))
    }

    /// Attached children, in insertion order.
    pub fn children(&self) -> Vec<(String, NodeRef)> {
        self.children
            .read()
            .iter()
            .map(|(key, child)| (key.clone(), child.clone()))
            .collect()
    }

    /// Attached child under `key`.
    pub fn child(&self, key: &str) -> Option<NodeRef> {
        self.children.read().get(key).cloned()
    }

    /// Whether any child is attached.
    pub fn has_children(&self) -> bool {
        !self.children.read().is_empty()
    }

    /// Number of attached children.
    pub fn child_count(&self) -> usize {
        self.children.read().len()
    }

    /// Detached children, in detach order.
    pub fn detached_children(&self) -> Vec<(String, NodeRef)> {
        self.detached
            .read()
            .iter()
            .map(|(key, child)| (key.clone(), child.clone()))
            .collect()
    }

    /// Whether this node is currently in its parent's attached children.
    pub fn is_attached(&self) -> bool {
        self.parent()
            .is_some_and(|parent| parent.children.read().values().any(|c| c.id == self.id))
    }

    /// Attach `child` under `key`, inheriting this node's bus.
    pub fn attach_child(
        self: &Arc<Self>,
        key: impl Into<String>,
        child: NodeRef,
    ) -> Result<(), CanopyError> {
        let key = key.into();
        if self.is_destroyed() {
            return Err(CanopyError::Destroyed { node: self.id });
        }
        {
            let mut children = self.children.write();
            if children.contains_key(&key) || self.detached.read().contains_key(&key) {
                return Err(CanopyError::structural(format!(
                    "duplicate child key '{key}' under {}",
                    self.component.type_name()
                )));
            }
            children.insert(key.clone(), child.clone());
        }
        child.set_parent(self);
        if let Some(bus) = self.bus() {
            child.assign_bus(Some(bus));
        }
        trace!(parent = %self.id, child = %child.id, key, "child attached");
        Ok(())
    }

    /// Move a child to the detached map without destroying it.
    ///
    /// The child's subtree loses its bus and stops reacting to events.
    pub fn detach_child(&self, key: &str) -> Option<NodeRef> {
        let child = self.children.write().shift_remove(key)?;
        self.detached.write().insert(key.to_string(), child.clone());
        child.assign_bus(None);
        debug!(parent = %self.id, child = %child.id, key, "child detached");
        Some(child)
    }

    /// Move a detached child back, restoring this node's bus on its subtree.
    pub fn reattach_child(&self, key: &str) -> Option<NodeRef> {
        let child = self.detached.write().shift_remove(key)?;
        self.children.write().insert(key.to_string(), child.clone());
        child.assign_bus(self.bus());
        debug!(parent = %self.id, child = %child.id, key, "child reattached");
        Some(child)
    }

    /// Detach then destroy a child.
    pub fn remove_child(&self, key: &str) -> Option<NodeRef> {
        let child = self.detach_child(key)?;
        child.destroy();
        Some(child)
    }

    /// Direct child of `sub_root` on the attached ancestor chain of `node`.
    ///
    /// Returns `node` itself when it is a direct child. `None` when `node`
    /// is `sub_root`, is outside its subtree, or hangs below a detached link.
    pub fn search_in_descendants(sub_root: &Node, node: &NodeRef) -> Option<NodeRef> {
        let mut current = node.clone();
        loop {
            let parent = current.parent()?;
            if !current.is_attached() {
                return None;
            }
            if parent.id == sub_root.id {
                return Some(current);
            }
            current = parent;
        }
    }

    /// Whether `node` is this node or an attached descendant of it.
    pub fn contains(&self, node: &NodeRef) -> bool {
        node.id == self.id || Self::search_in_descendants(self, node).is_some()
    }

    // ─── Bus ───

    /// Bus this node talks over, if attached to a loaded tree.
    pub fn bus(&self) -> Option<Arc<EventBus>> {
        self.bus.read().clone()
    }

    /// Assign `bus` to this node and every attached descendant, parent first.
    pub fn assign_bus(&self, bus: Option<Arc<EventBus>>) {
        *self.bus.write() = bus.clone();
        for (_, child) in self.children() {
            child.assign_bus(bus.clone());
        }
    }

    /// Subscribe to `event` on the current bus on behalf of this node.
    ///
    /// The handler is skipped while the node is detached, after it moved to
    /// another bus, and once it is destroyed. Returns `None` without a bus.
    pub fn listen(
        self: &Arc<Self>,
        event: &str,
        handler: impl Fn(&NodeRef, &BusEvent) + Send + Sync + 'static,
    ) -> Option<SubscriptionId> {
        let bus = self.bus()?;
        let node = Arc::downgrade(self);
        let home = Arc::downgrade(&bus);
        let id = bus.on(event, move |event| {
            let Some(node) = node.upgrade() else { return };
            if node.is_destroyed() {
                return;
            }
            let current = node.bus();
            let same_bus = match (current, home.upgrade()) {
                (Some(current), Some(home)) => Arc::ptr_eq(&current, &home),
                _ => false,
            };
            if same_bus {
                handler(&node, event);
            }
        });
        self.subscriptions.lock().push(Subscription {
            bus: Arc::downgrade(&bus),
            event: event.to_string(),
            id,
        });
        Some(id)
    }

    /// Fire `name` on the bus with this node as source. No-op without a bus.
    pub fn fire(self: &Arc<Self>, name: &str, payload: Value) -> bool {
        match self.bus() {
            Some(bus) => {
                bus.fire(BusEvent::from_node(name, self, payload));
                true
            }
            None => false,
        }
    }

    /// Report that this node's data changed through interaction.
    pub fn mark_modified(self: &Arc<Self>) -> bool {
        self.fire(events::NODE_MODIFIED, Value::Null)
    }

    // ─── Data ───

    /// Local model.
    pub fn model(&self) -> Option<Value> {
        self.model.read().clone()
    }

    pub(crate) fn set_model(&self, model: Option<Value>) {
        *self.model.write() = model;
    }

    /// Export this node's data merged with its children's.
    ///
    /// Invisible nodes export nothing.
    pub fn get_data(self: &Arc<Self>) -> Option<Value> {
        if !self.is_visible() {
            return None;
        }
        self.component.get_data(self, None)
    }

    /// Export data, letting only children in `filter` contribute.
    pub fn get_data_filtered(self: &Arc<Self>, filter: &DataFilter) -> Option<Value> {
        if !self.is_visible() {
            return None;
        }
        self.component.get_data(self, Some(filter))
    }

    /// Import `data` into this node and its children.
    pub fn set_data(self: &Arc<Self>, data: Option<Value>) -> SetDataResult {
        self.set_data_with(data, None)
    }

    /// Import `data` with extra cross-cutting data from the parent payload.
    pub fn set_data_with(
        self: &Arc<Self>,
        data: Option<Value>,
        extra: Option<Value>,
    ) -> SetDataResult {
        if self.is_destroyed() {
            warn!(node = %self.id, "set_data on destroyed node ignored");
            return SetDataResult::failed();
        }
        let was_setting = self.setting_data.swap(true, Ordering::SeqCst);
        let result = self.component.set_data(self, data, extra);
        self.setting_data.store(was_setting, Ordering::SeqCst);
        if self.is_visible() {
            result
        } else {
            SetDataResult {
                emptiness: Emptiness::Empty,
                ..result
            }
        }
    }

    /// True while `set_data` is running on this node.
    pub fn is_setting_data(&self) -> bool {
        self.setting_data.load(Ordering::SeqCst)
    }

    /// Bottom-up emptiness of this subtree.
    pub fn cascade_state_change(self: &Arc<Self>) -> Emptiness {
        data::cascade_state_change(self)
    }

    // ─── Lifecycle ───

    /// Lifecycle state (meaningful on roots).
    pub fn state(&self) -> LifecycleState {
        *self.state.read()
    }

    pub(crate) fn set_state(&self, state: LifecycleState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            debug!(node = %self.id, from = ?previous, to = ?state, "lifecycle transition");
        }
    }

    /// Load collaborators recorded when the node was instantiated.
    pub fn load_context(&self) -> Option<Arc<LoadContext>> {
        self.load_context.read().clone()
    }

    pub(crate) fn set_load_context(&self, context: Arc<LoadContext>) {
        *self.load_context.write() = Some(context);
    }

    /// Whether [`Node::destroy`] has run.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Destroy children first, then this node.
    ///
    /// Drops bus subscriptions and leaves the parent's maps. Operations still
    /// in flight are not awaited; their completions find the node destroyed
    /// and are ignored.
    pub fn destroy(self: &Arc<Self>) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        let children: Vec<NodeRef> = {
            let mut attached = self.children.write();
            let mut detached = self.detached.write();
            attached
                .drain(..)
                .chain(detached.drain(..))
                .map(|(_, child)| child)
                .collect()
        };
        for child in children {
            child.destroy();
        }
        self.component.on_destroy(self);

        for subscription in self.subscriptions.lock().drain(..) {
            if let Some(bus) = subscription.bus.upgrade() {
                bus.off(&subscription.event, subscription.id);
            }
        }
        *self.bus.write() = None;

        if let Some(parent) = self.parent() {
            parent.forget_child(self.id);
        }
        debug!(node = %self.id, component = self.component.type_name(), "node destroyed");
    }

    fn forget_child(&self, id: NodeId) {
        self.children.write().retain(|_, child| child.id != id);
        self.detached.write().retain(|_, child| child.id != id);
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("component", &self.component.type_name())
            .field("children", &self.children.read().keys().collect::<Vec<_>>())
            .field("detached", &self.detached.read().keys().collect::<Vec<_>>())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::OptionSetters;
    use serde_json::json;

    struct Plain;

    impl Component for Plain {
        fn type_name(&self) -> &str {
            "plain"
        }
    }

    struct WithSetter(Arc<Mutex<Vec<Value>>>);

    impl Component for WithSetter {
        fn type_name(&self) -> &str {
            "with-setter"
        }

        fn default_options(&self) -> Options {
            let mut options = Options::new();
            options.insert("label".into(), json!("default"));
            options
        }

        fn option_setters(&self) -> OptionSetters {
            let seen = self.0.clone();
            let mut setters = OptionSetters::new();
            setters.insert(
                "label",
                Arc::new(move |_node: &NodeRef, value: &Value| seen.lock().push(value.clone())) as OptionSetter,
            );
            setters
        }
    }

    fn plain() -> NodeRef {
        Node::new(Arc::new(Plain), Options::new())
    }

    fn tree() -> (NodeRef, NodeRef, NodeRef, NodeRef) {
        let root = plain();
        let a = plain();
        let b = plain();
        let a1 = plain();
        root.attach_child("a", a.clone()).unwrap();
        root.attach_child("b", b.clone()).unwrap();
        a.attach_child("a1", a1.clone()).unwrap();
        (root, a, b, a1)
    }

    #[test]
    fn test_attach_sets_parent_and_key() {
        let (root, a, _, a1) = tree();
        assert!(root.is_root());
        assert_eq!(a.parent().unwrap().id(), root.id());
        assert_eq!(a1.key().as_deref(), Some("a1"));
        assert!(root.attach_child("a", plain()).is_err());
    }

    #[test]
    fn test_detach_moves_between_maps_and_drops_bus() {
        let (root, a, _, a1) = tree();
        root.assign_bus(Some(Arc::new(EventBus::new())));
        let detached = root.detach_child("a").unwrap();
        assert_eq!(detached.id(), a.id());
        assert!(root.child("a").is_none());
        assert_eq!(root.detached_children().len(), 1);
        assert!(a.bus().is_none());
        assert!(a1.bus().is_none());
        assert!(!a.is_attached());

        root.reattach_child("a").unwrap();
        assert!(root.detached_children().is_empty());
        assert!(a1.bus().is_some());
        assert!(a.is_attached());
    }

    #[test]
    fn test_search_in_descendants() {
        let (root, a, b, a1) = tree();
        assert_eq!(Node::search_in_descendants(&root, &a1).unwrap().id(), a.id());
        assert_eq!(Node::search_in_descendants(&root, &b).unwrap().id(), b.id());
        assert!(Node::search_in_descendants(&root, &root).is_none());
        assert!(Node::search_in_descendants(&a, &b).is_none());
        root.detach_child("a");
        assert!(Node::search_in_descendants(&root, &a1).is_none());
    }

    #[test]
    fn test_destroy_children_first_and_unlinks() {
        let (root, a, _, a1) = tree();
        let bus = Arc::new(EventBus::new());
        root.assign_bus(Some(bus.clone()));
        a1.listen("ping", |_, _| {});
        assert_eq!(bus.listener_count("ping"), 1);

        root.remove_child("a");
        assert!(a.is_destroyed());
        assert!(a1.is_destroyed());
        assert!(root.child("a").is_none());
        assert!(root.detached_children().is_empty());
        assert_eq!(bus.listener_count("ping"), 0);
    }

    #[test]
    fn test_detached_listener_is_silent() {
        let (root, a, _, _) = tree();
        let bus = Arc::new(EventBus::new());
        root.assign_bus(Some(bus.clone()));
        let hits = Arc::new(Mutex::new(0));
        let counter = hits.clone();
        a.listen("ping", move |_, _| *counter.lock() += 1);

        bus.emit("ping", Value::Null);
        root.detach_child("a");
        bus.emit("ping", Value::Null);
        root.reattach_child("a");
        bus.emit("ping", Value::Null);
        assert_eq!(*hits.lock(), 2);
    }

    #[test]
    fn test_set_option_runs_setter_recursively() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let root = plain();
        let mid = plain();
        let leaf = Node::new(Arc::new(WithSetter(seen.clone())), Options::new());
        root.attach_child("mid", mid.clone()).unwrap();
        mid.attach_child("leaf", leaf.clone()).unwrap();

        let updated = root.set_option("label", json!("changed"), true);
        assert_eq!(updated, 2);
        assert_eq!(leaf.option("label"), Some(json!("changed")));
        assert!(mid.option("label").is_none());
        assert_eq!(*seen.lock(), vec![json!("changed")]);
    }

    #[test]
    fn test_declared_children_parse() {
        let mut options = Options::new();
        options.insert(
            CHILDREN_OPTION.into(),
            json!({"name": {"component": "text", "options": {"label": "Name"}}}),
        );
        let node = Node::new(Arc::new(Plain), options);
        let definition = node.declared_children().unwrap().unwrap();
        assert_eq!(definition["name"].component, "text");

        let mut bad = Options::new();
        bad.insert(CHILDREN_OPTION.into(), json!(["not", "a", "map"]));
        assert!(Node::new(Arc::new(Plain), bad).declared_children().is_err());
    }

    #[test]
    fn test_component_downcast() {
        let node = plain();
        assert!(node.component_as::<Plain>().is_some());
        assert!(node.component_as::<WithSetter>().is_none());
    }
}
