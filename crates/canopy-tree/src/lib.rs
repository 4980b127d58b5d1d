//! Canopy Tree - Component Trees and Their Lifecycle
//!
//! A tree of [`Node`]s, each carrying a [`Component`] that declares its
//! children, resources and data behaviour. The [`LifecycleOrchestrator`]
//! builds a tree from a root: definitions are resolved and children
//! instantiated concurrently, resources are collected and loaded once for
//! the whole tree, a shared [`EventBus`] is handed down, nodes are
//! configured and the result is committed to its mount target.
//!
//! Data moves through the same tree: [`Node::get_data`] aggregates
//! children's exports bottom-up, [`Node::set_data`] slices a payload
//! top-down, and [`Node::cascade_state_change`] propagates emptiness.
//!
//! # Example
//!
//! ```ignore
//! let mut registry = ComponentRegistry::new();
//! registry.register("form", |_| Ok(Arc::new(Form::default())));
//! registry.register("text", |_| Ok(Arc::new(TextField::default())));
//!
//! let orchestrator = LifecycleOrchestrator::builder(Arc::new(registry), resources).build();
//! let root = Node::new(Arc::new(Form::default()), options);
//! orchestrator.load(&root, json!({"id": 7}), &[target]).await?;
//! let data = root.get_data();
//! ```

pub mod bus;
pub mod component;
pub mod data;
pub mod events;
pub mod instantiate;
pub mod lifecycle;
pub mod list;
pub mod node;
pub mod registry;
pub mod traversal;

pub use bus::{BusEvent, BusHandler, EventBus, SubscriptionId};
pub use component::{
    AsAny, ChildDefinition, ChildrenDefinition, Component, DataHooks, EmptinessAware,
    OptionSetter, OptionSetters, Renderable, Trackable, Validatable, CHILDREN_OPTION,
};
pub use data::{DataFilter, Emptiness, PendingEmptiness, SetDataResult};
pub use lifecycle::{
    BusyIndicator, ErrorDisplay, LifecycleOrchestrator, LifecycleOrchestratorBuilder,
    LifecycleState, LogErrorDisplay, MountTarget, Spinner, SpinnerFactory,
};
pub use list::ListComponent;
pub use node::{LoadContext, Node, NodeRef, READ_ONLY_OPTION, VISIBLE_OPTION};
pub use registry::{ComponentFactory, ComponentRegistry};
pub use traversal::{walk, Traversal};
