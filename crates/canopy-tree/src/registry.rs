//! Component type registry
//!
//! Children definitions name component types by string. The registry maps
//! those names to factories producing a fresh component per node.
//!
//! # Example
//!
//! ```ignore
//! let mut registry = ComponentRegistry::new();
//! registry.register("text", |_options| Ok(Arc::new(TextField::default())));
//! registry.register_list("rows", ChildDefinition::new("row"));
//! ```

use crate::component::{ChildDefinition, Component};
use crate::list::ListComponent;
use canopy_core::{CanopyError, Options};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

/// Builds the component of a new node from its declared options.
pub type ComponentFactory =
    Arc<dyn Fn(&Options) -> Result<Arc<dyn Component>, CanopyError> + Send + Sync>;

/// Registry of component types available to a tree.
#[derive(Default, Clone)]
pub struct ComponentRegistry {
    factories: HashMap<String, ComponentFactory>,
}

impl ComponentRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `name`, replacing any previous one.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&Options) -> Result<Arc<dyn Component>, CanopyError> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Arc::new(factory));
    }

    /// Register a list type whose items are built from `template`.
    pub fn register_list(&mut self, name: &str, template: ChildDefinition) {
        let type_name = name.to_string();
        self.register(name, move |_options| {
            Ok(Arc::new(ListComponent::new(type_name.clone(), template.clone())) as Arc<dyn Component>)
        });
    }

    /// Check if `name` has a registered factory.
    pub fn is_registered(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Create a component of type `name`.
    pub fn create(&self, name: &str, options: &Options) -> Result<Arc<dyn Component>, CanopyError> {
        let factory = self.factories.get(name).ok_or_else(|| {
            CanopyError::structural(format!("unknown component type '{name}'"))
        })?;
        factory(options)
    }

    /// Get all registered type names.
    pub fn registered_types(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

impl Debug for ComponentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.factories.keys().collect();
        types.sort();
        f.debug_struct("ComponentRegistry")
            .field("registered_types", &types)
            .finish()
    }
}
