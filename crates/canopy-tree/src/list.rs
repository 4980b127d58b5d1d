//! List component
//!
//! A node whose children are items built from one template definition.
//! The list exports an array with one entry per item and imports an array
//! by rebuilding its items. Item subtrees resolve asynchronously, so the
//! emptiness reported by `set_data` stays pending until every item has been
//! populated; population is driven on the current tokio runtime when there
//! is one, and otherwise by whoever awaits the pending result.

use crate::component::{ChildDefinition, Component, Trackable};
use crate::data::{DataFilter, Emptiness, PendingEmptiness, SetDataResult};
use crate::events;
use crate::instantiate::{instantiate_child, resolve_subtree};
use crate::lifecycle::{configure_subtree, load_subtree_resources};
use crate::node::{LoadContext, NodeRef};
use canopy_core::{flag, CanopyError};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

/// Option: maximum number of items; further additions are refused.
pub const MAX_ITEMS_OPTION: &str = "maxItems";

/// Option: leave items without data out of the export instead of exporting null.
pub const SKIP_EMPTY_ITEMS_OPTION: &str = "skipEmptyItems";

/// Key under which the list's extended options address its items.
pub const TEMPLATE_KEY: &str = "template";

/// Prefix of generated item keys.
pub const ITEM_KEY_PREFIX: &str = "item";

/// Component of a list node.
pub struct ListComponent {
    type_name: String,
    template: ChildDefinition,
    next_item: AtomicUsize,
    population: Mutex<Option<PendingEmptiness>>,
}

impl ListComponent {
    /// List of type `type_name` whose items are built from `template`.
    pub fn new(type_name: impl Into<String>, template: ChildDefinition) -> Self {
        Self {
            type_name: type_name.into(),
            template,
            next_item: AtomicUsize::new(1),
            population: Mutex::new(None),
        }
    }

    /// The list component of `node`, if it is a list.
    pub fn of(node: &NodeRef) -> Option<&ListComponent> {
        node.component_as::<ListComponent>()
    }

    /// Item template.
    pub fn template(&self) -> &ChildDefinition {
        &self.template
    }

    /// Items in order.
    pub fn items(&self, node: &NodeRef) -> Vec<NodeRef> {
        node.children().into_iter().map(|(_, item)| item).collect()
    }

    /// Wait until the last `set_data` finished populating its items.
    pub async fn settled(&self) {
        let pending = self.population.lock().clone();
        if let Some(pending) = pending {
            pending.resolve().await;
        }
    }

    fn max_items(node: &NodeRef) -> Option<usize> {
        node.option(MAX_ITEMS_OPTION)
            .and_then(|v| v.as_u64())
            .and_then(|v| usize::try_from(v).ok())
    }

    fn context(&self, node: &NodeRef) -> Result<Arc<LoadContext>, CanopyError> {
        node.load_context().ok_or_else(|| {
            CanopyError::structural(format!(
                "list {} has not been loaded; items cannot be created",
                self.type_name
            ))
        })
    }

    fn create_item(
        &self,
        node: &NodeRef,
        context: &Arc<LoadContext>,
    ) -> Result<(String, NodeRef), CanopyError> {
        let item = instantiate_child(
            node,
            TEMPLATE_KEY,
            &self.template,
            &node.extended_options(),
            context,
        )?;
        let key = format!(
            "{ITEM_KEY_PREFIX}{}",
            self.next_item.fetch_add(1, Ordering::Relaxed)
        );
        node.attach_child(key.clone(), item.clone())?;
        Ok((key, item))
    }

    /// Add an item, optionally with data.
    ///
    /// Returns `None` without adding when the list is full; that fires
    /// `list:max-reached`.
    pub async fn add_item(
        &self,
        node: &NodeRef,
        data: Option<Value>,
    ) -> Result<Option<NodeRef>, CanopyError> {
        if Self::max_items(node).is_some_and(|max| node.child_count() >= max) {
            node.fire(events::LIST_MAX_REACHED, json!({ "count": node.child_count() }));
            return Ok(None);
        }
        let context = self.context(node)?;
        let (key, item) = self.create_item(node, &context)?;
        populate(&item, &context).await?;
        if data.is_some() && !item.is_destroyed() {
            item.set_data(data);
        }
        if !node.is_setting_data() {
            node.fire(events::LIST_CHILD_ADDED, json!({ "key": key }));
        }
        Ok(Some(item))
    }

    /// Remove and destroy the item under `key`.
    pub fn remove_item(&self, node: &NodeRef, key: &str) -> Option<NodeRef> {
        let removed = node.remove_child(key)?;
        if !node.is_setting_data() {
            node.fire(events::LIST_CHILD_REMOVED, json!({ "key": key }));
        }
        Some(removed)
    }

    /// Remove and destroy every item.
    pub fn clear(&self, node: &NodeRef) {
        for (key, _) in node.children() {
            node.remove_child(&key);
        }
        if !node.is_setting_data() {
            node.fire(events::LIST_CLEARED, Value::Null);
        }
    }
}

/// Resolve, load and configure a freshly created item subtree.
async fn populate(item: &NodeRef, context: &Arc<LoadContext>) -> Result<(), CanopyError> {
    resolve_subtree(item, context).await?;
    load_subtree_resources(item, &context.resources).await?;
    configure_subtree(item)
}

impl Component for ListComponent {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn get_data(&self, node: &NodeRef, filter: Option<&DataFilter>) -> Option<Value> {
        let skip_empty = flag(&node.options(), SKIP_EMPTY_ITEMS_OPTION, false);
        let items: Vec<Value> = node
            .children()
            .into_iter()
            .filter(|(_, item)| filter.map_or(true, |f| f.admits(item)))
            .filter_map(|(_, item)| match item.get_data() {
                Some(value) => Some(value),
                None if skip_empty => None,
                None => Some(Value::Null),
            })
            .collect();
        if items.is_empty() {
            None
        } else {
            Some(Value::Array(items))
        }
    }

    fn set_data(&self, node: &NodeRef, data: Option<Value>, _extra: Option<Value>) -> SetDataResult {
        let values = match data {
            None | Some(Value::Null) => {
                let unresolved = self
                    .population
                    .lock()
                    .clone()
                    .filter(|population| population.peek().is_none());
                return SetDataResult::ok(match unresolved {
                    Some(population) => Emptiness::Pending(population),
                    None => node.cascade_state_change(),
                });
            }
            Some(Value::Array(values)) => values,
            Some(other) => {
                error!(
                    node = %node.id(),
                    list = %self.type_name,
                    "list data must be an array, got {other}"
                );
                return SetDataResult::failed();
            }
        };

        let context = match self.context(node) {
            Ok(context) => context,
            Err(err) => {
                error!(node = %node.id(), %err, "cannot set list data");
                return SetDataResult::failed();
            }
        };

        self.clear(node);
        if values.is_empty() {
            *self.population.lock() = None;
            return SetDataResult::ok(Emptiness::Empty);
        }

        let mut items = Vec::with_capacity(values.len());
        for value in values {
            match self.create_item(node, &context) {
                Ok((_, item)) => items.push((item, value)),
                Err(err) => {
                    error!(node = %node.id(), %err, "list item could not be created");
                    return SetDataResult::failed();
                }
            }
        }
        debug!(node = %node.id(), items = items.len(), "populating list items");

        let list = node.clone();
        let population = PendingEmptiness::new(async move {
            let mut results = Vec::with_capacity(items.len());
            for (item, value) in items {
                if let Err(err) = populate(&item, &context).await {
                    error!(list = %list.id(), item = %item.id(), %err, "list item failed to populate");
                    continue;
                }
                if item.is_destroyed() {
                    continue;
                }
                results.push(item.set_data(Some(value)).emptiness);
            }
            Emptiness::combine(&results).resolve().await
        });

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let driver = population.clone();
            handle.spawn(async move {
                driver.resolve().await;
            });
        }
        *self.population.lock() = Some(population.clone());
        SetDataResult::ok(Emptiness::Pending(population))
    }

    fn as_trackable(&self) -> Option<&dyn Trackable> {
        Some(self)
    }
}

impl Trackable for ListComponent {
    fn modification_events(&self) -> Vec<&'static str> {
        vec![
            events::LIST_CHILD_ADDED,
            events::LIST_CHILD_REMOVED,
            events::LIST_CLEARED,
        ]
    }
}
