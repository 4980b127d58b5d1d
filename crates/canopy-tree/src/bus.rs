//! Shared event bus
//!
//! One bus per loaded tree, created by the orchestrator and handed down to
//! every node. Dispatch is synchronous and follows subscription order.
//! Handlers may subscribe or unsubscribe while an event is being dispatched;
//! such changes take effect from the next `fire`.
//!
//! The bus also caches per-bus singletons ("shared instances"), which is how
//! a tree's change tracker is found by everything that talks over the bus.

use crate::node::NodeRef;
use canopy_core::CanopyError;
use parking_lot::RwLock;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Handle returned by [`EventBus::on`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Event delivered to bus handlers.
#[derive(Clone)]
pub struct BusEvent {
    /// Event name
    pub name: String,
    /// Node that fired the event, if any
    pub source: Option<NodeRef>,
    /// Event arguments
    pub payload: Value,
}

impl BusEvent {
    /// Event without a source node.
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            source: None,
            payload,
        }
    }

    /// Event fired by `source`.
    pub fn from_node(name: impl Into<String>, source: &NodeRef, payload: Value) -> Self {
        Self {
            name: name.into(),
            source: Some(source.clone()),
            payload,
        }
    }
}

impl fmt::Debug for BusEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusEvent")
            .field("name", &self.name)
            .field("source", &self.source.as_ref().map(|node| node.id()))
            .field("payload", &self.payload)
            .finish()
    }
}

/// Callback invoked for every matching event.
pub type BusHandler = Arc<dyn Fn(&BusEvent) + Send + Sync>;

type SharedInstance = Arc<dyn Any + Send + Sync>;

static NEXT_BUS: AtomicU64 = AtomicU64::new(1);

/// Publish/subscribe channel shared by all nodes of one tree.
pub struct EventBus {
    id: u64,
    next_subscription: AtomicU64,
    handlers: RwLock<HashMap<String, Vec<(SubscriptionId, BusHandler)>>>,
    shared: RwLock<HashMap<String, SharedInstance>>,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            id: NEXT_BUS.fetch_add(1, Ordering::Relaxed),
            next_subscription: AtomicU64::new(1),
            handlers: RwLock::new(HashMap::new()),
            shared: RwLock::new(HashMap::new()),
        }
    }

    /// Process-unique bus number, for logs.
    pub fn id(&self) -> u64 {
        self.id
    }

    // ─── Subscriptions ───

    /// Subscribe `handler` to `event`.
    pub fn on(
        &self,
        event: impl Into<String>,
        handler: impl Fn(&BusEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .entry(event.into())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a subscription. Returns false if it was not registered.
    pub fn off(&self, event: &str, subscription: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let Some(list) = handlers.get_mut(event) else {
            return false;
        };
        let before = list.len();
        list.retain(|(id, _)| *id != subscription);
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(event);
        }
        removed
    }

    /// Number of handlers subscribed to `event`.
    pub fn listener_count(&self, event: &str) -> usize {
        self.handlers.read().get(event).map_or(0, Vec::len)
    }

    /// Deliver `event` to its subscribers, in subscription order.
    pub fn fire(&self, event: BusEvent) {
        let handlers: Vec<BusHandler> = self
            .handlers
            .read()
            .get(&event.name)
            .map(|list| list.iter().map(|(_, handler)| handler.clone()).collect())
            .unwrap_or_default();
        trace!(bus = self.id, event = %event.name, handlers = handlers.len(), "dispatch");
        for handler in handlers {
            handler(&event);
        }
    }

    /// Fire a sourceless event.
    pub fn emit(&self, name: &str, payload: Value) {
        self.fire(BusEvent::new(name, payload));
    }

    // ─── Shared instances ───

    /// Shared instance stored under `name`, if present and of type `T`.
    pub fn shared<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.shared
            .read()
            .get(name)
            .cloned()
            .and_then(|instance| instance.downcast::<T>().ok())
    }

    /// Shared instance stored under `name`, creating it with `init` on first use.
    ///
    /// Fails if another type already occupies `name`.
    pub fn shared_or_insert_with<T, F>(&self, name: &str, init: F) -> Result<Arc<T>, CanopyError>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Arc<T>,
    {
        let mut shared = self.shared.write();
        if let Some(existing) = shared.get(name) {
            return existing.clone().downcast::<T>().map_err(|_| {
                CanopyError::structural(format!(
                    "shared instance '{name}' has a different type"
                ))
            });
        }
        let instance = init();
        shared.insert(name.to_string(), instance.clone());
        Ok(instance)
    }

    /// Remove the shared instance stored under `name`.
    pub fn remove_shared(&self, name: &str) -> bool {
        self.shared.write().remove(name).is_some()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.handlers.read();
        f.debug_struct("EventBus")
            .field("id", &self.id)
            .field("events", &handlers.keys().collect::<Vec<_>>())
            .field("shared", &self.shared.read().keys().collect::<Vec<_>>())
            .finish()
    }
}
