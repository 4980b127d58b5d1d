//! Change tracking over a tree's event bus
//!
//! One [`ChangeTracker`] exists per bus, created lazily and cached as a bus
//! shared instance. It listens for `node:modified` (plus configured and
//! component-declared events) and records the firing nodes.
//!
//! In [`TrackingMode::Changed`] the nodes accumulate in an ordered dirty
//! set, deduplicated by node id, until a [`ChangesBag`] built from it is
//! committed. In [`TrackingMode::Immediate`] nothing is buffered and every
//! change is forwarded to observers as it happens.
//!
//! The dirty set holds weak references: a node dropped from the tree
//! disappears from the set rather than being kept alive by it. Each entry
//! carries the generation of its latest change, so a bag only removes the
//! changes it actually saw.

use crate::bag::ChangesBag;
use canopy_core::{CanopyError, NodeId, SaveStrategyKind};
use canopy_tree::events::NODE_MODIFIED;
use canopy_tree::{EventBus, Node, NodeRef, SubscriptionId, Traversal};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, trace, warn};

/// Bus shared-instance name of the tracker.
pub const TRACKER_SHARED_KEY: &str = "changes-tracker";

/// How a tracker treats observed changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackingMode {
    /// Accumulate changed nodes until a bag is committed
    Changed,
    /// Forward every change without buffering
    Immediate,
}

impl TrackingMode {
    /// Tracking mode needed by a save strategy. `All` and `None` track nothing.
    pub fn for_strategy(kind: SaveStrategyKind) -> Option<Self> {
        match kind {
            SaveStrategyKind::Changed => Some(Self::Changed),
            SaveStrategyKind::Immediate => Some(Self::Immediate),
            SaveStrategyKind::All | SaveStrategyKind::None => None,
        }
    }
}

/// Notification delivered to tracker observers.
#[derive(Clone)]
pub enum TrackerEvent {
    /// A node reported a change (for `Changed`: the first time since the last commit)
    NodeChanged(NodeRef),
    /// The dirty set went from empty to non-empty
    BecameDirty,
}

impl fmt::Debug for TrackerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NodeChanged(node) => f.debug_tuple("NodeChanged").field(&node.id()).finish(),
            Self::BecameDirty => f.write_str("BecameDirty"),
        }
    }
}

/// Handle returned by [`ChangeTracker::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Observer = Arc<dyn Fn(&TrackerEvent) + Send + Sync>;

struct DirtyEntry {
    node: Weak<Node>,
    generation: u64,
}

impl DirtyEntry {
    fn is_live(&self) -> bool {
        self.node.strong_count() > 0
    }
}

/// Records which nodes of a tree changed.
pub struct ChangeTracker {
    mode: TrackingMode,
    bus: Weak<EventBus>,
    dirty: Mutex<IndexMap<NodeId, DirtyEntry>>,
    generation: AtomicU64,
    subscriptions: Mutex<Option<Vec<(String, SubscriptionId)>>>,
    observers: RwLock<Vec<(ObserverId, Observer)>>,
    next_observer: AtomicU64,
}

impl ChangeTracker {
    fn new(mode: TrackingMode, bus: &Arc<EventBus>) -> Self {
        Self {
            mode,
            bus: Arc::downgrade(bus),
            dirty: Mutex::new(IndexMap::new()),
            generation: AtomicU64::new(0),
            subscriptions: Mutex::new(None),
            observers: RwLock::new(Vec::new()),
            next_observer: AtomicU64::new(1),
        }
    }

    /// The tracker of `bus`, created on first use.
    ///
    /// A bus carries a single tracker; asking for it in another mode is a
    /// structural error.
    pub fn for_bus(bus: &Arc<EventBus>, mode: TrackingMode) -> Result<Arc<Self>, CanopyError> {
        let tracker =
            bus.shared_or_insert_with(TRACKER_SHARED_KEY, || Arc::new(Self::new(mode, bus)))?;
        if tracker.mode != mode {
            return Err(CanopyError::structural(format!(
                "bus {} already tracks changes in {:?} mode, not {mode:?}",
                bus.id(),
                tracker.mode
            )));
        }
        Ok(tracker)
    }

    /// The tracker already living on `bus`, if any.
    pub fn existing(bus: &EventBus) -> Option<Arc<Self>> {
        bus.shared::<Self>(TRACKER_SHARED_KEY)
    }

    /// Tracking mode.
    pub fn mode(&self) -> TrackingMode {
        self.mode
    }

    /// Whether `track` is active.
    pub fn is_tracking(&self) -> bool {
        self.subscriptions.lock().is_some()
    }

    /// Start listening for `node:modified` and `extra_events`.
    ///
    /// Returns false (and logs) when already tracking or when the bus is gone.
    pub fn track(self: &Arc<Self>, extra_events: &[String]) -> bool {
        let Some(bus) = self.bus.upgrade() else {
            warn!("change tracker outlived its bus; not tracking");
            return false;
        };
        let mut guard = self.subscriptions.lock();
        if guard.is_some() {
            error!(bus = bus.id(), "change tracker is already tracking");
            return false;
        }

        let mut names: Vec<String> = vec![NODE_MODIFIED.to_string()];
        for event in extra_events {
            if !names.contains(event) {
                names.push(event.clone());
            }
        }

        let subscriptions = names
            .into_iter()
            .map(|name| {
                let tracker = Arc::downgrade(self);
                let id = bus.on(name.clone(), move |event| {
                    let Some(tracker) = tracker.upgrade() else { return };
                    match &event.source {
                        Some(node) => tracker.mark_changed(node),
                        None => trace!(event = %event.name, "modification event without source"),
                    }
                });
                (name, id)
            })
            .collect::<Vec<_>>();
        debug!(
            bus = bus.id(),
            mode = ?self.mode,
            events = subscriptions.len(),
            "change tracking started"
        );
        *guard = Some(subscriptions);
        true
    }

    /// Start tracking with the events declared by `Trackable` components in
    /// `root`'s subtree added to `extra_events`.
    pub fn track_tree(self: &Arc<Self>, root: &NodeRef, extra_events: &[String]) -> bool {
        let mut events = extra_events.to_vec();
        for node in canopy_tree::traversal::collect(root, Traversal::ParentFirst) {
            let Some(trackable) = node.component().as_trackable() else {
                continue;
            };
            for name in trackable.modification_events() {
                if !events.iter().any(|known| known == name) {
                    events.push(name.to_string());
                }
            }
        }
        self.track(&events)
    }

    /// Stop listening. The dirty set is kept.
    pub fn untrack(&self) {
        let Some(subscriptions) = self.subscriptions.lock().take() else {
            return;
        };
        if let Some(bus) = self.bus.upgrade() {
            for (event, id) in subscriptions {
                bus.off(&event, id);
            }
        }
    }

    /// Record a change of `node`, as if it had fired `node:modified`.
    ///
    /// A repeated change keeps the node's position but stamps a new
    /// generation on its entry.
    pub fn mark_changed(&self, node: &NodeRef) {
        match self.mode {
            TrackingMode::Immediate => {
                self.notify(&TrackerEvent::NodeChanged(node.clone()));
            }
            TrackingMode::Changed => {
                let (inserted, became_dirty) = {
                    let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
                    let mut dirty = self.dirty.lock();
                    dirty.retain(|_, entry| entry.is_live());
                    if let Some(entry) = dirty.get_mut(&node.id()) {
                        entry.generation = generation;
                        (false, false)
                    } else {
                        dirty.insert(
                            node.id(),
                            DirtyEntry {
                                node: Arc::downgrade(node),
                                generation,
                            },
                        );
                        (true, dirty.len() == 1)
                    }
                };
                if inserted {
                    trace!(node = %node.id(), "node marked dirty");
                    self.notify(&TrackerEvent::NodeChanged(node.clone()));
                }
                if became_dirty {
                    self.notify(&TrackerEvent::BecameDirty);
                }
            }
        }
    }

    /// Live dirty nodes, in the order they first changed.
    pub fn dirty_nodes(&self) -> Vec<NodeRef> {
        self.dirty
            .lock()
            .values()
            .filter_map(|entry| entry.node.upgrade())
            .collect()
    }

    fn dirty_snapshot(&self) -> Vec<(NodeRef, u64)> {
        self.dirty
            .lock()
            .values()
            .filter_map(|entry| entry.node.upgrade().map(|node| (node, entry.generation)))
            .collect()
    }

    /// Whether `node` is in the dirty set.
    pub fn is_dirty(&self, node: &NodeRef) -> bool {
        self.dirty.lock().contains_key(&node.id())
    }

    /// Number of live entries in the dirty set.
    pub fn len(&self) -> usize {
        self.dirty
            .lock()
            .values()
            .filter(|entry| entry.is_live())
            .count()
    }

    /// True when nothing live is dirty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every tracked change.
    pub fn clear(&self) {
        self.dirty.lock().clear();
    }

    /// Projection of the dirty set onto the direct children of `sub_root`.
    pub fn changes_bag(self: &Arc<Self>, sub_root: &NodeRef) -> ChangesBag {
        ChangesBag::build(self.clone(), sub_root, self.dirty_snapshot())
    }

    /// Remove entries still at the generation they were seen with.
    ///
    /// An entry changed again since then stays dirty.
    pub(crate) fn remove_entries(&self, seen: &[(NodeId, u64)]) -> usize {
        let mut dirty = self.dirty.lock();
        seen.iter()
            .filter(|(id, generation)| {
                let current = dirty.get(id).map(|entry| entry.generation);
                if current == Some(*generation) {
                    dirty.shift_remove(id);
                    true
                } else {
                    if current.is_some() {
                        trace!(node = %id, "entry changed after projection; kept dirty");
                    }
                    false
                }
            })
            .count()
    }

    /// Mark the direct children of `root` that receive data from `data` as changed.
    ///
    /// Used when a tree is filled with data that has not been persisted yet.
    pub fn initialize_with_data_model(&self, root: &NodeRef, data: &serde_json::Value) -> usize {
        let Some(map) = data.as_object() else {
            return 0;
        };
        let mut marked = 0;
        for (key, child) in root.children() {
            if map.get(&key).is_some_and(|value| !value.is_null()) {
                self.mark_changed(&child);
                marked += 1;
            }
        }
        marked
    }

    // ─── Observers ───

    /// Observe tracker events.
    pub fn subscribe(&self, observer: impl Fn(&TrackerEvent) + Send + Sync + 'static) -> ObserverId {
        let id = ObserverId(self.next_observer.fetch_add(1, Ordering::Relaxed));
        self.observers.write().push((id, Arc::new(observer)));
        id
    }

    /// Stop observing.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(known, _)| *known != id);
        observers.len() != before
    }

    fn notify(&self, event: &TrackerEvent) {
        let observers: Vec<Observer> = self
            .observers
            .read()
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();
        for observer in observers {
            observer(event);
        }
    }
}

impl fmt::Debug for ChangeTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeTracker")
            .field("mode", &self.mode)
            .field("dirty", &self.len())
            .field("tracking", &self.is_tracking())
            .finish()
    }
}
