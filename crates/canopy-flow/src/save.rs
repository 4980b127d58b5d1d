//! Save sequencing
//!
//! A save runs strictly in order: validate the subtree, extract data per
//! strategy, submit through the [`SaveProxy`], then commit tracked changes
//! and notify listeners. Validation failures stop the save before anything
//! is submitted. A failed submission leaves tracked changes in place so the
//! next save retries them.
//!
//! Submissions are not cancellable. If the root is destroyed while one is in
//! flight, its completion is reported to the caller but nothing is
//! committed, fired or notified.

use crate::events::{DISCARD_CHANGES, REQUEST_SAVE, SAVE_ERROR, SAVE_SUCCESS};
use crate::runtime::spawn_detached;
use crate::strategy::{strategy_for, Extraction, SaveStrategy};
use crate::tracker::{ChangeTracker, ObserverId, TrackerEvent, TrackingMode};
use async_trait::async_trait;
use canopy_core::{BusyConfig, CanopyError, SaveConfig, SaveStrategyKind, ValidationError};
use canopy_tree::{BusyIndicator, NodeRef};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Outbound side of a save.
#[async_trait]
pub trait SaveProxy: Send + Sync {
    /// Submit `payload`. The response is handed to save listeners.
    ///
    /// Server-side validation failures should be returned as
    /// [`CanopyError::Validation`] so callers can show them inline.
    async fn submit(&self, payload: Value, metadata: Option<Value>) -> Result<Value, CanopyError>;
}

/// Payload and metadata produced by a prepare hook.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedSave {
    /// Body to submit
    pub payload: Value,
    /// Side-channel information for the proxy
    pub metadata: Option<Value>,
}

/// Maps extracted data into what is actually submitted.
pub type PrepareHook =
    Arc<dyn Fn(&NodeRef, Value) -> Result<PreparedSave, CanopyError> + Send + Sync>;

/// Notification delivered to save listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveEvent {
    /// The proxy accepted the submission
    Succeeded(Value),
    /// The proxy rejected the submission
    Failed(CanopyError),
    /// Validation failed, locally or on the server
    Invalid(Vec<ValidationError>),
}

/// Callback receiving [`SaveEvent`]s.
pub type SaveListener = Arc<dyn Fn(&SaveEvent) + Send + Sync>;

/// How a save ended when it did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    /// Submitted and accepted
    Saved {
        /// Proxy response
        response: Value,
        /// Tracked changes committed
        committed: usize,
    },
    /// The strategy found nothing to submit
    NothingToSave,
    /// Saving is disabled for this tree
    Disabled,
    /// Accepted, but the root was destroyed while the submission was in flight
    Ignored {
        /// Proxy response
        response: Value,
    },
}

/// Validate `root`'s subtree, returning the nodes that reported failures.
///
/// A `Validatable` node covers its own subtree, so recursion stops there.
/// Invisible nodes export nothing and are skipped.
pub fn validate_subtree(root: &NodeRef) -> Vec<(NodeRef, Vec<ValidationError>)> {
    let mut failures = Vec::new();
    collect_failures(root, &mut failures);
    failures
}

fn collect_failures(node: &NodeRef, failures: &mut Vec<(NodeRef, Vec<ValidationError>)>) {
    if !node.is_visible() {
        return;
    }
    if let Some(validatable) = node.component().as_validatable() {
        let errors = validatable.validate(node);
        if !errors.is_empty() {
            failures.push((node.clone(), errors));
        }
        return;
    }
    for (_, child) in node.children() {
        collect_failures(&child, failures);
    }
}

/// Saves one tree through a [`SaveProxy`].
pub struct SaveHandler {
    root: NodeRef,
    strategy: Arc<dyn SaveStrategy>,
    proxy: Arc<dyn SaveProxy>,
    prepare: Option<PrepareHook>,
    busy: Option<Arc<BusyIndicator>>,
    listeners: RwLock<Vec<SaveListener>>,
    observer: Mutex<Option<ObserverId>>,
}

impl SaveHandler {
    /// Start building a handler for the tree under `root`.
    pub fn builder(root: NodeRef, proxy: Arc<dyn SaveProxy>) -> SaveHandlerBuilder {
        SaveHandlerBuilder {
            root,
            proxy,
            kind: SaveStrategyKind::default(),
            track_events: Vec::new(),
            prepare: None,
            busy: None,
            busy_enabled: true,
        }
    }

    /// Root of the saved tree.
    pub fn root(&self) -> &NodeRef {
        &self.root
    }

    /// Active strategy.
    pub fn strategy_kind(&self) -> SaveStrategyKind {
        self.strategy.kind()
    }

    /// Change tracker, for tracking strategies.
    pub fn tracker(&self) -> Option<&Arc<ChangeTracker>> {
        self.strategy.tracker()
    }

    /// Receive save events.
    pub fn add_listener(&self, listener: impl Fn(&SaveEvent) + Send + Sync + 'static) {
        self.listeners.write().push(Arc::new(listener));
    }

    /// Mark the direct children that receive `data` as changed.
    ///
    /// Only meaningful for tracking strategies; returns the number of children marked.
    pub fn initialize_with_data_model(&self, data: &Value) -> usize {
        self.tracker()
            .map_or(0, |tracker| tracker.initialize_with_data_model(&self.root, data))
    }

    /// Validate, extract, submit and commit.
    pub async fn save(&self) -> Result<SaveOutcome, CanopyError> {
        if self.root.is_destroyed() {
            return Err(CanopyError::Destroyed {
                node: self.root.id(),
            });
        }
        if self.strategy.kind() == SaveStrategyKind::None {
            debug!(root = %self.root.id(), "saving disabled");
            return Ok(SaveOutcome::Disabled);
        }
        self.validate()?;
        let Some(extraction) = self.strategy.extract(&self.root) else {
            debug!(root = %self.root.id(), "nothing to save");
            return Ok(SaveOutcome::NothingToSave);
        };
        self.submit(extraction).await
    }

    /// Save the single change of `node`. Used by the immediate strategy.
    pub async fn save_change(&self, node: &NodeRef) -> Result<SaveOutcome, CanopyError> {
        if self.root.is_destroyed() {
            return Err(CanopyError::Destroyed {
                node: self.root.id(),
            });
        }
        self.validate()?;
        let Some(extraction) = self.strategy.extract_change(&self.root, node) else {
            return Ok(SaveOutcome::NothingToSave);
        };
        self.submit(extraction).await
    }

    fn validate(&self) -> Result<(), CanopyError> {
        let failures = validate_subtree(&self.root);
        if failures.is_empty() {
            return Ok(());
        }
        let mut errors = Vec::new();
        for (node, node_errors) in failures {
            if let Some(validatable) = node.component().as_validatable() {
                validatable.reactivate_edit(&node);
            }
            errors.extend(node_errors);
        }
        info!(root = %self.root.id(), errors = errors.len(), "save blocked by validation");
        self.notify(&SaveEvent::Invalid(errors.clone()));
        Err(CanopyError::validation(errors))
    }

    async fn submit(&self, extraction: Extraction) -> Result<SaveOutcome, CanopyError> {
        let data = extraction.data.unwrap_or_else(|| Value::Object(Map::new()));
        let prepared = match &self.prepare {
            Some(hook) => hook(&self.root, data)?,
            None => PreparedSave {
                payload: data,
                metadata: None,
            },
        };

        let submission = async {
            let result = self.proxy.submit(prepared.payload, prepared.metadata).await;
            if let Some(busy) = &self.busy {
                busy.hide(false);
            }
            result
        };
        let result = match &self.busy {
            Some(busy) => futures::join!(busy.show(), submission).1,
            None => submission.await,
        };

        if self.root.is_destroyed() {
            debug!(root = %self.root.id(), "save completed after the root was destroyed");
            return result.map(|response| SaveOutcome::Ignored { response });
        }

        match result {
            Ok(response) => {
                let committed = extraction.bag.map_or(0, |bag| bag.commit());
                info!(root = %self.root.id(), committed, "save succeeded");
                self.notify(&SaveEvent::Succeeded(response.clone()));
                self.root.fire(SAVE_SUCCESS, response.clone());
                Ok(SaveOutcome::Saved {
                    response,
                    committed,
                })
            }
            Err(err) => {
                warn!(
                    root = %self.root.id(),
                    error = %err,
                    category = err.category(),
                    "save failed"
                );
                let event = match err.validation_errors() {
                    Some(errors) => SaveEvent::Invalid(errors.to_vec()),
                    None => SaveEvent::Failed(err.clone()),
                };
                self.notify(&event);
                self.root
                    .fire(SAVE_ERROR, serde_json::to_value(&err).unwrap_or(Value::Null));
                Err(err)
            }
        }
    }

    fn notify(&self, event: &SaveEvent) {
        let listeners: Vec<SaveListener> = self.listeners.read().clone();
        for listener in listeners {
            listener(event);
        }
    }

    fn wire(self: &Arc<Self>) {
        let handler = Arc::downgrade(self);
        self.root.listen(REQUEST_SAVE, move |_, _| {
            let Some(handler) = handler.upgrade() else { return };
            spawn_detached("requested save", async move {
                if let Err(err) = handler.save().await {
                    debug!(error = %err, "requested save did not complete");
                }
            });
        });

        if let Some(tracker) = self.tracker() {
            let tracker = Arc::downgrade(tracker);
            self.root.listen(DISCARD_CHANGES, move |_, _| {
                if let Some(tracker) = tracker.upgrade() {
                    tracker.clear();
                }
            });
        }

        if self.strategy.kind() == SaveStrategyKind::Immediate {
            if let Some(tracker) = self.tracker() {
                let handler: Weak<Self> = Arc::downgrade(self);
                let id = tracker.subscribe(move |event| {
                    let TrackerEvent::NodeChanged(node) = event else { return };
                    let Some(handler) = handler.upgrade() else { return };
                    if !handler.root.contains(node) {
                        return;
                    }
                    let node = node.clone();
                    spawn_detached("immediate save", async move {
                        if let Err(err) = handler.save_change(&node).await {
                            debug!(node = %node.id(), error = %err, "immediate save did not complete");
                        }
                    });
                });
                *self.observer.lock() = Some(id);
            }
        }
    }
}

impl Drop for SaveHandler {
    fn drop(&mut self) {
        if let (Some(id), Some(tracker)) = (self.observer.lock().take(), self.strategy.tracker()) {
            tracker.unsubscribe(id);
        }
    }
}

impl fmt::Debug for SaveHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaveHandler")
            .field("root", &self.root.id())
            .field("strategy", &self.strategy.kind())
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

/// Builder for [`SaveHandler`].
pub struct SaveHandlerBuilder {
    root: NodeRef,
    proxy: Arc<dyn SaveProxy>,
    kind: SaveStrategyKind,
    track_events: Vec<String>,
    prepare: Option<PrepareHook>,
    busy: Option<Arc<BusyIndicator>>,
    busy_enabled: bool,
}

impl SaveHandlerBuilder {
    /// Use strategy `kind`.
    pub fn strategy(mut self, kind: SaveStrategyKind) -> Self {
        self.kind = kind;
        self
    }

    /// Extra bus events that mark their source as modified.
    pub fn track_events(mut self, events: Vec<String>) -> Self {
        self.track_events = events;
        self
    }

    /// Take strategy and tracked events from configuration.
    pub fn with_config(mut self, config: &SaveConfig) -> Self {
        self.kind = config.strategy;
        self.track_events = config.track_events.clone();
        self
    }

    /// Map extracted data before submission.
    pub fn prepare(
        mut self,
        hook: impl Fn(&NodeRef, Value) -> Result<PreparedSave, CanopyError> + Send + Sync + 'static,
    ) -> Self {
        self.prepare = Some(Arc::new(hook));
        self
    }

    /// Show `busy` while submitting.
    pub fn with_busy_indicator(mut self, busy: Arc<BusyIndicator>) -> Self {
        self.busy = Some(busy);
        self
    }

    /// Drop any busy indicator when `config` disables it.
    pub fn with_busy_config(mut self, config: &BusyConfig) -> Self {
        self.busy_enabled = config.enabled;
        self
    }

    /// Build the handler and start tracking if the strategy needs it.
    pub fn build(self) -> Result<Arc<SaveHandler>, CanopyError> {
        let enabled = self.busy_enabled;
        let strategy = strategy_for(self.kind, &self.root)?;
        if let Some(tracker) = strategy.tracker() {
            if !tracker.is_tracking() {
                tracker.track_tree(&self.root, &self.track_events);
            }
        }
        let handler = Arc::new(SaveHandler {
            root: self.root,
            strategy,
            proxy: self.proxy,
            prepare: self.prepare,
            busy: self.busy.filter(|_| enabled),
            listeners: RwLock::new(Vec::new()),
            observer: Mutex::new(None),
        });
        handler.wire();
        debug!(
            root = %handler.root.id(),
            strategy = %handler.strategy.kind(),
            tracking = ?TrackingMode::for_strategy(handler.strategy.kind()),
            "save handler ready"
        );
        Ok(handler)
    }
}
