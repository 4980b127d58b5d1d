//! Lifecycle orchestration
//!
//! Drives a root node and its subtree through the construction phases, in
//! strict order:
//!
//! 1. resolve the root's children definition
//! 2. instantiate the whole subtree (every descendant resolved)
//! 3. one tree-wide resource collection and load
//! 4. assign a fresh bus to every node
//! 5. configure, parent before children
//! 6. commit to the single mount target, then signal mounted
//!
//! A failure in any phase stops the chain and goes to the
//! [`ErrorDisplay`]. The busy indicator is shown for the duration and is
//! hidden exactly once whatever the outcome.

mod busy;

pub use busy::{BusyIndicator, Spinner, SpinnerFactory};

use crate::bus::{BusEvent, EventBus};
use crate::events;
use crate::instantiate::resolve_subtree;
use crate::node::{LoadContext, NodeRef};
use crate::registry::ComponentRegistry;
use crate::traversal::{collect, walk, Traversal};
use canopy_core::{CanopyConfig, CanopyError};
use canopy_resource::{ResourceBundle, ResourceCollector, ResourceManager};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Construction phase of a root node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Constructed, nothing resolved
    Created,
    /// The root's children definition is known
    DefinitionResolved,
    /// The whole subtree is instantiated
    ChildrenReady,
    /// Tree-wide resources are loaded (or degraded)
    ResourcesReady,
    /// Every node has the tree's bus
    BusAssigned,
    /// Every node is configured
    Configured,
    /// Committed to the mount target
    Mounted,
    /// A phase failed
    Errored,
}

impl LifecycleState {
    /// Terminal states accept no further loads.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Mounted | Self::Errored)
    }
}

/// The single place a loaded tree is committed to.
pub trait MountTarget: Send + Sync {
    /// Commit the configured tree. Called once per successful load.
    fn commit(&self, root: &NodeRef) -> Result<(), CanopyError>;
}

/// Receives construction failures.
pub trait ErrorDisplay: Send + Sync {
    /// Present `error` for the tree rooted at `root`.
    fn show(&self, root: &NodeRef, error: &CanopyError);
}

/// Error display that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogErrorDisplay;

impl ErrorDisplay for LogErrorDisplay {
    fn show(&self, root: &NodeRef, error: &CanopyError) {
        error!(
            root = %root.id(),
            category = error.category(),
            %error,
            "component tree failed to load"
        );
    }
}

/// Collect the resources of `root`'s subtree, children first.
pub fn collect_resources(root: &NodeRef, manager: &ResourceManager) -> ResourceBundle {
    let mut collector = ResourceCollector::new(manager);
    for node in collect(root, Traversal::ChildrenFirst) {
        let requests = node.component().resource_requests(&node);
        collector.add_resources(node.id(), &requests);
    }
    collector.finish()
}

/// Collect and load resources for `root`'s subtree.
///
/// A malformed response is logged and treated as "no resources"; transport
/// failures are returned.
pub async fn load_subtree_resources(
    root: &NodeRef,
    manager: &ResourceManager,
) -> Result<(), CanopyError> {
    let bundle = collect_resources(root, manager);
    match manager.load_resources(bundle).await {
        Ok(report) => {
            debug!(root = %root.id(), requested = report.requested, applied = report.applied, "resources loaded");
            Ok(())
        }
        Err(err @ CanopyError::ResourceFormat { .. }) => {
            warn!(root = %root.id(), %err, "continuing without resources");
            Ok(())
        }
        Err(err) => Err(err),
    }
}

/// Configure `root`'s subtree parent-first, then fire `node:ready` children-first.
pub fn configure_subtree(root: &NodeRef) -> Result<(), CanopyError> {
    walk(root, Traversal::ParentFirst, &mut |node| {
        match node.component().as_renderable() {
            Some(renderable) => renderable.configure(node),
            None => Ok(()),
        }
    })?;
    walk::<CanopyError>(root, Traversal::ChildrenFirst, &mut |node| {
        node.fire(events::READY, Value::Null);
        Ok(())
    })
}

/// Drives root nodes through their construction phases.
pub struct LifecycleOrchestrator {
    registry: Arc<ComponentRegistry>,
    resources: Arc<ResourceManager>,
    error_display: Arc<dyn ErrorDisplay>,
    busy: Option<Arc<BusyIndicator>>,
}

impl LifecycleOrchestrator {
    /// Start building an orchestrator.
    pub fn builder(
        registry: Arc<ComponentRegistry>,
        resources: Arc<ResourceManager>,
    ) -> LifecycleOrchestratorBuilder {
        LifecycleOrchestratorBuilder {
            registry,
            resources,
            error_display: Arc::new(LogErrorDisplay),
            busy: None,
            busy_enabled: true,
        }
    }

    /// Busy indicator used during loads, if any.
    pub fn busy_indicator(&self) -> Option<&Arc<BusyIndicator>> {
        self.busy.as_ref()
    }

    /// Shared resource manager.
    pub fn resources(&self) -> &Arc<ResourceManager> {
        &self.resources
    }

    /// Load the tree rooted at `root` into the single target in `targets`.
    ///
    /// Only valid on a root in the `Created` state. Zero or several targets
    /// is a structural error reported before anything else happens.
    pub async fn load(
        &self,
        root: &NodeRef,
        args: Value,
        targets: &[Arc<dyn MountTarget>],
    ) -> Result<(), CanopyError> {
        if !root.is_root() {
            return Err(CanopyError::structural(format!(
                "load called on non-root node {}",
                root.id()
            )));
        }
        if root.state() != LifecycleState::Created {
            return Err(CanopyError::structural(format!(
                "node {} was already loaded ({:?})",
                root.id(),
                root.state()
            )));
        }
        let target = match targets {
            [target] => target.clone(),
            other => {
                root.set_state(LifecycleState::Errored);
                return Err(CanopyError::structural(format!(
                    "expected exactly one mount target, found {}",
                    other.len()
                )));
            }
        };

        info!(root = %root.id(), component = root.type_name(), "loading component tree");

        let result = match &self.busy {
            Some(busy) => {
                let pipeline = async {
                    let result = self.run_phases(root, args, target.as_ref()).await;
                    busy.hide(false);
                    result
                };
                let ((), result) = futures::join!(busy.show(), pipeline);
                result
            }
            None => self.run_phases(root, args, target.as_ref()).await,
        };

        match &result {
            Err(CanopyError::Destroyed { .. }) => {
                debug!(root = %root.id(), "load abandoned; root destroyed while loading");
            }
            Err(err) => {
                root.set_state(LifecycleState::Errored);
                self.error_display.show(root, err);
            }
            Ok(()) => {}
        }
        result
    }

    async fn run_phases(
        &self,
        root: &NodeRef,
        args: Value,
        target: &dyn MountTarget,
    ) -> Result<(), CanopyError> {
        let context = Arc::new(LoadContext {
            registry: self.registry.clone(),
            resources: self.resources.clone(),
            args,
        });

        resolve_subtree(root, &context).await?;
        ensure_live(root)?;
        root.set_state(LifecycleState::ChildrenReady);

        load_subtree_resources(root, &self.resources).await?;
        ensure_live(root)?;
        root.set_state(LifecycleState::ResourcesReady);

        let bus = Arc::new(EventBus::new());
        root.assign_bus(Some(bus.clone()));
        root.set_state(LifecycleState::BusAssigned);

        configure_subtree(root)?;
        root.set_state(LifecycleState::Configured);

        ensure_live(root)?;
        target.commit(root)?;
        root.set_state(LifecycleState::Mounted);
        bus.fire(BusEvent::from_node(events::MOUNTED, root, Value::Null));
        info!(root = %root.id(), "component tree mounted");
        Ok(())
    }
}

/// A root destroyed during an await point must not be wired or mounted.
fn ensure_live(root: &NodeRef) -> Result<(), CanopyError> {
    if root.is_destroyed() {
        return Err(CanopyError::Destroyed { node: root.id() });
    }
    Ok(())
}

impl fmt::Debug for LifecycleOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleOrchestrator")
            .field("registry", &self.registry)
            .field("busy", &self.busy)
            .finish_non_exhaustive()
    }
}

/// Builder for [`LifecycleOrchestrator`].
pub struct LifecycleOrchestratorBuilder {
    registry: Arc<ComponentRegistry>,
    resources: Arc<ResourceManager>,
    error_display: Arc<dyn ErrorDisplay>,
    busy: Option<Arc<BusyIndicator>>,
    busy_enabled: bool,
}

impl LifecycleOrchestratorBuilder {
    /// Route construction failures to `display` instead of the log.
    #[must_use]
    pub fn with_error_display(mut self, display: Arc<dyn ErrorDisplay>) -> Self {
        self.error_display = display;
        self
    }

    /// Show `busy` while loading.
    #[must_use]
    pub fn with_busy_indicator(mut self, busy: Arc<BusyIndicator>) -> Self {
        self.busy = Some(busy);
        self
    }

    /// Apply the busy section of `config`.
    #[must_use]
    pub fn with_config(mut self, config: &CanopyConfig) -> Self {
        self.busy_enabled = config.busy.enabled;
        self
    }

    /// Finish building.
    pub fn build(self) -> LifecycleOrchestrator {
        let enabled = self.busy_enabled;
        if !enabled && self.busy.is_some() {
            debug!("busy indicator disabled by configuration");
        }
        LifecycleOrchestrator {
            registry: self.registry,
            resources: self.resources,
            error_display: self.error_display,
            busy: self.busy.filter(|_| enabled),
        }
    }
}
