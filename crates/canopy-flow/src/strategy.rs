//! Save strategies
//!
//! A strategy decides what a save submits. `All` re-sends the whole tree,
//! `Changed` only the direct children touched since the last successful
//! save, `Immediate` one change at a time as it happens, and `None` never
//! submits anything.

use crate::bag::ChangesBag;
use crate::tracker::{ChangeTracker, TrackingMode};
use canopy_core::{CanopyError, SaveStrategyKind};
use canopy_tree::{DataFilter, Node, NodeRef};
use serde_json::Value;
use std::sync::Arc;

/// Data taken from the tree for one submission.
#[derive(Debug)]
pub struct Extraction {
    /// Exported data; `None` when the tree exported nothing
    pub data: Option<Value>,
    /// Tracked changes to commit once the submission succeeds
    pub bag: Option<ChangesBag>,
}

impl Extraction {
    fn untracked(data: Option<Value>) -> Self {
        Self { data, bag: None }
    }
}

/// Decides what a save of a tree submits.
pub trait SaveStrategy: Send + Sync {
    /// Which strategy this is.
    fn kind(&self) -> SaveStrategyKind;

    /// Data for a save of `root`. `None` means there is nothing to submit.
    fn extract(&self, root: &NodeRef) -> Option<Extraction>;

    /// Data for a save of a single change below `root`.
    fn extract_change(&self, _root: &NodeRef, _node: &NodeRef) -> Option<Extraction> {
        None
    }

    /// Tracker backing the strategy, if it tracks changes.
    fn tracker(&self) -> Option<&Arc<ChangeTracker>> {
        None
    }
}

/// Submit the complete tree.
#[derive(Debug, Default)]
pub struct AllStrategy;

impl SaveStrategy for AllStrategy {
    fn kind(&self) -> SaveStrategyKind {
        SaveStrategyKind::All
    }

    fn extract(&self, root: &NodeRef) -> Option<Extraction> {
        Some(Extraction::untracked(root.get_data()))
    }
}

/// Submit only the direct children that contain tracked changes.
#[derive(Debug)]
pub struct ChangedStrategy {
    tracker: Arc<ChangeTracker>,
}

impl ChangedStrategy {
    /// Strategy reading changes from `tracker`.
    pub fn new(tracker: Arc<ChangeTracker>) -> Self {
        Self { tracker }
    }
}

impl SaveStrategy for ChangedStrategy {
    fn kind(&self) -> SaveStrategyKind {
        SaveStrategyKind::Changed
    }

    fn extract(&self, root: &NodeRef) -> Option<Extraction> {
        let bag = self.tracker.changes_bag(root);
        if bag.is_empty() {
            return None;
        }
        let data = root.get_data_filtered(&bag.filter());
        Some(Extraction {
            data,
            bag: Some(bag),
        })
    }

    fn tracker(&self) -> Option<&Arc<ChangeTracker>> {
        Some(&self.tracker)
    }
}

/// Submit every change on its own, as soon as it happens.
///
/// A full save still submits the whole tree.
#[derive(Debug)]
pub struct ImmediateStrategy {
    tracker: Arc<ChangeTracker>,
}

impl ImmediateStrategy {
    /// Strategy fed by `tracker`.
    pub fn new(tracker: Arc<ChangeTracker>) -> Self {
        Self { tracker }
    }
}

impl SaveStrategy for ImmediateStrategy {
    fn kind(&self) -> SaveStrategyKind {
        SaveStrategyKind::Immediate
    }

    fn extract(&self, root: &NodeRef) -> Option<Extraction> {
        Some(Extraction::untracked(root.get_data()))
    }

    fn extract_change(&self, root: &NodeRef, node: &NodeRef) -> Option<Extraction> {
        let child = Node::search_in_descendants(root, node)?;
        let data = root.get_data_filtered(&DataFilter::from_nodes([&child]));
        Some(Extraction::untracked(data))
    }

    fn tracker(&self) -> Option<&Arc<ChangeTracker>> {
        Some(&self.tracker)
    }
}

/// Never submit.
#[derive(Debug, Default)]
pub struct NoSaveStrategy;

impl SaveStrategy for NoSaveStrategy {
    fn kind(&self) -> SaveStrategyKind {
        SaveStrategyKind::None
    }

    fn extract(&self, _root: &NodeRef) -> Option<Extraction> {
        None
    }
}

/// Build the strategy of `kind` for the tree under `root`.
///
/// Tracking strategies need the tree's bus, so the tree must be loaded.
pub fn strategy_for(
    kind: SaveStrategyKind,
    root: &NodeRef,
) -> Result<Arc<dyn SaveStrategy>, CanopyError> {
    let Some(mode) = TrackingMode::for_strategy(kind) else {
        return Ok(match kind {
            SaveStrategyKind::None => Arc::new(NoSaveStrategy),
            _ => Arc::new(AllStrategy),
        });
    };
    let bus = root.bus().ok_or_else(|| {
        CanopyError::structural(format!(
            "{kind} save strategy needs a loaded tree; {} has no bus",
            root.id()
        ))
    })?;
    let tracker = ChangeTracker::for_bus(&bus, mode)?;
    Ok(match mode {
        TrackingMode::Changed => Arc::new(ChangedStrategy::new(tracker)),
        TrackingMode::Immediate => Arc::new(ImmediateStrategy::new(tracker)),
    })
}
