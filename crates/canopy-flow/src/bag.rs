//! Projection of a dirty set onto one sub-root
//!
//! A [`ChangesBag`] groups the tracker's dirty nodes by the direct child of
//! the sub-root they live under. Dirty nodes outside the sub-root, or
//! hanging below a detached link, are not part of the bag. Committing the
//! bag removes exactly the projected entries from the tracker, so changes
//! recorded after the bag was built (or under another sub-root) survive.

use crate::tracker::ChangeTracker;
use canopy_core::NodeId;
use canopy_tree::{DataFilter, Node, NodeRef};
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Dirty nodes below one direct child of the sub-root.
#[derive(Clone)]
pub struct BagEntry {
    /// Direct child of the sub-root
    pub child: NodeRef,
    /// Dirty nodes found under (or equal to) `child`
    pub changed: Vec<NodeRef>,
}

impl fmt::Debug for BagEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BagEntry")
            .field("child", &self.child.id())
            .field(
                "changed",
                &self.changed.iter().map(|node| node.id()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Dirty nodes of a tracker grouped under a sub-root's direct children.
pub struct ChangesBag {
    tracker: Arc<ChangeTracker>,
    sub_root: NodeId,
    entries: IndexMap<NodeId, BagEntry>,
    projected: Vec<(NodeId, u64)>,
}

impl ChangesBag {
    pub(crate) fn build(
        tracker: Arc<ChangeTracker>,
        sub_root: &NodeRef,
        dirty: Vec<(NodeRef, u64)>,
    ) -> Self {
        let mut entries: IndexMap<NodeId, BagEntry> = IndexMap::new();
        let mut projected = Vec::new();
        for (node, generation) in dirty {
            let Some(child) = Node::search_in_descendants(sub_root, &node) else {
                continue;
            };
            projected.push((node.id(), generation));
            entries
                .entry(child.id())
                .or_insert_with(|| BagEntry {
                    child,
                    changed: Vec::new(),
                })
                .changed
                .push(node);
        }
        Self {
            tracker,
            sub_root: sub_root.id(),
            entries,
            projected,
        }
    }

    /// Sub-root this bag was built for.
    pub fn sub_root(&self) -> NodeId {
        self.sub_root
    }

    /// Direct children of the sub-root that contain changes, in first-change order.
    pub fn changed_children(&self) -> Vec<NodeRef> {
        self.entries.values().map(|entry| entry.child.clone()).collect()
    }

    /// Grouped entries.
    pub fn entries(&self) -> impl Iterator<Item = &BagEntry> {
        self.entries.values()
    }

    /// Number of dirty nodes projected into the bag.
    pub fn len(&self) -> usize {
        self.projected.len()
    }

    /// True when no dirty node falls under the sub-root.
    pub fn is_empty(&self) -> bool {
        self.projected.is_empty()
    }

    /// Data filter admitting exactly the changed children.
    pub fn filter(&self) -> DataFilter {
        DataFilter::from_nodes(self.entries.values().map(|entry| &entry.child))
    }

    /// Remove the projected entries from the tracker. Returns how many were removed.
    ///
    /// Nodes changed again after the bag was built stay dirty.
    pub fn commit(self) -> usize {
        let removed = self.tracker.remove_entries(&self.projected);
        debug!(sub_root = %self.sub_root, removed, "changes bag committed");
        removed
    }
}

impl fmt::Debug for ChangesBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangesBag")
            .field("sub_root", &self.sub_root)
            .field("entries", &self.entries.values().collect::<Vec<_>>())
            .finish()
    }
}
