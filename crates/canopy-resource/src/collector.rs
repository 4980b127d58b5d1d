//! Folds per-node resource declarations into one bundle.

use crate::bundle::{join_node_key, split_node_key, ResourceBundle};
use crate::kinds::{ResourceKind, ResourceRequests};
use crate::manager::ResourceManager;
use canopy_core::{deep_merge_value, NodeId};
use serde_json::Value;
use tracing::trace;

/// Running bundle for one collection pass.
///
/// Callers feed nodes children-first so that a parent's declarations land
/// after (and can override) its descendants' in the merged request.
pub struct ResourceCollector<'a> {
    manager: &'a ResourceManager,
    bundle: ResourceBundle,
    skipped: u64,
}

impl<'a> ResourceCollector<'a> {
    /// Start a pass that consults `manager` for already loaded keys.
    #[must_use]
    pub fn new(manager: &'a ResourceManager) -> Self {
        Self {
            manager,
            bundle: ResourceBundle::new(),
            skipped: 0,
        }
    }

    /// Merge one node's declarations into the running bundle.
    pub fn add_resources(&mut self, node: NodeId, requests: &ResourceRequests) {
        for kind in ResourceKind::KEYED {
            for key in requests.keys(kind) {
                self.add_key(kind, key);
            }
        }
        let node_key = node.to_string();
        for (name, payload) in &requests.context {
            self.add_context(name, &node_key, payload);
        }
    }

    fn add_key(&mut self, kind: ResourceKind, key: &str) {
        if self.manager.is_loaded(kind, key) || self.bundle.contains(kind, key) {
            self.skipped += 1;
            trace!(%kind, key, "resource already loaded or collected");
            return;
        }
        self.bundle.insert(kind, key);
    }

    fn add_context(&mut self, name: &str, node: &str, payload: &Value) {
        if self.manager.context_loaded(name, node) {
            self.skipped += 1;
            return;
        }

        let entries = self.bundle.context_mut().entry(name.to_string()).or_default();

        // Union with anything this node already asked for under the same name.
        let mut merged = Value::Null;
        let existing = entries
            .keys()
            .find(|key| split_node_key(key).any(|id| id == node))
            .cloned();
        if let Some(key) = existing {
            if let Some(previous) = entries.shift_remove(&key) {
                let others: Vec<&str> = split_node_key(&key).filter(|id| *id != node).collect();
                if !others.is_empty() {
                    entries.insert(join_node_key(others), previous.clone());
                }
                merged = previous;
            }
        }
        deep_merge_value(&mut merged, payload);

        let twin = entries
            .iter()
            .find(|(_, candidate)| **candidate == merged)
            .map(|(key, _)| key.clone());
        match twin {
            Some(key) => {
                entries.shift_remove(&key);
                entries.insert(format!("{key},{node}"), merged);
            }
            None => {
                entries.insert(node.to_string(), merged);
            }
        }
    }

    /// Bundle collected so far.
    #[must_use]
    pub fn bundle(&self) -> &ResourceBundle {
        &self.bundle
    }

    /// Keys skipped because they were cached or already collected.
    #[must_use]
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Finish the pass.
    #[must_use]
    pub fn finish(self) -> ResourceBundle {
        self.bundle
    }
}
