//! Typed, de-duplicated resource request bundle.

use crate::kinds::ResourceKind;
use indexmap::{IndexMap, IndexSet};
use serde_json::{Map, Value};

/// Separator used when several nodes share one identical context payload.
pub const COALESCED_KEY_SEPARATOR: char = ',';

/// Resource requests gathered from a (sub)tree, ready for one fetch.
///
/// Keyed kinds hold ordered key sets. Context requests are stored as
/// `resource name -> node key -> payload`, where a node key is either a single
/// node id or several ids joined with [`COALESCED_KEY_SEPARATOR`] when they
/// asked for the same payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceBundle {
    keyed: IndexMap<ResourceKind, IndexSet<String>>,
    context: IndexMap<String, IndexMap<String, Value>>,
}

impl ResourceBundle {
    /// Empty bundle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key of a keyed kind. Returns false if it was already present.
    pub fn insert(&mut self, kind: ResourceKind, key: impl Into<String>) -> bool {
        if kind == ResourceKind::Context {
            return false;
        }
        self.keyed.entry(kind).or_default().insert(key.into())
    }

    /// Whether a keyed kind already holds `key`.
    #[must_use]
    pub fn contains(&self, kind: ResourceKind, key: &str) -> bool {
        self.keyed.get(&kind).is_some_and(|keys| keys.contains(key))
    }

    /// Keys of a keyed kind, in insertion order.
    pub fn keys(&self, kind: ResourceKind) -> impl Iterator<Item = &str> {
        self.keyed
            .get(&kind)
            .into_iter()
            .flat_map(|keys| keys.iter().map(String::as_str))
    }

    /// Remove a key from a keyed kind.
    pub fn remove(&mut self, kind: ResourceKind, key: &str) -> bool {
        match self.keyed.get_mut(&kind) {
            Some(keys) => {
                let removed = keys.shift_remove(key);
                if keys.is_empty() {
                    self.keyed.shift_remove(&kind);
                }
                removed
            }
            None => false,
        }
    }

    /// Context requests, keyed by resource name then node key.
    #[must_use]
    pub fn context(&self) -> &IndexMap<String, IndexMap<String, Value>> {
        &self.context
    }

    pub(crate) fn context_mut(&mut self) -> &mut IndexMap<String, IndexMap<String, Value>> {
        &mut self.context
    }

    /// Node key under `name` whose id group contains `node`.
    #[must_use]
    pub fn context_key_for(&self, name: &str, node: &str) -> Option<&str> {
        self.context.get(name).and_then(|entries| {
            entries
                .keys()
                .find(|key| split_node_key(key).any(|id| id == node))
                .map(String::as_str)
        })
    }

    /// Drop context entries for which `keep` returns false, per individual node id.
    pub fn retain_context(&mut self, mut keep: impl FnMut(&str, &str) -> bool) {
        for (name, entries) in self.context.iter_mut() {
            let mut rebuilt = IndexMap::with_capacity(entries.len());
            for (key, payload) in entries.drain(..) {
                let ids: Vec<&str> = split_node_key(&key).filter(|id| keep(name, id)).collect();
                if !ids.is_empty() {
                    rebuilt.insert(join_node_key(ids), payload);
                }
            }
            *entries = rebuilt;
        }
        self.context.retain(|_, entries| !entries.is_empty());
    }

    /// Total number of keyed keys plus context node keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keyed.values().map(IndexSet::len).sum::<usize>()
            + self.context.values().map(IndexMap::len).sum::<usize>()
    }

    /// True when nothing remains to be requested.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Restrict the bundle to the given kinds.
    #[must_use]
    pub fn select(&self, kinds: &[ResourceKind]) -> Self {
        let keyed = self
            .keyed
            .iter()
            .filter(|(kind, _)| kinds.contains(kind))
            .map(|(kind, keys)| (*kind, keys.clone()))
            .collect();
        let context = if kinds.contains(&ResourceKind::Context) {
            self.context.clone()
        } else {
            IndexMap::new()
        };
        Self { keyed, context }
    }

    /// Transport request body: one field per non-empty kind.
    #[must_use]
    pub fn to_request(&self) -> Value {
        let mut body = Map::new();
        for (kind, keys) in &self.keyed {
            if !keys.is_empty() {
                body.insert(
                    kind.wire_name().to_string(),
                    Value::Array(keys.iter().cloned().map(Value::String).collect()),
                );
            }
        }
        if !self.context.is_empty() {
            let context = self
                .context
                .iter()
                .map(|(name, entries)| {
                    let entries: Map<String, Value> = entries
                        .iter()
                        .map(|(key, payload)| (key.clone(), payload.clone()))
                        .collect();
                    (name.clone(), Value::Object(entries))
                })
                .collect();
            body.insert(
                ResourceKind::Context.wire_name().to_string(),
                Value::Object(context),
            );
        }
        Value::Object(body)
    }
}

/// Individual node ids of a possibly coalesced node key.
pub fn split_node_key(key: &str) -> impl Iterator<Item = &str> {
    key.split(COALESCED_KEY_SEPARATOR).filter(|id| !id.is_empty())
}

pub(crate) fn join_node_key<'a>(ids: impl IntoIterator<Item = &'a str>) -> String {
    ids.into_iter()
        .collect::<Vec<_>>()
        .join(&COALESCED_KEY_SEPARATOR.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_insert_dedups() {
        let mut bundle = ResourceBundle::new();
        assert!(bundle.insert(ResourceKind::Localization, "title"));
        assert!(!bundle.insert(ResourceKind::Localization, "title"));
        assert_eq!(bundle.len(), 1);
        assert!(!bundle.insert(ResourceKind::Context, "title"));
    }

    #[test]
    fn test_request_body_skips_empty_kinds() {
        let mut bundle = ResourceBundle::new();
        bundle.insert(ResourceKind::Templates, "form");
        bundle
            .context_mut()
            .entry("user".into())
            .or_default()
            .insert("a,b".into(), json!({"x": 1}));
        assert_eq!(
            bundle.to_request(),
            json!({"templates": ["form"], "context": {"user": {"a,b": {"x": 1}}}})
        );
    }

    #[test]
    fn test_retain_context_splits_groups() {
        let mut bundle = ResourceBundle::new();
        bundle
            .context_mut()
            .entry("user".into())
            .or_default()
            .insert("a,b,c".into(), json!(1));
        bundle.retain_context(|_, id| id != "b");
        assert_eq!(bundle.context()["user"].keys().collect::<Vec<_>>(), ["a,c"]);
        bundle.retain_context(|_, _| false);
        assert!(bundle.context().is_empty());
    }

    #[test]
    fn test_select_and_remove() {
        let mut bundle = ResourceBundle::new();
        bundle.insert(ResourceKind::Templates, "form");
        bundle.insert(ResourceKind::Styles, "base");
        let only_styles = bundle.select(&[ResourceKind::Styles]);
        assert_eq!(only_styles.keys(ResourceKind::Styles).collect::<Vec<_>>(), ["base"]);
        assert!(!only_styles.contains(ResourceKind::Templates, "form"));
        assert!(bundle.remove(ResourceKind::Templates, "form"));
        assert_eq!(bundle.len(), 1);
    }

    #[test]
    fn test_context_key_lookup() {
        let mut bundle = ResourceBundle::new();
        bundle
            .context_mut()
            .entry("user".into())
            .or_default()
            .insert("a,b".into(), json!(1));
        assert_eq!(bundle.context_key_for("user", "b"), Some("a,b"));
        assert_eq!(bundle.context_key_for("user", "c"), None);
    }
}
