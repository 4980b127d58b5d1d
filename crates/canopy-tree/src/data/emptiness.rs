//! Emptiness propagation
//!
//! Each node reports whether it holds any data. Leaves decide from their
//! model; composites combine their children:
//!
//! - any child definitively non-empty makes the node non-empty immediately
//! - otherwise, if some children are still pending, the node is pending and
//!   resolves once every pending child resolves, empty only if all are
//! - otherwise the node is empty
//!
//! A component implementing [`EmptinessAware`](crate::EmptinessAware)
//! overrides the combination for its own node.

use crate::node::NodeRef;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use std::fmt;
use std::future::Future;

/// Emptiness that is not known yet.
///
/// Resolves to `true` when empty. Clones share one underlying computation.
#[derive(Clone)]
pub struct PendingEmptiness(Shared<BoxFuture<'static, bool>>);

impl PendingEmptiness {
    /// Wrap a future resolving to "is empty".
    pub fn new(future: impl Future<Output = bool> + Send + 'static) -> Self {
        Self(future.boxed().shared())
    }

    /// Wait for the result.
    pub async fn resolve(&self) -> bool {
        self.0.clone().await
    }

    /// Result, if already available.
    pub fn peek(&self) -> Option<bool> {
        self.0.peek().copied()
    }
}

impl fmt::Debug for PendingEmptiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PendingEmptiness").field(&self.peek()).finish()
    }
}

/// Whether a node (or subtree) holds data.
#[derive(Debug, Clone)]
pub enum Emptiness {
    /// No data
    Empty,
    /// Holds data
    NonEmpty,
    /// Not known yet
    Pending(PendingEmptiness),
}

impl Emptiness {
    /// Known emptiness from a boolean.
    pub fn from_empty(empty: bool) -> Self {
        if empty {
            Self::Empty
        } else {
            Self::NonEmpty
        }
    }

    /// Definitive value, if known.
    pub fn known(&self) -> Option<bool> {
        match self {
            Self::Empty => Some(true),
            Self::NonEmpty => Some(false),
            Self::Pending(pending) => pending.peek(),
        }
    }

    /// True when still unresolved.
    pub fn is_pending(&self) -> bool {
        self.known().is_none()
    }

    /// Wait for the definitive value ("is empty").
    pub async fn resolve(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::NonEmpty => false,
            Self::Pending(pending) => pending.resolve().await,
        }
    }

    /// Combine children's emptiness into their parent's.
    pub fn combine(results: &[Emptiness]) -> Emptiness {
        let mut pending = Vec::new();
        for result in results {
            match result {
                Self::NonEmpty => return Self::NonEmpty,
                Self::Empty => {}
                Self::Pending(p) => match p.peek() {
                    Some(false) => return Self::NonEmpty,
                    Some(true) => {}
                    None => pending.push(p.clone()),
                },
            }
        }
        if pending.is_empty() {
            return Self::Empty;
        }
        Self::Pending(PendingEmptiness::new(async move {
            let resolved = futures::future::join_all(pending.iter().map(PendingEmptiness::resolve)).await;
            resolved.into_iter().all(|empty| empty)
        }))
    }
}

/// Whether a leaf value counts as empty.
pub fn is_empty_value(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::Object(map)) => map.is_empty(),
        Some(Value::Bool(_) | Value::Number(_)) => false,
    }
}

/// Bottom-up emptiness of `node`'s subtree.
pub fn cascade_state_change(node: &NodeRef) -> Emptiness {
    if !node.is_visible() {
        return Emptiness::Empty;
    }
    let children = node.children();
    let results: Vec<Emptiness> = children
        .iter()
        .map(|(_, child)| cascade_state_change(child))
        .collect();
    local_emptiness(node, &results)
}

/// Emptiness of `node` given its children's results.
pub(crate) fn local_emptiness(node: &NodeRef, children: &[Emptiness]) -> Emptiness {
    if let Some(aware) = node.component().as_emptiness_aware() {
        if let Some(result) = aware.check_local_emptiness(node, children) {
            return result;
        }
    }
    if children.is_empty() {
        Emptiness::from_empty(is_empty_value(node.model().as_ref()))
    } else {
        Emptiness::combine(children)
    }
}
