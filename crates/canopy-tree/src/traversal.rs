//! Named traversal orders
//!
//! Resource collection and destruction visit children before their parent;
//! configuration and bus assignment visit the parent first. Both orders only
//! follow attached children.

use crate::node::NodeRef;

/// Order in which [`walk`] visits a subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Traversal {
    /// Every child subtree before the node itself
    ChildrenFirst,
    /// The node before any of its children
    ParentFirst,
}

/// Visit `root` and its attached descendants in `order`.
///
/// Stops at the first error and returns it.
pub fn walk<E>(
    root: &NodeRef,
    order: Traversal,
    visit: &mut impl FnMut(&NodeRef) -> Result<(), E>,
) -> Result<(), E> {
    if order == Traversal::ParentFirst {
        visit(root)?;
    }
    for (_, child) in root.children() {
        walk(&child, order, visit)?;
    }
    if order == Traversal::ChildrenFirst {
        visit(root)?;
    }
    Ok(())
}

/// Nodes of the subtree in `order`.
pub fn collect(root: &NodeRef, order: Traversal) -> Vec<NodeRef> {
    let mut nodes = Vec::new();
    let _ = walk::<()>(root, order, &mut |node| {
        nodes.push(node.clone());
        Ok(())
    });
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Component;
    use crate::node::Node;
    use canopy_core::Options;
    use std::sync::Arc;

    struct Named(&'static str);

    impl Component for Named {
        fn type_name(&self) -> &str {
            self.0
        }
    }

    fn node(name: &'static str) -> NodeRef {
        Node::new(Arc::new(Named(name)), Options::new())
    }

    fn names(nodes: &[NodeRef]) -> Vec<String> {
        nodes.iter().map(|n| n.type_name().to_string()).collect()
    }

    #[test]
    fn test_orders() {
        let root = node("root");
        let a = node("a");
        root.attach_child("a", a.clone()).unwrap();
        a.attach_child("a1", node("a1")).unwrap();
        root.attach_child("b", node("b")).unwrap();

        assert_eq!(
            names(&collect(&root, Traversal::ChildrenFirst)),
            ["a1", "a", "b", "root"]
        );
        assert_eq!(
            names(&collect(&root, Traversal::ParentFirst)),
            ["root", "a", "a1", "b"]
        );
    }

    #[test]
    fn test_walk_stops_on_error() {
        let root = node("root");
        root.attach_child("a", node("a")).unwrap();
        root.attach_child("b", node("b")).unwrap();
        let mut seen = Vec::new();
        let result = walk(&root, Traversal::ParentFirst, &mut |n| {
            seen.push(n.type_name().to_string());
            if n.type_name() == "a" {
                Err("boom")
            } else {
                Ok(())
            }
        });
        assert_eq!(result, Err("boom"));
        assert_eq!(seen, ["root", "a"]);
    }

    #[test]
    fn test_detached_children_are_skipped() {
        let root = node("root");
        root.attach_child("a", node("a")).unwrap();
        root.detach_child("a");
        assert_eq!(names(&collect(&root, Traversal::ChildrenFirst)), ["root"]);
    }
}
