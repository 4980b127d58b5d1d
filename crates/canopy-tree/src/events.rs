//! Bus event names fired by tree nodes.

/// A node finished configuring (fired children-first once the tree is configured).
pub const READY: &str = "node:ready";

/// The tree was committed to its mount target.
pub const MOUNTED: &str = "tree:mounted";

/// A node's data changed through user interaction.
pub const NODE_MODIFIED: &str = "node:modified";

/// An item was added to a list outside of `set_data`.
pub const LIST_CHILD_ADDED: &str = "list:child-added";

/// An item was removed from a list outside of `set_data`.
pub const LIST_CHILD_REMOVED: &str = "list:child-removed";

/// A list was cleared outside of `set_data`.
pub const LIST_CLEARED: &str = "list:cleared";

/// A list refused an item because it is full.
pub const LIST_MAX_REACHED: &str = "list:max-reached";
