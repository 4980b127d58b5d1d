//! Bus event names used by save and fetch flows.

/// A save completed; fired on the saved root.
pub const SAVE_SUCCESS: &str = "save:success";

/// A save failed; fired on the saved root.
pub const SAVE_ERROR: &str = "save:error";

/// Fetched data was applied to the root.
pub const DATA_READY: &str = "data:ready";

/// Ask the save handler of the tree to save.
pub const REQUEST_SAVE: &str = "save:request";

/// Ask the save handler of the tree to forget tracked changes.
pub const DISCARD_CHANGES: &str = "save:discard";
