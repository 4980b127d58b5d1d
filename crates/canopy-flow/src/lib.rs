//! Canopy Flow - Tracking, Saving and Fetching Tree Data
//!
//! Builds on `canopy-tree` to move a loaded tree's data to and from a
//! backend:
//!
//! - [`ChangeTracker`] records which nodes changed, one tracker per bus
//! - [`ChangesBag`] projects those changes onto a sub-root's direct children
//! - [`SaveStrategy`] decides what a save submits (`all`, `changed`,
//!   `immediate` or `none`)
//! - [`SaveHandler`] validates, submits through a [`SaveProxy`] and commits
//! - [`FetchHandler`] loads data through a [`FetchProxy`] into the root
//!
//! # Example
//!
//! ```ignore
//! let saver = SaveHandler::builder(root.clone(), proxy)
//!     .with_config(&config.save)
//!     .build()?;
//! saver.add_listener(|event| println!("{event:?}"));
//! saver.save().await?;
//! ```

pub mod bag;
pub mod events;
pub mod fetch;
mod runtime;
pub mod save;
pub mod strategy;
pub mod tracker;

pub use bag::{BagEntry, ChangesBag};
pub use fetch::{FetchHandler, FetchOutcome, FetchProxy};
pub use save::{
    validate_subtree, PrepareHook, PreparedSave, SaveEvent, SaveHandler, SaveHandlerBuilder,
    SaveListener, SaveOutcome, SaveProxy,
};
pub use strategy::{
    strategy_for, AllStrategy, ChangedStrategy, Extraction, ImmediateStrategy, NoSaveStrategy,
    SaveStrategy,
};
pub use tracker::{ChangeTracker, ObserverId, TrackerEvent, TrackingMode, TRACKER_SHARED_KEY};
