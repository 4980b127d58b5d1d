//! Canopy Core - Shared Foundation
//!
//! Types every other canopy crate agrees on: node identity, the error
//! taxonomy surfaced to callers, the layered options merge used when
//! components are instantiated, and the TOML-backed runtime configuration.
//!
//! # Error Taxonomy
//!
//! - `Structural`: misuse of the tree itself (mount target count, empty
//!   children definitions, unknown component types). Halts the operation.
//! - `ResourceFormat`: a response did not have the expected shape. Logged,
//!   and the affected pass continues without the data.
//! - `Validation`: per-node validation failures collected during a save.
//! - `Transport`: fetch or submit failures reported by an external proxy.

pub mod config;
pub mod errors;
pub mod identifiers;
pub mod options;

pub use config::{
    BusyConfig, CanopyConfig, ResourceConfig, ResourceOrigin, SaveConfig, SaveStrategyKind,
};
pub use errors::{CanopyError, ValidationError};
pub use identifiers::NodeId;
pub use options::{deep_merge, deep_merge_value, flag, merge_layers, Options};

/// Convenience result alias used across canopy crates.
pub type Result<T, E = CanopyError> = std::result::Result<T, E>;
