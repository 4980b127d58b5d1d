//! Canopy Resource - Collection and Loading
//!
//! Nodes declare the resources they need (templates, styles, localization
//! keys, configuration keys, option lists and an opaque context payload).
//! Before a tree is configured, one collection pass walks the whole subtree
//! and folds every declaration into a single [`ResourceBundle`], which the
//! [`ResourceManager`] then loads through its [`FetchStrategy`].
//!
//! # Guarantees
//!
//! - A key already in a cache is never added to a bundle.
//! - A key requested by several nodes appears once per bundle.
//! - A key being fetched by another pass is not requested again; the second
//!   pass waits for the first.
//! - Caches are append-only for the life of the manager. `reset` exists for
//!   test harnesses.

pub mod bundle;
pub mod cache;
pub mod collector;
pub mod kinds;
pub mod manager;
pub mod strategy;

pub use bundle::ResourceBundle;
pub use cache::{CacheStats, ContextCache, KeyedCache};
pub use collector::ResourceCollector;
pub use kinds::{ResourceKind, ResourceRequests};
pub use manager::{LoadReport, ResourceManager};
pub use strategy::{
    CombinedStrategy, FetchStrategy, ResourceTransport, TransportStrategy, RESPONSE_DATA_POINTER,
};
