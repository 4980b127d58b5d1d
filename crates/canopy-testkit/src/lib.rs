//! Canopy Testing Infrastructure
//!
//! Doubles for every outbound contract of the canopy crates (resource
//! transports, save and fetch proxies, mount targets, error displays and
//! busy surfaces) plus a small set of components for building test trees.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
//!
//! # Usage
//!
//! Add this to your crate's `Cargo.toml` dev-dependencies:
//! ```toml
//! [dev-dependencies]
//! canopy-testkit = { path = "../canopy-testkit" }
//! ```
//!
//! Then in your tests:
//! ```rust,ignore
//! use canopy_testkit::*;
//!
//! #[tokio::test]
//! async fn my_test() {
//!     init_tracing();
//!     let transport = Arc::new(EchoTransport::new());
//!     let manager = manager_with(transport.clone());
//!     // ... test logic
//! }
//! ```

pub mod components;
pub mod logging;
pub mod mount;
pub mod proxies;
pub mod spinner;
pub mod transport;

pub use components::*;
pub use logging::init_tracing;
pub use mount::*;
pub use proxies::*;
pub use spinner::*;
pub use transport::*;
