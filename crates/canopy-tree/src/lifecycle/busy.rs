//! Reference-counted busy indicator
//!
//! Every `show` must be matched by a `hide` before the indicator actually
//! disappears; `hide(true)` hides regardless of the count. The visual
//! surface is created asynchronously on first use. A `hide` that arrives
//! while that creation is still running sets the abort flag, so the surface
//! is never displayed for a request that has already been withdrawn.
//!
//! Hides beyond the outstanding shows are absorbed: the count never goes
//! below zero.

use async_trait::async_trait;
use canopy_core::CanopyError;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Visual surface of a busy indicator.
pub trait Spinner: Send + Sync {
    /// Display the surface.
    fn show(&self);
    /// Remove the surface.
    fn hide(&self);
}

/// Creates the busy surface.
#[async_trait]
pub trait SpinnerFactory: Send + Sync {
    /// Build a surface; may suspend (e.g. to load its own template).
    async fn create(&self) -> Result<Arc<dyn Spinner>, CanopyError>;
}

#[derive(Default)]
struct BusyState {
    count: usize,
    abort: bool,
    creating: bool,
    displayed: bool,
    spinner: Option<Arc<dyn Spinner>>,
}

/// Busy indicator shared by everything working on one tree.
pub struct BusyIndicator {
    factory: Arc<dyn SpinnerFactory>,
    state: Mutex<BusyState>,
}

impl BusyIndicator {
    /// Create an indicator whose surface is built by `factory`.
    pub fn new(factory: Arc<dyn SpinnerFactory>) -> Self {
        Self {
            factory,
            state: Mutex::new(BusyState::default()),
        }
    }

    /// Request the indicator. Completes once the surface exists (or creation failed).
    pub async fn show(&self) {
        {
            let mut state = self.state.lock();
            state.count += 1;
            state.abort = false;
            if state.count > 1 {
                return;
            }
            if let Some(spinner) = state.spinner.clone() {
                spinner.show();
                state.displayed = true;
                return;
            }
            if state.creating {
                return;
            }
            state.creating = true;
        }

        let created = self.factory.create().await;

        let mut state = self.state.lock();
        state.creating = false;
        match created {
            Ok(spinner) => {
                if state.abort || state.count == 0 {
                    debug!("busy indicator hidden before its creation finished");
                } else {
                    spinner.show();
                    state.displayed = true;
                }
                state.spinner = Some(spinner);
            }
            Err(err) => warn!(%err, "busy indicator could not be created"),
        }
    }

    /// Withdraw one request, or all of them with `force`.
    pub fn hide(&self, force: bool) {
        let mut state = self.state.lock();
        state.count = state.count.saturating_sub(1);
        if state.count >= 1 && !force {
            return;
        }
        state.count = 0;
        state.abort = true;
        if state.displayed {
            if let Some(spinner) = &state.spinner {
                spinner.hide();
            }
            state.displayed = false;
        }
    }

    /// Whether there are outstanding requests.
    pub fn is_visible(&self) -> bool {
        self.state.lock().count > 0
    }

    /// Whether the surface is currently on screen.
    pub fn is_displayed(&self) -> bool {
        self.state.lock().displayed
    }

    /// Outstanding requests.
    pub fn count(&self) -> usize {
        self.state.lock().count
    }
}

impl fmt::Debug for BusyIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BusyIndicator")
            .field("count", &state.count)
            .field("displayed", &state.displayed)
            .field("creating", &state.creating)
            .finish()
    }
}
