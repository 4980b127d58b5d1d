//! Background task helper.

use std::future::Future;
use tracing::warn;

/// Run `task` on the current tokio runtime. Returns false (and drops the
/// task) when called outside a runtime.
pub(crate) fn spawn_detached(what: &'static str, task: impl Future<Output = ()> + Send + 'static) -> bool {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(task);
            true
        }
        Err(_) => {
            warn!(what, "no async runtime available; task dropped");
            false
        }
    }
}
