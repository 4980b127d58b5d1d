//! Loading a tree's data from the backend
//!
//! The proxy returns a response envelope; its `data.response_data` payload
//! is applied to the root with `set_data`, then `data:ready` is fired. Any
//! other envelope shape is rejected as malformed and leaves the tree as it
//! was.

use crate::events::DATA_READY;
use async_trait::async_trait;
use canopy_core::{BusyConfig, CanopyError};
use canopy_resource::RESPONSE_DATA_POINTER;
use canopy_tree::{BusyIndicator, NodeRef, SetDataResult};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error};

/// Inbound side of a data load.
#[async_trait]
pub trait FetchProxy: Send + Sync {
    /// Request data with `args`; yields the response envelope.
    async fn fetch(&self, args: Value) -> Result<Value, CanopyError>;
}

/// Result of [`FetchHandler::fetch`].
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// The payload was applied to the root
    Applied(SetDataResult),
    /// The root was destroyed before the response arrived
    Ignored,
}

/// Fetches data for a tree and applies it to the root.
pub struct FetchHandler {
    proxy: Arc<dyn FetchProxy>,
    busy: Option<Arc<BusyIndicator>>,
    busy_enabled: bool,
}

impl FetchHandler {
    /// Handler fetching through `proxy`.
    pub fn new(proxy: Arc<dyn FetchProxy>) -> Self {
        Self {
            proxy,
            busy: None,
            busy_enabled: true,
        }
    }

    /// Show `busy` while fetching.
    #[must_use]
    pub fn with_busy_indicator(mut self, busy: Arc<BusyIndicator>) -> Self {
        self.busy = Some(busy).filter(|_| self.busy_enabled);
        self
    }

    /// Drop any busy indicator when `config` disables it.
    #[must_use]
    pub fn with_busy_config(mut self, config: &BusyConfig) -> Self {
        self.busy_enabled = config.enabled;
        if !config.enabled {
            self.busy = None;
        }
        self
    }

    /// Fetch with `args` and apply the payload to `root`.
    pub async fn fetch(&self, root: &NodeRef, args: Value) -> Result<FetchOutcome, CanopyError> {
        let request = async {
            let result = self.proxy.fetch(args).await;
            if let Some(busy) = &self.busy {
                busy.hide(false);
            }
            result
        };
        let envelope = match &self.busy {
            Some(busy) => futures::join!(busy.show(), request).1,
            None => request.await,
        }?;

        if root.is_destroyed() {
            debug!(root = %root.id(), "fetch completed after the root was destroyed");
            return Ok(FetchOutcome::Ignored);
        }

        let Some(data) = envelope.pointer(RESPONSE_DATA_POINTER).cloned() else {
            let err = CanopyError::resource_format("fetch response has no data.response_data");
            error!(root = %root.id(), error = %err, "malformed fetch response");
            return Err(err);
        };

        let result = root.set_data(Some(data));
        root.fire(DATA_READY, Value::Null);
        debug!(root = %root.id(), success = result.success, "fetched data applied");
        Ok(FetchOutcome::Applied(result))
    }
}

impl fmt::Debug for FetchHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchHandler")
            .field("busy", &self.busy.is_some())
            .finish_non_exhaustive()
    }
}
