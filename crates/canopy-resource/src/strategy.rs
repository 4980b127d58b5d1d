//! Fetch strategies
//!
//! A [`FetchStrategy`] turns a bundle into one response object with a field
//! per resource kind. [`TransportStrategy`] sends the whole bundle through a
//! single [`ResourceTransport`]. [`CombinedStrategy`] routes each kind to a
//! static source or to the server according to [`ResourceConfig`].

use crate::bundle::ResourceBundle;
use crate::kinds::ResourceKind;
use async_trait::async_trait;
use canopy_core::{deep_merge_value, CanopyError, ResourceConfig, ResourceOrigin};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// JSON pointer of the payload inside a server response envelope.
pub const RESPONSE_DATA_POINTER: &str = "/data/response_data";

/// Moves a resource request to wherever resources live.
///
/// Given the request body produced by [`ResourceBundle::to_request`], yields
/// a map with the same kind fields holding the resolved payloads, or fails
/// with a transport error.
#[async_trait]
pub trait ResourceTransport: Send + Sync {
    /// Fetch the resources named in `request`.
    async fn fetch(&self, request: Value) -> Result<Value, CanopyError>;
}

/// Decides how a bundle is fetched.
#[async_trait]
pub trait FetchStrategy: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Fetch every resource in `bundle`.
    async fn fetch_resources(&self, bundle: &ResourceBundle) -> Result<Value, CanopyError>;
}

/// Sends the whole bundle through one transport in one request.
pub struct TransportStrategy {
    transport: Arc<dyn ResourceTransport>,
}

impl TransportStrategy {
    /// Wrap a transport.
    pub fn new(transport: Arc<dyn ResourceTransport>) -> Self {
        Self { transport }
    }

    /// A strategy that fails every request, for managers that are never expected to fetch.
    pub fn unavailable() -> Self {
        Self::new(Arc::new(Unavailable))
    }
}

#[async_trait]
impl FetchStrategy for TransportStrategy {
    fn name(&self) -> &'static str {
        "transport"
    }

    async fn fetch_resources(&self, bundle: &ResourceBundle) -> Result<Value, CanopyError> {
        self.transport.fetch(bundle.to_request()).await
    }
}

struct Unavailable;

#[async_trait]
impl ResourceTransport for Unavailable {
    async fn fetch(&self, _request: Value) -> Result<Value, CanopyError> {
        Err(CanopyError::transport("no resource transport configured"))
    }
}

/// Routes each kind to a static source or the server, per configured origin.
///
/// Kinds configured with [`ResourceOrigin::None`] are never requested. Server
/// responses are unwrapped from their `data.response_data` envelope.
pub struct CombinedStrategy {
    origins: ResourceConfig,
    static_source: Arc<dyn ResourceTransport>,
    server: Arc<dyn ResourceTransport>,
}

impl CombinedStrategy {
    /// Build from configured origins and both sources.
    pub fn new(
        origins: ResourceConfig,
        static_source: Arc<dyn ResourceTransport>,
        server: Arc<dyn ResourceTransport>,
    ) -> Self {
        Self {
            origins,
            static_source,
            server,
        }
    }

    /// Origin configured for `kind`.
    pub fn origin(&self, kind: ResourceKind) -> ResourceOrigin {
        match kind {
            ResourceKind::Templates => self.origins.templates,
            ResourceKind::Styles => self.origins.styles,
            ResourceKind::Localization => self.origins.localization,
            ResourceKind::AppConfig => self.origins.app_config,
            ResourceKind::OptionsData => self.origins.options_data,
            ResourceKind::Context => self.origins.context,
        }
    }

    fn kinds_for(&self, origin: ResourceOrigin) -> Vec<ResourceKind> {
        ResourceKind::ALL
            .into_iter()
            .filter(|kind| self.origin(*kind) == origin)
            .collect()
    }
}

#[async_trait]
impl FetchStrategy for CombinedStrategy {
    fn name(&self) -> &'static str {
        "combined"
    }

    async fn fetch_resources(&self, bundle: &ResourceBundle) -> Result<Value, CanopyError> {
        let static_part = bundle.select(&self.kinds_for(ResourceOrigin::Static));
        let server_part = bundle.select(&self.kinds_for(ResourceOrigin::Server));
        debug!(
            static_keys = static_part.len(),
            server_keys = server_part.len(),
            "splitting resource bundle by origin"
        );

        let static_fetch = async {
            if static_part.is_empty() {
                Ok(Value::Object(Map::new()))
            } else {
                self.static_source.fetch(static_part.to_request()).await
            }
        };
        let server_fetch = async {
            if server_part.is_empty() {
                Ok(Value::Object(Map::new()))
            } else {
                let envelope = self.server.fetch(server_part.to_request()).await?;
                envelope
                    .pointer(RESPONSE_DATA_POINTER)
                    .cloned()
                    .ok_or_else(|| {
                        CanopyError::resource_format("server response has no data.response_data")
                    })
            }
        };

        let (mut merged, server) = futures::future::try_join(static_fetch, server_fetch).await?;
        deep_merge_value(&mut merged, &server);
        Ok(merged)
    }
}
