//! Resource manager: per-kind caches plus a pluggable fetch strategy
//!
//! The manager is constructed once by the application and shared by
//! reference with every orchestrator that loads a tree. It is the single
//! owner of the caches; collectors only query it.

use crate::bundle::ResourceBundle;
use crate::cache::{CacheStats, ContextCache, KeyedCache};
use crate::kinds::ResourceKind;
use crate::strategy::FetchStrategy;
use canopy_core::CanopyError;
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, warn};

/// Outcome of one `load_resources` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Keys sent to the strategy by this call
    pub requested: usize,
    /// Cache entries added from the response
    pub applied: usize,
    /// Keys dropped because they were already cached
    pub cached: usize,
    /// Keys another pass was already fetching
    pub awaited: usize,
}

impl LoadReport {
    /// True when nothing had to be fetched by this call.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.requested == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum FlightKey {
    Keyed(ResourceKind, String),
    Context(String, String),
}

/// Response body expected from a fetch strategy.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ResourceResponse {
    #[serde(default)]
    templates: Map<String, Value>,
    #[serde(default)]
    styles: Map<String, Value>,
    #[serde(default)]
    l10n: Map<String, Value>,
    #[serde(default)]
    app_config: Map<String, Value>,
    #[serde(default)]
    options_data: Map<String, Value>,
    #[serde(default)]
    context: Map<String, Value>,
}

/// Owner of every resource cache and the strategy used to fill them.
pub struct ResourceManager {
    templates: KeyedCache,
    styles: KeyedCache,
    localization: KeyedCache,
    app_config: KeyedCache,
    options_data: KeyedCache,
    context: ContextCache,
    strategy: RwLock<Arc<dyn FetchStrategy>>,
    in_flight: Mutex<HashMap<FlightKey, watch::Receiver<bool>>>,
    stats: Mutex<CacheStats>,
}

impl ResourceManager {
    /// Create a manager with empty caches.
    pub fn new(strategy: Arc<dyn FetchStrategy>) -> Self {
        Self {
            templates: KeyedCache::new(),
            styles: KeyedCache::new(),
            localization: KeyedCache::new(),
            app_config: KeyedCache::new(),
            options_data: KeyedCache::new(),
            context: ContextCache::new(),
            strategy: RwLock::new(strategy),
            in_flight: Mutex::new(HashMap::new()),
            stats: Mutex::new(CacheStats::default()),
        }
    }

    /// Current fetch strategy.
    pub fn strategy(&self) -> Arc<dyn FetchStrategy> {
        self.strategy.read().clone()
    }

    /// Replace the fetch strategy for subsequent loads.
    pub fn set_strategy(&self, strategy: Arc<dyn FetchStrategy>) {
        debug!(strategy = strategy.name(), "resource strategy replaced");
        *self.strategy.write() = strategy;
    }

    /// Cache for a keyed kind. `None` for [`ResourceKind::Context`].
    pub fn cache(&self, kind: ResourceKind) -> Option<&KeyedCache> {
        match kind {
            ResourceKind::Templates => Some(&self.templates),
            ResourceKind::Styles => Some(&self.styles),
            ResourceKind::Localization => Some(&self.localization),
            ResourceKind::AppConfig => Some(&self.app_config),
            ResourceKind::OptionsData => Some(&self.options_data),
            ResourceKind::Context => None,
        }
    }

    /// Context payload cache.
    pub fn context_cache(&self) -> &ContextCache {
        &self.context
    }

    /// Whether a keyed resource has been loaded.
    pub fn is_loaded(&self, kind: ResourceKind, key: &str) -> bool {
        self.cache(kind).is_some_and(|cache| cache.exists(key))
    }

    /// Whether the context payload of `node` under `name` has been loaded.
    pub fn context_loaded(&self, name: &str, node: &str) -> bool {
        self.context.exists(name, node)
    }

    /// Loaded value of a keyed resource.
    pub fn get(&self, kind: ResourceKind, key: &str) -> Option<Value> {
        self.cache(kind).and_then(|cache| cache.get(key))
    }

    /// Loaded context payload addressed to `node`.
    pub fn context_for(&self, name: &str, node: &str) -> Option<Value> {
        self.context.get(name, node)
    }

    /// Snapshot of cache sizes and request counters.
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.lock().clone();
        stats.entries = ResourceKind::KEYED
            .iter()
            .filter_map(|kind| self.cache(*kind))
            .map(KeyedCache::len)
            .sum::<usize>()
            + self.context.len();
        stats
    }

    /// Clear every cache and counter. Test harnesses only.
    pub fn reset(&self) {
        for kind in ResourceKind::KEYED {
            if let Some(cache) = self.cache(kind) {
                cache.clear();
            }
        }
        self.context.clear();
        *self.stats.lock() = CacheStats::default();
    }

    /// Load every resource of `bundle` that is not cached yet.
    ///
    /// Resolves immediately when nothing is left after removing cached keys.
    /// Keys another pass is fetching are not requested again; this call waits
    /// for that pass instead. A response that does not have the expected
    /// shape is rejected whole with [`CanopyError::ResourceFormat`].
    pub async fn load_resources(&self, bundle: ResourceBundle) -> Result<LoadReport, CanopyError> {
        let mut bundle = bundle;
        let mut report = LoadReport::default();
        let mut waiters: Vec<watch::Receiver<bool>> = Vec::new();

        let guard = {
            let mut flights = self.in_flight.lock();
            self.sanitize(&mut bundle, &flights, &mut waiters, &mut report);

            if bundle.is_empty() {
                None
            } else {
                let (tx, rx) = watch::channel(false);
                let keys = flight_keys(&bundle);
                for key in &keys {
                    flights.insert(key.clone(), rx.clone());
                }
                Some(FlightGuard {
                    manager: self,
                    keys,
                    tx,
                })
            }
        };

        {
            let mut stats = self.stats.lock();
            stats.keys_skipped += (report.cached + report.awaited) as u64;
        }

        let outcome = match guard {
            None => {
                debug!(awaited = report.awaited, "nothing to load");
                Ok(())
            }
            Some(guard) => {
                report.requested = bundle.len();
                {
                    let mut stats = self.stats.lock();
                    stats.requests += 1;
                    stats.keys_requested += report.requested as u64;
                }
                let strategy = self.strategy();
                debug!(
                    strategy = strategy.name(),
                    keys = report.requested,
                    "fetching resources"
                );
                let result = strategy.fetch_resources(&bundle).await;
                let applied = result.and_then(|response| self.apply(response));
                drop(guard);
                applied.map(|count| report.applied = count)
            }
        };

        for mut waiter in waiters {
            let _ = waiter.wait_for(|done| *done).await.map(|_| ());
        }

        outcome.map(|()| report)
    }

    fn sanitize(
        &self,
        bundle: &mut ResourceBundle,
        flights: &HashMap<FlightKey, watch::Receiver<bool>>,
        waiters: &mut Vec<watch::Receiver<bool>>,
        report: &mut LoadReport,
    ) {
        for kind in ResourceKind::KEYED {
            let keys: Vec<String> = bundle.keys(kind).map(str::to_string).collect();
            for key in keys {
                if self.is_loaded(kind, &key) {
                    bundle.remove(kind, &key);
                    report.cached += 1;
                } else if let Some(rx) = flights.get(&FlightKey::Keyed(kind, key.clone())) {
                    bundle.remove(kind, &key);
                    waiters.push(rx.clone());
                    report.awaited += 1;
                }
            }
        }
        bundle.retain_context(|name, node| {
            if self.context.exists(name, node) {
                report.cached += 1;
                return false;
            }
            match flights.get(&FlightKey::Context(name.to_string(), node.to_string())) {
                Some(rx) => {
                    waiters.push(rx.clone());
                    report.awaited += 1;
                    false
                }
                None => true,
            }
        });
    }

    fn apply(&self, response: Value) -> Result<usize, CanopyError> {
        let response: ResourceResponse = serde_json::from_value(response).map_err(|err| {
            error!(%err, "resource response does not comply with the expected shape");
            CanopyError::resource_format(format!("resource response: {err}"))
        })?;

        let mut context = Vec::with_capacity(response.context.len());
        for (name, entries) in response.context {
            match entries {
                Value::Object(entries) => context.push((name, entries)),
                other => {
                    error!(name, "context entry is not an object");
                    return Err(CanopyError::resource_format(format!(
                        "context '{name}' must be an object, got {other}"
                    )));
                }
            }
        }

        let mut applied = self.templates.append(response.templates);
        applied += self.styles.append(response.styles);
        applied += self.localization.append(response.l10n);
        applied += self.app_config.append(response.app_config);
        applied += self.options_data.append(response.options_data);
        for (name, entries) in context {
            applied += self.context.append(&name, entries);
        }
        if applied == 0 {
            warn!("resource response contained no new entries");
        }
        Ok(applied)
    }
}

impl fmt::Debug for ResourceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceManager")
            .field("strategy", &self.strategy.read().name())
            .field("stats", &self.stats())
            .finish()
    }
}

fn flight_keys(bundle: &ResourceBundle) -> Vec<FlightKey> {
    let mut keys = Vec::with_capacity(bundle.len());
    for kind in ResourceKind::KEYED {
        keys.extend(
            bundle
                .keys(kind)
                .map(|key| FlightKey::Keyed(kind, key.to_string())),
        );
    }
    for (name, entries) in bundle.context() {
        for key in entries.keys() {
            keys.extend(
                crate::bundle::split_node_key(key)
                    .map(|id| FlightKey::Context(name.clone(), id.to_string())),
            );
        }
    }
    keys
}

/// Releases in-flight keys and wakes waiters, also when the load is dropped.
struct FlightGuard<'a> {
    manager: &'a ResourceManager,
    keys: Vec<FlightKey>,
    tx: watch::Sender<bool>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        let mut flights = self.manager.in_flight.lock();
        for key in &self.keys {
            flights.remove(key);
        }
        let _ = self.tx.send(true);
    }
}
