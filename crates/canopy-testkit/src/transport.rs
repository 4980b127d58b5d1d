//! Test Resource Transports
//!
//! [`EchoTransport`] answers every requested key with a synthetic payload
//! and records what it was asked for, so tests can assert on request
//! batching. It can be gated to hold responses until the test releases
//! them, and scripted to fail or to answer with a malformed body.

use async_trait::async_trait;
use canopy_core::CanopyError;
use canopy_resource::{ResourceManager, ResourceTransport, TransportStrategy};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// How an [`EchoTransport`] answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoMode {
    /// Answer every key with `"<kind>:<key>"`
    Echo,
    /// Fail with a transport error
    Fail,
    /// Answer with a body of the wrong shape
    Malformed,
}

/// Resource transport that echoes requests back as resources.
#[derive(Debug)]
pub struct EchoTransport {
    mode: Mutex<EchoMode>,
    requests: Mutex<Vec<Value>>,
    calls: AtomicUsize,
    gate: Option<Semaphore>,
}

impl EchoTransport {
    /// Transport answering immediately.
    pub fn new() -> Self {
        Self {
            mode: Mutex::new(EchoMode::Echo),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            gate: None,
        }
    }

    /// Transport holding every response until [`EchoTransport::release`] is called.
    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new()
        }
    }

    /// Switch how subsequent requests are answered.
    pub fn set_mode(&self, mode: EchoMode) {
        *self.mode.lock() = mode;
    }

    /// Let `n` held requests complete.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    /// Number of fetch calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Request bodies received, in order.
    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().clone()
    }

    /// How many times `key` of wire kind `kind` was requested across all calls.
    pub fn times_requested(&self, kind: &str, key: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter_map(|request| request.get(kind).and_then(Value::as_array))
            .flatten()
            .filter(|requested| requested.as_str() == Some(key))
            .count()
    }

    fn answer(request: &Value) -> Value {
        let mut body = Map::new();
        let Some(fields) = request.as_object() else {
            return Value::Object(body);
        };
        for (kind, requested) in fields {
            let entries: Map<String, Value> = match requested {
                Value::Array(keys) => keys
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|key| (key.to_string(), json!(format!("{kind}:{key}"))))
                    .collect(),
                Value::Object(context) => context.clone(),
                _ => Map::new(),
            };
            body.insert(kind.clone(), Value::Object(entries));
        }
        Value::Object(body)
    }
}

impl Default for EchoTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceTransport for EchoTransport {
    async fn fetch(&self, request: Value) -> Result<Value, CanopyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|err| CanopyError::transport(err.to_string()))?
                .forget();
        }
        let mode = *self.mode.lock();
        match mode {
            EchoMode::Echo => Ok(Self::answer(&request)),
            EchoMode::Fail => Err(CanopyError::transport("resource server unreachable")),
            EchoMode::Malformed => Ok(json!({ "unexpected": { "shape": true } })),
        }
    }
}

/// Resource manager fetching through `transport`.
pub fn manager_with(transport: Arc<dyn ResourceTransport>) -> Arc<ResourceManager> {
    Arc::new(ResourceManager::new(Arc::new(TransportStrategy::new(transport))))
}

/// Wrap `data` in the `data.response_data` envelope used by server responses.
pub fn envelope(data: Value) -> Value {
    json!({ "data": { "response_data": data } })
}
