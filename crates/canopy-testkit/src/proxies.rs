//! Save and fetch proxy doubles.

use crate::transport::envelope;
use async_trait::async_trait;
use canopy_core::CanopyError;
use canopy_flow::{FetchProxy, SaveProxy};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use tokio::sync::Semaphore;

/// One recorded submission.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    /// Submitted body
    pub payload: Value,
    /// Submitted metadata
    pub metadata: Option<Value>,
}

/// Save proxy recording submissions and answering from a script.
///
/// Scripted results are consumed in order; once the script is empty every
/// submission succeeds with `{"saved": true}`.
#[derive(Debug, Default)]
pub struct MockSaveProxy {
    submissions: Mutex<Vec<Submission>>,
    script: Mutex<VecDeque<Result<Value, CanopyError>>>,
    gate: Option<Semaphore>,
}

impl MockSaveProxy {
    /// Proxy answering immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Proxy holding every submission until [`MockSaveProxy::release`] is called.
    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    /// Queue the result of a future submission.
    pub fn push_result(&self, result: Result<Value, CanopyError>) {
        self.script.lock().push_back(result);
    }

    /// Let `n` held submissions complete.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    /// Submissions received so far.
    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().clone()
    }

    /// Number of submissions received.
    pub fn count(&self) -> usize {
        self.submissions.lock().len()
    }
}

#[async_trait]
impl SaveProxy for MockSaveProxy {
    async fn submit(&self, payload: Value, metadata: Option<Value>) -> Result<Value, CanopyError> {
        self.submissions.lock().push(Submission { payload, metadata });
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|err| CanopyError::transport(err.to_string()))?
                .forget();
        }
        let scripted = self.script.lock().pop_front();
        scripted.unwrap_or_else(|| Ok(json!({ "saved": true })))
    }
}

/// Fetch proxy answering with a fixed envelope and recording its arguments.
#[derive(Debug)]
pub struct MockFetchProxy {
    response: Mutex<Result<Value, CanopyError>>,
    args: Mutex<Vec<Value>>,
}

impl MockFetchProxy {
    /// Proxy answering with `data` inside a well-formed envelope.
    pub fn with_data(data: Value) -> Self {
        Self::with_response(Ok(envelope(data)))
    }

    /// Proxy answering with `response` as-is.
    pub fn with_response(response: Result<Value, CanopyError>) -> Self {
        Self {
            response: Mutex::new(response),
            args: Mutex::new(Vec::new()),
        }
    }

    /// Arguments received so far.
    pub fn args(&self) -> Vec<Value> {
        self.args.lock().clone()
    }
}

#[async_trait]
impl FetchProxy for MockFetchProxy {
    async fn fetch(&self, args: Value) -> Result<Value, CanopyError> {
        self.args.lock().push(args);
        self.response.lock().clone()
    }
}
