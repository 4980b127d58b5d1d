//! Busy surface doubles.

use async_trait::async_trait;
use canopy_core::CanopyError;
use canopy_tree::{BusyIndicator, Spinner, SpinnerFactory};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Spinner counting how often it was shown and hidden.
#[derive(Debug, Default)]
pub struct CountingSpinner {
    shows: AtomicUsize,
    hides: AtomicUsize,
}

impl CountingSpinner {
    /// Number of `show` calls.
    pub fn shows(&self) -> usize {
        self.shows.load(Ordering::SeqCst)
    }

    /// Number of `hide` calls.
    pub fn hides(&self) -> usize {
        self.hides.load(Ordering::SeqCst)
    }
}

impl Spinner for CountingSpinner {
    fn show(&self) {
        self.shows.fetch_add(1, Ordering::SeqCst);
    }

    fn hide(&self) {
        self.hides.fetch_add(1, Ordering::SeqCst);
    }
}

/// Factory handing out one shared [`CountingSpinner`].
///
/// Creation completes immediately unless the factory is gated, in which
/// case each creation waits for [`TestSpinnerFactory::release`].
#[derive(Debug, Default)]
pub struct TestSpinnerFactory {
    spinner: Arc<CountingSpinner>,
    created: AtomicUsize,
    gate: Option<Semaphore>,
}

impl TestSpinnerFactory {
    /// Factory creating immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory whose creations wait to be released.
    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    /// Let one pending creation finish.
    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    /// The spinner every creation returns.
    pub fn spinner(&self) -> Arc<CountingSpinner> {
        self.spinner.clone()
    }

    /// Number of completed creations.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpinnerFactory for TestSpinnerFactory {
    async fn create(&self) -> Result<Arc<dyn Spinner>, CanopyError> {
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|err| CanopyError::internal(err.to_string()))?
                .forget();
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(self.spinner.clone())
    }
}

/// Busy indicator over a fresh [`TestSpinnerFactory`].
pub fn test_busy_indicator() -> (Arc<BusyIndicator>, Arc<TestSpinnerFactory>) {
    let factory = Arc::new(TestSpinnerFactory::new());
    (Arc::new(BusyIndicator::new(factory.clone())), factory)
}
