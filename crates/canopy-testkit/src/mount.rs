//! Mount target and error display doubles.

use canopy_core::{CanopyError, NodeId};
use canopy_tree::{ErrorDisplay, LifecycleState, MountTarget, NodeRef};
use parking_lot::Mutex;

/// Mount target recording every commit.
#[derive(Debug, Default)]
pub struct RecordingMountTarget {
    commits: Mutex<Vec<(NodeId, LifecycleState)>>,
    fail_with: Mutex<Option<CanopyError>>,
}

impl RecordingMountTarget {
    /// Target accepting every commit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Target rejecting commits with `error`.
    pub fn failing(error: CanopyError) -> Self {
        Self {
            commits: Mutex::new(Vec::new()),
            fail_with: Mutex::new(Some(error)),
        }
    }

    /// Committed roots with the state they were in when committed.
    pub fn commits(&self) -> Vec<(NodeId, LifecycleState)> {
        self.commits.lock().clone()
    }

    /// Number of commits.
    pub fn count(&self) -> usize {
        self.commits.lock().len()
    }
}

impl MountTarget for RecordingMountTarget {
    fn commit(&self, root: &NodeRef) -> Result<(), CanopyError> {
        self.commits.lock().push((root.id(), root.state()));
        match self.fail_with.lock().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Error display recording what it was asked to show.
#[derive(Debug, Default)]
pub struct RecordingErrorDisplay {
    shown: Mutex<Vec<(NodeId, CanopyError)>>,
}

impl RecordingErrorDisplay {
    /// Empty display.
    pub fn new() -> Self {
        Self::default()
    }

    /// Errors shown so far.
    pub fn shown(&self) -> Vec<(NodeId, CanopyError)> {
        self.shown.lock().clone()
    }
}

impl ErrorDisplay for RecordingErrorDisplay {
    fn show(&self, root: &NodeRef, error: &CanopyError) {
        self.shown.lock().push((root.id(), error.clone()));
    }
}
