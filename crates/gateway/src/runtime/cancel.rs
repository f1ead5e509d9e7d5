//! Advisory cancellation registry.
//!
//! A concurrent map from workflow id (chat id, activation id, user id) to
//! a requested-cancellation flag. The registry owns no workflows: every
//! long-running loop polls [`CancellationRegistry::is_requested`] once per
//! iteration and, on `true`, aborts with a cancellation error and clears
//! the flag.

use std::collections::HashSet;

use parking_lot::Mutex;

#[derive(Default)]
pub struct CancellationRegistry {
    requested: Mutex<HashSet<String>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of a workflow. Idempotent; empty ids are
    /// ignored.
    pub fn request(&self, workflow_id: &str) {
        if workflow_id.is_empty() {
            return;
        }
        self.requested.lock().insert(workflow_id.to_owned());
    }

    pub fn is_requested(&self, workflow_id: &str) -> bool {
        self.requested.lock().contains(workflow_id)
    }

    /// Remove the flag. Called by whoever observed and honored it.
    pub fn clear(&self, workflow_id: &str) {
        self.requested.lock().remove(workflow_id);
    }

    /// Check-and-clear in one step for loop bodies.
    pub fn take(&self, workflow_id: &str) -> bool {
        self.requested.lock().remove(workflow_id)
    }
}
