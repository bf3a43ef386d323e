use futures::future::LocalBoxFuture;

use crate::errors::FinalizeError;
use crate::types::DynError;

/// Teardown action releasing one acquired resource.
pub type Finalizer = Box<dyn FnOnce() -> Result<(), DynError> + Send>;

/// Teardown action whose release itself may suspend.
pub type AsyncFinalizer = Box<dyn FnOnce() -> LocalBoxFuture<'static, Result<(), DynError>> + Send>;

/// Ordered teardown actions for one scope, released in strict reverse
/// registration order when the scope exits.
#[derive(Default)]
pub struct FinalizerStack {
    entries: Vec<(String, Finalizer)>,
}

impl FinalizerStack {
    pub fn register(&mut self, owner: impl Into<String>, finalizer: Finalizer) {
        self.entries.push((owner.into(), finalizer));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs every registered action, newest first. A failing action never
    /// prevents the remaining ones from running; all failures are collected.
    pub fn run_all(&mut self) -> Result<(), FinalizeError> {
        let mut failures = Vec::new();
        while let Some((owner, finalizer)) = self.entries.pop() {
            tracing::debug!("releasing resource owned by `{owner}`");
            if let Err(error) = finalizer() {
                tracing::warn!("finalizer for `{owner}` failed - error: {error:?}");
                failures.push((owner, error));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(FinalizeError { failures })
        }
    }
}

enum StackEntry {
    Eager(Finalizer),
    Suspending(AsyncFinalizer),
}

/// Finalizer stack for suspending scopes.
///
/// Holds both eager and suspending teardowns in one acquisition order, the
/// way a suspending resolver acquires resources from factories of both
/// kinds.
#[derive(Default)]
pub struct AsyncFinalizerStack {
    entries: Vec<(String, StackEntry)>,
}

impl AsyncFinalizerStack {
    pub fn register(&mut self, owner: impl Into<String>, finalizer: Finalizer) {
        self.entries.push((owner.into(), StackEntry::Eager(finalizer)));
    }

    pub fn register_suspending(&mut self, owner: impl Into<String>, finalizer: AsyncFinalizer) {
        self.entries.push((owner.into(), StackEntry::Suspending(finalizer)));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs every registered action, newest first, awaiting the suspending
    /// ones. Failures are collected, never short-circuited.
    pub async fn run_all(&mut self) -> Result<(), FinalizeError> {
        let mut failures = Vec::new();
        while let Some((owner, entry)) = self.entries.pop() {
            tracing::debug!("releasing resource owned by `{owner}`");
            let result = match entry {
                StackEntry::Eager(finalizer) => finalizer(),
                StackEntry::Suspending(finalizer) => finalizer().await,
            };
            if let Err(error) = result {
                tracing::warn!("finalizer for `{owner}` failed - error: {error:?}");
                failures.push((owner, error));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(FinalizeError { failures })
        }
    }
}
