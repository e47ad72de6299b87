//! Observer trait for operation and maintenance events.
//!
//! Inject an [`Arc<dyn OperationObserver>`] via
//! [`crate::config::BotConfigBuilder::observer`] to receive events as the
//! orchestrator runs operations for users and as the background sweeps
//! reclaim sessions and artifacts.
//!
//! # Why callbacks instead of channels?
//!
//! The host decides where events go: a terminal spinner, a metrics exporter,
//! an audit log. The library only promises to call the hook. The trait is
//! `Send + Sync` because different users' operations run on different tasks
//! and may report at the same time.
//!
//! # Example
//!
//! ```rust
//! use docbot::{BotConfig, OperationId, OperationObserver, UserId};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingObserver {
//!     completed: AtomicUsize,
//! }
//!
//! impl OperationObserver for CountingObserver {
//!     fn on_operation_complete(&self, user: &UserId, operation: OperationId, outputs: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{user}: {operation} produced {outputs} file(s)");
//!     }
//! }
//!
//! let observer = Arc::new(CountingObserver { completed: AtomicUsize::new(0) });
//!
//! let config = BotConfig::builder()
//!     .observer(observer as Arc<dyn OperationObserver>)
//!     .build()
//!     .unwrap();
//! ```

use crate::catalog::OperationId;
use crate::session::UserId;
use std::sync::Arc;

/// What a background sweep reclaimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepKind {
    Sessions,
    Artifacts,
}

/// Called by the orchestrator around engine calls and by the sweeps.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Calls for different users may arrive concurrently.
pub trait OperationObserver: Send + Sync {
    /// Called right before the engine is invoked.
    ///
    /// # Arguments
    /// * `inputs` — number of uploaded files handed to the engine
    fn on_operation_start(&self, user: &UserId, operation: OperationId, inputs: usize) {
        let _ = (user, operation, inputs);
    }

    /// Called after every output was delivered to the user.
    fn on_operation_complete(&self, user: &UserId, operation: OperationId, outputs: usize) {
        let _ = (user, operation, outputs);
    }

    /// Called when an operation that reached the engine failed.
    ///
    /// # Arguments
    /// * `error` — human-readable error description
    fn on_operation_error(&self, user: &UserId, operation: OperationId, error: &str) {
        let _ = (user, operation, error);
    }

    /// Called after each sweep pass, even when nothing was removed.
    fn on_sweep(&self, kind: SweepKind, removed: usize) {
        let _ = (kind, removed);
    }
}

/// The default observer: ignores every event.
pub struct NoopObserver;

impl OperationObserver for NoopObserver {}

/// Convenience alias matching the type stored in [`crate::config::BotConfig`].
pub type SharedObserver = Arc<dyn OperationObserver>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingObserver {
        starts: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
        swept: AtomicUsize,
    }

    impl OperationObserver for TrackingObserver {
        fn on_operation_start(&self, _user: &UserId, _operation: OperationId, _inputs: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_operation_complete(&self, _user: &UserId, _operation: OperationId, _outputs: usize) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_operation_error(&self, _user: &UserId, _operation: OperationId, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_sweep(&self, _kind: SweepKind, removed: usize) {
            self.swept.fetch_add(removed, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_observer_does_not_panic() {
        let user = UserId::from("u");
        let obs = NoopObserver;
        obs.on_operation_start(&user, OperationId::Merge, 2);
        obs.on_operation_complete(&user, OperationId::Merge, 1);
        obs.on_operation_error(&user, OperationId::Merge, "boom");
        obs.on_sweep(SweepKind::Artifacts, 3);
    }

    #[test]
    fn tracking_observer_receives_events() {
        let user = UserId::from("u");
        let tracker = TrackingObserver::default();

        tracker.on_operation_start(&user, OperationId::Split, 1);
        tracker.on_operation_complete(&user, OperationId::Split, 4);
        tracker.on_operation_start(&user, OperationId::Ocr, 1);
        tracker.on_operation_error(&user, OperationId::Ocr, "engine timeout");
        tracker.on_sweep(SweepKind::Sessions, 2);
        tracker.on_sweep(SweepKind::Artifacts, 5);

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.swept.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn arc_dyn_observer_works() {
        let obs: SharedObserver = Arc::new(NoopObserver);
        obs.on_operation_start(&UserId::from("u"), OperationId::Repair, 1);
    }
}
