/*
    core_sync - Send orchestration and convergence

    The coordinator drives the per-send state machine and owns the
    public surface; the reconciler guarantees mirror convergence under
    partial failure; the retry policy bounds how long a transient store
    outage is absorbed before reconciliation takes over.
*/

pub mod coordinator;
pub mod errors;
pub mod reconcile;
pub mod retry;

pub use coordinator::{DeliveryState, SendReceipt, SendState, SyncCoordinator};
pub use errors::{SyncError, SyncResult};
pub use reconcile::{Reconciler, ReconcilerConfig, ReconcilerStats};
pub use retry::{RetryPolicy, Transient};
