//! runnerfleet-autoscale — demand-driven pool sizing.
//!
//! The message loop feeds job events into a [`DemandTracker`]; the
//! [`Reconciler`] reads consistent snapshots of it and converges the pool's
//! worker pods in the state store.
//!
//! # Sizing
//!
//! ```text
//! demand  = unexpired reservations + assigned, not yet completed jobs
//! desired = clip(max(min_replicas, demand), max_replicas)
//!
//! desired > available  -> create (desired - available) pods
//! desired < available  -> after scale_down_delay since the last scale-up,
//!                         delete up to (available - desired) pods:
//!                         offline, then unregistered past the timeout,
//!                         then idle. Busy runners are never deleted.
//! ```
//!
//! A rate limit from the job source aborts scale-down for the pass and asks
//! the caller to requeue after a fixed backoff.

pub mod demand;
pub mod reconciler;

pub use demand::{DemandSnapshot, DemandTracker};
pub use reconciler::{
    ReconcileError, ReconcileOutcome, ReconcileResult, Reconciler, ReconcilerConfig,
    desired_replicas,
};
