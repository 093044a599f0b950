//! runnerfleet-state — fleet records for the runner scaling engine.
//!
//! Backed by [redb](https://docs.rs/redb), this crate plays the role of the
//! orchestration platform's declarative store: it holds one `PoolRecord`
//! (spec + status) per worker pool and the `WorkerPod` records owned by it.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Pods are keyed `{pool}:{pod}` so the pods owned by a pool can be found
//! with a prefix scan, and deleting a pool cascades to its pods.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared between the reconciler and the daemon.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
