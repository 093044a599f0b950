//! runnerfleet-listener — the per-pool message listener.
//!
//! ```text
//! SessionManager::open()   handshake -> pool (create or replace) -> lease
//!        │
//!        ▼
//! MessageLoop::run()       get_message(cursor) ──► delete ──► dispatch
//!        │                        │                      ├── JobAvailable -> acquire_jobs -> reserve
//!        │                        │                      ├── JobAssigned  -> assign
//!        │                        │                      └── JobCompleted -> complete
//!        │                        └── TokenExpired -> SessionManager::refresh()
//!        ▼
//! SessionManager::close()  on exit
//! ```
//!
//! Demand signals go to a shared [`runnerfleet_autoscale::DemandTracker`]
//! which the reconciler reads.

pub mod error;
pub mod listener;
pub mod message;
pub mod queue;
pub mod session;

pub use error::{ListenerError, MessageError, SetupError, SetupStep};
pub use listener::MessageLoop;
pub use message::{Message, MessageKind};
pub use queue::QueueClient;
pub use session::{SessionConfig, SessionManager};
