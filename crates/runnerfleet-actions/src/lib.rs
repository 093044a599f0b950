//! runnerfleet-actions — job source protocol for the runner scaling engine.
//!
//! Wraps the HTTP API of the job source (GitHub Actions service) behind two
//! narrow traits so the listener and the reconciler can be driven by mocks
//! in tests:
//!
//! ```text
//! SessionService                      RunnerService
//!   ├── admin_connection()              ├── runner_status()
//!   ├── get/create/replace pool         └── registration_token()
//!   ├── create/refresh/delete session
//!   ├── get_message / delete_message
//!   └── acquire_jobs
//! ```
//!
//! `ActionsClient` implements both over `reqwest`. Every failure is an
//! [`ActionsError`]; callers branch on [`ActionsError::kind`], a closed
//! enumeration, rather than on concrete variants.

pub mod cache;
pub mod client;
pub mod credentials;
pub mod error;
pub mod scope;
pub mod service;
pub mod types;

pub use cache::TtlCache;
pub use client::{ActionsClient, ClientConfig};
pub use credentials::Credentials;
pub use error::{ActionsError, ActionsResult, ErrorKind};
pub use scope::Scope;
pub use service::{RunnerService, ServiceFuture, SessionService};
pub use types::*;
