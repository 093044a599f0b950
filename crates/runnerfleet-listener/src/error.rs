//! Listener error types.

use std::fmt;

use thiserror::Error;

use runnerfleet_actions::ActionsError;

/// The step of session setup that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStep {
    AdminHandshake,
    RunnerPool,
    MessageSession,
}

impl fmt::Display for SetupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SetupStep::AdminHandshake => "admin handshake",
            SetupStep::RunnerPool => "runner pool registration",
            SetupStep::MessageSession => "message session",
        })
    }
}

/// Session setup failed; no session was established.
#[derive(Debug, Error)]
#[error("session setup failed at {step}: {source}")]
pub struct SetupError {
    pub step: SetupStep,
    #[source]
    pub source: ActionsError,
}

impl SetupError {
    /// Adapter for `map_err` that tags an error with its step.
    pub fn at(step: SetupStep) -> impl FnOnce(ActionsError) -> SetupError {
        move |source| SetupError { step, source }
    }
}

/// Errors that stop the listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error("invalid listener configuration: {0}")]
    Config(String),
}

/// A queue message whose body could not be read.
#[derive(Debug, Error)]
#[error("malformed {message_type} message {message_id}: {reason}")]
pub struct MessageError {
    pub message_id: i64,
    pub message_type: String,
    pub reason: String,
}
