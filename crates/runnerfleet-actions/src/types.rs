//! Wire and session types of the job source protocol.

use serde::{Deserialize, Serialize};

/// Service endpoint and admin token returned by the admin handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminConnection {
    #[serde(rename = "url")]
    pub service_url: String,
    #[serde(rename = "token")]
    pub admin_token: String,
}

/// A runner pool record at the job source ("runner scale set").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerPool {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub runner_group_id: i64,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub runner_setting: RunnerSetting,
}

impl RunnerPool {
    /// The canonical settings every pool is created or replaced with.
    pub fn canonical(name: &str) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            runner_group_id: 1,
            labels: vec![Label {
                name: name.to_string(),
                kind: "User".to_string(),
            }],
            runner_setting: RunnerSetting {
                ephemeral: true,
                disable_update: true,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RunnerSetting {
    #[serde(default)]
    pub ephemeral: bool,
    #[serde(default)]
    pub disable_update: bool,
}

/// Message-session lease as returned by the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionLease {
    pub session_id: String,
    #[serde(default)]
    pub owner_name: String,
    pub runner_scale_set: RunnerPool,
    pub message_queue_url: String,
    pub message_queue_access_token: String,
}

/// A live message session for one pool.
///
/// The `session_id` persists across refreshes; the queue URL and token
/// rotate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub pool_id: i64,
    pub session_id: String,
    pub owner_name: String,
    pub queue_url: String,
    pub queue_token: String,
    /// Unix timestamp (seconds) at which the queue token expires, when the
    /// token carries an `exp` claim.
    pub queue_token_expiry: Option<u64>,
}

/// A raw message read from the session queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    pub message_id: i64,
    pub message_type: String,
    #[serde(default)]
    pub body: String,
}

/// Busy state of a runner registered at the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerStatus {
    pub busy: bool,
}

/// A runner registration token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationToken {
    pub token: String,
    /// Unix timestamp (seconds).
    pub expires_at: u64,
}

/// Generic `{count, value}` list envelope used by the service API.
#[derive(Debug, Clone, Deserialize)]
pub struct ListEnvelope<T> {
    #[serde(default)]
    pub count: usize,
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
}
