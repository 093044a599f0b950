//! Typed queue messages.

use serde::Deserialize;
use serde::de::DeserializeOwned;

use runnerfleet_actions::QueueMessage;

use crate::error::MessageError;

pub const JOB_AVAILABLE: &str = "RunnerScaleSetJobAvailable";
pub const JOB_ASSIGNED: &str = "RunnerScaleSetJobAssigned";
pub const JOB_COMPLETED: &str = "RunnerScaleSetJobCompleted";

/// What a message asks of the listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    /// Jobs are waiting; try to claim them.
    JobAvailable { request_ids: Vec<i64> },
    /// A job was handed to a runner of `pool_id`.
    JobAssigned {
        request_id: i64,
        pool_id: i64,
        job_id: Option<String>,
    },
    /// A job finished.
    JobCompleted {
        request_id: i64,
        result: Option<String>,
        runner_name: Option<String>,
    },
    /// Any other message type. Dropped by the loop.
    Unknown(String),
}

/// A queue message with a parsed body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: i64,
    pub kind: MessageKind,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AvailableBody {
    #[serde(default)]
    runner_request_ids: Vec<i64>,
    #[serde(default)]
    runner_request_id: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssignedBody {
    runner_request_id: i64,
    #[serde(default)]
    runner_scale_set_id: i64,
    #[serde(default)]
    job_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompletedBody {
    runner_request_id: i64,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    runner_name: Option<String>,
}

impl Message {
    pub fn parse(raw: &QueueMessage) -> Result<Self, MessageError> {
        let kind = match raw.message_type.as_str() {
            JOB_AVAILABLE => {
                let body: AvailableBody = body(raw)?;
                let mut request_ids = body.runner_request_ids;
                if let Some(id) = body.runner_request_id
                    && !request_ids.contains(&id)
                {
                    request_ids.push(id);
                }
                MessageKind::JobAvailable { request_ids }
            }
            JOB_ASSIGNED => {
                let body: AssignedBody = body(raw)?;
                MessageKind::JobAssigned {
                    request_id: body.runner_request_id,
                    pool_id: body.runner_scale_set_id,
                    job_id: body.job_id,
                }
            }
            JOB_COMPLETED => {
                let body: CompletedBody = body(raw)?;
                MessageKind::JobCompleted {
                    request_id: body.runner_request_id,
                    result: body.result,
                    runner_name: body.runner_name,
                }
            }
            other => MessageKind::Unknown(other.to_string()),
        };
        Ok(Self {
            id: raw.message_id,
            kind,
        })
    }
}

fn body<T: DeserializeOwned>(raw: &QueueMessage) -> Result<T, MessageError> {
    serde_json::from_str(&raw.body).map_err(|e| MessageError {
        message_id: raw.message_id,
        message_type: raw.message_type.clone(),
        reason: e.to_string(),
    })
}
