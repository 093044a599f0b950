//! Queue client — message and job-claim calls bound to a session.

use std::sync::Arc;

use tracing::{debug, warn};

use runnerfleet_actions::{ActionsResult, AdminConnection, QueueMessage, Session, SessionService};

/// Thin protocol operations over a live session.
#[derive(Clone)]
pub struct QueueClient {
    service: Arc<dyn SessionService>,
}

impl QueueClient {
    pub fn new(service: Arc<dyn SessionService>) -> Self {
        Self { service }
    }

    /// Next message after `cursor`. `Ok(None)` when the long-poll came back
    /// empty. A `TokenExpired` kind means the session must be refreshed.
    pub async fn get_message(
        &self,
        session: &Session,
        cursor: i64,
    ) -> ActionsResult<Option<QueueMessage>> {
        let message = self
            .service
            .get_message(&session.queue_url, &session.queue_token, cursor)
            .await?;
        if let Some(message) = &message {
            debug!(
                message_id = message.message_id,
                message_type = %message.message_type,
                "message received"
            );
        }
        Ok(message)
    }

    /// Acknowledge a message. Failures are logged, not retried: the message
    /// may be redelivered.
    pub async fn delete_message(&self, session: &Session, message_id: i64) {
        match self
            .service
            .delete_message(&session.queue_url, &session.queue_token, message_id)
            .await
        {
            Ok(()) => debug!(message_id, "message deleted"),
            Err(e) => warn!(message_id, error = %e, "failed to delete message"),
        }
    }

    /// Claim `request_ids`; returns the granted subset. Ids missing from the
    /// result were taken elsewhere or are no longer pending.
    pub async fn acquire_jobs(
        &self,
        conn: &AdminConnection,
        session: &Session,
        request_ids: &[i64],
    ) -> ActionsResult<Vec<i64>> {
        self.service
            .acquire_jobs(conn, session.pool_id, &session.queue_token, request_ids)
            .await
    }
}
