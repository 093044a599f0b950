//! Message loop — consume the session queue and feed demand.
//!
//! One loop per pool. Messages are handled strictly one at a time in
//! increasing id order; the cursor advances before dispatch so a message is
//! never dispatched twice by the same loop.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use runnerfleet_actions::{ErrorKind, QueueMessage, Session, SessionService};
use runnerfleet_autoscale::DemandTracker;
use runnerfleet_state::epoch_secs;

use crate::error::ListenerError;
use crate::message::{Message, MessageKind};
use crate::queue::QueueClient;
use crate::session::{SessionConfig, SessionManager};

pub struct MessageLoop {
    sessions: SessionManager,
    queue: QueueClient,
    demand: Arc<DemandTracker>,
    cursor: i64,
}

impl MessageLoop {
    pub fn new(
        service: Arc<dyn SessionService>,
        config: SessionConfig,
        demand: Arc<DemandTracker>,
    ) -> Self {
        Self {
            queue: QueueClient::new(service.clone()),
            sessions: SessionManager::new(service, config),
            demand,
            cursor: 0,
        }
    }

    /// Id of the last message taken off the queue.
    pub fn cursor(&self) -> i64 {
        self.cursor
    }

    /// Open the session and poll until shutdown. The session lease is
    /// released on the way out.
    ///
    /// Only setup failures are returned; steady-state errors are logged and
    /// polling continues.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), ListenerError> {
        let pool = self.sessions.identity().pool_name.clone();

        let session = tokio::select! {
            opened = self.sessions.open() => opened?,
            _ = shutdown.changed() => {
                info!(pool = %pool, "listener stopped before the session was opened");
                return Ok(());
            }
        };

        info!(pool = %pool, session_id = %session.session_id, "listening for messages");
        self.poll(session, &mut shutdown).await;

        if let Some(session) = self.sessions.active().cloned()
            && let Err(e) = self.sessions.close(&session).await
        {
            warn!(pool = %pool, session_id = %session.session_id, error = %e, "failed to release message session");
        }
        info!(pool = %pool, cursor = self.cursor, "listener stopped");
        Ok(())
    }

    async fn poll(&mut self, mut session: Session, shutdown: &mut watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                return;
            }

            let polled = tokio::select! {
                polled = self.queue.get_message(&session, self.cursor) => polled,
                _ = shutdown.changed() => return,
            };

            match polled {
                Ok(Some(raw)) => self.handle(&session, raw).await,
                Ok(None) => {}
                Err(e) if e.kind() == ErrorKind::TokenExpired => {
                    info!(session_id = %session.session_id, "message queue token expired, refreshing session");
                    match self.sessions.refresh(&session).await {
                        Ok(refreshed) => session = refreshed,
                        Err(e) => warn!(error = %e, "session refresh failed"),
                    }
                }
                Err(e) => warn!(cursor = self.cursor, error = %e, "get message failed"),
            }
        }
    }

    async fn handle(&mut self, session: &Session, raw: QueueMessage) {
        if raw.message_id <= self.cursor {
            debug!(
                message_id = raw.message_id,
                cursor = self.cursor,
                "message already processed, skipping"
            );
            self.queue.delete_message(session, raw.message_id).await;
            return;
        }

        self.cursor = raw.message_id;
        self.queue.delete_message(session, raw.message_id).await;

        match Message::parse(&raw) {
            Ok(message) => self.dispatch(session, message).await,
            Err(e) => warn!(error = %e, "dropping malformed message"),
        }
    }

    async fn dispatch(&self, session: &Session, message: Message) {
        match message.kind {
            MessageKind::JobAvailable { request_ids } => {
                if request_ids.is_empty() {
                    debug!(message_id = message.id, "job available without request ids");
                    return;
                }
                let Some(conn) = self.sessions.connection() else {
                    warn!(message_id = message.id, "no admin connection, cannot acquire jobs");
                    return;
                };
                match self.queue.acquire_jobs(conn, session, &request_ids).await {
                    Ok(granted) => {
                        let reserved = self.demand.reserve(&granted, epoch_secs());
                        info!(
                            message_id = message.id,
                            requested = request_ids.len(),
                            granted = granted.len(),
                            reserved,
                            "jobs acquired"
                        );
                    }
                    Err(e) => warn!(
                        message_id = message.id,
                        request_ids = ?request_ids,
                        error = %e,
                        "acquire jobs failed"
                    ),
                }
            }
            MessageKind::JobAssigned {
                request_id,
                pool_id,
                job_id,
            } => {
                if pool_id != 0 && pool_id != session.pool_id {
                    debug!(request_id, pool_id, "assignment for another pool, ignoring");
                    return;
                }
                if self.demand.assign(request_id) {
                    info!(request_id, job_id = ?job_id, "job assigned");
                } else {
                    debug!(request_id, "job assignment already recorded");
                }
            }
            MessageKind::JobCompleted {
                request_id,
                result,
                runner_name,
            } => {
                if self.demand.complete(request_id) {
                    info!(request_id, result = ?result, runner = ?runner_name, "job completed");
                } else {
                    debug!(request_id, "job completion already recorded");
                }
            }
            MessageKind::Unknown(message_type) => {
                info!(message_id = message.id, %message_type, "unknown message type, dropped");
            }
        }
    }
}
