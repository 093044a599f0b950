//! Session manager — admin handshake, pool registration and session lease.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use runnerfleet_actions::{
    ActionsResult, AdminConnection, RunnerPool, Session, SessionService,
};
use runnerfleet_state::WorkerPoolIdentity;

use crate::error::{ListenerError, SetupError, SetupStep};

/// Identity and retry settings for one pool's listener.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub identity: WorkerPoolIdentity,
    /// Name the session lease is registered under, usually the host name.
    pub owner_name: String,
    /// Attempts at creating the message session before setup fails.
    pub create_attempts: u32,
    pub create_retry_delay: Duration,
}

impl SessionConfig {
    pub fn new(identity: WorkerPoolIdentity, owner_name: impl Into<String>) -> Self {
        Self {
            identity,
            owner_name: owner_name.into(),
            create_attempts: 3,
            create_retry_delay: Duration::from_secs(30),
        }
    }

    pub fn validate(&self) -> Result<(), ListenerError> {
        if self.identity.pool_name.is_empty() {
            return Err(ListenerError::Config("pool name is empty".to_string()));
        }
        if self.identity.is_unscoped() {
            return Err(ListenerError::Config(
                "one of enterprise, organization or repository must be set".to_string(),
            ));
        }
        if self.owner_name.is_empty() {
            return Err(ListenerError::Config("session owner name is empty".to_string()));
        }
        if self.create_attempts == 0 {
            return Err(ListenerError::Config(
                "session create attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Opens, refreshes and closes the message session of one pool.
///
/// At most one lease is live at a time: opening a new session releases the
/// previous one first.
pub struct SessionManager {
    service: Arc<dyn SessionService>,
    config: SessionConfig,
    conn: Option<AdminConnection>,
    pool: Option<RunnerPool>,
    active: Option<Session>,
}

impl SessionManager {
    pub fn new(service: Arc<dyn SessionService>, config: SessionConfig) -> Self {
        Self {
            service,
            config,
            conn: None,
            pool: None,
            active: None,
        }
    }

    pub fn identity(&self) -> &WorkerPoolIdentity {
        &self.config.identity
    }

    /// Admin connection of the current session.
    pub fn connection(&self) -> Option<&AdminConnection> {
        self.conn.as_ref()
    }

    /// The pool record registered by the last `open`.
    pub fn pool(&self) -> Option<&RunnerPool> {
        self.pool.as_ref()
    }

    /// The live session, if any.
    pub fn active(&self) -> Option<&Session> {
        self.active.as_ref()
    }

    /// Handshake, register the pool with canonical settings and lease a
    /// message session, in that order.
    pub async fn open(&mut self) -> Result<Session, SetupError> {
        if let Some(prior) = self.active.clone()
            && let Err(e) = self.close(&prior).await
        {
            warn!(session_id = %prior.session_id, error = %e, "failed to release prior session");
        }

        let pool_name = &self.config.identity.pool_name;
        let conn = self
            .service
            .admin_connection(&self.config.identity)
            .await
            .map_err(SetupError::at(SetupStep::AdminHandshake))?;
        let pool = self
            .register_pool(&conn)
            .await
            .map_err(SetupError::at(SetupStep::RunnerPool))?;
        let session = self
            .create_session(&conn, pool.id)
            .await
            .map_err(SetupError::at(SetupStep::MessageSession))?;
        let session = Session {
            pool_id: pool.id,
            ..session
        };

        info!(
            pool = %pool_name,
            pool_id = pool.id,
            session_id = %session.session_id,
            "message session opened"
        );
        self.conn = Some(conn);
        self.pool = Some(pool);
        self.active = Some(session.clone());
        Ok(session)
    }

    /// Re-run the handshake and re-issue the lease for `session`'s pool.
    /// The pool record is left untouched.
    pub async fn refresh(&mut self, session: &Session) -> Result<Session, SetupError> {
        let conn = self
            .service
            .admin_connection(&self.config.identity)
            .await
            .map_err(SetupError::at(SetupStep::AdminHandshake))?;
        let refreshed = self
            .service
            .refresh_message_session(&conn, session.pool_id, &session.session_id)
            .await
            .map_err(SetupError::at(SetupStep::MessageSession))?;
        let refreshed = Session {
            pool_id: session.pool_id,
            ..refreshed
        };

        debug!(
            pool = %self.config.identity.pool_name,
            session_id = %refreshed.session_id,
            token_expiry = ?refreshed.queue_token_expiry,
            "message session refreshed"
        );
        self.conn = Some(conn);
        self.active = Some(refreshed.clone());
        Ok(refreshed)
    }

    /// Release the lease of `session`.
    pub async fn close(&mut self, session: &Session) -> ActionsResult<()> {
        let is_active = self
            .active
            .as_ref()
            .is_some_and(|active| active.session_id == session.session_id);
        if is_active {
            self.active = None;
        }
        let Some(conn) = self.conn.as_ref() else {
            debug!(session_id = %session.session_id, "no admin connection, nothing to release");
            return Ok(());
        };
        self.service
            .delete_message_session(conn, session.pool_id, &session.session_id)
            .await?;
        info!(
            pool = %self.config.identity.pool_name,
            session_id = %session.session_id,
            "message session closed"
        );
        Ok(())
    }

    async fn register_pool(&self, conn: &AdminConnection) -> ActionsResult<RunnerPool> {
        let name = &self.config.identity.pool_name;
        let canonical = RunnerPool::canonical(name);
        match self.service.get_runner_pool(conn, name).await? {
            Some(existing) => {
                info!(pool = %name, pool_id = existing.id, "runner pool found, applying canonical settings");
                self.service
                    .replace_runner_pool(conn, existing.id, &canonical)
                    .await
            }
            None => {
                info!(pool = %name, "runner pool not found, creating");
                self.service.create_runner_pool(conn, &canonical).await
            }
        }
    }

    async fn create_session(&self, conn: &AdminConnection, pool_id: i64) -> ActionsResult<Session> {
        let attempts = self.config.create_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self
                .service
                .create_message_session(conn, pool_id, &self.config.owner_name)
                .await
            {
                Ok(session) => return Ok(session),
                Err(e) if attempt >= attempts => return Err(e),
                Err(e) => {
                    warn!(
                        pool_id,
                        attempt,
                        attempts,
                        retry_in_secs = self.config.create_retry_delay.as_secs(),
                        error = %e,
                        "message session creation failed"
                    );
                    tokio::time::sleep(self.config.create_retry_delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
