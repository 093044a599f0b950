//! Service traits over the job source.
//!
//! Both traits return boxed futures so they can be used as trait objects
//! (`Arc<dyn SessionService>`) and replaced by mocks in tests.

use std::future::Future;
use std::pin::Pin;

use runnerfleet_state::WorkerPoolIdentity;

use crate::error::ActionsResult;
use crate::types::*;

/// Boxed future returned by service calls.
pub type ServiceFuture<'a, T> = Pin<Box<dyn Future<Output = ActionsResult<T>> + Send + 'a>>;

/// Session, queue and job-claim operations used by the listener.
pub trait SessionService: Send + Sync {
    /// Admin handshake: obtain the service endpoint and admin token for a scope.
    fn admin_connection<'a>(
        &'a self,
        identity: &'a WorkerPoolIdentity,
    ) -> ServiceFuture<'a, AdminConnection>;

    /// Look up a pool by name. `Ok(None)` when no pool has that name.
    fn get_runner_pool<'a>(
        &'a self,
        conn: &'a AdminConnection,
        name: &'a str,
    ) -> ServiceFuture<'a, Option<RunnerPool>>;

    fn create_runner_pool<'a>(
        &'a self,
        conn: &'a AdminConnection,
        pool: &'a RunnerPool,
    ) -> ServiceFuture<'a, RunnerPool>;

    fn replace_runner_pool<'a>(
        &'a self,
        conn: &'a AdminConnection,
        pool_id: i64,
        pool: &'a RunnerPool,
    ) -> ServiceFuture<'a, RunnerPool>;

    fn create_message_session<'a>(
        &'a self,
        conn: &'a AdminConnection,
        pool_id: i64,
        owner_name: &'a str,
    ) -> ServiceFuture<'a, Session>;

    fn refresh_message_session<'a>(
        &'a self,
        conn: &'a AdminConnection,
        pool_id: i64,
        session_id: &'a str,
    ) -> ServiceFuture<'a, Session>;

    fn delete_message_session<'a>(
        &'a self,
        conn: &'a AdminConnection,
        pool_id: i64,
        session_id: &'a str,
    ) -> ServiceFuture<'a, ()>;

    /// Fetch the next message after `last_message_id`. `Ok(None)` when the
    /// queue has nothing pending.
    fn get_message<'a>(
        &'a self,
        queue_url: &'a str,
        queue_token: &'a str,
        last_message_id: i64,
    ) -> ServiceFuture<'a, Option<QueueMessage>>;

    fn delete_message<'a>(
        &'a self,
        queue_url: &'a str,
        queue_token: &'a str,
        message_id: i64,
    ) -> ServiceFuture<'a, ()>;

    /// Claim job requests; returns the granted subset.
    fn acquire_jobs<'a>(
        &'a self,
        conn: &'a AdminConnection,
        pool_id: i64,
        queue_token: &'a str,
        request_ids: &'a [i64],
    ) -> ServiceFuture<'a, Vec<i64>>;
}

/// Runner lookups used by the reconciler.
pub trait RunnerService: Send + Sync {
    /// Busy state of a named runner.
    ///
    /// Fails with a `NotFound` kind when the runner never registered and with
    /// an `Offline` kind when it is registered but offline.
    fn runner_status<'a>(
        &'a self,
        identity: &'a WorkerPoolIdentity,
        runner_name: &'a str,
    ) -> ServiceFuture<'a, RunnerStatus>;

    /// A registration token new runners can use to join the scope.
    fn registration_token<'a>(
        &'a self,
        identity: &'a WorkerPoolIdentity,
    ) -> ServiceFuture<'a, RegistrationToken>;
}
