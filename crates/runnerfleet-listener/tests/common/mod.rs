//! Scripted `SessionService` shared by the listener integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use runnerfleet_actions::{
    ActionsError, ActionsResult, AdminConnection, QueueMessage, RunnerPool, ServiceFuture,
    Session, SessionService,
};
use runnerfleet_listener::SessionConfig;
use runnerfleet_state::WorkerPoolIdentity;

pub const POOL_ID: i64 = 42;
pub const QUEUE_URL: &str = "https://queue.example/sessions/1";

#[derive(Default)]
pub struct MockService {
    pub calls: Mutex<Vec<String>>,
    pub existing_pool: Option<RunnerPool>,
    pub fail_admin: bool,
    pub fail_pool: bool,
    /// Session creations that fail before one succeeds.
    pub session_failures: AtomicU32,
    pub fail_delete_message: bool,
    /// Granted ids are intersected with this set when present.
    pub grantable: Option<Vec<i64>>,
    pub script: Mutex<VecDeque<ActionsResult<Option<QueueMessage>>>>,
    /// `(cursor, queue token)` of every poll.
    pub polls: Mutex<Vec<(i64, String)>>,
    pub deleted_messages: Mutex<Vec<i64>>,
    pub acquired: Mutex<Vec<Vec<i64>>>,
    pub refreshes: AtomicUsize,
    pub drained: AtomicBool,
}

impl MockService {
    pub fn with_script(messages: Vec<ActionsResult<Option<QueueMessage>>>) -> Self {
        Self {
            script: Mutex::new(messages.into()),
            ..Default::default()
        }
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == call).count()
    }

    /// Wait until every scripted message has been polled.
    pub async fn wait_drained(&self) {
        for _ in 0..500 {
            if self.drained.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("script was not drained");
    }

    fn lease(&self, token: String) -> Session {
        Session {
            pool_id: POOL_ID,
            session_id: "sess-1".to_string(),
            owner_name: "host-1".to_string(),
            queue_url: QUEUE_URL.to_string(),
            queue_token: token,
            queue_token_expiry: None,
        }
    }
}

fn api_error(message: &str) -> ActionsError {
    ActionsError::Api {
        status: 500,
        message: message.to_string(),
    }
}

impl SessionService for MockService {
    fn admin_connection<'a>(
        &'a self,
        _identity: &'a WorkerPoolIdentity,
    ) -> ServiceFuture<'a, AdminConnection> {
        self.record("admin_connection");
        Box::pin(async move {
            if self.fail_admin {
                return Err(api_error("handshake refused"));
            }
            Ok(AdminConnection {
                service_url: "https://pipelines.example".to_string(),
                admin_token: "admin".to_string(),
            })
        })
    }

    fn get_runner_pool<'a>(
        &'a self,
        _conn: &'a AdminConnection,
        _name: &'a str,
    ) -> ServiceFuture<'a, Option<RunnerPool>> {
        self.record("get_runner_pool");
        Box::pin(async move {
            if self.fail_pool {
                return Err(api_error("pool lookup failed"));
            }
            Ok(self.existing_pool.clone())
        })
    }

    fn create_runner_pool<'a>(
        &'a self,
        _conn: &'a AdminConnection,
        pool: &'a RunnerPool,
    ) -> ServiceFuture<'a, RunnerPool> {
        self.record("create_runner_pool");
        Box::pin(async move {
            Ok(RunnerPool {
                id: POOL_ID,
                ..pool.clone()
            })
        })
    }

    fn replace_runner_pool<'a>(
        &'a self,
        _conn: &'a AdminConnection,
        pool_id: i64,
        pool: &'a RunnerPool,
    ) -> ServiceFuture<'a, RunnerPool> {
        self.record("replace_runner_pool");
        Box::pin(async move {
            Ok(RunnerPool {
                id: pool_id,
                ..pool.clone()
            })
        })
    }

    fn create_message_session<'a>(
        &'a self,
        _conn: &'a AdminConnection,
        _pool_id: i64,
        _owner_name: &'a str,
    ) -> ServiceFuture<'a, Session> {
        self.record("create_message_session");
        Box::pin(async move {
            let remaining = self.session_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.session_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(ActionsError::Conflict("session already exists".to_string()));
            }
            Ok(self.lease("qt-1".to_string()))
        })
    }

    fn refresh_message_session<'a>(
        &'a self,
        _conn: &'a AdminConnection,
        _pool_id: i64,
        _session_id: &'a str,
    ) -> ServiceFuture<'a, Session> {
        self.record("refresh_message_session");
        Box::pin(async move {
            let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 2;
            Ok(self.lease(format!("qt-{n}")))
        })
    }

    fn delete_message_session<'a>(
        &'a self,
        _conn: &'a AdminConnection,
        _pool_id: i64,
        _session_id: &'a str,
    ) -> ServiceFuture<'a, ()> {
        self.record("delete_message_session");
        Box::pin(async { Ok(()) })
    }

    fn get_message<'a>(
        &'a self,
        _queue_url: &'a str,
        queue_token: &'a str,
        last_message_id: i64,
    ) -> ServiceFuture<'a, Option<QueueMessage>> {
        self.polls
            .lock()
            .unwrap()
            .push((last_message_id, queue_token.to_string()));
        let next = self.script.lock().unwrap().pop_front();
        Box::pin(async move {
            match next {
                Some(result) => result,
                None => {
                    self.drained.store(true, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok(None)
                }
            }
        })
    }

    fn delete_message<'a>(
        &'a self,
        _queue_url: &'a str,
        _queue_token: &'a str,
        message_id: i64,
    ) -> ServiceFuture<'a, ()> {
        self.deleted_messages.lock().unwrap().push(message_id);
        Box::pin(async move {
            if self.fail_delete_message {
                return Err(api_error("delete failed"));
            }
            Ok(())
        })
    }

    fn acquire_jobs<'a>(
        &'a self,
        _conn: &'a AdminConnection,
        _pool_id: i64,
        _queue_token: &'a str,
        request_ids: &'a [i64],
    ) -> ServiceFuture<'a, Vec<i64>> {
        self.acquired.lock().unwrap().push(request_ids.to_vec());
        let granted = match &self.grantable {
            Some(grantable) => request_ids
                .iter()
                .copied()
                .filter(|id| grantable.contains(id))
                .collect(),
            None => request_ids.to_vec(),
        };
        Box::pin(async move { Ok(granted) })
    }
}

pub fn identity() -> WorkerPoolIdentity {
    WorkerPoolIdentity {
        organization: "acme".to_string(),
        pool_name: "ci".to_string(),
        ..Default::default()
    }
}

pub fn session_config() -> SessionConfig {
    let mut config = SessionConfig::new(identity(), "host-1");
    config.create_retry_delay = Duration::ZERO;
    config
}

pub fn message(id: i64, message_type: &str, body: &str) -> ActionsResult<Option<QueueMessage>> {
    Ok(Some(QueueMessage {
        message_id: id,
        message_type: message_type.to_string(),
        body: body.to_string(),
    }))
}

pub fn assigned(id: i64, request_id: i64) -> ActionsResult<Option<QueueMessage>> {
    message(
        id,
        "RunnerScaleSetJobAssigned",
        &format!(r#"{{"runnerRequestId":{request_id},"runnerScaleSetId":{POOL_ID}}}"#),
    )
}

pub fn completed(id: i64, request_id: i64) -> ActionsResult<Option<QueueMessage>> {
    message(
        id,
        "RunnerScaleSetJobCompleted",
        &format!(r#"{{"runnerRequestId":{request_id},"result":"succeeded"}}"#),
    )
}

pub fn available(id: i64, request_ids: &[i64]) -> ActionsResult<Option<QueueMessage>> {
    let ids: Vec<String> = request_ids.iter().map(i64::to_string).collect();
    message(
        id,
        "RunnerScaleSetJobAvailable",
        &format!(r#"{{"runnerRequestIds":[{}]}}"#, ids.join(",")),
    )
}

pub fn token_expired() -> ActionsResult<Option<QueueMessage>> {
    Err(ActionsError::TokenExpired("token lapsed".to_string()))
}
