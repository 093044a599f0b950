mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use runnerfleet_actions::RunnerPool;
use runnerfleet_listener::{SessionManager, SetupStep};

use common::*;

#[tokio::test]
async fn open_creates_missing_pool_then_leases() {
    let service = Arc::new(MockService::default());
    let mut sessions = SessionManager::new(service.clone(), session_config());

    let session = sessions.open().await.unwrap();
    assert_eq!(session.pool_id, POOL_ID);
    assert_eq!(session.queue_token, "qt-1");
    assert_eq!(
        service.calls(),
        vec![
            "admin_connection",
            "get_runner_pool",
            "create_runner_pool",
            "create_message_session"
        ]
    );
    assert!(sessions.pool().unwrap().runner_setting.ephemeral);
}

#[tokio::test]
async fn open_replaces_existing_pool_with_canonical_settings() {
    let mut stale = RunnerPool::canonical("ci");
    stale.id = 7;
    stale.runner_setting.ephemeral = false;
    let service = Arc::new(MockService {
        existing_pool: Some(stale),
        ..Default::default()
    });
    let mut sessions = SessionManager::new(service.clone(), session_config());

    let session = sessions.open().await.unwrap();
    assert_eq!(session.pool_id, 7);
    assert_eq!(service.count("replace_runner_pool"), 1);
    assert_eq!(service.count("create_runner_pool"), 0);
    let pool = sessions.pool().unwrap();
    assert!(pool.runner_setting.ephemeral);
    assert!(pool.runner_setting.disable_update);
}

#[tokio::test]
async fn failing_step_is_named_and_later_steps_skipped() {
    let service = Arc::new(MockService {
        fail_admin: true,
        ..Default::default()
    });
    let mut sessions = SessionManager::new(service.clone(), session_config());
    let err = sessions.open().await.unwrap_err();
    assert_eq!(err.step, SetupStep::AdminHandshake);
    assert_eq!(service.calls(), vec!["admin_connection"]);

    let service = Arc::new(MockService {
        fail_pool: true,
        ..Default::default()
    });
    let mut sessions = SessionManager::new(service.clone(), session_config());
    let err = sessions.open().await.unwrap_err();
    assert_eq!(err.step, SetupStep::RunnerPool);
    assert_eq!(service.count("create_message_session"), 0);
    assert!(sessions.active().is_none());
}

#[tokio::test]
async fn session_creation_is_retried_a_bounded_number_of_times() {
    let service = Arc::new(MockService::default());
    service.session_failures.store(2, Ordering::SeqCst);
    let mut sessions = SessionManager::new(service.clone(), session_config());
    sessions.open().await.unwrap();
    assert_eq!(service.count("create_message_session"), 3);

    let service = Arc::new(MockService::default());
    service.session_failures.store(5, Ordering::SeqCst);
    let mut sessions = SessionManager::new(service.clone(), session_config());
    let err = sessions.open().await.unwrap_err();
    assert_eq!(err.step, SetupStep::MessageSession);
    assert_eq!(service.count("create_message_session"), 3);
}

#[tokio::test]
async fn refresh_rotates_token_without_touching_the_pool() {
    let service = Arc::new(MockService::default());
    let mut sessions = SessionManager::new(service.clone(), session_config());
    let session = sessions.open().await.unwrap();

    let refreshed = sessions.refresh(&session).await.unwrap();
    assert_eq!(refreshed.session_id, session.session_id);
    assert_eq!(refreshed.pool_id, session.pool_id);
    assert_eq!(refreshed.queue_token, "qt-2");
    assert_eq!(service.count("admin_connection"), 2);
    assert_eq!(service.count("get_runner_pool"), 1);
    assert_eq!(service.count("create_runner_pool"), 1);
    assert_eq!(sessions.active(), Some(&refreshed));
}

#[tokio::test]
async fn reopening_releases_the_prior_lease() {
    let service = Arc::new(MockService::default());
    let mut sessions = SessionManager::new(service.clone(), session_config());
    sessions.open().await.unwrap();
    sessions.open().await.unwrap();

    let calls = service.calls();
    let released = calls
        .iter()
        .position(|c| c == "delete_message_session")
        .unwrap();
    let second_lease = calls
        .iter()
        .rposition(|c| c == "create_message_session")
        .unwrap();
    assert!(released < second_lease);
    assert_eq!(service.count("delete_message_session"), 1);
}

#[tokio::test]
async fn close_releases_the_active_session() {
    let service = Arc::new(MockService::default());
    let mut sessions = SessionManager::new(service.clone(), session_config());
    let session = sessions.open().await.unwrap();

    sessions.close(&session).await.unwrap();
    assert!(sessions.active().is_none());
    assert_eq!(service.count("delete_message_session"), 1);
}
