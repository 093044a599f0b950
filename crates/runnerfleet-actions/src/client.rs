//! `ActionsClient` — reqwest-backed implementation of the service traits.

use std::time::Duration;

use chrono::DateTime;
use jsonwebtoken::{DecodingKey, Validation};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, RETRY_AFTER};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use runnerfleet_state::{WorkerPoolIdentity, epoch_secs};

use crate::cache::TtlCache;
use crate::credentials::Credentials;
use crate::error::{ActionsError, ActionsResult};
use crate::scope::Scope;
use crate::service::{RunnerService, ServiceFuture, SessionService};
use crate::types::*;

const SERVICE_API_VERSION: &str = "6.0-preview";
const GITHUB_JSON: &str = "application/vnd.github+json";
const RUNNERS_PER_PAGE: usize = 100;

/// Registration tokens are reused only while they stay valid for at least
/// this long, so a runner that is slow to start can still register.
const RUNNER_STARTUP_MARGIN_SECS: u64 = 30 * 60;

/// Installation tokens are dropped this long before they expire.
const APP_TOKEN_MARGIN_SECS: u64 = 60;

/// Endpoint and timeout configuration for [`ActionsClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Web URL of the GitHub instance, e.g. `https://github.com`.
    pub github_url: String,
    /// REST API URL. Derived from `github_url` when not set.
    pub api_url: Option<String>,
    pub user_agent: String,
    /// Timeout for ordinary requests.
    pub request_timeout: Duration,
    /// Timeout for the message long-poll.
    pub long_poll_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            github_url: "https://github.com".to_string(),
            api_url: None,
            user_agent: concat!("runnerfleet/", env!("CARGO_PKG_VERSION")).to_string(),
            request_timeout: Duration::from_secs(30),
            long_poll_timeout: Duration::from_secs(90),
        }
    }
}

impl ClientConfig {
    /// The REST API base URL, without a trailing slash.
    ///
    /// `github.com` maps to `api.github.com`; any other host is treated as
    /// GitHub Enterprise Server and gets `/api/v3` appended.
    pub fn resolved_api_url(&self) -> String {
        if let Some(api_url) = &self.api_url {
            return api_url.trim_end_matches('/').to_string();
        }
        let base = self.github_url.trim_end_matches('/');
        let host = base
            .split_once("://")
            .map_or(base, |(_, rest)| rest)
            .split('/')
            .next()
            .unwrap_or_default();
        if host == "github.com" || host == "www.github.com" {
            "https://api.github.com".to_string()
        } else {
            format!("{base}/api/v3")
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
    expires_at: String,
}

#[derive(Deserialize)]
struct RunnerList {
    #[serde(default)]
    runners: Vec<RunnerEntry>,
}

#[derive(Deserialize)]
struct RunnerEntry {
    name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    busy: bool,
}

/// HTTP client for the job source.
pub struct ActionsClient {
    http: reqwest::Client,
    config: ClientConfig,
    api_url: String,
    credentials: Credentials,
    app_tokens: TtlCache<String>,
    registration_tokens: TtlCache<RegistrationToken>,
}

impl ActionsClient {
    pub fn new(config: ClientConfig, credentials: Credentials) -> ActionsResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        let api_url = config.resolved_api_url();
        debug!(%api_url, github_url = %config.github_url, ?credentials, "actions client created");
        Ok(Self {
            http,
            config,
            api_url,
            credentials,
            app_tokens: TtlCache::new(),
            registration_tokens: TtlCache::new(),
        })
    }

    /// REST API base URL in use.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    // ── Authorization ──────────────────────────────────────────────

    async fn authorize(&self, req: RequestBuilder) -> ActionsResult<RequestBuilder> {
        match &self.credentials {
            Credentials::Token(token) => Ok(req.bearer_auth(token)),
            Credentials::BasicAuth { username, password } => {
                Ok(req.basic_auth(username, Some(password)))
            }
            Credentials::App {
                app_id,
                installation_id,
                private_key,
            } => {
                let token = self
                    .installation_token(*app_id, *installation_id, private_key)
                    .await?;
                Ok(req.bearer_auth(token))
            }
        }
    }

    async fn installation_token(
        &self,
        app_id: i64,
        installation_id: i64,
        private_key: &str,
    ) -> ActionsResult<String> {
        let now = epoch_secs();
        let key = installation_id.to_string();
        if let Some(token) = self.app_tokens.get(&key, now) {
            return Ok(token);
        }

        let jwt = Credentials::app_jwt(app_id, private_key, now)?;
        let url = format!(
            "{}/app/installations/{installation_id}/access_tokens",
            self.api_url
        );
        let resp = self
            .http
            .post(&url)
            .bearer_auth(jwt)
            .header(ACCEPT, GITHUB_JSON)
            .timeout(self.config.request_timeout)
            .send()
            .await?;
        let body: TokenResponse = decode(check(resp).await?).await?;
        let expires_at = parse_timestamp(&body.expires_at)?;
        self.app_tokens.insert(
            &key,
            body.token.clone(),
            expires_at.saturating_sub(APP_TOKEN_MARGIN_SECS),
            now,
        );
        debug!(installation_id, expires_at, "app installation token issued");
        Ok(body.token)
    }

    // ── Runner API ─────────────────────────────────────────────────

    async fn fetch_registration_token(
        &self,
        identity: &WorkerPoolIdentity,
    ) -> ActionsResult<RegistrationToken> {
        let now = epoch_secs();
        let key = identity.scope_key();
        if let Some(token) = self.registration_tokens.get(&key, now) {
            return Ok(token);
        }

        let scope = Scope::from_identity(identity)?;
        let url = format!("{}{}/registration-token", self.api_url, scope.runners_path());
        let req = self
            .http
            .post(&url)
            .header(ACCEPT, GITHUB_JSON)
            .timeout(self.config.request_timeout);
        let resp = self.authorize(req).await?.send().await?;
        let body: TokenResponse = decode(check(resp).await?).await?;
        let token = RegistrationToken {
            token: body.token,
            expires_at: parse_timestamp(&body.expires_at)?,
        };
        self.registration_tokens.insert(
            &key,
            token.clone(),
            token.expires_at.saturating_sub(RUNNER_STARTUP_MARGIN_SECS),
            now,
        );
        debug!(scope = %key, expires_at = token.expires_at, "registration token issued");
        Ok(token)
    }

    async fn fetch_runner_status(
        &self,
        identity: &WorkerPoolIdentity,
        runner_name: &str,
    ) -> ActionsResult<RunnerStatus> {
        let scope = Scope::from_identity(identity)?;
        let url = format!("{}{}", self.api_url, scope.runners_path());
        let mut page = 1usize;
        loop {
            let req = self
                .http
                .get(&url)
                .query(&[("per_page", RUNNERS_PER_PAGE), ("page", page)])
                .header(ACCEPT, GITHUB_JSON)
                .timeout(self.config.request_timeout);
            let resp = self.authorize(req).await?.send().await?;
            let list: RunnerList = decode(check(resp).await?).await?;

            if let Some(runner) = list.runners.iter().find(|r| r.name == runner_name) {
                if runner.status == "offline" {
                    return Err(ActionsError::RunnerOffline {
                        name: runner_name.to_string(),
                        busy: runner.busy,
                    });
                }
                return Ok(RunnerStatus { busy: runner.busy });
            }
            if list.runners.len() < RUNNERS_PER_PAGE {
                return Err(ActionsError::RunnerNotFound(runner_name.to_string()));
            }
            page += 1;
        }
    }

    // ── Service API ────────────────────────────────────────────────

    async fn handshake(&self, identity: &WorkerPoolIdentity) -> ActionsResult<AdminConnection> {
        let scope = Scope::from_identity(identity)?;
        let registration = self.fetch_registration_token(identity).await?;
        let url = format!("{}/actions/runner-registration", self.api_url);
        let body = serde_json::json!({
            "url": scope.config_url(&self.config.github_url),
            "runner_event": "register",
        });
        let resp = self
            .http
            .post(&url)
            .header(AUTHORIZATION, format!("RemoteAuth {}", registration.token))
            .json(&body)
            .timeout(self.config.request_timeout)
            .send()
            .await?;
        let conn: AdminConnection = decode(check(resp).await?).await?;
        debug!(service_url = %conn.service_url, "admin connection established");
        Ok(conn)
    }

    fn service_request(&self, method: Method, conn: &AdminConnection, path: &str) -> RequestBuilder {
        let url = format!(
            "{}/_apis/runtime/runnerscalesets{path}",
            conn.service_url.trim_end_matches('/')
        );
        self.http
            .request(method, url)
            .query(&[("api-version", SERVICE_API_VERSION)])
            .bearer_auth(&conn.admin_token)
            .header(ACCEPT, "application/json")
            .timeout(self.config.request_timeout)
    }

    async fn find_pool(&self, conn: &AdminConnection, name: &str) -> ActionsResult<Option<RunnerPool>> {
        let resp = self
            .service_request(Method::GET, conn, "")
            .query(&[("name", name)])
            .send()
            .await?;
        let list: ListEnvelope<RunnerPool> = decode(check(resp).await?).await?;
        match list.value.len() {
            0 => Ok(None),
            1 => Ok(list.value.into_iter().next()),
            n => Err(ActionsError::Decode(format!(
                "{n} runner pools share the name {name:?}"
            ))),
        }
    }

    async fn send_pool(
        &self,
        conn: &AdminConnection,
        method: Method,
        path: &str,
        pool: &RunnerPool,
    ) -> ActionsResult<RunnerPool> {
        let resp = self
            .service_request(method, conn, path)
            .json(pool)
            .send()
            .await?;
        decode(check(resp).await?).await
    }

    async fn send_session(
        &self,
        conn: &AdminConnection,
        method: Method,
        path: &str,
        owner_name: Option<&str>,
    ) -> ActionsResult<Session> {
        let mut req = self.service_request(method, conn, path);
        if let Some(owner_name) = owner_name {
            req = req.json(&serde_json::json!({ "ownerName": owner_name }));
        }
        let resp = req.send().await?;
        let lease: SessionLease = decode(check(resp).await?).await?;
        Ok(session_from_lease(lease))
    }

    async fn remove_session(
        &self,
        conn: &AdminConnection,
        pool_id: i64,
        session_id: &str,
    ) -> ActionsResult<()> {
        let path = format!("/{pool_id}/sessions/{session_id}");
        let resp = self.service_request(Method::DELETE, conn, &path).send().await?;
        check(resp).await?;
        Ok(())
    }

    async fn fetch_message(
        &self,
        queue_url: &str,
        queue_token: &str,
        last_message_id: i64,
    ) -> ActionsResult<Option<QueueMessage>> {
        let resp = self
            .http
            .get(queue_url)
            .query(&[("lastMessageId", last_message_id)])
            .bearer_auth(queue_token)
            .header(ACCEPT, "application/json")
            .timeout(self.config.long_poll_timeout)
            .send()
            .await?;
        match resp.status() {
            StatusCode::ACCEPTED | StatusCode::NO_CONTENT => Ok(None),
            StatusCode::UNAUTHORIZED => Err(token_expired(resp).await),
            _ => {
                let message: QueueMessage = decode(check(resp).await?).await?;
                Ok(Some(message))
            }
        }
    }

    async fn remove_message(
        &self,
        queue_url: &str,
        queue_token: &str,
        message_id: i64,
    ) -> ActionsResult<()> {
        let url = format!("{}/{message_id}", queue_url.trim_end_matches('/'));
        let resp = self
            .http
            .delete(&url)
            .bearer_auth(queue_token)
            .timeout(self.config.request_timeout)
            .send()
            .await?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            return Err(token_expired(resp).await);
        }
        check(resp).await?;
        Ok(())
    }

    async fn claim_jobs(
        &self,
        conn: &AdminConnection,
        pool_id: i64,
        queue_token: &str,
        request_ids: &[i64],
    ) -> ActionsResult<Vec<i64>> {
        let url = format!(
            "{}/_apis/runtime/runnerscalesets/{pool_id}/acquirejobs",
            conn.service_url.trim_end_matches('/')
        );
        let resp = self
            .http
            .post(&url)
            .query(&[("api-version", SERVICE_API_VERSION)])
            .bearer_auth(queue_token)
            .json(request_ids)
            .timeout(self.config.request_timeout)
            .send()
            .await?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            return Err(token_expired(resp).await);
        }
        let granted: ListEnvelope<i64> = decode(check(resp).await?).await?;
        Ok(granted.value)
    }
}

impl SessionService for ActionsClient {
    fn admin_connection<'a>(
        &'a self,
        identity: &'a WorkerPoolIdentity,
    ) -> ServiceFuture<'a, AdminConnection> {
        Box::pin(self.handshake(identity))
    }

    fn get_runner_pool<'a>(
        &'a self,
        conn: &'a AdminConnection,
        name: &'a str,
    ) -> ServiceFuture<'a, Option<RunnerPool>> {
        Box::pin(self.find_pool(conn, name))
    }

    fn create_runner_pool<'a>(
        &'a self,
        conn: &'a AdminConnection,
        pool: &'a RunnerPool,
    ) -> ServiceFuture<'a, RunnerPool> {
        Box::pin(self.send_pool(conn, Method::POST, "", pool))
    }

    fn replace_runner_pool<'a>(
        &'a self,
        conn: &'a AdminConnection,
        pool_id: i64,
        pool: &'a RunnerPool,
    ) -> ServiceFuture<'a, RunnerPool> {
        Box::pin(async move {
            let path = format!("/{pool_id}");
            self.send_pool(conn, Method::PUT, &path, pool).await
        })
    }

    fn create_message_session<'a>(
        &'a self,
        conn: &'a AdminConnection,
        pool_id: i64,
        owner_name: &'a str,
    ) -> ServiceFuture<'a, Session> {
        Box::pin(async move {
            let path = format!("/{pool_id}/sessions");
            self.send_session(conn, Method::POST, &path, Some(owner_name))
                .await
        })
    }

    fn refresh_message_session<'a>(
        &'a self,
        conn: &'a AdminConnection,
        pool_id: i64,
        session_id: &'a str,
    ) -> ServiceFuture<'a, Session> {
        Box::pin(async move {
            let path = format!("/{pool_id}/sessions/{session_id}");
            self.send_session(conn, Method::PATCH, &path, None).await
        })
    }

    fn delete_message_session<'a>(
        &'a self,
        conn: &'a AdminConnection,
        pool_id: i64,
        session_id: &'a str,
    ) -> ServiceFuture<'a, ()> {
        Box::pin(self.remove_session(conn, pool_id, session_id))
    }

    fn get_message<'a>(
        &'a self,
        queue_url: &'a str,
        queue_token: &'a str,
        last_message_id: i64,
    ) -> ServiceFuture<'a, Option<QueueMessage>> {
        Box::pin(self.fetch_message(queue_url, queue_token, last_message_id))
    }

    fn delete_message<'a>(
        &'a self,
        queue_url: &'a str,
        queue_token: &'a str,
        message_id: i64,
    ) -> ServiceFuture<'a, ()> {
        Box::pin(self.remove_message(queue_url, queue_token, message_id))
    }

    fn acquire_jobs<'a>(
        &'a self,
        conn: &'a AdminConnection,
        pool_id: i64,
        queue_token: &'a str,
        request_ids: &'a [i64],
    ) -> ServiceFuture<'a, Vec<i64>> {
        Box::pin(self.claim_jobs(conn, pool_id, queue_token, request_ids))
    }
}

impl RunnerService for ActionsClient {
    fn runner_status<'a>(
        &'a self,
        identity: &'a WorkerPoolIdentity,
        runner_name: &'a str,
    ) -> ServiceFuture<'a, RunnerStatus> {
        Box::pin(self.fetch_runner_status(identity, runner_name))
    }

    fn registration_token<'a>(
        &'a self,
        identity: &'a WorkerPoolIdentity,
    ) -> ServiceFuture<'a, RegistrationToken> {
        Box::pin(self.fetch_registration_token(identity))
    }
}

// ── Response helpers ───────────────────────────────────────────────

/// Pass 2xx responses through; turn everything else into an error.
async fn check(resp: Response) -> ActionsResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if let Some(err) = rate_limit_error(status, resp.headers()) {
        warn!(%status, "job source rate limit hit");
        return Err(err);
    }
    let message = resp.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::NOT_FOUND => ActionsError::NotFound(message),
        StatusCode::CONFLICT => ActionsError::Conflict(message),
        _ => ActionsError::Api {
            status: status.as_u16(),
            message,
        },
    })
}

fn rate_limit_error(status: StatusCode, headers: &HeaderMap) -> Option<ActionsError> {
    let exhausted = headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        == Some("0");
    if status != StatusCode::TOO_MANY_REQUESTS && !(status == StatusCode::FORBIDDEN && exhausted) {
        return None;
    }
    let retry_after = headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    Some(ActionsError::RateLimited { retry_after })
}

async fn token_expired(resp: Response) -> ActionsError {
    ActionsError::TokenExpired(resp.text().await.unwrap_or_default())
}

async fn decode<T: DeserializeOwned>(resp: Response) -> ActionsResult<T> {
    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ActionsError::Decode(e.to_string()))
}

fn parse_timestamp(value: &str) -> ActionsResult<u64> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.timestamp().max(0) as u64)
        .map_err(|e| ActionsError::Decode(format!("invalid timestamp {value:?}: {e}")))
}

fn session_from_lease(lease: SessionLease) -> Session {
    let queue_token_expiry = token_expiry(&lease.message_queue_access_token);
    Session {
        pool_id: lease.runner_scale_set.id,
        session_id: lease.session_id,
        owner_name: lease.owner_name,
        queue_url: lease.message_queue_url,
        queue_token: lease.message_queue_access_token,
        queue_token_expiry,
    }
}

/// Read the `exp` claim of a queue token without verifying it; the token is
/// opaque to us and only the source validates it.
fn token_expiry(token: &str) -> Option<u64> {
    #[derive(Deserialize)]
    struct Expiry {
        exp: u64,
    }

    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();
    jsonwebtoken::decode::<Expiry>(token, &DecodingKey::from_secret(&[]), &validation)
        .ok()
        .map(|data| data.claims.exp)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::extract::{Path, Query};
    use axum::http::{HeaderMap as AxumHeaders, StatusCode as AxumStatus};
    use axum::response::IntoResponse;
    use axum::routing::{delete, get, post};
    use axum::{Json, Router};
    use serde_json::{Value, json};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client_for(base: &str) -> ActionsClient {
        let config = ClientConfig {
            github_url: base.to_string(),
            api_url: Some(base.to_string()),
            ..ClientConfig::default()
        };
        ActionsClient::new(config, Credentials::Token("pat".to_string())).unwrap()
    }

    fn org_identity() -> WorkerPoolIdentity {
        WorkerPoolIdentity {
            organization: "acme".to_string(),
            pool_name: "ci".to_string(),
            ..Default::default()
        }
    }

    fn conn(base: &str) -> AdminConnection {
        AdminConnection {
            service_url: base.to_string(),
            admin_token: "admin".to_string(),
        }
    }

    #[test]
    fn api_url_derivation() {
        let public = ClientConfig::default();
        assert_eq!(public.resolved_api_url(), "https://api.github.com");

        let ghes = ClientConfig {
            github_url: "https://ghe.example.com/".to_string(),
            ..ClientConfig::default()
        };
        assert_eq!(ghes.resolved_api_url(), "https://ghe.example.com/api/v3");

        let explicit = ClientConfig {
            api_url: Some("https://proxy.internal/".to_string()),
            ..ClientConfig::default()
        };
        assert_eq!(explicit.resolved_api_url(), "https://proxy.internal");
    }

    #[test]
    fn queue_token_expiry_is_read_from_claims() {
        let token = jsonwebtoken::encode(
            &jsonwebtoken::Header::default(),
            &json!({ "exp": 12345, "sub": "queue" }),
            &jsonwebtoken::EncodingKey::from_secret(b"source-secret"),
        )
        .unwrap();
        assert_eq!(token_expiry(&token), Some(12345));
        assert_eq!(token_expiry("opaque-token"), None);
    }

    #[test]
    fn rate_limit_classification() {
        let mut headers = HeaderMap::new();
        assert!(rate_limit_error(StatusCode::FORBIDDEN, &headers).is_none());

        headers.insert("x-ratelimit-remaining", "0".parse().unwrap());
        headers.insert(RETRY_AFTER, "42".parse().unwrap());
        let err = rate_limit_error(StatusCode::FORBIDDEN, &headers).unwrap();
        assert!(matches!(
            err,
            ActionsError::RateLimited { retry_after: Some(d) } if d == Duration::from_secs(42)
        ));

        assert!(rate_limit_error(StatusCode::TOO_MANY_REQUESTS, &HeaderMap::new()).is_some());
    }

    #[tokio::test]
    async fn get_message_distinguishes_empty_expired_and_present() {
        let router = Router::new().route(
            "/queue",
            get(|Query(q): Query<std::collections::HashMap<String, String>>| async move {
                match q.get("lastMessageId").map(String::as_str) {
                    Some("0") => AxumStatus::ACCEPTED.into_response(),
                    Some("1") => AxumStatus::UNAUTHORIZED.into_response(),
                    _ => Json(json!({
                        "messageId": 3,
                        "messageType": "RunnerScaleSetJobCompleted",
                        "body": "{\"runnerRequestId\": 9}"
                    }))
                    .into_response(),
                }
            }),
        );
        let base = serve(router).await;
        let client = client_for(&base);
        let queue = format!("{base}/queue");

        assert!(client.get_message(&queue, "qt", 0).await.unwrap().is_none());

        let err = client.get_message(&queue, "qt", 1).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::TokenExpired);

        let msg = client.get_message(&queue, "qt", 2).await.unwrap().unwrap();
        assert_eq!(msg.message_id, 3);
        assert_eq!(msg.message_type, "RunnerScaleSetJobCompleted");
    }

    #[tokio::test]
    async fn delete_message_targets_message_path() {
        let router = Router::new().route(
            "/queue/{id}",
            delete(|Path(id): Path<i64>| async move {
                if id == 7 {
                    AxumStatus::NO_CONTENT
                } else {
                    AxumStatus::INTERNAL_SERVER_ERROR
                }
            }),
        );
        let base = serve(router).await;
        let client = client_for(&base);
        let queue = format!("{base}/queue");

        client.delete_message(&queue, "qt", 7).await.unwrap();
        let err = client.delete_message(&queue, "qt", 8).await.unwrap_err();
        assert!(matches!(err, ActionsError::Api { status: 500, .. }));
    }

    #[tokio::test]
    async fn acquire_jobs_returns_granted_subset() {
        let router = Router::new().route(
            "/_apis/runtime/runnerscalesets/{id}/acquirejobs",
            post(|Json(ids): Json<Vec<i64>>| async move {
                let granted: Vec<i64> = ids.into_iter().filter(|id| id % 2 == 1).collect();
                Json(json!({ "count": granted.len(), "value": granted }))
            }),
        );
        let base = serve(router).await;
        let client = client_for(&base);

        let granted = client
            .acquire_jobs(&conn(&base), 5, "qt", &[1, 2, 3])
            .await
            .unwrap();
        assert_eq!(granted, vec![1, 3]);
    }

    #[tokio::test]
    async fn pool_lookup_returns_none_when_absent() {
        let router = Router::new().route(
            "/_apis/runtime/runnerscalesets",
            get(|Query(q): Query<std::collections::HashMap<String, String>>| async move {
                if q.get("name").map(String::as_str) == Some("ci") {
                    Json(json!({ "count": 1, "value": [{ "id": 12, "name": "ci" }] }))
                } else {
                    Json(json!({ "count": 0, "value": [] }))
                }
            }),
        );
        let base = serve(router).await;
        let client = client_for(&base);

        let found = client.get_runner_pool(&conn(&base), "ci").await.unwrap();
        assert_eq!(found.map(|p| p.id), Some(12));
        assert!(client.get_runner_pool(&conn(&base), "other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn runner_status_classifies_offline_and_missing() {
        let router = Router::new().route(
            "/orgs/acme/actions/runners",
            get(|| async {
                Json(json!({
                    "total_count": 2,
                    "runners": [
                        { "id": 1, "name": "ci-busy", "status": "online", "busy": true },
                        { "id": 2, "name": "ci-gone", "status": "offline", "busy": false }
                    ]
                }))
            }),
        );
        let base = serve(router).await;
        let client = client_for(&base);
        let identity = org_identity();

        let status = client.runner_status(&identity, "ci-busy").await.unwrap();
        assert!(status.busy);

        let offline = client.runner_status(&identity, "ci-gone").await.unwrap_err();
        assert_eq!(offline.kind(), crate::ErrorKind::Offline);

        let missing = client.runner_status(&identity, "ci-new").await.unwrap_err();
        assert_eq!(missing.kind(), crate::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn runner_status_surfaces_rate_limit() {
        let router = Router::new().route(
            "/orgs/acme/actions/runners",
            get(|| async {
                let mut headers = AxumHeaders::new();
                headers.insert("x-ratelimit-remaining", "0".parse().unwrap());
                (AxumStatus::FORBIDDEN, headers, "API rate limit exceeded")
            }),
        );
        let base = serve(router).await;
        let client = client_for(&base);

        let err = client
            .runner_status(&org_identity(), "ci-1")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::RateLimited);
    }

    #[tokio::test]
    async fn registration_token_is_cached_and_used_for_handshake() {
        let issued = Arc::new(AtomicUsize::new(0));
        let counter = issued.clone();
        let router = Router::new()
            .route(
                "/orgs/acme/actions/runners/registration-token",
                post(move || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        (
                            AxumStatus::CREATED,
                            Json(json!({ "token": "reg-1", "expires_at": "2099-01-01T00:00:00Z" })),
                        )
                    }
                }),
            )
            .route(
                "/actions/runner-registration",
                post(|headers: AxumHeaders, Json(body): Json<Value>| async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    if auth != "RemoteAuth reg-1" || body["runner_event"] != "register" {
                        return AxumStatus::UNAUTHORIZED.into_response();
                    }
                    Json(json!({ "url": "https://pipelines.example/abc", "token": "admin-1" }))
                        .into_response()
                }),
            );
        let base = serve(router).await;
        let client = client_for(&base);
        let identity = org_identity();

        let first = client.registration_token(&identity).await.unwrap();
        let second = client.registration_token(&identity).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(issued.load(Ordering::SeqCst), 1);

        let conn = client.admin_connection(&identity).await.unwrap();
        assert_eq!(conn.service_url, "https://pipelines.example/abc");
        assert_eq!(conn.admin_token, "admin-1");
        assert_eq!(issued.load(Ordering::SeqCst), 1);
    }
}
