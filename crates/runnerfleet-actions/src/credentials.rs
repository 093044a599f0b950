//! Credentials used to authorize API calls against the job source.
//!
//! Personal access tokens and basic auth are applied directly. GitHub App
//! credentials are exchanged for a short-lived installation token: a signed
//! RS256 JWT identifies the app, and the resulting token is cached by the
//! client until shortly before it expires.

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::Serialize;

use crate::error::{ActionsError, ActionsResult};

/// How the client authenticates.
#[derive(Clone)]
pub enum Credentials {
    Token(String),
    BasicAuth {
        username: String,
        password: String,
    },
    App {
        app_id: i64,
        installation_id: i64,
        /// PEM-encoded RSA private key.
        private_key: String,
    },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Token(_) => f.write_str("Token(..)"),
            Credentials::BasicAuth { username, .. } => f
                .debug_struct("BasicAuth")
                .field("username", username)
                .finish_non_exhaustive(),
            Credentials::App {
                app_id,
                installation_id,
                ..
            } => f
                .debug_struct("App")
                .field("app_id", app_id)
                .field("installation_id", installation_id)
                .finish_non_exhaustive(),
        }
    }
}

#[derive(Serialize)]
struct AppClaims {
    iat: u64,
    exp: u64,
    iss: String,
}

impl Credentials {
    /// Pick credentials from the configured pieces.
    ///
    /// Basic auth wins over a token, which wins over app credentials.
    pub fn select(
        token: Option<String>,
        basic_auth: Option<(String, String)>,
        app: Option<(i64, i64, String)>,
    ) -> ActionsResult<Self> {
        if let Some((username, password)) = basic_auth
            && !username.is_empty()
            && !password.is_empty()
        {
            return Ok(Credentials::BasicAuth { username, password });
        }
        if let Some(token) = token
            && !token.is_empty()
        {
            return Ok(Credentials::Token(token));
        }
        if let Some((app_id, installation_id, private_key)) = app
            && app_id > 0
            && installation_id > 0
            && !private_key.is_empty()
        {
            return Ok(Credentials::App {
                app_id,
                installation_id,
                private_key,
            });
        }
        Err(ActionsError::Credentials(
            "must provide a token, app credentials or basic auth".to_string(),
        ))
    }

    /// Sign the app JWT used to request an installation token.
    ///
    /// `iat` is backdated a minute to tolerate clock drift; the JWT lives
    /// ten minutes in total, the maximum the source accepts.
    pub fn app_jwt(app_id: i64, private_key: &str, now: u64) -> ActionsResult<String> {
        let key = EncodingKey::from_rsa_pem(private_key.as_bytes())
            .map_err(|e| ActionsError::Credentials(format!("invalid app private key: {e}")))?;
        let claims = AppClaims {
            iat: now.saturating_sub(60),
            exp: now + 540,
            iss: app_id.to_string(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| ActionsError::Credentials(format!("failed to sign app JWT: {e}")))
    }
}
