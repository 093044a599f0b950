//! fleet.toml configuration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use runnerfleet_actions::{ActionsError, ClientConfig, Credentials, Scope};
use runnerfleet_autoscale::ReconcilerConfig;
use runnerfleet_listener::SessionConfig;
use runnerfleet_state::{PodTemplate, PoolSpec, WorkerPoolIdentity};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration for {field}: {value:?}")]
    Duration { field: &'static str, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error(transparent)]
    Credentials(#[from] ActionsError),
}

#[derive(Debug, Clone, Deserialize)]
pub struct FleetConfig {
    pub github: GithubConfig,
    pub pool: PoolConfig,
    #[serde(default)]
    pub scaling: ScalingConfig,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub state: StateConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GithubConfig {
    #[serde(default = "default_github_url")]
    pub url: String,
    pub api_url: Option<String>,
    pub token: Option<String>,
    pub app: Option<AppConfig>,
    pub basic_auth: Option<BasicAuthConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app_id: i64,
    pub installation_id: i64,
    pub private_key_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BasicAuthConfig {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    pub name: String,
    #[serde(default)]
    pub enterprise: String,
    #[serde(default)]
    pub organization: String,
    #[serde(default)]
    pub repository: String,
    #[serde(default)]
    pub min_replicas: u32,
    pub max_replicas: Option<u32>,
    pub image: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScalingConfig {
    pub scale_down_delay: String,
    pub registration_timeout: String,
    pub rate_limit_backoff: String,
    pub reservation_ttl: String,
    pub sync_period: String,
    pub probe_timeout: String,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            scale_down_delay: "10m".to_string(),
            registration_timeout: "15m".to_string(),
            rate_limit_backoff: "3m".to_string(),
            reservation_ttl: "10m".to_string(),
            sync_period: "1m".to_string(),
            probe_timeout: "30s".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub create_attempts: u32,
    pub create_retry_delay: String,
    /// Lease owner name. Defaults to `$HOSTNAME`.
    pub owner_name: Option<String>,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            create_attempts: 3,
            create_retry_delay: "30s".to_string(),
            owner_name: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub data_dir: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/runnerfleet"),
        }
    }
}

fn default_github_url() -> String {
    "https://github.com".to_string()
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Check everything that can be checked without touching the network
    /// or the filesystem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.name.trim().is_empty() {
            return Err(ConfigError::Invalid("pool.name is empty".to_string()));
        }
        if self.pool.image.trim().is_empty() {
            return Err(ConfigError::Invalid("pool.image is empty".to_string()));
        }
        Scope::from_identity(&self.identity())?;
        if let Some(max) = self.pool.max_replicas
            && self.pool.min_replicas > max
        {
            return Err(ConfigError::Invalid(format!(
                "pool.min_replicas ({}) exceeds pool.max_replicas ({max})",
                self.pool.min_replicas
            )));
        }
        if self.session.create_attempts == 0 {
            return Err(ConfigError::Invalid(
                "session.create_attempts must be at least 1".to_string(),
            ));
        }

        self.reconciler_config()?;
        self.reservation_ttl()?;
        self.sync_period()?;
        duration("session.create_retry_delay", &self.session.create_retry_delay)?;

        let github = &self.github;
        let has_token = github.token.as_deref().is_some_and(|t| !t.is_empty());
        let has_app = github.app.is_some();
        let has_basic = github
            .basic_auth
            .as_ref()
            .is_some_and(|b| !b.username.is_empty() && !b.password.is_empty());
        if !has_token && !has_app && !has_basic {
            return Err(ConfigError::Invalid(
                "one of github.token, [github.app] or [github.basic_auth] is required".to_string(),
            ));
        }
        Ok(())
    }

    pub fn identity(&self) -> WorkerPoolIdentity {
        WorkerPoolIdentity {
            enterprise: self.pool.enterprise.clone(),
            organization: self.pool.organization.clone(),
            repository: self.pool.repository.clone(),
            pool_name: self.pool.name.clone(),
        }
    }

    pub fn pool_spec(&self, now: u64) -> PoolSpec {
        PoolSpec {
            name: self.pool.name.clone(),
            identity: self.identity(),
            min_replicas: self.pool.min_replicas,
            max_replicas: self.pool.max_replicas,
            template: PodTemplate {
                image: self.pool.image.clone(),
                labels: self.pool.labels.clone(),
                env: self.pool.env.clone(),
            },
            created_at: now,
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            github_url: self.github.url.clone(),
            api_url: self.github.api_url.clone(),
            ..ClientConfig::default()
        }
    }

    /// Resolve credentials, reading the app private key from disk.
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        let basic_auth = self
            .github
            .basic_auth
            .as_ref()
            .map(|b| (b.username.clone(), b.password.clone()));
        let app = match &self.github.app {
            Some(app) => {
                let key = std::fs::read_to_string(&app.private_key_path).map_err(|source| {
                    ConfigError::Read {
                        path: app.private_key_path.clone(),
                        source,
                    }
                })?;
                Some((app.app_id, app.installation_id, key))
            }
            None => None,
        };
        Ok(Credentials::select(
            self.github.token.clone(),
            basic_auth,
            app,
        )?)
    }

    pub fn reconciler_config(&self) -> Result<ReconcilerConfig, ConfigError> {
        let scaling = &self.scaling;
        Ok(ReconcilerConfig {
            github_url: self.github.url.clone(),
            scale_down_delay: duration("scaling.scale_down_delay", &scaling.scale_down_delay)?,
            registration_timeout: duration(
                "scaling.registration_timeout",
                &scaling.registration_timeout,
            )?,
            rate_limit_backoff: duration("scaling.rate_limit_backoff", &scaling.rate_limit_backoff)?,
            probe_timeout: duration("scaling.probe_timeout", &scaling.probe_timeout)?,
        })
    }

    pub fn session_config(&self, default_owner: &str) -> Result<SessionConfig, ConfigError> {
        let owner = self
            .session
            .owner_name
            .clone()
            .unwrap_or_else(|| default_owner.to_string());
        let mut config = SessionConfig::new(self.identity(), owner);
        config.create_attempts = self.session.create_attempts;
        config.create_retry_delay =
            duration("session.create_retry_delay", &self.session.create_retry_delay)?;
        Ok(config)
    }

    pub fn reservation_ttl(&self) -> Result<Duration, ConfigError> {
        duration("scaling.reservation_ttl", &self.scaling.reservation_ttl)
    }

    pub fn sync_period(&self) -> Result<Duration, ConfigError> {
        let period = duration("scaling.sync_period", &self.scaling.sync_period)?;
        if period.is_zero() {
            return Err(ConfigError::Invalid(
                "scaling.sync_period must be positive".to_string(),
            ));
        }
        Ok(period)
    }
}

fn duration(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration(value).ok_or_else(|| ConfigError::Duration {
        field,
        value: value.to_string(),
    })
}

/// Parse a duration string like "500ms", "30s", "5m", "1h" or bare seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.parse::<u64>().ok().map(|h| Duration::from_secs(h * 3600))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
