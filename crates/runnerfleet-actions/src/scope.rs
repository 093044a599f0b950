//! Pool scope resolution (repository, organization or enterprise).

use runnerfleet_state::WorkerPoolIdentity;

use crate::error::{ActionsError, ActionsResult};

/// The job-source scope a pool registers runners in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Repository { owner: String, repo: String },
    Organization(String),
    Enterprise(String),
}

impl Scope {
    /// Resolve the scope of an identity. Repository wins over organization,
    /// which wins over enterprise.
    pub fn from_identity(identity: &WorkerPoolIdentity) -> ActionsResult<Self> {
        if !identity.repository.is_empty() {
            let mut parts = identity.repository.split('/');
            return match (parts.next(), parts.next(), parts.next()) {
                (Some(owner), Some(repo), None) if !owner.is_empty() && !repo.is_empty() => {
                    Ok(Scope::Repository {
                        owner: owner.to_string(),
                        repo: repo.to_string(),
                    })
                }
                _ => Err(ActionsError::InvalidScope(format!(
                    "invalid repository name: {:?}",
                    identity.repository
                ))),
            };
        }
        if !identity.organization.is_empty() {
            return Ok(Scope::Organization(identity.organization.clone()));
        }
        if !identity.enterprise.is_empty() {
            return Ok(Scope::Enterprise(identity.enterprise.clone()));
        }
        Err(ActionsError::InvalidScope(
            "enterprise, organization and repository are all empty".to_string(),
        ))
    }

    /// The web URL the admin handshake registers against.
    pub fn config_url(&self, github_url: &str) -> String {
        let base = github_url.trim_end_matches('/');
        match self {
            Scope::Repository { owner, repo } => format!("{base}/{owner}/{repo}"),
            Scope::Organization(org) => format!("{base}/{org}"),
            Scope::Enterprise(ent) => format!("{base}/enterprises/{ent}"),
        }
    }

    /// API path prefix for runner endpoints in this scope.
    pub fn runners_path(&self) -> String {
        match self {
            Scope::Repository { owner, repo } => format!("/repos/{owner}/{repo}/actions/runners"),
            Scope::Organization(org) => format!("/orgs/{org}/actions/runners"),
            Scope::Enterprise(ent) => format!("/enterprises/{ent}/actions/runners"),
        }
    }
}
