//! Domain types for the fleet state store.
//!
//! These types represent the persisted intent and observed state of a
//! worker pool: the pool spec, its status sub-record, and the worker pods
//! it owns. All types are serializable to/from JSON for storage in redb
//! tables.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Name of a worker pool (unique within the store).
pub type PoolName = String;

// ── Identity ──────────────────────────────────────────────────────

/// The job-source scope a worker pool serves.
///
/// Exactly which of the fields is used is decided by the job source client:
/// repository wins over organization, which wins over enterprise.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct WorkerPoolIdentity {
    #[serde(default)]
    pub enterprise: String,
    #[serde(default)]
    pub organization: String,
    /// Repository in `owner/name` form.
    #[serde(default)]
    pub repository: String,
    pub pool_name: String,
}

impl WorkerPoolIdentity {
    /// Key used for per-scope caches (registration tokens, app tokens).
    pub fn scope_key(&self) -> String {
        format!(
            "org={},repo={},enterprise={}",
            self.organization, self.repository, self.enterprise
        )
    }

    /// Whether no scope field is set.
    pub fn is_unscoped(&self) -> bool {
        self.enterprise.is_empty() && self.organization.is_empty() && self.repository.is_empty()
    }
}

// ── Pool ──────────────────────────────────────────────────────────

/// Desired configuration of a worker pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolSpec {
    pub name: PoolName,
    pub identity: WorkerPoolIdentity,
    /// Lower bound on the desired replica count.
    pub min_replicas: u32,
    /// Upper bound on the desired replica count, if any.
    pub max_replicas: Option<u32>,
    /// Template stamped onto every pod created for this pool.
    pub template: PodTemplate,
    /// Unix timestamp (seconds) when this spec was created.
    pub created_at: u64,
}

/// Pod template for a pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PodTemplate {
    pub image: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Observed state of a worker pool, written by the reconciler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PoolStatus {
    pub desired_replicas: u32,
    /// Pods owned by the pool, regardless of phase.
    pub available_replicas: u32,
    /// Owned pods in the `Running` phase.
    pub ready_replicas: u32,
    /// Unexpired reservations at the time of the last write.
    #[serde(default)]
    pub capacity_reservations: Vec<CapacityReservation>,
    /// Unix timestamp of the last successful scale-up.
    #[serde(default)]
    pub last_scale_up_at: Option<u64>,
    pub updated_at: u64,
}

/// A pool spec together with its status sub-record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolRecord {
    pub spec: PoolSpec,
    #[serde(default)]
    pub status: PoolStatus,
}

impl PoolRecord {
    pub fn new(spec: PoolSpec) -> Self {
        Self {
            spec,
            status: PoolStatus::default(),
        }
    }

    /// Build the key for the pools table.
    pub fn table_key(&self) -> &str {
        &self.spec.name
    }
}

// ── Reservations and cache entries ────────────────────────────────

/// A time-bounded claim on pool capacity that is not yet backed by a
/// running worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapacityReservation {
    pub name: String,
    pub replicas: u32,
    /// Unix timestamp (seconds) after which the reservation no longer counts.
    pub expiration_time: u64,
}

impl CapacityReservation {
    pub fn is_expired(&self, now: u64) -> bool {
        self.expiration_time <= now
    }
}

/// A TTL-tagged memo entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: V,
    /// Unix timestamp (seconds) at which the entry stops being readable.
    pub expiration_time: u64,
}

impl<V> CacheEntry<V> {
    pub fn is_expired(&self, now: u64) -> bool {
        self.expiration_time <= now
    }
}

// ── Pods ──────────────────────────────────────────────────────────

/// Lifecycle phase of a worker pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// A worker pod owned by a pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerPod {
    pub name: String,
    /// Name of the owning pool.
    pub owner: PoolName,
    pub phase: PodPhase,
    pub image: String,
    pub labels: HashMap<String, String>,
    pub env: HashMap<String, String>,
    /// Unix timestamp (seconds) when the pod record was created.
    pub created_at: u64,
}

impl WorkerPod {
    /// Build the composite key for the pods table.
    pub fn table_key(&self) -> String {
        pod_key(&self.owner, &self.name)
    }

    /// Age of the pod in seconds at `now`.
    pub fn age_secs(&self, now: u64) -> u64 {
        now.saturating_sub(self.created_at)
    }
}

/// Composite key of a pod owned by `pool`.
pub fn pod_key(pool: &str, pod: &str) -> String {
    format!("{pool}:{pod}")
}

/// Current unix time in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reservation_expires_at_boundary() {
        let r = CapacityReservation {
            name: "job-1".to_string(),
            replicas: 1,
            expiration_time: 100,
        };
        assert!(!r.is_expired(99));
        assert!(r.is_expired(100));
    }

    #[test]
    fn pod_age_never_underflows() {
        let pod = WorkerPod {
            name: "p".to_string(),
            owner: "pool".to_string(),
            phase: PodPhase::Pending,
            image: "img".to_string(),
            labels: HashMap::new(),
            env: HashMap::new(),
            created_at: 500,
        };
        assert_eq!(pod.age_secs(400), 0);
        assert_eq!(pod.age_secs(560), 60);
        assert_eq!(pod.table_key(), "pool:p");
    }

    #[test]
    fn identity_scope_key_distinguishes_scopes() {
        let org = WorkerPoolIdentity {
            organization: "acme".to_string(),
            pool_name: "ci".to_string(),
            ..Default::default()
        };
        let repo = WorkerPoolIdentity {
            repository: "acme/app".to_string(),
            ..org.clone()
        };
        assert_ne!(org.scope_key(), repo.scope_key());
        assert!(!org.is_unscoped());
        assert!(WorkerPoolIdentity::default().is_unscoped());
    }
}
