//! StateStore — redb-backed persistence for pool records and worker pods.
//!
//! Provides typed CRUD operations over pools and the pods they own. All
//! values are JSON-serialized into redb's `&[u8]` value columns. The store
//! supports both on-disk and in-memory backends (the latter for testing).

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

const POD_SUFFIX_LEN: usize = 5;
const POD_SUFFIX_ALPHABET: &[u8] = b"bcdfghjklmnpqrstvwxz2456789";

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(POOLS).map_err(map_err!(Table))?;
        txn.open_table(PODS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Pools ──────────────────────────────────────────────────────

    /// Insert or replace a pool record.
    pub fn put_pool(&self, record: &PoolRecord) -> StateResult<()> {
        let key = record.table_key();
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(POOLS).map_err(map_err!(Table))?;
            table.insert(key, value.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(pool = %key, "pool stored");
        Ok(())
    }

    /// Get a pool record by name.
    pub fn get_pool(&self, name: &str) -> StateResult<Option<PoolRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(POOLS).map_err(map_err!(Table))?;
        match table.get(name).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: PoolRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// List all pool records.
    pub fn list_pools(&self) -> StateResult<Vec<PoolRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(POOLS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: PoolRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    /// Replace the status sub-record of a pool, leaving the spec untouched.
    pub fn update_pool_status(&self, name: &str, status: &PoolStatus) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(POOLS).map_err(map_err!(Table))?;
            let mut record: PoolRecord = match table.get(name).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => return Err(StateError::PoolNotFound(name.to_string())),
            };
            record.status = status.clone();
            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            table.insert(name, value.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            pool = %name,
            desired = status.desired_replicas,
            available = status.available_replicas,
            ready = status.ready_replicas,
            "pool status updated"
        );
        Ok(())
    }

    /// Delete a pool and every pod it owns. Returns true if the pool existed.
    pub fn delete_pool(&self, name: &str) -> StateResult<bool> {
        let prefix = format!("{name}:");
        let pod_keys = self.keys_with_prefix(&prefix)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut pools = txn.open_table(POOLS).map_err(map_err!(Table))?;
            existed = pools.remove(name).map_err(map_err!(Write))?.is_some();
            let mut pods = txn.open_table(PODS).map_err(map_err!(Table))?;
            for key in &pod_keys {
                pods.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(pool = %name, existed, pods_removed = pod_keys.len(), "pool deleted");
        Ok(existed)
    }

    // ── Pods ───────────────────────────────────────────────────────

    /// Create a pod owned by `spec`'s pool, stamped with its template.
    ///
    /// The pod name is `{pool}-{suffix}` with a random five character
    /// suffix; `extra_env` is layered over the template's env.
    pub fn create_pod(
        &self,
        spec: &PoolSpec,
        extra_env: HashMap<String, String>,
        now: u64,
    ) -> StateResult<WorkerPod> {
        let mut env = spec.template.env.clone();
        env.extend(extra_env);

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let pod;
        {
            let mut table = txn.open_table(PODS).map_err(map_err!(Table))?;
            let name = loop {
                let candidate = format!("{}-{}", spec.name, random_suffix()?);
                let key = pod_key(&spec.name, &candidate);
                if table.get(key.as_str()).map_err(map_err!(Read))?.is_none() {
                    break candidate;
                }
            };
            pod = WorkerPod {
                name,
                owner: spec.name.clone(),
                phase: PodPhase::Pending,
                image: spec.template.image.clone(),
                labels: spec.template.labels.clone(),
                env,
                created_at: now,
            };
            let value = serde_json::to_vec(&pod).map_err(map_err!(Serialize))?;
            table
                .insert(pod.table_key().as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(pool = %spec.name, pod = %pod.name, "pod created");
        Ok(pod)
    }

    /// Insert or replace a pod record.
    pub fn put_pod(&self, pod: &WorkerPod) -> StateResult<()> {
        let key = pod.table_key();
        let value = serde_json::to_vec(pod).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(PODS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// List the pods owned by a pool, ordered by creation time then name.
    pub fn list_pods_for_pool(&self, pool: &str) -> StateResult<Vec<WorkerPod>> {
        let prefix = format!("{pool}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PODS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let pod: WorkerPod =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(pod);
            }
        }
        results.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
        Ok(results)
    }

    /// Delete a pod. Returns true if it existed; a missing pod is not an error.
    pub fn delete_pod(&self, pool: &str, name: &str) -> StateResult<bool> {
        let key = pod_key(pool, name);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(PODS).map_err(map_err!(Table))?;
            existed = table.remove(key.as_str()).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%pool, pod = %name, existed, "pod deleted");
        Ok(existed)
    }

    /// Record a phase transition reported by the pod runtime.
    /// Returns false if the pod does not exist.
    pub fn set_pod_phase(&self, pool: &str, name: &str, phase: PodPhase) -> StateResult<bool> {
        let key = pod_key(pool, name);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let found;
        {
            let mut table = txn.open_table(PODS).map_err(map_err!(Table))?;
            let current: Option<WorkerPod> = match table.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => {
                    Some(serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?)
                }
                None => None,
            };
            found = current.is_some();
            if let Some(mut pod) = current {
                pod.phase = phase;
                let value = serde_json::to_vec(&pod).map_err(map_err!(Serialize))?;
                table
                    .insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(found)
    }

    fn keys_with_prefix(&self, prefix: &str) -> StateResult<Vec<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PODS).map_err(map_err!(Table))?;
        Ok(table
            .iter()
            .map_err(map_err!(Read))?
            .filter_map(|entry| {
                let (key, _) = entry.ok()?;
                let k = key.value().to_string();
                k.starts_with(prefix).then_some(k)
            })
            .collect())
    }
}

fn random_suffix() -> StateResult<String> {
    let mut bytes = [0u8; POD_SUFFIX_LEN];
    getrandom::getrandom(&mut bytes).map_err(map_err!(NameGeneration))?;
    Ok(bytes
        .iter()
        .map(|b| POD_SUFFIX_ALPHABET[*b as usize % POD_SUFFIX_ALPHABET.len()] as char)
        .collect())
}
