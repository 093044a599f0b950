//! Reconciler — converge a pool's worker pods toward demand.
//!
//! Each pass reads the pool record and a demand snapshot, computes the
//! desired replica count, and creates or deletes pod records in the state
//! store. Scale-down only removes pods the job source confirms are not
//! working: offline runners first, then runners that never registered
//! within the registration timeout, then idle runners.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use runnerfleet_actions::{
    ActionsError, ActionsResult, ErrorKind, RunnerService, RunnerStatus, Scope,
};
use runnerfleet_state::*;

use crate::demand::{DemandSnapshot, DemandTracker};

/// Errors that fail a reconciliation pass.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error("runner probe for pod {pod} failed: {source}")]
    Probe {
        pod: String,
        #[source]
        source: ActionsError,
    },

    #[error("runner probe for pod {pod} timed out")]
    ProbeTimeout { pod: String },

    #[error("job source error: {0}")]
    Runners(#[source] ActionsError),
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// What the caller should do after a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Converged as far as possible; reconcile again on the next resync.
    Done,
    /// Reconcile again after the given delay.
    RequeueAfter(Duration),
    /// The job source is throttling. Wait out the whole backoff before the
    /// next pass, whatever else happens.
    RateLimited(Duration),
}

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Web URL of the job source, stamped into new pods.
    pub github_url: String,
    /// Minimum time between a scale-up and the next scale-down.
    pub scale_down_delay: Duration,
    /// Age after which a pod that never registered may be removed.
    pub registration_timeout: Duration,
    /// Delay before retrying a pass that hit a rate limit.
    pub rate_limit_backoff: Duration,
    /// Upper bound on a single busy-status probe.
    pub probe_timeout: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            github_url: "https://github.com".to_string(),
            scale_down_delay: Duration::from_secs(10 * 60),
            registration_timeout: Duration::from_secs(15 * 60),
            rate_limit_backoff: Duration::from_secs(3 * 60),
            probe_timeout: Duration::from_secs(30),
        }
    }
}

/// Desired replicas for `spec` under `demand`: never below the minimum,
/// clipped to the maximum when one is set.
pub fn desired_replicas(spec: &PoolSpec, demand: &DemandSnapshot) -> u32 {
    let desired = demand.demand().max(spec.min_replicas);
    match spec.max_replicas {
        Some(max) => desired.min(max),
        None => desired,
    }
}

struct ScaleDown {
    deleted: Vec<String>,
    rate_limited: bool,
}

/// Reconciles one pool.
pub struct Reconciler {
    pool: PoolName,
    state: StateStore,
    runners: Arc<dyn RunnerService>,
    demand: Arc<DemandTracker>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        pool: impl Into<PoolName>,
        state: StateStore,
        runners: Arc<dyn RunnerService>,
        demand: Arc<DemandTracker>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            pool: pool.into(),
            state,
            runners,
            demand,
            config,
        }
    }

    pub fn pool(&self) -> &str {
        &self.pool
    }

    pub async fn reconcile(&self) -> ReconcileResult<ReconcileOutcome> {
        self.reconcile_at(epoch_secs()).await
    }

    /// Run one pass as of `now` (unix seconds).
    pub async fn reconcile_at(&self, now: u64) -> ReconcileResult<ReconcileOutcome> {
        let record = self
            .state
            .get_pool(&self.pool)?
            .ok_or_else(|| StateError::PoolNotFound(self.pool.clone()))?;
        let spec = &record.spec;

        let demand = self.demand.snapshot(now);
        let desired = desired_replicas(spec, &demand);

        let mut pods = self.remove_finished(spec)?;
        let mut available = pods.len() as u32;
        let mut last_scale_up_at = record.status.last_scale_up_at;
        let mut outcome = ReconcileOutcome::Done;

        if desired > available {
            match self.scale_up(spec, desired - available, now).await {
                Ok(created) => {
                    available += created;
                    last_scale_up_at = Some(now);
                }
                Err(ReconcileError::Runners(e)) if e.kind() == ErrorKind::RateLimited => {
                    warn!(pool = %self.pool, "rate limited fetching registration token");
                    outcome = ReconcileOutcome::RateLimited(self.config.rate_limit_backoff);
                }
                Err(e) => return Err(e),
            }
        } else if desired < available {
            if let Some(remaining) = self.scale_down_hold(last_scale_up_at, now) {
                debug!(
                    pool = %self.pool,
                    desired,
                    available,
                    remaining_secs = remaining.as_secs(),
                    "scale-down held after recent scale-up"
                );
                outcome = ReconcileOutcome::RequeueAfter(remaining);
            } else {
                let result = self.scale_down(spec, &pods, available - desired, now).await?;
                available -= result.deleted.len() as u32;
                pods.retain(|pod| !result.deleted.contains(&pod.name));
                if result.rate_limited {
                    outcome = ReconcileOutcome::RateLimited(self.config.rate_limit_backoff);
                }
            }
        }

        let ready = pods
            .iter()
            .filter(|pod| pod.phase == PodPhase::Running)
            .count() as u32;
        self.record_status(
            &record.status,
            PoolStatus {
                desired_replicas: desired,
                available_replicas: available,
                ready_replicas: ready,
                capacity_reservations: demand.reservations,
                last_scale_up_at,
                updated_at: now,
            },
        )?;

        Ok(outcome)
    }

    /// Reconcile on every interval and whenever demand changes, until
    /// shutdown is signalled. A rate-limited pass suspends both triggers
    /// for the full backoff.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(pool = %self.pool, interval_secs = interval.as_secs(), "reconciler started");

        let mut delay = Duration::ZERO;
        let mut backing_off = false;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.demand.changed(), if !backing_off => {}
                _ = shutdown.changed() => {
                    info!(pool = %self.pool, "reconciler shutting down");
                    break;
                }
            }

            (delay, backing_off) = match self.reconcile().await {
                Ok(ReconcileOutcome::Done) => (interval, false),
                Ok(ReconcileOutcome::RequeueAfter(after)) => (after.min(interval), false),
                Ok(ReconcileOutcome::RateLimited(backoff)) => {
                    info!(pool = %self.pool, backoff_secs = backoff.as_secs(), "backing off after rate limit");
                    (backoff, true)
                }
                Err(e) => {
                    error!(pool = %self.pool, error = %e, "reconciliation failed");
                    (interval, false)
                }
            };
        }
    }

    // ── Passes ─────────────────────────────────────────────────────

    /// Delete pods whose runner already exited; return the rest.
    fn remove_finished(&self, spec: &PoolSpec) -> ReconcileResult<Vec<WorkerPod>> {
        let mut live = Vec::new();
        for pod in self.state.list_pods_for_pool(&spec.name)? {
            if matches!(pod.phase, PodPhase::Succeeded | PodPhase::Failed) {
                self.state.delete_pod(&spec.name, &pod.name)?;
                debug!(pool = %spec.name, pod = %pod.name, phase = ?pod.phase, "finished pod removed");
            } else {
                live.push(pod);
            }
        }
        Ok(live)
    }

    async fn scale_up(&self, spec: &PoolSpec, count: u32, now: u64) -> ReconcileResult<u32> {
        let scope = Scope::from_identity(&spec.identity).map_err(ReconcileError::Runners)?;
        let token = self
            .runners
            .registration_token(&spec.identity)
            .await
            .map_err(ReconcileError::Runners)?;

        let env = HashMap::from([
            ("RUNNER_TOKEN".to_string(), token.token),
            (
                "RUNNER_URL".to_string(),
                scope.config_url(&self.config.github_url),
            ),
        ]);
        for _ in 0..count {
            let pod = self.state.create_pod(spec, env.clone(), now)?;
            debug!(pool = %spec.name, pod = %pod.name, "worker pod created");
        }
        info!(pool = %spec.name, created = count, "scaled up");
        Ok(count)
    }

    fn scale_down_hold(&self, last_scale_up_at: Option<u64>, now: u64) -> Option<Duration> {
        let hold_until = last_scale_up_at? + self.config.scale_down_delay.as_secs();
        (now < hold_until).then(|| Duration::from_secs(hold_until - now))
    }

    async fn scale_down(
        &self,
        spec: &PoolSpec,
        pods: &[WorkerPod],
        excess: u32,
        now: u64,
    ) -> ReconcileResult<ScaleDown> {
        let registration_timeout = self.config.registration_timeout.as_secs();
        let mut offline = Vec::new();
        let mut unregistered = Vec::new();
        let mut idle = Vec::new();

        for pod in pods {
            match self.probe(&spec.identity, &pod.name).await? {
                Ok(RunnerStatus { busy: true }) => {
                    debug!(pool = %spec.name, pod = %pod.name, "runner busy");
                }
                Ok(RunnerStatus { busy: false }) => idle.push(pod),
                Err(e) => match e.kind() {
                    ErrorKind::Offline => offline.push(pod),
                    ErrorKind::NotFound if pod.age_secs(now) > registration_timeout => {
                        unregistered.push(pod);
                    }
                    ErrorKind::NotFound => {
                        debug!(pool = %spec.name, pod = %pod.name, "runner not registered yet");
                    }
                    ErrorKind::RateLimited => {
                        warn!(pool = %spec.name, pod = %pod.name, "rate limited probing runners, scale-down aborted");
                        return Ok(ScaleDown {
                            deleted: Vec::new(),
                            rate_limited: true,
                        });
                    }
                    _ => {
                        return Err(ReconcileError::Probe {
                            pod: pod.name.clone(),
                            source: e,
                        });
                    }
                },
            }
        }

        // Every re-check happens before the first deletion, so an aborted
        // pass leaves the pool untouched.
        let mut chosen: Vec<&WorkerPod> = offline
            .into_iter()
            .chain(unregistered)
            .take(excess as usize)
            .collect();
        for pod in idle {
            if chosen.len() >= excess as usize {
                break;
            }
            match self.probe(&spec.identity, &pod.name).await? {
                Ok(RunnerStatus { busy: false }) => chosen.push(pod),
                Ok(RunnerStatus { busy: true }) => {
                    debug!(pool = %spec.name, pod = %pod.name, "runner picked up a job, keeping");
                }
                Err(e) if e.kind() == ErrorKind::RateLimited => {
                    warn!(pool = %spec.name, pod = %pod.name, "rate limited re-checking runner, scale-down aborted");
                    return Ok(ScaleDown {
                        deleted: Vec::new(),
                        rate_limited: true,
                    });
                }
                Err(e) => {
                    return Err(ReconcileError::Probe {
                        pod: pod.name.clone(),
                        source: e,
                    });
                }
            }
        }

        let mut deleted = Vec::new();
        for pod in chosen {
            if self.state.delete_pod(&spec.name, &pod.name)? {
                deleted.push(pod.name.clone());
            }
        }

        if deleted.len() < excess as usize {
            debug!(
                pool = %spec.name,
                excess,
                deleted = deleted.len(),
                "not enough idle runners to fully scale down"
            );
        }
        if !deleted.is_empty() {
            info!(pool = %spec.name, pods = ?deleted, "scaled down");
        }
        Ok(ScaleDown {
            deleted,
            rate_limited: false,
        })
    }

    /// Probe a runner's busy state, bounded by the probe timeout.
    async fn probe(
        &self,
        identity: &WorkerPoolIdentity,
        pod: &str,
    ) -> ReconcileResult<ActionsResult<RunnerStatus>> {
        tokio::time::timeout(
            self.config.probe_timeout,
            self.runners.runner_status(identity, pod),
        )
        .await
        .map_err(|_| ReconcileError::ProbeTimeout {
            pod: pod.to_string(),
        })
    }

    /// Persist the status unless the only difference is `updated_at`.
    /// Changes to the desired count or the reservation set are written even
    /// when available and ready replicas stay the same.
    fn record_status(&self, current: &PoolStatus, next: PoolStatus) -> ReconcileResult<()> {
        let comparable = PoolStatus {
            updated_at: current.updated_at,
            ..next.clone()
        };
        if comparable == *current {
            return Ok(());
        }
        self.state.update_pool_status(&self.pool, &next)?;
        debug!(
            pool = %self.pool,
            desired = next.desired_replicas,
            available = next.available_replicas,
            ready = next.ready_replicas,
            "pool status updated"
        );
        Ok(())
    }
}
