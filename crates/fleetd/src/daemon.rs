//! Wires the state store, job-source client, reconciler and message loop
//! together and runs them until shutdown.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info, warn};

use runnerfleet_actions::ActionsClient;
use runnerfleet_autoscale::{DemandTracker, Reconciler};
use runnerfleet_listener::MessageLoop;
use runnerfleet_state::{PoolRecord, StateStore, epoch_secs};

use crate::config::FleetConfig;

const DB_FILE: &str = "runnerfleet.redb";

pub async fn run(config: FleetConfig) -> anyhow::Result<()> {
    let pool = config.pool.name.clone();
    info!(pool = %pool, "fleetd starting");

    // ── State store ────────────────────────────────────────────

    std::fs::create_dir_all(&config.state.data_dir).with_context(|| {
        format!("failed to create {}", config.state.data_dir.display())
    })?;
    let db_path = config.state.data_dir.join(DB_FILE);
    let state = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    register_pool(&state, &config)?;

    // ── Job source ─────────────────────────────────────────────

    let credentials = config.credentials()?;
    let client = Arc::new(ActionsClient::new(config.client_config(), credentials)?);
    info!(api_url = %client.api_url(), "actions client ready");

    // ── Scaling engine ─────────────────────────────────────────

    let demand = Arc::new(DemandTracker::new(config.reservation_ttl()?));
    let reconciler = Reconciler::new(
        pool.clone(),
        state,
        client.clone(),
        demand.clone(),
        config.reconciler_config()?,
    );
    let session_config = config.session_config(&default_owner())?;
    session_config.validate()?;
    let mut listener = MessageLoop::new(client, session_config, demand);
    let sync_period = config.sync_period()?;

    // ── Background tasks ───────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reconcile_shutdown = shutdown_rx.clone();

    let reconcile_handle = tokio::spawn(async move {
        reconciler.run(sync_period, reconcile_shutdown).await;
    });
    let mut listener_handle = tokio::spawn(async move { listener.run(shutdown_rx).await });

    let listener_result = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "failed to listen for ctrl-c, shutting down");
            } else {
                info!("shutdown signal received");
            }
            let _ = shutdown_tx.send(true);
            listener_handle.await
        }
        finished = &mut listener_handle => {
            warn!(pool = %pool, "listener exited, stopping reconciler");
            let _ = shutdown_tx.send(true);
            finished
        }
    };

    let _ = reconcile_handle.await;

    match listener_result {
        Ok(Ok(())) => {
            info!(pool = %pool, "fleetd stopped");
            Ok(())
        }
        Ok(Err(e)) => {
            error!(pool = %pool, error = %e, "listener failed");
            Err(e.into())
        }
        Err(e) => Err(anyhow::Error::new(e).context("listener task panicked")),
    }
}

/// Store the configured spec, keeping any status left by a previous run.
fn register_pool(state: &StateStore, config: &FleetConfig) -> anyhow::Result<()> {
    let existing = state.get_pool(&config.pool.name)?;
    let created_at = existing
        .as_ref()
        .map_or_else(epoch_secs, |record| record.spec.created_at);

    let mut record = PoolRecord::new(config.pool_spec(created_at));
    if let Some(existing) = existing {
        record.status = existing.status;
    }
    state.put_pool(&record)?;
    info!(
        pool = %record.spec.name,
        min_replicas = record.spec.min_replicas,
        max_replicas = ?record.spec.max_replicas,
        "pool registered"
    );
    Ok(())
}

fn default_owner() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "fleetd".to_string())
}
