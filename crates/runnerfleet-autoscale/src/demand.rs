//! Demand bookkeeping shared between the message loop and the reconciler.
//!
//! Every acquired job request holds one capacity reservation until it is
//! assigned to a runner; an assigned job counts as demand until it
//! completes. All transitions are keyed by request id, so a redelivered
//! message never counts twice.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::debug;

use runnerfleet_state::CapacityReservation;

/// How many completed request ids are remembered for deduplication.
const COMPLETED_MEMORY: usize = 4096;

/// A consistent view of current demand.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DemandSnapshot {
    /// Unexpired reservations, ordered by expiration then name.
    pub reservations: Vec<CapacityReservation>,
    /// Jobs assigned to a runner and not yet completed.
    pub assigned: u32,
}

impl DemandSnapshot {
    pub fn reserved(&self) -> u32 {
        self.reservations.iter().map(|r| r.replicas).sum()
    }

    /// Workers needed to serve the snapshot.
    pub fn demand(&self) -> u32 {
        self.reserved() + self.assigned
    }
}

#[derive(Default)]
struct DemandState {
    /// request id -> reservation expiration time
    reservations: HashMap<i64, u64>,
    assigned: HashSet<i64>,
    completed: HashSet<i64>,
    completed_order: VecDeque<i64>,
}

impl DemandState {
    fn remember_completed(&mut self, request_id: i64) {
        if self.completed.insert(request_id) {
            self.completed_order.push_back(request_id);
            while self.completed_order.len() > COMPLETED_MEMORY {
                if let Some(oldest) = self.completed_order.pop_front() {
                    self.completed.remove(&oldest);
                }
            }
        }
    }
}

/// Demand counters for one pool.
pub struct DemandTracker {
    state: Mutex<DemandState>,
    reservation_ttl: Duration,
    changed: Notify,
}

impl DemandTracker {
    pub fn new(reservation_ttl: Duration) -> Self {
        Self {
            state: Mutex::new(DemandState::default()),
            reservation_ttl,
            changed: Notify::new(),
        }
    }

    /// Reserve capacity for granted job requests.
    ///
    /// Ids already reserved, assigned or completed are skipped. Returns the
    /// number of new reservations.
    pub fn reserve(&self, request_ids: &[i64], now: u64) -> usize {
        let expiration = now + self.reservation_ttl.as_secs();
        let mut state = self.lock();
        let mut added = 0;
        for id in request_ids {
            if state.assigned.contains(id) || state.completed.contains(id) {
                continue;
            }
            if state.reservations.insert(*id, expiration).is_none() {
                added += 1;
            }
        }
        drop(state);
        if added > 0 {
            debug!(added, "capacity reserved");
            self.changed.notify_one();
        }
        added
    }

    /// Record that a job request was assigned to a runner. Its reservation,
    /// if any, is superseded. Returns false when nothing changed.
    pub fn assign(&self, request_id: i64) -> bool {
        let mut state = self.lock();
        if state.completed.contains(&request_id) {
            return false;
        }
        state.reservations.remove(&request_id);
        let added = state.assigned.insert(request_id);
        drop(state);
        if added {
            self.changed.notify_one();
        }
        added
    }

    /// Record that a job request finished. Returns false when the
    /// completion was already seen.
    pub fn complete(&self, request_id: i64) -> bool {
        let mut state = self.lock();
        if state.completed.contains(&request_id) {
            return false;
        }
        state.reservations.remove(&request_id);
        state.assigned.remove(&request_id);
        state.remember_completed(request_id);
        drop(state);
        self.changed.notify_one();
        true
    }

    /// Take a snapshot at `now`, dropping expired reservations.
    pub fn snapshot(&self, now: u64) -> DemandSnapshot {
        let mut state = self.lock();
        state.reservations.retain(|_, expiration| *expiration > now);
        let mut reservations: Vec<CapacityReservation> = state
            .reservations
            .iter()
            .map(|(id, expiration)| CapacityReservation {
                name: format!("job-{id}"),
                replicas: 1,
                expiration_time: *expiration,
            })
            .collect();
        reservations.sort_by(|a, b| {
            a.expiration_time
                .cmp(&b.expiration_time)
                .then_with(|| a.name.cmp(&b.name))
        });
        DemandSnapshot {
            reservations,
            assigned: state.assigned.len() as u32,
        }
    }

    /// Wait until demand changes.
    pub async fn changed(&self) {
        self.changed.notified().await;
    }

    fn lock(&self) -> MutexGuard<'_, DemandState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> DemandTracker {
        DemandTracker::new(Duration::from_secs(600))
    }

    #[test]
    fn reservations_count_toward_demand() {
        let demand = tracker();
        assert_eq!(demand.reserve(&[1, 3], 1000), 2);
        let snap = demand.snapshot(1000);
        assert_eq!(snap.reserved(), 2);
        assert_eq!(snap.demand(), 2);
        assert_eq!(snap.reservations[0].name, "job-1");
        assert_eq!(snap.reservations[0].expiration_time, 1600);
    }

    #[test]
    fn expired_reservations_contribute_nothing() {
        let demand = tracker();
        demand.reserve(&[1], 1000);
        assert_eq!(demand.snapshot(1599).demand(), 1);
        assert_eq!(demand.snapshot(1600).demand(), 0);
        assert!(demand.snapshot(1600).reservations.is_empty());
    }

    #[test]
    fn assignment_supersedes_reservation() {
        let demand = tracker();
        demand.reserve(&[7], 1000);
        assert!(demand.assign(7));
        let snap = demand.snapshot(1000);
        assert_eq!(snap.reserved(), 0);
        assert_eq!(snap.assigned, 1);
        assert_eq!(snap.demand(), 1);

        // Redelivered assignment and late reservation do not double count.
        assert!(!demand.assign(7));
        assert_eq!(demand.reserve(&[7], 1001), 0);
        assert_eq!(demand.snapshot(1001).demand(), 1);
    }

    #[test]
    fn duplicate_completion_does_not_double_decrement() {
        let demand = tracker();
        demand.assign(1);
        demand.assign(2);
        assert!(demand.complete(1));
        assert!(!demand.complete(1));
        assert_eq!(demand.snapshot(0).demand(), 1);

        // A completed job is not resurrected by a stale assignment.
        assert!(!demand.assign(1));
        assert_eq!(demand.snapshot(0).demand(), 1);
    }

    #[test]
    fn completed_memory_is_bounded() {
        let demand = tracker();
        for id in 0..(COMPLETED_MEMORY as i64 + 10) {
            demand.complete(id);
        }
        let state = demand.lock();
        assert_eq!(state.completed.len(), COMPLETED_MEMORY);
        assert!(!state.completed.contains(&0));
    }

    #[tokio::test]
    async fn changes_wake_waiters() {
        let demand = tracker();
        demand.reserve(&[1], 0);
        // The stored permit completes the wait immediately.
        tokio::time::timeout(Duration::from_secs(1), demand.changed())
            .await
            .unwrap();
    }
}
