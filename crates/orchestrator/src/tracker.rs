//! Admission control for concurrently running remote jobs.
//!
//! ## Slot discipline
//!
//! - reserve a slot before starting a remote job
//! - bind it to the remote job id once the start succeeds
//! - release it exactly once, when the job completes or is stopped
//!
//! A retried job keeps the slot of the attempt it replaces: the slot is
//! re-bound from the old job id to the new one instead of being reserved again.
//! [`SlotReservation`] guards the start itself so an intent never outlives a
//! failed start.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use asyncjob_core::JobId;

/// Key of an occupied slot: either a pending intent or a bound job id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotKey(String);

impl SlotKey {
    /// A fresh key for a slot reserved ahead of a job start.
    pub fn intent() -> Self {
        Self(format!("intent-{}", Uuid::now_v7()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&JobId> for SlotKey {
    fn from(job_id: &JobId) -> Self {
        Self(job_id.as_str().to_string())
    }
}

impl std::fmt::Display for SlotKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tracker error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackerError {
    #[error("concurrent job limit reached ({limit})")]
    ConcurrentLimitReached { limit: usize },
    #[error("unknown tracker slot: {0}")]
    UnknownSlot(SlotKey),
}

/// Process-wide bound on the number of in-flight jobs.
pub trait JobTracker: Send + Sync {
    /// Reserve a slot, failing with [`TrackerError::ConcurrentLimitReached`]
    /// when every slot is taken.
    fn try_reserve(&self) -> Result<SlotKey, TrackerError>;

    /// Move an occupied slot from `slot` to `job_id`.
    fn bind(&self, slot: &SlotKey, job_id: &JobId) -> Result<(), TrackerError>;

    /// Free a slot. Returns whether the slot was occupied.
    fn release(&self, slot: &SlotKey) -> bool;

    /// Number of occupied slots (reserved or bound).
    fn in_flight(&self) -> usize;

    fn limit(&self) -> usize;
}

/// In-memory tracker shared by every orchestrator of the process.
#[derive(Debug)]
pub struct InMemoryJobTracker {
    limit: usize,
    slots: Mutex<HashSet<SlotKey>>,
}

impl InMemoryJobTracker {
    pub fn new(limit: usize) -> Self {
        let limit = if limit < 1 {
            warn!(limit, "job tracker limit must be at least 1; using 1");
            1
        } else {
            limit
        };
        Self {
            limit,
            slots: Mutex::new(HashSet::new()),
        }
    }

    /// Whether `slot` currently occupies the tracker.
    pub fn contains(&self, slot: &SlotKey) -> bool {
        self.slots().contains(slot)
    }

    fn slots(&self) -> MutexGuard<'_, HashSet<SlotKey>> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl JobTracker for InMemoryJobTracker {
    fn try_reserve(&self) -> Result<SlotKey, TrackerError> {
        let mut slots = self.slots();
        if slots.len() >= self.limit {
            return Err(TrackerError::ConcurrentLimitReached { limit: self.limit });
        }
        let key = SlotKey::intent();
        slots.insert(key.clone());
        debug!(slot = %key, in_flight = slots.len(), "reserved job slot");
        Ok(key)
    }

    fn bind(&self, slot: &SlotKey, job_id: &JobId) -> Result<(), TrackerError> {
        let mut slots = self.slots();
        if !slots.remove(slot) {
            return Err(TrackerError::UnknownSlot(slot.clone()));
        }
        slots.insert(SlotKey::from(job_id));
        Ok(())
    }

    fn release(&self, slot: &SlotKey) -> bool {
        let released = self.slots().remove(slot);
        if released {
            debug!(slot = %slot, "released job slot");
        }
        released
    }

    fn in_flight(&self) -> usize {
        self.slots().len()
    }

    fn limit(&self) -> usize {
        self.limit
    }
}

/// Slot held for the duration of one job start.
///
/// A fresh reservation is released on drop unless [`SlotReservation::bind`]
/// succeeded. A reused slot belongs to the job being replaced and is never
/// released by the guard.
#[must_use = "a reservation is released as soon as it is dropped"]
pub struct SlotReservation<'a, T: JobTracker + ?Sized> {
    tracker: &'a T,
    key: SlotKey,
    release_on_drop: bool,
}

impl<'a, T: JobTracker + ?Sized> SlotReservation<'a, T> {
    pub fn reserve(tracker: &'a T) -> Result<Self, TrackerError> {
        let key = tracker.try_reserve()?;
        Ok(Self {
            tracker,
            key,
            release_on_drop: true,
        })
    }

    /// Carry over the slot bound to a previous attempt.
    pub fn reuse(tracker: &'a T, previous: &JobId) -> Self {
        Self {
            tracker,
            key: SlotKey::from(previous),
            release_on_drop: false,
        }
    }

    /// Hand the slot over to `job_id`.
    pub fn bind(mut self, job_id: &JobId) -> Result<(), TrackerError> {
        self.tracker.bind(&self.key, job_id)?;
        self.release_on_drop = false;
        Ok(())
    }
}

impl<T: JobTracker + ?Sized> Drop for SlotReservation<'_, T> {
    fn drop(&mut self) {
        if self.release_on_drop {
            self.tracker.release(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_fails_at_limit() {
        let tracker = InMemoryJobTracker::new(2);
        tracker.try_reserve().unwrap();
        tracker.try_reserve().unwrap();

        assert_eq!(
            tracker.try_reserve().unwrap_err(),
            TrackerError::ConcurrentLimitReached { limit: 2 }
        );
        assert_eq!(tracker.in_flight(), 2);
    }

    #[test]
    fn limit_below_one_is_clamped() {
        let tracker = InMemoryJobTracker::new(0);
        assert_eq!(tracker.limit(), 1);
        assert!(tracker.try_reserve().is_ok());
    }

    #[test]
    fn bind_moves_the_slot_to_the_job() {
        let tracker = InMemoryJobTracker::new(1);
        let intent = tracker.try_reserve().unwrap();
        let job_id = JobId::from("job-1");

        tracker.bind(&intent, &job_id).unwrap();

        assert!(!tracker.contains(&intent));
        assert!(tracker.contains(&SlotKey::from(&job_id)));
        assert_eq!(tracker.in_flight(), 1);
    }

    #[test]
    fn binding_an_unknown_slot_fails() {
        let tracker = InMemoryJobTracker::new(1);
        let err = tracker
            .bind(&SlotKey::from(&JobId::from("nope")), &JobId::from("job-1"))
            .unwrap_err();
        assert!(matches!(err, TrackerError::UnknownSlot(_)));
        assert_eq!(tracker.in_flight(), 0);
    }

    #[test]
    fn release_is_idempotent() {
        let tracker = InMemoryJobTracker::new(1);
        let slot = tracker.try_reserve().unwrap();
        assert!(tracker.release(&slot));
        assert!(!tracker.release(&slot));
        assert_eq!(tracker.in_flight(), 0);
    }

    #[test]
    fn dropped_reservation_releases_its_intent() {
        let tracker = InMemoryJobTracker::new(1);
        {
            let _reservation = SlotReservation::reserve(&tracker).unwrap();
            assert_eq!(tracker.in_flight(), 1);
        }
        assert_eq!(tracker.in_flight(), 0);
    }

    #[test]
    fn bound_reservation_keeps_the_slot() {
        let tracker = InMemoryJobTracker::new(1);
        let reservation = SlotReservation::reserve(&tracker).unwrap();
        reservation.bind(&JobId::from("job-1")).unwrap();

        assert!(tracker.contains(&SlotKey::from(&JobId::from("job-1"))));
    }

    #[test]
    fn reused_slot_is_not_released_on_drop() {
        let tracker = InMemoryJobTracker::new(1);
        let first = JobId::from("job-1");
        SlotReservation::reserve(&tracker).unwrap().bind(&first).unwrap();

        drop(SlotReservation::reuse(&tracker, &first));
        assert!(tracker.contains(&SlotKey::from(&first)));

        let second = JobId::from("job-2");
        SlotReservation::reuse(&tracker, &first).bind(&second).unwrap();
        assert!(tracker.contains(&SlotKey::from(&second)));
        assert_eq!(tracker.in_flight(), 1);
    }
}
