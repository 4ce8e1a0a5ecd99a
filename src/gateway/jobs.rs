//! Job handle registry — one terminal outcome per job key.
//!
//! A key is reserved (`InFlight`) while its complete/fail call runs. A
//! successful acknowledgement commits it to `Completed` or `Failed`; any
//! error, or dropping the call, releases the reservation so the caller can
//! try again. A second resolution of a committed or in-flight key fails
//! with `StaleJobHandle` without touching the network.
//!
//! Entries are keyed by the numeric wire key, so `"42"` and `" +42"` name
//! the same job.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use super::types::{JobKey, JobOutcome};
use crate::error::{ClientError, Result};

/// Terminal keys remembered before the oldest are forgotten.
pub const DEFAULT_JOB_HISTORY: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    InFlight,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InFlight => "in_flight",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    fn from_outcome(outcome: &JobOutcome) -> Self {
        match outcome {
            JobOutcome::Complete { .. } => Self::Completed,
            JobOutcome::Fail { .. } => Self::Failed,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Default)]
struct Inner {
    states: HashMap<i64, JobState>,
    terminal_order: VecDeque<i64>,
}

pub struct JobHandleRegistry {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl JobHandleRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim `key` for one resolution attempt.
    pub fn reserve(&self, key: &JobKey) -> Result<JobReservation<'_>> {
        let wire = key.to_wire()?;
        let mut inner = self.lock();
        if let Some(state) = inner.states.get(&wire) {
            return Err(ClientError::StaleJobHandle {
                job_key: wire.to_string(),
                state: state.to_string(),
            });
        }
        inner.states.insert(wire, JobState::InFlight);
        Ok(JobReservation {
            registry: self,
            key: wire,
            committed: false,
        })
    }

    pub fn state(&self, key: &JobKey) -> Option<JobState> {
        let wire = key.to_wire().ok()?;
        self.lock().states.get(&wire).copied()
    }

    pub fn len(&self) -> usize {
        self.lock().states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn commit(&self, key: i64, state: JobState) {
        let mut inner = self.lock();
        inner.states.insert(key, state);
        inner.terminal_order.push_back(key);
        while inner.terminal_order.len() > self.capacity {
            if let Some(oldest) = inner.terminal_order.pop_front() {
                if inner.states.get(&oldest) != Some(&JobState::InFlight) {
                    inner.states.remove(&oldest);
                }
            }
        }
    }

    fn release(&self, key: i64) {
        let mut inner = self.lock();
        if inner.states.get(&key) == Some(&JobState::InFlight) {
            inner.states.remove(&key);
        }
    }
}

impl Default for JobHandleRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_JOB_HISTORY)
    }
}

/// An in-flight claim on a job key. Released on drop unless committed.
pub struct JobReservation<'a> {
    registry: &'a JobHandleRegistry,
    key: i64,
    committed: bool,
}

impl JobReservation<'_> {
    /// Record the acknowledged outcome.
    pub fn commit(mut self, outcome: &JobOutcome) {
        self.registry
            .commit(self.key, JobState::from_outcome(outcome));
        self.committed = true;
    }
}

impl Drop for JobReservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.registry.release(self.key);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::codec::Variables;

    fn complete() -> JobOutcome {
        JobOutcome::Complete {
            variables: Variables::new(),
        }
    }

    #[test]
    fn test_second_resolution_is_stale() {
        let registry = JobHandleRegistry::default();
        let key = JobKey::from(1);

        registry.reserve(&key).unwrap().commit(&complete());
        assert_eq!(registry.state(&key), Some(JobState::Completed));

        match registry.reserve(&key) {
            Err(ClientError::StaleJobHandle { state, .. }) => assert_eq!(state, "completed"),
            Err(other) => panic!("unexpected {:?}", other),
            Ok(_) => panic!("second reservation must fail"),
        };
    }

    #[test]
    fn test_in_flight_key_is_exclusive() {
        let registry = JobHandleRegistry::default();
        let key = JobKey::from(2);

        let first = registry.reserve(&key).unwrap();
        assert!(matches!(
            registry.reserve(&key),
            Err(ClientError::StaleJobHandle { .. })
        ));
        drop(first);
        assert!(registry.reserve(&key).is_ok());
    }

    #[test]
    fn test_dropped_reservation_is_released() {
        let registry = JobHandleRegistry::default();
        let key = JobKey::from(3);
        {
            let _reservation = registry.reserve(&key).unwrap();
            assert_eq!(registry.state(&key), Some(JobState::InFlight));
        }
        assert_eq!(registry.state(&key), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_spellings_of_one_key_share_a_handle() {
        let registry = JobHandleRegistry::default();
        registry
            .reserve(&JobKey::from("42"))
            .unwrap()
            .commit(&complete());

        for spelling in ["+42", " 42", "42 ", "042"] {
            match registry.reserve(&JobKey::from(spelling)) {
                Err(ClientError::StaleJobHandle { job_key, .. }) => assert_eq!(job_key, "42"),
                Err(other) => panic!("unexpected {:?}", other),
                Ok(_) => panic!("'{}' must be stale", spelling),
            };
        }
        assert_eq!(registry.state(&JobKey::from(" +42")), Some(JobState::Completed));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_non_numeric_key_is_not_reserved() {
        let registry = JobHandleRegistry::default();
        assert!(matches!(
            registry.reserve(&JobKey::from("job-1")),
            Err(ClientError::InvalidArgument(_))
        ));
        assert_eq!(registry.state(&JobKey::from("job-1")), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_history_evicts_oldest() {
        let registry = JobHandleRegistry::new(2);
        for n in 0..3 {
            registry
                .reserve(&JobKey::from(n))
                .unwrap()
                .commit(&JobOutcome::Fail {
                    reason: "x".into(),
                });
        }
        assert_eq!(registry.state(&JobKey::from(0)), None);
        assert_eq!(registry.state(&JobKey::from(2)), Some(JobState::Failed));
        assert_eq!(registry.len(), 2);
    }
}
