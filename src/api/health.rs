//! Shared health state for the /health endpoint.
//! Updated by JobScheduler after every guarded run.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Run counters. Updated by the scheduler, read by the API.
#[derive(Default)]
pub struct HealthState {
    /// Runs currently executing (including retry backoff).
    pub runs_in_flight: AtomicU64,
    pub runs_finished: AtomicU64,
    /// Runs that exhausted their attempts.
    pub runs_failed: AtomicU64,
    /// Nanosecond timestamp of the last finished run (0 = none).
    pub last_run_at_ns: AtomicU64,
}

#[derive(Debug, Serialize)]
pub struct HealthSnapshot {
    pub runs_in_flight: u64,
    pub runs_finished: u64,
    pub runs_failed: u64,
    pub last_run_at_ns: Option<u64>,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run_started(&self) {
        self.runs_in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn run_ended(&self, ok: bool, at_ns: u64) {
        self.runs_in_flight.fetch_sub(1, Ordering::Relaxed);
        if ok {
            self.runs_finished.fetch_add(1, Ordering::Relaxed);
        } else {
            self.runs_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.last_run_at_ns.store(at_ns, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let last = self.last_run_at_ns.load(Ordering::Relaxed);
        HealthSnapshot {
            runs_in_flight: self.runs_in_flight.load(Ordering::Relaxed),
            runs_finished: self.runs_finished.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
            last_run_at_ns: (last > 0).then_some(last),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_track_runs() {
        let h = HealthState::new();
        assert_eq!(h.snapshot().last_run_at_ns, None);

        h.run_started();
        h.run_started();
        assert_eq!(h.snapshot().runs_in_flight, 2);

        h.run_ended(true, 10);
        h.run_ended(false, 20);
        let s = h.snapshot();
        assert_eq!(s.runs_in_flight, 0);
        assert_eq!(s.runs_finished, 1);
        assert_eq!(s.runs_failed, 1);
        assert_eq!(s.last_run_at_ns, Some(20));
    }
}
