use std::collections::HashMap;
use std::sync::{Arc, Mutex};

// ── Fault plans ───────────────────────────────────────────────────────────────

/// What a simulated endpoint does wrong on one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The write times out; nothing is echoed.
    Timeout,
    /// The echo comes back with only this many bytes.
    Short(usize),
    /// The echo comes back with its first byte flipped.
    Corrupt,
    /// The device is gone from this attempt on.
    Unplug,
}

/// Faults keyed by attempt number (one attempt = one write).
///
/// Cloned handles share state, so a test keeps one clone to inspect how many
/// attempts the harness made after handing the other to a transport.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    inner: Arc<Mutex<PlanState>>,
}

#[derive(Debug, Default)]
struct PlanState {
    faults: HashMap<usize, Fault>,
    attempts: usize,
    unplugged: bool,
}

impl FaultPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject `fault` on the given zero-based attempt.
    pub fn at(self, attempt: usize, fault: Fault) -> Self {
        self.inner.lock().unwrap().faults.insert(attempt, fault);
        self
    }

    /// Inject `fault` on `count` consecutive attempts starting at `first`.
    pub fn repeat(self, first: usize, count: usize, fault: Fault) -> Self {
        {
            let mut state = self.inner.lock().unwrap();
            for attempt in first..first + count {
                state.faults.insert(attempt, fault);
            }
        }
        self
    }

    /// Consume the next attempt and return its fault, if any.
    pub fn next_attempt(&self) -> Option<Fault> {
        let mut state = self.inner.lock().unwrap();
        let attempt = state.attempts;
        state.attempts += 1;
        if state.unplugged {
            return Some(Fault::Unplug);
        }
        let fault = state.faults.remove(&attempt);
        if fault == Some(Fault::Unplug) {
            state.unplugged = true;
        }
        fault
    }

    pub fn attempts(&self) -> usize {
        self.inner.lock().unwrap().attempts
    }
}
