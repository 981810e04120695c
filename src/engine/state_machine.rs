//! Pure hysteresis state machine for per-target health.
//!
//! No I/O, no async, no clocks: verdicts go in, confirmed transitions come
//! out. The confirmed state flips only after enough consecutive opposing
//! verdicts; the threshold is `down_retry` while healthy and `up_retry` while
//! unhealthy, with [`ZERO_RETRY`] meaning a single opposing verdict suffices.
//! `Unknown` verdicts are not observations and leave everything untouched.

use crate::config::ZERO_RETRY;
use crate::types::State;

/// Debounced health state for one target.
#[derive(Debug, Clone)]
pub struct HealthHysteresis {
    confirmed: State,
    streak: u32,
    up_retry: u32,
    down_retry: u32,
}

impl HealthHysteresis {
    /// Start from a configured confirmed state.
    pub fn new(initial: State, up_retry: u32, down_retry: u32) -> Self {
        Self { confirmed: initial, streak: 0, up_retry, down_retry }
    }

    /// The current confirmed state.
    pub fn confirmed(&self) -> State {
        self.confirmed
    }

    /// Consecutive opposing verdicts observed since the last flip or reset.
    pub fn streak(&self) -> u32 {
        self.streak
    }

    /// Verdicts needed to flip away from the current confirmed state.
    fn threshold(&self) -> u32 {
        let retries = match self.confirmed {
            State::Healthy => self.down_retry,
            _ => self.up_retry,
        };
        if retries == ZERO_RETRY {
            1
        } else {
            retries
        }
    }

    /// Feed one probe verdict. Returns the new confirmed state when the
    /// verdict completes a flip.
    pub fn observe(&mut self, verdict: State) -> Option<State> {
        if verdict == State::Unknown {
            return None;
        }
        if verdict == self.confirmed {
            self.streak = 0;
            return None;
        }

        self.streak += 1;
        if self.streak >= self.threshold() {
            self.confirmed = verdict;
            self.streak = 0;
            return Some(verdict);
        }
        None
    }
}
