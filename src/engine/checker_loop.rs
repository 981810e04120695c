//! Per-target periodic probe driver.
//!
//! One loop per target. Ticks start at a randomized offset within the first
//! interval so a fleet of targets added together does not probe in lockstep.
//! The ticker skips missed ticks instead of catching up, and each probe runs
//! under its own absolute deadline: a probe that fails to honor its budget is
//! abandoned at the deadline without skewing the cadence.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rand::Rng;
use tokio::sync::watch;
use tokio::time::interval_at;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::CheckerConfig;
use crate::engine::state_machine::HealthHysteresis;
use crate::engine::target::TargetStatus;
use crate::engine::target::TransitionEvent;
use crate::probe::CheckMethod;
use crate::types::L3L4Addr;
use crate::types::State;
use crate::types::TargetKey;

pub(crate) struct CheckerLoop {
    pub key: TargetKey,
    pub addr: L3L4Addr,
    pub checker: Box<dyn CheckMethod>,
    pub config: CheckerConfig,
    pub status: Arc<RwLock<TargetStatus>>,
    pub events: watch::Sender<TransitionEvent>,
    pub cancel: CancellationToken,
}

impl CheckerLoop {
    pub async fn run(self, initial: State) {
        let interval = self.config.interval;
        let offset_ms = rand::rng().random_range(0..interval.as_millis().max(1)) as u64;
        let mut ticker =
            interval_at(Instant::now() + Duration::from_millis(offset_ms), interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut machine =
            HealthHysteresis::new(initial, self.config.up_retry, self.config.down_retry);
        let mut seq: u64 = 0;

        debug!(target = %self.key, interval_ms = interval.as_millis() as u64,
            offset_ms, "checker loop started");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            // The probe itself must also yield to cancellation so shutdown
            // stays prompt; an in-flight probe is abandoned, not awaited.
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = self.probe_once(&mut machine, &mut seq) => {}
            }
        }

        debug!(target = %self.key, "checker loop stopped");
    }

    async fn probe_once(&self, machine: &mut HealthHysteresis, seq: &mut u64) {
        let verdict =
            match tokio::time::timeout(self.config.timeout, self.checker.check(&self.addr, self.config.timeout))
                .await
            {
                Ok(Ok(verdict)) => verdict,
                Ok(Err(err)) => {
                    warn!(target = %self.key, error = %err, "probe could not run");
                    State::Unknown
                }
                Err(_) => {
                    warn!(target = %self.key, "probe overran its deadline, abandoned");
                    State::Unhealthy
                }
            };

        let transition = machine.observe(verdict);

        {
            let mut status = self.status.write();
            status.last_verdict = verdict;
            status.streak = machine.streak();
            if let Some(state) = transition {
                status.confirmed = state;
            }
        }

        if let Some(state) = transition {
            *seq += 1;
            info!(target = %self.key, state = %state, "health transition confirmed");
            let event = TransitionEvent { state, at: Instant::now(), seq: *seq };
            // Send fails only when the dispatcher is gone; nothing to do then.
            let _ = self.events.send(event);
        }
    }
}
