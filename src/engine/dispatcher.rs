//! Per-target action dispatcher.
//!
//! One dispatcher per target consumes confirmed transitions and drives the
//! actioner, one action at a time and in event order. The channel holds only
//! the latest transition: an event superseded before dispatch is simply never
//! seen. Stale events (older than the last successful action) and same-signal
//! events inside the min-interval are dropped; action failures are logged and
//! left for the next transition to re-drive, so a persistently failing
//! actioner shows up as a `last_action` that stops advancing.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;

use crate::action::ActionMethod;
use crate::config::ActionConfig;
use crate::engine::target::TargetStatus;
use crate::engine::target::TransitionEvent;
use crate::error::ActionTimeoutSnafu;
use crate::types::Signal;
use crate::types::TargetKey;

pub(crate) struct Dispatcher {
    pub key: TargetKey,
    pub actioner: Box<dyn ActionMethod>,
    pub config: ActionConfig,
    pub status: Arc<RwLock<TargetStatus>>,
    pub events: watch::Receiver<TransitionEvent>,
    pub cancel: CancellationToken,
}

impl Dispatcher {
    pub async fn run(mut self) {
        let mut last_action: Option<Instant> = None;
        let mut last_signal: Option<Signal> = None;

        debug!(target = %self.key, "action dispatcher started");

        loop {
            // Process the current value first: the initial borrow carries the
            // synthesized replay event.
            let event = *self.events.borrow_and_update();
            self.handle(event, &mut last_action, &mut last_signal).await;

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                changed = self.events.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        debug!(target = %self.key, "action dispatcher stopped");
    }

    async fn handle(
        &self,
        event: TransitionEvent,
        last_action: &mut Option<Instant>,
        last_signal: &mut Option<Signal>,
    ) {
        let signal = event.signal();

        if let Some(acted_at) = *last_action {
            if event.at < acted_at {
                debug!(target = %self.key, signal = %signal, "stale transition dropped");
                return;
            }
            // The replay event (seq 0) bypasses the min-interval debounce.
            if event.seq != 0
                && *last_signal == Some(signal)
                && acted_at.elapsed() < self.config.sync_interval
            {
                debug!(target = %self.key, signal = %signal,
                    "transition within min-interval debounced");
                return;
            }
        }

        // The actioner owns its deadline, but a misbehaving one must not
        // wedge the dispatcher; it is abandoned at the same bound.
        let outcome = match tokio::time::timeout(
            self.config.timeout,
            self.actioner.act(signal, self.config.timeout),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                ActionTimeoutSnafu { timeout_ms: self.config.timeout.as_millis() as u64 }.fail()
            }
        };

        match outcome {
            Ok(()) => {
                let now = Instant::now();
                *last_action = Some(now);
                *last_signal = Some(signal);
                self.status.write().last_action = Some(now);
                info!(target = %self.key, signal = %signal, "action applied");
            }
            Err(err) => {
                // No immediate retry; the next transition re-drives the
                // actioner.
                error!(target = %self.key, signal = %signal, error = %err, "action failed");
            }
        }
    }
}
