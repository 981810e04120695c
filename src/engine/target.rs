//! Per-target record and shared status snapshot.

use std::sync::Arc;

use parking_lot::Mutex;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::ActionConfig;
use crate::config::CheckerConfig;
use crate::types::Signal;
use crate::types::State;
use crate::types::TargetKey;

/// Mutable status shared between a target's tasks and state readers.
///
/// The checker loop writes verdicts and confirmed transitions, the dispatcher
/// writes the last successful action; everyone else only reads. Hold times
/// are a few field accesses, so a plain lock suffices.
#[derive(Debug, Clone)]
pub struct TargetStatus {
    /// Debounced health state.
    pub confirmed: State,
    /// Verdict of the most recent completed probe.
    pub last_verdict: State,
    /// Consecutive opposing verdicts since the last flip or reset.
    pub streak: u32,
    /// Completion time of the last successful action, if any.
    pub last_action: Option<Instant>,
    /// Record creation time.
    pub created: Instant,
}

impl TargetStatus {
    pub(crate) fn new(initial: State) -> Self {
        Self {
            confirmed: initial,
            last_verdict: State::Unknown,
            streak: 0,
            last_action: None,
            created: Instant::now(),
        }
    }
}

/// One row of the engine's state read-out, ordered by key.
#[derive(Debug, Clone)]
pub struct TargetReadout {
    /// Target key.
    pub key: TargetKey,
    /// Debounced health state.
    pub confirmed: State,
    /// Completion time of the last successful action, if any.
    pub last_action: Option<Instant>,
    /// Verdict of the most recent completed probe.
    pub last_verdict: State,
    /// Consecutive opposing verdicts since the last flip or reset.
    pub streak: u32,
}

/// A confirmed health transition flowing from checker loop to dispatcher.
///
/// Sequence 0 is the synthesized replay event published at record creation;
/// it forces the external world into the configured initial state and is
/// exempt from the dispatcher's min-interval debounce.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TransitionEvent {
    /// The newly confirmed state.
    pub state: State,
    /// Monotonic time the transition was confirmed.
    pub at: Instant,
    /// Per-target sequence number; 0 is the replay event.
    pub seq: u64,
}

impl TransitionEvent {
    /// The reconciliation signal this transition carries.
    pub fn signal(&self) -> Signal {
        self.state.signal()
    }
}

/// An installed target: configuration, shared status, and the handles of the
/// two tasks driving it.
pub(crate) struct Target {
    pub key: TargetKey,
    pub checker_cfg: CheckerConfig,
    pub action_cfg: ActionConfig,
    pub status: Arc<RwLock<TargetStatus>>,
    pub cancel: CancellationToken,
    pub checker_task: Mutex<Option<JoinHandle<()>>>,
    pub dispatcher_task: Mutex<Option<JoinHandle<()>>>,
}

impl Target {
    /// Cancel both tasks and wait for them to drain.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let tasks = [self.checker_task.lock().take(), self.dispatcher_task.lock().take()];
        for task in tasks.into_iter().flatten() {
            let _ = task.await;
        }
    }

    /// Take both join handles, leaving cancellation to the caller.
    pub fn take_tasks(&self) -> Vec<JoinHandle<()>> {
        [self.checker_task.lock().take(), self.dispatcher_task.lock().take()]
            .into_iter()
            .flatten()
            .collect()
    }

    /// Snapshot this target's row of the state read-out.
    pub fn readout(&self) -> TargetReadout {
        let status = self.status.read();
        TargetReadout {
            key: self.key,
            confirmed: status.confirmed,
            last_action: status.last_action,
            last_verdict: status.last_verdict,
            streak: status.streak,
        }
    }
}
