//! Target registry and lifecycle.
//!
//! The engine owns the map from target key to record. Each installed target
//! runs two tasks: a checker loop feeding the hysteresis state machine, and a
//! dispatcher serializing reconciliation against confirmed transitions. The
//! registries are immutable and handed in at construction; the engine never
//! mutates them.
//!
//! Ordering is strictly per-target. Across targets the engine guarantees
//! nothing, by design.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

use crate::action::ActionMethod;
use crate::action::ActionRegistry;
use crate::config::ActionConfig;
use crate::config::CheckerConfig;
use crate::error::EngineShuttingDownSnafu;
use crate::error::Result;
use crate::error::TargetNotFoundSnafu;
use crate::probe::CheckMethod;
use crate::probe::ProbeKind;
use crate::probe::ProbeRegistry;
use crate::types::State;
use crate::types::TargetKey;

mod checker_loop;
mod dispatcher;
pub mod state_machine;
mod target;

pub use state_machine::HealthHysteresis;
pub use target::TargetReadout;
pub use target::TargetStatus;

use checker_loop::CheckerLoop;
use dispatcher::Dispatcher;
use target::Target;
use target::TransitionEvent;

/// Aggregate health counts across all installed targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineStats {
    /// Installed targets.
    pub targets: usize,
    /// Targets whose confirmed state is healthy.
    pub healthy: usize,
    /// Targets whose confirmed state is unhealthy.
    pub unhealthy: usize,
}

/// The per-target health engine.
pub struct Engine {
    probes: ProbeRegistry,
    actions: ActionRegistry,
    targets: RwLock<HashMap<TargetKey, Arc<Target>>>,
    cancel: CancellationToken,
    shutting_down: AtomicBool,
}

impl Engine {
    /// Create an engine over immutable method registries.
    pub fn new(probes: ProbeRegistry, actions: ActionRegistry) -> Self {
        Self {
            probes,
            actions,
            targets: RwLock::new(HashMap::new()),
            cancel: CancellationToken::new(),
            shutting_down: AtomicBool::new(false),
        }
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shutting_down.load(Ordering::Acquire) {
            return EngineShuttingDownSnafu.fail();
        }
        Ok(())
    }

    /// Validate configs and bind probe and actioner instances for a key.
    fn build(
        &self,
        key: &TargetKey,
        checker_cfg: &CheckerConfig,
        action_cfg: &ActionConfig,
    ) -> Result<(Box<dyn CheckMethod>, Box<dyn ActionMethod>, ProbeKind)> {
        checker_cfg.validate()?;
        action_cfg.validate()?;

        let addr = key.addr();
        let resolved = checker_cfg.kind.resolve(addr.proto);
        self.probes.validate(resolved, &checker_cfg.params)?;
        self.actions.validate(action_cfg.kind, &action_cfg.params)?;

        let checker = self.probes.create(resolved, &checker_cfg.params)?;
        let actioner = self.actions.create(action_cfg.kind, &addr, &action_cfg.params)?;
        Ok((checker, actioner, resolved))
    }

    /// Start both tasks for a target and assemble its record.
    fn start(
        &self,
        key: TargetKey,
        checker_cfg: CheckerConfig,
        action_cfg: ActionConfig,
        checker: Box<dyn CheckMethod>,
        actioner: Box<dyn ActionMethod>,
        initial: State,
    ) -> Arc<Target> {
        let status = Arc::new(RwLock::new(TargetStatus::new(initial)));
        let cancel = self.cancel.child_token();

        // The initial channel value is the replay event: it forces the world
        // into the configured state as soon as the dispatcher starts.
        let (events_tx, events_rx) =
            watch::channel(TransitionEvent { state: initial, at: Instant::now(), seq: 0 });

        let checker_loop = CheckerLoop {
            key,
            addr: key.addr(),
            checker,
            config: checker_cfg.clone(),
            status: status.clone(),
            events: events_tx,
            cancel: cancel.clone(),
        };
        let dispatcher = Dispatcher {
            key,
            actioner,
            config: action_cfg.clone(),
            status: status.clone(),
            events: events_rx,
            cancel: cancel.clone(),
        };

        let checker_task = tokio::spawn(checker_loop.run(initial));
        let dispatcher_task = tokio::spawn(dispatcher.run());

        Arc::new(Target {
            key,
            checker_cfg,
            action_cfg,
            status,
            cancel,
            checker_task: Mutex::new(Some(checker_task)),
            dispatcher_task: Mutex::new(Some(dispatcher_task)),
        })
    }

    /// Install a target. Idempotent by key: re-adding with identical configs
    /// is a no-op, re-adding with different configs is an update.
    pub async fn add_target(
        &self,
        key: TargetKey,
        checker_cfg: CheckerConfig,
        action_cfg: ActionConfig,
    ) -> Result<()> {
        self.ensure_running()?;

        if let Some(existing) = self.targets.read().get(&key).cloned() {
            if existing.checker_cfg == checker_cfg && existing.action_cfg == action_cfg {
                return Ok(());
            }
            drop(existing);
            return self.update_target(key, Some(checker_cfg), Some(action_cfg)).await;
        }

        let (checker, actioner, _) = self.build(&key, &checker_cfg, &action_cfg)?;
        let initial = checker_cfg.initial_state;
        let entry = self.start(key, checker_cfg, action_cfg, checker, actioner, initial);
        let previous = self.targets.write().insert(key, entry);
        if let Some(previous) = previous {
            previous.stop().await;
        }

        info!(target = %key, "target added");
        Ok(())
    }

    /// Replace a target's configuration atomically. A `None` config keeps
    /// the old one. The confirmed state is preserved unless the probe kind
    /// changed, in which case it resets to the configured initial state.
    pub async fn update_target(
        &self,
        key: TargetKey,
        checker_cfg: Option<CheckerConfig>,
        action_cfg: Option<ActionConfig>,
    ) -> Result<()> {
        self.ensure_running()?;

        let old = self
            .targets
            .read()
            .get(&key)
            .cloned()
            .ok_or_else(|| TargetNotFoundSnafu { key: key.to_string() }.build())?;

        let checker_cfg = checker_cfg.unwrap_or_else(|| old.checker_cfg.clone());
        let action_cfg = action_cfg.unwrap_or_else(|| old.action_cfg.clone());

        // Bind the replacement before stopping anything, so a bad config
        // leaves the old target running.
        let (checker, actioner, new_kind) = self.build(&key, &checker_cfg, &action_cfg)?;

        let old_kind = old.checker_cfg.kind.resolve(key.addr().proto);
        let old_confirmed = old.status.read().confirmed;
        let initial =
            if new_kind == old_kind { old_confirmed } else { checker_cfg.initial_state };

        old.stop().await;
        let entry = self.start(key, checker_cfg, action_cfg, checker, actioner, initial);
        self.targets.write().insert(key, entry);

        info!(target = %key, preserved = %(initial == old_confirmed), "target updated");
        Ok(())
    }

    /// Remove a target, stopping both of its tasks before the record is
    /// dropped.
    pub async fn remove_target(&self, key: TargetKey) -> Result<()> {
        self.ensure_running()?;

        let entry = self
            .targets
            .read()
            .get(&key)
            .cloned()
            .ok_or_else(|| TargetNotFoundSnafu { key: key.to_string() }.build())?;

        entry.stop().await;
        self.targets.write().remove(&key);

        info!(target = %key, "target removed");
        Ok(())
    }

    /// Confirmed state of one target.
    pub fn state(&self, key: &TargetKey) -> Result<State> {
        self.targets
            .read()
            .get(key)
            .map(|entry| entry.status.read().confirmed)
            .ok_or_else(|| TargetNotFoundSnafu { key: key.to_string() }.build())
    }

    /// State read-out for all targets, ordered by key.
    pub fn list_states(&self) -> Vec<TargetReadout> {
        let mut rows: Vec<TargetReadout> =
            self.targets.read().values().map(|entry| entry.readout()).collect();
        rows.sort_by(|a, b| a.key.cmp(&b.key));
        rows
    }

    /// Aggregate health counts.
    pub fn stats(&self) -> EngineStats {
        let targets = self.targets.read();
        let mut stats = EngineStats { targets: targets.len(), ..EngineStats::default() };
        for entry in targets.values() {
            match entry.status.read().confirmed {
                State::Healthy => stats.healthy += 1,
                State::Unhealthy => stats.unhealthy += 1,
                State::Unknown => {}
            }
        }
        stats
    }

    /// Cancel every target and wait up to `grace` for in-flight work.
    /// Remaining tasks are abandoned; no new probes or actions start
    /// afterwards.
    pub async fn shutdown(&self, grace: Duration) {
        self.shutting_down.store(true, Ordering::Release);
        self.cancel.cancel();

        let entries: Vec<Arc<Target>> =
            self.targets.write().drain().map(|(_, entry)| entry).collect();
        let mut tasks = Vec::new();
        for entry in &entries {
            tasks.extend(entry.take_tasks());
        }

        let abandoned = tasks.len();
        if tokio::time::timeout(grace, futures::future::join_all(tasks)).await.is_err() {
            warn!(tasks = abandoned, "shutdown grace elapsed, abandoning in-flight work");
        }

        info!(targets = entries.len(), "engine shut down");
    }
}
