//! Shared fixtures for engine integration tests: scripted probes and
//! recording actioners that plug into the method registries.

use std::collections::VecDeque;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use larch::action::ActionDeps;
use larch::action::ActionKind;
use larch::action::ActionMethod;
use larch::action::ActionRegistry;
use larch::probe::CheckMethod;
use larch::probe::ProbeKind;
use larch::probe::ProbeRegistry;
use larch::ActionConfig;
use larch::CheckerConfig;
use larch::L3L4Addr;
use larch::Params;
use larch::Result;
use larch::Signal;
use larch::State;

/// Install a test subscriber once so failing runs carry engine logs.
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("larch=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Probe returning a scripted sequence of verdicts, then a default verdict.
#[derive(Clone, Default)]
pub struct ScriptedProbe {
    verdicts: Arc<Mutex<VecDeque<State>>>,
    default: State,
    delay: Option<Duration>,
    pub checks: Arc<AtomicUsize>,
}

impl ScriptedProbe {
    pub fn new(verdicts: &[State], default: State) -> Self {
        Self {
            verdicts: Arc::new(Mutex::new(verdicts.iter().copied().collect())),
            default,
            delay: None,
            checks: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A probe that sleeps before answering, to model slow targets.
    pub fn slow(delay: Duration, default: State) -> Self {
        Self { delay: Some(delay), default, ..Self::new(&[], default) }
    }

    pub fn check_count(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CheckMethod for ScriptedProbe {
    fn validate(&self, _params: &Params) -> Result<()> {
        Ok(())
    }

    fn create(&self, _params: &Params) -> Result<Box<dyn CheckMethod>> {
        Ok(Box::new(self.clone()))
    }

    async fn check(&self, _target: &L3L4Addr, _timeout: Duration) -> Result<State> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let verdict = self.verdicts.lock().pop_front().unwrap_or(self.default);
        Ok(verdict)
    }
}

/// Actioner recording every applied signal, with optional latency and a
/// high-water mark of concurrent invocations.
#[derive(Clone, Default)]
pub struct RecordingActioner {
    pub applied: Arc<Mutex<Vec<(Signal, Instant)>>>,
    delay: Option<Duration>,
    in_flight: Arc<AtomicUsize>,
    pub max_in_flight: Arc<AtomicUsize>,
}

impl RecordingActioner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slow(delay: Duration) -> Self {
        Self { delay: Some(delay), ..Self::default() }
    }

    pub fn signals(&self) -> Vec<Signal> {
        self.applied.lock().iter().map(|(signal, _)| *signal).collect()
    }
}

#[async_trait]
impl ActionMethod for RecordingActioner {
    fn validate(&self, _params: &Params) -> Result<()> {
        Ok(())
    }

    fn create(
        &self,
        _target: &L3L4Addr,
        _params: &Params,
        _deps: &ActionDeps,
    ) -> Result<Box<dyn ActionMethod>> {
        Ok(Box::new(self.clone()))
    }

    async fn act(&self, signal: Signal, _timeout: Duration) -> Result<()> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.applied.lock().push((signal, Instant::now()));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Registries with the scripted probe standing in for the `none` method and
/// the recording actioner standing in for `Blank`.
pub fn test_registries(
    probe: &ScriptedProbe,
    actioner: &RecordingActioner,
) -> (ProbeRegistry, ActionRegistry) {
    let probes = ProbeRegistry::builtin().register(ProbeKind::None, Box::new(probe.clone()));
    let actions = ActionRegistry::builtin(ActionDeps::default())
        .register(ActionKind::Blank, Box::new(actioner.clone()));
    (probes, actions)
}

/// Checker config driving the scripted probe.
pub fn checker_config(interval: Duration, up_retry: u32, down_retry: u32) -> CheckerConfig {
    CheckerConfig {
        kind: ProbeKind::None,
        interval,
        timeout: interval.max(Duration::from_millis(500)),
        up_retry,
        down_retry,
        initial_state: State::Healthy,
        params: Params::new(),
    }
}

/// Action config driving the recording actioner.
pub fn action_config(sync_interval: Duration) -> ActionConfig {
    ActionConfig {
        kind: ActionKind::Blank,
        timeout: Duration::from_secs(60),
        sync_interval,
        params: Params::new(),
    }
}
