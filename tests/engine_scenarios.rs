//! End-to-end engine scenarios: flap debouncing, ambiguous UDP timeouts,
//! lifecycle idempotence, serialized actions, and graceful shutdown.

mod common;

use std::time::Duration;

use common::action_config;
use common::checker_config;
use common::test_registries;
use common::RecordingActioner;
use common::ScriptedProbe;

use larch::probe::ProbeKind;
use larch::CheckerConfig;
use larch::Engine;
use larch::Error;
use larch::Params;
use larch::Signal;
use larch::State;
use larch::TargetKey;
use larch::ZERO_RETRY;

fn key(s: &str) -> TargetKey {
    s.parse().unwrap()
}

#[tokio::test(start_paused = true)]
async fn tcp_backend_flap_debounces_to_two_transitions() {
    // Verdicts H,U,U,U,H,H at 1s ticks with up_retry=2, down_retry=3:
    // one confirmed flip down, one confirmed flip back up.
    let probe = ScriptedProbe::new(
        &[
            State::Healthy,
            State::Unhealthy,
            State::Unhealthy,
            State::Unhealthy,
            State::Healthy,
            State::Healthy,
        ],
        State::Healthy,
    );
    let actioner = RecordingActioner::new();
    let (probes, actions) = test_registries(&probe, &actioner);
    let engine = Engine::new(probes, actions);

    let mut checker = checker_config(Duration::from_secs(1), 2, 3);
    checker.timeout = Duration::from_millis(500);
    engine
        .add_target(key("10.0.0.1-TCP-80"), checker, action_config(Duration::from_secs(10)))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(engine.state(&key("10.0.0.1-TCP-80")).unwrap(), State::Healthy);
    // Replay Up at creation, Down on the third U, Up on the second H.
    assert_eq!(actioner.signals(), vec![Signal::Up, Signal::Down, Signal::Up]);
}

#[tokio::test]
async fn udp_ambiguous_timeout_stays_healthy() -> anyhow::Result<()> {
    // A silent UDP socket with nothing to send or expect: every probe times
    // out, every verdict is healthy, and only the replay action ever runs.
    common::init_tracing();
    let silent = tokio::net::UdpSocket::bind("127.0.0.1:0").await?;
    let addr = silent.local_addr()?;

    let probe = ScriptedProbe::default();
    let actioner = RecordingActioner::new();
    let (probes, actions) = test_registries(&probe, &actioner);
    let engine = Engine::new(probes, actions);

    let checker = CheckerConfig {
        kind: ProbeKind::Udp,
        interval: Duration::from_millis(50),
        timeout: Duration::from_millis(30),
        up_retry: 1,
        down_retry: 1,
        initial_state: State::Healthy,
        params: Params::new(),
    };
    let target = key(&format!("{}-UDP-{}", addr.ip(), addr.port()));
    engine.add_target(target, checker, action_config(Duration::from_secs(10))).await?;

    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(engine.state(&target)?, State::Healthy);
    assert_eq!(actioner.signals(), vec![Signal::Up]);
    engine.shutdown(Duration::from_secs(1)).await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn alternating_transitions_all_reach_the_actioner() {
    // Up (replay), Down, Up within the min-interval: differing signals are
    // never debounced.
    let probe = ScriptedProbe::new(&[State::Unhealthy, State::Healthy], State::Healthy);
    let actioner = RecordingActioner::new();
    let (probes, actions) = test_registries(&probe, &actioner);
    let engine = Engine::new(probes, actions);

    let checker = checker_config(Duration::from_secs(1), ZERO_RETRY, ZERO_RETRY);
    engine
        .add_target(key("192.0.2.10"), checker, action_config(Duration::from_secs(10)))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(actioner.signals(), vec![Signal::Up, Signal::Down, Signal::Up]);
}

#[tokio::test(start_paused = true)]
async fn re_add_with_identical_config_is_a_no_op() {
    let probe = ScriptedProbe::default();
    let actioner = RecordingActioner::new();
    let (probes, actions) = test_registries(&probe, &actioner);
    let engine = Engine::new(probes, actions);

    let checker = checker_config(Duration::from_secs(1), 2, 2);
    let action = action_config(Duration::from_secs(10));
    engine.add_target(key("10.0.0.2-TCP-80"), checker.clone(), action.clone()).await.unwrap();
    engine.add_target(key("10.0.0.2-TCP-80"), checker, action).await.unwrap();

    assert_eq!(engine.list_states().len(), 1);
    // A single replay action: the second add did not restart the target.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(actioner.signals(), vec![Signal::Up]);
}

#[tokio::test(start_paused = true)]
async fn re_add_with_new_config_preserves_confirmed_state() {
    // All-unhealthy probe flips the target down; a config change that keeps
    // the probe kind must carry the unhealthy state over.
    let probe = ScriptedProbe::new(&[], State::Unhealthy);
    let actioner = RecordingActioner::new();
    let (probes, actions) = test_registries(&probe, &actioner);
    let engine = Engine::new(probes, actions);

    let target = key("10.0.0.3-TCP-80");
    let mut checker = checker_config(Duration::from_secs(1), 1, 1);
    engine.add_target(target, checker.clone(), action_config(Duration::ZERO)).await.unwrap();

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(engine.state(&target).unwrap(), State::Unhealthy);

    checker.interval = Duration::from_secs(2);
    engine.add_target(target, checker, action_config(Duration::ZERO)).await.unwrap();
    assert_eq!(engine.state(&target).unwrap(), State::Unhealthy);

    assert!(matches!(
        engine.update_target(key("10.99.99.99-TCP-80"), None, None).await,
        Err(Error::TargetNotFound { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn probe_kind_change_resets_confirmed_state() {
    let probe = ScriptedProbe::new(&[], State::Unhealthy);
    let actioner = RecordingActioner::new();
    let (probes, actions) = test_registries(&probe, &actioner);
    let engine = Engine::new(probes, actions);

    let target = key("10.0.0.4-TCP-80");
    let checker = checker_config(Duration::from_secs(1), 1, 1);
    engine.add_target(target, checker.clone(), action_config(Duration::ZERO)).await.unwrap();

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(engine.state(&target).unwrap(), State::Unhealthy);

    // Swap to the real TCP probe; the confirmed state returns to the
    // configured initial value.
    let mut swapped = checker;
    swapped.kind = ProbeKind::Tcp;
    engine.update_target(target, Some(swapped), None).await.unwrap();
    assert_eq!(engine.state(&target).unwrap(), State::Healthy);
}

#[tokio::test(start_paused = true)]
async fn remove_target_stops_both_tasks() {
    let probe = ScriptedProbe::default();
    let actioner = RecordingActioner::new();
    let (probes, actions) = test_registries(&probe, &actioner);
    let engine = Engine::new(probes, actions);

    let target = key("10.0.0.5-TCP-80");
    engine
        .add_target(target, checker_config(Duration::from_secs(1), 1, 1), action_config(Duration::ZERO))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(3)).await;
    engine.remove_target(target).await.unwrap();

    assert!(matches!(engine.state(&target), Err(Error::TargetNotFound { .. })));
    assert!(matches!(
        engine.remove_target(target).await,
        Err(Error::TargetNotFound { .. })
    ));

    let checks = probe.check_count();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(probe.check_count(), checks);
}

#[tokio::test(start_paused = true)]
async fn actions_for_one_target_never_overlap() {
    // Flip on every verdict while the actioner is slower than the probe
    // cadence; superseded transitions may be skipped but actions must stay
    // strictly serial.
    let probe = ScriptedProbe::new(
        &[
            State::Unhealthy,
            State::Healthy,
            State::Unhealthy,
            State::Healthy,
            State::Unhealthy,
            State::Healthy,
        ],
        State::Healthy,
    );
    let actioner = RecordingActioner::slow(Duration::from_millis(250));
    let (probes, actions) = test_registries(&probe, &actioner);
    let engine = Engine::new(probes, actions);

    let checker = checker_config(Duration::from_millis(100), ZERO_RETRY, ZERO_RETRY);
    engine.add_target(key("192.0.2.20"), checker, action_config(Duration::ZERO)).await.unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(actioner.applied.lock().len() >= 2);
    assert_eq!(actioner.max_in_flight.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn graceful_shutdown_abandons_in_flight_probes() {
    let probe = ScriptedProbe::slow(Duration::from_secs(5), State::Healthy);
    let actioner = RecordingActioner::new();
    let (probes, actions) = test_registries(&probe, &actioner);
    let engine = Engine::new(probes, actions);

    let mut checker = checker_config(Duration::from_secs(1), 1, 1);
    checker.timeout = Duration::from_secs(10);
    for i in 0..1000u32 {
        let target = key(&format!("10.{}.{}.1-TCP-80", i / 250, i % 250));
        engine.add_target(target, checker.clone(), action_config(Duration::ZERO)).await.unwrap();
    }

    // Let every target start its first probe; each then sleeps well past the
    // shutdown grace.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let in_flight = probe.check_count();
    assert_eq!(in_flight, 1000);

    let begun = tokio::time::Instant::now();
    engine.shutdown(Duration::from_secs(2)).await;
    assert!(begun.elapsed() <= Duration::from_secs(2));

    // Nothing new starts after shutdown.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(probe.check_count(), in_flight);

    assert!(matches!(
        engine
            .add_target(key("10.9.9.9-TCP-80"), checker.clone(), action_config(Duration::ZERO))
            .await,
        Err(Error::EngineShuttingDown)
    ));
    assert!(matches!(
        engine.remove_target(key("10.0.0.1-TCP-80")).await,
        Err(Error::EngineShuttingDown)
    ));
}

#[tokio::test(start_paused = true)]
async fn state_readout_is_ordered_and_counted() {
    let probe = ScriptedProbe::new(&[], State::Unhealthy);
    let healthy_probe = ScriptedProbe::default();
    let actioner = RecordingActioner::new();
    let (probes, actions) = test_registries(&probe, &actioner);
    let probes = probes.register(ProbeKind::Http, Box::new(healthy_probe));
    let engine = Engine::new(probes, actions);

    let unhealthy_cfg = checker_config(Duration::from_secs(1), 1, 1);
    let mut healthy_cfg = checker_config(Duration::from_secs(1), 1, 1);
    healthy_cfg.kind = ProbeKind::Http;

    engine
        .add_target(key("10.0.0.7-TCP-80"), unhealthy_cfg, action_config(Duration::ZERO))
        .await
        .unwrap();
    engine
        .add_target(key("10.0.0.6-TCP-80"), healthy_cfg.clone(), action_config(Duration::ZERO))
        .await
        .unwrap();
    engine.add_target(key("10.0.0.8"), healthy_cfg, action_config(Duration::ZERO)).await.unwrap();

    tokio::time::sleep(Duration::from_secs(3)).await;

    let rows = engine.list_states();
    let keys: Vec<String> = rows.iter().map(|row| row.key.to_string()).collect();
    assert_eq!(keys, vec!["10.0.0.6-TCP-80", "10.0.0.7-TCP-80", "10.0.0.8"]);

    let stats = engine.stats();
    assert_eq!(stats.targets, 3);
    assert_eq!(stats.healthy, 2);
    assert_eq!(stats.unhealthy, 1);

    let down = rows.iter().find(|row| row.key == key("10.0.0.7-TCP-80")).unwrap();
    assert_eq!(down.confirmed, State::Unhealthy);
    assert_eq!(down.last_verdict, State::Unhealthy);
    assert!(down.last_action.is_some());
}
