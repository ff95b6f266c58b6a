use super::*;
use crate::{
    diagnostics::FailureCategory,
    fingerprint::MemoryKvStore,
    network::mock::{MockConnect, MockDriver},
};

const TICK_MS: u64 = 500;

type Engine = ConnectionEngine<MockDriver, MemoryKvStore>;

fn home() -> (NetworkIdentity, Credentials) {
    (
        NetworkIdentity::new("HomeNet").unwrap(),
        Credentials::new("surf123456").unwrap(),
    )
}

fn engine_with(driver: MockDriver, kv: MemoryKvStore) -> Engine {
    ConnectionEngine::new(
        driver,
        FingerprintStore::new(kv),
        EngineConfig::default(),
        Some(home()),
    )
}

fn home_neighbourhood(driver: &mut MockDriver) {
    driver.set_visible(&[("HomeNet", -40), ("N1", -50), ("N2", -60), ("N3", -70)]);
}

/// Ticks every [`TICK_MS`] until `done` holds or `limit_ms` passes. Returns
/// how many ticks asked for the configuration portal.
fn run_until(
    engine: &mut Engine,
    now: &mut u64,
    limit_ms: u64,
    mut done: impl FnMut(&Engine) -> bool,
) -> usize {
    let end = *now + limit_ms;
    let mut portal_requests = 0;
    while *now <= end {
        if engine.tick(*now) == TickResult::ConfigPortalRequested {
            portal_requests += 1;
        }
        if done(engine) {
            return portal_requests;
        }
        *now += TICK_MS;
    }
    panic!(
        "condition not reached; state={:?} status={:?}",
        engine.state(),
        engine.current_status()
    );
}

fn connected_and_refreshed(engine: &Engine) -> bool {
    matches!(
        engine.state(),
        EngineState::Connected {
            refreshing: false,
            ..
        }
    )
}

fn in_portal(engine: &Engine) -> bool {
    engine.current_status() == ConnectivityStatus::ConfigPortalRequired
}

#[test]
fn first_boot_unreachable_target_ends_in_portal_when_the_budget_runs_out() {
    let mut driver = MockDriver::new();
    driver.set_default_connect(MockConnect::Fail(FailureReason::NotFound));
    let mut engine = engine_with(driver, MemoryKvStore::new());
    let mut now = 0;

    let portal_requests = run_until(&mut engine, &mut now, 20 * 60 * 1_000, in_portal);

    assert_eq!(portal_requests, 1);
    // Backoff 5+10+20+40+60+60+60s leaves the ninth failure past the window.
    assert_eq!(engine.driver().connect_calls(), 9);
    assert_eq!(
        engine.state(),
        EngineState::ConfigPortal {
            reason: PortalReason::BudgetExhausted
        }
    );
    assert_eq!(engine.retry_state().failures(), 0);
    assert_eq!(
        engine.last_failure_reason(),
        Some(FailureCause::NoNetworksVisible.message())
    );
}

#[test]
fn failure_streak_stays_within_the_retry_window() {
    let mut driver = MockDriver::new();
    driver.set_default_connect(MockConnect::Fail(FailureReason::Timeout));
    let mut engine = engine_with(driver, MemoryKvStore::new());
    let mut now = 0;

    run_until(&mut engine, &mut now, 20 * 60 * 1_000, in_portal);

    // Unclipped backoff alone would add up to 375s.
    assert!(now < 340_000, "streak took {now}ms");
}

#[test]
fn hanging_attempts_cannot_stretch_the_streak() {
    let mut driver = MockDriver::new();
    driver.set_default_connect(MockConnect::Hang);
    let mut engine = engine_with(driver, MemoryKvStore::new());
    let mut now = 0;

    let portal_requests = run_until(&mut engine, &mut now, 20 * 60 * 1_000, in_portal);

    // First timeout at 20s, then a 300s window plus one base timeout.
    assert_eq!(portal_requests, 1);
    assert!(now < 350_000, "streak took {now}ms");
    assert!(engine.driver().connect_calls() < 10);
    assert_eq!(
        engine.state(),
        EngineState::ConfigPortal {
            reason: PortalReason::BudgetExhausted
        }
    );
}

#[test]
fn attempt_deadline_is_clipped_to_the_streak_window() {
    let mut driver = MockDriver::new();
    driver.set_default_connect(MockConnect::Hang);
    let mut engine = engine_with(driver, MemoryKvStore::new());
    let mut now = 0;

    // The window opens at the first timeout (20s) and closes at 320s.
    let mut deadlines = std::vec::Vec::new();
    run_until(&mut engine, &mut now, 20 * 60 * 1_000, |engine| {
        if let EngineState::Connecting {
            started_ms,
            deadline_ms,
        } = engine.state()
            && deadlines.last() != Some(&(started_ms, deadline_ms))
        {
            deadlines.push((started_ms, deadline_ms));
        }
        in_portal(engine)
    });

    let window_end = 20_000 + engine.config().retry.streak_window_ms;
    assert!(deadlines.len() > 2);
    for &(started, deadline) in &deadlines[1..] {
        assert!(deadline - started >= 20_000);
        assert!(deadline <= window_end.max(started + 20_000));
    }
}

#[test]
fn relocation_skips_the_retry_budget() {
    let mut driver = MockDriver::new();
    home_neighbourhood(&mut driver);
    let mut engine = engine_with(driver, MemoryKvStore::new());
    let mut now = 0;

    run_until(&mut engine, &mut now, 10_000, connected_and_refreshed);
    let entries: std::vec::Vec<&str> = engine.fingerprint().iter().collect();
    assert_eq!(entries, ["N1", "N2", "N3"]);

    // Power cycle at a new address.
    let (_, store) = engine.into_parts();
    let mut moved = MockDriver::new();
    moved.set_default_connect(MockConnect::Fail(FailureReason::NotFound));
    moved.set_visible(&[("Far1", -50), ("Far2", -60), ("Far3", -65)]);
    let mut engine = engine_with(moved, store.into_inner());
    assert_eq!(engine.fingerprint().len(), 3);

    let portal_requests = run_until(&mut engine, &mut now, 10_000, in_portal);

    assert_eq!(portal_requests, 1);
    assert_eq!(engine.driver().connect_calls(), 1);
    assert_eq!(engine.last_failure(), Some(FailureCause::NewLocation));
    assert_eq!(
        engine.last_failure().map(FailureCause::category),
        Some(FailureCategory::Environment)
    );
}

#[test]
fn link_loss_at_a_new_location_uses_the_same_path() {
    let mut driver = MockDriver::new();
    home_neighbourhood(&mut driver);
    let mut engine = engine_with(driver, MemoryKvStore::new());
    let mut now = 0;
    run_until(&mut engine, &mut now, 10_000, connected_and_refreshed);

    let driver = engine.driver_mut();
    driver.set_visible(&[("Far1", -50)]);
    driver.set_default_connect(MockConnect::Fail(FailureReason::NotFound));
    driver.drop_link(FailureReason::LinkLost);

    run_until(&mut engine, &mut now, 10_000, in_portal);
    assert_eq!(engine.driver().connect_calls(), 1);
    assert_eq!(
        engine.state(),
        EngineState::ConfigPortal {
            reason: PortalReason::Relocated
        }
    );
}

#[test]
fn new_credentials_after_relocation_get_a_full_budget() {
    let mut driver = MockDriver::new();
    home_neighbourhood(&mut driver);
    let mut engine = engine_with(driver, MemoryKvStore::new());
    let mut now = 0;
    run_until(&mut engine, &mut now, 10_000, connected_and_refreshed);

    let driver = engine.driver_mut();
    driver.set_visible(&[("Hotel", -45), ("H2", -60)]);
    driver.set_default_connect(MockConnect::Fail(FailureReason::NotFound));
    driver.drop_link(FailureReason::LinkLost);
    run_until(&mut engine, &mut now, 10_000, in_portal);
    assert_eq!(
        engine.state(),
        EngineState::ConfigPortal {
            reason: PortalReason::Relocated
        }
    );

    let driver = engine.driver_mut();
    driver.set_default_connect(MockConnect::Succeed);
    assert!(driver.push_connect(MockConnect::Fail(FailureReason::Timeout)));
    engine.credentials_updated(
        NetworkIdentity::new("Hotel").unwrap(),
        Credentials::new("welcome123").unwrap(),
    );

    let portal_requests = run_until(&mut engine, &mut now, 10_000, |engine| {
        matches!(engine.state(), EngineState::Retrying { .. })
    });
    assert_eq!(portal_requests, 0);
    assert!(engine.fingerprint().is_empty());
    assert_eq!(engine.retry_state().failures(), 1);
    assert_eq!(engine.driver().connect_calls(), 2);

    run_until(&mut engine, &mut now, 60_000, connected_and_refreshed);
    let entries: std::vec::Vec<&str> = engine.fingerprint().iter().collect();
    assert_eq!(entries, ["H2"]);
}

#[test]
fn router_reboot_recovers_and_flags_reconnection() {
    let mut driver = MockDriver::new();
    home_neighbourhood(&mut driver);
    let mut engine = engine_with(driver, MemoryKvStore::new());
    let mut now = 0;
    run_until(&mut engine, &mut now, 10_000, connected_and_refreshed);
    assert!(!engine.take_reconnected());

    let driver = engine.driver_mut();
    for _ in 0..3 {
        assert!(driver.push_connect(MockConnect::Fail(FailureReason::Timeout)));
    }
    driver.drop_link(FailureReason::LinkLost);

    run_until(&mut engine, &mut now, 60_000, |engine| {
        engine.current_status() == ConnectivityStatus::WiFiError
    });
    assert_eq!(
        engine.last_failure_reason(),
        Some(FailureCause::SignalLost.message())
    );

    run_until(&mut engine, &mut now, 10 * 60 * 1_000, connected_and_refreshed);
    assert_eq!(engine.current_status(), ConnectivityStatus::ConnectedFresh);
    assert_eq!(engine.driver().connect_calls(), 5);
    assert_eq!(engine.retry_state().failures(), 0);
    assert_eq!(engine.last_failure_reason(), None);
    assert!(engine.take_reconnected());
    assert!(!engine.take_reconnected());
}

#[test]
fn ticks_without_events_are_idempotent() {
    let mut driver = MockDriver::new();
    driver.set_default_connect(MockConnect::Hang);
    let mut engine = engine_with(driver, MemoryKvStore::new());

    assert_eq!(
        engine.tick(0),
        TickResult::Unchanged,
        "first attempt keeps the initial connecting status"
    );
    let state = engine.state();
    for now in [0, 100, 1_000, 19_999] {
        assert_eq!(engine.tick(now), TickResult::Unchanged);
        assert_eq!(engine.state(), state);
        assert_eq!(engine.current_status(), ConnectivityStatus::Connecting);
    }
    assert_eq!(engine.driver().connect_calls(), 1);
}

#[test]
fn retry_delay_is_not_shortened_by_extra_ticks() {
    let mut driver = MockDriver::new();
    driver.set_default_connect(MockConnect::Fail(FailureReason::AuthRejected));
    driver.set_visible(&[("HomeNet", -50)]);
    let mut engine = engine_with(driver, MemoryKvStore::new());
    let mut now = 0;

    run_until(&mut engine, &mut now, 10_000, |engine| {
        matches!(engine.state(), EngineState::Retrying { .. })
    });
    let EngineState::Retrying { due_ms } = engine.state() else {
        unreachable!();
    };
    assert_eq!(due_ms, now + 5_000);

    for _ in 0..5 {
        engine.tick(due_ms - 1);
    }
    assert_eq!(engine.state(), EngineState::Retrying { due_ms });
    assert_eq!(engine.current_status(), ConnectivityStatus::WiFiError);
    assert_eq!(engine.driver().connect_calls(), 1);

    engine.tick(due_ms);
    assert!(matches!(engine.state(), EngineState::Connecting { .. }));
    assert_eq!(engine.current_status(), ConnectivityStatus::WiFiError);
    assert_eq!(
        engine.last_failure().map(FailureCause::category),
        Some(FailureCategory::Credential)
    );
}

#[test]
fn hung_attempt_times_out() {
    let mut driver = MockDriver::new();
    driver.set_default_connect(MockConnect::Hang);
    let mut engine = engine_with(driver, MemoryKvStore::new());

    engine.tick(0);
    engine.tick(20_000);

    assert_eq!(
        engine.state(),
        EngineState::Failed {
            reason: FailureReason::Timeout,
            scan: ScanStage::NotStarted
        }
    );
    assert_eq!(engine.driver().disconnect_calls(), 1);
    assert_eq!(
        engine.last_attempt().map(|attempt| attempt.outcome),
        Some(AttemptOutcome::Failure(FailureReason::Timeout))
    );
}

#[test]
fn weak_signal_and_missing_network_are_reported_differently() {
    let mut weak = MockDriver::new();
    weak.set_default_connect(MockConnect::Fail(FailureReason::Timeout));
    weak.set_visible(&[("HomeNet", -92), ("N1", -50)]);
    let mut engine = engine_with(weak, MemoryKvStore::new());
    let mut now = 0;
    run_until(&mut engine, &mut now, 10_000, |engine| {
        matches!(engine.state(), EngineState::Retrying { .. })
    });
    assert_eq!(
        engine.last_failure(),
        Some(FailureCause::WeakSignal { rssi_dbm: -92 })
    );

    let mut missing = MockDriver::new();
    missing.set_default_connect(MockConnect::Fail(FailureReason::Timeout));
    missing.set_visible(&[("N1", -50)]);
    let mut engine = engine_with(missing, MemoryKvStore::new());
    let mut now = 0;
    run_until(&mut engine, &mut now, 10_000, |engine| {
        matches!(engine.state(), EngineState::Retrying { .. })
    });
    assert_eq!(engine.last_failure(), Some(FailureCause::NetworkNotFound));
}

#[test]
fn failed_scan_never_forces_reconfiguration() {
    let mut driver = MockDriver::new();
    home_neighbourhood(&mut driver);
    let mut engine = engine_with(driver, MemoryKvStore::new());
    let mut now = 0;
    run_until(&mut engine, &mut now, 10_000, connected_and_refreshed);

    let driver = engine.driver_mut();
    driver.fail_scans();
    driver.set_default_connect(MockConnect::Fail(FailureReason::NotFound));
    driver.drop_link(FailureReason::LinkLost);

    run_until(&mut engine, &mut now, 10_000, |engine| {
        matches!(engine.state(), EngineState::Retrying { .. })
    });
    assert_eq!(engine.retry_state().failures(), 1);
    assert_eq!(engine.fingerprint().len(), 3);
}

#[test]
fn new_credentials_interrupt_a_retry_cycle() {
    let mut driver = MockDriver::new();
    driver.set_default_connect(MockConnect::Fail(FailureReason::AuthRejected));
    let mut engine = engine_with(driver, MemoryKvStore::new());
    let mut now = 0;
    run_until(&mut engine, &mut now, 60_000, |engine| {
        engine.retry_state().failures() == 2
            && matches!(engine.state(), EngineState::Retrying { .. })
    });

    engine.driver_mut().set_default_connect(MockConnect::Succeed);
    engine.credentials_updated(
        NetworkIdentity::new("Office").unwrap(),
        Credentials::new("hunter22").unwrap(),
    );
    assert_eq!(
        engine.tick(now),
        TickResult::StatusChanged(ConnectivityStatus::Connecting)
    );

    assert!(matches!(engine.state(), EngineState::Connecting { .. }));
    assert_eq!(engine.retry_state().failures(), 0);
    assert_eq!(engine.last_failure_reason(), None);
    assert_eq!(engine.target().map(NetworkIdentity::ssid), Some("Office"));
    assert_eq!(
        engine.driver().last_target().map(NetworkIdentity::ssid),
        Some("Office")
    );
}

#[test]
fn first_setup_waits_in_portal_until_credentials_arrive() {
    let mut driver = MockDriver::new();
    home_neighbourhood(&mut driver);
    let mut engine = ConnectionEngine::new(
        driver,
        FingerprintStore::new(MemoryKvStore::new()),
        EngineConfig::default(),
        None,
    );

    assert_eq!(engine.tick(0), TickResult::ConfigPortalRequested);
    assert_eq!(
        engine.state(),
        EngineState::ConfigPortal {
            reason: PortalReason::Unconfigured
        }
    );
    for now in [500, 1_000, 60_000] {
        assert_eq!(engine.tick(now), TickResult::Unchanged);
    }
    assert_eq!(engine.driver().connect_calls(), 0);

    let (identity, credentials) = home();
    engine.credentials_updated(identity, credentials);
    let mut now = 60_500;
    run_until(&mut engine, &mut now, 10_000, connected_and_refreshed);
    assert_eq!(engine.current_status(), ConnectivityStatus::ConnectedFresh);
    assert_eq!(engine.fingerprint().len(), 3);
}

#[test]
fn factory_reset_clears_fingerprint_and_credentials() {
    let mut driver = MockDriver::new();
    home_neighbourhood(&mut driver);
    let mut engine = engine_with(driver, MemoryKvStore::new());
    let mut now = 0;
    run_until(&mut engine, &mut now, 10_000, connected_and_refreshed);
    assert!(!engine.store().backend().is_empty());

    engine.factory_reset();
    now += TICK_MS;
    assert_eq!(engine.tick(now), TickResult::ConfigPortalRequested);

    assert!(engine.fingerprint().is_empty());
    assert!(engine.target().is_none());
    assert!(engine.store().backend().is_empty());
    assert!(engine.driver().disconnect_calls() >= 1);
}

#[test]
fn storage_failure_does_not_block_connectivity() {
    let mut driver = MockDriver::new();
    home_neighbourhood(&mut driver);
    let mut kv = MemoryKvStore::new();
    kv.fail_writes_after(0);
    let mut engine = engine_with(driver, kv);
    let mut now = 0;

    run_until(&mut engine, &mut now, 10_000, connected_and_refreshed);

    assert_eq!(engine.current_status(), ConnectivityStatus::ConnectedFresh);
    assert_eq!(engine.fingerprint().len(), 3);
    assert!(engine.store().backend().is_empty());
}

#[test]
fn slow_driver_is_polled_not_awaited() {
    let mut driver = MockDriver::new().with_pending_polls(6);
    home_neighbourhood(&mut driver);
    let mut engine = engine_with(driver, MemoryKvStore::new());

    for tick in 0..=6 {
        engine.tick(tick * TICK_MS);
        assert!(matches!(engine.state(), EngineState::Connecting { .. }));
    }
    engine.tick(7 * TICK_MS);
    assert_eq!(engine.current_status(), ConnectivityStatus::ConnectedFresh);
}

#[test]
fn connect_timeout_grows_with_the_streak() {
    let config = EngineConfig::default();
    assert_eq!(config.connect_timeout_for(0), 20_000);
    assert_eq!(config.connect_timeout_for(1), 40_000);
    assert_eq!(config.connect_timeout_for(2), 60_000);
    assert_eq!(config.connect_timeout_for(9), 60_000);
}
