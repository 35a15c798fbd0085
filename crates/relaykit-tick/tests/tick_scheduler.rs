//! Tick scheduler tests. Time is paused, so `sleep_until` resolves as soon
//! as the runtime has nothing else to do.

use std::time::Duration;

use relaykit_tick::{TickConfig, TickPolicy, TickScheduler};

fn no_jitter(rate_hz: u32) -> TickConfig {
    TickConfig {
        initial_jitter_ms: 0,
        ..TickConfig::with_rate(rate_hz)
    }
}

#[test]
fn test_default_rate_and_interval() {
    let cfg = TickConfig::default();
    assert_eq!(cfg.rate_hz, 30);
    assert_eq!(TickConfig::with_rate(20).interval(), Duration::from_millis(50));
}

#[test]
fn test_out_of_range_rates_are_clamped() {
    assert_eq!(TickConfig::with_rate(0).validated().rate_hz, 1);
    assert_eq!(TickConfig::with_rate(1000).validated().rate_hz, TickConfig::MAX_RATE_HZ);
    let s = TickScheduler::with_rate(0);
    assert_eq!(s.interval(), Duration::from_secs(1));
}

#[test]
fn test_config_from_json_fills_defaults() {
    let cfg: TickConfig =
        serde_json::from_str(r#"{"rate_hz":10,"policy":{"kind":"catch_up","max_catchup":2}}"#)
            .unwrap();
    assert_eq!(cfg.rate_hz, 10);
    assert_eq!(cfg.policy, TickPolicy::CatchUp { max_catchup: 2 });
    assert_eq!(cfg.initial_jitter_ms, TickConfig::default().initial_jitter_ms);
}

#[tokio::test(start_paused = true)]
async fn test_ticks_fire_in_order_with_fixed_dt() {
    let mut s = TickScheduler::new(no_jitter(20));
    for expected in 1..=4 {
        let info = s.wait_for_tick().await;
        assert_eq!(info.tick, expected);
        assert_eq!(info.dt, Duration::from_millis(50));
        assert!(!info.late);
    }
    assert_eq!(s.metrics().ticks, 4);
}

#[tokio::test(start_paused = true)]
async fn test_skip_policy_reports_missed_ticks() {
    let mut s = TickScheduler::new(no_jitter(20));
    s.wait_for_tick().await;
    // Stall for four intervals without yielding to the scheduler.
    tokio::time::advance(Duration::from_millis(210)).await;
    let info = s.wait_for_tick().await;
    assert!(info.late);
    assert_eq!(info.skipped, 3);
    assert_eq!(s.metrics().skipped, 3);
}

#[tokio::test(start_paused = true)]
async fn test_paused_scheduler_pends() {
    let mut s = TickScheduler::new(no_jitter(20));
    s.wait_for_tick().await;
    s.pause();
    let result = tokio::time::timeout(Duration::from_secs(1), s.wait_for_tick()).await;
    assert!(result.is_err());

    s.resume();
    assert_eq!(s.wait_for_tick().await.tick, 2);
}

#[tokio::test(start_paused = true)]
async fn test_record_tick_end_tracks_work() {
    let mut s = TickScheduler::new(no_jitter(20));
    s.record_tick_end();
    assert_eq!(s.metrics().max_work, Duration::ZERO);

    s.wait_for_tick().await;
    std::thread::sleep(Duration::from_micros(50));
    s.record_tick_end();
    assert!(s.metrics().max_work > Duration::ZERO);
    assert!(s.metrics().utilization > 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_select_loop_stops_on_command() {
    let mut s = TickScheduler::new(no_jitter(20));
    let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(1);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(160)).await;
        let _ = tx.send(()).await;
    });

    let mut fired = 0;
    loop {
        tokio::select! {
            Some(()) = rx.recv() => break,
            info = s.wait_for_tick() => {
                fired += 1;
                assert_eq!(info.tick, fired);
                s.record_tick_end();
            }
        }
    }
    assert!(fired >= 3, "expected at least 3 ticks, got {fired}");
}
