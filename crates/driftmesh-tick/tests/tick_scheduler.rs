//! Integration tests for the tick scheduler and throttle.
//!
//! Scheduler tests use `start_paused = true` so Tokio auto-advances time:
//! `sleep_until` resolves instantly when nothing else is runnable.

use std::time::{Duration, Instant};

use driftmesh_tick::{Throttle, TickConfig, TickScheduler};

// =========================================================================
// Helpers
// =========================================================================

fn every_second() -> TickConfig {
    TickConfig {
        initial_jitter: Duration::ZERO,
        ..TickConfig::every(Duration::from_secs(1))
    }
}

// =========================================================================
// TickConfig
// =========================================================================

#[test]
fn test_default_config_ticks_every_second() {
    let cfg = TickConfig::default();
    assert_eq!(cfg.interval, Some(Duration::from_secs(1)));
}

#[test]
fn test_validated_clamps_short_interval() {
    let cfg = TickConfig::every(Duration::from_millis(10)).validated();
    assert_eq!(cfg.interval, Some(TickConfig::MIN_INTERVAL));
}

#[test]
fn test_validated_keeps_long_interval() {
    let cfg = TickConfig::every(Duration::from_secs(5)).validated();
    assert_eq!(cfg.interval, Some(Duration::from_secs(5)));
}

// =========================================================================
// Scheduler
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_wait_for_tick_fires_and_increments() {
    let mut s = TickScheduler::new(every_second());

    let info = s.wait_for_tick().await;

    assert_eq!(info.tick, 1);
    assert_eq!(info.ticks_skipped, 0);
    assert_eq!(s.tick_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_ticks_are_one_interval_apart() {
    let mut s = TickScheduler::new(every_second());

    let first = s.wait_for_tick().await;
    let second = s.wait_for_tick().await;

    assert_eq!(second.at - first.at, Duration::from_secs(1));
    assert_eq!(second.tick, 2);
}

#[tokio::test(start_paused = true)]
async fn test_disabled_never_fires() {
    let mut s = TickScheduler::new(TickConfig::disabled());
    assert!(s.is_disabled());

    let result = tokio::time::timeout(Duration::from_secs(60), s.wait_for_tick()).await;
    assert!(result.is_err(), "disabled scheduler should pend forever");
}

#[tokio::test(start_paused = true)]
async fn test_pause_prevents_ticks() {
    let mut s = TickScheduler::new(every_second());
    s.wait_for_tick().await;

    s.pause();

    let result = tokio::time::timeout(Duration::from_secs(10), s.wait_for_tick()).await;
    assert!(result.is_err(), "paused scheduler should pend");
}

#[tokio::test(start_paused = true)]
async fn test_resume_allows_ticks_again() {
    let mut s = TickScheduler::new(every_second());
    s.wait_for_tick().await;
    s.pause();
    s.resume();
    assert!(!s.is_paused());

    let info = s.wait_for_tick().await;
    assert_eq!(info.tick, 2);
}

#[tokio::test(start_paused = true)]
async fn test_late_wakeup_skips_instead_of_bursting() {
    let mut s = TickScheduler::new(every_second());
    s.wait_for_tick().await;

    // Stall for several intervals without polling the scheduler.
    tokio::time::advance(Duration::from_millis(3_500)).await;

    let info = s.wait_for_tick().await;
    assert_eq!(info.tick, 2);
    assert_eq!(info.ticks_skipped, 2);
    assert_eq!(s.total_skipped(), 2);
}

#[tokio::test]
async fn test_pause_resume_idempotent() {
    let mut s = TickScheduler::new(every_second());
    s.pause();
    s.pause();
    assert!(s.is_paused());
    s.resume();
    s.resume();
    assert!(!s.is_paused());
}

// =========================================================================
// Throttle
// =========================================================================

#[test]
fn test_throttle_first_action_passes() {
    let mut t = Throttle::per_second(10);
    assert!(t.ready(Instant::now()));
}

#[test]
fn test_throttle_blocks_within_interval() {
    let mut t = Throttle::per_second(10);
    let t0 = Instant::now();
    assert!(t.ready(t0));
    assert!(!t.ready(t0 + Duration::from_millis(99)));
    assert!(t.ready(t0 + Duration::from_millis(100)));
}

#[test]
fn test_throttle_zero_rate_is_one_per_second() {
    let t = Throttle::per_second(0);
    assert_eq!(t.interval(), Duration::from_secs(1));
}

#[test]
fn test_throttle_reset_lets_next_action_through() {
    let mut t = Throttle::per_second(1);
    let t0 = Instant::now();
    t.ready(t0);
    t.reset();
    assert!(t.ready(t0));
    assert_eq!(t.next_ready(), Some(t0 + Duration::from_secs(1)));
}
