//! Periodic scheduling for driftmesh.
//!
//! Two small pieces of timing machinery:
//!
//! - [`TickScheduler`]: a fixed-cadence tick for health checks. It sits in
//!   the peer actor's `tokio::select!` loop and fires at most once per
//!   interval, skipping ticks it missed rather than bursting.
//! - [`Throttle`]: a synchronous rate limiter for outbound position
//!   updates, driven by explicit `Instant`s so it can live inside the
//!   sans-IO core.
//!
//! # Integration
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         Some(cmd) = cmd_rx.recv() => { /* handle commands */ }
//!         tick = health.wait_for_tick() => {
//!             session.health_check(tick_instant);
//!         }
//!     }
//! }
//! ```

use std::time::{Duration, Instant};

use rand::Rng;
use tokio::time::{self, Instant as TokioInstant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for the tick scheduler.
#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Time between ticks. `None` disables the scheduler (it never fires).
    pub interval: Option<Duration>,
    /// Random jitter (0–max) added to the *first* tick so that many peers
    /// started together do not poll in lockstep.
    pub initial_jitter: Duration,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            interval: Some(Duration::from_secs(1)),
            initial_jitter: Duration::from_millis(100),
        }
    }
}

impl TickConfig {
    /// Shortest allowed interval. Health checks poll shared state and
    /// must not run hotter than this.
    pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

    /// A config ticking every `interval`, with default jitter.
    pub fn every(interval: Duration) -> Self {
        Self {
            interval: Some(interval),
            ..Default::default()
        }
    }

    /// A config that never ticks.
    pub fn disabled() -> Self {
        Self {
            interval: None,
            ..Default::default()
        }
    }

    /// Raises a too-short interval to [`Self::MIN_INTERVAL`].
    ///
    /// Called automatically by [`TickScheduler::new`].
    pub fn validated(mut self) -> Self {
        if let Some(interval) = self.interval {
            if interval < Self::MIN_INTERVAL {
                warn!(
                    interval_ms = interval.as_millis() as u64,
                    min_ms = Self::MIN_INTERVAL.as_millis() as u64,
                    "tick interval below minimum, clamping"
                );
                self.interval = Some(Self::MIN_INTERVAL);
            }
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Tick info (returned to caller each tick)
// ---------------------------------------------------------------------------

/// Information about a fired tick, returned by [`TickScheduler::wait_for_tick`].
#[derive(Debug, Clone)]
pub struct TickInfo {
    /// Monotonically increasing tick number (starts at 1).
    pub tick: u64,
    /// When the tick fired.
    pub at: Instant,
    /// How many whole intervals were missed before this tick (0 in normal
    /// operation).
    pub ticks_skipped: u64,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Fixed-cadence tick scheduler.
pub struct TickScheduler {
    interval: Option<Duration>,
    tick_count: u64,
    /// When the next tick should fire (Tokio instant for `sleep_until`).
    next_tick: Option<TokioInstant>,
    paused: bool,
    total_skipped: u64,
}

impl TickScheduler {
    /// Creates a scheduler. The first tick is one interval plus jitter
    /// from now.
    pub fn new(config: TickConfig) -> Self {
        let config = config.validated();

        let next_tick = config.interval.map(|interval| {
            let jitter_us = config.initial_jitter.as_micros() as u64;
            let jitter = if jitter_us > 0 {
                Duration::from_micros(rand::rng().random_range(0..jitter_us))
            } else {
                Duration::ZERO
            };
            TokioInstant::now() + interval + jitter
        });

        match config.interval {
            Some(interval) => debug!(interval_ms = interval.as_millis() as u64, "tick scheduler created"),
            None => debug!("tick scheduler created disabled"),
        }

        Self {
            interval: config.interval,
            tick_count: 0,
            next_tick,
            paused: false,
            total_skipped: 0,
        }
    }

    /// Waits until the next tick is due.
    ///
    /// When disabled or paused this future pends forever; `tokio::select!`
    /// still services its other branches.
    pub async fn wait_for_tick(&mut self) -> TickInfo {
        let (next, interval) = match (self.next_tick, self.interval) {
            (Some(next), Some(interval)) if !self.paused => (next, interval),
            _ => std::future::pending().await,
        };

        time::sleep_until(next).await;

        let now = TokioInstant::now();
        self.tick_count += 1;

        let late_by = now.saturating_duration_since(next);
        let ticks_skipped = (late_by.as_nanos() / interval.as_nanos()) as u64;
        if ticks_skipped > 0 {
            warn!(tick = self.tick_count, skipped = ticks_skipped, "tick overrun, skipping ahead");
        }
        self.total_skipped += ticks_skipped;
        // Schedule from now, not from the missed deadline.
        self.next_tick = Some(now + interval);

        trace!(tick = self.tick_count, "tick fired");

        TickInfo {
            tick: self.tick_count,
            at: now.into_std(),
            ticks_skipped,
        }
    }

    /// Pauses the scheduler. Safe to call multiple times.
    pub fn pause(&mut self) {
        if !self.paused {
            self.paused = true;
            debug!(tick = self.tick_count, "tick scheduler paused");
        }
    }

    /// Resumes after a pause. The next tick is one interval from now, so
    /// time spent paused does not produce a burst.
    pub fn resume(&mut self) {
        if self.paused {
            self.paused = false;
            if let Some(interval) = self.interval {
                self.next_tick = Some(TokioInstant::now() + interval);
            }
            debug!(tick = self.tick_count, "tick scheduler resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Whether the scheduler never fires.
    pub fn is_disabled(&self) -> bool {
        self.interval.is_none()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Ticks skipped over the scheduler's lifetime.
    pub fn total_skipped(&self) -> u64 {
        self.total_skipped
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }
}

// ---------------------------------------------------------------------------
// Throttle
// ---------------------------------------------------------------------------

/// Lets an action through at most once per interval.
///
/// ```rust
/// use std::time::{Duration, Instant};
/// use driftmesh_tick::Throttle;
///
/// let mut throttle = Throttle::per_second(10);
/// let t0 = Instant::now();
/// assert!(throttle.ready(t0));
/// assert!(!throttle.ready(t0 + Duration::from_millis(50)));
/// assert!(throttle.ready(t0 + Duration::from_millis(100)));
/// ```
#[derive(Debug, Clone)]
pub struct Throttle {
    interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// A throttle allowing `rate_hz` actions per second. A rate of 0 is
    /// treated as 1.
    pub fn per_second(rate_hz: u32) -> Self {
        Self::new(Duration::from_secs(1) / rate_hz.max(1))
    }

    /// Returns `true` and starts a new interval if the previous one has
    /// elapsed.
    pub fn ready(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    /// When the next action would be let through, or `None` if it would
    /// be let through right away.
    pub fn next_ready(&self) -> Option<Instant> {
        self.last.map(|last| last + self.interval)
    }

    /// Forgets the last action.
    pub fn reset(&mut self) {
        self.last = None;
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}
