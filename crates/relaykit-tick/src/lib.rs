//! Fixed-rate tick scheduler for Relaykit rooms.
//!
//! A room does no work between ticks: transport events pile up in its
//! input queue and each tick drains a bounded snapshot of that queue, then
//! flushes the batched outboxes. The scheduler only decides *when* a tick
//! fires and keeps an eye on how long the drain took.
//!
//! `relaykit_room::run_room` drives a room with one scheduler like this:
//!
//! ```rust,no_run
//! use relaykit_tick::{TickConfig, TickScheduler};
//!
//! # async fn run(mut tick_room: impl FnMut() -> bool) {
//! let mut scheduler = TickScheduler::new(TickConfig::with_rate(30));
//! loop {
//!     scheduler.wait_for_tick().await;
//!     // `Room::tick` drains the events queued so far and flushes.
//!     let open = tick_room();
//!     scheduler.record_tick_end();
//!     if !open {
//!         break;
//!     }
//! }
//! # }
//! ```

use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::{self, Instant as TokioInstant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What to do when the room falls behind its tick schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TickPolicy {
    /// Forget the missed ticks and schedule from now.
    #[default]
    Skip,
    /// Fire up to `max_catchup` late ticks back to back, then skip the rest.
    CatchUp { max_catchup: u32 },
}

/// Tick settings, usually embedded in a room's config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TickConfig {
    /// Ticks per second, between 1 and [`TickConfig::MAX_RATE_HZ`].
    pub rate_hz: u32,
    pub policy: TickPolicy,
    /// Fraction of the tick interval a drain may use before a warning.
    pub budget_warn: f64,
    /// Upper bound of the random delay before the first tick, so rooms
    /// created together do not tick in lockstep.
    pub initial_jitter_ms: u64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            rate_hz: 30,
            policy: TickPolicy::Skip,
            budget_warn: 0.8,
            initial_jitter_ms: 2,
        }
    }
}

impl TickConfig {
    pub const MAX_RATE_HZ: u32 = 128;

    pub fn with_rate(rate_hz: u32) -> Self {
        Self {
            rate_hz,
            ..Self::default()
        }
    }

    /// Clamps out-of-range values. A room must tick, so a rate of zero
    /// becomes one.
    pub fn validated(mut self) -> Self {
        let clamped = self.rate_hz.clamp(1, Self::MAX_RATE_HZ);
        if clamped != self.rate_hz {
            warn!(rate = self.rate_hz, clamped, "tick rate out of range");
            self.rate_hz = clamped;
        }
        self.budget_warn = self.budget_warn.clamp(0.0, 1.0);
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.rate_hz.max(1)))
    }
}

// ---------------------------------------------------------------------------
// Tick info and metrics
// ---------------------------------------------------------------------------

/// Returned by [`TickScheduler::wait_for_tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickInfo {
    /// Starts at 1.
    pub tick: u64,
    /// The fixed interval, regardless of how late the tick fired.
    pub dt: Duration,
    /// Fired more than a tenth of an interval late.
    pub late: bool,
    pub skipped: u64,
}

/// Running totals, updated by the scheduler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickMetrics {
    pub ticks: u64,
    pub late_ticks: u64,
    pub skipped: u64,
    /// Exponential moving average of the drain time.
    pub avg_work: Duration,
    pub max_work: Duration,
    /// Last drain time over the interval; above 1.0 means over budget.
    pub utilization: f64,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Drives one room's tick loop.
#[derive(Debug)]
pub struct TickScheduler {
    config: TickConfig,
    interval: Duration,
    tick: u64,
    next: TokioInstant,
    work_started: Option<Instant>,
    paused: bool,
    metrics: TickMetrics,
}

impl TickScheduler {
    pub fn new(config: TickConfig) -> Self {
        let config = config.validated();
        let interval = config.interval();
        let jitter = if config.initial_jitter_ms > 0 {
            Duration::from_millis(rand::rng().random_range(0..config.initial_jitter_ms))
        } else {
            Duration::ZERO
        };
        debug!(rate_hz = config.rate_hz, policy = ?config.policy, "tick scheduler created");
        Self {
            config,
            interval,
            tick: 0,
            next: TokioInstant::now() + interval + jitter,
            work_started: None,
            paused: false,
            metrics: TickMetrics::default(),
        }
    }

    pub fn with_rate(rate_hz: u32) -> Self {
        Self::new(TickConfig::with_rate(rate_hz))
    }

    /// Resolves when the next tick is due. Pends forever while paused, so
    /// it is safe inside `tokio::select!`.
    pub async fn wait_for_tick(&mut self) -> TickInfo {
        if self.paused {
            std::future::pending::<()>().await;
        }

        let due = self.next;
        time::sleep_until(due).await;
        let now = TokioInstant::now();
        self.tick += 1;
        self.work_started = Some(Instant::now());

        let late_by = now.saturating_duration_since(due);
        let late = late_by > self.interval / 10;
        let behind = (late_by.as_nanos() / self.interval.as_nanos().max(1)) as u64;
        let mut skipped = 0;

        self.next = match self.config.policy {
            TickPolicy::Skip => {
                skipped = behind;
                now + self.interval
            }
            TickPolicy::CatchUp { max_catchup } if behind <= u64::from(max_catchup) => {
                due + self.interval
            }
            TickPolicy::CatchUp { max_catchup } => {
                skipped = behind - u64::from(max_catchup);
                now + self.interval
            }
        };

        if skipped > 0 {
            warn!(tick = self.tick, skipped, "room fell behind its tick schedule");
        }
        if late {
            self.metrics.late_ticks += 1;
        }
        self.metrics.skipped += skipped;
        self.metrics.ticks += 1;
        trace!(tick = self.tick, late, "tick");

        TickInfo {
            tick: self.tick,
            dt: self.interval,
            late,
            skipped,
        }
    }

    /// Marks the end of the current tick's work. A no-op without a
    /// preceding [`wait_for_tick`](Self::wait_for_tick).
    pub fn record_tick_end(&mut self) {
        let Some(started) = self.work_started.take() else {
            return;
        };
        let work = started.elapsed();
        let utilization = work.as_secs_f64() / self.interval.as_secs_f64();
        if utilization >= self.config.budget_warn {
            warn!(
                tick = self.tick,
                work_ms = work.as_secs_f64() * 1000.0,
                utilization = format!("{:.0}%", utilization * 100.0),
                "tick work over budget"
            );
        }

        let metrics = &mut self.metrics;
        metrics.utilization = utilization;
        metrics.max_work = metrics.max_work.max(work);
        let avg = metrics.avg_work.as_secs_f64() * 0.9 + work.as_secs_f64() * 0.1;
        metrics.avg_work = Duration::from_secs_f64(avg);
    }

    pub fn pause(&mut self) {
        if !self.paused {
            self.paused = true;
            debug!(tick = self.tick, "tick scheduler paused");
        }
    }

    /// Resumes with the next tick one interval from now.
    pub fn resume(&mut self) {
        if self.paused {
            self.paused = false;
            self.next = TokioInstant::now() + self.interval;
            debug!(tick = self.tick, "tick scheduler resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn rate_hz(&self) -> u32 {
        self.config.rate_hz
    }

    pub fn metrics(&self) -> &TickMetrics {
        &self.metrics
    }
}
