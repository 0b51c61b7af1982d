//! Fixed-rate pacer for snapshot fan-out.
//!
//! Sits in a room actor's `tokio::select!` loop next to the command queue:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         cmd = commands.recv() => { /* mutate */ }
//!         _ = pacer.wait_for_tick() => { /* broadcast gameState */ }
//!     }
//! }
//! ```
//!
//! A late wake-up never produces a burst: the next deadline is always
//! measured from the moment the tick actually fired, and the missed slots
//! are reported as skipped.

use std::time::Duration;

use rand::Rng;
use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

/// Information about one fired tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tick {
    /// Monotonically increasing tick number, starting at 1.
    pub seq: u64,
    /// `true` if the tick fired more than 10% of a period late.
    pub overrun: bool,
    /// Whole periods that were skipped because of the overrun.
    pub skipped: u64,
}

/// Fixed-rate ticker with start jitter and skip-on-overrun.
#[derive(Debug)]
pub struct SnapshotPacer {
    period: Option<Duration>,
    next: Option<Instant>,
    seq: u64,
    total_skipped: u64,
}

impl SnapshotPacer {
    /// Highest accepted rate. Faster requests are clamped.
    pub const MAX_RATE_HZ: u32 = 120;

    /// Creates a pacer firing `rate_hz` times per second.
    ///
    /// A rate of 0 yields a pacer that never fires. The first tick lands
    /// one period plus a random `0..max_jitter` from now.
    pub fn new(rate_hz: u32, max_jitter: Duration) -> Self {
        let rate_hz = if rate_hz > Self::MAX_RATE_HZ {
            warn!(rate_hz, max = Self::MAX_RATE_HZ, "snapshot rate too high, clamping");
            Self::MAX_RATE_HZ
        } else {
            rate_hz
        };

        let period = (rate_hz > 0).then(|| Duration::from_secs_f64(1.0 / f64::from(rate_hz)));
        let next = period.map(|p| Instant::now() + p + jitter(max_jitter));

        match period {
            Some(p) => debug!(rate_hz, period_ms = p.as_secs_f64() * 1000.0, "snapshot pacer created"),
            None => debug!("snapshot pacer disabled"),
        }

        Self {
            period,
            next,
            seq: 0,
            total_skipped: 0,
        }
    }

    /// Waits until the next tick is due.
    ///
    /// Pends forever for a disabled pacer, which lets `select!` serve its
    /// other branches.
    pub async fn wait_for_tick(&mut self) -> Tick {
        let (Some(deadline), Some(period)) = (self.next, self.period) else {
            return std::future::pending().await;
        };

        time::sleep_until(deadline).await;

        let now = Instant::now();
        self.seq += 1;

        let late_by = now.saturating_duration_since(deadline);
        let overrun = late_by > period / 10;
        let skipped = if overrun {
            (late_by.as_nanos() / period.as_nanos()) as u64
        } else {
            0
        };
        if skipped > 0 {
            warn!(
                tick = self.seq,
                skipped,
                late_ms = late_by.as_secs_f64() * 1000.0,
                "snapshot overrun, skipping ahead"
            );
        }
        self.total_skipped += skipped;
        self.next = Some(now + period);

        trace!(tick = self.seq, overrun, "snapshot tick");
        Tick {
            seq: self.seq,
            overrun,
            skipped,
        }
    }

    /// Ticks fired so far.
    pub fn tick_count(&self) -> u64 {
        self.seq
    }

    /// Periods skipped so far.
    pub fn total_skipped(&self) -> u64 {
        self.total_skipped
    }

    /// Interval between ticks, or `None` when disabled.
    pub fn period(&self) -> Option<Duration> {
        self.period
    }

    pub fn is_disabled(&self) -> bool {
        self.period.is_none()
    }
}

fn jitter(max: Duration) -> Duration {
    let max_us = max.as_micros() as u64;
    if max_us == 0 {
        return Duration::ZERO;
    }
    Duration::from_micros(rand::rng().random_range(0..max_us))
}
