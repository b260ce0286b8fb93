//! Idle eye blinking on the auxiliary blink channels.

use crate::defaults;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f32::consts::PI;
use std::time::Duration;

/// Schedules blinks at random intervals and produces the eyelid weight.
#[derive(Debug)]
pub struct BlinkScheduler {
    rng: StdRng,
    interval: (Duration, Duration),
    duration: Duration,
    next_blink: Duration,
    blink_started: Option<Duration>,
}

impl BlinkScheduler {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }

    /// Deterministic schedule for tests and replays.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        let (lo, hi) = defaults::BLINK_INTERVAL_MS;
        let mut scheduler = Self {
            rng,
            interval: (Duration::from_millis(lo), Duration::from_millis(hi)),
            duration: Duration::from_millis(defaults::BLINK_DURATION_MS),
            next_blink: Duration::ZERO,
            blink_started: None,
        };
        scheduler.next_blink = scheduler.draw_interval();
        scheduler
    }

    fn draw_interval(&mut self) -> Duration {
        let (lo, hi) = self.interval;
        self.rng.random_range(lo..=hi)
    }

    pub fn is_blinking(&self) -> bool {
        self.blink_started.is_some()
    }

    /// Eyelid weight at `now` (time since the scheduler started).
    ///
    /// While `suppressed`, no new blink starts; a blink already in progress
    /// still finishes so the eyes never freeze half closed.
    pub fn update(&mut self, now: Duration, suppressed: bool) -> f32 {
        if self.blink_started.is_none() && now >= self.next_blink {
            if suppressed {
                self.next_blink = now + self.draw_interval();
            } else {
                self.blink_started = Some(now);
            }
        }

        let Some(started) = self.blink_started else {
            return 0.0;
        };
        let progress = (now - started).as_secs_f32() / self.duration.as_secs_f32();
        if progress >= 1.0 {
            self.blink_started = None;
            self.next_blink = now + self.draw_interval();
            return 0.0;
        }
        (progress * PI).sin()
    }
}

impl Default for BlinkScheduler {
    fn default() -> Self {
        Self::new()
    }
}
