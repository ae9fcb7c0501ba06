// Animation clock
//
// Tracks the time between ticks and the time since the particles were last
// launched. Instants are passed in so the reset rule can be driven in tests.

use anyhow::{Context, Result};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockTick {
    /// Seconds since the previous tick, fed to the compute pass
    pub delta: f32,
    /// The reset threshold was crossed on this tick
    pub relaunch: bool,
}

pub struct AnimationClock {
    reset_after: Duration,
    epoch: Instant,
    last_frame: Instant,
}

impl AnimationClock {
    pub fn new(reset_seconds: f64, now: Instant) -> Result<Self> {
        let reset_after = Duration::try_from_secs_f64(reset_seconds)
            .with_context(|| format!("Invalid relaunch interval: {} seconds", reset_seconds))?;

        Ok(Self {
            reset_after,
            epoch: now,
            last_frame: now,
        })
    }

    pub fn tick(&mut self, now: Instant) -> ClockTick {
        let delta = now.saturating_duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;

        let relaunch = now.saturating_duration_since(self.epoch) >= self.reset_after;
        if relaunch {
            self.epoch = now;
        }

        ClockTick { delta, relaunch }
    }
}
