// SPDX-License-Identifier: CEPL-1.0
use std::time::{Duration, Instant};

/// Monotonic frame clock. `update` samples the time since `start`; `tick`
/// additionally returns the delta since the previous tick.
#[derive(Debug, Default, Clone, Copy)]
pub struct Clock {
    start: Option<Instant>,
    elapsed: Duration,
    last_tick: Duration,
}

impl Clock {
    pub fn start(&mut self) {
        self.start = Some(Instant::now());
        self.elapsed = Duration::ZERO;
        self.last_tick = Duration::ZERO;
    }

    pub fn stop(&mut self) {
        self.start = None;
    }

    pub fn is_running(&self) -> bool {
        self.start.is_some()
    }

    pub fn update(&mut self) {
        if let Some(start) = self.start {
            self.elapsed = start.elapsed();
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Seconds since the previous tick (0 on a stopped clock).
    pub fn tick(&mut self) -> f32 {
        if !self.is_running() {
            return 0.0;
        }
        self.update();
        let delta = self.elapsed.saturating_sub(self.last_tick);
        self.last_tick = self.elapsed;
        delta.as_secs_f32()
    }
}
