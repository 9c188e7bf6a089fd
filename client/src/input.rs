//! Random-walk input for the headless client

use rand::rngs::{StdRng, ThreadRng};
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// Movement axes in `[-1, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct InputState {
    pub horizontal: f32,
    pub vertical: f32,
}

impl InputState {
    pub fn is_idle(&self) -> bool {
        self.horizontal == 0.0 && self.vertical == 0.0
    }
}

/// Produces a new random direction every few hundred milliseconds,
/// standing in for keyboard polling when no window exists
pub struct BotInput<R: Rng = ThreadRng> {
    rng: R,
    current: InputState,
    hold_remaining: Duration,
}

impl BotInput<ThreadRng> {
    pub fn new() -> Self {
        Self::with_rng(rand::thread_rng())
    }
}

impl Default for BotInput<ThreadRng> {
    fn default() -> Self {
        Self::new()
    }
}

impl BotInput<StdRng> {
    /// Deterministic sequence for a given seed
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> BotInput<R> {
    pub fn with_rng(rng: R) -> Self {
        Self {
            rng,
            current: InputState::default(),
            hold_remaining: Duration::ZERO,
        }
    }

    /// Advances by `dt` and returns the input to apply this frame
    pub fn poll(&mut self, dt: Duration) -> InputState {
        if self.hold_remaining <= dt {
            self.current = InputState {
                horizontal: self.rng.gen_range(-1i32..=1) as f32,
                vertical: self.rng.gen_range(-1i32..=1) as f32,
            };
            self.hold_remaining = Duration::from_millis(self.rng.gen_range(200..=800));
        } else {
            self.hold_remaining -= dt;
        }
        self.current
    }

    pub fn current(&self) -> InputState {
        self.current
    }
}
