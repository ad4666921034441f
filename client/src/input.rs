//! Automated movement input for headless clients

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::InputAxes;

/// Sends between two direction changes.
pub const SENDS_PER_DIRECTION: u32 = 30;

/// Wanders in a random direction and picks a new one every
/// [`SENDS_PER_DIRECTION`] sends.
pub struct BotInput {
    rng: StdRng,
    current: InputAxes,
    remaining: u32,
    rolls: u64,
}

impl BotInput {
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            rng,
            current: InputAxes::default(),
            remaining: 0,
            rolls: 0,
        }
    }

    /// Input for the next send.
    pub fn next_axes(&mut self) -> InputAxes {
        if self.remaining == 0 {
            self.current = InputAxes::new(
                self.rng.gen_range(-1.0..=1.0),
                self.rng.gen_range(-1.0..=1.0),
            );
            self.remaining = SENDS_PER_DIRECTION;
            self.rolls += 1;
        }
        self.remaining -= 1;
        self.current
    }

    /// Directions picked so far.
    pub fn rolls(&self) -> u64 {
        self.rolls
    }
}

impl Default for BotInput {
    fn default() -> Self {
        Self::new()
    }
}
