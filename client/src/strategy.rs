//! Move selection for a participant.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};

pub const MOVES: [&str; 4] = ["up", "down", "left", "right"];

/// Decides what to answer for a round. The payload is opaque to the judge.
pub trait Strategy: Send {
    fn next_move(&mut self, round: u32) -> Value;
}

/// Answers every inquiry with a random direction and score.
pub struct RandomStrategy<R: Rng>(R);

impl<R: Rng> RandomStrategy<R> {
    pub fn new(rng: R) -> Self {
        RandomStrategy(rng)
    }
}

impl RandomStrategy<StdRng> {
    pub fn from_entropy() -> Self {
        RandomStrategy(StdRng::from_entropy())
    }
}

impl<R: Rng + Send> Strategy for RandomStrategy<R> {
    fn next_move(&mut self, _round: u32) -> Value {
        let direction = MOVES[self.0.gen_range(0..MOVES.len())];
        let score: u32 = self.0.gen_range(1..=100);
        json!({ "move": direction, "score": score })
    }
}
