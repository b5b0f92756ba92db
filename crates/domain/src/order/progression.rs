//! Decides how paid orders move through fulfilment.

use std::sync::Mutex;

use rand::Rng;
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::OrderStatus;

/// Chooses the next status for an order that is due to move.
pub trait StatusProgression: Send + Sync {
    /// Returns the next status for `current`, or `None` to leave it.
    fn next(&self, current: OrderStatus) -> Option<OrderStatus>;
}

/// Random progression: one roll in thirteen takes the exceptional path,
/// annulling an order in transit or refunding a delivered one.
#[derive(Debug)]
pub struct RandomProgression {
    rng: Mutex<StdRng>,
}

impl RandomProgression {
    /// Number of faces on the die; the last face is the exceptional outcome.
    pub const SIDES: u32 = 13;

    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Creates a progression with a reproducible sequence.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn roll(&self) -> u32 {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        rng.gen_range(1..=Self::SIDES)
    }
}

impl Default for RandomProgression {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusProgression for RandomProgression {
    fn next(&self, current: OrderStatus) -> Option<OrderStatus> {
        let exceptional = current.next_exceptional()?;
        if self.roll() == Self::SIDES {
            Some(exceptional)
        } else {
            current.next_regular()
        }
    }
}

/// Deterministic progression for tests and demos.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixedProgression {
    /// Always take the regular next step.
    Regular,
    /// Always take the exceptional step: annul in transit, refund once delivered.
    Exceptional,
    /// Never move anything.
    Hold,
}

impl StatusProgression for FixedProgression {
    fn next(&self, current: OrderStatus) -> Option<OrderStatus> {
        match self {
            FixedProgression::Regular => current.next_regular(),
            FixedProgression::Exceptional => current.next_exceptional(),
            FixedProgression::Hold => None,
        }
    }
}
