//! Rollout percentages and the random draw behind first-time assignment.
//!
//! A user who has never been assigned draws a value uniformly in `[0, 100)`.
//! If the draw is below the flag's rollout percentage they land in treatment,
//! otherwise control. The draw happens once; the result is persisted and the
//! draw is never consulted again for that user.

use crate::orm::flag_assignments::Variant;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Upper bound (exclusive) for draws and inclusive upper bound for percentages.
pub const PERCENT_SCALE: u8 = 100;

/// Rollout percentage, always within `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i32")]
pub struct RolloutPercentage(u8);

impl RolloutPercentage {
    pub const NONE: RolloutPercentage = RolloutPercentage(0);
    pub const ALL: RolloutPercentage = RolloutPercentage(PERCENT_SCALE);

    /// Clamp any integer into `[0, 100]`.
    pub fn clamped(value: i64) -> Self {
        Self(value.clamp(0, PERCENT_SCALE as i64) as u8)
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// Variant for a user whose draw came out as `draw`.
    pub fn variant_for(self, draw: u8) -> Variant {
        if draw < self.0 {
            Variant::Treatment
        } else {
            Variant::Control
        }
    }
}

impl From<i64> for RolloutPercentage {
    fn from(value: i64) -> Self {
        Self::clamped(value)
    }
}

impl From<i32> for RolloutPercentage {
    fn from(value: i32) -> Self {
        Self::clamped(value as i64)
    }
}

impl From<RolloutPercentage> for i32 {
    fn from(value: RolloutPercentage) -> Self {
        value.0 as i32
    }
}

impl std::fmt::Display for RolloutPercentage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// Source of assignment draws, each uniform in `[0, 100)`.
pub trait Draw: Send + Sync {
    fn draw(&self) -> u8;
}

/// Production draw source backed by the thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRngDraw;

impl Draw for ThreadRngDraw {
    fn draw(&self) -> u8 {
        rand::thread_rng().gen_range(0..PERCENT_SCALE)
    }
}

/// Always draws the same value. Values above 99 are reduced into range.
#[derive(Debug, Clone, Copy)]
pub struct FixedDraw(pub u8);

impl Draw for FixedDraw {
    fn draw(&self) -> u8 {
        self.0 % PERCENT_SCALE
    }
}

/// Cycles through a fixed list of draws. An empty list always draws 0.
#[derive(Debug)]
pub struct SequenceDraw {
    values: Vec<u8>,
    next: AtomicUsize,
}

impl SequenceDraw {
    pub fn new(values: Vec<u8>) -> Self {
        Self {
            values,
            next: AtomicUsize::new(0),
        }
    }
}

impl Draw for SequenceDraw {
    fn draw(&self) -> u8 {
        if self.values.is_empty() {
            return 0;
        }
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.values.len();
        self.values[i] % PERCENT_SCALE
    }
}
