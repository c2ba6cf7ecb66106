//! Jitter strategies and injectable randomness.
//!
//! - `None`: exact backoff delay.
//! - `Full`: uniform in `[0, delay)`.
//! - `Additive(max)`: `delay + U[0,1) * max`; the default adds up to one second.
//!
//! Randomness comes from a [`JitterSource`] that yields uniform draws in `[0, 1)`. Production
//! uses [`ThreadRngSource`]; tests inject [`FixedSource`] or [`SeededSource`] for repeatable
//! delays. A fresh draw is taken every time jitter is applied.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Source of uniform draws in `[0, 1)`.
pub trait JitterSource: Send + Sync + std::fmt::Debug {
    fn sample(&self) -> f64;
}

/// Thread-local RNG from `rand`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRngSource;

impl JitterSource for ThreadRngSource {
    fn sample(&self) -> f64 {
        rand::rng().random::<f64>()
    }
}

/// Seeded RNG; the same seed yields the same sequence of draws.
#[derive(Debug)]
pub struct SeededSource {
    rng: Mutex<StdRng>,
}

impl SeededSource {
    pub fn new(seed: u64) -> Self {
        Self { rng: Mutex::new(StdRng::seed_from_u64(seed)) }
    }
}

impl JitterSource for SeededSource {
    fn sample(&self) -> f64 {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).random::<f64>()
    }
}

/// Always returns the same draw, clamped into `[0, 1)`.
#[derive(Debug, Clone, Copy)]
pub struct FixedSource(f64);

impl FixedSource {
    pub fn new(value: f64) -> Self {
        let clamped = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0 - f64::EPSILON) };
        Self(clamped)
    }
}

impl JitterSource for FixedSource {
    fn sample(&self) -> f64 {
        self.0
    }
}

/// Jitter strategy for randomizing retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jitter {
    /// No jitter - use exact backoff delay
    None,
    /// Random fraction of the delay
    Full,
    /// Delay plus a random amount up to the given bound
    Additive(Duration),
}

impl Jitter {
    /// Up to one extra second on top of the backoff delay.
    pub fn additive_second() -> Self {
        Jitter::Additive(Duration::from_secs(1))
    }

    /// Apply jitter using a fresh draw from `source`.
    pub fn apply(&self, delay: Duration, source: &dyn JitterSource) -> Duration {
        match self {
            Jitter::None => delay,
            Jitter::Full => delay.mul_f64(unit(source)),
            Jitter::Additive(max) => delay.saturating_add(max.mul_f64(unit(source))),
        }
    }
}

impl Default for Jitter {
    fn default() -> Self {
        Self::additive_second()
    }
}

// Guards against sources that stray outside [0, 1).
fn unit(source: &dyn JitterSource) -> f64 {
    let draw = source.sample();
    if draw.is_finite() {
        draw.clamp(0.0, 1.0 - f64::EPSILON)
    } else {
        0.0
    }
}
