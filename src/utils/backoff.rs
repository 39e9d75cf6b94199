//! # Backoff Controllers
//!
//! Delay controllers for cooperative polling loops.
//!
//! Every idle loop in the runtime (framer, batcher, adapters, dispatcher)
//! sleeps between iterations. The delay grows while the loop finds nothing to
//! do and shrinks again as soon as work arrives, so an idle session costs
//! almost no CPU while a busy one polls at microsecond granularity.
//!
//! Jitter is applied on top of the current delay to avoid synchronized
//! wake-ups across many sessions.

use std::time::Duration;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Exponential backoff: the delay is multiplied on idle iterations and
/// divided on productive ones.
#[derive(Debug)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    divisor: f64,
    jitter_factor: f64,
    current: Duration,
    rng: SmallRng,
}

impl ExponentialBackoff {
    /// Create a controller.
    ///
    /// `multiplier` scales the delay up in [`increase`](Self::increase),
    /// `divisor` scales it down in [`decrease`](Self::decrease), and
    /// `jitter_factor` is the maximum fraction of the current delay added as
    /// random jitter by [`delay`](Self::delay).
    pub fn new(
        initial: Duration,
        max: Duration,
        multiplier: f64,
        divisor: f64,
        jitter_factor: f64,
    ) -> Self {
        Self {
            initial,
            max,
            multiplier,
            divisor,
            jitter_factor,
            current: initial,
            rng: SmallRng::from_entropy(),
        }
    }

    /// Current delay with jitter applied.
    pub fn delay(&mut self) -> Duration {
        let jitter = self.current.mul_f64(self.jitter_factor * self.rng.gen::<f64>());
        self.current + jitter
    }

    /// Grow the delay after an idle iteration.
    pub fn increase(&mut self) {
        self.current = self.current.mul_f64(self.multiplier).min(self.max);
    }

    /// Shrink the delay after a productive iteration.
    pub fn decrease(&mut self) {
        self.current = self.current.div_f64(self.divisor).max(self.initial);
    }

    /// Reset to the initial delay.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Linear backoff: the delay moves by a fixed step.
#[derive(Debug, Clone, Copy)]
pub struct LinearBackoff {
    initial: Duration,
    max: Duration,
    step: Duration,
    current: Duration,
}

impl LinearBackoff {
    pub fn new(initial: Duration, max: Duration, step: Duration) -> Self {
        Self {
            initial,
            max,
            step,
            current: initial,
        }
    }

    pub fn delay(&self) -> Duration {
        self.current
    }

    pub fn increase(&mut self) {
        self.current = (self.current + self.step).min(self.max);
    }

    pub fn decrease(&mut self) {
        self.current = self.current.saturating_sub(self.step).max(self.initial);
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}
