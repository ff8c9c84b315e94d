use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use rand::Rng;

use crate::{context::Context, error::ThrottleError, throttler::Visitor, Throttler};

/// Fails every `threshold`-th Acquire.
#[derive(Debug)]
pub struct Each {
    current: AtomicU64,
    threshold: u64,
}

impl Each {
    pub fn new(threshold: u64) -> Self {
        assert!(threshold > 0, "periodic threshold must be greater than 0");
        Self {
            current: AtomicU64::new(0),
            threshold,
        }
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Relaxed)
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }
}

#[async_trait]
impl Throttler for Each {
    async fn acquire(&self, _ctx: &Context) -> Result<(), ThrottleError> {
        let current = self.current.fetch_add(1, Ordering::AcqRel) + 1;
        if current % self.threshold == 0 {
            tracing::debug!(current, threshold = self.threshold, "periodic skip");
            return Err(ThrottleError::Periodic { current });
        }
        Ok(())
    }

    async fn release(&self, _ctx: &Context) -> Result<(), ThrottleError> {
        Ok(())
    }

    fn accept(&self, visitor: &mut dyn Visitor) {
        visitor.visit_each(self)
    }
}

/// Fails until the `threshold`-th Acquire, then always succeeds.
#[derive(Debug)]
pub struct Before {
    current: AtomicU64,
    threshold: u64,
}

impl Before {
    pub fn new(threshold: u64) -> Self {
        Self {
            current: AtomicU64::new(0),
            threshold,
        }
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Relaxed)
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }
}

#[async_trait]
impl Throttler for Before {
    async fn acquire(&self, _ctx: &Context) -> Result<(), ThrottleError> {
        let current = self.current.load(Ordering::Acquire);
        if current >= self.threshold {
            return Ok(());
        }
        // stop counting once the threshold is reached so the counter can never wrap
        let current = self.current.fetch_add(1, Ordering::AcqRel) + 1;
        if current < self.threshold {
            return Err(ThrottleError::BelowThreshold {
                current,
                threshold: self.threshold,
            });
        }
        Ok(())
    }

    async fn release(&self, _ctx: &Context) -> Result<(), ThrottleError> {
        Ok(())
    }

    fn accept(&self, visitor: &mut dyn Visitor) {
        visitor.visit_before(self)
    }
}

/// Succeeds for the first `threshold` Acquires, then always fails.
#[derive(Debug)]
pub struct After {
    current: AtomicU64,
    threshold: u64,
}

impl After {
    pub fn new(threshold: u64) -> Self {
        Self {
            current: AtomicU64::new(0),
            threshold,
        }
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Relaxed)
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }
}

#[async_trait]
impl Throttler for After {
    async fn acquire(&self, _ctx: &Context) -> Result<(), ThrottleError> {
        let current = self
            .current
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_add(1))
            })
            .unwrap_or_else(|current| current)
            .saturating_add(1);
        if current > self.threshold {
            tracing::debug!(current, threshold = self.threshold, "budget exhausted");
            return Err(ThrottleError::AboveThreshold {
                current,
                threshold: self.threshold,
            });
        }
        Ok(())
    }

    async fn release(&self, _ctx: &Context) -> Result<(), ThrottleError> {
        Ok(())
    }

    fn accept(&self, visitor: &mut dyn Visitor) {
        visitor.visit_after(self)
    }
}

/// Fails with a fixed probability.
#[derive(Debug, Clone, Copy)]
pub struct Chance {
    probability: f64,
}

impl Chance {
    /// `probability` is taken by absolute value and capped at 1.
    pub fn new(probability: f64) -> Self {
        let probability = if probability.is_nan() {
            0.0
        } else {
            probability.abs().min(1.0)
        };
        Self { probability }
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }
}

#[async_trait]
impl Throttler for Chance {
    async fn acquire(&self, _ctx: &Context) -> Result<(), ThrottleError> {
        // gen::<f64>() is in [0, 1), so 1.0 - draw is in (0, 1]
        let draw = 1.0 - rand::thread_rng().gen::<f64>();
        if self.probability >= draw {
            return Err(ThrottleError::Chance);
        }
        Ok(())
    }

    async fn release(&self, _ctx: &Context) -> Result<(), ThrottleError> {
        Ok(())
    }

    fn accept(&self, visitor: &mut dyn Visitor) {
        visitor.visit_chance(self)
    }
}
