use async_trait::async_trait;

use super::Timed;
use crate::{context::Context, error::ThrottleError, throttler::Visitor, Throttler};

/// Moves a [Timed] budget based on feedback from another throttler.
///
/// Every Acquire first consults the inner throttler: on failure the budget shrinks by
/// `step²`, on success it grows by `step`. The adjusted budget then decides the call.
pub struct Adaptive {
    timed: Timed,
    step: u64,
    inner: Box<dyn Throttler>,
}

impl Adaptive {
    pub fn new(timed: Timed, step: u64, inner: impl Throttler + 'static) -> Self {
        Self {
            timed,
            step,
            inner: Box::new(inner),
        }
    }

    pub fn timed(&self) -> &Timed {
        &self.timed
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn inner(&self) -> &dyn Throttler {
        self.inner.as_ref()
    }
}

#[async_trait]
impl Throttler for Adaptive {
    async fn acquire(&self, ctx: &Context) -> Result<(), ThrottleError> {
        match self.inner.acquire(ctx).await {
            Ok(()) => self.timed.fixed().grow(self.step),
            Err(err) => {
                tracing::debug!(%err, step = self.step, "adaptive budget shrinking");
                self.timed.fixed().shrink(self.step.saturating_mul(self.step));
            }
        }
        self.timed.acquire(ctx).await
    }

    async fn release(&self, ctx: &Context) -> Result<(), ThrottleError> {
        self.timed.release(ctx).await
    }

    fn accept(&self, visitor: &mut dyn Visitor) {
        visitor.visit_adaptive(self)
    }
}
