use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use tokio::time::sleep;

use crate::{context::Context, error::ThrottleError, throttler::Visitor, Throttler};

/// Returns a fixed result from both Acquire and Release.
///
/// `Echo::new(None)` never throttles.
#[derive(Debug, Clone)]
pub struct Echo {
    err: Option<ThrottleError>,
}

impl Echo {
    pub fn new(err: Option<ThrottleError>) -> Self {
        Self { err }
    }

    pub fn error(&self) -> Option<&ThrottleError> {
        self.err.as_ref()
    }

    fn result(&self) -> Result<(), ThrottleError> {
        match &self.err {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Throttler for Echo {
    async fn acquire(&self, _ctx: &Context) -> Result<(), ThrottleError> {
        self.result()
    }

    async fn release(&self, _ctx: &Context) -> Result<(), ThrottleError> {
        self.result()
    }

    fn accept(&self, visitor: &mut dyn Visitor) {
        visitor.visit_echo(self)
    }
}

/// Delays every Acquire by a fixed duration.
#[derive(Debug, Clone, Copy)]
pub struct Wait {
    duration: Duration,
}

impl Wait {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

#[async_trait]
impl Throttler for Wait {
    async fn acquire(&self, _ctx: &Context) -> Result<(), ThrottleError> {
        sleep(self.duration).await;
        Ok(())
    }

    async fn release(&self, _ctx: &Context) -> Result<(), ThrottleError> {
        Ok(())
    }

    fn accept(&self, visitor: &mut dyn Visitor) {
        visitor.visit_wait(self)
    }
}

/// Quadratic backoff: the n-th Acquire sleeps `base * n²`.
///
/// Once the delay would exceed `cap` the sequence starts over at `base`. Without growth every
/// Acquire sleeps `base`.
#[derive(Debug)]
pub struct Square {
    base: Duration,
    cap: Duration,
    growth: bool,
    current: AtomicU64,
}

impl Square {
    pub fn new(base: Duration, cap: Duration, growth: bool) -> Self {
        Self {
            base,
            cap,
            growth,
            current: AtomicU64::new(0),
        }
    }

    /// The delay the next Acquire would use, ignoring rollover.
    pub fn next_delay(&self) -> Duration {
        if !self.growth {
            return self.base;
        }
        let next = self.current.load(Ordering::Relaxed) + 1;
        self.delay(next)
    }

    fn delay(&self, step: u64) -> Duration {
        let factor = step.saturating_mul(step).min(u32::MAX as u64) as u32;
        self.base.saturating_mul(factor)
    }
}

#[async_trait]
impl Throttler for Square {
    async fn acquire(&self, _ctx: &Context) -> Result<(), ThrottleError> {
        let mut delay = self.base;
        if self.growth {
            let step = self.current.fetch_add(1, Ordering::AcqRel) + 1;
            delay = self.delay(step);
            if delay > self.cap {
                self.current.store(1, Ordering::Release);
                delay = self.base;
            }
        }
        tracing::trace!(?delay, "square backoff");
        sleep(delay).await;
        Ok(())
    }

    async fn release(&self, _ctx: &Context) -> Result<(), ThrottleError> {
        Ok(())
    }

    fn accept(&self, visitor: &mut dyn Visitor) {
        visitor.visit_square(self)
    }
}

/// Fails once the call context is cancelled or past its deadline.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cancel;

impl Cancel {
    pub fn new() -> Self {
        Self
    }

    fn check(ctx: &Context) -> Result<(), ThrottleError> {
        match ctx.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Throttler for Cancel {
    async fn acquire(&self, ctx: &Context) -> Result<(), ThrottleError> {
        Self::check(ctx)
    }

    async fn release(&self, ctx: &Context) -> Result<(), ThrottleError> {
        Self::check(ctx)
    }

    fn accept(&self, visitor: &mut dyn Visitor) {
        visitor.visit_cancel(self)
    }
}

/// Panics on every Acquire; useful to check that callers isolate failing policies.
#[derive(Debug, Clone, Copy, Default)]
pub struct Panic;

impl Panic {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Throttler for Panic {
    async fn acquire(&self, _ctx: &Context) -> Result<(), ThrottleError> {
        panic!("throttler has reached panic")
    }

    async fn release(&self, _ctx: &Context) -> Result<(), ThrottleError> {
        Ok(())
    }

    fn accept(&self, visitor: &mut dyn Visitor) {
        visitor.visit_panic(self)
    }
}
