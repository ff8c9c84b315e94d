use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::{context::Context, error::ThrottleError, schedule, throttler::Visitor, Throttler};

/// Admits at most `limit` calls in total.
///
/// The limit can be moved at runtime, see [Adaptive](super::Adaptive).
#[derive(Debug)]
pub struct Fixed {
    current: AtomicU64,
    limit: AtomicU64,
}

impl Fixed {
    pub fn new(limit: u64) -> Self {
        Self {
            current: AtomicU64::new(0),
            limit: AtomicU64::new(limit),
        }
    }

    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Relaxed)
    }

    pub fn limit(&self) -> u64 {
        self.limit.load(Ordering::Relaxed)
    }

    pub(crate) fn grow(&self, step: u64) {
        let _ = self
            .limit
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |limit| {
                Some(limit.saturating_add(step))
            });
    }

    pub(crate) fn shrink(&self, step: u64) {
        let _ = self
            .limit
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |limit| {
                Some(limit.saturating_sub(step))
            });
    }

    /// Forget up to `delta` admitted calls.
    pub(crate) fn decay(&self, delta: u64) {
        let _ = self
            .current
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_sub(delta))
            });
    }

    fn check(&self) -> Result<(), ThrottleError> {
        let limit = self.limit.load(Ordering::Acquire);
        self.current
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < limit).then_some(current + 1)
            })
            .map(|_| ())
            .map_err(|current| {
                tracing::debug!(current, limit, "fixed limit reached");
                ThrottleError::AboveThreshold {
                    current,
                    threshold: limit,
                }
            })
    }
}

#[async_trait]
impl Throttler for Fixed {
    async fn acquire(&self, _ctx: &Context) -> Result<(), ThrottleError> {
        self.check()
    }

    async fn release(&self, _ctx: &Context) -> Result<(), ThrottleError> {
        Ok(())
    }

    fn accept(&self, visitor: &mut dyn Visitor) {
        visitor.visit_fixed(self)
    }
}

/// Admits `limit` calls per `window`.
///
/// By default the count resets to zero once per window. With a granularity of `q` the window
/// slides instead: every `window / q` the count drops by `ceil(limit / q)`.
///
/// The background loop runs until the lifetime token given at construction is cancelled or
/// the throttler is dropped.
#[derive(Debug)]
pub struct Timed {
    fixed: Arc<Fixed>,
    window: Duration,
    granularity: u32,
    lifetime: CancellationToken,
    _guard: DropGuard,
}

impl Timed {
    /// Must be called from within a tokio runtime.
    pub fn new(lifetime: &CancellationToken, limit: u64, window: Duration) -> Self {
        Self::with_granularity(lifetime, limit, window, 1)
    }

    /// Like [Timed::new], decaying the count in `granularity` steps per window.
    pub fn with_granularity(
        lifetime: &CancellationToken,
        limit: u64,
        window: Duration,
        granularity: u32,
    ) -> Self {
        assert!(!window.is_zero(), "timed window must be greater than 0");
        let granularity = granularity.max(1);
        let period = window / granularity;
        assert!(!period.is_zero(), "timed window is too short for its granularity");

        let fixed = Arc::new(Fixed::new(limit));
        let lifetime = lifetime.child_token();
        let delta = if granularity == 1 {
            u64::MAX
        } else {
            limit.div_ceil(granularity as u64)
        };
        {
            let fixed = fixed.clone();
            schedule::periodic(lifetime.clone(), period, move || {
                fixed.decay(delta);
                tracing::trace!(current = fixed.current(), "timed window decayed");
            });
        }

        Self {
            fixed,
            window,
            granularity,
            _guard: lifetime.clone().drop_guard(),
            lifetime,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn granularity(&self) -> u32 {
        self.granularity
    }

    pub fn current(&self) -> u64 {
        self.fixed.current()
    }

    pub fn limit(&self) -> u64 {
        self.fixed.limit()
    }

    /// Admissions left in the current window.
    pub fn remaining(&self) -> u64 {
        self.limit().saturating_sub(self.current())
    }

    /// Stop the background loop; idempotent.
    pub fn stop(&self) {
        self.lifetime.cancel();
    }

    pub(crate) fn fixed(&self) -> &Fixed {
        &self.fixed
    }
}

#[async_trait]
impl Throttler for Timed {
    async fn acquire(&self, ctx: &Context) -> Result<(), ThrottleError> {
        self.fixed.acquire(ctx).await
    }

    async fn release(&self, ctx: &Context) -> Result<(), ThrottleError> {
        self.fixed.release(ctx).await
    }

    fn accept(&self, visitor: &mut dyn Visitor) {
        visitor.visit_timed(self)
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::sleep;

    use super::*;

    const MS: Duration = Duration::from_millis(1);

    #[tokio::test]
    async fn fixed_limit() {
        let ctx = Context::background();
        let thr = Fixed::new(2);
        thr.acquire(&ctx).await.unwrap();
        thr.acquire(&ctx).await.unwrap();
        assert!(matches!(
            thr.acquire(&ctx).await,
            Err(ThrottleError::AboveThreshold { current: 2, threshold: 2 })
        ));

        thr.grow(1);
        thr.acquire(&ctx).await.unwrap();
        thr.shrink(10);
        assert_eq!(thr.limit(), 0);
        assert!(thr.acquire(&ctx).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn timed_resets_every_window() {
        let lifetime = CancellationToken::new();
        let ctx = Context::background();
        let thr = Timed::new(&lifetime, 2, 2 * MS);

        assert!(thr.acquire(&ctx).await.is_ok());
        assert!(thr.acquire(&ctx).await.is_ok());
        assert!(thr.acquire(&ctx).await.is_err());
        assert!(thr.acquire(&ctx).await.is_err());
        assert_eq!(thr.remaining(), 0);

        sleep(3 * MS).await;
        assert!(thr.acquire(&ctx).await.is_ok());
        assert!(thr.acquire(&ctx).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn timed_slides_with_granularity() {
        let lifetime = CancellationToken::new();
        let ctx = Context::background();
        let thr = Timed::with_granularity(&lifetime, 2, 4 * MS, 2);

        assert!(thr.acquire(&ctx).await.is_ok());
        assert!(thr.acquire(&ctx).await.is_ok());
        assert!(thr.acquire(&ctx).await.is_err());

        // one quantum frees a single admission
        sleep(3 * MS).await;
        assert!(thr.acquire(&ctx).await.is_ok());
        assert!(thr.acquire(&ctx).await.is_err());

        sleep(4 * MS).await;
        assert_eq!(thr.current(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_stops_with_lifetime() {
        let lifetime = CancellationToken::new();
        let ctx = Context::background();
        let thr = Timed::new(&lifetime, 1, 2 * MS);

        thr.acquire(&ctx).await.unwrap();
        lifetime.cancel();
        sleep(5 * MS).await;
        assert!(thr.acquire(&ctx).await.is_err());
        thr.stop();
    }
}
