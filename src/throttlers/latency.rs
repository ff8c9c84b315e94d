use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::{
    context::{Context, PolicyId},
    error::ThrottleError,
    samples::Latencies,
    schedule::Debounce,
    throttler::Visitor,
    Throttler,
};

/// Remembers when a call was admitted, unless the caller stamped the context itself.
fn stamp(id: PolicyId, ctx: &Context) {
    if ctx.timestamp().is_none() {
        ctx.mark(id, Instant::now());
    }
}

/// Time elapsed since the call was stamped, or zero for an unstamped call.
fn elapsed(id: PolicyId, ctx: &Context) -> Duration {
    let marked = ctx.take_mark::<Instant>(id);
    match ctx.timestamp().or(marked) {
        Some(start) => start.elapsed(),
        None => Duration::ZERO,
    }
}

fn nanos(duration: Duration) -> u64 {
    duration.as_nanos().min(u64::MAX as u128) as u64
}

/// Fails while the worst recently observed latency is above `limit`.
///
/// Release measures the time since the call was stamped (see [Context::with_timestamp]) or
/// since its Acquire. The observed latency resets to zero once `retention` passes without a
/// new measurement.
pub struct Latency {
    id: PolicyId,
    latency: Arc<AtomicU64>,
    limit: Duration,
    retention: Duration,
    reset: Debounce,
    _guard: DropGuard,
}

impl Latency {
    pub fn new(limit: Duration, retention: Duration) -> Self {
        let lifetime = CancellationToken::new();
        Self {
            id: PolicyId::next(),
            latency: Arc::default(),
            limit,
            retention,
            reset: Debounce::new(retention, lifetime.clone()),
            _guard: lifetime.drop_guard(),
        }
    }

    /// The latency currently held against the limit.
    pub fn latency(&self) -> Duration {
        Duration::from_nanos(self.latency.load(Ordering::Relaxed))
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }
}

#[async_trait]
impl Throttler for Latency {
    async fn acquire(&self, ctx: &Context) -> Result<(), ThrottleError> {
        let latency = self.latency();
        if latency > self.limit {
            tracing::debug!(?latency, limit = ?self.limit, "latency limit exceeded");
            return Err(ThrottleError::Latency {
                latency,
                limit: self.limit,
            });
        }
        stamp(self.id, ctx);
        Ok(())
    }

    async fn release(&self, ctx: &Context) -> Result<(), ThrottleError> {
        let measured = elapsed(self.id, ctx);
        if self.latency() < self.limit {
            self.latency.fetch_max(nanos(measured), Ordering::AcqRel);
            let latency = self.latency.clone();
            self.reset.schedule(move || {
                latency.store(0, Ordering::Release);
                tracing::trace!("latency reset");
            });
        }
        Ok(())
    }

    fn accept(&self, visitor: &mut dyn Visitor) {
        visitor.visit_latency(self)
    }
}

/// Fails while the `percentile` of recent latencies is above `limit`.
///
/// Keeps the last `capacity` latencies measured on Release. When a check fails, the samples
/// are dropped once `retention` passes without another failing check.
pub struct Percentile {
    id: PolicyId,
    latencies: Arc<Mutex<Latencies>>,
    limit: Duration,
    percentile: f64,
    retention: Duration,
    prune: Debounce,
    _guard: DropGuard,
}

impl Percentile {
    /// `percentile` is taken by absolute value and capped at 1.
    pub fn new(limit: Duration, capacity: usize, percentile: f64, retention: Duration) -> Self {
        let percentile = if percentile.is_nan() {
            0.0
        } else {
            percentile.abs().min(1.0)
        };
        let lifetime = CancellationToken::new();
        Self {
            id: PolicyId::next(),
            latencies: Arc::new(Mutex::new(Latencies::new(capacity))),
            limit,
            percentile,
            retention,
            prune: Debounce::new(retention, lifetime.clone()),
            _guard: lifetime.drop_guard(),
        }
    }

    /// The latency at the configured percentile of the current samples.
    pub fn latency(&self) -> Duration {
        self.latencies.lock().unwrap().at(self.percentile)
    }

    pub fn samples(&self) -> usize {
        self.latencies.lock().unwrap().len()
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    pub fn percentile(&self) -> f64 {
        self.percentile
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }
}

#[async_trait]
impl Throttler for Percentile {
    async fn acquire(&self, ctx: &Context) -> Result<(), ThrottleError> {
        let latency = self.latency();
        if latency > self.limit {
            let latencies = self.latencies.clone();
            self.prune.schedule(move || {
                latencies.lock().unwrap().prune();
                tracing::trace!("latency samples pruned");
            });
            tracing::debug!(?latency, limit = ?self.limit, "percentile limit exceeded");
            return Err(ThrottleError::Latency {
                latency,
                limit: self.limit,
            });
        }
        stamp(self.id, ctx);
        Ok(())
    }

    async fn release(&self, ctx: &Context) -> Result<(), ThrottleError> {
        let measured = elapsed(self.id, ctx);
        self.latencies.lock().unwrap().push(measured);
        Ok(())
    }

    fn accept(&self, visitor: &mut dyn Visitor) {
        visitor.visit_percentile(self)
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::sleep;

    use super::*;

    const MS: Duration = Duration::from_millis(1);

    fn ago(d: Duration) -> Context {
        Context::background().with_timestamp(Instant::now() - d)
    }

    #[tokio::test(start_paused = true)]
    async fn latency_throttles_above_limit() {
        let thr = Latency::new(MS, 5 * MS);

        let ctx = ago(5 * MS);
        thr.acquire(&ctx).await.unwrap();
        thr.release(&ctx).await.unwrap();
        assert_eq!(thr.latency(), 5 * MS);

        for _ in 0..2 {
            let ctx = Context::background();
            assert!(matches!(
                thr.acquire(&ctx).await,
                Err(ThrottleError::Latency { .. })
            ));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn latency_resets_after_retention() {
        let thr = Latency::new(MS, 3 * MS);

        let ctx = ago(5 * MS);
        thr.acquire(&ctx).await.unwrap();
        thr.release(&ctx).await.unwrap();
        assert!(thr.acquire(&Context::background()).await.is_err());

        sleep(4 * MS).await;
        assert_eq!(thr.latency(), Duration::ZERO);
        assert!(thr.acquire(&Context::background()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn latency_measures_from_acquire() {
        let thr = Latency::new(10 * MS, 50 * MS);
        let ctx = Context::background();

        thr.acquire(&ctx).await.unwrap();
        sleep(2 * MS).await;
        thr.release(&ctx).await.unwrap();
        assert!(thr.latency() >= 2 * MS);
    }

    #[tokio::test(start_paused = true)]
    async fn percentile_throttles_above_limit() {
        let thr = Percentile::new(3 * MS, 10, 0.5, 7 * MS);
        let stamps = [Duration::ZERO, 5 * MS, 5 * MS, MS];
        let expected = [true, true, false, false, false];

        for (i, ok) in expected.into_iter().enumerate() {
            let ctx = match stamps.get(i) {
                Some(d) => ago(*d),
                None => Context::background(),
            };
            assert_eq!(thr.acquire(&ctx).await.is_ok(), ok, "call {i}");
            thr.release(&ctx).await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn percentile_prunes_after_retention() {
        let thr = Percentile::new(3 * MS, 10, 1.5, 5 * MS);
        assert_eq!(thr.percentile(), 1.0);

        let ctx = ago(5 * MS);
        thr.acquire(&ctx).await.unwrap();
        thr.release(&ctx).await.unwrap();
        assert!(thr.acquire(&Context::background()).await.is_err());

        sleep(7 * MS).await;
        assert_eq!(thr.samples(), 0);
        assert!(thr.acquire(&Context::background()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn percentile_window_is_bounded() {
        let thr = Percentile::new(3 * MS, 1, 0.5, 7 * MS);
        let stamps = [Duration::ZERO, 5 * MS, MS, 5 * MS];
        let expected = [true, true, false, true, false];

        for (i, ok) in expected.into_iter().enumerate() {
            let ctx = match stamps.get(i) {
                Some(d) => ago(*d),
                None => Context::background(),
            };
            assert_eq!(thr.acquire(&ctx).await.is_ok(), ok, "call {i}");
            thr.release(&ctx).await.unwrap();
        }
        assert_eq!(thr.samples(), 1);
    }
}
