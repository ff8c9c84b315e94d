use std::future::Future;

use tokio::time::Instant;

use crate::{context::Context, error::ThrottleError, Throttler};

/// Sequences Acquire, the protected work and Release for a single caller.
///
/// The outcome of the work itself is not part of the result; only throttling failures are.
pub struct Runner<'t> {
    ctx: Context,
    throttler: &'t dyn Throttler,
    result: Result<(), ThrottleError>,
}

impl<'t> Runner<'t> {
    pub fn new(ctx: Context, throttler: &'t dyn Throttler) -> Self {
        Self {
            ctx,
            throttler,
            result: Ok(()),
        }
    }

    /// Run `work` if the throttler admits it, then release.
    ///
    /// Every run is a new call on the runner's context, stamped with the current instant
    /// unless the context already carries a timestamp. A failing Acquire skips the work. A
    /// failing Release replaces the result.
    pub async fn run<F, Fut>(&mut self, work: F)
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future,
    {
        // latency policies measure from this stamp
        let ctx = match self.ctx.timestamp() {
            Some(_) => self.ctx.call(),
            None => self.ctx.with_timestamp(Instant::now()),
        };
        if let Err(err) = self.throttler.acquire(&ctx).await {
            tracing::debug!(%err, "call throttled");
            self.result = Err(err);
            return;
        }
        let _ = work(ctx.clone()).await;
        self.result = self.throttler.release(&ctx).await.inspect_err(|err| {
            tracing::warn!(%err, "release failed");
        });
    }

    /// The throttling outcome of the last [run](Runner::run).
    pub fn result(&self) -> Result<(), ThrottleError> {
        self.result.clone()
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }
}

/// Run `work` once under `throttler`, see [Runner::run].
pub async fn run<F, Fut>(ctx: Context, throttler: &dyn Throttler, work: F) -> Result<(), ThrottleError>
where
    F: FnOnce(Context) -> Fut,
    Fut: Future,
{
    let mut runner = Runner::new(ctx, throttler);
    runner.run(work).await;
    runner.result
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        time::Duration,
    };

    use async_trait::async_trait;
    use tokio::time::sleep;

    use super::*;
    use crate::{
        throttler::Visitor,
        throttlers::{Echo, Latency, Running},
    };

    const MS: Duration = Duration::from_millis(1);

    /// Admits everything but refuses every release.
    struct LeakyRelease;

    #[async_trait]
    impl Throttler for LeakyRelease {
        async fn acquire(&self, _ctx: &Context) -> Result<(), ThrottleError> {
            Ok(())
        }

        async fn release(&self, _ctx: &Context) -> Result<(), ThrottleError> {
            Err(ThrottleError::NothingToRelease)
        }

        fn accept(&self, _visitor: &mut dyn Visitor) {}
    }

    #[tokio::test]
    async fn failed_acquire_skips_work() {
        let ran = Arc::new(AtomicBool::new(false));
        let thr = Echo::new(Some(ThrottleError::custom("test")));

        let result = run(Context::background(), &thr, |_ctx| {
            let ran = ran.clone();
            async move { ran.store(true, Ordering::SeqCst) }
        })
        .await;

        assert_eq!(result.unwrap_err().to_string(), "test");
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn work_runs_and_releases() {
        let thr = Running::new(1);
        let mut runner = Runner::new(Context::background(), &thr);

        for _ in 0..3 {
            runner
                .run(|_ctx| async { Err::<(), &str>("work errors are not throttling errors") })
                .await;
            assert!(runner.result().is_ok());
        }
        assert_eq!(thr.state().in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn every_run_measures_its_own_latency() {
        let thr = Latency::new(10 * MS, Duration::from_secs(1));
        let mut runner = Runner::new(Context::background(), &thr);

        for _ in 0..5 {
            runner.run(|_ctx| sleep(4 * MS)).await;
            assert!(runner.result().is_ok());
            assert!(thr.latency() >= 4 * MS && thr.latency() < 5 * MS);
        }
        assert!(runner.context().timestamp().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn caller_timestamp_is_kept() {
        let thr = Latency::new(10 * MS, Duration::from_secs(1));
        let stamped = Context::background().with_timestamp(Instant::now() - 20 * MS);
        let mut runner = Runner::new(stamped, &thr);

        runner.run(|_ctx| async {}).await;
        assert!(runner.result().is_ok());
        assert!(thr.latency() >= 20 * MS);
    }

    #[tokio::test]
    async fn failed_release_overrides_success() {
        let ran = Arc::new(AtomicBool::new(false));
        let result = run(Context::background(), &LeakyRelease, |_ctx| {
            let ran = ran.clone();
            async move { ran.store(true, Ordering::SeqCst) }
        })
        .await;

        assert!(ran.load(Ordering::SeqCst));
        assert!(matches!(result, Err(ThrottleError::NothingToRelease)));
    }
}
