//! Background actions bound to a lifetime token.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::{
    task::JoinHandle,
    time::{interval_at, sleep_until, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

/// Run `action` every `period`, starting one period from now, until `lifetime` is cancelled.
///
/// Must be called from within a tokio runtime.
pub(crate) fn periodic<F>(lifetime: CancellationToken, period: Duration, mut action: F) -> JoinHandle<()>
where
    F: FnMut() + Send + 'static,
{
    assert!(!period.is_zero(), "periodic loop needs a non-zero period");

    tokio::spawn(async move {
        let mut ticks = interval_at(Instant::now() + period, period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = lifetime.cancelled() => break,
                _ = ticks.tick() => action(),
            }
        }
        tracing::debug!(?period, "periodic loop stopped");
    })
}

/// Fires an action once a quiet period has elapsed since the last [schedule](Debounce::schedule).
///
/// Rescheduling while a timer is pending only pushes its deadline back; at most one timer
/// task is ever in flight. Nothing fires after the lifetime token is cancelled.
pub(crate) struct Debounce {
    quiet: Duration,
    lifetime: CancellationToken,
    pending: Arc<Mutex<Option<Instant>>>,
}

impl Debounce {
    pub(crate) fn new(quiet: Duration, lifetime: CancellationToken) -> Self {
        Self {
            quiet,
            lifetime,
            pending: Arc::default(),
        }
    }

    /// (Re)arm the timer; `action` runs once the quiet period passes without another call.
    ///
    /// When a timer is already pending, its original action is kept and `action` is dropped.
    /// Must be called from within a tokio runtime.
    pub(crate) fn schedule<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let deadline = Instant::now() + self.quiet;
        {
            let mut pending = self.pending.lock().unwrap();
            if let Some(current) = pending.as_mut() {
                *current = deadline;
                return;
            }
            *pending = Some(deadline);
        }

        let pending = self.pending.clone();
        let lifetime = self.lifetime.clone();
        tokio::spawn(async move {
            let mut deadline = deadline;
            loop {
                tokio::select! {
                    biased;
                    _ = lifetime.cancelled() => return,
                    _ = sleep_until(deadline) => {}
                }

                let mut guard = pending.lock().unwrap();
                match *guard {
                    Some(current) if current > deadline => deadline = current,
                    _ => {
                        *guard = None;
                        break;
                    }
                }
            }
            if !lifetime.is_cancelled() {
                action();
            }
        });
    }

    /// Whether a timer is waiting to fire.
    #[cfg(test)]
    pub(crate) fn is_pending(&self) -> bool {
        self.pending.lock().unwrap().is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use tokio::time::sleep;

    use super::*;

    const MS: Duration = Duration::from_millis(1);

    #[tokio::test(start_paused = true)]
    async fn periodic_stops_on_cancel() {
        let lifetime = CancellationToken::new();
        let count = Arc::new(AtomicU64::new(0));
        let handle = {
            let count = count.clone();
            periodic(lifetime.clone(), 2 * MS, move || {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };

        sleep(MS).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        sleep(6 * MS).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        lifetime.cancel();
        lifetime.cancel();
        handle.await.unwrap();
        sleep(10 * MS).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_coalesces() {
        let debounce = Debounce::new(5 * MS, CancellationToken::new());
        let fired = Arc::new(AtomicU64::new(0));

        for _ in 0..3 {
            let fired = fired.clone();
            debounce.schedule(move || {
                fired.fetch_add(1, Ordering::SeqCst);
            });
            sleep(3 * MS).await;
        }
        assert!(debounce.is_pending());
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        sleep(3 * MS).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!debounce.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_never_fires_after_cancel() {
        let lifetime = CancellationToken::new();
        let debounce = Debounce::new(2 * MS, lifetime.clone());
        let fired = Arc::new(AtomicU64::new(0));
        {
            let fired = fired.clone();
            debounce.schedule(move || {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }

        lifetime.cancel();
        sleep(5 * MS).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
