use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Notify;

use crate::{context::Context, error::ThrottleError};

/// A bounded pool of slots.
///
/// Slots are taken before a job runs and given back once it finishes. Taking can either fail
/// immediately when the pool is full ([Slots::try_take]) or wait for a slot to be given back
/// ([Slots::take]).
#[derive(Debug)]
pub(crate) struct Slots {
    // first 32 bits are the capacity, second 32 bits are the in-flight
    limits: AtomicU64,
    waiters: Notify,
}

/// A snapshot of the state of a slot pool.
///
/// Not guaranteed to be consistent under high concurrency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterState {
    limit: u32,
    available: u32,
    in_flight: u32,
}

impl Slots {
    pub(crate) fn new(capacity: u32) -> Self {
        Self {
            limits: AtomicU64::new((capacity as u64) << 32),
            waiters: Notify::new(),
        }
    }

    /// Try to immediately take a slot.
    ///
    /// Returns the occupied slots if the pool is full.
    pub(crate) fn try_take(&self) -> Result<(), u32> {
        let mut curr = self.limits.load(Ordering::Acquire);
        loop {
            let limit = (curr >> 32) as u32;
            let in_flight = curr as u32;
            if in_flight >= limit {
                return Err(in_flight);
            }

            match self.limits.compare_exchange(
                curr,
                curr + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => curr = actual,
            }
        }
    }

    /// Take a slot, waiting for one to be given back if the pool is full.
    ///
    /// Gives up with the context error once `ctx` is done; an abandoned wait holds no slot.
    pub(crate) async fn take(&self, ctx: &Context) -> Result<(), ThrottleError> {
        loop {
            let notified = self.waiters.notified();
            tokio::pin!(notified);
            // register before checking so a concurrent give is never missed
            notified.as_mut().enable();

            if self.try_take().is_ok() {
                return Ok(());
            }

            tokio::select! {
                _ = &mut notified => {}
                err = ctx.done() => return Err(err),
            }
        }
    }

    /// Give a slot back, waking one waiter.
    pub(crate) fn give(&self) -> Result<(), ThrottleError> {
        let mut curr = self.limits.load(Ordering::Acquire);
        loop {
            if curr as u32 == 0 {
                return Err(ThrottleError::NothingToRelease);
            }

            match self.limits.compare_exchange(
                curr,
                curr - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => curr = actual,
            }
        }
        self.waiters.notify_one();
        Ok(())
    }

    /// The current state of the pool.
    pub(crate) fn state(&self) -> LimiterState {
        let state = self.limits.load(Ordering::Relaxed);
        let limit = (state >> 32) as u32;
        let in_flight = state as u32;
        LimiterState {
            limit,
            available: limit.saturating_sub(in_flight),
            in_flight,
        }
    }
}

impl LimiterState {
    /// The number of slots in the pool.
    pub fn limit(&self) -> u32 {
        self.limit
    }
    /// The number of slots free to take.
    pub fn available(&self) -> u32 {
        self.available
    }
    /// The number of slots taken.
    pub fn in_flight(&self) -> u32 {
        self.in_flight
    }
}
