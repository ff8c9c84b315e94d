use async_trait::async_trait;

use crate::{
    context::Context,
    error::ThrottleError,
    limiter::{LimiterState, Slots},
    throttler::Visitor,
    Throttler,
};

fn capacity(limit: u64) -> u32 {
    limit.min(u32::MAX as u64) as u32
}

/// Caps the number of calls in flight, failing fast once the cap is reached.
#[derive(Debug)]
pub struct Running {
    slots: Slots,
}

impl Running {
    pub fn new(limit: u64) -> Self {
        Self {
            slots: Slots::new(capacity(limit)),
        }
    }

    pub fn state(&self) -> LimiterState {
        self.slots.state()
    }
}

#[async_trait]
impl Throttler for Running {
    async fn acquire(&self, _ctx: &Context) -> Result<(), ThrottleError> {
        self.slots.try_take().map_err(|running| {
            let limit = self.slots.state().limit() as u64;
            tracing::debug!(running, limit, "running limit reached");
            ThrottleError::Running {
                running: running as u64,
                limit,
            }
        })
    }

    async fn release(&self, _ctx: &Context) -> Result<(), ThrottleError> {
        self.slots.give().inspect_err(|_| {
            tracing::warn!("running release without a matching acquire");
        })
    }

    fn accept(&self, visitor: &mut dyn Visitor) {
        visitor.visit_running(self)
    }
}

/// Caps the number of calls in flight, making callers wait for a free slot.
///
/// A waiting Acquire gives up when its call context is cancelled or expires.
#[derive(Debug)]
pub struct Buffered {
    slots: Slots,
}

impl Buffered {
    pub fn new(capacity: u64) -> Self {
        assert!(capacity > 0, "buffer capacity must be greater than 0");
        Self {
            slots: Slots::new(self::capacity(capacity)),
        }
    }

    pub fn state(&self) -> LimiterState {
        self.slots.state()
    }
}

#[async_trait]
impl Throttler for Buffered {
    async fn acquire(&self, ctx: &Context) -> Result<(), ThrottleError> {
        self.slots.take(ctx).await
    }

    async fn release(&self, _ctx: &Context) -> Result<(), ThrottleError> {
        self.slots.give().inspect_err(|_| {
            tracing::warn!("buffered release without a matching acquire");
        })
    }

    fn accept(&self, visitor: &mut dyn Visitor) {
        visitor.visit_buffered(self)
    }
}

/// Splits a total capacity into priority lanes, lane `i` holding a share proportional to `i`.
///
/// Calls pick their lane by [Context::priority] and wait there for a free slot, so higher
/// priorities get more concurrency.
#[derive(Debug)]
pub struct Priority {
    size: u64,
    lanes: Vec<Slots>,
}

impl Priority {
    /// `lanes` of 0 is treated as a single lane.
    pub fn new(size: u64, lanes: u8) -> Self {
        let lanes = lanes.max(1);
        let sum = lanes as u64 * (lanes as u64 + 1) / 2;
        let koef = size.div_ceil(sum);
        Self {
            size,
            lanes: (1..=lanes as u64)
                .map(|lane| Slots::new(capacity(lane * koef)))
                .collect(),
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn lanes(&self) -> u8 {
        self.lanes.len() as u8
    }

    /// The state of the lane serving `priority`, clamped like call priorities are.
    pub fn state(&self, priority: u8) -> LimiterState {
        self.lane(priority).state()
    }

    fn lane(&self, priority: u8) -> &Slots {
        let priority = priority.clamp(1, self.lanes());
        &self.lanes[priority as usize - 1]
    }
}

#[async_trait]
impl Throttler for Priority {
    async fn acquire(&self, ctx: &Context) -> Result<(), ThrottleError> {
        let priority = ctx.priority(self.lanes());
        self.lane(priority).take(ctx).await
    }

    async fn release(&self, ctx: &Context) -> Result<(), ThrottleError> {
        let priority = ctx.priority(self.lanes());
        self.lane(priority).give().inspect_err(|_| {
            tracing::warn!(priority, "priority release without a matching acquire");
        })
    }

    fn accept(&self, visitor: &mut dyn Visitor) {
        visitor.visit_priority(self)
    }
}
