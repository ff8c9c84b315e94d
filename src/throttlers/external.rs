//! Policies that consult collaborators outside the process: resource samplers, boolean
//! gauges and message queues.

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::{
    context::Context,
    error::{BoxError, ThrottleError},
    throttler::Visitor,
    Throttler,
};

/// A snapshot of process resource usage, also used as a set of watermarks.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Stats {
    /// Bytes of allocated heap memory.
    pub mem_alloc: u64,
    /// Bytes of memory obtained from the system.
    pub mem_system: u64,
    /// Average pause of the memory manager.
    pub avg_pause: Duration,
    /// Average cpu usage, in percent.
    pub avg_usage: f64,
}

impl Stats {
    /// Whether any dimension of `self` is at or above its watermark in `limit`.
    ///
    /// A zero watermark leaves its dimension unchecked.
    pub fn reaches(&self, limit: &Stats) -> bool {
        (limit.mem_alloc > 0 && self.mem_alloc >= limit.mem_alloc)
            || (limit.mem_system > 0 && self.mem_system >= limit.mem_system)
            || (!limit.avg_pause.is_zero() && self.avg_pause >= limit.avg_pause)
            || (limit.avg_usage > 0.0 && self.avg_usage >= limit.avg_usage)
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "alloc {} kb, system {} kb, avg pause {:?}, avg usage {:.2}%",
            self.mem_alloc / 1024,
            self.mem_system / 1024,
            self.avg_pause,
            self.avg_usage
        )
    }
}

/// Source of resource [Stats]; sampling cadence is up to the implementation.
#[async_trait]
pub trait Sampler: Send + Sync {
    async fn stats(&self) -> Result<Stats, BoxError>;
}

/// Boolean signal that asks callers to back off while it reads `true`.
#[async_trait]
pub trait Gauge: Send + Sync {
    async fn query(&self) -> Result<bool, BoxError>;
}

/// Queue that accepts encoded messages.
#[async_trait]
pub trait Enqueuer: Send + Sync {
    async fn enqueue(&self, message: Vec<u8>) -> Result<(), BoxError>;
}

/// Fails when resource usage reaches any of the configured watermarks.
pub struct Monitor {
    sampler: Arc<dyn Sampler>,
    limit: Stats,
}

impl Monitor {
    pub fn new(sampler: impl Sampler + 'static, limit: Stats) -> Self {
        Self {
            sampler: Arc::new(sampler),
            limit,
        }
    }

    pub fn limit(&self) -> &Stats {
        &self.limit
    }
}

#[async_trait]
impl Throttler for Monitor {
    async fn acquire(&self, _ctx: &Context) -> Result<(), ThrottleError> {
        let stats = self.sampler.stats().await.map_err(|err| {
            tracing::warn!(%err, "resource stats unavailable");
            ThrottleError::StatsUnavailable(ThrottleError::shared(err))
        })?;
        if stats.reaches(&self.limit) {
            tracing::debug!(%stats, "resource watermark reached");
            return Err(ThrottleError::Resources { stats });
        }
        Ok(())
    }

    async fn release(&self, _ctx: &Context) -> Result<(), ThrottleError> {
        Ok(())
    }

    fn accept(&self, visitor: &mut dyn Visitor) {
        visitor.visit_monitor(self)
    }
}

/// Fails while a [Gauge] reads `true`, or when it cannot be read.
pub struct Metric {
    gauge: Arc<dyn Gauge>,
}

impl Metric {
    pub fn new(gauge: impl Gauge + 'static) -> Self {
        Self {
            gauge: Arc::new(gauge),
        }
    }
}

#[async_trait]
impl Throttler for Metric {
    async fn acquire(&self, _ctx: &Context) -> Result<(), ThrottleError> {
        let reached = self.gauge.query().await.map_err(|err| {
            tracing::warn!(%err, "metric unavailable");
            ThrottleError::MetricUnavailable(ThrottleError::shared(err))
        })?;
        if reached {
            return Err(ThrottleError::MetricReached);
        }
        Ok(())
    }

    async fn release(&self, _ctx: &Context) -> Result<(), ThrottleError> {
        Ok(())
    }

    fn accept(&self, visitor: &mut dyn Visitor) {
        visitor.visit_metric(self)
    }
}

/// Diverts the call's payload into a queue instead of running it inline.
///
/// Requires both [Context::with_payload] and [Context::with_encoder] on the call context.
pub struct Enqueue {
    enqueuer: Arc<dyn Enqueuer>,
}

impl Enqueue {
    pub fn new(enqueuer: impl Enqueuer + 'static) -> Self {
        Self {
            enqueuer: Arc::new(enqueuer),
        }
    }
}

#[async_trait]
impl Throttler for Enqueue {
    async fn acquire(&self, ctx: &Context) -> Result<(), ThrottleError> {
        let (Some(payload), Some(encoder)) = (ctx.payload(), ctx.encoder()) else {
            return Err(ThrottleError::MissingPayload);
        };
        let message =
            encoder(payload).map_err(|err| ThrottleError::Encode(ThrottleError::shared(err)))?;
        self.enqueuer.enqueue(message).await.map_err(|err| {
            tracing::warn!(%err, "enqueue failed");
            ThrottleError::Enqueue(ThrottleError::shared(err))
        })
    }

    async fn release(&self, _ctx: &Context) -> Result<(), ThrottleError> {
        Ok(())
    }

    fn accept(&self, visitor: &mut dyn Visitor) {
        visitor.visit_enqueue(self)
    }
}
