use async_trait::async_trait;

use crate::{
    context::Context,
    error::ThrottleError,
    throttlers::{
        Adaptive, After, And, Before, Buffered, Cancel, Chance, Each, Echo, Enqueue, Fixed,
        Keyed, Latency, Metric, Monitor, Not, Or, Panic, Pattern, Percentile, Priority, Ring,
        Running, Square, Suppress, Timed, Wait,
    },
};

/// An admission policy.
///
/// Call [acquire](Throttler::acquire) before the protected work. If it succeeds, call
/// [release](Throttler::release) exactly once afterwards, with the same context or a clone of
/// it. Contexts built with `with_*` are new calls and cannot release an earlier Acquire.
///
/// Implementations are shared by all concurrent callers for the lifetime of the protected
/// resource.
#[async_trait]
pub trait Throttler: Send + Sync {
    /// Decide whether the call may proceed.
    async fn acquire(&self, ctx: &Context) -> Result<(), ThrottleError>;

    /// Account for the completion of a call admitted by [acquire](Throttler::acquire).
    async fn release(&self, ctx: &Context) -> Result<(), ThrottleError>;

    /// Hand this policy to the matching [Visitor] method.
    fn accept(&self, visitor: &mut dyn Visitor);
}

#[async_trait]
impl<T: Throttler + ?Sized> Throttler for Box<T> {
    async fn acquire(&self, ctx: &Context) -> Result<(), ThrottleError> {
        (**self).acquire(ctx).await
    }

    async fn release(&self, ctx: &Context) -> Result<(), ThrottleError> {
        (**self).release(ctx).await
    }

    fn accept(&self, visitor: &mut dyn Visitor) {
        (**self).accept(visitor)
    }
}

#[async_trait]
impl<T: Throttler + ?Sized> Throttler for std::sync::Arc<T> {
    async fn acquire(&self, ctx: &Context) -> Result<(), ThrottleError> {
        (**self).acquire(ctx).await
    }

    async fn release(&self, ctx: &Context) -> Result<(), ThrottleError> {
        (**self).release(ctx).await
    }

    fn accept(&self, visitor: &mut dyn Visitor) {
        (**self).accept(visitor)
    }
}

/// Read-only introspection over a throttler tree.
///
/// Every policy calls exactly one of these methods from [Throttler::accept]. All methods do
/// nothing by default, so a visitor only implements the variants it cares about. Composite
/// policies expose their children; descending into them is up to the visitor.
#[allow(unused_variables)]
pub trait Visitor {
    fn visit_echo(&mut self, thr: &Echo) {}
    fn visit_wait(&mut self, thr: &Wait) {}
    fn visit_square(&mut self, thr: &Square) {}
    fn visit_cancel(&mut self, thr: &Cancel) {}
    fn visit_panic(&mut self, thr: &Panic) {}
    fn visit_each(&mut self, thr: &Each) {}
    fn visit_before(&mut self, thr: &Before) {}
    fn visit_after(&mut self, thr: &After) {}
    fn visit_chance(&mut self, thr: &Chance) {}
    fn visit_fixed(&mut self, thr: &Fixed) {}
    fn visit_running(&mut self, thr: &Running) {}
    fn visit_buffered(&mut self, thr: &Buffered) {}
    fn visit_priority(&mut self, thr: &Priority) {}
    fn visit_timed(&mut self, thr: &Timed) {}
    fn visit_latency(&mut self, thr: &Latency) {}
    fn visit_percentile(&mut self, thr: &Percentile) {}
    fn visit_monitor(&mut self, thr: &Monitor) {}
    fn visit_metric(&mut self, thr: &Metric) {}
    fn visit_enqueue(&mut self, thr: &Enqueue) {}
    fn visit_adaptive(&mut self, thr: &Adaptive) {}
    fn visit_keyed(&mut self, thr: &Keyed) {}
    fn visit_pattern(&mut self, thr: &Pattern) {}
    fn visit_ring(&mut self, thr: &Ring) {}
    fn visit_or(&mut self, thr: &Or) {}
    fn visit_and(&mut self, thr: &And) {}
    fn visit_not(&mut self, thr: &Not) {}
    fn visit_suppress(&mut self, thr: &Suppress) {}
}
