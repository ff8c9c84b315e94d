//! Boolean combinators over child throttlers.
//!
//! Note the naming inherited by the [All] and [Any] aliases: `All` admits a call when *any*
//! child admits it ([Or]), and `Any` rejects a call when *any* child rejects it ([And]).

use async_trait::async_trait;
use futures::future::join_all;

use crate::{
    context::{Context, PolicyId},
    error::ThrottleError,
    throttler::Visitor,
    Throttler,
};

/// Succeeds as soon as one child succeeds, trying children in order.
///
/// Release goes to the child that admitted the call. Succeeds on an empty list of children.
pub struct Or {
    id: PolicyId,
    children: Vec<Box<dyn Throttler>>,
}

/// Same policy as [Or].
pub type All = Or;

impl Or {
    pub fn new(children: Vec<Box<dyn Throttler>>) -> Self {
        Self {
            id: PolicyId::next(),
            children,
        }
    }

    pub fn children(&self) -> impl Iterator<Item = &dyn Throttler> {
        self.children.iter().map(|child| child.as_ref())
    }
}

#[async_trait]
impl Throttler for Or {
    async fn acquire(&self, ctx: &Context) -> Result<(), ThrottleError> {
        if self.children.is_empty() {
            return Ok(());
        }
        for (index, child) in self.children.iter().enumerate() {
            if child.acquire(ctx).await.is_ok() {
                ctx.mark(self.id, index);
                return Ok(());
            }
        }
        Err(ThrottleError::AllFailed)
    }

    async fn release(&self, ctx: &Context) -> Result<(), ThrottleError> {
        if self.children.is_empty() {
            return Ok(());
        }
        let index = ctx
            .take_mark::<usize>(self.id)
            .ok_or(ThrottleError::NothingToRelease)?;
        self.children[index].release(ctx).await
    }

    fn accept(&self, visitor: &mut dyn Visitor) {
        visitor.visit_or(self)
    }
}

/// Succeeds only if every child succeeds.
///
/// Children are run concurrently and all of them complete before the result is decided; the
/// first failure in child order is reported. A rejected call is released from the children
/// that admitted it. Succeeds on an empty list of children.
pub struct And {
    children: Vec<Box<dyn Throttler>>,
}

/// Same policy as [And].
pub type Any = And;

impl And {
    pub fn new(children: Vec<Box<dyn Throttler>>) -> Self {
        Self { children }
    }

    pub fn children(&self) -> impl Iterator<Item = &dyn Throttler> {
        self.children.iter().map(|child| child.as_ref())
    }

    fn decide(results: Vec<Result<(), ThrottleError>>) -> Result<(), ThrottleError> {
        match results.into_iter().find_map(Result::err) {
            Some(err) => Err(ThrottleError::Child(Box::new(err))),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Throttler for And {
    async fn acquire(&self, ctx: &Context) -> Result<(), ThrottleError> {
        let results = join_all(self.children.iter().map(|child| child.acquire(ctx))).await;
        if results.iter().all(Result::is_ok) {
            return Ok(());
        }
        let admitted = self
            .children
            .iter()
            .zip(&results)
            .filter(|(_, result)| result.is_ok())
            .map(|(child, _)| child.release(ctx));
        for err in join_all(admitted).await.into_iter().filter_map(Result::err) {
            tracing::warn!(%err, "release of a rejected call failed");
        }
        Self::decide(results)
    }

    async fn release(&self, ctx: &Context) -> Result<(), ThrottleError> {
        let results = join_all(self.children.iter().map(|child| child.release(ctx))).await;
        Self::decide(results)
    }

    fn accept(&self, visitor: &mut dyn Visitor) {
        visitor.visit_and(self)
    }
}

/// Inverts its child: succeeds when the child fails and fails when it succeeds.
pub struct Not {
    inner: Box<dyn Throttler>,
}

impl Not {
    pub fn new(inner: impl Throttler + 'static) -> Self {
        Self {
            inner: Box::new(inner),
        }
    }

    pub fn inner(&self) -> &dyn Throttler {
        self.inner.as_ref()
    }

    fn invert(result: Result<(), ThrottleError>) -> Result<(), ThrottleError> {
        match result {
            Ok(()) => Err(ThrottleError::NotInverted),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl Throttler for Not {
    async fn acquire(&self, ctx: &Context) -> Result<(), ThrottleError> {
        Self::invert(self.inner.acquire(ctx).await)
    }

    async fn release(&self, ctx: &Context) -> Result<(), ThrottleError> {
        Self::invert(self.inner.release(ctx).await)
    }

    fn accept(&self, visitor: &mut dyn Visitor) {
        visitor.visit_not(self)
    }
}

/// Runs its child for side effects only and always succeeds.
pub struct Suppress {
    inner: Box<dyn Throttler>,
}

impl Suppress {
    pub fn new(inner: impl Throttler + 'static) -> Self {
        Self {
            inner: Box::new(inner),
        }
    }

    pub fn inner(&self) -> &dyn Throttler {
        self.inner.as_ref()
    }
}

#[async_trait]
impl Throttler for Suppress {
    async fn acquire(&self, ctx: &Context) -> Result<(), ThrottleError> {
        if let Err(err) = self.inner.acquire(ctx).await {
            tracing::trace!(%err, "suppressed acquire error");
        }
        Ok(())
    }

    async fn release(&self, ctx: &Context) -> Result<(), ThrottleError> {
        if let Err(err) = self.inner.release(ctx).await {
            tracing::trace!(%err, "suppressed release error");
        }
        Ok(())
    }

    fn accept(&self, visitor: &mut dyn Visitor) {
        visitor.visit_suppress(self)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use tokio::time::Instant;

    use super::*;
    use crate::throttlers::{Echo, Running, Wait};

    fn pass() -> Box<dyn Throttler> {
        Box::new(Echo::new(None))
    }

    fn fail() -> Box<dyn Throttler> {
        Box::new(Echo::new(Some(ThrottleError::custom("test"))))
    }

    async fn admits(thr: &dyn Throttler) -> bool {
        let ctx = Context::background();
        let ok = thr.acquire(&ctx).await.is_ok();
        let _ = thr.release(&ctx).await;
        ok
    }

    #[tokio::test]
    async fn or_needs_one_success() {
        assert!(admits(&Or::new(vec![])).await);
        assert!(admits(&Or::new(vec![pass(), pass(), pass()])).await);
        assert!(admits(&Or::new(vec![fail(), pass(), fail()])).await);
        assert!(!admits(&All::new(vec![fail(), fail(), fail()])).await);
    }

    #[tokio::test]
    async fn and_needs_every_success() {
        assert!(admits(&And::new(vec![])).await);
        assert!(admits(&And::new(vec![pass(), pass(), pass()])).await);
        assert!(!admits(&And::new(vec![fail(), pass(), fail()])).await);
        assert!(!admits(&Any::new(vec![fail(), fail(), fail()])).await);
    }

    #[tokio::test]
    async fn and_reports_child_error() {
        let thr = And::new(vec![pass(), fail()]);
        let err = thr.acquire(&Context::background()).await.unwrap_err();
        assert!(matches!(&err, ThrottleError::Child(inner) if inner.to_string() == "test"));
    }

    #[tokio::test(start_paused = true)]
    async fn and_awaits_every_child_concurrently() {
        let thr = And::new(vec![
            Box::new(Wait::new(Duration::from_millis(3))),
            fail(),
            Box::new(Wait::new(Duration::from_millis(3))),
        ]);
        let start = Instant::now();
        assert!(thr.acquire(&Context::background()).await.is_err());
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(3));
        assert!(elapsed < Duration::from_millis(6));
    }

    #[tokio::test]
    async fn or_releases_the_admitting_child() {
        let thr = Or::new(vec![Box::new(Running::new(1)), Box::new(Running::new(1))]);
        let first = Context::background();
        let second = Context::background();

        thr.acquire(&first).await.unwrap();
        thr.acquire(&second).await.unwrap();
        assert!(thr.acquire(&Context::background()).await.is_err());

        // the second call went to the second child, so only that child frees up
        thr.release(&second).await.unwrap();
        let third = Context::background();
        thr.acquire(&third).await.unwrap();
        assert!(thr.acquire(&Context::background()).await.is_err());

        thr.release(&first).await.unwrap();
        thr.release(&third).await.unwrap();
        assert!(matches!(
            thr.release(&first).await,
            Err(ThrottleError::NothingToRelease)
        ));
        assert!(admits(&thr).await);
    }

    #[tokio::test]
    async fn and_rolls_back_a_rejected_call() {
        let running = Arc::new(Running::new(1));
        let thr = And::new(vec![Box::new(running.clone()), fail()]);

        for _ in 0..3 {
            assert!(thr.acquire(&Context::background()).await.is_err());
            assert_eq!(running.state().in_flight(), 0);
        }

        let thr = And::new(vec![Box::new(running.clone()), pass()]);
        let ctx = Context::background();
        thr.acquire(&ctx).await.unwrap();
        assert_eq!(running.state().in_flight(), 1);
        thr.release(&ctx).await.unwrap();
        assert_eq!(running.state().in_flight(), 0);
    }

    #[tokio::test]
    async fn not_inverts() {
        assert!(admits(&Not::new(Echo::new(Some(ThrottleError::custom("test"))))).await);
        assert!(!admits(&Not::new(Echo::new(None))).await);
    }

    #[tokio::test]
    async fn suppress_always_admits() {
        assert!(admits(&Suppress::new(Echo::new(Some(ThrottleError::custom("test"))))).await);
        assert!(admits(&Suppress::new(Echo::new(None))).await);
    }
}
