use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use dashmap::DashMap;
use regex::Regex;

use crate::{
    context::{Context, Key, PolicyId},
    error::ThrottleError,
    throttler::Visitor,
    Throttler,
};

type Factory = Box<dyn Fn(&Key) -> Box<dyn Throttler> + Send + Sync>;

/// Gives every distinct call key its own throttler, created on first use.
///
/// Creation is race free: concurrent first calls for one key build exactly one child.
pub struct Keyed {
    keys: DashMap<Key, Arc<dyn Throttler>>,
    factory: Factory,
}

impl Keyed {
    pub fn new<F, T>(factory: F) -> Self
    where
        F: Fn(&Key) -> T + Send + Sync + 'static,
        T: Throttler + 'static,
    {
        Self {
            keys: DashMap::new(),
            factory: Box::new(move |key: &Key| -> Box<dyn Throttler> { Box::new(factory(key)) }),
        }
    }

    /// The number of keys seen so far.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// The throttler serving `key`, if one was created.
    pub fn get(&self, key: &Key) -> Option<Arc<dyn Throttler>> {
        self.keys.get(key).map(|entry| entry.value().clone())
    }

    /// Visit a snapshot of every keyed child.
    pub fn for_each(&self, mut f: impl FnMut(&Key, &dyn Throttler)) {
        let children: Vec<_> = self
            .keys
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        for (key, child) in &children {
            f(key, child.as_ref());
        }
    }
}

#[async_trait]
impl Throttler for Keyed {
    async fn acquire(&self, ctx: &Context) -> Result<(), ThrottleError> {
        let key = ctx.key().ok_or(ThrottleError::MissingKey)?;
        // the shard lock is held while the factory runs and dropped before awaiting
        let child = self
            .keys
            .entry(key.clone())
            .or_insert_with(|| {
                tracing::debug!(%key, "keyed throttler created");
                Arc::from((self.factory)(key))
            })
            .value()
            .clone();
        child.acquire(ctx).await
    }

    async fn release(&self, ctx: &Context) -> Result<(), ThrottleError> {
        let key = ctx.key().ok_or(ThrottleError::MissingKey)?;
        let child = self.get(key).ok_or(ThrottleError::NothingToRelease)?;
        child.release(ctx).await
    }

    fn accept(&self, visitor: &mut dyn Visitor) {
        visitor.visit_keyed(self)
    }
}

/// Routes calls by text key to the first throttler whose pattern matches.
pub struct Pattern {
    patterns: Vec<(Regex, Box<dyn Throttler>)>,
}

impl Pattern {
    pub fn new() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    /// Append a route; routes are tried in insertion order.
    pub fn with(mut self, pattern: Regex, throttler: impl Throttler + 'static) -> Self {
        self.patterns.push((pattern, Box::new(throttler)));
        self
    }

    pub fn routes(&self) -> impl Iterator<Item = (&Regex, &dyn Throttler)> {
        self.patterns
            .iter()
            .map(|(pattern, throttler)| (pattern, throttler.as_ref()))
    }

    fn route(&self, ctx: &Context) -> Result<&dyn Throttler, ThrottleError> {
        let key = ctx
            .key()
            .and_then(Key::as_str)
            .ok_or(ThrottleError::MissingKey)?;
        self.patterns
            .iter()
            .find(|(pattern, _)| pattern.is_match(key))
            .map(|(_, throttler)| throttler.as_ref())
            .ok_or(ThrottleError::NoPattern)
    }
}

impl Default for Pattern {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Throttler for Pattern {
    async fn acquire(&self, ctx: &Context) -> Result<(), ThrottleError> {
        self.route(ctx)?.acquire(ctx).await
    }

    async fn release(&self, ctx: &Context) -> Result<(), ThrottleError> {
        self.route(ctx)?.release(ctx).await
    }

    fn accept(&self, visitor: &mut dyn Visitor) {
        visitor.visit_pattern(self)
    }
}

/// Rotates calls over its children in turn.
///
/// Release goes to the child picked by the paired Acquire on the same call context.
pub struct Ring {
    id: PolicyId,
    next: AtomicUsize,
    children: Vec<Box<dyn Throttler>>,
}

impl Ring {
    pub fn new(children: Vec<Box<dyn Throttler>>) -> Self {
        Self {
            id: PolicyId::next(),
            next: AtomicUsize::new(0),
            children,
        }
    }

    pub fn children(&self) -> impl Iterator<Item = &dyn Throttler> {
        self.children.iter().map(|child| child.as_ref())
    }
}

#[async_trait]
impl Throttler for Ring {
    async fn acquire(&self, ctx: &Context) -> Result<(), ThrottleError> {
        if self.children.is_empty() {
            return Err(ThrottleError::EmptyRing);
        }
        let index = self.next.fetch_add(1, Ordering::AcqRel) % self.children.len();
        self.children[index].acquire(ctx).await?;
        ctx.mark(self.id, index);
        Ok(())
    }

    async fn release(&self, ctx: &Context) -> Result<(), ThrottleError> {
        if self.children.is_empty() {
            return Err(ThrottleError::EmptyRing);
        }
        let index = ctx
            .take_mark::<usize>(self.id)
            .ok_or(ThrottleError::NothingToRelease)?;
        self.children[index].release(ctx).await
    }

    fn accept(&self, visitor: &mut dyn Visitor) {
        visitor.visit_ring(self)
    }
}
