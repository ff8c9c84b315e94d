//! Per-call metadata carried from Acquire to Release.
//!
//! A [Context] is immutable: every `with_*` method returns a new context that keeps all
//! previously attached fields.
//!
//! Each context also carries a call ledger, which is how policies pair a Release with the
//! Acquire that preceded it. Clones share the ledger, so a clone may be passed to Release.
//! Every `with_*` method and [Context::call] start a new, empty ledger, so contexts derived
//! from a common base are distinct calls.

use std::{
    any::Any,
    collections::HashMap,
    fmt,
    net::IpAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{BoxError, ThrottleError};

/// Opaque, comparable identity used for routing and partitioning.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Text(Arc<str>),
    Number(u64),
}

impl Key {
    /// The key as text, if it is a non-empty text key.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Key::Text(text) if !text.is_empty() => Some(text.as_ref()),
            _ => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Text(text) => f.write_str(text),
            Key::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::Text(value.into())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::Text(value.into())
    }
}

impl From<u64> for Key {
    fn from(value: u64) -> Self {
        Key::Number(value)
    }
}

impl From<IpAddr> for Key {
    fn from(value: IpAddr) -> Self {
        Key::Text(value.to_string().into())
    }
}

/// Arbitrary data attached to a call, see [Context::with_payload].
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Converts a [Payload] into bytes that can be handed to a queue.
pub type Encoder = Arc<dyn Fn(&Payload) -> Result<Vec<u8>, BoxError> + Send + Sync>;

/// Call-scoped metadata: cancellation, deadline, key, priority, timestamp and payload.
#[derive(Clone)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
    key: Option<Key>,
    priority: Option<u8>,
    timestamp: Option<Instant>,
    payload: Option<Payload>,
    encoder: Option<Encoder>,
    ledger: Arc<Ledger>,
}

impl Context {
    /// A context that is never cancelled and carries nothing.
    pub fn background() -> Self {
        Self::new(CancellationToken::new())
    }

    /// A context cancelled together with `token`.
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
            key: None,
            priority: None,
            timestamp: None,
            payload: None,
            encoder: None,
            ledger: Arc::default(),
        }
    }

    /// Derive a context that can be cancelled independently, returning its token.
    ///
    /// Cancelling the parent also cancels the child.
    pub fn with_cancel(&self) -> (Self, CancellationToken) {
        let token = self.token.child_token();
        let ctx = Self {
            token: token.clone(),
            ..self.call()
        };
        (ctx, token)
    }

    /// Expire the context at `deadline`; an earlier deadline already set is kept.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        };
        Self {
            deadline: Some(deadline),
            ..self.call()
        }
    }

    /// Expire the context `timeout` from now.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Attach the key used for routing and partitioning.
    pub fn with_key(&self, key: impl Into<Key>) -> Self {
        Self {
            key: Some(key.into()),
            ..self.call()
        }
    }

    /// Attach a call priority, see [Context::priority].
    pub fn with_priority(&self, priority: u8) -> Self {
        Self {
            priority: Some(priority),
            ..self.call()
        }
    }

    /// Attach the instant latency policies measure the call from.
    pub fn with_timestamp(&self, timestamp: Instant) -> Self {
        Self {
            timestamp: Some(timestamp),
            ..self.call()
        }
    }

    /// Attach data that can be diverted to a queue.
    pub fn with_payload(&self, payload: impl Any + Send + Sync) -> Self {
        Self {
            payload: Some(Arc::new(payload)),
            ..self.call()
        }
    }

    /// Attach the encoder that turns the payload into a queue message.
    pub fn with_encoder<F>(&self, encoder: F) -> Self
    where
        F: Fn(&Payload) -> Result<Vec<u8>, BoxError> + Send + Sync + 'static,
    {
        Self {
            encoder: Some(Arc::new(encoder)),
            ..self.call()
        }
    }

    /// A new call carrying the same fields, with an empty ledger.
    pub fn call(&self) -> Self {
        Self {
            ledger: Arc::default(),
            ..self.clone()
        }
    }

    /// The key attached with [Context::with_key].
    pub fn key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    /// The call priority clamped to `[1, lanes]`, defaulting to 1.
    pub fn priority(&self, lanes: u8) -> u8 {
        self.priority.unwrap_or(1).clamp(1, lanes.max(1))
    }

    /// The instant attached with [Context::with_timestamp].
    pub fn timestamp(&self) -> Option<Instant> {
        self.timestamp
    }

    /// The data attached with [Context::with_payload].
    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    /// The encoder attached with [Context::with_encoder].
    pub fn encoder(&self) -> Option<&Encoder> {
        self.encoder.as_ref()
    }

    /// The earliest deadline attached to the context.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The reason this context is done, if it is.
    pub fn err(&self) -> Option<ThrottleError> {
        if self.token.is_cancelled() {
            return Some(ThrottleError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ThrottleError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> ThrottleError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.token.cancelled() => ThrottleError::Cancelled,
                _ = tokio::time::sleep_until(deadline) => ThrottleError::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                ThrottleError::Cancelled
            }
        }
    }

    pub(crate) fn mark<T: Any + Send>(&self, owner: PolicyId, value: T) {
        self.ledger.push(owner, Box::new(value));
    }

    pub(crate) fn take_mark<T: Any + Send>(&self, owner: PolicyId) -> Option<T> {
        self.ledger.pop(owner)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("cancelled", &self.token.is_cancelled())
            .field("deadline", &self.deadline)
            .field("key", &self.key)
            .field("priority", &self.priority)
            .field("timestamp", &self.timestamp)
            .field("payload", &self.payload.is_some())
            .field("encoder", &self.encoder.is_some())
            .finish()
    }
}

/// Process-unique identity of a policy instance, used to key its call ledger marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct PolicyId(u64);

impl PolicyId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        PolicyId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Marks left by Acquire for the paired Release, LIFO per policy.
#[derive(Default)]
struct Ledger {
    marks: Mutex<HashMap<PolicyId, Vec<Box<dyn Any + Send>>>>,
}

impl Ledger {
    fn push(&self, owner: PolicyId, value: Box<dyn Any + Send>) {
        self.marks
            .lock()
            .unwrap()
            .entry(owner)
            .or_default()
            .push(value);
    }

    fn pop<T: Any>(&self, owner: PolicyId) -> Option<T> {
        let mut marks = self.marks.lock().unwrap();
        let stack = marks.get_mut(&owner)?;
        let value = stack.pop();
        if stack.is_empty() {
            marks.remove(&owner);
        }
        value?.downcast::<T>().ok().map(|value| *value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_are_additive() {
        let ctx = Context::background()
            .with_key("client")
            .with_priority(3)
            .with_payload(42u32);
        let ctx = ctx.with_key(7u64);

        assert_eq!(ctx.key(), Some(&Key::Number(7)));
        assert_eq!(ctx.priority(5), 3);
        assert_eq!(ctx.payload().unwrap().downcast_ref::<u32>(), Some(&42));
        assert!(ctx.encoder().is_none());
    }

    #[test]
    fn priority_is_clamped() {
        let ctx = Context::background();
        assert_eq!(ctx.priority(4), 1);
        assert_eq!(ctx.with_priority(0).priority(4), 1);
        assert_eq!(ctx.with_priority(9).priority(4), 4);
        assert_eq!(ctx.with_priority(9).priority(0), 1);
    }

    #[test]
    fn empty_text_key_is_not_text() {
        assert_eq!(Key::from("").as_str(), None);
        assert_eq!(Key::from(5u64).as_str(), None);
        assert_eq!(Key::from("a").as_str(), Some("a"));
    }

    #[test]
    fn clones_share_the_ledger() {
        let id = PolicyId::next();
        let ctx = Context::background();
        ctx.mark(id, 1usize);
        ctx.clone().mark(id, 2usize);

        assert_eq!(ctx.take_mark::<usize>(id), Some(2));
        assert_eq!(ctx.take_mark::<usize>(id), Some(1));
        assert_eq!(ctx.take_mark::<usize>(id), None);
    }

    #[test]
    fn derived_contexts_are_separate_calls() {
        let id = PolicyId::next();
        let base = Context::background().with_key("base");
        base.mark(id, 0usize);

        let a = base.with_key("a");
        let b = base.with_priority(2);
        let c = base.call();
        a.mark(id, 1usize);
        b.mark(id, 2usize);

        assert_eq!(c.take_mark::<usize>(id), None);
        assert_eq!(a.take_mark::<usize>(id), Some(1));
        assert_eq!(a.take_mark::<usize>(id), None);
        assert_eq!(b.take_mark::<usize>(id), Some(2));
        assert_eq!(base.take_mark::<usize>(id), Some(0));
        assert_eq!(c.key(), base.key());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_and_deadline() {
        let (ctx, token) = Context::background().with_cancel();
        assert!(ctx.err().is_none());
        token.cancel();
        assert!(matches!(ctx.err(), Some(ThrottleError::Cancelled)));

        let ctx = Context::background().with_timeout(Duration::from_millis(5));
        assert!(ctx.err().is_none());
        assert!(matches!(ctx.done().await, ThrottleError::DeadlineExceeded));
        assert!(matches!(ctx.err(), Some(ThrottleError::DeadlineExceeded)));
    }
}
