use std::{error::Error, sync::Arc, time::Duration};

use crate::throttlers::Stats;

/// Boxed error returned by external collaborators.
pub type BoxError = Box<dyn Error + Send + Sync>;

/// Collaborator error kept behind an [Arc] so that [ThrottleError] stays cheap to clone.
pub type SharedError = Arc<dyn Error + Send + Sync>;

/// Why a throttler refused a call, or why it could not account for one.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ThrottleError {
    #[error("throttler has reached periodic threshold {current}")]
    Periodic { current: u64 },
    #[error("throttler has not reached threshold yet {current} of {threshold}")]
    BelowThreshold { current: u64, threshold: u64 },
    #[error("throttler has exceed threshold {current} of {threshold}")]
    AboveThreshold { current: u64, threshold: u64 },
    #[error("throttler has reached chance threshold")]
    Chance,
    #[error("throttler has exceed running threshold {running} of {limit}")]
    Running { running: u64, limit: u64 },
    #[error("throttler has exceed latency threshold {latency:?} of {limit:?}")]
    Latency { latency: Duration, limit: Duration },
    #[error("throttler has exceed stats threshold: {stats}")]
    Resources { stats: Stats },
    #[error("throttler has reached metric threshold")]
    MetricReached,
    #[error("throttler has received internal errors")]
    AllFailed,
    #[error("throttler has received internal error: {0}")]
    Child(Box<ThrottleError>),
    #[error("throttler hasn't received any internal error")]
    NotInverted,

    #[error("throttler hasn't found any key")]
    MissingKey,
    #[error("throttler hasn't found any message")]
    MissingPayload,
    #[error("throttler hasn't found any pattern for key")]
    NoPattern,
    #[error("throttler hasn't found any index")]
    EmptyRing,

    #[error("throttler has nothing to release")]
    NothingToRelease,

    #[error("throttler hasn't found any stats: {0}")]
    StatsUnavailable(#[source] SharedError),
    #[error("throttler hasn't found any metric: {0}")]
    MetricUnavailable(#[source] SharedError),
    #[error("throttler hasn't encoded any message: {0}")]
    Encode(#[source] SharedError),
    #[error("throttler hasn't sent any message: {0}")]
    Enqueue(#[source] SharedError),

    #[error("throttler has received context error: context canceled")]
    Cancelled,
    #[error("throttler has received context error: deadline exceeded")]
    DeadlineExceeded,

    #[error("{0}")]
    Custom(Arc<str>),
}

/// Coarse classification of a [ThrottleError].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A limit was reached; the caller should back off.
    Threshold,
    /// The call context lacks something the policy requires.
    Malformed,
    /// Release was called without a matching held resource.
    Accounting,
    /// A collaborator (stats, gauge, encoder, queue) failed.
    Collaborator,
    /// The call context was cancelled or expired.
    Cancelled,
    /// An error value supplied by the user.
    Custom,
}

impl ThrottleError {
    /// Build a user supplied error, as returned by [Echo](crate::throttlers::Echo).
    pub fn custom(message: impl Into<Arc<str>>) -> Self {
        ThrottleError::Custom(message.into())
    }

    pub(crate) fn shared(err: BoxError) -> SharedError {
        Arc::from(err)
    }

    pub fn kind(&self) -> ErrorKind {
        use ThrottleError::*;
        match self {
            Periodic { .. }
            | BelowThreshold { .. }
            | AboveThreshold { .. }
            | Chance
            | Running { .. }
            | Latency { .. }
            | Resources { .. }
            | MetricReached
            | AllFailed
            | NotInverted => ErrorKind::Threshold,
            Child(inner) => inner.kind(),
            MissingKey | MissingPayload | NoPattern | EmptyRing => ErrorKind::Malformed,
            NothingToRelease => ErrorKind::Accounting,
            StatsUnavailable(_) | MetricUnavailable(_) | Encode(_) | Enqueue(_) => {
                ErrorKind::Collaborator
            }
            Cancelled | DeadlineExceeded => ErrorKind::Cancelled,
            Custom(_) => ErrorKind::Custom,
        }
    }
}
