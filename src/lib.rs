//! Composable admission control for protecting shared resources.
//!
//! A [Throttler] decides whether a call may proceed. Callers [acquire](Throttler::acquire)
//! before the protected work and [release](Throttler::release) after it, passing a call
//! [Context] that carries cancellation, an optional key, priority, timestamp and payload.
//! Policies live in [throttlers] and compose into trees; [Runner] sequences a single call.
//!
//! ```no_run
//! use halt::{run, throttlers::{And, Running, Timed}, CancellationToken, Context};
//! use std::time::Duration;
//!
//! # async fn demo() {
//! let lifetime = CancellationToken::new();
//! let thr = And::new(vec![
//!     Box::new(Running::new(16)),
//!     Box::new(Timed::new(&lifetime, 100, Duration::from_secs(1))),
//! ]);
//! let result = run(Context::background(), &thr, |_ctx| async { /* work */ }).await;
//! # let _ = result;
//! # }
//! ```

mod context;
mod error;
mod limiter;
pub mod meta;
mod runner;
mod samples;
mod schedule;
mod throttler;
pub mod throttlers;

pub use context::{Context, Encoder, Key, Payload};
pub use error::{BoxError, ErrorKind, SharedError, ThrottleError};
pub use limiter::LimiterState;
pub use runner::{run, Runner};
pub use samples::Latencies;
pub use throttler::{Throttler, Visitor};
pub use tokio_util::sync::CancellationToken;
