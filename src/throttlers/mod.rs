//! Throttling policies.
//!
//! Leaf policies decide on their own state; composite policies own child throttlers and
//! combine their answers.

mod adaptive;
mod basic;
mod concurrency;
mod counting;
mod external;
mod latency;
mod logic;
mod routing;
mod timed;

pub use adaptive::Adaptive;
pub use basic::{Cancel, Echo, Panic, Square, Wait};
pub use concurrency::{Buffered, Priority, Running};
pub use counting::{After, Before, Chance, Each};
pub use external::{Enqueue, Enqueuer, Metric, Monitor, Gauge, Sampler, Stats};
pub use latency::{Latency, Percentile};
pub use logic::{All, And, Any, Not, Or, Suppress};
pub use routing::{Keyed, Pattern, Ring};
pub use timed::{Fixed, Timed};
