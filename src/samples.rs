use std::{collections::VecDeque, time::Duration};

/// A bounded window of the most recent latency samples with rank queries.
///
/// Samples are kept twice: in arrival order, so the oldest can be evicted once the window
/// is full, and sorted, so a rank query is an exact order statistic over the window.
#[derive(Debug, Clone)]
pub struct Latencies {
    capacity: usize,
    arrivals: VecDeque<Duration>,
    sorted: Vec<Duration>,
}

impl Latencies {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "latency window needs room for at least one sample");
        Self {
            capacity,
            arrivals: VecDeque::with_capacity(capacity),
            sorted: Vec::with_capacity(capacity),
        }
    }

    /// Record a sample, evicting the oldest one if the window is full.
    ///
    /// Linear in the window size; [Latencies::at] stays constant time.
    pub fn push(&mut self, latency: Duration) {
        if self.arrivals.len() == self.capacity {
            if let Some(oldest) = self.arrivals.pop_front() {
                if let Ok(at) = self.sorted.binary_search(&oldest) {
                    self.sorted.remove(at);
                }
            }
        }
        self.arrivals.push_back(latency);
        let at = self.sorted.partition_point(|sample| *sample <= latency);
        self.sorted.insert(at, latency);
    }

    /// The sample at `percentile` (in `[0, 1]`) of the window, or zero if it is empty.
    ///
    /// The rank is `round(len * percentile)`, capped at the largest sample.
    pub fn at(&self, percentile: f64) -> Duration {
        let len = self.sorted.len();
        if len == 0 {
            return Duration::ZERO;
        }
        let rank = (len as f64 * percentile.clamp(0.0, 1.0)).round() as usize;
        self.sorted[rank.min(len - 1)]
    }

    /// Drop every sample.
    pub fn prune(&mut self) {
        self.arrivals.clear();
        self.sorted.clear();
    }

    pub fn len(&self) -> usize {
        self.sorted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sorted.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
