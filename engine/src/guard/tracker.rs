//! Fixed-capacity sliding window over recent latency samples

use std::collections::VecDeque;
use std::time::Duration;

/// Default number of samples kept in the window
pub const DEFAULT_WINDOW: usize = 50;

/// Rolling window of the most recent `capacity` latencies, in completion order.
///
/// Percentiles are computed lazily by sorting a copy of the window, which is
/// cheap for the small windows the guard uses.
#[derive(Debug, Clone)]
pub struct RollingPercentileTracker {
    samples: VecDeque<Duration>,
    capacity: usize,
}

impl RollingPercentileTracker {
    /// Create an empty tracker. A zero capacity is bumped to one sample.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest one on overflow
    pub fn add(&mut self, sample: Duration) {
        self.samples.push_back(sample);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    /// Value at rank `floor(p * (len - 1))` of the sorted window, `p` in `[0, 1]`
    pub fn percentile(&self, p: f64) -> Option<Duration> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted: Vec<Duration> = self.samples.iter().copied().collect();
        sorted.sort_unstable();

        let p = p.clamp(0.0, 1.0);
        let rank = (p * (sorted.len() - 1) as f64).floor() as usize;
        sorted.get(rank.min(sorted.len() - 1)).copied()
    }

    pub fn p95(&self) -> Option<Duration> {
        self.percentile(0.95)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples from oldest to newest
    pub fn samples(&self) -> impl Iterator<Item = Duration> + '_ {
        self.samples.iter().copied()
    }
}

impl Default for RollingPercentileTracker {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}
