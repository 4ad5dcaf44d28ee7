//! Percentile-based backpressure guard
//!
//! The guard has two states, normal and throttling, and moves between them on
//! a timer. Every completion feeds [`AdmissionGuard::observe`]; when the rolling
//! p95 exceeds the budget the throttle window is pushed to `now + cooldown`.
//! [`AdmissionGuard::should_throttle`] is a lock-free comparison against that
//! published deadline and never mutates state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use metrics::counter;
use tokio::time::Instant;
use tracing::{debug, info};

use super::tracker::{DEFAULT_WINDOW, RollingPercentileTracker};
use crate::error::ConfigError;

/// Default time a throttling decision stays active
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(2);

/// Guard tuning
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GuardConfig {
    /// Rolling p95 budget. `None` disables throttling entirely.
    pub p95_budget: Option<Duration>,
    /// Number of recent completions considered
    pub window: usize,
    /// How long throttling stays active after the last trigger
    pub cooldown: Duration,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            p95_budget: None,
            window: DEFAULT_WINDOW,
            cooldown: DEFAULT_COOLDOWN,
        }
    }
}

impl GuardConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window == 0 {
            return Err(ConfigError::invalid("guard window", "must be at least 1"));
        }
        if self.cooldown.is_zero() {
            return Err(ConfigError::invalid("guard cooldown", "must be positive"));
        }
        if let Some(budget) = self.p95_budget
            && budget.is_zero()
        {
            return Err(ConfigError::invalid("p95 budget", "must be positive"));
        }
        Ok(())
    }
}

/// Shared throttle decision unit.
///
/// The window update, the percentile computation and the deadline update run
/// under one mutex so concurrent completions never lose or duplicate samples.
/// The deadline is also published in an atomic (nanoseconds since the guard's
/// epoch, `0` meaning never) so readers do not contend with writers.
#[derive(Debug)]
pub struct AdmissionGuard {
    config: GuardConfig,
    epoch: Instant,
    window: Mutex<RollingPercentileTracker>,
    throttle_until: AtomicU64,
    triggers: AtomicU64,
}

impl AdmissionGuard {
    pub fn new(config: GuardConfig) -> Self {
        Self::with_epoch(config, Instant::now())
    }

    /// Create a guard whose deadlines are measured from `epoch`
    pub fn with_epoch(config: GuardConfig, epoch: Instant) -> Self {
        Self {
            config,
            epoch,
            window: Mutex::new(RollingPercentileTracker::new(config.window)),
            throttle_until: AtomicU64::new(0),
            triggers: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Record a completion latency observed now
    pub fn observe(&self, latency: Duration) -> bool {
        self.observe_at(latency, Instant::now())
    }

    /// Record a completion latency observed at `now`.
    ///
    /// Returns `true` when this observation (re)started the throttle window.
    pub fn observe_at(&self, latency: Duration, now: Instant) -> bool {
        let mut window = self.lock_window();
        window.add(latency);

        let Some(budget) = self.config.p95_budget else {
            return false;
        };
        let Some(p95) = window.p95() else {
            return false;
        };
        if p95 <= budget {
            return false;
        }

        let until = self.ticks(now + self.config.cooldown);
        // Never pull an existing deadline backwards if observations race
        self.throttle_until.fetch_max(until, Ordering::AcqRel);
        let count = self.triggers.fetch_add(1, Ordering::Relaxed) + 1;
        drop(window);

        counter!("kvmini_guard_triggers_total").increment(1);
        if count == 1 {
            info!(
                "Admission guard engaged: rolling p95 {:?} exceeds budget {:?}",
                p95, budget
            );
        } else {
            debug!(
                "Admission guard extended (trigger #{}): rolling p95 {:?}",
                count, p95
            );
        }
        true
    }

    /// Whether the constrained tenant should be held back now
    pub fn should_throttle(&self) -> bool {
        self.should_throttle_at(Instant::now())
    }

    pub fn should_throttle_at(&self, now: Instant) -> bool {
        self.ticks(now) < self.throttle_until.load(Ordering::Acquire)
    }

    /// Number of observations that (re)started the throttle window
    pub fn trigger_count(&self) -> u64 {
        self.triggers.load(Ordering::Relaxed)
    }

    /// Current rolling p95, `None` before the first completion
    pub fn rolling_p95(&self) -> Option<Duration> {
        self.lock_window().p95()
    }

    /// Number of samples currently held in the window
    pub fn window_len(&self) -> usize {
        self.lock_window().len()
    }

    fn lock_window(&self) -> MutexGuard<'_, RollingPercentileTracker> {
        // A panic while holding the lock cannot leave the window half-updated
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ticks(&self, at: Instant) -> u64 {
        at.saturating_duration_since(self.epoch).as_nanos() as u64
    }
}
