//! Admission control for multi-tenant runs
//!
//! This module provides:
//! - `RollingPercentileTracker`, a bounded FIFO of recent latencies
//! - `AdmissionGuard`, which throttles the constrained tenant while the
//!   rolling p95 is over budget

mod admission;
mod tracker;

pub use admission::{AdmissionGuard, DEFAULT_COOLDOWN, GuardConfig};
pub use tracker::{DEFAULT_WINDOW, RollingPercentileTracker};
