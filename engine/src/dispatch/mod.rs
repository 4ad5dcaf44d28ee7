//! Bounded-concurrency dispatch of scheduled requests
//!
//! This module provides:
//! - `RequestTask` and `TenantId`, the unit of work and its owner
//! - `RunClock`, the shared test-start reference every task waits against
//! - `Dispatcher`, which runs one Tokio task per request behind a semaphore,
//!   consults the admission guard and feeds the result collector

mod dispatcher;
mod task;

pub use dispatcher::{DEFAULT_THROTTLE_DELAY, DispatchConfig, DispatchError, Dispatcher};
pub use task::{FAR_FUTURE, RequestTask, RunClock, TenantId, tasks_from_offsets};
