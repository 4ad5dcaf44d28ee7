//! kvmini load engine
//!
//! Generates synthetic chat-completion traffic against an OpenAI-compatible
//! endpoint under controlled arrival patterns, records per-request timing,
//! and protects one tenant's traffic with a rolling-p95 admission guard.

pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod guard;
pub mod results;
pub mod run;
pub mod schedule;

// Re-export commonly used types
pub use dispatch::{Dispatcher, RequestTask, RunClock, TenantId};
pub use error::{ConfigError, EngineError};
pub use executor::{HttpExecutor, RequestExecutor};
pub use guard::{AdmissionGuard, RollingPercentileTracker};
pub use results::{RequestOutcome, RequestRecord, ResultCollector};
pub use run::{RunReport, run_fairness, run_loadtest};
pub use schedule::ArrivalPattern;
