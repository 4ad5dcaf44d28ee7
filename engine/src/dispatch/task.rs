//! Request tasks and the clock that releases them

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::time::Instant;

/// Latest deadline a task can be given, about thirty years out
pub const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Name of a traffic source in a multi-tenant run
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// One request to dispatch
#[derive(Debug, Clone, PartialEq)]
pub struct RequestTask {
    /// 1-based sequence id, unique within a run
    pub id: u64,
    /// `None` for single-tenant load tests
    pub tenant: Option<TenantId>,
    /// Seconds after test start at which the request becomes eligible
    pub offset: f64,
    /// Whether the admission guard may hold this request back
    pub constrained: bool,
}

impl RequestTask {
    pub fn new(id: u64, offset: f64) -> Self {
        Self {
            id,
            tenant: None,
            offset,
            constrained: false,
        }
    }

    pub fn for_tenant(mut self, tenant: TenantId, constrained: bool) -> Self {
        self.tenant = Some(tenant);
        self.constrained = constrained;
        self
    }
}

/// Build tasks for a list of offsets, numbering them from `first_id`
pub fn tasks_from_offsets(offsets: &[f64], first_id: u64) -> Vec<RequestTask> {
    offsets
        .iter()
        .zip(first_id..)
        .map(|(&offset, id)| RequestTask::new(id, offset))
        .collect()
}

/// Shared test-start reference.
///
/// Offsets are measured against the monotonic `epoch`; wall-clock timestamps
/// are derived from it so every recorded time lines up with the schedule.
#[derive(Debug, Clone, Copy)]
pub struct RunClock {
    epoch: Instant,
    start_unix_ms: f64,
}

impl RunClock {
    pub fn start() -> Self {
        let start_unix_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64() * 1000.0)
            .unwrap_or(0.0);
        Self {
            epoch: Instant::now(),
            start_unix_ms,
        }
    }

    pub fn epoch(&self) -> Instant {
        self.epoch
    }

    /// Test start in seconds since the unix epoch
    pub fn test_start_time(&self) -> f64 {
        self.start_unix_ms / 1000.0
    }

    /// Instant at which a task with `offset` seconds becomes eligible.
    ///
    /// Offsets that are not positive release immediately. Offsets too large
    /// to represent saturate to [`FAR_FUTURE`] past the epoch.
    pub fn deadline(&self, offset: f64) -> Instant {
        if offset.is_nan() || offset <= 0.0 {
            return self.epoch;
        }
        let offset = Duration::try_from_secs_f64(offset)
            .unwrap_or(FAR_FUTURE)
            .min(FAR_FUTURE);
        self.epoch + offset
    }

    /// Wall-clock milliseconds since the unix epoch for `at`
    pub fn unix_ms_at(&self, at: Instant) -> f64 {
        self.start_unix_ms + at.saturating_duration_since(self.epoch).as_secs_f64() * 1000.0
    }
}
