//! Per-request outcomes and their CSV wire form

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::dispatch::TenantId;
use crate::executor::{Exchange, TokenUsage, extract_usage};

/// Status recorded for a request the admission guard held back
pub const THROTTLED_STATUS: u16 = 429;

/// Action taken by the admission guard on a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardAction {
    Throttled,
}

impl GuardAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuardAction::Throttled => "throttled",
        }
    }
}

/// What happened to one request.
///
/// Construction goes through [`RequestOutcome::from_exchange`] or
/// [`RequestOutcome::throttled`], which keep `0 <= ttfb <= tllt <= latency`
/// and drop token counts from non-200 responses.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOutcome {
    /// Wall-clock start, milliseconds since the unix epoch
    pub start_unix_ms: f64,
    pub ttfb: Option<Duration>,
    pub tllt: Option<Duration>,
    pub latency: Duration,
    /// HTTP status; 0 for transport failures, 429 for throttled requests
    pub status: u16,
    pub usage: Option<TokenUsage>,
    pub error: Option<String>,
    pub guard_action: Option<GuardAction>,
}

impl RequestOutcome {
    /// Outcome of an executed exchange that started at `started` and
    /// finished at `finished`
    pub fn from_exchange(
        exchange: Exchange,
        started: Instant,
        finished: Instant,
        start_unix_ms: f64,
    ) -> Self {
        let latency = finished.saturating_duration_since(started);
        let mark = |at: Option<Instant>| {
            at.map(|at| at.saturating_duration_since(started).min(latency))
        };
        let ttfb = mark(exchange.first_chunk_at);
        let tllt = match (ttfb, mark(exchange.last_chunk_at)) {
            (Some(first), Some(last)) => Some(last.max(first)),
            (None, last) => last,
            (Some(first), None) => Some(first),
        };
        let usage = if exchange.status == 200 {
            extract_usage(&exchange.body)
        } else {
            None
        };

        Self {
            start_unix_ms,
            ttfb,
            tllt,
            latency,
            status: exchange.status,
            usage,
            error: exchange.error,
            guard_action: None,
        }
    }

    /// Synthetic outcome for a request the guard refused to dispatch
    pub fn throttled(start_unix_ms: f64) -> Self {
        Self {
            start_unix_ms,
            ttfb: None,
            tllt: None,
            latency: Duration::ZERO,
            status: THROTTLED_STATUS,
            usage: None,
            error: Some("throttled".to_string()),
            guard_action: Some(GuardAction::Throttled),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == 200
    }

    pub fn is_throttled(&self) -> bool {
        self.guard_action == Some(GuardAction::Throttled)
    }

    /// Whether the request reached the endpoint and got a response back
    pub fn was_executed(&self) -> bool {
        self.status != 0 && !self.is_throttled()
    }
}

/// A completed request: identity, schedule and outcome
#[derive(Debug, Clone, PartialEq)]
pub struct RequestRecord {
    /// 1-based sequence id, unique within a run
    pub id: u64,
    pub tenant: Option<TenantId>,
    /// Planned start, milliseconds since the unix epoch
    pub scheduled_unix_ms: f64,
    pub outcome: RequestOutcome,
}

/// One `requests.csv` row
#[derive(Debug, Serialize)]
pub struct CsvRow {
    pub id: u64,
    pub scheduled_ms: String,
    pub start_ms: String,
    pub ttfb_ms: Option<String>,
    pub tllt_ms: Option<String>,
    pub latency_ms: String,
    pub status: u16,
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
    pub error: Option<String>,
    pub tenant: Option<String>,
    pub guard_action: Option<&'static str>,
}

/// Column order of `requests.csv`
pub const CSV_HEADER: [&str; 13] = [
    "id",
    "scheduled_ms",
    "start_ms",
    "ttfb_ms",
    "tllt_ms",
    "latency_ms",
    "status",
    "prompt_tokens",
    "completion_tokens",
    "total_tokens",
    "error",
    "tenant",
    "guard_action",
];

fn millis(value: f64) -> String {
    format!("{value:.3}")
}

fn duration_ms(duration: Duration) -> String {
    millis(duration.as_secs_f64() * 1000.0)
}

impl From<&RequestRecord> for CsvRow {
    fn from(record: &RequestRecord) -> Self {
        let outcome = &record.outcome;
        let usage = outcome.usage.unwrap_or_default();
        Self {
            id: record.id,
            scheduled_ms: millis(record.scheduled_unix_ms),
            start_ms: millis(outcome.start_unix_ms),
            ttfb_ms: outcome.ttfb.map(duration_ms),
            tllt_ms: outcome.tllt.map(duration_ms),
            latency_ms: duration_ms(outcome.latency),
            status: outcome.status,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
            error: outcome.error.clone(),
            tenant: record.tenant.as_ref().map(|t| t.to_string()),
            guard_action: outcome.guard_action.map(|a| a.as_str()),
        }
    }
}
