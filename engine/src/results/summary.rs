//! Per-tenant fairness summary

use indexmap::IndexMap;
use serde::Serialize;

use super::outcome::RequestRecord;
use crate::dispatch::TenantId;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TenantSummary {
    pub requests: usize,
    pub success: usize,
    pub throttled: usize,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
}

/// Contents of `fairness_summary.json`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FairnessSummary {
    pub per_tenant: IndexMap<String, TenantSummary>,
    /// Each tenant's share of all successful requests
    pub throughput_share: IndexMap<String, Option<f64>>,
    pub guard_triggers: u64,
}

/// Summarize records for `tenants`, in the given order
pub fn summarize(
    tenants: &[TenantId],
    records: &[RequestRecord],
    guard_triggers: u64,
) -> FairnessSummary {
    let mut per_tenant = IndexMap::with_capacity(tenants.len());
    for tenant in tenants {
        let mine: Vec<&RequestRecord> = records
            .iter()
            .filter(|r| r.tenant.as_ref() == Some(tenant))
            .collect();

        let mut latencies: Vec<f64> = mine
            .iter()
            .filter(|r| r.outcome.is_success())
            .map(|r| r.outcome.latency.as_secs_f64() * 1000.0)
            .collect();
        latencies.sort_by(f64::total_cmp);

        per_tenant.insert(
            tenant.to_string(),
            TenantSummary {
                requests: mine.len(),
                success: latencies.len(),
                throttled: mine.iter().filter(|r| r.outcome.is_throttled()).count(),
                p50_ms: interpolated_percentile(&latencies, 50.0),
                p95_ms: interpolated_percentile(&latencies, 95.0),
            },
        );
    }

    let total_success: usize = per_tenant.values().map(|t| t.success).sum();
    let throughput_share = per_tenant
        .iter()
        .map(|(name, t)| {
            let share = (total_success > 0).then(|| t.success as f64 / total_success as f64);
            (name.clone(), share)
        })
        .collect();

    FairnessSummary {
        per_tenant,
        throughput_share,
        guard_triggers,
    }
}

/// Percentile `p` (0-100) of ascending `sorted` values, interpolating
/// linearly between the two closest ranks
pub fn interpolated_percentile(sorted: &[f64], p: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let rank = (p / 100.0).clamp(0.0, 1.0) * last as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let fraction = rank - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::RequestOutcome;
    use std::time::Duration;

    fn ok(id: u64, tenant: &str, latency_ms: u64) -> RequestRecord {
        RequestRecord {
            id,
            tenant: Some(TenantId::new(tenant)),
            scheduled_unix_ms: 0.0,
            outcome: RequestOutcome {
                start_unix_ms: 0.0,
                ttfb: None,
                tllt: None,
                latency: Duration::from_millis(latency_ms),
                status: 200,
                usage: None,
                error: None,
                guard_action: None,
            },
        }
    }

    fn throttled(id: u64, tenant: &str) -> RequestRecord {
        RequestRecord {
            id,
            tenant: Some(TenantId::new(tenant)),
            scheduled_unix_ms: 0.0,
            outcome: RequestOutcome::throttled(0.0),
        }
    }

    #[test]
    fn test_interpolated_percentile() {
        assert_eq!(interpolated_percentile(&[], 50.0), None);
        assert_eq!(interpolated_percentile(&[7.0], 95.0), Some(7.0));
        let values = [10.0, 20.0, 30.0, 40.0];
        assert_eq!(interpolated_percentile(&values, 50.0), Some(25.0));
        assert_eq!(interpolated_percentile(&values, 100.0), Some(40.0));
        assert_eq!(interpolated_percentile(&values, 0.0), Some(10.0));
        // rank = 0.95 * 3 = 2.85
        let p95 = interpolated_percentile(&values, 95.0).unwrap();
        assert!((p95 - 38.5).abs() < 1e-9);
    }

    #[test]
    fn test_summary_per_tenant() {
        let records = vec![
            ok(1, "A", 100),
            ok(2, "A", 200),
            ok(3, "A", 300),
            ok(4, "B", 50),
            throttled(5, "B"),
            throttled(6, "B"),
        ];
        let tenants = [TenantId::new("A"), TenantId::new("B")];
        let summary = summarize(&tenants, &records, 3);

        let a = &summary.per_tenant["A"];
        assert_eq!((a.requests, a.success, a.throttled), (3, 3, 0));
        assert_eq!(a.p50_ms, Some(200.0));

        let b = &summary.per_tenant["B"];
        assert_eq!((b.requests, b.success, b.throttled), (3, 1, 2));
        assert_eq!(b.p95_ms, Some(50.0));

        assert_eq!(summary.throughput_share["A"], Some(0.75));
        assert_eq!(summary.throughput_share["B"], Some(0.25));
        assert_eq!(summary.guard_triggers, 3);

        let keys: Vec<&String> = summary.per_tenant.keys().collect();
        assert_eq!(keys, ["A", "B"]);
    }

    #[test]
    fn test_summary_without_success() {
        let tenants = [TenantId::new("A"), TenantId::new("B")];
        let summary = summarize(&tenants, &[throttled(1, "B")], 0);
        assert_eq!(summary.per_tenant["A"].requests, 0);
        assert_eq!(summary.per_tenant["A"].p50_ms, None);
        assert_eq!(summary.throughput_share["A"], None);
        assert_eq!(summary.throughput_share["B"], None);
    }
}
