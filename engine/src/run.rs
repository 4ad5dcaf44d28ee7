//! Run orchestration
//!
//! Ties schedule generation, dispatch and artifact writing together for the
//! two run modes. Artifacts are written even when a run is interrupted, in
//! which case the call still returns [`EngineError::Interrupted`].

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{FairnessConfig, LoadTestConfig, ScheduleConfig};
use crate::dispatch::{
    DispatchConfig, DispatchError, Dispatcher, RequestTask, RunClock, tasks_from_offsets,
};
use crate::error::EngineError;
use crate::executor::{HttpExecutor, RequestExecutor};
use crate::guard::AdmissionGuard;
use crate::results::{
    FairnessSummary, RequestRecord, RunMetadata, RunWriter, interpolated_percentile, summarize,
};
use crate::schedule::{self, ScheduleOverrides, ScheduleParams};

/// What a finished run produced
#[derive(Debug)]
pub struct RunReport {
    pub run_dir: PathBuf,
    pub records: Vec<RequestRecord>,
    /// Present for fairness runs
    pub summary: Option<FairnessSummary>,
    pub guard_triggers: u64,
}

impl RunReport {
    pub fn success_count(&self) -> usize {
        self.records.iter().filter(|r| r.outcome.is_success()).count()
    }
}

fn overrides(schedule: &ScheduleConfig) -> ScheduleOverrides {
    ScheduleOverrides {
        duration_sec: schedule.duration_sec,
        rate: schedule.rate,
        assumed_latency: schedule.assumed_latency,
    }
}

fn resolve_seed(seed: Option<u64>) -> u64 {
    match seed {
        Some(seed) => seed,
        None => {
            let seed: u64 = rand::random();
            info!("No seed given, using random schedule seed {}", seed);
            seed
        }
    }
}

fn log_latencies(records: &[RequestRecord]) {
    let mut latencies: Vec<f64> = records
        .iter()
        .filter(|r| r.outcome.is_success())
        .map(|r| r.outcome.latency.as_secs_f64() * 1000.0)
        .collect();
    latencies.sort_by(f64::total_cmp);
    let failed = records.iter().filter(|r| !r.outcome.is_success()).count();

    match (
        interpolated_percentile(&latencies, 50.0),
        interpolated_percentile(&latencies, 95.0),
    ) {
        (Some(p50), Some(p95)) => info!(
            "{} succeeded, {} failed or throttled: p50 {:.1} ms, p95 {:.1} ms",
            latencies.len(),
            failed,
            p50,
            p95
        ),
        _ => warn!("No successful requests ({} failed or throttled)", failed),
    }
}

/// Split a dispatch result into the records to persist and the final status
fn settle(
    result: Result<Vec<RequestRecord>, DispatchError>,
) -> (Vec<RequestRecord>, Result<(), EngineError>) {
    match result {
        Ok(records) => (records, Ok(())),
        Err(DispatchError::Interrupted { records }) => (records, Err(EngineError::Interrupted)),
    }
}

/// Run a single-tenant load test against the configured endpoint
pub async fn run_loadtest(
    config: LoadTestConfig,
    cancel: CancellationToken,
) -> Result<RunReport, EngineError> {
    let executor = Arc::new(HttpExecutor::new(&config.client, &config.request)?);
    info!("Target endpoint: {}", executor.url());
    run_loadtest_with(config, executor, cancel).await
}

/// Run a single-tenant load test with a caller-provided executor
pub async fn run_loadtest_with(
    config: LoadTestConfig,
    executor: Arc<dyn RequestExecutor>,
    cancel: CancellationToken,
) -> Result<RunReport, EngineError> {
    let seed = resolve_seed(config.schedule.seed);
    let params = schedule::plan(
        config.schedule.pattern,
        config.requests,
        config.concurrency,
        overrides(&config.schedule),
    )?;
    let offsets = schedule::generate(&params, &mut schedule::seeded_rng(seed))?;
    info!(
        "Planned {} {} arrivals over {:.2}s (target {:.2} req/s, seed {})",
        params.requests, params.pattern, params.duration_sec, params.rate, seed
    );

    let dispatcher = Dispatcher::new(
        executor,
        DispatchConfig {
            throttle_delay: config.throttle_delay,
            ..DispatchConfig::new(config.concurrency)
        },
    )?
    .with_cancellation(cancel);
    let writer = RunWriter::create(&config.run_dir)?;

    let clock = RunClock::start();
    let meta = RunMetadata {
        url: config.client.url.clone(),
        model: config.request.model.clone(),
        prompt: config.request.prompt.clone(),
        max_tokens: config.request.max_tokens,
        concurrency: config.concurrency,
        requests: config.requests,
        pattern: None,
        duration_sec: None,
        target_rps: None,
        test_start_time: clock.test_start_time(),
        stream: config.request.stream,
        seed: Some(seed),
    }
    .with_schedule(&params);
    writer.write_metadata(&meta)?;

    let (records, status) = settle(dispatcher.run(clock, tasks_from_offsets(&offsets, 1)).await);
    writer.write_requests(&records)?;
    log_latencies(&records);
    status?;

    Ok(RunReport {
        run_dir: config.run_dir,
        records,
        summary: None,
        guard_triggers: 0,
    })
}

/// Run the two-tenant fairness scenario against the configured endpoint
pub async fn run_fairness(
    config: FairnessConfig,
    cancel: CancellationToken,
) -> Result<RunReport, EngineError> {
    let executor = Arc::new(HttpExecutor::new(&config.client, &config.request)?);
    info!("Target endpoint: {}", executor.url());
    run_fairness_with(config, executor, cancel).await
}

/// Run the fairness scenario with a caller-provided executor
pub async fn run_fairness_with(
    config: FairnessConfig,
    executor: Arc<dyn RequestExecutor>,
    cancel: CancellationToken,
) -> Result<RunReport, EngineError> {
    let seed = config.schedule.as_ref().map(|s| resolve_seed(s.seed));
    let mut rng = schedule::seeded_rng(seed.unwrap_or_default());

    let mut tasks: Vec<RequestTask> = Vec::with_capacity(config.total_requests());
    let mut plans: Vec<ScheduleParams> = Vec::new();
    let mut next_id = 1;
    for tenant in &config.tenants {
        let offsets = match &config.schedule {
            Some(s) => {
                let params =
                    schedule::plan(s.pattern, tenant.requests, tenant.concurrency, overrides(s))?;
                plans.push(params);
                schedule::generate(&params, &mut rng)?
            }
            None => vec![0.0; tenant.requests],
        };
        let constrained = tenant.id == config.constrained;
        tasks.extend(
            tasks_from_offsets(&offsets, next_id)
                .into_iter()
                .map(|task| task.for_tenant(tenant.id.clone(), constrained)),
        );
        next_id += tenant.requests as u64;
    }
    info!(
        "Fairness run: {} requests from {} tenants, constrained tenant {}, p95 budget {:?}",
        tasks.len(),
        config.tenants.len(),
        config.constrained,
        config.guard.p95_budget
    );

    let mut dispatch = DispatchConfig {
        throttle_delay: config.throttle_delay,
        ..DispatchConfig::new(config.total_concurrency())
    };
    for tenant in &config.tenants {
        dispatch = dispatch.with_tenant_limit(tenant.id.clone(), tenant.concurrency);
    }

    let clock = RunClock::start();
    let guard = Arc::new(AdmissionGuard::with_epoch(config.guard, clock.epoch()));
    let dispatcher = Dispatcher::new(executor, dispatch)?
        .with_guard(Arc::clone(&guard))
        .with_cancellation(cancel);
    let writer = RunWriter::create(&config.run_dir)?;

    let meta = RunMetadata {
        url: config.client.url.clone(),
        model: config.request.model.clone(),
        prompt: config.request.prompt.clone(),
        max_tokens: config.request.max_tokens,
        concurrency: config.total_concurrency(),
        requests: config.total_requests(),
        pattern: config.schedule.as_ref().map(|s| s.pattern),
        duration_sec: plans.iter().map(|p| p.duration_sec).reduce(f64::max),
        target_rps: (!plans.is_empty()).then(|| plans.iter().map(|p| p.rate).sum::<f64>()),
        test_start_time: clock.test_start_time(),
        stream: config.request.stream,
        seed,
    };
    writer.write_metadata(&meta)?;

    let (records, status) = settle(dispatcher.run(clock, tasks).await);
    let guard_triggers = guard.trigger_count();
    let tenant_ids: Vec<_> = config.tenants.iter().map(|t| t.id.clone()).collect();
    let summary = summarize(&tenant_ids, &records, guard_triggers);

    writer.write_requests(&records)?;
    writer.write_summary(&summary)?;
    log_latencies(&records);
    for (tenant, stats) in &summary.per_tenant {
        info!(
            "Tenant {}: {} requests, {} succeeded, {} throttled",
            tenant, stats.requests, stats.success, stats.throttled
        );
    }
    info!("Admission guard triggered {} times", guard_triggers);
    status?;

    Ok(RunReport {
        run_dir: config.run_dir,
        records,
        summary: Some(summary),
        guard_triggers,
    })
}
