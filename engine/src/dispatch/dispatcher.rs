//! Concurrency-bounded dispatch of scheduled request tasks

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, histogram};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::task::{RequestTask, RunClock, TenantId};
use crate::error::ConfigError;
use crate::executor::RequestExecutor;
use crate::guard::AdmissionGuard;
use crate::results::{RequestOutcome, RequestRecord, ResultCollector};

/// Default pause taken by a throttled task before it finishes
pub const DEFAULT_THROTTLE_DELAY: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum DispatchError {
    /// The run was cancelled; `records` holds every request that completed
    #[error("Dispatch interrupted after {} completed requests", records.len())]
    Interrupted { records: Vec<RequestRecord> },
}

/// Concurrency limits and throttling behaviour for one run
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Maximum requests in flight across all tenants
    pub concurrency: usize,
    /// Additional per-tenant in-flight limits
    pub tenant_limits: HashMap<TenantId, usize>,
    pub throttle_delay: Duration,
}

impl DispatchConfig {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency,
            tenant_limits: HashMap::new(),
            throttle_delay: DEFAULT_THROTTLE_DELAY,
        }
    }

    pub fn with_tenant_limit(mut self, tenant: TenantId, limit: usize) -> Self {
        self.tenant_limits.insert(tenant, limit);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::invalid("concurrency", "must be at least 1"));
        }
        if let Some((tenant, _)) = self.tenant_limits.iter().find(|(_, limit)| **limit == 0) {
            return Err(ConfigError::invalid(
                "tenant concurrency",
                format!("limit for tenant {tenant} must be at least 1"),
            ));
        }
        Ok(())
    }
}

struct Inner {
    executor: Arc<dyn RequestExecutor>,
    slots: Arc<Semaphore>,
    tenant_slots: HashMap<TenantId, Arc<Semaphore>>,
    guard: Option<Arc<AdmissionGuard>>,
    collector: ResultCollector,
    throttle_delay: Duration,
    cancel: CancellationToken,
}

/// Releases scheduled requests into a bounded number of concurrent slots.
///
/// Every task waits for its offset independently; only the exchange itself
/// holds a slot. Tenant slots are always taken before the global slot so a
/// tenant at its own limit never occupies global capacity.
pub struct Dispatcher {
    executor: Arc<dyn RequestExecutor>,
    config: DispatchConfig,
    guard: Option<Arc<AdmissionGuard>>,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        executor: Arc<dyn RequestExecutor>,
        config: DispatchConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            executor,
            config,
            guard: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Consult and feed `guard` for this run
    pub fn with_guard(mut self, guard: Arc<AdmissionGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Stop the run early when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Dispatch every task and return the completed records ordered by id
    pub async fn run(
        &self,
        clock: RunClock,
        tasks: Vec<RequestTask>,
    ) -> Result<Vec<RequestRecord>, DispatchError> {
        let total = tasks.len();
        info!(
            "Dispatching {} requests with concurrency {}",
            total, self.config.concurrency
        );

        let inner = Arc::new(Inner {
            executor: Arc::clone(&self.executor),
            slots: Arc::new(Semaphore::new(self.config.concurrency)),
            tenant_slots: self
                .config
                .tenant_limits
                .iter()
                .map(|(tenant, limit)| (tenant.clone(), Arc::new(Semaphore::new(*limit))))
                .collect(),
            guard: self.guard.clone(),
            collector: ResultCollector::with_capacity(total),
            throttle_delay: self.config.throttle_delay,
            cancel: self.cancel.clone(),
        });

        let mut workers = JoinSet::new();
        for task in tasks {
            workers.spawn(run_task(Arc::clone(&inner), clock, task));
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("Request task failed: {}", e);
            }
        }

        let records = inner.collector.drain();
        if self.cancel.is_cancelled() {
            warn!(
                "Dispatch interrupted: {} of {} requests completed",
                records.len(),
                total
            );
            return Err(DispatchError::Interrupted { records });
        }

        info!("Dispatch finished: {} requests completed", records.len());
        Ok(records)
    }
}

async fn acquire(
    semaphore: &Arc<Semaphore>,
    cancel: &CancellationToken,
) -> Option<OwnedSemaphorePermit> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        permit = Arc::clone(semaphore).acquire_owned() => permit.ok(),
    }
}

async fn run_task(inner: Arc<Inner>, clock: RunClock, task: RequestTask) {
    let cancel = &inner.cancel;
    let deadline = clock.deadline(task.offset);
    tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        _ = sleep_until(deadline) => {}
    }

    let scheduled_unix_ms = clock.unix_ms_at(deadline);

    if task.constrained
        && let Some(guard) = &inner.guard
        && guard.should_throttle()
    {
        let outcome = RequestOutcome::throttled(clock.unix_ms_at(Instant::now()));
        counter!("kvmini_requests_throttled_total").increment(1);
        debug!("Request {} throttled by admission guard", task.id);
        store(&inner, task, scheduled_unix_ms, outcome);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {}
            _ = sleep(inner.throttle_delay) => {}
        }
        return;
    }

    let _tenant_permit = match task.tenant.as_ref().and_then(|t| inner.tenant_slots.get(t)) {
        Some(semaphore) => match acquire(semaphore, cancel).await {
            Some(permit) => Some(permit),
            None => return,
        },
        None => None,
    };
    let Some(_permit) = acquire(&inner.slots, cancel).await else {
        return;
    };

    let started = Instant::now();
    let start_unix_ms = clock.unix_ms_at(started);
    let exchange = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        exchange = inner.executor.execute() => exchange,
    };
    let finished = Instant::now();

    let outcome = RequestOutcome::from_exchange(exchange, started, finished, start_unix_ms);
    counter!("kvmini_requests_total", "status" => outcome.status.to_string()).increment(1);
    histogram!("kvmini_request_latency_seconds").record(outcome.latency.as_secs_f64());

    if outcome.status != 0
        && let Some(guard) = &inner.guard
    {
        guard.observe_at(outcome.latency, finished);
    }
    if let Some(err) = &outcome.error {
        debug!("Request {} finished with status {}: {}", task.id, outcome.status, err);
    }

    store(&inner, task, scheduled_unix_ms, outcome);
}

fn store(inner: &Inner, task: RequestTask, scheduled_unix_ms: f64, outcome: RequestOutcome) {
    // Duplicates are logged by the collector
    let _ = inner.collector.record(RequestRecord {
        id: task.id,
        tenant: task.tenant,
        scheduled_unix_ms,
        outcome,
    });
}
