//! Engine configuration
//!
//! Ambient settings are loaded from environment variables; per-run settings
//! come from the command line (see [`crate::cli`]) and are validated into
//! [`LoadTestConfig`] or [`FairnessConfig`] before anything is scheduled.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::dispatch::{DEFAULT_THROTTLE_DELAY, TenantId};
use crate::executor::{ChatRequest, ClientConfig, DEFAULT_REQUEST_TIMEOUT};
use crate::guard::GuardConfig;
use crate::schedule::ArrivalPattern;

/// Settings that rarely change between runs
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Transport timeout for a single exchange
    pub request_timeout: Duration,
    /// Pause taken by a throttled task
    pub throttle_delay: Duration,
    /// Average latency assumed when sizing a schedule
    pub assumed_latency: Duration,
    /// Parent directory for timestamped run directories
    pub runs_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            throttle_delay: DEFAULT_THROTTLE_DELAY,
            assumed_latency: Duration::from_millis(500),
            runs_dir: PathBuf::from("runs"),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(secs) = lookup("KVMINI_REQUEST_TIMEOUT_SECS")
            && let Ok(s) = secs.parse::<u64>()
            && s > 0
        {
            config.request_timeout = Duration::from_secs(s);
        }
        if let Some(ms) = lookup("KVMINI_THROTTLE_DELAY_MS")
            && let Ok(m) = ms.parse()
        {
            config.throttle_delay = Duration::from_millis(m);
        }
        if let Some(ms) = lookup("KVMINI_ASSUMED_LATENCY_MS")
            && let Ok(m) = ms.parse::<u64>()
            && m > 0
        {
            config.assumed_latency = Duration::from_millis(m);
        }
        if let Some(dir) = lookup("KVMINI_RUNS_DIR")
            && !dir.is_empty()
        {
            config.runs_dir = PathBuf::from(dir);
        }

        config
    }
}

/// Schedule inputs for a load test
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleConfig {
    pub pattern: ArrivalPattern,
    pub duration_sec: Option<f64>,
    pub rate: Option<f64>,
    pub assumed_latency: Duration,
    /// Seed for the schedule RNG; a random one is drawn and logged if unset
    pub seed: Option<u64>,
}

/// Fully validated single-tenant load test
#[derive(Debug, Clone)]
pub struct LoadTestConfig {
    pub client: ClientConfig,
    pub request: ChatRequest,
    pub requests: usize,
    pub concurrency: usize,
    pub schedule: ScheduleConfig,
    pub run_dir: PathBuf,
    pub throttle_delay: Duration,
}

/// One tenant of a fairness run
#[derive(Debug, Clone, PartialEq)]
pub struct TenantConfig {
    pub id: TenantId,
    pub requests: usize,
    pub concurrency: usize,
}

/// Fully validated two-tenant fairness run
#[derive(Debug, Clone)]
pub struct FairnessConfig {
    pub client: ClientConfig,
    pub request: ChatRequest,
    pub tenants: Vec<TenantConfig>,
    /// Tenant whose requests the guard may throttle
    pub constrained: TenantId,
    pub guard: GuardConfig,
    /// `None` releases every task immediately
    pub schedule: Option<ScheduleConfig>,
    pub run_dir: PathBuf,
    pub throttle_delay: Duration,
}

impl FairnessConfig {
    pub fn total_requests(&self) -> usize {
        self.tenants.iter().map(|t| t.requests).sum()
    }

    pub fn total_concurrency(&self) -> usize {
        self.tenants.iter().map(|t| t.concurrency).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[]));
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.throttle_delay, Duration::from_millis(10));
        assert_eq!(config.assumed_latency, Duration::from_millis(500));
        assert_eq!(config.runs_dir, PathBuf::from("runs"));
    }

    #[test]
    fn test_env_overrides() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("KVMINI_REQUEST_TIMEOUT_SECS", "5"),
            ("KVMINI_THROTTLE_DELAY_MS", "0"),
            ("KVMINI_ASSUMED_LATENCY_MS", "250"),
            ("KVMINI_RUNS_DIR", "/tmp/kvmini-runs"),
        ]));
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.throttle_delay, Duration::ZERO);
        assert_eq!(config.assumed_latency, Duration::from_millis(250));
        assert_eq!(config.runs_dir, PathBuf::from("/tmp/kvmini-runs"));
    }

    #[test]
    fn test_invalid_values_are_ignored() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("KVMINI_REQUEST_TIMEOUT_SECS", "0"),
            ("KVMINI_THROTTLE_DELAY_MS", "soon"),
            ("KVMINI_ASSUMED_LATENCY_MS", "-3"),
            ("KVMINI_RUNS_DIR", ""),
        ]));
        assert_eq!(config, EngineConfig::default());
    }
}
