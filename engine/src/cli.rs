//! Command line interface
//!
//! Arguments are parsed with clap and then validated into the typed run
//! configurations in [`crate::config`]. Validation failures are
//! [`ConfigError`]s so the binary can exit with the configuration status.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Local};
use clap::{Args, Parser, Subcommand};

use crate::config::{
    EngineConfig, FairnessConfig, LoadTestConfig, ScheduleConfig, TenantConfig,
};
use crate::dispatch::TenantId;
use crate::error::ConfigError;
use crate::executor::{ChatRequest, ClientConfig, DecodingParams, load_extra_fields};
use crate::guard::GuardConfig;
use crate::schedule::ArrivalPattern;

const TENANT_A: &str = "A";
const TENANT_B: &str = "B";

#[derive(Parser, Debug)]
#[command(name = "kvmini")]
#[command(about = "Load generator and fairness harness for OpenAI-compatible endpoints", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Drive scheduled traffic from a single tenant
    Loadtest(LoadTestArgs),
    /// Run two tenants against one endpoint behind a p95 admission guard
    Fairness(FairnessArgs),
}

/// Endpoint, prompt and output options shared by every subcommand
#[derive(Args, Debug, Clone)]
pub struct EndpointArgs {
    /// Base URL of the OpenAI-compatible endpoint
    #[arg(long)]
    pub url: String,

    /// Model name sent with every request
    #[arg(long, default_value = "placeholder")]
    pub model: String,

    /// User prompt sent with every request
    #[arg(long, default_value = "Hello, world!")]
    pub prompt: String,

    #[arg(long, default_value = "64")]
    pub max_tokens: u32,

    /// Directory for run artifacts (default: <runs dir>/<timestamp>)
    #[arg(long)]
    pub run_dir: Option<PathBuf>,

    /// Bearer token for the endpoint
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Skip TLS certificate verification
    #[arg(long)]
    pub insecure: bool,

    /// Request streamed responses and record TTFB/TLLT
    #[arg(long)]
    pub stream: bool,
}

/// Sampling and decoding options
#[derive(Args, Debug, Clone)]
pub struct DecodingArgs {
    #[arg(long, default_value = "0.0")]
    pub temperature: f64,

    #[arg(long)]
    pub top_p: Option<f64>,

    #[arg(long)]
    pub top_k: Option<u32>,

    /// Completions per request (`n`)
    #[arg(long)]
    pub num_completions: Option<u32>,

    #[arg(long, allow_hyphen_values = true)]
    pub presence_penalty: Option<f64>,

    #[arg(long, allow_hyphen_values = true)]
    pub frequency_penalty: Option<f64>,

    /// Ask for a JSON object response
    #[arg(long)]
    pub json_mode: bool,

    /// JSON object file whose fields are merged into every payload
    #[arg(long)]
    pub extra_openai_json: Option<PathBuf>,
}

/// Schedule sizing options
#[derive(Args, Debug, Clone)]
pub struct TimingArgs {
    /// Schedule window in seconds (derived from concurrency if unset)
    #[arg(long)]
    pub duration: Option<f64>,

    /// Target arrival rate in requests per second
    #[arg(long)]
    pub rate: Option<f64>,

    /// Average latency assumed when deriving the window
    #[arg(long)]
    pub assumed_latency_ms: Option<u64>,

    /// Seed for reproducible schedules
    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct LoadTestArgs {
    #[command(flatten)]
    pub endpoint: EndpointArgs,

    #[command(flatten)]
    pub decoding: DecodingArgs,

    /// Total number of requests
    #[arg(long, default_value = "200")]
    pub requests: usize,

    /// Maximum requests in flight
    #[arg(long, default_value = "10")]
    pub concurrency: usize,

    /// Arrival pattern: steady, poisson, bursty or heavy
    #[arg(long, default_value = "steady")]
    pub pattern: String,

    #[command(flatten)]
    pub timing: TimingArgs,
}

#[derive(Args, Debug, Clone)]
pub struct FairnessArgs {
    #[command(flatten)]
    pub endpoint: EndpointArgs,

    #[command(flatten)]
    pub decoding: DecodingArgs,

    #[arg(long, default_value = "200")]
    pub tenant_a_requests: usize,

    #[arg(long, default_value = "200")]
    pub tenant_b_requests: usize,

    #[arg(long, default_value = "10")]
    pub tenant_a_concurrency: usize,

    #[arg(long, default_value = "10")]
    pub tenant_b_concurrency: usize,

    /// Rolling p95 budget; throttling is disabled when unset
    #[arg(long)]
    pub p95_budget_ms: Option<f64>,

    /// Number of recent completions in the rolling window
    #[arg(long, default_value = "50")]
    pub guard_window: usize,

    /// Seconds throttling stays active after a trigger
    #[arg(long, default_value = "2.0")]
    pub guard_cooldown: f64,

    /// Tenant the guard may throttle (A or B)
    #[arg(long, default_value = TENANT_B)]
    pub constrained_tenant: String,

    /// Arrival pattern per tenant; all requests are released at once if unset
    #[arg(long)]
    pub pattern: Option<String>,

    #[command(flatten)]
    pub timing: TimingArgs,
}

fn finite(name: &'static str, value: f64) -> Result<f64, ConfigError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ConfigError::invalid(name, format!("must be a finite number, got {value}")))
    }
}

fn at_least_one(name: &'static str, value: usize) -> Result<usize, ConfigError> {
    if value == 0 {
        return Err(ConfigError::invalid(name, "must be at least 1"));
    }
    Ok(value)
}

/// Duration rounded to the nearest nanosecond
fn positive_secs(name: &'static str, secs: f64) -> Result<Duration, ConfigError> {
    let nanos = (secs * 1e9).round();
    if !secs.is_finite() || nanos < 1.0 {
        return Err(ConfigError::invalid(name, format!("must be positive, got {secs}")));
    }
    Ok(Duration::from_nanos(nanos as u64))
}

/// Default run directory name for a run started at `now`
pub fn default_run_dir(runs_dir: &std::path::Path, now: DateTime<Local>) -> PathBuf {
    runs_dir.join(now.format("%Y-%m-%d_%H-%M-%S").to_string())
}

impl EndpointArgs {
    fn client(&self, engine: &EngineConfig) -> ClientConfig {
        ClientConfig {
            url: self.url.clone(),
            api_key: self.api_key.clone().filter(|key| !key.is_empty()),
            insecure: self.insecure,
            timeout: engine.request_timeout,
        }
    }

    fn request(&self, decoding: DecodingParams) -> Result<ChatRequest, ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::invalid("url", "must not be empty"));
        }
        if self.max_tokens == 0 {
            return Err(ConfigError::invalid("max tokens", "must be at least 1"));
        }
        Ok(ChatRequest {
            model: self.model.clone(),
            prompt: self.prompt.clone(),
            max_tokens: self.max_tokens,
            stream: self.stream,
            decoding,
        })
    }

    fn run_dir(&self, engine: &EngineConfig, now: DateTime<Local>) -> PathBuf {
        self.run_dir
            .clone()
            .unwrap_or_else(|| default_run_dir(&engine.runs_dir, now))
    }
}

impl DecodingArgs {
    fn params(&self) -> Result<DecodingParams, ConfigError> {
        let temperature = finite("temperature", self.temperature)?;
        if temperature < 0.0 {
            return Err(ConfigError::invalid("temperature", "must not be negative"));
        }
        if let Some(top_p) = self.top_p
            && !(top_p > 0.0 && top_p <= 1.0)
        {
            return Err(ConfigError::invalid("top-p", format!("must be in (0, 1], got {top_p}")));
        }
        if let Some(n) = self.num_completions
            && n == 0
        {
            return Err(ConfigError::invalid("num completions", "must be at least 1"));
        }
        let extra = match &self.extra_openai_json {
            Some(path) => load_extra_fields(path)?,
            None => Default::default(),
        };

        Ok(DecodingParams {
            temperature,
            top_p: self.top_p,
            top_k: self.top_k,
            num_completions: self.num_completions,
            presence_penalty: self
                .presence_penalty
                .map(|v| finite("presence penalty", v))
                .transpose()?,
            frequency_penalty: self
                .frequency_penalty
                .map(|v| finite("frequency penalty", v))
                .transpose()?,
            json_mode: self.json_mode,
            extra,
        })
    }
}

impl TimingArgs {
    fn schedule(
        &self,
        pattern: ArrivalPattern,
        engine: &EngineConfig,
    ) -> Result<ScheduleConfig, ConfigError> {
        let assumed_latency = match self.assumed_latency_ms {
            Some(0) => return Err(ConfigError::invalid("assumed latency", "must be positive")),
            Some(ms) => Duration::from_millis(ms),
            None => engine.assumed_latency,
        };
        Ok(ScheduleConfig {
            pattern,
            duration_sec: self.duration,
            rate: self.rate,
            assumed_latency,
            seed: self.seed,
        })
    }
}

impl LoadTestArgs {
    pub fn into_config(
        self,
        engine: &EngineConfig,
        now: DateTime<Local>,
    ) -> Result<LoadTestConfig, ConfigError> {
        let pattern: ArrivalPattern = self.pattern.parse()?;
        let request = self.endpoint.request(self.decoding.params()?)?;

        Ok(LoadTestConfig {
            client: self.endpoint.client(engine),
            request,
            requests: self.requests,
            concurrency: at_least_one("concurrency", self.concurrency)?,
            schedule: self.timing.schedule(pattern, engine)?,
            run_dir: self.endpoint.run_dir(engine, now),
            throttle_delay: engine.throttle_delay,
        })
    }
}

impl FairnessArgs {
    pub fn into_config(
        self,
        engine: &EngineConfig,
        now: DateTime<Local>,
    ) -> Result<FairnessConfig, ConfigError> {
        let request = self.endpoint.request(self.decoding.params()?)?;

        let constrained = match self.constrained_tenant.trim().to_ascii_uppercase().as_str() {
            TENANT_A => TenantId::new(TENANT_A),
            TENANT_B => TenantId::new(TENANT_B),
            other => {
                return Err(ConfigError::invalid(
                    "constrained tenant",
                    format!("expected A or B, got {other:?}"),
                ));
            }
        };

        let tenants = vec![
            TenantConfig {
                id: TenantId::new(TENANT_A),
                requests: self.tenant_a_requests,
                concurrency: at_least_one("tenant A concurrency", self.tenant_a_concurrency)?,
            },
            TenantConfig {
                id: TenantId::new(TENANT_B),
                requests: self.tenant_b_requests,
                concurrency: at_least_one("tenant B concurrency", self.tenant_b_concurrency)?,
            },
        ];

        let p95_budget = match self.p95_budget_ms {
            Some(ms) => Some(positive_secs("p95 budget", finite("p95 budget", ms)? / 1000.0)?),
            None => None,
        };
        let guard = GuardConfig {
            p95_budget,
            window: self.guard_window,
            cooldown: positive_secs("guard cooldown", self.guard_cooldown)?,
        };
        guard.validate()?;

        let schedule = match &self.pattern {
            Some(name) => Some(self.timing.schedule(name.parse()?, engine)?),
            None => None,
        };

        Ok(FairnessConfig {
            client: self.endpoint.client(engine),
            request,
            tenants,
            constrained,
            guard,
            schedule,
            run_dir: self.endpoint.run_dir(engine, now),
            throttle_delay: engine.throttle_delay,
        })
    }
}
