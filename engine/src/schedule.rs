//! Arrival schedule synthesis
//!
//! A schedule is a list of offsets (seconds from test start) at which each
//! synthetic request should begin. Offsets are produced for one of four
//! traffic shapes:
//!
//! - `steady`: even spacing, `offset(i) = i * D / N`
//! - `poisson`: cumulative exponential inter-arrival gaps with rate `R`
//! - `bursty`: 80% of requests inside the first 20% of the window
//! - `heavy`: Pareto-shaped long tail, capped at 95% of the window
//!
//! Only `bursty` and `heavy` schedules come back sorted.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Exp, Pareto};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Fraction of requests sent during the burst phase
const BURST_REQUEST_FRACTION: f64 = 0.8;
/// Fraction of the window occupied by the burst phase
const BURST_TIME_FRACTION: f64 = 0.2;
/// Pareto shape used by the heavy-tail pattern
const HEAVY_TAIL_SHAPE: f64 = 1.2;
/// Heavy-tail offsets never exceed this fraction of the window
const HEAVY_TAIL_CAP: f64 = 0.95;
/// Divisor applied to raw Pareto draws before scaling into the window
const HEAVY_TAIL_SCALE_DIVISOR: f64 = 10.0;
/// Non-steady patterns run at this fraction of the saturating rate
const NON_STEADY_RATE_FACTOR: f64 = 0.75;
/// Non-steady patterns get this much extra window to absorb bursts
const NON_STEADY_WINDOW_FACTOR: f64 = 1.5;

/// Statistical shape of request arrivals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArrivalPattern {
    Steady,
    Poisson,
    Bursty,
    Heavy,
}

impl ArrivalPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArrivalPattern::Steady => "steady",
            ArrivalPattern::Poisson => "poisson",
            ArrivalPattern::Bursty => "bursty",
            ArrivalPattern::Heavy => "heavy",
        }
    }
}

impl fmt::Display for ArrivalPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArrivalPattern {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "steady" => Ok(ArrivalPattern::Steady),
            "poisson" => Ok(ArrivalPattern::Poisson),
            "bursty" => Ok(ArrivalPattern::Bursty),
            "heavy" => Ok(ArrivalPattern::Heavy),
            _ => Err(ConfigError::UnknownPattern(s.to_string())),
        }
    }
}

/// Explicit inputs that override the duration/rate heuristic
#[derive(Debug, Clone, Copy)]
pub struct ScheduleOverrides {
    /// Window length in seconds
    pub duration_sec: Option<f64>,
    /// Target arrival rate in requests per second
    pub rate: Option<f64>,
    /// Average request latency assumed when sizing the window
    pub assumed_latency: Duration,
}

impl Default for ScheduleOverrides {
    fn default() -> Self {
        Self {
            duration_sec: None,
            rate: None,
            assumed_latency: Duration::from_millis(500),
        }
    }
}

/// Fully resolved schedule inputs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduleParams {
    pub pattern: ArrivalPattern,
    pub requests: usize,
    /// Window length `D` in seconds
    pub duration_sec: f64,
    /// Target rate `R` in requests per second
    pub rate: f64,
}

fn positive(name: &'static str, value: f64) -> Result<f64, ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(ConfigError::invalid(name, format!("must be positive, got {value}")))
    }
}

/// Derive the window length and target rate for a run.
///
/// Steady traffic is sized so that `concurrency` in-flight requests of the
/// assumed latency keep the endpoint saturated. Other patterns run at 75% of
/// that rate over a window 1.5x longer. Explicit overrides win over the
/// heuristic; for steady traffic an explicit duration also fixes the rate.
pub fn plan(
    pattern: ArrivalPattern,
    requests: usize,
    concurrency: usize,
    overrides: ScheduleOverrides,
) -> Result<ScheduleParams, ConfigError> {
    if concurrency == 0 {
        return Err(ConfigError::invalid("concurrency", "must be at least 1"));
    }
    let latency_sec = positive("assumed latency", overrides.assumed_latency.as_secs_f64())?;
    let duration = overrides
        .duration_sec
        .map(|d| positive("duration", d))
        .transpose()?;
    let rate = overrides.rate.map(|r| positive("rate", r)).transpose()?;

    let saturating_rate = concurrency as f64 / latency_sec;
    let n = requests as f64;

    let (duration_sec, rate) = match pattern {
        ArrivalPattern::Steady => match (duration, rate) {
            (Some(d), r) if requests == 0 => (d, r.unwrap_or(saturating_rate)),
            (Some(d), _) => (d, n / d),
            (None, r) => {
                let r = r.unwrap_or(saturating_rate);
                (n / r, r)
            }
        },
        ArrivalPattern::Poisson | ArrivalPattern::Bursty | ArrivalPattern::Heavy => {
            let r = rate.unwrap_or(saturating_rate * NON_STEADY_RATE_FACTOR);
            let d = duration.unwrap_or(NON_STEADY_WINDOW_FACTOR * n / r);
            (d, r)
        }
    };

    Ok(ScheduleParams {
        pattern,
        requests,
        duration_sec,
        rate,
    })
}

/// Deterministic random source for schedule generation
pub fn seeded_rng(seed: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed)
}

/// Produce one offset per request for the given parameters
pub fn generate<R: Rng>(
    params: &ScheduleParams,
    rng: &mut R,
) -> Result<Vec<f64>, ConfigError> {
    let n = params.requests;
    let window = params.duration_sec;
    if n == 0 {
        return Ok(Vec::new());
    }

    let offsets = match params.pattern {
        ArrivalPattern::Steady => (0..n)
            .map(|i| window * i as f64 / n as f64)
            .collect(),
        ArrivalPattern::Poisson => {
            let gaps = Exp::new(params.rate)
                .map_err(|e| ConfigError::invalid("rate", e.to_string()))?;
            let mut t = 0.0;
            (0..n)
                .map(|_| {
                    t += gaps.sample(rng);
                    t
                })
                .collect()
        }
        ArrivalPattern::Bursty => {
            let burst_count = (n as f64 * BURST_REQUEST_FRACTION) as usize;
            let burst_window = window * BURST_TIME_FRACTION;
            let tail_window = window - burst_window;

            let mut offsets: Vec<f64> = Vec::with_capacity(n);
            offsets.extend((0..burst_count).map(|_| rng.random::<f64>() * burst_window));
            offsets.extend(
                (burst_count..n).map(|_| burst_window + rng.random::<f64>() * tail_window),
            );
            offsets.sort_by(f64::total_cmp);
            offsets
        }
        ArrivalPattern::Heavy => {
            let tail = Pareto::new(1.0, HEAVY_TAIL_SHAPE)
                .map_err(|e| ConfigError::invalid("heavy-tail shape", e.to_string()))?;
            let cap = window * HEAVY_TAIL_CAP;
            let mut offsets: Vec<f64> = (0..n)
                .map(|_| {
                    let draw: f64 = tail.sample(rng) - 1.0;
                    (draw / HEAVY_TAIL_SCALE_DIVISOR * window).clamp(0.0, cap)
                })
                .collect();
            offsets.sort_by(f64::total_cmp);
            offsets
        }
    };

    Ok(offsets)
}
