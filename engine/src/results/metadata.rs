//! Run metadata written once per run as `meta.json`

use serde::Serialize;

use crate::schedule::{ArrivalPattern, ScheduleParams};

/// Configuration under which a run's schedule was generated
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunMetadata {
    pub url: String,
    pub model: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub concurrency: usize,
    pub requests: usize,
    /// `None` when tasks were released all at once
    pub pattern: Option<ArrivalPattern>,
    pub duration_sec: Option<f64>,
    pub target_rps: Option<f64>,
    /// Test start, seconds since the unix epoch
    pub test_start_time: f64,
    pub stream: bool,
    pub seed: Option<u64>,
}

impl RunMetadata {
    /// Copy the schedule shape into the metadata
    pub fn with_schedule(mut self, params: &ScheduleParams) -> Self {
        self.pattern = Some(params.pattern);
        self.duration_sec = Some(params.duration_sec);
        self.target_rps = Some(params.rate);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_serialized_field_names() {
        let meta = RunMetadata {
            url: "http://localhost:8000".to_string(),
            model: "placeholder".to_string(),
            prompt: "Hello, world!".to_string(),
            max_tokens: 64,
            concurrency: 10,
            requests: 200,
            pattern: None,
            duration_sec: None,
            target_rps: None,
            test_start_time: 1_700_000_000.25,
            stream: false,
            seed: Some(42),
        }
        .with_schedule(&ScheduleParams {
            pattern: ArrivalPattern::Poisson,
            requests: 200,
            duration_sec: 20.0,
            rate: 15.0,
        });

        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(value["pattern"], json!("poisson"));
        assert_eq!(value["duration_sec"], json!(20.0));
        assert_eq!(value["target_rps"], json!(15.0));
        assert_eq!(value["test_start_time"], json!(1_700_000_000.25));
        assert_eq!(value["seed"], json!(42));
        assert_eq!(value.as_object().unwrap().len(), 12);
    }
}
