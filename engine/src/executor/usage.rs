//! Best-effort token usage extraction
//!
//! Usage is read after the exchange has finished and never affects timing.
//! Missing or malformed usage data simply leaves the counts unset.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::client::ResponseBody;

/// Token counts reported by the endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

impl TokenUsage {
    fn from_value(value: &Value) -> Option<Self> {
        let usage = value.get("usage")?.as_object()?;
        let field = |name: &str| usage.get(name).and_then(Value::as_u64);
        let parsed = Self {
            prompt_tokens: field("prompt_tokens"),
            completion_tokens: field("completion_tokens"),
            total_tokens: field("total_tokens"),
        };
        (parsed != Self::default()).then_some(parsed)
    }
}

/// Extract usage from whatever body the exchange captured
pub fn extract_usage(body: &ResponseBody) -> Option<TokenUsage> {
    match body {
        ResponseBody::Json(value) => TokenUsage::from_value(value),
        ResponseBody::Text(text) => usage_from_stream(text),
        ResponseBody::Empty => None,
    }
}

/// Find the last usage-bearing JSON object in an assembled event stream.
///
/// Accepts server-sent events (`data: {...}` lines, `data: [DONE]` ignored)
/// as well as newline-delimited JSON objects.
pub fn usage_from_stream(text: &str) -> Option<TokenUsage> {
    text.lines().rev().find_map(|line| {
        let line = line.trim();
        let data = line.strip_prefix("data:").unwrap_or(line).trim();
        if !data.starts_with('{') {
            return None;
        }
        serde_json::from_str::<Value>(data)
            .ok()
            .and_then(|value| TokenUsage::from_value(&value))
    })
}
