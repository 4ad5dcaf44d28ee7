//! Chat-completion request construction

use std::path::Path;

use bytes::Bytes;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::ConfigError;

const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

/// Sampling and decoding knobs sent with every request
#[derive(Debug, Clone, PartialEq)]
pub struct DecodingParams {
    pub temperature: f64,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
    /// Number of completions per request (`n`)
    pub num_completions: Option<u32>,
    pub presence_penalty: Option<f64>,
    pub frequency_penalty: Option<f64>,
    /// Ask for `response_format: {"type": "json_object"}`
    pub json_mode: bool,
    /// Vendor-specific fields merged into the payload last
    pub extra: Map<String, Value>,
}

impl Default for DecodingParams {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            top_p: None,
            top_k: None,
            num_completions: None,
            presence_penalty: None,
            frequency_penalty: None,
            json_mode: false,
            extra: Map::new(),
        }
    }
}

/// Everything needed to build the (identical) payload of each request
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub stream: bool,
    pub decoding: DecodingParams,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Serialize)]
struct Payload<'a> {
    model: &'a str,
    messages: [Message<'a>; 1],
    max_tokens: u32,
    temperature: f64,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    n: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

impl ChatRequest {
    /// JSON payload with extra fields applied on top of the built-in ones
    pub fn to_payload(&self) -> Result<Value, serde_json::Error> {
        let d = &self.decoding;
        let payload = Payload {
            model: &self.model,
            messages: [Message {
                role: "user",
                content: &self.prompt,
            }],
            max_tokens: self.max_tokens,
            temperature: d.temperature,
            stream: self.stream,
            top_p: d.top_p,
            top_k: d.top_k,
            n: d.num_completions,
            presence_penalty: d.presence_penalty,
            frequency_penalty: d.frequency_penalty,
            response_format: d.json_mode.then_some(ResponseFormat {
                kind: "json_object",
            }),
            stream_options: self.stream.then_some(StreamOptions {
                include_usage: true,
            }),
        };

        let mut value = serde_json::to_value(payload)?;
        if let Value::Object(fields) = &mut value {
            for (key, extra) in &d.extra {
                fields.insert(key.clone(), extra.clone());
            }
        }
        Ok(value)
    }

    /// Serialized request body, built once and shared by every task
    pub fn to_body(&self) -> Result<Bytes, serde_json::Error> {
        Ok(Bytes::from(serde_json::to_vec(&self.to_payload()?)?))
    }
}

/// Full chat-completions URL for a base endpoint URL
pub fn completions_url(base: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.ends_with(CHAT_COMPLETIONS_PATH) {
        base.to_string()
    } else {
        format!("{base}{CHAT_COMPLETIONS_PATH}")
    }
}

/// Load vendor-specific request fields from a JSON object file
pub fn load_extra_fields(path: &Path) -> Result<Map<String, Value>, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ExtraJsonRead {
        path: path.to_path_buf(),
        source,
    })?;
    let value: Value =
        serde_json::from_str(&content).map_err(|source| ConfigError::ExtraJsonParse {
            path: path.to_path_buf(),
            source,
        })?;
    match value {
        Value::Object(fields) => Ok(fields),
        _ => Err(ConfigError::ExtraJsonNotObject(path.to_path_buf())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(stream: bool) -> ChatRequest {
        ChatRequest {
            model: "demo-llm".to_string(),
            prompt: "Hello, world!".to_string(),
            max_tokens: 64,
            stream,
            decoding: DecodingParams::default(),
        }
    }

    #[test]
    fn test_minimal_payload() {
        let payload = request(false).to_payload().unwrap();
        assert_eq!(
            payload,
            json!({
                "model": "demo-llm",
                "messages": [{"role": "user", "content": "Hello, world!"}],
                "max_tokens": 64,
                "temperature": 0.0,
                "stream": false,
            })
        );
    }

    #[test]
    fn test_streaming_payload_requests_usage() {
        let payload = request(true).to_payload().unwrap();
        assert_eq!(payload["stream"], json!(true));
        assert_eq!(payload["stream_options"], json!({"include_usage": true}));
    }

    #[test]
    fn test_decoding_overrides_and_json_mode() {
        let mut req = request(false);
        req.decoding = DecodingParams {
            temperature: 0.7,
            top_p: Some(0.9),
            top_k: Some(40),
            num_completions: Some(2),
            presence_penalty: Some(0.5),
            frequency_penalty: Some(-0.5),
            json_mode: true,
            extra: Map::new(),
        };
        let payload = req.to_payload().unwrap();
        assert_eq!(payload["temperature"], json!(0.7));
        assert_eq!(payload["top_p"], json!(0.9));
        assert_eq!(payload["top_k"], json!(40));
        assert_eq!(payload["n"], json!(2));
        assert_eq!(payload["presence_penalty"], json!(0.5));
        assert_eq!(payload["frequency_penalty"], json!(-0.5));
        assert_eq!(payload["response_format"], json!({"type": "json_object"}));
    }

    #[test]
    fn test_extra_fields_override_builtins() {
        let mut req = request(false);
        let extra = json!({"temperature": 1.0, "ignore_eos": true});
        if let Value::Object(fields) = extra {
            req.decoding.extra = fields;
        }
        let payload = req.to_payload().unwrap();
        assert_eq!(payload["temperature"], json!(1.0));
        assert_eq!(payload["ignore_eos"], json!(true));
        assert_eq!(payload["max_tokens"], json!(64));
    }

    #[test]
    fn test_completions_url() {
        assert_eq!(
            completions_url("http://localhost:8000"),
            "http://localhost:8000/v1/chat/completions"
        );
        assert_eq!(
            completions_url("http://localhost:8000/"),
            "http://localhost:8000/v1/chat/completions"
        );
        assert_eq!(
            completions_url("http://host/v1/chat/completions"),
            "http://host/v1/chat/completions"
        );
    }

    #[test]
    fn test_load_extra_fields() {
        let dir = std::env::temp_dir().join(format!("kvmini-extra-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let good = dir.join("extra.json");
        std::fs::write(&good, r#"{"repetition_penalty": 1.1}"#).unwrap();
        let fields = load_extra_fields(&good).unwrap();
        assert_eq!(fields["repetition_penalty"], json!(1.1));

        let not_object = dir.join("array.json");
        std::fs::write(&not_object, "[1, 2]").unwrap();
        assert!(matches!(
            load_extra_fields(&not_object),
            Err(ConfigError::ExtraJsonNotObject(_))
        ));

        let broken = dir.join("broken.json");
        std::fs::write(&broken, "{").unwrap();
        assert!(matches!(
            load_extra_fields(&broken),
            Err(ConfigError::ExtraJsonParse { .. })
        ));

        assert!(matches!(
            load_extra_fields(&dir.join("missing.json")),
            Err(ConfigError::ExtraJsonRead { .. })
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
