//! HTTP exchange with an OpenAI-compatible endpoint

use std::error::Error as _;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use super::request::{ChatRequest, completions_url};
use crate::error::EngineError;

/// Longest error body excerpt kept on an outcome
const ERROR_SNIPPET_CHARS: usize = 200;

/// Default transport timeout, applied to connecting and to each read
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Body captured from an exchange
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Empty,
    /// Concatenated streamed text, or a non-JSON body
    Text(String),
    Json(Value),
}

/// Raw facts about one request/response exchange.
///
/// Chunk instants are absolute so the caller can measure them against the
/// same origin it uses for end-to-end latency.
#[derive(Debug, Clone)]
pub struct Exchange {
    /// HTTP status, 0 when the transport failed before or during the response
    pub status: u16,
    pub first_chunk_at: Option<Instant>,
    pub last_chunk_at: Option<Instant>,
    pub body: ResponseBody,
    pub error: Option<String>,
}

impl Exchange {
    /// Exchange that never produced a usable response
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: 0,
            first_chunk_at: None,
            last_chunk_at: None,
            body: ResponseBody::Empty,
            error: Some(error.into()),
        }
    }

    /// Completed exchange without chunk timing
    pub fn completed(status: u16, body: ResponseBody) -> Self {
        let error = status_error(status, &body);
        Self {
            status,
            first_chunk_at: None,
            last_chunk_at: None,
            body,
            error,
        }
    }
}

/// Performs one request/response exchange.
///
/// Implementations must not fail: every problem is reported through the
/// returned [`Exchange`].
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    async fn execute(&self) -> Exchange;
}

/// Endpoint and transport settings
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the endpoint; the chat-completions path is appended
    pub url: String,
    pub api_key: Option<String>,
    /// Skip TLS certificate verification
    pub insecure: bool,
    /// Bound on connecting and on each idle read, not on the whole exchange
    pub timeout: Duration,
}

/// `reqwest`-backed executor that sends the same chat request every time
pub struct HttpExecutor {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    body: Bytes,
    stream: bool,
}

impl HttpExecutor {
    pub fn new(config: &ClientConfig, request: &ChatRequest) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.timeout)
            .read_timeout(config.timeout)
            .danger_accept_invalid_certs(config.insecure)
            .build()?;
        let url = completions_url(&config.url);
        debug!("Chat completions endpoint: {}", url);

        Ok(Self {
            client,
            url,
            api_key: config.api_key.clone(),
            body: request.to_body()?,
            stream: request.stream,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn read_stream(&self, status: u16, response: reqwest::Response) -> Exchange {
        let mut first_chunk_at = None;
        let mut last_chunk_at = None;
        let mut raw: Vec<u8> = Vec::new();

        let mut chunks = response.bytes_stream();
        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(bytes) if bytes.is_empty() => {}
                Ok(bytes) => {
                    let now = Instant::now();
                    first_chunk_at.get_or_insert(now);
                    last_chunk_at = Some(now);
                    raw.extend_from_slice(&bytes);
                }
                Err(e) => {
                    return Exchange::failed(format!(
                        "stream interrupted after {} bytes: {}",
                        raw.len(),
                        describe(&e)
                    ));
                }
            }
        }

        let body = ResponseBody::Text(String::from_utf8_lossy(&raw).into_owned());
        Exchange {
            first_chunk_at,
            last_chunk_at,
            ..Exchange::completed(status, body)
        }
    }

    async fn read_body(&self, status: u16, response: reqwest::Response) -> Exchange {
        match response.bytes().await {
            Ok(bytes) if bytes.is_empty() => Exchange::completed(status, ResponseBody::Empty),
            Ok(bytes) => {
                let body = match serde_json::from_slice::<Value>(&bytes) {
                    Ok(json) => ResponseBody::Json(json),
                    Err(_) => ResponseBody::Text(String::from_utf8_lossy(&bytes).into_owned()),
                };
                Exchange::completed(status, body)
            }
            Err(e) => Exchange::failed(format!("failed to read response body: {}", describe(&e))),
        }
    }
}

#[async_trait]
impl RequestExecutor for HttpExecutor {
    async fn execute(&self) -> Exchange {
        let mut request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(self.body.clone());
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return Exchange::failed(describe(&e)),
        };
        let status = response.status().as_u16();

        if self.stream {
            self.read_stream(status, response).await
        } else {
            self.read_body(status, response).await
        }
    }
}

/// Error message including the underlying causes reqwest hides in `source()`
fn describe(error: &reqwest::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn status_error(status: u16, body: &ResponseBody) -> Option<String> {
    if status == 200 {
        return None;
    }
    let snippet: String = match body {
        ResponseBody::Empty => String::new(),
        ResponseBody::Text(text) => text.trim().chars().take(ERROR_SNIPPET_CHARS).collect(),
        ResponseBody::Json(json) => json.to_string().chars().take(ERROR_SNIPPET_CHARS).collect(),
    };
    if snippet.is_empty() {
        Some(format!("HTTP {status}"))
    } else {
        Some(format!("HTTP {status}: {snippet}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_failed_exchange_has_status_zero() {
        let exchange = Exchange::failed("connection refused");
        assert_eq!(exchange.status, 0);
        assert_eq!(exchange.error.as_deref(), Some("connection refused"));
        assert_eq!(exchange.body, ResponseBody::Empty);
        assert!(exchange.first_chunk_at.is_none());
    }

    #[test]
    fn test_ok_exchange_has_no_error() {
        let exchange = Exchange::completed(200, ResponseBody::Json(json!({"id": "x"})));
        assert!(exchange.error.is_none());
    }

    #[test]
    fn test_non_200_exchange_records_snippet() {
        let exchange = Exchange::completed(503, ResponseBody::Text("  overloaded \n".into()));
        assert_eq!(exchange.error.as_deref(), Some("HTTP 503: overloaded"));

        let exchange = Exchange::completed(500, ResponseBody::Empty);
        assert_eq!(exchange.error.as_deref(), Some("HTTP 500"));

        let long = "x".repeat(1_000);
        let exchange = Exchange::completed(502, ResponseBody::Text(long));
        let error = exchange.error.unwrap();
        assert_eq!(error.len(), "HTTP 502: ".len() + ERROR_SNIPPET_CHARS);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_captured_not_raised() {
        let config = ClientConfig {
            // Port 9 (discard) on loopback is closed in test environments
            url: "http://127.0.0.1:9".to_string(),
            api_key: Some("secret".to_string()),
            insecure: false,
            timeout: Duration::from_secs(5),
        };
        let request = ChatRequest {
            model: "m".to_string(),
            prompt: "p".to_string(),
            max_tokens: 1,
            stream: false,
            decoding: Default::default(),
        };
        let executor = HttpExecutor::new(&config, &request).unwrap();
        assert_eq!(executor.url(), "http://127.0.0.1:9/v1/chat/completions");

        let exchange = executor.execute().await;
        assert_eq!(exchange.status, 0);
        assert!(exchange.error.is_some());
    }
}
