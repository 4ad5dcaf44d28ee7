//! Request execution against an OpenAI-compatible endpoint
//!
//! This module provides:
//! - `ChatRequest` and the payload it serializes to
//! - `RequestExecutor`, the seam the dispatcher calls, and `HttpExecutor`
//! - best-effort token usage extraction

mod client;
mod request;
mod usage;

pub use client::{
    ClientConfig, DEFAULT_REQUEST_TIMEOUT, Exchange, HttpExecutor, RequestExecutor, ResponseBody,
};
pub use request::{ChatRequest, DecodingParams, completions_url, load_extra_fields};
pub use usage::{TokenUsage, extract_usage, usage_from_stream};
