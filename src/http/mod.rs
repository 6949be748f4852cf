//! HTTP transport with classified retries, JSON/multipart bodies and SSE streaming.

mod client;
mod config;
mod request;
mod retry;

pub use client::HttpClient;
pub use config::{ClientConfig, DEFAULT_USER_AGENT};
pub use request::{APPLICATION_JSON, Body, EVENT_STREAM, Request, Target};
pub use retry::{
    AttemptError, INITIAL_BACKOFF_MS, MAX_RETRIES, RetryPolicy, RetryState, is_retryable,
    with_retry,
};
