//! HTTP client with built-in retry logic and SSE streaming.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Context;
use bytes::Bytes;
use futures_util::StreamExt;
use log::{debug, info};
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, Response};
use tokio::sync::mpsc;

use super::config::ClientConfig;
use super::request::{APPLICATION_JSON, Body, EVENT_STREAM, Request, Target};
use super::retry::{AttemptError, RetryPolicy, with_retry};
use crate::error::{Error, Result};
use crate::multipart::{self, Attachment};
use crate::sse::{self, Event, LineDecoder, ReadError};

/// Correlation ids for log lines; unique per logical call within the process.
static NEXT_CALL_ID: AtomicU64 = AtomicU64::new(1);

fn next_call_id() -> u64 {
    NEXT_CALL_ID.fetch_add(1, Ordering::Relaxed)
}

/// HTTP client with classified retries, shared across concurrent calls.
///
/// Cloning is cheap; clones share one connection pool.
#[derive(Clone, Debug)]
pub struct HttpClient {
    client: Client,
    policy: RetryPolicy,
}

impl HttpClient {
    /// Wraps an existing reqwest Client.
    pub fn new(client: Client, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    /// Builds the connection pool and retry policy from `config`.
    pub fn from_config(config: &ClientConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build()
            .context("Failed to build HTTP client")?;

        debug!(
            "HTTP client ready (user agent '{}', {} attempts)",
            config.user_agent, config.max_retries
        );
        Ok(Self::new(client, config.retry_policy()))
    }

    /// Returns a reference to the underlying reqwest Client.
    pub fn inner(&self) -> &Client {
        &self.client
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Sends a request without a body and returns the response text.
    #[tracing::instrument(skip(self, headers))]
    pub async fn send(&self, method: Method, target: &Target, headers: &HeaderMap) -> Result<String> {
        let request = Request::new(method, target, APPLICATION_JSON, headers, Body::Empty)?;
        self.execute_text(&request).await
    }

    /// POSTs a JSON body and returns the response text.
    #[tracing::instrument(skip(self, headers, body))]
    pub async fn send_json(
        &self,
        target: &Target,
        headers: &HeaderMap,
        body: &serde_json::Value,
    ) -> Result<String> {
        let request = Request::json(Method::POST, target, APPLICATION_JSON, headers, body)?;
        self.execute_text(&request).await
    }

    /// POSTs an attachment as multipart/form-data and returns the response text.
    #[tracing::instrument(skip(self, headers, attachment), fields(file = attachment.file_name()))]
    pub async fn send_upload(
        &self,
        target: &Target,
        headers: &HeaderMap,
        attachment: &Attachment,
    ) -> Result<String> {
        let body = multipart::encode(attachment);
        let request = Request::new(
            Method::POST,
            target,
            APPLICATION_JSON,
            headers,
            Body::Multipart(body),
        )?;
        self.execute_text(&request).await
    }

    /// Sends a request and returns the raw response bytes (audio, images, ...).
    #[tracing::instrument(skip(self, headers, body))]
    pub async fn send_bytes(
        &self,
        method: Method,
        target: &Target,
        headers: &HeaderMap,
        body: Option<&serde_json::Value>,
    ) -> Result<Bytes> {
        let request = match body {
            Some(value) => Request::json(method, target, "*/*", headers, value)?,
            None => Request::new(method, target, "*/*", headers, Body::Empty)?,
        };
        let call_id = next_call_id();
        self.execute(&request, call_id, |response| async move {
            response.bytes().await.map_err(read_fault)
        })
        .await
    }

    /// POSTs a JSON body and feeds the event-stream response to `on_event`.
    ///
    /// Completes when the stream ends or `on_event` returns `false`. An error
    /// returned by `on_event` becomes the result of the call. Events already
    /// delivered are not retracted when the stream fails later.
    #[tracing::instrument(skip(self, headers, body, on_event))]
    pub async fn stream<F>(
        &self,
        target: &Target,
        headers: &HeaderMap,
        body: &serde_json::Value,
        on_event: F,
    ) -> Result<()>
    where
        F: FnMut(Event) -> anyhow::Result<bool>,
    {
        let request = Request::json(Method::POST, target, EVENT_STREAM, headers, body)?;
        let call_id = next_call_id();
        let response = self
            .execute(&request, call_id, |response| async move {
                Ok::<_, AttemptError>(response)
            })
            .await?;

        debug!("[call {}] streaming response from {}", call_id, request.url());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let pump = tokio::spawn(pump_lines(response, tx));

        let lines = futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx));
        let result = sse::read_stream(lines, on_event).await;
        // Stops the pump when the consumer ended early.
        pump.abort();

        match result {
            Ok(flow) => {
                debug!("[call {}] stream finished ({:?})", call_id, flow);
                Ok(())
            }
            Err(ReadError::Source(err)) => Err(Error::StreamInterrupted(err)),
            Err(ReadError::Callback(err)) => Err(Error::Callback(err)),
        }
    }

    async fn execute_text(&self, request: &Request) -> Result<String> {
        let call_id = next_call_id();
        self.execute(request, call_id, |response| async move {
            response.text().await.map_err(read_fault)
        })
        .await
    }

    /// Dispatches `request` under the retry policy and hands successful
    /// responses to `read`. Statuses of 400 and above fail without retry.
    async fn execute<F, Fut, T>(&self, request: &Request, call_id: u64, read: F) -> Result<T>
    where
        F: Fn(Response) -> Fut,
        Fut: Future<Output = std::result::Result<T, AttemptError>>,
    {
        let label = format!("[call {}] {} {}", call_id, request.method(), request.url());

        with_retry(self.policy, &label, |attempt| {
            let builder = request.to_builder(&self.client);
            let read = &read;
            let label = &label;
            async move {
                debug!("{}: dispatching (attempt {})", label, attempt + 1);
                let response = builder
                    .send()
                    .await
                    .map_err(|e| {
                        AttemptError::Fault(anyhow::Error::from(e).context("Failed to send request"))
                    })?;

                let status = response.status();
                if status.as_u16() >= 400 {
                    let body = response
                        .text()
                        .await
                        .unwrap_or_else(|e| format!("<unreadable body: {}>", e));
                    info!("{}: server answered {}", label, status);
                    return Err(AttemptError::Fatal(Error::Status { status, body }));
                }

                read(response).await
            }
        })
        .await
    }
}

fn read_fault(err: reqwest::Error) -> AttemptError {
    AttemptError::Fault(anyhow::Error::from(err).context("Failed to read response body"))
}

/// Reads the response body and forwards complete lines until the body ends
/// or the receiver goes away.
async fn pump_lines(response: Response, tx: mpsc::UnboundedSender<anyhow::Result<String>>) {
    let mut chunks = response.bytes_stream();
    let mut decoder = LineDecoder::new();

    while let Some(chunk) = chunks.next().await {
        match chunk {
            Ok(chunk) => {
                for line in decoder.push(&chunk) {
                    if tx.send(Ok(line)).is_err() {
                        return;
                    }
                }
            }
            Err(err) => {
                let err = anyhow::Error::from(err).context("Failed to read event stream");
                let _ = tx.send(Err(err));
                return;
            }
        }
    }

    if let Some(line) = decoder.finish() {
        let _ = tx.send(Ok(line));
    }
}
