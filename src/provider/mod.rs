//! Provider adapters.
//!
//! A provider tells the transport where to send requests, which extra headers
//! to forward, and where in its JSON responses content and errors live.

mod gateway;
mod registry;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::error::{Error, Result};

pub use gateway::{DONE_MARKER, Gateway};
pub use registry::ProviderRegistry;

/// The small surface the transport and extractor need from a provider.
pub trait Provider: Send + Sync {
    /// Unique name, used as the registry key and in logs.
    fn name(&self) -> &str;

    /// Base URI that request paths are resolved against.
    fn base_url(&self) -> &str;

    /// Headers forwarded unchanged on every request.
    fn headers(&self) -> &HeaderMap;

    /// Candidate locations of the generated content, tried in order.
    fn content_paths(&self) -> &[String];

    /// Locations that hold an error message when the call was rejected.
    fn error_paths(&self) -> &[String];

    /// Candidate locations of the text delta inside each streamed event.
    fn stream_content_paths(&self) -> &[String] {
        self.content_paths()
    }
}

impl<P: Provider + ?Sized> Provider for std::sync::Arc<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn base_url(&self) -> &str {
        (**self).base_url()
    }

    fn headers(&self) -> &HeaderMap {
        (**self).headers()
    }

    fn content_paths(&self) -> &[String] {
        (**self).content_paths()
    }

    fn error_paths(&self) -> &[String] {
        (**self).error_paths()
    }

    fn stream_content_paths(&self) -> &[String] {
        (**self).stream_content_paths()
    }
}

/// A provider described entirely by data.
#[derive(Debug, Clone, Default)]
pub struct ProviderProfile {
    name: String,
    base_url: String,
    headers: HeaderMap,
    content_paths: Vec<String>,
    error_paths: Vec<String>,
    stream_content_paths: Option<Vec<String>>,
}

impl ProviderProfile {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Profile for OpenAI-compatible chat completion APIs.
    pub fn openai_compatible(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self::new(name, base_url)
            .with_content_paths(["choices[0].message.content", "choices[0].text", "data[0].embedding"])
            .with_error_paths(["error.message", "error"])
            .with_stream_content_paths(["choices[0].delta.content", "choices[0].text"])
    }

    /// Adds a header, rejecting names or values that are not valid HTTP.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::InvalidRequest(format!("Invalid header name '{}': {}", name, e)))?;
        let mut value = HeaderValue::from_str(value)
            .map_err(|e| Error::InvalidRequest(format!("Invalid value for header '{}': {}", name, e)))?;
        if name == reqwest::header::AUTHORIZATION {
            value.set_sensitive(true);
        }
        self.headers.append(name, value);
        Ok(self)
    }

    pub fn with_content_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.content_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_error_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.error_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_stream_content_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stream_content_paths = Some(paths.into_iter().map(Into::into).collect());
        self
    }
}

impl Provider for ProviderProfile {
    fn name(&self) -> &str {
        &self.name
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn content_paths(&self) -> &[String] {
        &self.content_paths
    }

    fn error_paths(&self) -> &[String] {
        &self.error_paths
    }

    fn stream_content_paths(&self) -> &[String] {
        self.stream_content_paths
            .as_deref()
            .unwrap_or(&self.content_paths)
    }
}
