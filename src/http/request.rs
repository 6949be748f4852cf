//! Immutable request descriptions, rebuilt into a `reqwest::Request` per attempt.

use std::fmt;

use bytes::Bytes;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client, Method};

use crate::error::{Error, Result};
use crate::multipart::MultipartBody;

pub const APPLICATION_JSON: &str = "application/json";
pub const EVENT_STREAM: &str = "text/event-stream";

/// A base URI plus a path relative to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    base: String,
    path: String,
}

impl Target {
    pub fn new(base: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            path: path.into(),
        }
    }

    /// Full URL with exactly one `/` between base and path.
    pub fn url(&self) -> String {
        let base = self.base.trim_end_matches('/');
        let path = self.path.trim_start_matches('/');
        if path.is_empty() {
            base.to_string()
        } else {
            format!("{}/{}", base, path)
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

/// Request payload.
#[derive(Debug, Clone)]
pub enum Body {
    Empty,
    Json(Bytes),
    Multipart(MultipartBody),
    Raw { content_type: String, bytes: Bytes },
}

/// A fully described HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: String,
    headers: HeaderMap,
    body: Body,
}

impl Request {
    /// Builds a request, layering caller headers over the default `accept`.
    ///
    /// A body's own content type replaces any caller `Content-Type`.
    pub fn new(
        method: Method,
        target: &Target,
        accept: &str,
        headers: &HeaderMap,
        body: Body,
    ) -> Result<Self> {
        let mut all = HeaderMap::new();
        all.insert(ACCEPT, header_value(accept)?);
        all.extend(headers.clone());

        let content_type = match &body {
            Body::Empty => None,
            Body::Json(_) => Some(HeaderValue::from_static(APPLICATION_JSON)),
            Body::Multipart(multipart) => Some(header_value(&multipart.content_type())?),
            Body::Raw { content_type, .. } => Some(header_value(content_type)?),
        };
        if let Some(content_type) = content_type {
            all.insert(CONTENT_TYPE, content_type);
        }

        Ok(Self {
            method,
            url: target.url(),
            headers: all,
            body,
        })
    }

    /// JSON request serialized from `value`.
    pub fn json(
        method: Method,
        target: &Target,
        accept: &str,
        headers: &HeaderMap,
        value: &serde_json::Value,
    ) -> Result<Self> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| Error::InvalidRequest(format!("Cannot serialize body: {}", e)))?;
        Self::new(method, target, accept, headers, Body::Json(bytes.into()))
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Prepares one dispatch of this request on `client`.
    pub(crate) fn to_builder(&self, client: &Client) -> reqwest::RequestBuilder {
        let builder = client
            .request(self.method.clone(), &self.url)
            .headers(self.headers.clone());
        match &self.body {
            Body::Empty => builder,
            Body::Json(bytes) | Body::Raw { bytes, .. } => builder.body(bytes.clone()),
            Body::Multipart(multipart) => builder.body(multipart.bytes().clone()),
        }
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| Error::InvalidRequest(format!("Invalid header value '{}': {}", value, e)))
}
