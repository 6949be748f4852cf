//! Shared HTTP plumbing for talking to LLM provider APIs.
//!
//! The transport retries transient network faults, reads server-sent event
//! streams, encodes multipart uploads, and pulls content out of provider
//! JSON with small dotted paths.

pub mod error;
pub mod extract;
pub mod http;
pub mod mime;
pub mod multipart;
pub mod provider;
pub mod sse;

pub use error::{Error, Result};
pub use extract::JsonPath;
pub use http::{ClientConfig, HttpClient, Target};
pub use multipart::Attachment;
pub use provider::{Gateway, Provider, ProviderProfile, ProviderRegistry};
pub use sse::Event;
