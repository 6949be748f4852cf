//! Terminal failure values for transport and extraction calls.

use reqwest::StatusCode;

/// Result alias used by every request and extraction operation.
pub type Result<T> = std::result::Result<T, Error>;

/// The single typed failure a call resolves to.
#[derive(Debug)]
pub enum Error {
    /// Transport fault that was not transient or ran out of attempts.
    RetriesExhausted {
        attempts: usize,
        source: anyhow::Error,
    },
    /// The server answered with a status code of 400 or above.
    Status { status: StatusCode, body: String },
    /// A well-formed response carried an error message at one of the error paths.
    Api(String),
    /// None of the content paths resolved to a non-blank value.
    ContentNotFound { paths: Vec<String> },
    /// The body was expected to be JSON but could not be parsed.
    MalformedResponse {
        excerpt: String,
        source: serde_json::Error,
    },
    /// An extracted payload could not be decoded.
    Decode(String),
    /// A JSON path could not be parsed.
    InvalidPath(String),
    /// The request could not be built (bad header value, bad MIME type, ...).
    InvalidRequest(String),
    /// The stream callback returned an error.
    Callback(anyhow::Error),
    /// The response stream failed after events had started flowing.
    StreamInterrupted(anyhow::Error),
}

impl Error {
    /// Whether this value represents a response the server already rejected.
    /// Such errors are never worth retrying.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::Status { .. } | Error::Api(_) | Error::ContentNotFound { .. }
        )
    }

    /// HTTP status for protocol faults.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::RetriesExhausted { attempts, source } => {
                write!(f, "Request failed after {} attempt(s): {:#}", attempts, source)
            }
            Error::Status { status, body } => {
                write!(f, "HTTP {} error: {}", status.as_u16(), body)
            }
            Error::Api(msg) => write!(f, "API error: {}", msg),
            Error::ContentNotFound { paths } => {
                write!(f, "No content found at any of: {}", paths.join(", "))
            }
            Error::MalformedResponse { excerpt, source } => {
                write!(f, "Malformed JSON response ({}): {}", source, excerpt)
            }
            Error::Decode(msg) => write!(f, "Decode error: {}", msg),
            Error::InvalidPath(path) => write!(f, "Invalid JSON path: {}", path),
            Error::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            Error::Callback(err) => write!(f, "Stream callback failed: {:#}", err),
            Error::StreamInterrupted(err) => write!(f, "Stream interrupted: {:#}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::RetriesExhausted { source, .. } => Some(source.as_ref()),
            Error::MalformedResponse { source, .. } => Some(source),
            Error::Callback(err) | Error::StreamInterrupted(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        let err = Error::Status {
            status: StatusCode::NOT_FOUND,
            body: "missing".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP 404 error: missing");
        assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
        assert!(err.is_rejection());
    }

    #[test]
    fn test_retries_exhausted_display() {
        let err = Error::RetriesExhausted {
            attempts: 3,
            source: anyhow::anyhow!("connection reset"),
        };
        let msg = err.to_string();
        assert!(msg.contains("3 attempt"));
        assert!(msg.contains("connection reset"));
        assert!(!err.is_rejection());
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_content_not_found_lists_paths() {
        let err = Error::ContentNotFound {
            paths: vec!["a.b".to_string(), "c[0]".to_string()],
        };
        assert!(err.to_string().contains("a.b, c[0]"));
    }
}
