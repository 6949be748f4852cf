//! Dot-path extraction of content and error messages from JSON responses.
//!
//! Providers disagree on where they put the generated text or the error
//! message, so callers describe candidate locations as paths such as
//! `choices[0].message.content` and let the extractor try them in order.

use std::fmt;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use log::debug;
use serde_json::Value;

use crate::error::{Error, Result};

/// Maximum number of characters of a malformed body kept in the error.
const EXCERPT_LIMIT: usize = 256;

/// Array access attached to a path segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Index {
    /// `name[3]`
    At(usize),
    /// `name[*]`: first element whose remaining path resolves to a non-blank value.
    Any,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Segment {
    field: String,
    index: Option<Index>,
}

/// A parsed path like `output.choices[0].text`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    raw: String,
    segments: Vec<Segment>,
}

impl JsonPath {
    /// Resolves the path against `root`, returning the value as trimmed text.
    ///
    /// Returns `None` as soon as a field is missing or null, an index is out
    /// of range, or a value has the wrong type. Blank strings also count as
    /// absent.
    pub fn resolve(&self, root: &Value) -> Option<String> {
        resolve_segments(&self.segments, root, trimmed_text)
    }

    /// Like [`resolve`](Self::resolve) but keeps surrounding whitespace of
    /// string values, as streamed text deltas need it.
    pub fn resolve_untrimmed(&self, root: &Value) -> Option<String> {
        resolve_segments(&self.segments, root, untrimmed_text)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for JsonPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let raw = s.trim();
        if raw.is_empty() {
            return Err(Error::InvalidPath(s.to_string()));
        }

        let mut segments = Vec::new();
        for part in raw.split('.') {
            segments.push(parse_segment(part).ok_or_else(|| Error::InvalidPath(s.to_string()))?);
        }

        Ok(JsonPath {
            raw: raw.to_string(),
            segments,
        })
    }
}

fn parse_segment(part: &str) -> Option<Segment> {
    let Some(open) = part.find('[') else {
        if part.is_empty() || part.contains(']') {
            return None;
        }
        return Some(Segment {
            field: part.to_string(),
            index: None,
        });
    };

    let inner = part[open + 1..].strip_suffix(']')?;
    let index = match inner.trim() {
        "*" => Index::Any,
        n => Index::At(n.parse().ok()?),
    };
    let field = &part[..open];
    if field.contains(']') {
        return None;
    }

    Some(Segment {
        field: field.to_string(),
        index: Some(index),
    })
}

fn resolve_segments(
    segments: &[Segment],
    current: &Value,
    text: fn(&Value) -> Option<String>,
) -> Option<String> {
    let Some((segment, rest)) = segments.split_first() else {
        return text(current);
    };

    let value = if segment.field.is_empty() {
        current
    } else {
        current.as_object()?.get(&segment.field)?
    };
    if value.is_null() {
        return None;
    }

    match segment.index {
        None => resolve_segments(rest, value, text),
        Some(Index::At(i)) => resolve_segments(rest, value.as_array()?.get(i)?, text),
        Some(Index::Any) => value
            .as_array()?
            .iter()
            .find_map(|item| resolve_segments(rest, item, text)),
    }
}

/// Canonical text of a resolved value; `None` for null or blank.
fn trimmed_text(value: &Value) -> Option<String> {
    untrimmed_text(value).map(|text| text.trim().to_string())
}

fn untrimmed_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if text.trim().is_empty() { None } else { Some(text) }
}

/// Tries `paths` in order, parsing each one only when it is reached.
///
/// A malformed path fails the call with [`Error::InvalidPath`] once the
/// search gets to it; a hit on an earlier candidate returns first.
fn find_first<S, F>(paths: &[S], resolve: F) -> Result<Option<(JsonPath, String)>>
where
    S: AsRef<str>,
    F: Fn(&JsonPath) -> Option<String>,
{
    for raw in paths {
        let path: JsonPath = raw.as_ref().parse()?;
        if let Some(text) = resolve(&path) {
            return Ok(Some((path, text)));
        }
    }
    Ok(None)
}

/// Returns the first candidate path that resolves to a non-blank value.
pub fn first_match<S: AsRef<str>>(root: &Value, paths: &[S]) -> Result<Option<String>> {
    Ok(find_first(paths, |path| path.resolve(root))?.map(|(path, text)| {
        debug!("Resolved content at '{}'", path);
        text
    }))
}

/// Like [`first_match`] but keeps whitespace around string values.
pub fn first_delta<S: AsRef<str>>(root: &Value, paths: &[S]) -> Result<Option<String>> {
    Ok(find_first(paths, |path| path.resolve_untrimmed(root))?.map(|(_, text)| text))
}

/// Extracts content from the first matching path or reports every path tried.
pub fn extract_content<S: AsRef<str>>(root: &Value, paths: &[S]) -> Result<String> {
    first_match(root, paths)?.ok_or_else(|| Error::ContentNotFound {
        paths: paths.iter().map(|p| p.as_ref().to_string()).collect(),
    })
}

/// Fails with [`Error::Api`] if any error path holds a non-blank value.
pub fn check_errors<S: AsRef<str>>(root: &Value, error_paths: &[S]) -> Result<()> {
    match find_first(error_paths, |path| path.resolve(root))? {
        Some((path, message)) => {
            debug!("Error path '{}' matched", path);
            Err(Error::Api(message))
        }
        None => Ok(()),
    }
}

/// Extracts a base64-encoded payload and decodes it.
pub fn extract_binary<S: AsRef<str>>(root: &Value, paths: &[S]) -> Result<Vec<u8>> {
    let encoded = extract_content(root, paths)?;
    // Data URLs carry the payload after the comma.
    let payload = match encoded.split_once(";base64,") {
        Some((_, data)) => data,
        None => encoded.as_str(),
    };
    STANDARD
        .decode(payload)
        .map_err(|e| Error::Decode(format!("payload is not valid base64: {}", e)))
}

/// Parses a response body that is expected to be JSON.
pub fn parse_body(text: &str) -> Result<Value> {
    serde_json::from_str(text).map_err(|source| Error::MalformedResponse {
        excerpt: excerpt(text),
        source,
    })
}

fn excerpt(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(EXCERPT_LIMIT).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}
