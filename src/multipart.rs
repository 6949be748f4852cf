//! multipart/form-data encoding for file uploads.

use bytes::{BufMut, Bytes, BytesMut};
use log::debug;
use uuid::Uuid;

use crate::mime::{MimeDetector, OCTET_STREAM};

/// A binary payload destined for upload, plus the form fields sent with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    content: Bytes,
    mime_type: String,
    file_name: String,
    field_name: String,
    fields: Vec<(String, String)>,
}

impl Attachment {
    /// Creates an attachment uploaded under the `file` form field.
    pub fn new(
        content: impl Into<Bytes>,
        mime_type: impl Into<String>,
        file_name: impl Into<String>,
    ) -> Self {
        Self {
            content: content.into(),
            mime_type: mime_type.into(),
            file_name: file_name.into(),
            field_name: "file".to_string(),
            fields: Vec::new(),
        }
    }

    /// Creates an attachment whose MIME type and extension are detected
    /// from the content. `stem` is the file name without extension.
    pub fn sniffed(content: impl Into<Bytes>, stem: &str, detector: &dyn MimeDetector) -> Self {
        let content = content.into();
        let (mime_type, extension) = detector
            .guess(&content)
            .unwrap_or_else(|| (OCTET_STREAM.0.to_string(), OCTET_STREAM.1.to_string()));
        debug!("Detected {} for attachment '{}'", mime_type, stem);
        Self::new(content, mime_type, format!("{}.{}", stem, extension))
    }

    /// Sets the form field name of the file part.
    pub fn field_name(mut self, name: impl Into<String>) -> Self {
        self.field_name = name.into();
        self
    }

    /// Adds a text field emitted before the file part.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    pub fn content(&self) -> &Bytes {
        &self.content
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }
}

/// An encoded multipart body and the boundary it was built with.
#[derive(Debug, Clone)]
pub struct MultipartBody {
    boundary: String,
    bytes: Bytes,
}

impl MultipartBody {
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Value for the `Content-Type` request header.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }
}

/// Encodes the attachment's fields and content using a fresh boundary.
pub fn encode(attachment: &Attachment) -> MultipartBody {
    let boundary = format!("----llmwire-{}", Uuid::new_v4().simple());
    encode_with_boundary(attachment, boundary)
}

fn encode_with_boundary(attachment: &Attachment, boundary: String) -> MultipartBody {
    let mut buf = BytesMut::with_capacity(attachment.content.len() + 256 * (attachment.fields.len() + 1));

    for (name, value) in &attachment.fields {
        put_line(&mut buf, &format!("--{}", boundary));
        put_line(
            &mut buf,
            &format!("Content-Disposition: form-data; name=\"{}\"", escape(name)),
        );
        put_line(&mut buf, "");
        put_line(&mut buf, value);
    }

    put_line(&mut buf, &format!("--{}", boundary));
    put_line(
        &mut buf,
        &format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"",
            escape(&attachment.field_name),
            escape(&attachment.file_name)
        ),
    );
    put_line(&mut buf, &format!("Content-Type: {}", attachment.mime_type));
    put_line(&mut buf, "");
    buf.put_slice(&attachment.content);
    put_line(&mut buf, "");
    put_line(&mut buf, &format!("--{}--", boundary));

    MultipartBody {
        boundary,
        bytes: buf.freeze(),
    }
}

fn put_line(buf: &mut BytesMut, line: &str) {
    buf.put_slice(line.as_bytes());
    buf.put_slice(b"\r\n");
}

fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace(['\r', '\n'], " ")
}
