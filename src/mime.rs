//! Content-type detection from leading bytes.

/// Fallback used when nothing in the payload identifies its type.
pub const OCTET_STREAM: (&str, &str) = ("application/octet-stream", "bin");

/// Guesses a MIME type and file extension from raw content.
#[cfg_attr(test, mockall::automock)]
pub trait MimeDetector: Send + Sync {
    /// Returns `(mime_type, extension)` if the content is recognized.
    fn guess(&self, content: &[u8]) -> Option<(String, String)>;
}

/// Signature-based detector covering the media types providers accept.
#[derive(Debug, Clone, Copy, Default)]
pub struct MagicBytes;

impl MimeDetector for MagicBytes {
    fn guess(&self, content: &[u8]) -> Option<(String, String)> {
        sniff(content).map(|(mime, ext)| (mime.to_string(), ext.to_string()))
    }
}

fn sniff(content: &[u8]) -> Option<(&'static str, &'static str)> {
    let starts = |sig: &[u8]| content.starts_with(sig);
    let at = |offset: usize, sig: &[u8]| {
        content
            .get(offset..offset + sig.len())
            .is_some_and(|window| window == sig)
    };

    if starts(b"\x89PNG\r\n\x1a\n") {
        return Some(("image/png", "png"));
    }
    if starts(&[0xFF, 0xD8, 0xFF]) {
        return Some(("image/jpeg", "jpg"));
    }
    if starts(b"GIF87a") || starts(b"GIF89a") {
        return Some(("image/gif", "gif"));
    }
    if starts(b"RIFF") && at(8, b"WEBP") {
        return Some(("image/webp", "webp"));
    }
    if starts(b"RIFF") && at(8, b"WAVE") {
        return Some(("audio/wav", "wav"));
    }
    if starts(b"%PDF-") {
        return Some(("application/pdf", "pdf"));
    }
    if starts(b"ID3") || (content.len() > 1 && content[0] == 0xFF && content[1] & 0xE0 == 0xE0) {
        return Some(("audio/mpeg", "mp3"));
    }
    if starts(b"OggS") {
        return Some(("audio/ogg", "ogg"));
    }
    if starts(b"fLaC") {
        return Some(("audio/flac", "flac"));
    }
    if at(4, b"ftyp") {
        return Some(("video/mp4", "mp4"));
    }

    let text = std::str::from_utf8(content).ok()?;
    let trimmed = text.trim_start();
    if (trimmed.starts_with('{') || trimmed.starts_with('['))
        && serde_json::from_str::<serde_json::Value>(text).is_ok()
    {
        return Some(("application/json", "json"));
    }
    if !text.is_empty() && !text.contains('\0') {
        return Some(("text/plain", "txt"));
    }
    None
}
