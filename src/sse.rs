//! Server-sent event decoding.
//!
//! [`LineDecoder`] turns raw response chunks into lines and [`SseReader`]
//! turns lines into [`Event`]s, handing each one to a callback that decides
//! whether reading should continue.

use anyhow::Result;
use futures_util::{Stream, StreamExt};
use log::trace;

/// One decoded server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Id(String),
    EventName(String),
    Data(String),
}

/// Whether the consumer asked to keep reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

impl From<bool> for Flow {
    fn from(keep_going: bool) -> Self {
        if keep_going { Flow::Continue } else { Flow::Stop }
    }
}

/// Line-driven SSE state machine. Holds only the pending `data:` payload.
#[derive(Debug, Default)]
pub struct SseReader {
    data: Option<String>,
}

impl SseReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Processes one line, invoking `on_event` for every event it completes.
    pub fn feed<F>(&mut self, line: &str, on_event: &mut F) -> Result<Flow>
    where
        F: FnMut(Event) -> Result<bool>,
    {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.trim().is_empty() {
            return self.flush(on_event);
        }
        if line.starts_with(':') {
            return Ok(Flow::Continue);
        }
        if let Some(id) = line.strip_prefix("id:") {
            return emit(on_event, Event::Id(id.trim().to_string()));
        }
        if let Some(name) = line.strip_prefix("event:") {
            if self.flush(on_event)? == Flow::Stop {
                return Ok(Flow::Stop);
            }
            return emit(on_event, Event::EventName(name.trim().to_string()));
        }
        if let Some(data) = line.strip_prefix("data:") {
            let data = data.trim();
            match self.data.as_mut() {
                Some(buffer) => {
                    buffer.push('\n');
                    buffer.push_str(data);
                }
                None => self.data = Some(data.to_string()),
            }
            return Ok(Flow::Continue);
        }

        trace!("Ignoring unrecognized SSE line: {}", line);
        Ok(Flow::Continue)
    }

    /// Emits the pending data payload, if any.
    pub fn flush<F>(&mut self, on_event: &mut F) -> Result<Flow>
    where
        F: FnMut(Event) -> Result<bool>,
    {
        match self.data.take() {
            Some(data) => emit(on_event, Event::Data(data)),
            None => Ok(Flow::Continue),
        }
    }
}

fn emit<F>(on_event: &mut F, event: Event) -> Result<Flow>
where
    F: FnMut(Event) -> Result<bool>,
{
    trace!("SSE event: {:?}", event);
    on_event(event).map(Flow::from)
}

/// Runs a fresh reader over in-memory lines, flushing at the end.
pub fn read_lines<'a, I, F>(lines: I, mut on_event: F) -> Result<Flow>
where
    I: IntoIterator<Item = &'a str>,
    F: FnMut(Event) -> Result<bool>,
{
    let mut reader = SseReader::new();
    for line in lines {
        if reader.feed(line, &mut on_event)? == Flow::Stop {
            return Ok(Flow::Stop);
        }
    }
    reader.flush(&mut on_event)
}

/// Failure while reading an SSE line stream.
#[derive(Debug)]
pub enum ReadError<E> {
    /// The line source failed.
    Source(E),
    /// The consumer callback failed.
    Callback(anyhow::Error),
}

/// Runs a fresh reader over an async line stream, flushing at the end.
///
/// Events that were delivered before a source failure stay delivered.
pub async fn read_stream<S, E, F>(lines: S, mut on_event: F) -> Result<Flow, ReadError<E>>
where
    S: Stream<Item = Result<String, E>>,
    F: FnMut(Event) -> Result<bool>,
{
    let mut reader = SseReader::new();
    let mut lines = std::pin::pin!(lines);

    while let Some(line) = lines.next().await {
        let line = line.map_err(ReadError::Source)?;
        if reader
            .feed(&line, &mut on_event)
            .map_err(ReadError::Callback)?
            == Flow::Stop
        {
            return Ok(Flow::Stop);
        }
    }
    reader.flush(&mut on_event).map_err(ReadError::Callback)
}

/// Splits a chunked byte stream into text lines.
///
/// `\n`, `\r` and `\r\n` all end a line, including a `\r\n` pair split
/// across two chunks. Lines are decoded only once complete, so multi-byte
/// characters split across chunks survive.
#[derive(Debug, Default)]
pub struct LineDecoder {
    pending: Vec<u8>,
    after_cr: bool,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk and returns every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            let after_cr = std::mem::take(&mut self.after_cr);
            match byte {
                // Second half of a CRLF already ended the line.
                b'\n' if after_cr => {}
                b'\n' => lines.push(self.take_line()),
                b'\r' => {
                    lines.push(self.take_line());
                    self.after_cr = true;
                }
                _ => self.pending.push(byte),
            }
        }
        lines
    }

    /// Returns the trailing unterminated line, if any.
    pub fn finish(&mut self) -> Option<String> {
        self.after_cr = false;
        if self.pending.is_empty() {
            return None;
        }
        Some(self.take_line())
    }

    fn take_line(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn collect(lines: &[&str]) -> Vec<Event> {
        let mut events = Vec::new();
        read_lines(lines.iter().copied(), |event| {
            events.push(event);
            Ok(true)
        })
        .unwrap();
        events
    }

    #[test]
    fn test_event_then_multiline_data() {
        let events = collect(&["event: start", "data: hello", "data: world", "", "event: end"]);
        assert_eq!(
            events,
            vec![
                Event::EventName("start".into()),
                Event::Data("hello\nworld".into()),
                Event::EventName("end".into()),
            ]
        );
    }

    #[test]
    fn test_trailing_data_flushed_at_end_of_stream() {
        let events = collect(&["data: first", "", "data: last"]);
        assert_eq!(
            events,
            vec![Event::Data("first".into()), Event::Data("last".into())]
        );
    }

    #[test]
    fn test_event_line_flushes_pending_data_first() {
        let events = collect(&["data: a", "event: b", "data: c"]);
        assert_eq!(
            events,
            vec![
                Event::Data("a".into()),
                Event::EventName("b".into()),
                Event::Data("c".into()),
            ]
        );
    }

    #[test]
    fn test_id_is_not_buffered() {
        let events = collect(&["data: a", "id: 7", ""]);
        assert_eq!(events, vec![Event::Id("7".into()), Event::Data("a".into())]);
    }

    #[test]
    fn test_comments_and_unknown_lines_ignored() {
        let events = collect(&[": keep-alive", "retry: 100", "garbage", "data:x\r", ""]);
        assert_eq!(events, vec![Event::Data("x".into())]);
    }

    #[test]
    fn test_stop_on_flush_skips_event_name() {
        let mut events = Vec::new();
        let flow = read_lines(["data: a", "event: b", "data: c"], |event| {
            events.push(event);
            Ok(false)
        })
        .unwrap();

        assert_eq!(flow, Flow::Stop);
        assert_eq!(events, vec![Event::Data("a".into())]);
    }

    #[test]
    fn test_callback_error_propagates() {
        let result = read_lines(["data: boom", ""], |_| Err(anyhow::anyhow!("consumer failed")));
        assert!(result.unwrap_err().to_string().contains("consumer failed"));
    }

    #[tokio::test]
    async fn test_read_stream_source_error_drops_pending_data() {
        let lines = stream::iter(vec![
            Ok("data: partial".to_string()),
            Err("socket closed"),
        ]);
        let mut events = Vec::new();
        let result = read_stream(lines, |event| {
            events.push(event);
            Ok(true)
        })
        .await;

        assert!(matches!(result, Err(ReadError::Source("socket closed"))));
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_read_stream_completes() {
        let lines = stream::iter(
            ["id: 1", "data: {\"n\":1}", "", "data: [DONE]"]
                .into_iter()
                .map(|l| Ok::<_, std::io::Error>(l.to_string())),
        );
        let mut events = Vec::new();
        let flow = read_stream(lines, |event| {
            events.push(event);
            Ok(true)
        })
        .await
        .unwrap();

        assert_eq!(flow, Flow::Continue);
        assert_eq!(
            events,
            vec![
                Event::Id("1".into()),
                Event::Data("{\"n\":1}".into()),
                Event::Data("[DONE]".into()),
            ]
        );
    }

    #[test]
    fn test_line_decoder_across_chunks() {
        let mut decoder = LineDecoder::new();
        assert!(decoder.push(b"data: he").is_empty());
        assert_eq!(decoder.push(b"llo\r\n\ndata: "), vec!["data: hello", ""]);

        // U+00E9 split across chunk boundary
        assert!(decoder.push(&[0xC3]).is_empty());
        assert_eq!(decoder.push(&[0xA9, b'\n']), vec!["data: \u{e9}"]);

        assert_eq!(decoder.push(b"data: tail"), Vec::<String>::new());
        assert_eq!(decoder.finish(), Some("data: tail".to_string()));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_line_decoder_bare_carriage_returns() {
        let mut decoder = LineDecoder::new();
        let lines = decoder.push(b"data: a\rdata: b\r\rdata: c\n\n");
        assert_eq!(lines, vec!["data: a", "data: b", "", "data: c", ""]);

        let mut events = Vec::new();
        read_lines(lines.iter().map(String::as_str), |event| {
            events.push(event);
            Ok(true)
        })
        .unwrap();
        assert_eq!(events, vec![Event::Data("a\nb".into()), Event::Data("c".into())]);
    }

    #[test]
    fn test_line_decoder_crlf_split_across_chunks() {
        let mut decoder = LineDecoder::new();
        assert_eq!(decoder.push(b"data: x\r"), vec!["data: x"]);
        assert_eq!(decoder.push(b"\ndata: y\r"), vec!["data: y"]);
        assert_eq!(decoder.push(b"\n\r\n"), vec![""]);
        assert_eq!(decoder.finish(), None);
    }
}
