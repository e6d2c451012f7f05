//! Upstream chunk model and incremental SSE decoding.
//!
//! Providers stream completions as server-sent events; network reads slice
//! those events arbitrarily. [`SseDecoder`] reassembles complete events from
//! the byte stream and yields their `data:` payloads; the provider adapter
//! then parses each payload into [`UpstreamChunk`] values. The decoder is
//! purely computational: no I/O, no suspension.

/// One parsed unit of an upstream response stream.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamChunk {
    /// Incremental assistant text.
    DeltaContent(String),
    /// Incremental tool-call payload (passed through opaquely).
    DeltaToolCall(String),
    /// Terminal marker with the provider's finish reason.
    Finish(Option<String>),
    /// Upstream reported an error mid-stream.
    Error { code: String, message: String },
    /// Comment or ping frame; carries no content.
    Keepalive,
}

impl UpstreamChunk {
    /// Whether no further chunks will follow.
    pub fn is_terminal(&self) -> bool {
        matches!(self, UpstreamChunk::Finish(_) | UpstreamChunk::Error { .. })
    }
}

/// One reassembled SSE event.
#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    /// Joined `data:` payload of one event.
    Data(String),
    /// Comment-only event (`: ping`), used by providers as keepalive.
    Comment,
}

/// Incremental decoder for `text/event-stream` bytes.
#[derive(Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds bytes and returns every event completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buf.extend_from_slice(bytes);
        let mut events = Vec::new();

        loop {
            let Some((end, skip)) = find_event_boundary(&self.buf) else {
                break;
            };
            let block: Vec<u8> = self.buf.drain(..end + skip).take(end).collect();
            if let Some(event) = parse_event(&block) {
                events.push(event);
            }
        }

        events
    }
}

/// Finds the first `\n\n` or `\r\n\r\n` boundary.
fn find_event_boundary(buf: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i + 1 < buf.len() {
        if buf[i] == b'\n' && buf[i + 1] == b'\n' {
            return Some((i, 2));
        }
        if i + 3 < buf.len() && &buf[i..i + 4] == b"\r\n\r\n" {
            return Some((i, 4));
        }
        i += 1;
    }
    None
}

/// Parses one event block into its data payload.
fn parse_event(block: &[u8]) -> Option<SseEvent> {
    let text = String::from_utf8_lossy(block);
    let mut data_lines = Vec::new();
    let mut saw_comment = false;

    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
        } else if line.starts_with(':') {
            saw_comment = true;
        }
        // `event:`/`id:`/`retry:` fields are irrelevant to the chunk shape
        // any of our providers produce.
    }

    if !data_lines.is_empty() {
        Some(SseEvent::Data(data_lines.join("\n")))
    } else if saw_comment {
        Some(SseEvent::Comment)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_across_reads_reassembles() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"a\":").is_empty());
        let events = decoder.push(b"1}\n\ndata: [DONE]\n\n");
        assert_eq!(
            events,
            vec![
                SseEvent::Data("{\"a\":1}".to_string()),
                SseEvent::Data("[DONE]".to_string()),
            ]
        );
    }

    #[test]
    fn crlf_delimiters_are_accepted() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"data: x\r\n\r\ndata: y\r\n\r\n");
        assert_eq!(
            events,
            vec![
                SseEvent::Data("x".to_string()),
                SseEvent::Data("y".to_string())
            ]
        );
    }

    #[test]
    fn comments_become_keepalive_markers() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b": ping\n\n");
        assert_eq!(events, vec![SseEvent::Comment]);
    }

    #[test]
    fn multi_line_data_joins_with_newline() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"data: line1\ndata: line2\n\n");
        assert_eq!(events, vec![SseEvent::Data("line1\nline2".to_string())]);
    }

    #[test]
    fn incomplete_tail_is_retained() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: partial").is_empty());
        assert!(decoder.push(b" still partial").is_empty());
        let events = decoder.push(b" done\n\n");
        assert_eq!(
            events,
            vec![SseEvent::Data("partial still partial done".to_string())]
        );
    }
}
