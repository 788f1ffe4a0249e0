//! Incremental Server-Sent Events parser
//!
//! Feeds raw response bytes in arbitrary chunk sizes and yields complete
//! events. Bytes are buffered until a full line is available, so multi-byte
//! characters split across chunks survive.

/// A parsed Server-Sent Event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// `event:` field, if present
    pub event_type: Option<String>,
    /// `data:` lines joined with `\n`
    pub data: String,
}

impl SseEvent {
    /// Whether this is the `[DONE]` terminator
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

/// Line-buffering SSE parser
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event_type: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a chunk of bytes, returning events completed by it
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(event) = self.process_line(line) {
                events.push(event);
            }
        }

        events
    }

    /// Emit whatever is left once the stream has ended
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest).trim_end().to_string();
            if let Some(event) = self.process_line(&line) {
                return Some(event);
            }
        }
        self.take_event()
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.take_event();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "data" => self.data.push(value.to_string()),
            "event" => self.event_type = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn take_event(&mut self) -> Option<SseEvent> {
        if self.data.is_empty() {
            self.event_type = None;
            return None;
        }
        Some(SseEvent {
            event_type: self.event_type.take(),
            data: std::mem::take(&mut self.data).join("\n"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_across_chunks() {
        let mut parser = SseParser::new();
        let mut events = parser.push(b"event: content_block_delta\ndata: {\"a\"");
        assert!(events.is_empty());

        events.extend(parser.push(b":1}\n\ndata: [DONE]\n\n"));
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type.as_deref(), Some("content_block_delta"));
        assert_eq!(events[0].data, "{\"a\":1}");
        assert!(events[1].is_done());
    }

    #[test]
    fn test_split_utf8_and_crlf() {
        let bytes = "data: olá\r\n\r\n".as_bytes();
        let mut parser = SseParser::new();
        let mut events = parser.push(&bytes[..9]);
        events.extend(parser.push(&bytes[9..]));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "olá");
    }

    #[test]
    fn test_comments_and_trailing_event() {
        let mut parser = SseParser::new();
        assert!(parser.push(b": ping\n\n").is_empty());
        assert!(parser.push(b"data: tail").is_empty());
        assert_eq!(parser.finish().map(|e| e.data), Some("tail".to_string()));
        assert_eq!(parser.finish(), None);
    }
}
