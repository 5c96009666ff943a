//! Incremental server-sent-events decoder for streamed completions.

/// One decoded event. Only the `data` field matters for chat completions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// Payload of one event; multiple `data:` lines are joined with '\n'.
    Data(String),
    /// The `[DONE]` sentinel.
    Done,
}

/// Buffers raw body bytes and yields complete events. Events may be split across network
/// chunks at any byte, including inside a UTF-8 sequence.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes and return every event completed by them, in order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend(bytes.iter().copied().filter(|&b| b != b'\r'));
        let mut events = Vec::new();
        while let Some(pos) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buffer.drain(..pos).collect();
            self.buffer.drain(..2);
            if let Some(ev) = parse_block(&block) {
                events.push(ev);
            }
        }
        events
    }

    /// Flush a trailing event that was not followed by a blank line (body ended early).
    pub fn finish(&mut self) -> Option<SseEvent> {
        let block = std::mem::take(&mut self.buffer);
        parse_block(&block)
    }
}

fn parse_block(block: &[u8]) -> Option<SseEvent> {
    let text = String::from_utf8_lossy(block);
    let mut data: Option<String> = None;
    for line in text.lines() {
        let Some(rest) = line.strip_prefix("data:") else {
            // comments (":keep-alive"), event:, id:, retry:
            continue;
        };
        let rest = rest.strip_prefix(' ').unwrap_or(rest);
        match data.as_mut() {
            Some(d) => {
                d.push('\n');
                d.push_str(rest);
            }
            None => data = Some(rest.to_string()),
        }
    }
    let data = data?;
    if data.trim() == "[DONE]" {
        Some(SseEvent::Done)
    } else {
        Some(SseEvent::Data(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_events_split_across_pushes() {
        let mut d = SseDecoder::new();
        assert!(d.push(b"data: {\"a\"").is_empty());
        let evs = d.push(b":1}\n\ndata: [DONE]\n\n");
        assert_eq!(
            evs,
            vec![SseEvent::Data("{\"a\":1}".to_string()), SseEvent::Done]
        );
    }

    #[test]
    fn handles_crlf_and_comments() {
        let mut d = SseDecoder::new();
        let evs = d.push(b": keep-alive\r\n\r\nevent: x\r\ndata: one\r\ndata: two\r\n\r\n");
        assert_eq!(evs, vec![SseEvent::Data("one\ntwo".to_string())]);
    }

    #[test]
    fn utf8_split_inside_codepoint() {
        let bytes = "data: héllo\n\n".as_bytes();
        let split = bytes.iter().position(|&b| b == 0xC3).unwrap() + 1;
        let mut d = SseDecoder::new();
        assert!(d.push(&bytes[..split]).is_empty());
        assert_eq!(d.push(&bytes[split..]), vec![SseEvent::Data("héllo".to_string())]);
    }

    #[test]
    fn finish_flushes_unterminated_event() {
        let mut d = SseDecoder::new();
        assert!(d.push(b"data: tail").is_empty());
        assert_eq!(d.finish(), Some(SseEvent::Data("tail".to_string())));
        assert_eq!(d.finish(), None);
    }
}
