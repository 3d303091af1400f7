//! Incremental parser for chat-completion event streams.
//!
//! Bytes are fed as they arrive. Only complete lines are decoded; the
//! trailing fragment is held back until the next feed, so a chunk boundary
//! can fall anywhere, including inside a multi-byte character.

use crate::error::{PregenError, Result};
use crate::request::{Completion, FINISH_REASON_LENGTH, StreamChunk};
use tracing::{trace, warn};

const DATA_PREFIX: &str = "data:";
const DONE_MARKER: &str = "[DONE]";

/// Accumulates one streamed completion.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    content: String,
    reasoning: String,
    finish_reason: Option<String>,
    chunk_count: usize,
    malformed: usize,
}

impl SseParser {
    /// Create an empty parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes and process every line they complete.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);

        let Some(last_newline) = self.buffer.iter().rposition(|&b| b == b'\n') else {
            return;
        };

        let rest = self.buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buffer, rest);
        for line in complete.split(|&b| b == b'\n') {
            self.process_line(line);
        }
    }

    /// Number of `data:` lines that failed to decode.
    pub fn malformed_count(&self) -> usize {
        self.malformed
    }

    /// Flush the held-back fragment and validate the stream.
    ///
    /// Fails when no chunk arrived, when nothing was accumulated, or when
    /// the model stopped on the length limit.
    pub fn finish(mut self) -> Result<Completion> {
        let tail = std::mem::take(&mut self.buffer);
        self.process_line(&tail);

        if self.chunk_count == 0 {
            return Err(PregenError::EmptyStream);
        }
        if self.content.is_empty() && self.reasoning.is_empty() {
            return Err(PregenError::EmptyContent {
                chunks: self.chunk_count,
            });
        }
        if self.finish_reason.as_deref() == Some(FINISH_REASON_LENGTH) {
            return Err(PregenError::Truncated {
                chars: self.content.chars().count(),
            });
        }

        Ok(Completion {
            content: self.content,
            reasoning: self.reasoning,
            finish_reason: self.finish_reason,
            chunk_count: self.chunk_count,
        })
    }

    fn process_line(&mut self, raw: &[u8]) {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        // Comments, event names and ids carry nothing we use.
        let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
            trace!(line, "Ignoring non-data SSE line");
            return;
        };
        let payload = payload.trim_start();
        if payload == DONE_MARKER {
            return;
        }

        let chunk: StreamChunk = match serde_json::from_str(payload) {
            Ok(chunk) => chunk,
            Err(e) => {
                self.malformed += 1;
                warn!(error = %e, payload_len = payload.len(), "Skipping malformed SSE chunk");
                return;
            }
        };

        let Some(choice) = chunk.choices.into_iter().next() else {
            return;
        };
        self.chunk_count += 1;

        if let Some(delta) = choice.delta {
            if let Some(text) = delta.content {
                self.content.push_str(&text);
            }
            if let Some(text) = delta.reasoning_content {
                self.reasoning.push_str(&text);
            }
        }
        if let Some(reason) = choice.finish_reason {
            self.finish_reason = Some(reason);
        }
    }
}

/// Parse a complete stream body in one go.
pub fn parse_stream(body: &[u8]) -> Result<Completion> {
    let mut parser = SseParser::new();
    parser.feed(body);
    parser.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(content: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"delta": {"content": content}}]})
        )
    }

    fn sample_stream() -> String {
        let mut body = String::new();
        body.push_str(": keep-alive\n\n");
        body.push_str(&chunk("Héllo, "));
        body.push_str(&chunk("世界"));
        body.push_str(&chunk("! ✓"));
        body.push_str(
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
        );
        body.push_str("data: [DONE]\n\n");
        body
    }

    #[test]
    fn test_parse_whole_stream() {
        let completion = parse_stream(sample_stream().as_bytes()).unwrap();
        assert_eq!(completion.content, "Héllo, 世界! ✓");
        assert_eq!(completion.finish_reason.as_deref(), Some("stop"));
        assert_eq!(completion.chunk_count, 4);
    }

    #[test]
    fn test_arbitrary_split_points_match_single_delivery() {
        let body = sample_stream();
        let bytes = body.as_bytes();
        let reference = parse_stream(bytes).unwrap();

        for chunk_size in 1..=17 {
            let mut parser = SseParser::new();
            for piece in bytes.chunks(chunk_size) {
                parser.feed(piece);
            }
            assert_eq!(parser.finish().unwrap(), reference, "chunk size {chunk_size}");
        }

        // Every two-way split, including inside multi-byte characters.
        for split in 0..bytes.len() {
            let mut parser = SseParser::new();
            parser.feed(&bytes[..split]);
            parser.feed(&bytes[split..]);
            assert_eq!(parser.finish().unwrap(), reference, "split at {split}");
        }
    }

    #[test]
    fn test_malformed_chunk_does_not_poison_stream() {
        let body = format!(
            "{}data: {{\"choices\": [oops\n{}data: [DONE]\n",
            chunk("one "),
            chunk("two")
        );
        let mut parser = SseParser::new();
        parser.feed(body.as_bytes());
        assert_eq!(parser.malformed_count(), 1);

        let completion = parser.finish().unwrap();
        assert_eq!(completion.content, "one two");
        assert_eq!(completion.chunk_count, 2);
    }

    #[test]
    fn test_done_and_blank_lines_contribute_nothing() {
        let body = format!("\n\n{}\r\n\r\ndata: [DONE]\n\ndata:[DONE]\n", chunk("x"));
        let completion = parse_stream(body.as_bytes()).unwrap();
        assert_eq!(completion.content, "x");
        assert_eq!(completion.chunk_count, 1);
    }

    #[test]
    fn test_reasoning_only_is_accepted() {
        let body = "data: {\"choices\":[{\"delta\":{\"reasoning_content\":\"thinking\"}}]}\n";
        let completion = parse_stream(body.as_bytes()).unwrap();
        assert!(completion.content.is_empty());
        assert_eq!(completion.reasoning, "thinking");
    }

    #[test]
    fn test_finish_reason_survives_later_chunks_without_one() {
        let body = format!(
            "data: {{\"choices\":[{{\"delta\":{{\"content\":\"a\"}},\"finish_reason\":\"stop\"}}]}}\n{}",
            chunk("b")
        );
        let completion = parse_stream(body.as_bytes()).unwrap();
        assert_eq!(completion.finish_reason.as_deref(), Some("stop"));
        assert_eq!(completion.content, "ab");
    }

    #[test]
    fn test_truncation_is_always_an_error() {
        let long = "word ".repeat(500);
        let body = format!(
            "{}data: {{\"choices\":[{{\"delta\":{{}},\"finish_reason\":\"length\"}}]}}\ndata: [DONE]\n",
            chunk(&long)
        );
        let err = parse_stream(body.as_bytes()).unwrap_err();
        assert!(matches!(err, PregenError::Truncated { chars: 2500 }));
    }

    #[test]
    fn test_empty_streams_fail() {
        assert!(matches!(
            parse_stream(b"data: [DONE]\n"),
            Err(PregenError::EmptyStream)
        ));
        assert!(matches!(
            parse_stream(b"data: {\"choices\":[]}\n"),
            Err(PregenError::EmptyStream)
        ));
        assert!(matches!(
            parse_stream(b"data: {\"choices\":[{\"delta\":{\"content\":\"\"}}]}\n"),
            Err(PregenError::EmptyContent { chunks: 1 })
        ));
    }

    #[test]
    fn test_unterminated_final_line_is_processed() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}";
        let mut parser = SseParser::new();
        parser.feed(body.as_bytes());
        assert_eq!(parser.chunk_count, 0);
        assert_eq!(parser.finish().unwrap().content, "tail");
    }
}
