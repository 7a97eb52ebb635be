//! Wire format of the rewrite protocol.
//!
//! A streaming response is a sequence of lines. Lines starting with the
//! `data:` marker carry a JSON frame; every other line (blank separators,
//! comments, `data: [DONE]`) is ignored:
//!
//! ```text
//! data: {"type":"chunk","content":"Hello "}
//!
//! data: {"type":"chunk","content":"world."}
//!
//! data: {"type":"complete","rewrittenContent":"Hello world."}
//! ```
//!
//! A non-streaming response is a single [`RewriteResponse`] body.

use serde::{Deserialize, Serialize};

/// Marker that prefixes every frame line.
pub const DATA_PREFIX: &str = "data:";

/// One event of a streaming response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamFrame {
    /// Incremental text to append to the live buffer.
    Chunk {
        #[serde(default)]
        content: String,
    },
    /// Authoritative final text; supersedes the accumulated deltas.
    Complete {
        #[serde(
            rename = "rewrittenContent",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        rewritten_content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        explanation: Option<String>,
    },
    /// The backend gave up on this request.
    Error {
        #[serde(default = "default_error_message")]
        error: String,
    },
}

fn default_error_message() -> String {
    "unspecified backend error".to_string()
}

impl StreamFrame {
    /// Encode as a `data:` line followed by a blank separator line.
    pub fn to_line(&self) -> String {
        // Serializing a plain enum of strings cannot fail.
        let json = serde_json::to_string(self).unwrap_or_default();
        format!("{} {}\n\n", DATA_PREFIX, json)
    }
}

/// Body of a non-streaming rewrite response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteResponse {
    #[serde(rename = "rewrittenContent")]
    pub rewritten_content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

/// Parse one protocol line.
///
/// Returns `None` for lines that carry no frame, and `Some(Err(_))` for frame
/// lines whose JSON payload is malformed.
pub fn parse_line(line: &str) -> Option<Result<StreamFrame, serde_json::Error>> {
    let payload = line.strip_prefix(DATA_PREFIX)?.trim();
    if payload.is_empty() || payload == "[DONE]" {
        return None;
    }
    Some(serde_json::from_str(payload))
}

/// Reassembles complete lines from arbitrarily split network reads.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Feed bytes; returns every line completed by them, without terminators.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(decode(&raw));
        }
        lines
    }

    /// Flush a final line that had no trailing newline.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.pending);
        Some(decode(&raw))
    }
}

fn decode(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches(['\r', '\n'])
        .to_string()
}

/// Incremental frame decoder. Malformed frames are logged and skipped.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    lines: LineBuffer,
    skipped: usize,
}

impl FrameDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<StreamFrame> {
        let lines = self.lines.push(bytes);
        lines
            .iter()
            .filter_map(|line| self.decode_line(line))
            .collect()
    }

    pub fn finish(&mut self) -> Vec<StreamFrame> {
        match self.lines.finish() {
            Some(line) => self.decode_line(&line).into_iter().collect(),
            None => Vec::new(),
        }
    }

    /// Number of frame lines dropped because their payload did not parse.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn decode_line(&mut self, line: &str) -> Option<StreamFrame> {
        match parse_line(line)? {
            Ok(frame) => Some(frame),
            Err(e) => {
                self.skipped += 1;
                tracing::warn!(error = %e, line = %clip(line), "skipping malformed stream frame");
                None
            }
        }
    }
}

fn clip(line: &str) -> String {
    line.chars().take(120).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_frame_kinds() {
        assert_eq!(
            parse_line(r#"data: {"type":"chunk","content":"Hi "}"#).unwrap().unwrap(),
            StreamFrame::Chunk { content: "Hi ".into() }
        );
        assert_eq!(
            parse_line(r#"data: {"type":"complete","rewrittenContent":"Hi there."}"#)
                .unwrap()
                .unwrap(),
            StreamFrame::Complete {
                rewritten_content: Some("Hi there.".into()),
                explanation: None
            }
        );
        assert_eq!(
            parse_line(r#"data:{"type":"error","error":"quota"}"#).unwrap().unwrap(),
            StreamFrame::Error { error: "quota".into() }
        );
    }

    #[test]
    fn ignores_non_frame_lines() {
        assert!(parse_line("").is_none());
        assert!(parse_line(": keep-alive").is_none());
        assert!(parse_line("event: message").is_none());
        assert!(parse_line("data: [DONE]").is_none());
    }

    #[test]
    fn encodes_wire_field_names() {
        let line = StreamFrame::Complete {
            rewritten_content: Some("x".into()),
            explanation: None,
        }
        .to_line();
        assert_eq!(line, "data: {\"type\":\"complete\",\"rewrittenContent\":\"x\"}\n\n");
    }

    #[test]
    fn decoder_handles_lines_split_across_reads() {
        let mut decoder = FrameDecoder::default();
        let wire = StreamFrame::Chunk { content: "héllo".into() }.to_line();
        let bytes = wire.as_bytes();
        // Split inside the multi-byte 'é'.
        let split = wire.find('é').unwrap() + 1;
        assert!(decoder.push(&bytes[..split]).is_empty());
        let frames = decoder.push(&bytes[split..]);
        assert_eq!(frames, vec![StreamFrame::Chunk { content: "héllo".into() }]);
    }

    #[test]
    fn decoder_skips_malformed_frames() {
        let mut decoder = FrameDecoder::default();
        let frames = decoder.push(
            b"data: {not json}\r\ndata: {\"type\":\"chunk\",\"content\":\"ok\"}\r\ndata: {\"type\":\"mystery\"}\n",
        );
        assert_eq!(frames, vec![StreamFrame::Chunk { content: "ok".into() }]);
        assert_eq!(decoder.skipped(), 2);
    }

    #[test]
    fn decoder_flushes_unterminated_tail() {
        let mut decoder = FrameDecoder::default();
        assert!(decoder
            .push(br#"data: {"type":"complete","rewrittenContent":"end"}"#)
            .is_empty());
        assert_eq!(
            decoder.finish(),
            vec![StreamFrame::Complete {
                rewritten_content: Some("end".into()),
                explanation: None
            }]
        );
    }
}
