//! Newline-delimited JSON decoding for the Ollama chat stream.

use serde::Deserialize;

use llamatrix_core::InferenceError;

/// Splits a byte stream into complete lines, buffering partial ones.
///
/// Splitting happens on raw bytes, so a multi-byte character cut in half by
/// a chunk boundary is reassembled before it is decoded.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every line it completed (blank lines skipped).
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(line) = Self::decode(&line) {
                lines.push(line);
            }
        }
        lines
    }

    /// Whatever is left once the body has ended.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        Self::decode(&rest)
    }

    fn decode(line: &[u8]) -> Option<String> {
        let line = String::from_utf8_lossy(line);
        let line = line.trim();
        (!line.is_empty()).then(|| line.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct RawChunk {
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    error: Option<String>,
}

/// One decoded stream line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Text increment, if the line carried any
    pub text: Option<String>,
    /// The completion marker
    pub done: bool,
}

/// Decode one line of the `/api/chat` stream.
pub fn decode_line(line: &str) -> Result<Chunk, InferenceError> {
    let raw: RawChunk = serde_json::from_str(line).map_err(|e| InferenceError::BackendError {
        status: None,
        message: format!("malformed stream line: {e}"),
    })?;

    if let Some(message) = raw.error {
        return Err(InferenceError::BackendError {
            status: None,
            message,
        });
    }

    let text = raw
        .message
        .map(|m| m.content)
        .filter(|content| !content.is_empty());
    Ok(Chunk {
        text,
        done: raw.done,
    })
}

/// Pull the `error` field out of an Ollama error body, falling back to the raw body.
pub fn error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: String,
    }

    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => parsed.error,
        Err(_) => body.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_lines_split_across_chunks() {
        let mut decoder = LineDecoder::new();

        assert!(decoder.push(br#"{"message":{"content":"Hi"},"do"#).is_empty());
        let lines = decoder.push(b"ne\":false}\n{\"message\":{\"content\":\" there\"},\"done\":false}\n{\"done\"");
        assert_eq!(lines.len(), 2);
        assert_eq!(decoder.push(b":true}\n"), vec![r#"{"done":true}"#.to_string()]);
        assert_eq!(decoder.finish(), None);

        let first = assert_ok!(decode_line(&lines[0]));
        assert_eq!(first.text.as_deref(), Some("Hi"));
        let second = assert_ok!(decode_line(&lines[1]));
        assert_eq!(second.text.as_deref(), Some(" there"));
    }

    #[test]
    fn test_multibyte_character_split_between_chunks() {
        let line = "{\"message\":{\"content\":\"café\"},\"done\":false}\n".as_bytes();
        let split = line.iter().position(|b| *b == 0xC3).unwrap() + 1;

        let mut decoder = LineDecoder::new();
        assert!(decoder.push(&line[..split]).is_empty());
        let lines = decoder.push(&line[split..]);

        let chunk = assert_ok!(decode_line(&lines[0]));
        assert_eq!(chunk.text.as_deref(), Some("café"));
    }

    #[test]
    fn test_blank_lines_and_trailing_data() {
        let mut decoder = LineDecoder::new();
        assert!(decoder.push(b"\n\r\n  \n").is_empty());
        assert!(decoder.push(br#"{"done":true}"#).is_empty());
        assert_eq!(decoder.finish(), Some(r#"{"done":true}"#.to_string()));
    }

    #[test]
    fn test_decode_done_and_errors() {
        let done = assert_ok!(decode_line(
            r#"{"model":"llama3","message":{"role":"assistant","content":""},"done":true,"done_reason":"stop"}"#
        ));
        assert_eq!(done, Chunk { text: None, done: true });

        let err = assert_err!(decode_line(r#"{"error":"model 'nope' not found"}"#));
        assert_eq!(err.to_string(), "LLM backend error: model 'nope' not found");

        assert_err!(decode_line("not json"));
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(error_message(r#"{"error":"out of memory"}"#), "out of memory");
        assert_eq!(error_message("  Bad Gateway \n"), "Bad Gateway");
    }
}
