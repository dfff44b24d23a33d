//! Incremental SSE wire parser.
//!
//! Accumulates transport chunks and cuts complete records at blank-line
//! boundaries. Only `data:` payloads are surfaced; comment lines
//! (keep-alives) and auxiliary fields are dropped, since event payloads
//! carry their own type tag.

/// Buffering parser for an SSE byte stream.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
}

impl SseParser {
    /// Create an empty parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a transport chunk to the buffer.
    pub fn push(&mut self, chunk: &[u8]) {
        let text = String::from_utf8_lossy(chunk);
        if text.contains('\r') {
            self.buffer.push_str(&text.replace("\r\n", "\n"));
        } else {
            self.buffer.push_str(&text);
        }
    }

    /// Extract the next complete record's data payload, if buffered.
    ///
    /// Records without a data payload (comments, bare event fields) are
    /// consumed and skipped.
    pub fn next_data(&mut self) -> Option<String> {
        while let Some(pos) = self.buffer.find("\n\n") {
            let record: String = self.buffer.drain(..pos + 2).collect();

            let mut data_lines = Vec::new();
            for line in record.lines() {
                if line.starts_with(':') {
                    continue;
                }
                if let Some(value) = line.strip_prefix("data:") {
                    data_lines.push(value.trim_start().to_string());
                }
            }

            if !data_lines.is_empty() {
                return Some(data_lines.join("\n"));
            }
        }
        None
    }
}
