//! Incremental decoder for `text/event-stream` bodies.

/// Buffers raw chunks and yields the `data` payload of each complete event.
/// Chunks may split lines (or UTF-8 sequences) anywhere.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(self.data.join("\n"));
                    self.data.clear();
                }
                continue;
            }
            // comments (keep-alives) start with ':'
            if line.starts_with(':') {
                continue;
            }
            if let Some(value) = line.strip_prefix("data:") {
                self.data.push(value.strip_prefix(' ').unwrap_or(value).to_string());
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_chunks() {
        let mut dec = SseDecoder::new();
        assert!(dec.push(b"event: change\nda").is_empty());
        assert!(dec.push(b"ta: {\"a\":1}\n").is_empty());
        let out = dec.push(b"\n: ping\n\ndata: x\r\n\r\n");
        assert_eq!(out, vec!["{\"a\":1}".to_string(), "x".to_string()]);
    }

    #[test]
    fn test_multiline_data() {
        let mut dec = SseDecoder::new();
        let out = dec.push(b"data: one\ndata: two\n\n");
        assert_eq!(out, vec!["one\ntwo".to_string()]);
    }
}
