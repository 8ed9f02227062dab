use crate::constants::limits::MAX_LINE_BYTES;
use crate::error::{ConfabError, Result};

/// Splits a chunked byte stream into complete lines.
///
/// Bytes are kept raw until a `\n` arrives, so a UTF-8 sequence split across
/// two network reads is decoded intact. Blank lines are dropped and a
/// trailing `\r` is stripped.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one network read and return every line it completed.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>> {
        self.buf.extend_from_slice(bytes);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.buf[start..].iter().position(|b| *b == b'\n') {
            let end = start + pos;
            if let Some(line) = decode(&self.buf[start..end]) {
                lines.push(line);
            }
            start = end + 1;
        }
        self.buf.drain(..start);

        if self.buf.len() > MAX_LINE_BYTES {
            self.buf.clear();
            return Err(ConfabError::Transport(format!(
                "unterminated line exceeds {MAX_LINE_BYTES} bytes"
            )));
        }

        Ok(lines)
    }

    /// Take whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buf);
        decode(&rest)
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

fn decode(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim_end_matches('\r');
    if text.trim().is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_line_is_held_until_newline() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(b"{\"a\":").unwrap().is_empty());
        assert!(!buffer.is_empty());
        let lines = buffer.push(b"1}\n{\"b\"").unwrap();
        assert_eq!(lines, vec!["{\"a\":1}".to_string()]);
        assert_eq!(buffer.finish().as_deref(), Some("{\"b\""));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_crlf_and_blank_lines() {
        let mut buffer = LineBuffer::new();
        let lines = buffer.push(b"one\r\n\r\n\ntwo\r\n").unwrap();
        assert_eq!(lines, vec!["one".to_string(), "two".to_string()]);
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn test_multibyte_char_split_across_reads() {
        let text = "héllo\n".as_bytes();
        // split inside the two-byte 'é'
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(&text[..2]).unwrap().is_empty());
        let lines = buffer.push(&text[2..]).unwrap();
        assert_eq!(lines, vec!["héllo".to_string()]);
    }
}
