//! Streaming multipart body reader.
//!
//! Walks a multipart body one part at a time: [`MultipartReader::next_part`]
//! returns the part's raw header block and [`MultipartReader::body`] yields
//! its content. Nothing beyond the current line is buffered.
//!
//! Delimiters are recognised only at the start of a line. The line ending in
//! front of a delimiter belongs to the delimiter, so it is held back until
//! the next line is known not to be one.
//!
//! The reader is tolerant of:
//!
//! - Mixed `\n` and `\r\n` line endings
//! - Transport padding after a delimiter
//! - A missing close delimiter (the last part runs to end of input)
//! - A part whose headers run straight into the next delimiter

use std::io::{self, BufRead, Read};

use tracing::{debug, warn};

use crate::error::{DecodeError, Result};

/// Longest line segment read at once. Longer lines are handed out in pieces.
const MAX_LINE: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Before the first delimiter.
    Preamble,
    /// An open delimiter was consumed; the next part's headers follow.
    AtDelimiter,
    /// Inside a part's content.
    Body,
    /// Close delimiter seen, or input exhausted.
    Finished,
}

/// Pull-based reader over the parts of one multipart body.
pub struct MultipartReader<R> {
    inner: R,
    delimiter: Vec<u8>,
    state: State,
    raw: Vec<u8>,
    wrapped_cr: bool,
    at_line_start: bool,
    line: Vec<u8>,
    line_pos: usize,
    pending_eol: &'static [u8],
    terminated: bool,
}

impl<R: BufRead> MultipartReader<R> {
    pub fn new(inner: R, boundary: &str) -> Self {
        let mut delimiter = Vec::with_capacity(boundary.len() + 2);
        delimiter.extend_from_slice(b"--");
        delimiter.extend_from_slice(boundary.as_bytes());
        Self {
            inner,
            delimiter,
            state: State::Preamble,
            raw: Vec::with_capacity(MAX_LINE),
            wrapped_cr: false,
            at_line_start: true,
            line: Vec::with_capacity(MAX_LINE),
            line_pos: 0,
            pending_eol: b"",
            terminated: false,
        }
    }

    /// Whether a close delimiter was found.
    ///
    /// Only meaningful once [`next_part`](Self::next_part) has returned
    /// `None`.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Advance to the next part, skipping any unread content of the current
    /// one, and return its raw header block.
    ///
    /// Returns `None` after the close delimiter or at end of input.
    pub fn next_part(&mut self, max_header_bytes: usize) -> Result<Option<Vec<u8>>> {
        loop {
            match self.state {
                State::Finished => return Ok(None),
                State::AtDelimiter => return self.read_part_headers(max_header_bytes).map(Some),
                State::Preamble => self.skip_preamble()?,
                State::Body => self.skip_body()?,
            }
        }
    }

    /// Reader over the content of the current part.
    pub fn body(&mut self) -> PartBody<'_, R> {
        PartBody { reader: self }
    }

    fn skip_preamble(&mut self) -> Result<()> {
        while self.state == State::Preamble {
            let at_line_start = self.at_line_start;
            if !self.read_raw_line().map_err(|e| DecodeError::io("reading multipart preamble", e))? {
                debug!("Multipart body has no delimiter");
                self.state = State::Finished;
                break;
            }
            if at_line_start {
                if let Some(close) = self.match_delimiter() {
                    self.enter_delimiter(close);
                }
            }
        }
        Ok(())
    }

    fn skip_body(&mut self) -> Result<()> {
        while self.state == State::Body {
            self.fill_body()
                .map_err(|e| DecodeError::io("skipping multipart content", e))?;
            self.line_pos = self.line.len();
        }
        Ok(())
    }

    fn read_part_headers(&mut self, max_header_bytes: usize) -> Result<Vec<u8>> {
        let mut headers = Vec::new();
        self.state = State::Body;
        self.pending_eol = b"";
        self.line.clear();
        self.line_pos = 0;

        loop {
            let at_line_start = self.at_line_start;
            if !self.read_raw_line().map_err(|e| DecodeError::io("reading part headers", e))? {
                warn!("Multipart input ended inside part headers");
                self.state = State::Finished;
                break;
            }
            if at_line_start {
                if self.raw == b"\r\n" || self.raw == b"\n" {
                    headers.extend_from_slice(&self.raw);
                    break;
                }
                if let Some(close) = self.match_delimiter() {
                    // Headers with no blank line; the part has no content.
                    self.enter_delimiter(close);
                    break;
                }
            }
            headers.extend_from_slice(&self.raw);
            if headers.len() > max_header_bytes {
                return Err(DecodeError::HeaderTooLarge {
                    limit: max_header_bytes,
                });
            }
        }
        self.at_line_start = true;
        Ok(headers)
    }

    /// Make the current line hold unread content, or leave it empty when the
    /// part has ended.
    fn fill_body(&mut self) -> io::Result<()> {
        while self.line_pos >= self.line.len() && self.state == State::Body {
            self.line.clear();
            self.line_pos = 0;

            let at_line_start = self.at_line_start;
            if !self.read_raw_line()? {
                // No close delimiter: the held-back line ending is content.
                warn!("Multipart body ended without a close delimiter");
                self.line.extend_from_slice(self.pending_eol);
                self.pending_eol = b"";
                self.state = State::Finished;
                break;
            }
            if at_line_start {
                if let Some(close) = self.match_delimiter() {
                    self.pending_eol = b"";
                    self.enter_delimiter(close);
                    break;
                }
            }

            let (content, eol): (&[u8], &'static [u8]) = if self.raw.ends_with(b"\r\n") {
                (&self.raw[..self.raw.len() - 2], b"\r\n")
            } else if self.raw.ends_with(b"\n") {
                (&self.raw[..self.raw.len() - 1], b"\n")
            } else {
                (&self.raw[..], b"")
            };
            self.line.extend_from_slice(self.pending_eol);
            self.line.extend_from_slice(content);
            self.pending_eol = eol;
        }
        Ok(())
    }

    /// Read the next line, or the next `MAX_LINE` bytes of a long line, into
    /// `raw`. Returns false at end of input.
    fn read_raw_line(&mut self) -> io::Result<bool> {
        self.raw.clear();
        if self.wrapped_cr {
            self.raw.push(b'\r');
            self.wrapped_cr = false;
        }
        let limit = (MAX_LINE - self.raw.len()) as u64;
        (&mut self.inner).take(limit).read_until(b'\n', &mut self.raw)?;
        if self.raw.is_empty() {
            return Ok(false);
        }
        // A CR that fills the buffer may be the start of the CRLF in front of
        // a delimiter, so it must travel with the next segment.
        if self.raw.len() == MAX_LINE && self.raw.last() == Some(&b'\r') {
            self.raw.pop();
            self.wrapped_cr = true;
        }
        self.at_line_start = self.raw.ends_with(b"\n");
        Ok(true)
    }

    /// If `raw` is a delimiter line, return whether it is the close delimiter.
    fn match_delimiter(&self) -> Option<bool> {
        let rest = self.raw.strip_prefix(self.delimiter.as_slice())?;
        let (close, rest) = match rest.strip_prefix(b"--") {
            Some(rest) => (true, rest),
            None => (false, rest),
        };
        rest.iter()
            .all(|&b| matches!(b, b' ' | b'\t' | b'\r' | b'\n'))
            .then_some(close)
    }

    fn enter_delimiter(&mut self, close: bool) {
        if close {
            self.terminated = true;
            self.state = State::Finished;
        } else {
            self.state = State::AtDelimiter;
        }
    }
}

/// Content of the current part. Ends at the next delimiter.
pub struct PartBody<'a, R> {
    reader: &'a mut MultipartReader<R>,
}

impl<R: BufRead> Read for PartBody<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = buf.len().min(available.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl<R: BufRead> BufRead for PartBody<'_, R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.reader.fill_body()?;
        Ok(&self.reader.line[self.reader.line_pos..])
    }

    fn consume(&mut self, amt: usize) {
        self.reader.line_pos = (self.reader.line_pos + amt).min(self.reader.line.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Collect `(headers, body)` for every part.
    fn parts(input: &[u8], boundary: &str) -> (Vec<(String, String)>, bool) {
        let mut reader = MultipartReader::new(input, boundary);
        let mut out = Vec::new();
        while let Some(headers) = reader.next_part(1024).unwrap() {
            let mut body = Vec::new();
            reader.body().read_to_end(&mut body).unwrap();
            out.push((
                String::from_utf8(headers).unwrap(),
                String::from_utf8(body).unwrap(),
            ));
        }
        (out, reader.is_terminated())
    }

    #[test]
    fn test_two_parts_crlf() {
        let input = b"preamble\r\n--b\r\nContent-Type: text/plain\r\n\r\nPlain text.\r\n--b\r\nContent-Type: text/html\r\n\r\n<p>Hi</p>\r\n--b--\r\nepilogue\r\n";
        let (parts, terminated) = parts(input, "b");
        assert!(terminated);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].0, "Content-Type: text/plain\r\n\r\n");
        assert_eq!(parts[0].1, "Plain text.");
        assert_eq!(parts[1].1, "<p>Hi</p>");
    }

    #[test]
    fn test_lf_only_and_multiline_content() {
        let input = b"--b\nContent-Type: text/plain\n\nline one\nline two\n\n--b--\n";
        let (parts, _) = parts(input, "b");
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].1, "line one\nline two\n");
    }

    #[test]
    fn test_delimiter_prefix_inside_content_is_not_a_boundary() {
        let input = b"--b\r\n\r\n--bx is not a boundary\r\nnor is  --b\r\n--b--";
        let (parts, _) = parts(input, "b");
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].1, "--bx is not a boundary\r\nnor is  --b");
    }

    #[test]
    fn test_transport_padding_after_delimiter() {
        let input = b"--b  \r\n\r\nbody\r\n--b-- \t\r\n";
        let (parts, terminated) = parts(input, "b");
        assert!(terminated);
        assert_eq!(parts[0].1, "body");
    }

    #[test]
    fn test_unterminated_keeps_trailing_newline() {
        let input = b"--b\r\n\r\nlast part\r\n";
        let (parts, terminated) = parts(input, "b");
        assert!(!terminated);
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].1, "last part\r\n");
    }

    #[test]
    fn test_no_delimiter_yields_no_parts() {
        let (parts, terminated) = parts(b"just some text\r\n", "b");
        assert!(parts.is_empty());
        assert!(!terminated);
    }

    #[test]
    fn test_headers_without_blank_line() {
        let input = b"--b\r\nContent-Type: text/plain\r\n--b\r\n\r\nsecond\r\n--b--";
        let (parts, _) = parts(input, "b");
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].1, "");
        assert_eq!(parts[1].1, "second");
    }

    #[test]
    fn test_unread_body_is_skipped() {
        let input = b"--b\r\n\r\nfirst\r\n--b\r\n\r\nsecond\r\n--b--";
        let mut reader = MultipartReader::new(&input[..], "b");
        assert!(reader.next_part(1024).unwrap().is_some());
        assert!(reader.next_part(1024).unwrap().is_some());
        let mut body = String::new();
        reader.body().read_to_string(&mut body).unwrap();
        assert_eq!(body, "second");
        assert!(reader.next_part(1024).unwrap().is_none());
    }

    #[test]
    fn test_long_line_with_crlf_at_segment_edge() {
        // The CR of the CRLF before the delimiter lands exactly at MAX_LINE.
        let content = "x".repeat(MAX_LINE - 1);
        let input = format!("--b\r\n\r\n{content}\r\n--b--");
        let (parts, _) = parts(input.as_bytes(), "b");
        assert_eq!(parts[0].1, content);
    }

    #[test]
    fn test_part_header_limit() {
        let input = format!("--b\r\nX-Long: {}\r\n\r\nbody\r\n--b--", "a".repeat(100));
        let mut reader = MultipartReader::new(input.as_bytes(), "b");
        assert!(matches!(
            reader.next_part(32),
            Err(DecodeError::HeaderTooLarge { limit: 32 })
        ));
    }
}
