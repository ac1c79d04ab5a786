//! Header/body splitting over a streaming source.
//!
//! The header block is read in fixed-size chunks until the first blank line.
//! Whatever was read past the blank line is handed back inside a
//! [`BodyReader`], which replays those bytes before pulling from the source
//! again. The body itself is never buffered.

use std::io::{self, Read};

use crate::error::{DecodeError, Result};
use crate::parser::counting::CountingReader;

/// Size of each read while looking for the end of the header block.
const CHUNK_SIZE: usize = 4096;

/// Continuation of the source, positioned at the first body byte.
pub struct BodyReader<'a, R> {
    pending: Vec<u8>,
    pos: usize,
    source: &'a mut CountingReader<R>,
}

impl<'a, R: Read> BodyReader<'a, R> {
    fn new(pending: Vec<u8>, source: &'a mut CountingReader<R>) -> Self {
        Self {
            pending,
            pos: 0,
            source,
        }
    }

    /// Absolute offset, from the start of the message, of the next byte
    /// this reader will yield.
    pub fn stream_position(&self) -> u64 {
        let unread = (self.pending.len() - self.pos) as u64;
        self.source.bytes_read() - unread
    }

    /// Total bytes pulled from the underlying source so far, including any
    /// over-read bytes not yet yielded.
    pub fn source_bytes_read(&self) -> u64 {
        self.source.bytes_read()
    }
}

impl<R: Read> Read for BodyReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos < self.pending.len() {
            let n = buf.len().min(self.pending.len() - self.pos);
            buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
            self.pos += n;
            if self.pos == self.pending.len() {
                self.pending = Vec::new();
                self.pos = 0;
            }
            return Ok(n);
        }
        self.source.read(buf)
    }
}

/// Read the header block from `source`.
///
/// Returns the header bytes up to and including the blank-line separator
/// (`\n\n`, `\r\n\r\n`, or a mix of the two) and a reader over the body.
/// A stream that ends before any blank line is a headers-only message: all
/// of it is returned as the header block and the body is empty.
///
/// Fails with [`DecodeError::HeaderTooLarge`] once more than
/// `max_header_bytes` have been read without finding the separator.
pub fn split_header<R: Read>(
    source: &mut CountingReader<R>,
    max_header_bytes: usize,
) -> Result<(Vec<u8>, BodyReader<'_, R>)> {
    let mut header = Vec::with_capacity(CHUNK_SIZE);
    let mut chunk = [0u8; CHUNK_SIZE];
    let mut scan_from = 0;

    loop {
        let n = match source.read(&mut chunk) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(DecodeError::io("reading the header block", e)),
        };
        if n == 0 {
            if header.len() > max_header_bytes {
                return Err(DecodeError::HeaderTooLarge {
                    limit: max_header_bytes,
                });
            }
            return Ok((header, BodyReader::new(Vec::new(), source)));
        }
        header.extend_from_slice(&chunk[..n]);

        if let Some(end) = find_blank_line(&header, scan_from) {
            if end > max_header_bytes {
                return Err(DecodeError::HeaderTooLarge {
                    limit: max_header_bytes,
                });
            }
            let over_read = header.split_off(end);
            return Ok((header, BodyReader::new(over_read, source)));
        }
        if header.len() > max_header_bytes {
            return Err(DecodeError::HeaderTooLarge {
                limit: max_header_bytes,
            });
        }
        // A separator may straddle the chunk boundary.
        scan_from = header.len().saturating_sub(3);
    }
}

/// Find the end (exclusive) of the first blank line in `buf`, starting the
/// scan at `from`.
///
/// A blank line at the very start of the buffer (no headers at all) is
/// recognised as well.
pub(crate) fn find_blank_line(buf: &[u8], from: usize) -> Option<usize> {
    if from == 0 {
        if buf.starts_with(b"\r\n") {
            return Some(2);
        }
        if buf.starts_with(b"\n") {
            return Some(1);
        }
    }

    let mut i = from;
    while let Some(offset) = buf[i..].iter().position(|&b| b == b'\n') {
        let nl = i + offset;
        match buf.get(nl + 1) {
            Some(b'\n') => return Some(nl + 2),
            Some(b'\r') if buf.get(nl + 2) == Some(&b'\n') => return Some(nl + 3),
            _ => {}
        }
        i = nl + 1;
    }
    None
}
