//! Bounded preview capture.

use std::io::{self, Read, Write};

/// Default preview budget in characters.
pub const DEFAULT_PREVIEW_CHARS: usize = 256;

/// How far back from the cut point a word boundary is looked for.
const WORD_BOUNDARY_WINDOW: usize = 50;

const ELLIPSIS: char = '…';

/// Write sink that keeps only the first `max_chars` characters written to it.
///
/// Writes always report full consumption, so a writer is never slowed down
/// or failed by the sink; bytes beyond the budget are discarded and the sink
/// is marked full.
#[derive(Debug)]
pub struct PreviewCapture {
    max_chars: usize,
    buf: Vec<u8>,
    chars: usize,
    full: bool,
}

impl PreviewCapture {
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars,
            buf: Vec::new(),
            chars: 0,
            full: false,
        }
    }

    /// Whether input has been discarded because the budget was reached.
    pub fn is_full(&self) -> bool {
        self.full
    }

    /// Keep as much of `data` as the budget allows.
    ///
    /// Characters are counted on UTF-8 lead bytes, so a multi-byte
    /// character is never split.
    pub fn capture(&mut self, data: &[u8]) {
        if self.full {
            return;
        }
        for &b in data {
            let is_continuation = b & 0xC0 == 0x80;
            if !is_continuation {
                if self.chars == self.max_chars {
                    self.full = true;
                    return;
                }
                self.chars += 1;
            }
            self.buf.push(b);
        }
    }

    /// Render the captured text as a one-line preview.
    ///
    /// Surrounding whitespace is trimmed, line breaks become spaces and runs
    /// of spaces collapse to one. Text that was cut short is truncated to the
    /// budget, backed up to a word boundary in the last few characters when
    /// there is one, and suffixed with an ellipsis.
    pub fn preview(&self) -> String {
        let raw = String::from_utf8_lossy(&self.buf);
        let text = collapse_whitespace(raw.trim());

        let char_len = text.chars().count();
        if !self.full && char_len <= self.max_chars {
            return text;
        }

        let mut truncated: String = text.chars().take(self.max_chars).collect();
        let kept = char_len.min(self.max_chars);
        if let Some(space) = truncated.rfind(' ') {
            let space_char = truncated[..space].chars().count();
            if space_char + WORD_BOUNDARY_WINDOW > kept {
                truncated.truncate(space);
            }
        }
        truncated.push(ELLIPSIS);
        truncated
    }
}

impl Write for PreviewCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.capture(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Replace line breaks with spaces and collapse runs of spaces.
fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_space = false;
    for ch in text.chars() {
        let ch = if ch == '\r' || ch == '\n' { ' ' } else { ch };
        if ch == ' ' {
            if last_space {
                continue;
            }
            last_space = true;
        } else {
            last_space = false;
        }
        out.push(ch);
    }
    out
}

/// Reader adapter that copies everything it yields into a preview sink.
///
/// With no sink, or once the sink is full, it is a plain pass-through.
pub struct Tee<'p, R> {
    inner: R,
    sink: Option<&'p mut PreviewCapture>,
}

impl<'p, R: Read> Tee<'p, R> {
    pub fn new(inner: R, sink: Option<&'p mut PreviewCapture>) -> Self {
        Self { inner, sink }
    }
}

impl<R: Read> Read for Tee<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if let Some(sink) = self.sink.as_deref_mut() {
            if sink.is_full() {
                self.sink = None;
            } else {
                sink.capture(&buf[..n]);
            }
        }
        Ok(n)
    }
}
