//! Content-Transfer-Encoding classification and streaming decoders.
//!
//! Every decoder is a [`Read`] adapter over another reader, so decoding
//! happens incrementally as bytes are pulled downstream and adapters can be
//! stacked freely (for example under a preview tee).

use std::io::{self, Read};

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use tracing::debug;

/// Size of each read from the encoded source.
const CHUNK_SIZE: usize = 4096;

/// Longest quoted-printable tail held back waiting for more input.
const MAX_CARRY: usize = 1024;

/// Base64 engine that tolerates missing padding and non-zero trailing bits,
/// both common in real-world mail.
pub(crate) const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// How a body's bytes relate to its decoded content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    /// Bytes are the content (`7bit`, `8bit`, `binary`, absent, or unknown).
    Identity,
    Base64,
    QuotedPrintable,
}

impl TransferEncoding {
    /// Classify a `Content-Transfer-Encoding` token.
    ///
    /// Matching is case-insensitive and ignores surrounding whitespace. An
    /// empty or unrecognized token is `Identity`.
    pub fn classify(token: &str) -> Self {
        let token = token.trim();
        if token.eq_ignore_ascii_case("base64") {
            Self::Base64
        } else if token.eq_ignore_ascii_case("quoted-printable") {
            Self::QuotedPrintable
        } else {
            Self::Identity
        }
    }

    pub fn is_identity(self) -> bool {
        self == Self::Identity
    }
}

/// Wrap `inner` in the decoder matching `token`.
pub fn decoder<R: Read>(token: &str, inner: R) -> TransferDecoder<R> {
    TransferDecoder::new(TransferEncoding::classify(token), inner)
}

/// A reader yielding the decoded content of an encoded body.
pub enum TransferDecoder<R> {
    Identity(R),
    Base64(Base64Reader<R>),
    QuotedPrintable(QuotedPrintableReader<R>),
}

impl<R: Read> TransferDecoder<R> {
    pub fn new(encoding: TransferEncoding, inner: R) -> Self {
        match encoding {
            TransferEncoding::Identity => Self::Identity(inner),
            TransferEncoding::Base64 => Self::Base64(Base64Reader::new(inner)),
            TransferEncoding::QuotedPrintable => {
                Self::QuotedPrintable(QuotedPrintableReader::new(inner))
            }
        }
    }
}

impl<R: Read> Read for TransferDecoder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Identity(r) => r.read(buf),
            Self::Base64(r) => r.read(buf),
            Self::QuotedPrintable(r) => r.read(buf),
        }
    }
}

// ── Shared buffering ────────────────────────────────────────────

/// Decoded bytes waiting to be handed out.
#[derive(Default)]
struct Output {
    buf: Vec<u8>,
    pos: usize,
}

impl Output {
    fn is_drained(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn copy_to(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.buf.len() - self.pos);
        out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        n
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.pos = 0;
    }
}

/// Read one chunk from `inner` into `carry`, returning false at EOF.
fn fill_chunk<R: Read>(inner: &mut R, carry: &mut Vec<u8>) -> io::Result<bool> {
    let mut chunk = [0u8; CHUNK_SIZE];
    loop {
        match inner.read(&mut chunk) {
            Ok(0) => return Ok(false),
            Ok(n) => {
                carry.extend_from_slice(&chunk[..n]);
                return Ok(true);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

// ── Base64 ──────────────────────────────────────────────────────

/// Streaming base64 decoder.
///
/// Characters outside the base64 alphabet (line breaks, stray whitespace)
/// are skipped. Complete 4-character quanta are decoded as soon as they are
/// available; the remainder is carried into the next read.
pub struct Base64Reader<R> {
    inner: R,
    quanta: Vec<u8>,
    raw: Vec<u8>,
    output: Output,
    eof: bool,
}

impl<R: Read> Base64Reader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            quanta: Vec::with_capacity(CHUNK_SIZE),
            raw: Vec::with_capacity(CHUNK_SIZE),
            output: Output::default(),
            eof: false,
        }
    }

    fn fill(&mut self) -> io::Result<()> {
        self.output.reset();
        while self.output.buf.is_empty() && !self.eof {
            self.raw.clear();
            if !fill_chunk(&mut self.inner, &mut self.raw)? {
                self.eof = true;
            }
            self.quanta.extend(
                self.raw
                    .iter()
                    .copied()
                    .filter(|&b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'=')),
            );

            let usable = if self.eof {
                self.quanta.len()
            } else {
                self.quanta.len() - self.quanta.len() % 4
            };
            if usable > 0 {
                decode_base64_lenient(&self.quanta[..usable], &mut self.output.buf);
                self.quanta.drain(..usable);
            }
        }
        Ok(())
    }
}

impl<R: Read> Read for Base64Reader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.output.is_drained() {
            self.fill()?;
        }
        Ok(self.output.copy_to(buf))
    }
}

/// Decode `input` into `out`, falling back to one quantum at a time when the
/// run as a whole is malformed (padding in the middle, a dangling character).
fn decode_base64_lenient(input: &[u8], out: &mut Vec<u8>) {
    let start = out.len();
    if LENIENT_BASE64.decode_vec(input, out).is_ok() {
        return;
    }
    out.truncate(start);
    debug!(len = input.len(), "Malformed base64 run, decoding per quantum");
    for quantum in input.chunks(4) {
        let before = out.len();
        if LENIENT_BASE64.decode_vec(quantum, out).is_err() {
            out.truncate(before);
        }
    }
}

// ── Quoted-printable ────────────────────────────────────────────

/// Streaming quoted-printable decoder.
///
/// An escape or whitespace run cut off at the end of a chunk is carried into
/// the next read, so chunk boundaries never change the output.
pub struct QuotedPrintableReader<R> {
    inner: R,
    carry: Vec<u8>,
    output: Output,
    eof: bool,
}

impl<R: Read> QuotedPrintableReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            carry: Vec::with_capacity(CHUNK_SIZE),
            output: Output::default(),
            eof: false,
        }
    }

    fn fill(&mut self) -> io::Result<()> {
        self.output.reset();
        while self.output.buf.is_empty() && !self.eof {
            if !fill_chunk(&mut self.inner, &mut self.carry)? {
                self.eof = true;
            }
            let consumed = qp_decode(&self.carry, &mut self.output.buf, self.eof);
            self.carry.drain(..consumed);
        }
        Ok(())
    }
}

impl<R: Read> Read for QuotedPrintableReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.output.is_drained() {
            self.fill()?;
        }
        Ok(self.output.copy_to(buf))
    }
}

/// Decode quoted-printable `input` into `out`.
///
/// Returns how many bytes of `input` were consumed. Unless `last` is set,
/// an escape or trailing whitespace run that reaches the end of `input` is
/// left unconsumed so the caller can retry with more data. Invalid escapes
/// are passed through verbatim; a lone `=` at the very end is dropped.
pub fn qp_decode(input: &[u8], out: &mut Vec<u8>, last: bool) -> usize {
    let mut i = 0;
    while i < input.len() {
        let may_wait = !last && input.len() - i <= MAX_CARRY;
        match input[i] {
            b'=' => {
                let rest = &input[i + 1..];
                // Soft line break, possibly with transport padding before it.
                let ws = rest.iter().take_while(|&&b| b == b' ' || b == b'\t').count();
                match (rest.get(ws), rest.get(ws + 1)) {
                    (Some(b'\n'), _) => {
                        i += ws + 2;
                        continue;
                    }
                    (Some(b'\r'), Some(b'\n')) => {
                        i += ws + 3;
                        continue;
                    }
                    (None, _) | (Some(b'\r'), None) if may_wait => return i,
                    _ => {}
                }
                if rest.len() < 2 && may_wait {
                    return i;
                }
                match (rest.first().and_then(|&b| hex_value(b)), rest.get(1).and_then(|&b| hex_value(b))) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi << 4 | lo);
                        i += 3;
                    }
                    _ if rest.is_empty() => i += 1,
                    _ => {
                        out.push(b'=');
                        i += 1;
                    }
                }
            }
            b' ' | b'\t' => {
                let run = input[i..]
                    .iter()
                    .take_while(|&&b| b == b' ' || b == b'\t')
                    .count();
                let after = &input[i + run..];
                if (after.is_empty() || after == b"\r") && may_wait {
                    return i;
                }
                let padding = after.starts_with(b"\n")
                    || after.starts_with(b"\r\n")
                    || (after.is_empty() && last);
                if !padding {
                    out.extend_from_slice(&input[i..i + run]);
                }
                i += run;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    input.len()
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'A'..=b'F' => Some(b - b'A' + 10),
        b'a'..=b'f' => Some(b - b'a' + 10),
        _ => None,
    }
}
