//! Streaming message decoder.
//!
//! Splits the header block off the source, decodes the body as a single
//! part or as a tree of multipart entities, and assembles the
//! [`ParsedMessage`]. Bodies are pulled through the decoding pipeline one
//! buffer at a time; nothing larger than a header block or a single line is
//! ever held in memory.
//!
//! Leaf content goes to a [`BlobUploader`], except the body of a
//! single-part message without a transfer encoding: those bytes are already
//! stored as part of the message, so the leaf becomes a byte-range
//! reference into the parent blob instead.

use std::io::{self, BufRead, BufReader, Read};

use tracing::debug;

use crate::error::{DecodeError, Result};
use crate::model::body::{BlobRef, BodyPart, PartContent};
use crate::model::message::ParsedMessage;
use crate::parser::counting::CountingReader;
use crate::parser::encoding::{TransferDecoder, TransferEncoding};
use crate::parser::header::{check_header_block, Headers};
use crate::parser::mime::MimeInfo;
use crate::parser::multipart::MultipartReader;
use crate::parser::preview::{PreviewCapture, Tee, DEFAULT_PREVIEW_CHARS};
use crate::parser::split::{split_header, BodyReader};
use crate::store::blob::BlobUploader;

/// Most body parts, containers included, in one message.
pub const MAX_PARTS: usize = 100;

/// Deepest multipart nesting. The top-level multipart is depth 1.
pub const MAX_MULTIPART_DEPTH: usize = 10;

/// Largest header block, for the message and for each part.
pub const MAX_HEADER_BYTES: usize = 1024 * 1024;

/// Read buffer in front of a multipart body.
const MULTIPART_BUFFER_SIZE: usize = 8192;

/// Resource limits applied while decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeLimits {
    pub max_parts: usize,
    pub max_depth: usize,
    pub max_header_bytes: usize,
    pub preview_chars: usize,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_parts: MAX_PARTS,
            max_depth: MAX_MULTIPART_DEPTH,
            max_header_bytes: MAX_HEADER_BYTES,
            preview_chars: DEFAULT_PREVIEW_CHARS,
        }
    }
}

/// Decodes messages under a fixed set of [`DecodeLimits`].
///
/// Holds no per-message state, so one decoder can be shared by any number
/// of concurrent decodes.
#[derive(Debug, Clone, Default)]
pub struct MessageDecoder {
    limits: DecodeLimits,
}

impl MessageDecoder {
    pub fn new(limits: DecodeLimits) -> Self {
        Self { limits }
    }

    /// Decode one message read from `reader`.
    ///
    /// `parent_blob_id` names the stored copy of the raw message and is the
    /// parent of every byte-range reference produced. The source is always
    /// read to its end, so the returned `size` is the full stream length.
    ///
    /// On error nothing is returned; blobs already uploaded for earlier
    /// parts are left to the uploader.
    pub fn decode<R: Read>(
        &self,
        reader: R,
        parent_blob_id: &str,
        account_id: &str,
        uploader: &mut dyn BlobUploader,
    ) -> Result<ParsedMessage> {
        let mut source = CountingReader::new(reader);
        let (raw_headers, mut body) = split_header(&mut source, self.limits.max_header_bytes)?;
        let header_size = raw_headers.len() as u64;
        let headers = Headers::parse(&raw_headers)?;
        let info = MimeInfo::parse(&raw_headers);
        debug!(parent_blob_id, header_size, "Split message header");

        let mut ctx = DecodeContext {
            limits: &self.limits,
            parent_blob_id,
            account_id,
            uploader,
            preview: PreviewCapture::new(self.limits.preview_chars),
            preview_claimed: false,
            parts: 0,
        };

        let part_id = ctx.next_part_id()?;

        let content = if info.is_multipart() {
            let boundary = required_boundary(&info)?;
            let mut buffered = BufReader::with_capacity(MULTIPART_BUFFER_SIZE, &mut body);
            let sub_parts = decode_multipart(&mut buffered, &info.media_type, boundary, 1, &mut ctx)?;
            drain(&mut buffered)?;
            PartContent::Container { sub_parts }
        } else {
            decode_single_part(&part_id, &info, &mut body, &mut ctx)?
        };
        drain(&mut body)?;
        let size = body.source_bytes_read();

        let root = describe(part_id, info, content);
        debug!(size, parts = ctx.parts, "Decoded message");
        Ok(ParsedMessage::assemble(
            headers.fields(),
            header_size,
            size,
            ctx.preview.preview(),
            root,
        ))
    }
}

/// Decode a message with the default limits.
pub fn decode_stream<R: Read>(
    reader: R,
    parent_blob_id: &str,
    account_id: &str,
    uploader: &mut dyn BlobUploader,
) -> Result<ParsedMessage> {
    MessageDecoder::default().decode(reader, parent_blob_id, account_id, uploader)
}

/// State shared by every part of one decode.
struct DecodeContext<'a> {
    limits: &'a DecodeLimits,
    parent_blob_id: &'a str,
    account_id: &'a str,
    uploader: &'a mut dyn BlobUploader,
    preview: PreviewCapture,
    preview_claimed: bool,
    parts: usize,
}

impl DecodeContext<'_> {
    /// Count a new part and return its id.
    fn next_part_id(&mut self) -> Result<String> {
        self.parts += 1;
        if self.parts > self.limits.max_parts {
            return Err(DecodeError::TooManyParts {
                limit: self.limits.max_parts,
            });
        }
        Ok(self.parts.to_string())
    }

    /// The first `text/plain` leaf that is not an attachment gets the
    /// preview.
    fn claim_preview(&mut self, info: &MimeInfo) -> bool {
        if self.preview_claimed
            || info.media_type != "text/plain"
            || info.disposition.as_deref() == Some("attachment")
            || self.preview.is_full()
        {
            return false;
        }
        self.preview_claimed = true;
        true
    }

    /// Decode `content` and hand it to the uploader.
    fn upload<R: Read>(
        &mut self,
        part_id: &str,
        info: &MimeInfo,
        content: R,
    ) -> Result<PartContent> {
        let encoding = TransferEncoding::classify(&info.transfer_encoding);
        let sink = if self.claim_preview(info) {
            Some(&mut self.preview)
        } else {
            None
        };
        let mut stream = Tee::new(TransferDecoder::new(encoding, content), sink);
        let uploaded = self
            .uploader
            .upload(self.account_id, self.parent_blob_id, &info.media_type, &mut stream)
            .map_err(|source| DecodeError::Upload {
                part_id: part_id.to_string(),
                source,
            })?;
        debug!(part_id, blob_id = %uploaded.blob_id, size = uploaded.size, "Uploaded part");
        Ok(PartContent::Leaf {
            blob_id: uploaded.blob_id,
            size: uploaded.size,
        })
    }
}

/// Body of a message that is not multipart.
///
/// Identity content is only counted and becomes a byte range of the parent
/// blob; anything else is decoded and uploaded.
fn decode_single_part<R: Read>(
    part_id: &str,
    info: &MimeInfo,
    body: &mut BodyReader<'_, R>,
    ctx: &mut DecodeContext<'_>,
) -> Result<PartContent> {
    let media_type = info.media_type.as_str();
    let encoding = TransferEncoding::classify(&info.transfer_encoding);
    if !encoding.is_identity() {
        debug!(part_id, media_type, ?encoding, "Decoding single-part body");
        return ctx.upload(part_id, info, body);
    }

    let start = body.stream_position();
    let sink = if ctx.claim_preview(info) {
        Some(&mut ctx.preview)
    } else {
        None
    };
    let size = io::copy(&mut Tee::new(&mut *body, sink), &mut io::sink())
        .map_err(|e| DecodeError::io("reading the message body", e))?;
    let end = body.stream_position();
    debug!(part_id, media_type, start, end, "Single-part body kept as byte range");

    Ok(PartContent::Leaf {
        blob_id: BlobRef::range_id(ctx.parent_blob_id, start, end),
        size,
    })
}

/// Decode every part of a multipart body at nesting level `depth`.
fn decode_multipart(
    source: &mut dyn BufRead,
    media_type: &str,
    boundary: &str,
    depth: usize,
    ctx: &mut DecodeContext<'_>,
) -> Result<Vec<BodyPart>> {
    if depth > ctx.limits.max_depth {
        return Err(DecodeError::NestingTooDeep {
            limit: ctx.limits.max_depth,
        });
    }
    debug!(media_type, boundary, depth, "Decoding multipart body");

    let mut reader = MultipartReader::new(source, boundary);
    let mut sub_parts = Vec::new();
    while let Some(raw_headers) = reader.next_part(ctx.limits.max_header_bytes)? {
        check_header_block(&raw_headers)?;
        let info = MimeInfo::parse(&raw_headers);
        let part = decode_part(info, &mut reader.body(), depth, ctx)?;
        sub_parts.push(part);
    }

    if sub_parts.is_empty() {
        return Err(DecodeError::EmptyMultipart {
            media_type: media_type.to_string(),
        });
    }
    Ok(sub_parts)
}

/// Decode one part of a multipart body: recurse into nested multiparts,
/// upload anything else.
fn decode_part(
    info: MimeInfo,
    body: &mut dyn BufRead,
    depth: usize,
    ctx: &mut DecodeContext<'_>,
) -> Result<BodyPart> {
    let part_id = ctx.next_part_id()?;

    let content = if info.is_multipart() {
        let boundary = required_boundary(&info)?;
        let sub_parts = decode_multipart(body, &info.media_type, boundary, depth + 1, ctx)?;
        PartContent::Container { sub_parts }
    } else {
        ctx.upload(&part_id, &info, body)?
    };
    Ok(describe(part_id, info, content))
}

fn required_boundary(info: &MimeInfo) -> Result<&str> {
    info.boundary
        .as_deref()
        .ok_or_else(|| DecodeError::MissingBoundary {
            media_type: info.media_type.clone(),
        })
}

/// Build the tree node for a part from its MIME headers.
fn describe(part_id: String, info: MimeInfo, content: PartContent) -> BodyPart {
    let charset = match content {
        PartContent::Leaf { .. } => info.charset,
        PartContent::Container { .. } => None,
    };
    BodyPart {
        part_id,
        media_type: info.media_type,
        charset,
        disposition: info.disposition,
        name: info.name,
        content,
    }
}

/// Read and discard whatever is left in `reader`.
fn drain<R: Read + ?Sized>(reader: &mut R) -> Result<u64> {
    io::copy(reader, &mut io::sink()).map_err(|e| DecodeError::io("draining trailing bytes", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::blob::MemoryBlobStore;

    fn decode(raw: &[u8]) -> (Result<ParsedMessage>, MemoryBlobStore) {
        let mut store = MemoryBlobStore::new();
        let result = decode_stream(raw, "msg", "acct", &mut store);
        (result, store)
    }

    #[test]
    fn test_identity_body_is_byte_range() {
        let raw = b"Subject: Test\r\n\r\nHello";
        let (result, store) = decode(raw);
        let msg = result.unwrap();

        assert_eq!(msg.header_size, 17);
        assert_eq!(msg.size, raw.len() as u64);
        assert_eq!(msg.body_structure.blob_id(), Some("msg,17,22"));
        assert_eq!(msg.body_structure.size(), 5);
        assert_eq!(msg.preview, "Hello");
        assert!(store.is_empty());
    }

    #[test]
    fn test_base64_body_is_uploaded() {
        let raw = b"Content-Type: text/plain; charset=utf-8\r\n\
Content-Transfer-Encoding: base64\r\n\r\nSGVsbG8gV29ybGQ=\r\n";
        let (result, store) = decode(raw);
        let msg = result.unwrap();

        assert_eq!(msg.body_structure.blob_id(), Some("mem-1"));
        assert_eq!(msg.body_structure.size(), 11);
        assert_eq!(msg.body_structure.charset.as_deref(), Some("utf-8"));
        assert_eq!(store.get("mem-1").unwrap().data, b"Hello World");
        assert_eq!(store.get("mem-1").unwrap().parent_blob_id, "msg");
        assert_eq!(msg.preview, "Hello World");
    }

    #[test]
    fn test_multipart_part_ids_are_preorder() {
        let raw = b"Content-Type: multipart/mixed; boundary=outer\r\n\r\n\
--outer\r\nContent-Type: multipart/alternative; boundary=inner\r\n\r\n\
--inner\r\nContent-Type: text/plain\r\n\r\nplain\r\n\
--inner\r\nContent-Type: text/html\r\n\r\n<b>html</b>\r\n\
--inner--\r\n\
--outer\r\nContent-Type: application/pdf\r\nContent-Disposition: attachment; filename=\"a.pdf\"\r\n\r\nPDF\r\n\
--outer--\r\n";
        let (result, store) = decode(raw);
        let msg = result.unwrap();
        let root = &msg.body_structure;

        assert_eq!(root.part_id, "1");
        assert_eq!(root.sub_parts()[0].part_id, "2");
        assert_eq!(root.sub_parts()[0].sub_parts()[0].part_id, "3");
        assert_eq!(root.sub_parts()[0].sub_parts()[1].part_id, "4");
        assert_eq!(root.sub_parts()[1].part_id, "5");
        assert_eq!(root.sub_parts()[1].name.as_deref(), Some("a.pdf"));

        assert_eq!(msg.text_body_part_ids, ["3"]);
        assert_eq!(msg.html_body_part_ids, ["4"]);
        assert_eq!(msg.attachment_part_ids, ["5"]);
        assert!(msg.has_attachment);
        assert_eq!(store.len(), 3);
        assert_eq!(msg.preview, "plain");
    }

    #[test]
    fn test_missing_boundary() {
        let (result, _) = decode(b"Content-Type: multipart/mixed\r\n\r\nbody\r\n");
        assert!(matches!(result, Err(DecodeError::MissingBoundary { .. })));
    }

    #[test]
    fn test_multipart_without_parts() {
        let (result, _) = decode(b"Content-Type: multipart/mixed; boundary=x\r\n\r\nno parts here\r\n");
        assert!(matches!(result, Err(DecodeError::EmptyMultipart { .. })));
    }

    #[test]
    fn test_custom_limits() {
        let raw = b"Content-Type: multipart/mixed; boundary=b\r\n\r\n\
--b\r\n\r\none\r\n--b\r\n\r\ntwo\r\n--b--\r\n";
        let decoder = MessageDecoder::new(DecodeLimits {
            max_parts: 2,
            ..DecodeLimits::default()
        });
        let mut store = MemoryBlobStore::new();
        let err = decoder.decode(&raw[..], "msg", "acct", &mut store).unwrap_err();
        assert!(matches!(err, DecodeError::TooManyParts { limit: 2 }));
        assert!(err.is_limit_violation());
    }

    #[test]
    fn test_only_first_text_part_feeds_preview() {
        let raw = b"Content-Type: multipart/mixed; boundary=b\r\n\r\n\
--b\r\nContent-Type: text/plain\r\n\r\nFirst.\r\n\
--b\r\nContent-Type: text/plain\r\n\r\nSecond.\r\n--b--\r\n";
        let (result, _) = decode(raw);
        assert_eq!(result.unwrap().preview, "First.");
    }
}
