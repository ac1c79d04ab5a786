//! MIME entity headers (`Content-Type`, `Content-Disposition`,
//! `Content-Transfer-Encoding`) of a message or body part.
//!
//! Parameter syntax (quoting, RFC 2231 continuations and charsets) is
//! handled by `mail-parser`.

use std::borrow::Cow;

use mail_parser::{MessageParser, MimeHeaders};

use crate::parser::header::decode_encoded_words;

/// What the decoder needs to know about one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimeInfo {
    /// Lowercase `type/subtype`; `text/plain` when absent or unusable.
    pub media_type: String,
    pub charset: Option<String>,
    pub boundary: Option<String>,
    /// Lowercase disposition type, e.g. `attachment` or `inline`.
    pub disposition: Option<String>,
    /// Filename from the disposition, else the Content-Type `name`.
    pub name: Option<String>,
    /// Raw `Content-Transfer-Encoding` token, empty when absent.
    pub transfer_encoding: String,
}

impl Default for MimeInfo {
    fn default() -> Self {
        Self {
            media_type: "text/plain".to_string(),
            charset: None,
            boundary: None,
            disposition: None,
            name: None,
            transfer_encoding: String::new(),
        }
    }
}

impl MimeInfo {
    /// Read the MIME headers out of a raw header block.
    pub fn parse(raw_headers: &[u8]) -> Self {
        let block = terminated(raw_headers);
        let Some(message) = MessageParser::default().parse_headers(block.as_ref()) else {
            return Self::default();
        };
        let Some(part) = message.parts.first() else {
            return Self::default();
        };

        let mut info = Self::default();
        if let Some(ct) = part.content_type() {
            if let Some(subtype) = ct.subtype().filter(|s| !s.is_empty()) {
                if !ct.ctype().is_empty() {
                    info.media_type = format!("{}/{}", ct.ctype(), subtype).to_ascii_lowercase();
                    info.charset = ct.attribute("charset").map(str::to_string);
                    info.boundary = ct
                        .attribute("boundary")
                        .filter(|b| !b.is_empty())
                        .map(str::to_string);
                }
            }
        }
        info.disposition = part
            .content_disposition()
            .map(|cd| cd.ctype().to_ascii_lowercase());
        info.name = part.attachment_name().map(decode_encoded_words);
        info.transfer_encoding = part
            .content_transfer_encoding()
            .unwrap_or_default()
            .to_string();
        info
    }

    pub fn is_multipart(&self) -> bool {
        self.media_type.starts_with("multipart/")
    }
}

/// The block with a blank line after its last field, which `mail-parser`
/// needs to see the end of the headers.
fn terminated(raw: &[u8]) -> Cow<'_, [u8]> {
    if raw.ends_with(b"\n\n") || raw.ends_with(b"\n\r\n") {
        return Cow::Borrowed(raw);
    }
    let mut block = raw.to_vec();
    if !block.is_empty() && !block.ends_with(b"\n") {
        block.extend_from_slice(b"\r\n");
    }
    block.extend_from_slice(b"\r\n");
    Cow::Owned(block)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_params() {
        let info = MimeInfo::parse(
            b"Content-Type: Multipart/Mixed; boundary=\"a;b\"; charset=utf-8\r\n\r\n",
        );
        assert_eq!(info.media_type, "multipart/mixed");
        assert!(info.is_multipart());
        assert_eq!(info.boundary.as_deref(), Some("a;b"));
        assert_eq!(info.charset.as_deref(), Some("utf-8"));
    }

    #[test]
    fn test_absent_or_unusable_content_type_defaults() {
        assert_eq!(MimeInfo::parse(b"\r\n"), MimeInfo::default());
        assert_eq!(MimeInfo::parse(b"X-Other: 1\r\n\r\n").media_type, "text/plain");
        assert_eq!(MimeInfo::parse(b"Content-Type: garbage\r\n\r\n").media_type, "text/plain");
        assert!(MimeInfo::parse(b"Content-Type: multipart/mixed\r\n\r\n").boundary.is_none());
    }

    #[test]
    fn test_block_without_blank_line() {
        let info = MimeInfo::parse(b"Content-Type: text/html; charset=iso-8859-1");
        assert_eq!(info.media_type, "text/html");
        assert_eq!(info.charset.as_deref(), Some("iso-8859-1"));
    }

    #[test]
    fn test_disposition_rfc2231_filename() {
        let info = MimeInfo::parse(
            b"Content-Type: application/pdf\r\n\
Content-Disposition: Attachment; filename*=UTF-8''r%C3%A9sum%C3%A9.pdf\r\n\r\n",
        );
        assert_eq!(info.disposition.as_deref(), Some("attachment"));
        assert_eq!(info.name.as_deref(), Some("résumé.pdf"));
    }

    #[test]
    fn test_disposition_rfc2231_continuations() {
        let info = MimeInfo::parse(
            b"Content-Disposition: attachment; filename*0=\"long\"; filename*1=\"-name\"; filename*2=\".txt\"\r\n\r\n",
        );
        assert_eq!(info.name.as_deref(), Some("long-name.txt"));
    }

    #[test]
    fn test_name_falls_back_to_content_type() {
        let info = MimeInfo::parse(
            b"Content-Type: image/png; name=\"=?UTF-8?B?5pel5pys?=.png\"\r\n\
Content-Disposition: inline\r\n\r\n",
        );
        assert_eq!(info.disposition.as_deref(), Some("inline"));
        assert_eq!(info.name.as_deref(), Some("日本.png"));
    }

    #[test]
    fn test_transfer_encoding_token() {
        let info = MimeInfo::parse(b"Content-Transfer-Encoding: BASE64\r\n\r\n");
        assert!(info.transfer_encoding.eq_ignore_ascii_case("base64"));
        assert_eq!(MimeInfo::parse(b"\r\n").transfer_encoding, "");
    }
}
