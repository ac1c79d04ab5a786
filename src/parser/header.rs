//! RFC 5322 header parsing: folding, encoded-words (RFC 2047), dates,
//! address and message-id lists.

use base64::Engine as _;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use tracing::warn;

use crate::error::{DecodeError, Result};
use crate::model::address::EmailAddress;
use crate::parser::encoding::LENIENT_BASE64;

/// Structured header fields of a message.
///
/// Absent headers produce empty lists, never missing ones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderFields {
    pub subject: String,
    pub from: Vec<EmailAddress>,
    pub sender: Vec<EmailAddress>,
    pub to: Vec<EmailAddress>,
    pub cc: Vec<EmailAddress>,
    pub bcc: Vec<EmailAddress>,
    pub reply_to: Vec<EmailAddress>,
    pub sent_at: Option<DateTime<Utc>>,
    pub message_id: Vec<String>,
    pub in_reply_to: Vec<String>,
    pub references: Vec<String>,
}

/// Unfolded headers as `(lowercase_name, value)` pairs, in order.
#[derive(Debug, Clone, Default)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    /// Parse a raw header block.
    ///
    /// Every line must be a `name: value` field or the continuation of one.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        unfold_headers(&decode_header_bytes(raw)).map(Self)
    }

    /// First value for a header name (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Extract the message-level fields.
    pub fn fields(&self) -> HeaderFields {
        let addresses = |name: &str| {
            self.get(name)
                .map(EmailAddress::parse_list)
                .unwrap_or_default()
        };

        let sent_at = self.get("date").and_then(parse_date);

        let message_id = self
            .get("message-id")
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| vec![id.to_string()])
            .unwrap_or_default();

        HeaderFields {
            subject: self.get("subject").map(decode_encoded_words).unwrap_or_default(),
            from: addresses("from"),
            sender: addresses("sender"),
            to: addresses("to"),
            cc: addresses("cc"),
            bcc: addresses("bcc"),
            reply_to: addresses("reply-to"),
            sent_at,
            message_id,
            in_reply_to: self.get("in-reply-to").map(parse_message_id_list).unwrap_or_default(),
            references: self.get("references").map(parse_message_id_list).unwrap_or_default(),
        }
    }
}

/// Decode raw header bytes to a string.
///
/// Tries UTF-8 first, then falls back to Windows-1252 (which accepts every byte).
fn decode_header_bytes(bytes: &[u8]) -> String {
    // Strip BOM if present
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);

    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}

/// Unfold headers: join continuation lines (starting with space or tab) with the previous header.
///
/// A line that is neither, or a continuation with nothing before it, fails
/// with its 1-based line number.
fn unfold_headers(text: &str) -> Result<Vec<(String, String)>> {
    let mut result: Vec<(String, String)> = Vec::new();

    for (index, line) in text.lines().enumerate() {
        if line.is_empty() {
            continue;
        }
        let malformed = || DecodeError::MalformedHeader { line: index + 1 };
        if line.starts_with(' ') || line.starts_with('\t') {
            let last = result.last_mut().ok_or_else(malformed)?;
            if !last.1.is_empty() {
                last.1.push(' ');
            }
            last.1.push_str(line.trim());
            continue;
        }

        let (name, value) = line.split_once(':').ok_or_else(malformed)?;
        let name = name.trim_end();
        if name.is_empty() || !name.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(malformed());
        }
        result.push((name.to_lowercase(), value.trim().to_string()));
    }

    Ok(result)
}

/// Fail unless `raw` is a well-formed header block.
pub fn check_header_block(raw: &[u8]) -> Result<()> {
    unfold_headers(&decode_header_bytes(raw)).map(drop)
}

/// Split an `In-Reply-To` / `References` value into ids on whitespace.
pub fn parse_message_id_list(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}

// ── Encoded words ───────────────────────────────────────────────

/// Decode RFC 2047 encoded-words in a header value.
///
/// Example: `"=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?="` → `"Hola mundo"`
///
/// If decoding fails for any token, the original text is preserved.
pub fn decode_encoded_words(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut remaining = input;
    let mut last_was_encoded = false;

    while let Some(start) = remaining.find("=?") {
        let before = &remaining[..start];
        // Whitespace between two encoded words is dropped (RFC 2047 §6.2)
        if !last_was_encoded || !before.trim().is_empty() {
            result.push_str(before);
        }

        let after_start = &remaining[start + 2..];

        if let Some(decoded) = try_decode_one_word(after_start) {
            result.push_str(&decoded.text);
            remaining = &remaining[start + 2 + decoded.consumed..];
            last_was_encoded = true;
        } else {
            result.push_str("=?");
            remaining = after_start;
            last_was_encoded = false;
        }
    }

    result.push_str(remaining);
    result
}

struct DecodedWord {
    text: String,
    consumed: usize, // bytes consumed from the string *after* the initial "=?"
}

fn try_decode_one_word(s: &str) -> Option<DecodedWord> {
    // Format: charset?encoding?encoded_text?=
    let first_q = s.find('?')?;
    let charset = &s[..first_q];

    let rest = &s[first_q + 1..];
    let second_q = rest.find('?')?;
    let encoding = &rest[..second_q];

    let rest2 = &rest[second_q + 1..];
    let end = rest2.find("?=")?;
    let encoded_text = &rest2[..end];

    let total_consumed = first_q + 1 + second_q + 1 + end + 2;

    let bytes = if encoding.eq_ignore_ascii_case("b") {
        LENIENT_BASE64.decode(encoded_text).ok()?
    } else if encoding.eq_ignore_ascii_case("q") {
        decode_q_encoding(encoded_text)
    } else {
        return None;
    };

    // RFC 2231 language suffix: "utf-8*en"
    let charset = charset.split('*').next().unwrap_or(charset);

    Some(DecodedWord {
        text: decode_charset(charset, &bytes),
        consumed: total_consumed,
    })
}

/// Decode Q-encoding (RFC 2047): underscores → spaces, `=XX` → byte.
fn decode_q_encoding(input: &str) -> Vec<u8> {
    let mut result = Vec::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => {
                result.push(b' ');
                i += 1;
            }
            b'=' => {
                match decode_hex_pair(&bytes[i + 1..]) {
                    Some(byte) => {
                        result.push(byte);
                        i += 3;
                    }
                    None => {
                        result.push(b'=');
                        i += 1;
                    }
                }
            }
            b => {
                result.push(b);
                i += 1;
            }
        }
    }
    result
}

/// Decode two leading hex digits of `bytes`, if present.
fn decode_hex_pair(bytes: &[u8]) -> Option<u8> {
    let pair = bytes.get(..2)?;
    let text = std::str::from_utf8(pair).ok()?;
    u8::from_str_radix(text, 16).ok()
}

/// Decode bytes using a named charset.
fn decode_charset(charset: &str, bytes: &[u8]) -> String {
    if charset.eq_ignore_ascii_case("utf-8") || charset.eq_ignore_ascii_case("utf8") {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    if let Some(encoding) = encoding_rs::Encoding::for_label(charset.as_bytes()) {
        let (decoded, _, _) = encoding.decode(bytes);
        decoded.into_owned()
    } else {
        warn!(
            charset = charset,
            "Unknown charset, falling back to UTF-8 lossy"
        );
        String::from_utf8_lossy(bytes).into_owned()
    }
}

// ── Quoting ─────────────────────────────────────────────────────

/// Strip surrounding double quotes and resolve backslash escapes.
pub(crate) fn unquote(value: &str) -> String {
    let Some(inner) = value
        .strip_prefix('"')
        .map(|v| v.strip_suffix('"').unwrap_or(v))
    else {
        return value.to_string();
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(ch);
        }
    }
    out
}

// ── Dates ───────────────────────────────────────────────────────

/// Parse an email date string in various common formats.
///
/// Supports RFC 5322, ISO 8601, and many broken real-world variants.
pub fn parse_date(date_str: &str) -> Option<DateTime<Utc>> {
    let trimmed = date_str.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    let no_dow = strip_day_of_week(trimmed);

    let formats = [
        "%d %b %Y %H:%M:%S %z",
        "%d %b %Y %H:%M %z",
        "%d %b %Y %H:%M:%S",
        "%Y-%m-%d %H:%M:%S %z",
        "%Y-%m-%d %H:%M:%S",
    ];

    for fmt in &formats {
        if let Ok(dt) = DateTime::parse_from_str(&no_dow, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(ndt) = NaiveDateTime::parse_from_str(&no_dow, fmt) {
            return Some(Utc.from_utc_datetime(&ndt));
        }
    }

    let replaced = replace_named_tz(&no_dow);
    for fmt in &formats {
        if let Ok(dt) = DateTime::parse_from_str(&replaced, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    if let Some(dt) = mail_parser_date(trimmed) {
        return Some(dt);
    }

    warn!(date = trimmed, "Could not parse date");
    None
}

/// Attempt to parse a date using `mail-parser`'s built-in parser.
fn mail_parser_date(input: &str) -> Option<DateTime<Utc>> {
    use mail_parser::MessageParser;

    // Wrap input in a minimal RFC 5322 message so mail-parser can parse it
    let fake_msg = format!("Date: {input}\n\n");
    let parsed = MessageParser::default().parse(fake_msg.as_bytes())?;
    let dt = parsed.date()?.to_rfc3339();
    DateTime::parse_from_rfc3339(&dt)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Strip a leading day-of-week prefix (e.g. "Thu, " or "Thu ").
fn strip_day_of_week(s: &str) -> String {
    const DAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];
    for day in DAYS {
        if let Some(rest) = s.strip_prefix(day) {
            return rest.trim_start_matches(',').trim().to_string();
        }
    }
    s.to_string()
}

/// Replace obsolete zone names (RFC 5322 §4.3) with numeric offsets.
fn replace_named_tz(s: &str) -> String {
    const ZONES: [(&str, &str); 10] = [
        ("EST", "-0500"),
        ("EDT", "-0400"),
        ("CST", "-0600"),
        ("CDT", "-0500"),
        ("MST", "-0700"),
        ("MDT", "-0600"),
        ("PST", "-0800"),
        ("PDT", "-0700"),
        ("GMT", "+0000"),
        ("UT", "+0000"),
    ];
    for (name, offset) in ZONES {
        if let Some(head) = s.strip_suffix(name) {
            return format!("{head}{offset}");
        }
    }
    s.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_base64_encoded_word() {
        assert_eq!(decode_encoded_words("=?UTF-8?B?SG9sYSBtdW5kbw==?="), "Hola mundo");
    }

    #[test]
    fn test_decode_q_encoded_word() {
        assert_eq!(decode_encoded_words("=?ISO-8859-1?Q?caf=E9?="), "café");
    }

    #[test]
    fn test_decode_multiple_encoded_words() {
        let input = "=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?=";
        assert_eq!(decode_encoded_words(input), "Hola mundo");
    }

    #[test]
    fn test_decode_mixed_plain_and_encoded() {
        let input = "Re: =?UTF-8?B?SG9sYQ==?= there";
        assert_eq!(decode_encoded_words(input), "Re: Hola there");
    }

    #[test]
    fn test_decode_windows1252_encoded_word() {
        assert_eq!(decode_encoded_words("=?Windows-1252?Q?M=FCller?="), "Müller");
    }

    #[test]
    fn test_malformed_encoded_word_is_kept() {
        assert_eq!(decode_encoded_words("=?UTF-8?X?abc?="), "=?UTF-8?X?abc?=");
    }

    #[test]
    fn test_unfold_headers() {
        let text = "Subject: This is a long\r\n\tsubject line\r\nFrom: user@example.com\r\n";
        let headers = unfold_headers(text).unwrap();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0].0, "subject");
        assert_eq!(headers[0].1, "This is a long subject line");
    }

    #[test]
    fn test_malformed_header_lines() {
        let err = Headers::parse(b"this is not a header line\r\nneither is this\r\n\r\n").unwrap_err();
        assert!(matches!(err, DecodeError::MalformedHeader { line: 1 }));

        let err = Headers::parse(b"Subject: ok\r\nno colon here\r\n\r\n").unwrap_err();
        assert!(matches!(err, DecodeError::MalformedHeader { line: 2 }));

        let err = Headers::parse(b" leading continuation\r\nSubject: x\r\n\r\n").unwrap_err();
        assert!(matches!(err, DecodeError::MalformedHeader { line: 1 }));

        let err = Headers::parse(b"Bad Name: value\r\n\r\n").unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn test_obsolete_space_before_colon_and_empty_block() {
        let headers = Headers::parse(b"Subject : spaced\r\n\r\n").unwrap();
        assert_eq!(headers.get("subject"), Some("spaced"));
        assert!(Headers::parse(b"\r\n").unwrap().get("subject").is_none());
    }

    #[test]
    fn test_fields_extracted() {
        let raw = b"From: Alice <alice@example.com>\r\n\
To: bob@example.com, \"Carol, C.\" <carol@example.com>\r\n\
Subject: =?UTF-8?Q?Caf=C3=A9?=\r\n\
Date: Sat, 20 Jan 2024 10:00:00 +0100\r\n\
Message-ID: <msg1@example.com>\r\n\
In-Reply-To: <parent@example.com>\r\n\
References: <root@example.com>\r\n <parent@example.com>\r\n\r\n";
        let fields = Headers::parse(raw).unwrap().fields();
        assert_eq!(fields.subject, "Café");
        assert_eq!(fields.from[0].email, "alice@example.com");
        assert_eq!(fields.from[0].name.as_deref(), Some("Alice"));
        assert_eq!(fields.to.len(), 2);
        assert_eq!(fields.to[1].name.as_deref(), Some("Carol, C."));
        assert_eq!(
            fields.sent_at.map(|d| d.to_rfc3339()),
            Some("2024-01-20T09:00:00+00:00".to_string())
        );
        assert_eq!(fields.message_id, vec!["<msg1@example.com>"]);
        assert_eq!(fields.in_reply_to, vec!["<parent@example.com>"]);
        assert_eq!(
            fields.references,
            vec!["<root@example.com>", "<parent@example.com>"]
        );
    }

    #[test]
    fn test_absent_headers_yield_empty_lists() {
        let fields = Headers::parse(b"X-Other: 1\r\n\r\n").unwrap().fields();
        assert_eq!(fields.subject, "");
        assert!(fields.from.is_empty());
        assert!(fields.sender.is_empty());
        assert!(fields.bcc.is_empty());
        assert!(fields.message_id.is_empty());
        assert!(fields.references.is_empty());
        assert!(fields.sent_at.is_none());
    }

    #[test]
    fn test_unparseable_date_is_none() {
        let fields = Headers::parse(b"Date: not a date at all\r\n\r\n").unwrap().fields();
        assert!(fields.sent_at.is_none());
    }

    #[test]
    fn test_parse_date_formats() {
        assert!(parse_date("Thu, 04 Jan 2024 10:00:00 +0000").is_some());
        assert!(parse_date("04 Jan 2024 10:00:00 +0000").is_some());
        assert!(parse_date("2024-01-04T10:00:00Z").is_some());
        let est = parse_date("Thu, 04 Jan 2024 10:00:00 EST").unwrap();
        assert_eq!(est.format("%H").to_string(), "15");
    }

    #[test]
    fn test_message_id_list() {
        assert_eq!(
            parse_message_id_list("  <a@b>\t<c@d>\r\n <e@f> "),
            vec!["<a@b>", "<c@d>", "<e@f>"]
        );
    }
}
