//! The decoded representation of one message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::address::EmailAddress;
use crate::model::body::BodyPart;
use crate::parser::header::HeaderFields;

/// Result of decoding one message.
///
/// Header fields, the MIME tree with blob references for every leaf, and
/// indices derived from the tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedMessage {
    pub subject: String,
    pub from: Vec<EmailAddress>,
    pub sender: Vec<EmailAddress>,
    pub to: Vec<EmailAddress>,
    pub cc: Vec<EmailAddress>,
    pub bcc: Vec<EmailAddress>,
    pub reply_to: Vec<EmailAddress>,
    /// `None` when the `Date` header is absent or unparseable.
    pub sent_at: Option<DateTime<Utc>>,
    pub message_id: Vec<String>,
    pub in_reply_to: Vec<String>,
    pub references: Vec<String>,

    /// Byte offset where the body begins.
    pub header_size: u64,
    /// Total bytes in the input stream.
    pub size: u64,
    pub preview: String,
    pub body_structure: BodyPart,

    pub text_body_part_ids: Vec<String>,
    pub html_body_part_ids: Vec<String>,
    pub attachment_part_ids: Vec<String>,
    pub has_attachment: bool,
}

impl ParsedMessage {
    /// Assemble the message from its parts, deriving the body indices.
    ///
    /// Leaves with an `attachment` disposition are attachments; other
    /// `text/plain` and `text/html` leaves are text and HTML bodies.
    pub fn assemble(
        fields: HeaderFields,
        header_size: u64,
        size: u64,
        preview: String,
        body_structure: BodyPart,
    ) -> Self {
        let mut text_body_part_ids = Vec::new();
        let mut html_body_part_ids = Vec::new();
        let mut attachment_part_ids = Vec::new();

        for leaf in body_structure.leaves() {
            if leaf.is_attachment() {
                attachment_part_ids.push(leaf.part_id.clone());
            } else if leaf.media_type == "text/plain" {
                text_body_part_ids.push(leaf.part_id.clone());
            } else if leaf.media_type == "text/html" {
                html_body_part_ids.push(leaf.part_id.clone());
            }
        }
        let has_attachment = !attachment_part_ids.is_empty();

        Self {
            subject: fields.subject,
            from: fields.from,
            sender: fields.sender,
            to: fields.to,
            cc: fields.cc,
            bcc: fields.bcc,
            reply_to: fields.reply_to,
            sent_at: fields.sent_at,
            message_id: fields.message_id,
            in_reply_to: fields.in_reply_to,
            references: fields.references,
            header_size,
            size,
            preview,
            body_structure,
            text_body_part_ids,
            html_body_part_ids,
            attachment_part_ids,
            has_attachment,
        }
    }
}
