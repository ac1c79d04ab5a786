//! MIME body-part tree and blob references.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A node in the MIME tree.
///
/// Whether a node is a container or a leaf is carried by [`PartContent`],
/// so a node can never have both sub-parts and a blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BodyPart {
    /// Traversal-order sequence number, unique within one message.
    pub part_id: String,
    /// Lowercase media type, e.g. `text/plain`.
    #[serde(rename = "type")]
    pub media_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charset: Option<String>,
    /// Lowercase disposition type, e.g. `attachment`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disposition: Option<String>,
    /// Filename from `Content-Disposition` or `Content-Type`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub content: PartContent,
}

/// What a [`BodyPart`] holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PartContent {
    /// A multipart entity; never empty.
    #[serde(rename_all = "camelCase")]
    Container { sub_parts: Vec<BodyPart> },
    /// Content stored as a blob; `size` is the decoded length in bytes.
    #[serde(rename_all = "camelCase")]
    Leaf { blob_id: String, size: u64 },
}

impl BodyPart {
    pub fn is_container(&self) -> bool {
        matches!(self.content, PartContent::Container { .. })
    }

    /// Blob reference of a leaf.
    pub fn blob_id(&self) -> Option<&str> {
        match &self.content {
            PartContent::Leaf { blob_id, .. } => Some(blob_id),
            PartContent::Container { .. } => None,
        }
    }

    /// Decoded size of a leaf; zero for containers.
    pub fn size(&self) -> u64 {
        match self.content {
            PartContent::Leaf { size, .. } => size,
            PartContent::Container { .. } => 0,
        }
    }

    pub fn sub_parts(&self) -> &[BodyPart] {
        match &self.content {
            PartContent::Container { sub_parts } => sub_parts,
            PartContent::Leaf { .. } => &[],
        }
    }

    pub fn is_attachment(&self) -> bool {
        self.disposition
            .as_deref()
            .is_some_and(|d| d.eq_ignore_ascii_case("attachment"))
    }

    /// All leaves in pre-order.
    pub fn leaves(&self) -> Vec<&BodyPart> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a BodyPart>) {
        match &self.content {
            PartContent::Leaf { .. } => out.push(self),
            PartContent::Container { sub_parts } => {
                for part in sub_parts {
                    part.collect_leaves(out);
                }
            }
        }
    }

    /// Find the part with `part_id` anywhere in this tree.
    pub fn find(&self, part_id: &str) -> Option<&BodyPart> {
        if self.part_id == part_id {
            return Some(self);
        }
        self.sub_parts().iter().find_map(|p| p.find(part_id))
    }

    /// Blob ids of leaves whose content was uploaded (not byte ranges of the
    /// original message).
    ///
    /// These are the blobs a caller must clean up if it discards the result.
    pub fn uploaded_blob_ids(&self) -> Vec<&str> {
        self.leaves()
            .into_iter()
            .filter_map(BodyPart::blob_id)
            .filter(|id| matches!(BlobRef::parse(id), BlobRef::Opaque(_)))
            .collect()
    }
}

/// A parsed blob id.
///
/// `"{parent},{start},{end}"` names bytes `[start, end)` of blob `parent`;
/// anything else is an opaque id from the blob store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobRef<'a> {
    Range {
        parent: &'a str,
        start: u64,
        end: u64,
    },
    Opaque(&'a str),
}

impl<'a> BlobRef<'a> {
    /// Parse a blob id. Ids that do not form a valid range are opaque.
    pub fn parse(id: &'a str) -> Self {
        let mut fields = id.rsplitn(3, ',');
        let (Some(end), Some(start), Some(parent)) = (fields.next(), fields.next(), fields.next())
        else {
            return Self::Opaque(id);
        };
        match (start.parse::<u64>(), end.parse::<u64>()) {
            (Ok(start), Ok(end)) if !parent.is_empty() && start <= end => Self::Range {
                parent,
                start,
                end,
            },
            _ => Self::Opaque(id),
        }
    }

    /// Format a byte-range blob id.
    pub fn range_id(parent: &str, start: u64, end: u64) -> String {
        format!("{parent},{start},{end}")
    }
}

impl fmt::Display for BlobRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Range { parent, start, end } => write!(f, "{parent},{start},{end}"),
            Self::Opaque(id) => f.write_str(id),
        }
    }
}
