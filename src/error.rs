//! Centralized error types for mimestream.

use thiserror::Error;

/// All errors produced while decoding a message.
///
/// A decode is all-or-nothing: when any of these is returned, no partial
/// [`ParsedMessage`](crate::model::message::ParsedMessage) exists.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Reading from the source stream failed.
    #[error("I/O error while {context}: {source}")]
    Io {
        context: &'static str,
        source: std::io::Error,
    },

    /// A header block grew past the configured limit before its blank line.
    #[error("Header block exceeds {limit} bytes")]
    HeaderTooLarge { limit: usize },

    /// A header block line is neither a field nor a continuation.
    #[error("Malformed header block at line {line}")]
    MalformedHeader { line: usize },

    /// A multipart entity was declared without a `boundary` parameter.
    #[error("Multipart entity '{media_type}' has no boundary parameter")]
    MissingBoundary { media_type: String },

    /// A multipart entity contained no parts at all.
    #[error("Multipart entity '{media_type}' contains no parts")]
    EmptyMultipart { media_type: String },

    /// The message holds more body parts than allowed.
    #[error("Too many MIME parts (limit {limit})")]
    TooManyParts { limit: usize },

    /// Multipart containers are nested deeper than allowed.
    #[error("MIME nesting too deep (limit {limit})")]
    NestingTooDeep { limit: usize },

    /// The blob-upload collaborator failed for a part.
    #[error("Failed to upload part {part_id}: {source}")]
    Upload {
        part_id: String,
        source: std::io::Error,
    },
}

/// Convenience alias for `Result<T, DecodeError>`.
pub type Result<T> = std::result::Result<T, DecodeError>;

impl DecodeError {
    /// Create an `Io` variant naming the operation that failed.
    pub fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }

    /// True for the security-limit sentinels.
    ///
    /// These indicate hostile or broken input and should not be retried,
    /// unlike [`DecodeError::Io`] or [`DecodeError::Upload`].
    pub fn is_limit_violation(&self) -> bool {
        matches!(
            self,
            Self::TooManyParts { .. } | Self::NestingTooDeep { .. } | Self::HeaderTooLarge { .. }
        )
    }

    /// True when the input itself is malformed (as opposed to an I/O failure).
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Self::MalformedHeader { .. }
                | Self::MissingBoundary { .. }
                | Self::EmptyMultipart { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_violation_classification() {
        assert!(DecodeError::TooManyParts { limit: 100 }.is_limit_violation());
        assert!(DecodeError::NestingTooDeep { limit: 10 }.is_limit_violation());
        let io = DecodeError::io("reading", std::io::Error::other("boom"));
        assert!(!io.is_limit_violation());
        assert!(!io.is_malformed());
    }

    #[test]
    fn test_error_messages_name_the_cause() {
        let err = DecodeError::MissingBoundary {
            media_type: "multipart/mixed".to_string(),
        };
        assert!(err.to_string().contains("multipart/mixed"));
        assert!(err.is_malformed());

        let err = DecodeError::Upload {
            part_id: "3".to_string(),
            source: std::io::Error::other("disk full"),
        };
        assert_eq!(err.to_string(), "Failed to upload part 3: disk full");

        let err = DecodeError::MalformedHeader { line: 2 };
        assert_eq!(err.to_string(), "Malformed header block at line 2");
        assert!(err.is_malformed());
        assert!(!err.is_limit_violation());
    }
}
