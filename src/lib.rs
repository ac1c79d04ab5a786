//! `mimestream` — streaming RFC 5322 / MIME decoding in bounded memory.
//!
//! This crate turns a raw message byte stream into a [`ParsedMessage`]:
//! header fields, a tree of body parts whose content lives in a blob store,
//! and the derived text/HTML/attachment indices. Bodies are never read into
//! memory as a whole.

pub mod config;
pub mod error;
pub mod model;
pub mod parser;
pub mod store;

pub use error::{DecodeError, Result};
pub use model::message::ParsedMessage;
pub use parser::decode::{decode_stream, DecodeLimits, MessageDecoder};
pub use store::blob::{BlobUploader, UploadedBlob};
