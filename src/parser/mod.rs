//! Streaming message parsing: header splitting, header and MIME entity
//! decoding, transfer encodings, multipart walking, and the decoder that
//! ties them together.

pub mod counting;
pub mod decode;
pub mod encoding;
pub mod header;
pub mod mime;
pub mod multipart;
pub mod preview;
pub mod split;
