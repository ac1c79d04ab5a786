//! Blob storage: the upload seam used by the decoder and its implementations.

pub mod blob;
pub mod fs;
