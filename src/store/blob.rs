//! The blob-upload seam used by the decoder.

use std::io::{self, Read};

use tracing::debug;

/// Reference and size returned by a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedBlob {
    pub blob_id: String,
    /// Number of bytes consumed from the content stream.
    pub size: u64,
}

/// Destination for decoded part content.
///
/// The decoder calls `upload` once per leaf it cannot represent as a byte
/// range of the original message, sequentially and in traversal order.
/// Implementations must consume `content` to the end; the returned
/// `blob_id` must be usable later to retrieve exactly those bytes.
pub trait BlobUploader {
    fn upload(
        &mut self,
        account_id: &str,
        parent_blob_id: &str,
        content_type: &str,
        content: &mut dyn Read,
    ) -> io::Result<UploadedBlob>;
}

/// A blob held by [`MemoryBlobStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub account_id: String,
    pub parent_blob_id: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// In-memory uploader. Blob ids are `mem-1`, `mem-2`, ... in upload order.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Vec<(String, StoredBlob)>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, blob_id: &str) -> Option<&StoredBlob> {
        self.blobs
            .iter()
            .find(|(id, _)| id == blob_id)
            .map(|(_, blob)| blob)
    }

    /// Number of uploads received.
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

impl BlobUploader for MemoryBlobStore {
    fn upload(
        &mut self,
        account_id: &str,
        parent_blob_id: &str,
        content_type: &str,
        content: &mut dyn Read,
    ) -> io::Result<UploadedBlob> {
        let mut data = Vec::new();
        content.read_to_end(&mut data)?;
        let blob_id = format!("mem-{}", self.blobs.len() + 1);
        let size = data.len() as u64;
        debug!(blob_id = %blob_id, size, content_type, "Stored blob in memory");
        self.blobs.push((
            blob_id.clone(),
            StoredBlob {
                account_id: account_id.to_string(),
                parent_blob_id: parent_blob_id.to_string(),
                content_type: content_type.to_string(),
                data,
            },
        ));
        Ok(UploadedBlob { blob_id, size })
    }
}
