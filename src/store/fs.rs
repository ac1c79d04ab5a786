//! Content-addressed blob store on the local filesystem.
//!
//! Each blob is a file named `sha256-<hex digest>` under the store root.
//! Content is streamed into a temporary file in the same directory while it
//! is hashed, then renamed into place, so a blob file is either complete or
//! absent.

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::model::body::BlobRef;
use crate::store::blob::{BlobUploader, UploadedBlob};

const BLOB_PREFIX: &str = "sha256-";

/// Filesystem blob store.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store everything read from `content`.
    ///
    /// Storing identical content twice yields the same id and one file.
    pub fn put(&self, content: &mut dyn Read) -> io::Result<UploadedBlob> {
        let mut writer = HashingWriter {
            file: NamedTempFile::new_in(&self.root)?,
            hasher: Sha256::new(),
        };
        let size = io::copy(content, &mut writer)?;
        writer.file.flush()?;

        let blob_id = format!("{BLOB_PREFIX}{:x}", writer.hasher.finalize());
        let path = self.root.join(&blob_id);
        if path.exists() {
            debug!(blob_id = %blob_id, size, "Blob already stored");
        } else {
            writer.file.persist(&path).map_err(|e| e.error)?;
            debug!(blob_id = %blob_id, size, "Stored blob");
        }
        Ok(UploadedBlob { blob_id, size })
    }

    /// Whether the blob, or the parent of a byte range, is stored.
    pub fn contains(&self, blob_id: &str) -> bool {
        let id = match BlobRef::parse(blob_id) {
            BlobRef::Range { parent, .. } => parent,
            BlobRef::Opaque(id) => id,
        };
        self.path_of(id).is_ok_and(|p| p.is_file())
    }

    /// Open a blob for reading.
    ///
    /// A byte-range id `"{parent},{start},{end}"` yields exactly bytes
    /// `[start, end)` of the parent blob.
    pub fn open(&self, blob_id: &str) -> io::Result<io::Take<File>> {
        match BlobRef::parse(blob_id) {
            BlobRef::Opaque(id) => {
                let file = File::open(self.path_of(id)?)?;
                let len = file.metadata()?.len();
                Ok(file.take(len))
            }
            BlobRef::Range { parent, start, end } => {
                let mut file = File::open(self.path_of(parent)?)?;
                let len = file.metadata()?.len();
                if end > len {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("range {start}..{end} is past the end of {parent} ({len} bytes)"),
                    ));
                }
                debug!(parent, start, end, "Reading blob range");
                file.seek(SeekFrom::Start(start))?;
                Ok(file.take(end - start))
            }
        }
    }

    /// Read a whole blob into memory.
    pub fn read(&self, blob_id: &str) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.open(blob_id)?.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Map a stored id to its file, rejecting anything that could escape the
    /// store root.
    fn path_of(&self, id: &str) -> io::Result<PathBuf> {
        let valid = !id.is_empty()
            && !id.starts_with('.')
            && id
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));
        if !valid {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid blob id '{id}'"),
            ));
        }
        Ok(self.root.join(id))
    }
}

impl BlobUploader for FsBlobStore {
    fn upload(
        &mut self,
        account_id: &str,
        parent_blob_id: &str,
        content_type: &str,
        content: &mut dyn Read,
    ) -> io::Result<UploadedBlob> {
        debug!(account_id, parent_blob_id, content_type, "Uploading part");
        self.put(content)
    }
}

/// Writes to a temp file and feeds the same bytes to a hasher.
struct HashingWriter {
    file: NamedTempFile,
    hasher: Sha256,
}

impl Write for HashingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}
