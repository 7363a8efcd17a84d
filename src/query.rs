//! Rewinder - Query Service
//!
//! Timestamp lookups and history clearing. "Not found" is an answer, not
//! an error; a record that cannot be opened is an error.

use std::path::PathBuf;
use std::sync::Arc;

use crate::encryption::{BlobKind, EncryptionManager};
use crate::error::{QueryError, StorageError};
use crate::store::ImageStore;

/// Outcome of a bytes lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageAnswer {
    Found(Vec<u8>),
    NotFound,
}

impl ImageAnswer {
    pub fn into_option(self) -> Option<Vec<u8>> {
        match self {
            ImageAnswer::Found(bytes) => Some(bytes),
            ImageAnswer::NotFound => None,
        }
    }
}

/// Outcome of a path lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathAnswer {
    Found(PathBuf),
    NotFound,
}

pub struct QueryService {
    store: Arc<ImageStore>,
    encryption: Arc<EncryptionManager>,
}

impl QueryService {
    pub fn new(store: Arc<ImageStore>, encryption: Arc<EncryptionManager>) -> Self {
        Self { store, encryption }
    }

    /// Plaintext JPEG bytes of the capture at exactly `timestamp`
    pub fn lookup(&self, timestamp: i64) -> Result<ImageAnswer, QueryError> {
        self.lookup_blob(timestamp, BlobKind::Image)
    }

    pub fn lookup_thumbnail(&self, timestamp: i64) -> Result<ImageAnswer, QueryError> {
        self.lookup_blob(timestamp, BlobKind::Thumbnail)
    }

    fn lookup_blob(&self, timestamp: i64, kind: BlobKind) -> Result<ImageAnswer, QueryError> {
        let Some(blob) = self.store.get_blob(timestamp, kind)? else {
            return Ok(ImageAnswer::NotFound);
        };

        if !blob.encrypted {
            return Ok(ImageAnswer::Found(blob.bytes));
        }

        let plaintext = self
            .encryption
            .unseal(kind, timestamp, blob.key_id.as_deref(), &blob.bytes)
            .inspect_err(|e| log::warn!("Capture {timestamp} could not be opened: {e}"))?;
        Ok(ImageAnswer::Found(plaintext))
    }

    /// File path of a readable JPEG for `timestamp`. Encrypted captures are
    /// decrypted into the view cache first.
    pub fn lookup_path(&self, timestamp: i64) -> Result<PathAnswer, QueryError> {
        let Some(meta) = self.store.meta(timestamp)? else {
            return Ok(PathAnswer::NotFound);
        };

        if !meta.encrypted {
            return Ok(PathAnswer::Found(self.store.image_path(&meta)));
        }

        match self.lookup(timestamp)? {
            ImageAnswer::Found(plaintext) => {
                let path = self.store.write_view(timestamp, meta.format, &plaintext)?;
                Ok(PathAnswer::Found(path))
            }
            // Cleared between the two reads
            ImageAnswer::NotFound => Ok(PathAnswer::NotFound),
        }
    }

    /// Remove every capture. Returns how many were removed.
    pub fn clear_history(&self) -> Result<usize, StorageError> {
        self.store.clear()
    }

    /// Shred decrypted copies produced by `lookup_path`
    pub fn purge_views(&self) -> Result<usize, StorageError> {
        self.store.purge_views()
    }
}
