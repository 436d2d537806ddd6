use async_trait::async_trait;

use super::SlotKey;

/// In-memory representation of a file offered for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub file_name: String,
    pub content_type: mime::Mime,
    pub bytes: Vec<u8>,
}

impl FileUpload {
    pub fn new(file_name: impl Into<String>, content_type: mime::Mime, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type,
            bytes,
        }
    }
}

/// Capability interface over remote document storage. Vendor wire formats
/// stay behind this seam; the engine only sees paths, buckets, and URLs.
#[async_trait]
pub trait StorageGateway: Send + Sync {
    /// Resolve a short-lived access URL for a stored object. `Ok(None)`
    /// means the bucket does not hold the path; errors mean the backend
    /// itself failed.
    async fn resolve_signed_url(
        &self,
        path: &str,
        bucket: &str,
    ) -> Result<Option<String>, StorageError>;

    /// Delete a stored object. Returns `false` when the path was absent.
    async fn delete_object(&self, path: &str, bucket: &str) -> Result<bool, StorageError>;

    /// Store a file for a logical slot and return the path under which it
    /// was registered.
    async fn upload(&self, file: &FileUpload, slot: SlotKey) -> Result<String, StorageError>;
}

/// Storage backend failure.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage backend failed: {0}")]
    Backend(String),
}

/// Ordered list of buckets tried during resolution and deletion. The first
/// entry is the primary bucket new uploads land in; later entries cover
/// the legacy archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketRoster {
    buckets: Vec<String>,
}

impl BucketRoster {
    pub fn new(buckets: Vec<String>) -> Self {
        debug_assert!(!buckets.is_empty(), "roster needs at least one bucket");
        Self { buckets }
    }

    pub fn primary(&self) -> &str {
        &self.buckets[0]
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.buckets.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
