//! Storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

/// A boxed stream of bytes for streaming reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Object store holding one object per cache key.
///
/// Keys are relative, `/`-separated locations as produced by
/// `CacheKey::storage_path`.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Get an object's size without reading content.
    ///
    /// Fails with `StorageError::NotFound` when the object is absent.
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta>;

    /// Open an object for streaming.
    ///
    /// The returned size is that of the object the stream reads, even if
    /// the key is replaced after opening.
    async fn get_stream(&self, key: &str) -> StorageResult<(ObjectMeta, ByteStream)>;

    /// Put an object atomically.
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()>;

    /// Start a streaming upload.
    ///
    /// Nothing is visible at `key` until [`StreamingUpload::finish`]
    /// succeeds. Aborting, or dropping the upload unfinished, leaves any
    /// previous object at `key` untouched.
    async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>>;

    /// Delete an object.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// List every committed object. In-progress uploads are skipped.
    async fn list(&self) -> StorageResult<Vec<String>>;

    /// Get the name of this storage backend, for logging.
    fn backend_name(&self) -> &'static str;

    /// Verify the backend is usable before accepting requests.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Metadata about a stored object.
#[derive(Clone, Debug)]
pub struct ObjectMeta {
    /// Object size in bytes.
    pub size: u64,
}

/// Trait for streaming uploads.
#[async_trait]
pub trait StreamingUpload: Send {
    /// Write a chunk of data.
    async fn write(&mut self, data: Bytes) -> StorageResult<()>;

    /// Commit the upload and return the number of bytes written.
    async fn finish(self: Box<Self>) -> StorageResult<u64>;

    /// Abandon the upload.
    async fn abort(self: Box<Self>) -> StorageResult<()>;

    /// Bytes accepted so far.
    fn bytes_written(&self) -> u64;
}
