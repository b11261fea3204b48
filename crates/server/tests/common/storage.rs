//! Storage wrappers that inject failures.

use async_trait::async_trait;
use bytes::Bytes;
use larder_storage::{
    ByteStream, ObjectMeta, ObjectStore, StorageError, StorageResult, StreamingUpload,
};
use std::sync::Arc;

/// Object store whose uploads open fine but reject every write.
///
/// Reads, deletes and listings go to the wrapped store, so the temp file
/// the inner upload created is visible to cleanup checks.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct FailingWrites {
    inner: Arc<dyn ObjectStore>,
}

#[allow(dead_code)]
impl FailingWrites {
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl ObjectStore for FailingWrites {
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        self.inner.head(key).await
    }

    async fn get_stream(&self, key: &str) -> StorageResult<(ObjectMeta, ByteStream)> {
        self.inner.get_stream(key).await
    }

    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        self.inner.put(key, data).await
    }

    async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>> {
        let inner = self.inner.put_stream(key).await?;
        Ok(Box::new(RejectingUpload { inner }))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.inner.delete(key).await
    }

    async fn list(&self) -> StorageResult<Vec<String>> {
        self.inner.list().await
    }

    fn backend_name(&self) -> &'static str {
        "failing-writes"
    }
}

struct RejectingUpload {
    inner: Box<dyn StreamingUpload>,
}

#[async_trait]
impl StreamingUpload for RejectingUpload {
    async fn write(&mut self, _data: Bytes) -> StorageResult<()> {
        Err(StorageError::Io(std::io::Error::other("disk full")))
    }

    async fn finish(self: Box<Self>) -> StorageResult<u64> {
        self.inner.finish().await
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        self.inner.abort().await
    }

    fn bytes_written(&self) -> u64 {
        self.inner.bytes_written()
    }
}
