//! On-disk object storage for larder.
//!
//! This crate provides:
//! - The `ObjectStore` abstraction the cache registry and resolver use
//! - A local filesystem backend with streaming reads and atomic streaming writes

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::filesystem::FilesystemBackend;
pub use error::{StorageError, StorageResult};
pub use traits::{ByteStream, ObjectMeta, ObjectStore, StreamingUpload};

use larder_core::config::StorageConfig;
use std::sync::Arc;

/// Create an object store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    if config.path.as_os_str().is_empty() {
        return Err(StorageError::Config(
            "storage path must not be empty".to_string(),
        ));
    }
    let backend = FilesystemBackend::new(&config.path).await?;
    Ok(Arc::new(backend))
}
