use std::path::PathBuf;

use crate::core::{domain::ArtifactPath, errors::StorageError};

/// Blob store holding scripts, inputs, compiled programs and outputs.
#[mockall::automock]
#[async_trait::async_trait]
pub trait SourceStore: std::fmt::Debug + Send + Sync {
    async fn exists(&self, path: &ArtifactPath) -> Result<bool, StorageError>;

    async fn read(&self, path: &ArtifactPath) -> Result<Vec<u8>, StorageError>;

    async fn write(&self, path: &ArtifactPath, content: &[u8]) -> Result<(), StorageError>;

    /// Creates the directory and its parents. Succeeds if it already exists.
    async fn ensure_dir(&self, dir: &ArtifactPath) -> Result<(), StorageError>;

    /// Removing a missing artifact is not an error.
    async fn remove(&self, path: &ArtifactPath) -> Result<(), StorageError>;

    /// Location handed to external tools, which work on real files.
    fn local_path(&self, path: &ArtifactPath) -> Result<PathBuf, StorageError>;

    /// Whether two runs may write their outputs at the same time.
    fn supports_concurrent_writes(&self) -> bool {
        true
    }
}
