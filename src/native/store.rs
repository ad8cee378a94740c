use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;

use crate::core::{domain::ArtifactPath, errors::StorageError, traits::store::SourceStore};

/// [`SourceStore`] rooted at a directory on the local filesystem.
#[derive(Clone, Debug)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new<T: AsRef<Path>>(root: T) -> Self {
        FsStore {
            root: root.as_ref().into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &ArtifactPath) -> Result<PathBuf, StorageError> {
        let invalid = || StorageError::InvalidPath {
            path: path.to_string(),
        };

        let mut resolved = self.root.clone();
        for segment in path.as_str().split('/') {
            if segment.is_empty()
                || segment == "."
                || segment == ".."
                || segment.contains('\\')
                || segment.contains('\0')
            {
                return Err(invalid());
            }
            resolved.push(segment);
        }
        Ok(resolved)
    }
}

#[async_trait::async_trait]
impl SourceStore for FsStore {
    async fn exists(&self, path: &ArtifactPath) -> Result<bool, StorageError> {
        let resolved = self.resolve(path)?;
        fs::try_exists(&resolved)
            .await
            .map_err(|e| StorageError::Read {
                path: path.to_string(),
                reason: e.to_string(),
            })
    }

    async fn read(&self, path: &ArtifactPath) -> Result<Vec<u8>, StorageError> {
        let resolved = self.resolve(path)?;
        fs::read(&resolved).await.map_err(|e| StorageError::Read {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    async fn write(&self, path: &ArtifactPath, content: &[u8]) -> Result<(), StorageError> {
        let resolved = self.resolve(path)?;
        fs::write(&resolved, content)
            .await
            .map_err(|e| StorageError::Write {
                path: path.to_string(),
                reason: e.to_string(),
            })
    }

    async fn ensure_dir(&self, dir: &ArtifactPath) -> Result<(), StorageError> {
        let resolved = self.resolve(dir)?;
        fs::create_dir_all(&resolved)
            .await
            .map_err(|e| StorageError::CreateDir {
                path: dir.to_string(),
                reason: e.to_string(),
            })
    }

    async fn remove(&self, path: &ArtifactPath) -> Result<(), StorageError> {
        let resolved = self.resolve(path)?;
        match fs::remove_file(&resolved).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Remove {
                path: path.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    fn local_path(&self, path: &ArtifactPath) -> Result<PathBuf, StorageError> {
        self.resolve(path)
    }
}
