//! Durable artifacts: the raw record store (source of truth) and the chain
//! model (a cache that can always be rebuilt from the store).

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::chain::{ChainModel, ModelFile};
use crate::error::{PersistError, StorageError};
use crate::schema::MessagesFile;
use crate::store::RecordStore;

#[derive(Debug, Clone)]
pub struct RecordStoreFile {
    path: PathBuf,
}

impl RecordStoreFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<RecordStore, StorageError> {
        let raw = tokio::fs::read(&self.path).await.map_err(|source| StorageError::Unavailable {
            path: self.path.clone(),
            source,
        })?;
        let file: MessagesFile =
            serde_json::from_slice(&raw).map_err(|source| StorageError::Corrupt {
                path: self.path.clone(),
                source,
            })?;
        Ok(RecordStore::from_records(file.messages))
    }

    /// Load the store, substituting [`RecordStore::placeholder`] when the file
    /// is missing or unreadable.  A corrupt file is left on disk untouched
    /// until the next successful save replaces it.
    pub async fn load_or_placeholder(&self) -> RecordStore {
        match self.load().await {
            Ok(store) => store,
            Err(StorageError::Unavailable { source, .. }) if source.kind() == ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no record store on disk, starting with initial values");
                RecordStore::placeholder()
            }
            Err(err) => {
                warn!(error = %err, "record store unreadable, starting with initial values");
                RecordStore::placeholder()
            }
        }
    }

    pub async fn save(&self, store: &RecordStore) -> Result<(), PersistError> {
        let file = MessagesFile {
            messages: store.all().to_vec(),
        };
        let bytes = serde_json::to_vec_pretty(&file)?;
        write_atomic(&self.path, &bytes).await
    }
}

#[derive(Debug, Clone)]
pub struct ModelArtifact {
    path: PathBuf,
}

impl ModelArtifact {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<ChainModel, StorageError> {
        let raw = tokio::fs::read(&self.path).await.map_err(|source| StorageError::Unavailable {
            path: self.path.clone(),
            source,
        })?;
        let file: ModelFile =
            serde_json::from_slice(&raw).map_err(|source| StorageError::Corrupt {
                path: self.path.clone(),
                source,
            })?;
        ChainModel::try_from(file).map_err(|source| StorageError::Inconsistent {
            path: self.path.clone(),
            source,
        })
    }

    pub async fn save(&self, model: &ChainModel) -> Result<(), PersistError> {
        let bytes = serde_json::to_vec(&model.to_file())?;
        write_atomic(&self.path, &bytes).await
    }
}

/// Replace `path` with `bytes` as a whole.
///
/// The content goes to a `.tmp` sibling, is `fsync`'d, then renamed over the
/// original.  Readers see either the old file or the new one, never a
/// partial write.  The `.tmp` file is removed on any error path.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PersistError> {
    let io_err = |source: std::io::Error| PersistError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
    }

    let tmp_path = {
        let filename = path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| "artifact.json".to_string());
        path.with_file_name(format!("{filename}.tmp"))
    };

    let write_result: std::io::Result<()> = async {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)
            .await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }
    .await;

    if let Err(err) = write_result {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(io_err(err));
    }

    if let Err(err) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(io_err(err));
    }

    Ok(())
}
