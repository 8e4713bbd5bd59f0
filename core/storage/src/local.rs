//! Local filesystem blob store.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use crate::provider::BlobStore;
use salecache_common::{Error, Result, StoreKey};

/// Local filesystem blob store.
///
/// Each key maps to one file in the root directory. Writes go to a
/// temporary file in the same directory which is then renamed over the
/// target, so readers never observe a half-written blob.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Create a new local store with the given root directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        // Create root if it doesn't exist (sync for constructor)
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self { root })
    }

    /// Root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Convert a StoreKey to a filesystem path.
    fn to_fs_path(&self, key: &StoreKey) -> PathBuf {
        let file_name: String = key
            .as_str()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
            .collect();
        self.root.join(format!("{}.blob", file_name))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn read(&self, key: &StoreKey) -> Result<Vec<u8>> {
        let fs_path = self.to_fs_path(key);

        match fs::read(&fs_path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("Blob not found: {}", key)))
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    async fn write(&self, key: &StoreKey, data: Vec<u8>) -> Result<()> {
        let fs_path = self.to_fs_path(key);
        let tmp_path = self
            .root
            .join(format!(".{}.tmp", Uuid::new_v4()));

        let written = async {
            let mut file = fs::File::create(&tmp_path).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, &fs_path).await
        }
        .await;

        if let Err(e) = written {
            // Best effort: never leave stray temp files behind
            let _ = fs::remove_file(&tmp_path).await;
            return Err(Error::Io(e));
        }

        debug!("Wrote {} bytes to {}", data.len(), fs_path.display());
        Ok(())
    }

    async fn remove(&self, key: &StoreKey) -> Result<()> {
        let fs_path = self.to_fs_path(key);

        match fs::remove_file(&fs_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(e)),
        }
    }

    async fn exists(&self, key: &StoreKey) -> Result<bool> {
        Ok(fs::try_exists(self.to_fs_path(key)).await?)
    }
}
