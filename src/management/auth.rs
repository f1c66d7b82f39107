use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use tokio::{fs::OpenOptions, io::AsyncWriteExt};
use tracing::debug;

use crate::{config, error::StoreError, types::Credentials};

/// File-backed store for the persisted [`Credentials`] record.
///
/// The record is replaced atomically: a crash during [`CredentialStore::save`]
/// leaves either the old file or the new one, never a truncated record.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<data_local_dir>/spotify-pkce/credentials.json`
    pub fn default_path() -> PathBuf {
        config::app_data_dir().join("credentials.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<Credentials, StoreError> {
        let content = match async_fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound(self.path.clone()));
            }
            Err(e) => return Err(StoreError::Io(e)),
        };

        let credentials: Credentials =
            serde_json::from_str(&content).map_err(|e| StoreError::Corrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        if !credentials.is_usable() {
            return Err(StoreError::Corrupt {
                path: self.path.clone(),
                reason: "empty access_token".to_string(),
            });
        }

        debug!(path = %self.path.display(), "loaded stored credentials");
        Ok(credentials)
    }

    pub async fn save(&self, credentials: &Credentials) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                async_fs::create_dir_all(parent).await?;
            }
        }

        let json = serde_json::to_string_pretty(credentials).map_err(StoreError::Serialize)?;
        let tmp = self.temp_path();

        if let Err(e) = self.write_temp(&tmp, json.as_bytes()).await {
            let _ = async_fs::remove_file(&tmp).await;
            return Err(e);
        }

        if let Err(e) = async_fs::rename(&tmp, &self.path).await {
            let _ = async_fs::remove_file(&tmp).await;
            return Err(StoreError::Io(e));
        }

        debug!(path = %self.path.display(), "saved credentials");
        Ok(())
    }

    async fn write_temp(&self, tmp: &Path, contents: &[u8]) -> Result<(), StoreError> {
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(tmp).await?;
        // An existing temp file keeps its old mode through `open`.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600)).await?;
        }

        file.write_all(contents).await?;
        // Flush to disk before the rename makes the record visible.
        file.sync_all().await?;
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "credentials.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
