//! YAML documents on the local file system.
//!
//! Layout under the storage root mirrors [`ProfileKey::storage_uri`]:
//!
//! ```text
//! <root>/<portal>/<layout key>/<profile type>/global.yaml
//! <root>/<portal>/<layout key>/<profile type>/role/<role>.yaml
//! <root>/<portal>/<layout key>/<profile type>/user/<user>.yaml
//! ```
//!
//! Validity is the document's modification time.

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use tempfile::NamedTempFile;

use super::{ProfileStorage, StorageError, ensure_type};
use crate::models::{profile::Profile, profile_key::ProfileKey, validity::Validity};

const EXTENSION: &str = "yaml";

#[derive(Debug, Clone)]
pub struct FileProfileStorage {
    root: PathBuf,
}

impl FileProfileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of the document a key addresses.
    pub fn document_path(&self, key: &ProfileKey) -> Result<PathBuf, StorageError> {
        let uri = key.storage_uri()?;
        Ok(self.root.join(format!("{uri}.{EXTENSION}")))
    }

    fn io_error(uri: String, source: io::Error) -> StorageError {
        if source.kind() == io::ErrorKind::NotFound {
            StorageError::NotFound(uri)
        } else {
            StorageError::Io { uri, source }
        }
    }
}

impl ProfileStorage for FileProfileStorage {
    fn load_profile(&self, key: &ProfileKey) -> Result<Profile, StorageError> {
        let uri = key.storage_uri()?;
        let path = self.document_path(key)?;

        let content = fs::read_to_string(&path).map_err(|e| Self::io_error(uri.clone(), e))?;
        let profile = Profile::from_yaml(key.profile_type(), &content).map_err(|source| {
            StorageError::Yaml {
                uri: uri.clone(),
                source,
            }
        })?;

        tracing::debug!("Loaded profile document {}", path.display());
        Ok(profile)
    }

    fn save_profile(&self, key: &ProfileKey, profile: &Profile) -> Result<(), StorageError> {
        let uri = key.storage_uri()?;
        ensure_type(&uri, key, profile)?;
        let path = self.document_path(key)?;

        let yaml = profile.to_yaml().map_err(|source| StorageError::Yaml {
            uri: uri.clone(),
            source,
        })?;

        let parent = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent).map_err(|e| Self::io_error(uri.clone(), e))?;

        // Write next to the target and rename, so readers never see half a document.
        let mut staging = NamedTempFile::new_in(parent).map_err(|e| Self::io_error(uri.clone(), e))?;
        staging
            .write_all(yaml.as_bytes())
            .map_err(|e| Self::io_error(uri.clone(), e))?;
        staging
            .persist(&path)
            .map_err(|e| Self::io_error(uri.clone(), e.error))?;

        tracing::info!("Saved profile document {}", path.display());
        Ok(())
    }

    fn get_validity(&self, key: &ProfileKey) -> Result<Option<Validity>, StorageError> {
        let uri = key.storage_uri()?;
        let path = self.document_path(key)?;

        let metadata = fs::metadata(&path).map_err(|e| Self::io_error(uri.clone(), e))?;
        match metadata.modified() {
            Ok(modified) => Ok(Some(Validity::Modified(modified))),
            Err(e) => {
                tracing::warn!(
                    "No modification time for {}: {}; profile will not be cached",
                    path.display(),
                    e
                );
                Ok(None)
            }
        }
    }
}
