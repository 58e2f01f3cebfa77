//! Persistence boundary for profile documents.

pub mod file;
pub mod memory;

use std::io;

use thiserror::Error;

use crate::models::{
    profile::Profile,
    profile_key::{InvalidKeyError, ProfileKey, ProfileType},
    validity::Validity,
};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("profile document not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    InvalidKey(#[from] InvalidKeyError),
    #[error("profile document {uri} holds a {found} profile, expected {expected}")]
    TypeMismatch {
        uri: String,
        expected: ProfileType,
        found: ProfileType,
    },
    #[error("I/O error on profile document {uri}: {source}")]
    Io {
        uri: String,
        #[source]
        source: io::Error,
    },
    #[error("malformed profile document {uri}: {source}")]
    Yaml {
        uri: String,
        #[source]
        source: serde_yaml_ng::Error,
    },
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

/// Backing store for profile documents, one document per storage key.
///
/// Callers pass keys already normalised with [`ProfileKey::storage_key`];
/// implementations address documents through [`ProfileKey::storage_uri`].
pub trait ProfileStorage: Send + Sync {
    fn load_profile(&self, key: &ProfileKey) -> Result<Profile, StorageError>;

    fn save_profile(&self, key: &ProfileKey, profile: &Profile) -> Result<(), StorageError>;

    /// Current validity of the stored document. `Ok(None)` means the store
    /// cannot tell, and whatever is loaded must not be cached.
    fn get_validity(&self, key: &ProfileKey) -> Result<Option<Validity>, StorageError>;
}

pub(crate) fn ensure_type(
    uri: &str,
    key: &ProfileKey,
    profile: &Profile,
) -> Result<(), StorageError> {
    if profile.profile_type() != key.profile_type() {
        return Err(StorageError::TypeMismatch {
            uri: uri.to_string(),
            expected: key.profile_type(),
            found: profile.profile_type(),
        });
    }
    Ok(())
}
