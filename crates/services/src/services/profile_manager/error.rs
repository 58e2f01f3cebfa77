use portal_core_db::{ProfileKey, ProfileTypeMismatch, StorageError, Tier};
use portal_core_utils::LockError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("profile not found: {key}")]
    NotFound { key: String },
    #[error("failed to load {tier} profile {key}")]
    LoadFailed {
        tier: Tier,
        key: String,
        #[source]
        source: StorageError,
    },
    #[error("failed to save profile {key}")]
    SaveFailed {
        key: String,
        #[source]
        source: StorageError,
    },
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    UnexpectedType(#[from] ProfileTypeMismatch),
    #[error("no portal user is bound to this session")]
    NotLoggedIn,
}

impl ProfileError {
    pub(crate) fn load_failed(key: &ProfileKey, source: StorageError) -> Self {
        ProfileError::LoadFailed {
            tier: key.tier(),
            key: key.to_string(),
            source,
        }
    }

    pub(crate) fn save_failed(key: &ProfileKey, source: StorageError) -> Self {
        ProfileError::SaveFailed {
            key: key.to_string(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ProfileError::NotFound { .. })
    }
}
