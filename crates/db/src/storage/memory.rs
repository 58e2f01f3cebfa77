use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use super::{ProfileStorage, StorageError, ensure_type};
use crate::models::{profile::Profile, profile_key::ProfileKey, validity::Validity};

#[derive(Debug, Clone)]
struct StoredProfile {
    profile: Profile,
    revision: u64,
}

/// Process-local storage keyed by storage URI. Every write bumps a global
/// revision counter, which doubles as the validity token.
#[derive(Debug, Default)]
pub struct InMemoryProfileStorage {
    documents: DashMap<String, StoredProfile>,
    revision: AtomicU64,
}

impl InMemoryProfileStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `profile` under `key`, replacing any previous document.
    pub fn insert(&self, key: &ProfileKey, profile: Profile) -> Result<(), StorageError> {
        let uri = key.storage_uri()?;
        ensure_type(&uri, key, &profile)?;
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        self.documents.insert(uri, StoredProfile { profile, revision });
        Ok(())
    }

    pub fn remove(&self, key: &ProfileKey) -> Result<Option<Profile>, StorageError> {
        let uri = key.storage_uri()?;
        Ok(self.documents.remove(&uri).map(|(_, stored)| stored.profile))
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl ProfileStorage for InMemoryProfileStorage {
    fn load_profile(&self, key: &ProfileKey) -> Result<Profile, StorageError> {
        let uri = key.storage_uri()?;
        self.documents
            .get(&uri)
            .map(|stored| stored.profile.clone())
            .ok_or(StorageError::NotFound(uri))
    }

    fn save_profile(&self, key: &ProfileKey, profile: &Profile) -> Result<(), StorageError> {
        self.insert(key, profile.clone())
    }

    fn get_validity(&self, key: &ProfileKey) -> Result<Option<Validity>, StorageError> {
        let uri = key.storage_uri()?;
        self.documents
            .get(&uri)
            .map(|stored| Some(Validity::Revision(stored.revision)))
            .ok_or(StorageError::NotFound(uri))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        coplet::{CopletData, CopletDataManager},
        profile_key::ProfileType,
    };

    #[test]
    fn revisions_change_on_every_write() {
        let storage = InMemoryProfileStorage::new();
        let key = ProfileKey::new("intranet", "portal", ProfileType::CopletData);
        let profile = Profile::CopletData(CopletDataManager::from_entries([CopletData::new(
            "news", "rss",
        )]));

        storage.insert(&key, profile.clone()).unwrap();
        let first = storage.get_validity(&key).unwrap().unwrap();
        storage.save_profile(&key, &profile).unwrap();
        let second = storage.get_validity(&key).unwrap().unwrap();

        assert!(!first.is_valid_against(&second));
        assert_eq!(storage.load_profile(&key).unwrap(), profile);
    }

    #[test]
    fn removed_document_is_not_found() {
        let storage = InMemoryProfileStorage::new();
        let key = ProfileKey::new("intranet", "portal", ProfileType::CopletData);
        storage
            .insert(&key, Profile::CopletData(CopletDataManager::default()))
            .unwrap();

        assert!(storage.remove(&key).unwrap().is_some());
        assert!(storage.load_profile(&key).unwrap_err().is_not_found());
        assert!(storage.is_empty());
    }
}
