use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;
use portal_core_db::{Profile, ProfileKey, ProfileStorage, StorageError, Validity, ValidityState};

/// A profile together with the token it was valid under when cached.
#[derive(Debug, Clone)]
pub struct CachedProfile {
    pub profile: Arc<Profile>,
    pub validity: Validity,
}

/// Outcome of revalidating a cache slot.
#[derive(Debug, Clone)]
pub enum CacheDecision {
    /// The cached profile is still good.
    Reuse(CachedProfile),
    /// Load again; carries the fresh token when storage could provide one.
    Reload(Option<Validity>),
}

/// Profile cache with validity-token revalidation.
///
/// Entries are replaced wholesale and never evicted. The internal map lock
/// only keeps the map itself consistent; callers coordinate loads with the
/// loader's [`ReadWriteLock`](portal_core_utils::ReadWriteLock).
pub struct ProfileCache {
    storage: Arc<dyn ProfileStorage>,
    entries: RwLock<HashMap<ProfileKey, CachedProfile>>,
}

impl std::fmt::Debug for ProfileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileCache")
            .field("entries", &self.entries.read().len())
            .finish()
    }
}

impl ProfileCache {
    pub fn new(storage: Arc<dyn ProfileStorage>) -> Self {
        Self {
            storage,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &ProfileKey) -> Option<CachedProfile> {
        self.entries.read().get(key).cloned()
    }

    pub fn put(&self, key: ProfileKey, profile: Arc<Profile>, validity: Validity) {
        self.entries
            .write()
            .insert(key, CachedProfile { profile, validity });
    }

    /// Revalidate the slot for a stored document against the storage adapter.
    ///
    /// The adapter is only asked for a fresh token when the cached token
    /// cannot decide on its own, or when a reload will need one.
    pub fn check_validity(
        &self,
        key: &ProfileKey,
        forced_load: bool,
    ) -> Result<CacheDecision, StorageError> {
        let cached = if forced_load { None } else { self.get(key) };
        let Some(cached) = cached else {
            return Ok(CacheDecision::Reload(self.storage.get_validity(key)?));
        };

        match cached.validity.state() {
            ValidityState::Valid => Ok(CacheDecision::Reuse(cached)),
            ValidityState::Invalid => Ok(CacheDecision::Reload(self.storage.get_validity(key)?)),
            ValidityState::Unknown => match self.storage.get_validity(key)? {
                Some(fresh) if cached.validity.compare(&fresh) == ValidityState::Valid => {
                    Ok(CacheDecision::Reuse(cached))
                }
                fresh => Ok(CacheDecision::Reload(fresh)),
            },
        }
    }

    /// Revalidate a slot against a token the caller computed itself.
    pub fn check_against(&self, key: &ProfileKey, fresh: &Validity) -> CacheDecision {
        match self.get(key) {
            Some(cached) if cached.validity.is_valid_against(fresh) => CacheDecision::Reuse(cached),
            _ => CacheDecision::Reload(Some(fresh.clone())),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}
