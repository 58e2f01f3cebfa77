//! Tiered profile loading.
//!
//! A merged profile is built from up to three stored documents, always in the
//! order global, role, user:
//!
//! 1. The global document is mandatory; without it the load fails with
//!    [`ProfileError::NotFound`].
//! 2. Role and user documents are optional. A missing one simply contributes
//!    no delta; any other storage failure aborts the load.
//! 3. Role then user deltas are applied on a copy of the global baseline, and
//!    every sub-object no delta touched is relinked to the baseline's `Arc`.
//!
//! Raw documents are cached under their storage keys. The merged view is
//! cached under the caller's key moved to the global tier, with an aggregate
//! of the per-tier tokens as its validity.

use std::sync::Arc;

use portal_core_db::{Profile, ProfileKey, ProfileStorage, StorageError, Tier, Validity};
use portal_core_utils::ReadWriteLock;

use super::{
    cache::{CacheDecision, ProfileCache},
    error::ProfileError,
};

struct TierLoad {
    profile: Arc<Profile>,
    validity: Option<Validity>,
}

pub struct TieredProfileLoader {
    storage: Arc<dyn ProfileStorage>,
    cache: ProfileCache,
    lock: ReadWriteLock,
}

impl TieredProfileLoader {
    pub fn new(storage: Arc<dyn ProfileStorage>) -> Self {
        Self {
            cache: ProfileCache::new(Arc::clone(&storage)),
            storage,
            lock: ReadWriteLock::new(),
        }
    }

    pub fn cache(&self) -> &ProfileCache {
        &self.cache
    }

    pub fn lock(&self) -> &ReadWriteLock {
        &self.lock
    }

    /// Resolve the merged profile for `key`.
    ///
    /// Unless `forced`, a still-valid merged view is served under the read
    /// lock. Otherwise the write lock is taken, validity is checked once more
    /// (another thread may have reloaded meanwhile) and the tiers are walked.
    /// Storage I/O happens while the write lock is held.
    pub fn load(&self, key: &ProfileKey, forced: bool) -> Result<Arc<Profile>, ProfileError> {
        let merged_key = key.for_tier(Tier::Global);

        if !forced {
            let _read = self.lock.acquire_read()?;
            if let Some(profile) = self.cached_merge(&merged_key)? {
                tracing::debug!("Serving cached profile {}", merged_key);
                return Ok(profile);
            }
        }

        let _write = self.lock.acquire_write()?;
        if !forced && let Some(profile) = self.cached_merge(&merged_key)? {
            tracing::debug!("Profile {} was reloaded by another thread", merged_key);
            return Ok(profile);
        }

        self.load_tiers(&merged_key, forced)
    }

    /// The cached merged view, if every tier it was built from is unchanged.
    fn cached_merge(&self, merged_key: &ProfileKey) -> Result<Option<Arc<Profile>>, ProfileError> {
        if self.cache.get(merged_key).is_none() {
            return Ok(None);
        }
        let Some(fresh) = self.current_validity(merged_key)? else {
            return Ok(None);
        };
        match self.cache.check_against(merged_key, &fresh) {
            CacheDecision::Reuse(cached) => Ok(Some(cached.profile)),
            CacheDecision::Reload(_) => Ok(None),
        }
    }

    /// Aggregate of the current per-tier tokens, or `None` when the merged
    /// view cannot be validated without a full load.
    fn current_validity(&self, merged_key: &ProfileKey) -> Result<Option<Validity>, ProfileError> {
        let mut tokens = Vec::with_capacity(3);
        for tier in merged_key.addressed_tiers() {
            let tier_key = merged_key.for_tier(tier).storage_key();
            match self.storage.get_validity(&tier_key) {
                Ok(Some(token)) => tokens.push(token),
                Ok(None) => return Ok(None),
                Err(e) if e.is_not_found() && tier != Tier::Global => tokens.push(Validity::Absent),
                // Let the write path report the missing baseline.
                Err(e) if e.is_not_found() => return Ok(None),
                Err(e) => return Err(ProfileError::load_failed(&tier_key, e)),
            }
        }
        Ok(Some(Validity::combine(tokens)))
    }

    fn load_tiers(&self, merged_key: &ProfileKey, forced: bool) -> Result<Arc<Profile>, ProfileError> {
        let global_key = merged_key.for_tier(Tier::Global).storage_key();
        let global = self.load_tier(&global_key, forced).map_err(|e| {
            if e.is_not_found() {
                ProfileError::NotFound {
                    key: global_key.to_string(),
                }
            } else {
                ProfileError::load_failed(&global_key, e)
            }
        })?;

        let mut tokens = vec![global.validity.clone()];
        let mut deltas = Vec::with_capacity(2);
        for tier in merged_key.addressed_tiers().into_iter().skip(1) {
            let tier_key = merged_key.for_tier(tier).storage_key();
            match self.load_tier(&tier_key, forced) {
                Ok(load) => {
                    tokens.push(load.validity);
                    deltas.push(load.profile);
                }
                Err(e) if e.is_not_found() => {
                    tracing::debug!("No {} profile for {}", tier, tier_key);
                    tokens.push(Some(Validity::Absent));
                }
                Err(e) => return Err(ProfileError::load_failed(&tier_key, e)),
            }
        }

        let mut merged = Profile::clone(&global.profile);
        let mut applied = false;
        for delta in &deltas {
            applied |= merged.apply_delta(delta)?;
        }
        let merged = if applied {
            merged.adjust_references(&global.profile);
            Arc::new(merged)
        } else {
            Arc::clone(&global.profile)
        };

        match tokens.into_iter().collect::<Option<Vec<_>>>() {
            Some(tokens) => {
                self.cache
                    .put(merged_key.clone(), Arc::clone(&merged), Validity::combine(tokens));
            }
            None => tracing::debug!("Profile {} is not cacheable", merged_key),
        }

        tracing::info!(
            "Loaded profile {} ({} delta(s) applied)",
            merged_key,
            if applied { deltas.len() } else { 0 }
        );
        Ok(merged)
    }

    fn load_tier(&self, tier_key: &ProfileKey, forced: bool) -> Result<TierLoad, StorageError> {
        match self.cache.check_validity(tier_key, forced)? {
            CacheDecision::Reuse(cached) => Ok(TierLoad {
                profile: cached.profile,
                validity: Some(cached.validity),
            }),
            CacheDecision::Reload(validity) => {
                let profile = Arc::new(self.storage.load_profile(tier_key)?);
                match &validity {
                    Some(token) => {
                        self.cache
                            .put(tier_key.clone(), Arc::clone(&profile), token.clone())
                    }
                    None => tracing::debug!("Document {} has no validity; not cached", tier_key),
                }
                Ok(TierLoad { profile, validity })
            }
        }
    }
}
