use std::{
    collections::{HashMap, hash_map::Entry},
    sync::Arc,
};

use parking_lot::RwLock;
use portal_core_db::{
    Profile, ProfileKey, ProfileStorage, ProfileType, Tier,
    models::{
        coplet::{CopletBaseData, CopletData, CopletInstanceData, CopletInstanceDataManager, EntryMap},
        layout::Layout,
    },
};

use super::{
    adapters::{CopletAdapter, CopletAdapterRegistry},
    error::ProfileError,
    loader::TieredProfileLoader,
    session::{SessionStore, get_typed_attribute},
};
use crate::services::config::ProfileManagerConfig;

/// Session attribute holding the [`PortalUser`] bound to the session.
pub const USER_ATTRIBUTE: &str = "portal-core.user";
const PROFILES_ATTRIBUTE: &str = "portal-core.profiles";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalUser {
    pub user_id: String,
    pub role: Option<String>,
}

impl PortalUser {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: None,
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }
}

/// Merged profile of one user for one layout key, as seen by a session.
#[derive(Debug, Clone)]
pub struct UserProfile {
    pub coplet_base_data: EntryMap<CopletBaseData>,
    pub coplet_data: EntryMap<CopletData>,
    pub coplet_instances: EntryMap<CopletInstanceData>,
    pub layout: Arc<Layout>,
    /// Every layout node reachable by id, including registered ones.
    pub layouts: HashMap<String, Arc<Layout>>,
}

#[derive(Default)]
struct SessionProfiles(RwLock<HashMap<String, UserProfile>>);

#[derive(Clone, Copy)]
enum Hook {
    Login,
    Logout,
}

pub struct ProfileManager {
    config: ProfileManagerConfig,
    storage: Arc<dyn ProfileStorage>,
    loader: TieredProfileLoader,
    adapters: CopletAdapterRegistry,
}

impl ProfileManager {
    pub fn new(
        config: ProfileManagerConfig,
        storage: Arc<dyn ProfileStorage>,
        adapters: CopletAdapterRegistry,
    ) -> Self {
        Self {
            config,
            loader: TieredProfileLoader::new(Arc::clone(&storage)),
            storage,
            adapters,
        }
    }

    pub fn config(&self) -> &ProfileManagerConfig {
        &self.config
    }

    pub fn loader(&self) -> &TieredProfileLoader {
        &self.loader
    }

    /// Bind `user` to the session and load its profile for the default
    /// layout key, bypassing cached merges. Profiles from an earlier login on
    /// the same session get their logout hooks first.
    pub fn login(&self, session: &dyn SessionStore, user: PortalUser) -> Result<(), ProfileError> {
        let layout_key = self.config.default_layout_key.as_str();
        let profile = self.load_user_profile(&user, layout_key, true)?;

        if let Some(previous) = self.drop_session_profiles(session) {
            tracing::debug!(
                "Replacing {} loaded profile(s) of session with user {}",
                previous,
                user.user_id
            );
        }
        tracing::info!(
            "User {} logged in with {} coplet instance(s)",
            user.user_id,
            profile.coplet_instances.len()
        );
        session.set_attribute(USER_ATTRIBUTE, Arc::new(user));
        let profiles = Arc::new(SessionProfiles::default());
        session.set_attribute(PROFILES_ATTRIBUTE, profiles.clone());
        self.install(&profiles, layout_key, profile);
        Ok(())
    }

    /// Run the logout hooks and drop everything the session holds. Cached
    /// profiles stay.
    pub fn logout(&self, session: &dyn SessionStore) {
        let user = get_typed_attribute::<PortalUser>(session, USER_ATTRIBUTE);
        self.drop_session_profiles(session);
        session.remove_attribute(USER_ATTRIBUTE);

        if let Some(user) = user {
            tracing::info!("User {} logged out", user.user_id);
        }
    }

    pub fn current_user(&self, session: &dyn SessionStore) -> Result<Arc<PortalUser>, ProfileError> {
        get_typed_attribute::<PortalUser>(session, USER_ATTRIBUTE).ok_or(ProfileError::NotLoggedIn)
    }

    pub fn get_coplet_instance_data(
        &self,
        session: &dyn SessionStore,
        id: &str,
    ) -> Result<Option<Arc<CopletInstanceData>>, ProfileError> {
        self.with_profile(session, None, |profile| profile.coplet_instances.get(id).cloned())
    }

    pub fn get_coplet_data(
        &self,
        session: &dyn SessionStore,
        id: &str,
    ) -> Result<Option<Arc<CopletData>>, ProfileError> {
        self.with_profile(session, None, |profile| profile.coplet_data.get(id).cloned())
    }

    pub fn get_coplet_base_data(
        &self,
        session: &dyn SessionStore,
        id: &str,
    ) -> Result<Option<Arc<CopletBaseData>>, ProfileError> {
        self.with_profile(session, None, |profile| profile.coplet_base_data.get(id).cloned())
    }

    pub fn get_coplet_instances(
        &self,
        session: &dyn SessionStore,
    ) -> Result<Vec<Arc<CopletInstanceData>>, ProfileError> {
        self.with_profile(session, None, |profile| {
            profile.coplet_instances.values().cloned().collect()
        })
    }

    /// Instances of the given coplet, ordered by instance id.
    pub fn get_coplet_instances_for(
        &self,
        session: &dyn SessionStore,
        coplet_data_id: &str,
    ) -> Result<Vec<Arc<CopletInstanceData>>, ProfileError> {
        self.with_profile(session, None, |profile| {
            profile
                .coplet_instances
                .values()
                .filter(|instance| instance.coplet_data_id.as_deref() == Some(coplet_data_id))
                .cloned()
                .collect()
        })
    }

    /// The layout root for `layout_key` (the configured default when `None`),
    /// or the node with `layout_id`.
    pub fn get_portal_layout(
        &self,
        session: &dyn SessionStore,
        layout_key: Option<&str>,
        layout_id: Option<&str>,
    ) -> Result<Option<Arc<Layout>>, ProfileError> {
        self.with_profile(session, layout_key, |profile| match layout_id {
            None => Some(Arc::clone(&profile.layout)),
            Some(id) => profile.layouts.get(id).cloned(),
        })
    }

    pub fn register_coplet_instance(
        &self,
        session: &dyn SessionStore,
        instance: CopletInstanceData,
    ) -> Result<(), ProfileError> {
        self.with_profile_mut(session, None, |profile| {
            profile
                .coplet_instances
                .insert(instance.id.clone(), Arc::new(instance));
        })
    }

    pub fn unregister_coplet_instance(
        &self,
        session: &dyn SessionStore,
        id: &str,
    ) -> Result<Option<Arc<CopletInstanceData>>, ProfileError> {
        self.with_profile_mut(session, None, |profile| profile.coplet_instances.remove(id))
    }

    /// Make `layout` and its descendants addressable by id in the session.
    pub fn register_layout(
        &self,
        session: &dyn SessionStore,
        layout_key: Option<&str>,
        layout: Arc<Layout>,
    ) -> Result<(), ProfileError> {
        self.with_profile_mut(session, layout_key, |profile| {
            profile.layouts.extend(layout.index());
        })
    }

    pub fn unregister_layout(
        &self,
        session: &dyn SessionStore,
        layout_key: Option<&str>,
        layout_id: &str,
    ) -> Result<Option<Arc<Layout>>, ProfileError> {
        self.with_profile_mut(session, layout_key, |profile| profile.layouts.remove(layout_id))
    }

    /// Persist the session's coplet instances and layouts as the user's own
    /// tier documents, for every layout key the session has loaded.
    ///
    /// Only what differs from the global and role tiers is written: added or
    /// changed instances, removal markers for instances the session dropped,
    /// and the layout tree if it no longer matches the shared one.
    pub fn save_user_profile(&self, session: &dyn SessionStore) -> Result<(), ProfileError> {
        let user = self.current_user(session)?;
        let Some(profiles) = get_typed_attribute::<SessionProfiles>(session, PROFILES_ATTRIBUTE)
        else {
            return Ok(());
        };
        let snapshot: Vec<(String, UserProfile)> = profiles
            .0
            .read()
            .iter()
            .map(|(layout_key, profile)| (layout_key.clone(), profile.clone()))
            .collect();

        let _write = self.loader.lock().acquire_write()?;
        for (layout_key, profile) in snapshot {
            let shared = ProfileKey::new(
                self.config.portal_name.as_str(),
                layout_key,
                ProfileType::CopletInstanceData,
            )
            .with_role(user.role.as_deref());
            let key = shared
                .clone()
                .with_user(Some(user.user_id.as_str()))
                .for_tier(Tier::User);

            let baseline = self.loader.load(&shared, false)?;
            let instances = Profile::CopletInstanceData(CopletInstanceDataManager {
                coplet_instance_data: instance_delta(
                    baseline.as_coplet_instance_data()?.entries(),
                    &profile.coplet_instances,
                ),
            });
            self.storage
                .save_profile(&key, &instances)
                .map_err(|e| ProfileError::save_failed(&key, e))?;

            let baseline = self
                .loader
                .load(&shared.with_profile_type(ProfileType::Layout), false)?;
            if !profile.layout.same_content(baseline.as_layout()?) {
                let key = key.with_profile_type(ProfileType::Layout);
                self.storage
                    .save_profile(&key, &Profile::Layout(profile.layout))
                    .map_err(|e| ProfileError::save_failed(&key, e))?;
            }
            tracing::info!("Saved user profile {}", key);
        }
        Ok(())
    }

    /// Empty the session's profile view, running logout hooks for what it
    /// held. Returns how many profiles were loaded, if the session had a view.
    fn drop_session_profiles(&self, session: &dyn SessionStore) -> Option<usize> {
        let profiles = get_typed_attribute::<SessionProfiles>(session, PROFILES_ATTRIBUTE)?;
        let loaded = std::mem::take(&mut *profiles.0.write());
        for profile in loaded.values() {
            self.notify(profile, Hook::Logout);
        }
        session.remove_attribute(PROFILES_ATTRIBUTE);
        Some(loaded.len())
    }

    fn layout_key<'a>(&'a self, layout_key: Option<&'a str>) -> &'a str {
        layout_key.unwrap_or(&self.config.default_layout_key)
    }

    fn with_profile<R>(
        &self,
        session: &dyn SessionStore,
        layout_key: Option<&str>,
        read: impl FnOnce(&UserProfile) -> R,
    ) -> Result<R, ProfileError> {
        let layout_key = self.layout_key(layout_key);
        let profiles = self.ensure_loaded(session, layout_key)?;
        let loaded = profiles.0.read();
        // Absent only when a concurrent logout emptied the session.
        loaded.get(layout_key).map(read).ok_or(ProfileError::NotLoggedIn)
    }

    fn with_profile_mut<R>(
        &self,
        session: &dyn SessionStore,
        layout_key: Option<&str>,
        update: impl FnOnce(&mut UserProfile) -> R,
    ) -> Result<R, ProfileError> {
        let layout_key = self.layout_key(layout_key);
        let profiles = self.ensure_loaded(session, layout_key)?;
        let mut loaded = profiles.0.write();
        loaded
            .get_mut(layout_key)
            .map(update)
            .ok_or(ProfileError::NotLoggedIn)
    }

    fn ensure_loaded(
        &self,
        session: &dyn SessionStore,
        layout_key: &str,
    ) -> Result<Arc<SessionProfiles>, ProfileError> {
        let user = self.current_user(session)?;
        let profiles = match get_typed_attribute::<SessionProfiles>(session, PROFILES_ATTRIBUTE) {
            Some(profiles) => profiles,
            None => {
                let profiles = Arc::new(SessionProfiles::default());
                session.set_attribute(PROFILES_ATTRIBUTE, profiles.clone());
                profiles
            }
        };
        if profiles.0.read().contains_key(layout_key) {
            return Ok(profiles);
        }

        tracing::debug!("Loading {} profile for user {}", layout_key, user.user_id);
        let profile = self.load_user_profile(&user, layout_key, false)?;
        self.install(&profiles, layout_key, profile);
        Ok(profiles)
    }

    /// Add a freshly loaded profile to the session unless another request
    /// got there first, then run the login hooks outside the session lock.
    fn install(&self, profiles: &SessionProfiles, layout_key: &str, profile: UserProfile) {
        let inserted = match profiles.0.write().entry(layout_key.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(profile.clone());
                true
            }
            Entry::Occupied(_) => false,
        };
        if inserted {
            self.notify(&profile, Hook::Login);
        }
    }

    fn load_user_profile(
        &self,
        user: &PortalUser,
        layout_key: &str,
        forced: bool,
    ) -> Result<UserProfile, ProfileError> {
        let key = ProfileKey::new(
            self.config.portal_name.as_str(),
            layout_key,
            ProfileType::CopletBaseData,
        )
        .with_role(user.role.as_deref())
        .with_user(Some(user.user_id.as_str()));

        let base_data = self.loader.load(&key, forced)?;
        let coplet_data = self
            .loader
            .load(&key.with_profile_type(ProfileType::CopletData), forced)?;
        let instances = self
            .loader
            .load(&key.with_profile_type(ProfileType::CopletInstanceData), forced)?;
        let layout = self
            .loader
            .load(&key.with_profile_type(ProfileType::Layout), forced)?;
        let layout = Arc::clone(layout.as_layout()?);

        Ok(UserProfile {
            coplet_base_data: base_data.as_coplet_base_data()?.entries().clone(),
            coplet_data: coplet_data.as_coplet_data()?.entries().clone(),
            coplet_instances: instances.as_coplet_instance_data()?.entries().clone(),
            layouts: layout.index(),
            layout,
        })
    }

    /// Adapter of an instance, found through its coplet data and base data.
    fn adapter_for(
        &self,
        profile: &UserProfile,
        instance: &CopletInstanceData,
    ) -> Option<&Arc<dyn CopletAdapter>> {
        let data = profile.coplet_data.get(instance.coplet_data_id.as_deref()?)?;
        let base = profile
            .coplet_base_data
            .get(data.coplet_base_data_id.as_deref()?)?;
        self.adapters.get(base.coplet_adapter_name.as_deref()?)
    }

    fn notify(&self, profile: &UserProfile, hook: Hook) {
        for instance in profile.coplet_instances.values() {
            let Some(adapter) = self.adapter_for(profile, instance) else {
                tracing::debug!("No coplet adapter for instance {}", instance.id);
                continue;
            };
            match hook {
                Hook::Login => adapter.login(instance),
                Hook::Logout => adapter.logout(instance),
            }
        }
    }
}

/// User tier entries turning `shared` into `session`.
fn instance_delta(
    shared: &EntryMap<CopletInstanceData>,
    session: &EntryMap<CopletInstanceData>,
) -> EntryMap<CopletInstanceData> {
    let mut delta: EntryMap<CopletInstanceData> = session
        .iter()
        .filter(|(id, instance)| match shared.get(*id) {
            Some(base) => !Arc::ptr_eq(base, instance) && !base.same_content(instance),
            None => true,
        })
        .map(|(id, instance)| (id.clone(), Arc::clone(instance)))
        .collect();
    for id in shared.keys().filter(|id| !session.contains_key(*id)) {
        delta.insert(id.clone(), Arc::new(CopletInstanceData::removal(id.clone())));
    }
    delta
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use portal_core_db::{
        InMemoryProfileStorage,
        models::coplet::{CopletBaseDataManager, CopletDataManager},
    };
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::services::profile_manager::session::InMemorySession;

    #[derive(Default)]
    struct RecordingAdapter {
        events: Mutex<Vec<String>>,
    }

    impl RecordingAdapter {
        fn events(&self) -> Vec<String> {
            self.events.lock().clone()
        }
    }

    impl CopletAdapter for RecordingAdapter {
        fn login(&self, instance: &CopletInstanceData) {
            self.events.lock().push(format!("login:{}", instance.id));
        }

        fn logout(&self, instance: &CopletInstanceData) {
            self.events.lock().push(format!("logout:{}", instance.id));
        }
    }

    fn seed(storage: &InMemoryProfileStorage, layout_key: &str) {
        let key = |profile_type: ProfileType, tier: Tier| {
            ProfileKey::new("intranet", layout_key, profile_type)
                .with_role(Some("editor"))
                .with_user(Some("alice"))
                .for_tier(tier)
                .storage_key()
        };
        storage
            .insert(
                &key(ProfileType::CopletBaseData, Tier::Global),
                Profile::CopletBaseData(CopletBaseDataManager::from_entries([
                    CopletBaseData::new("html", "html-adapter"),
                ])),
            )
            .unwrap();
        storage
            .insert(
                &key(ProfileType::CopletData, Tier::Global),
                Profile::CopletData(CopletDataManager::from_entries([
                    CopletData::new("news", "html").with_title("News"),
                    CopletData::new("weather", "html").with_title("Weather"),
                ])),
            )
            .unwrap();
        storage
            .insert(
                &key(ProfileType::CopletInstanceData, Tier::Global),
                Profile::CopletInstanceData(CopletInstanceDataManager::from_entries([
                    CopletInstanceData::new("news-1", "news"),
                    CopletInstanceData::new("weather-1", "weather"),
                ])),
            )
            .unwrap();
        storage
            .insert(
                &key(ProfileType::CopletInstanceData, Tier::User),
                Profile::CopletInstanceData(CopletInstanceDataManager::from_entries([
                    CopletInstanceData::new("news-2", "news"),
                ])),
            )
            .unwrap();
        storage
            .insert(
                &key(ProfileType::Layout, Tier::Global),
                Profile::Layout(Arc::new(Layout::composite(
                    format!("{layout_key}-root"),
                    [
                        Layout::coplet("news-frame", "news-1"),
                        Layout::coplet("weather-frame", "weather-1"),
                    ],
                ))),
            )
            .unwrap();
    }

    fn setup() -> (Arc<InMemoryProfileStorage>, Arc<RecordingAdapter>, ProfileManager) {
        let storage = Arc::new(InMemoryProfileStorage::new());
        seed(&storage, "portal");
        let adapter = Arc::new(RecordingAdapter::default());
        let manager = ProfileManager::new(
            ProfileManagerConfig::new("intranet", "/srv/profiles"),
            storage.clone(),
            CopletAdapterRegistry::new().with_adapter("html-adapter", adapter.clone()),
        );
        (storage, adapter, manager)
    }

    fn alice() -> PortalUser {
        PortalUser::new("alice").with_role("editor")
    }

    #[test]
    fn login_builds_the_session_view_and_runs_login_hooks() {
        let (_, adapter, manager) = setup();
        let session = InMemorySession::new();

        manager.login(&session, alice()).unwrap();

        for id in ["news-1", "news-2", "weather-1"] {
            assert!(manager.get_coplet_instance_data(&session, id).unwrap().is_some());
        }
        assert_eq!(
            manager.get_coplet_data(&session, "news").unwrap().unwrap().title.as_deref(),
            Some("News")
        );
        assert!(manager.get_coplet_base_data(&session, "html").unwrap().is_some());
        assert_eq!(
            adapter.events(),
            vec!["login:news-1", "login:news-2", "login:weather-1"]
        );
    }

    #[test]
    fn queries_without_user_are_rejected() {
        let (_, _, manager) = setup();
        let session = InMemorySession::new();

        let err = manager.get_coplet_data(&session, "news").unwrap_err();

        assert!(matches!(err, ProfileError::NotLoggedIn));
        assert!(session.attribute_names().is_empty());
    }

    #[test]
    fn bound_user_without_login_loads_lazily() {
        let (_, _, manager) = setup();
        let session = InMemorySession::new();
        session.set_attribute(USER_ATTRIBUTE, Arc::new(alice()));

        let news = manager.get_coplet_data(&session, "news").unwrap();

        assert!(news.is_some());
        assert_eq!(manager.current_user(&session).unwrap().user_id, "alice");
    }

    #[test]
    fn logout_runs_hooks_and_clears_the_session_but_not_the_cache() {
        let (_, adapter, manager) = setup();
        let session = InMemorySession::new();
        manager.login(&session, alice()).unwrap();

        manager.logout(&session);

        assert_eq!(
            adapter.events()[3..].to_vec(),
            vec!["logout:news-1", "logout:news-2", "logout:weather-1"]
        );
        assert!(session.attribute_names().is_empty());
        assert!(!manager.loader().cache().is_empty());
        assert!(matches!(
            manager.get_coplet_instance_data(&session, "news-1"),
            Err(ProfileError::NotLoggedIn)
        ));
    }

    #[test]
    fn layout_lookup_by_root_id_and_other_layout_key() {
        let (storage, _, manager) = setup();
        seed(&storage, "mobile");
        let session = InMemorySession::new();
        manager.login(&session, alice()).unwrap();

        let root = manager.get_portal_layout(&session, None, None).unwrap().unwrap();
        assert_eq!(root.id, "portal-root");
        let frame = manager
            .get_portal_layout(&session, None, Some("weather-frame"))
            .unwrap()
            .unwrap();
        assert_eq!(frame.coplet_instance_id(), Some("weather-1"));
        assert!(manager
            .get_portal_layout(&session, None, Some("missing"))
            .unwrap()
            .is_none());

        let mobile = manager
            .get_portal_layout(&session, Some("mobile"), None)
            .unwrap()
            .unwrap();
        assert_eq!(mobile.id, "mobile-root");
    }

    #[test]
    fn registrations_only_touch_the_session_view() {
        let (_, _, manager) = setup();
        let first = InMemorySession::new();
        let second = InMemorySession::new();
        manager.login(&first, alice()).unwrap();
        manager.login(&second, alice()).unwrap();

        manager
            .register_coplet_instance(&first, CopletInstanceData::new("news-3", "news"))
            .unwrap();
        manager
            .register_layout(&first, None, Arc::new(Layout::coplet("extra-frame", "news-3")))
            .unwrap();
        let removed = manager.unregister_coplet_instance(&first, "weather-1").unwrap();

        assert!(removed.is_some());
        assert_eq!(manager.get_coplet_instances_for(&first, "news").unwrap().len(), 3);
        assert_eq!(manager.get_coplet_instances_for(&second, "news").unwrap().len(), 2);
        assert!(manager.get_coplet_instance_data(&second, "weather-1").unwrap().is_some());
        assert!(manager
            .get_portal_layout(&first, None, Some("extra-frame"))
            .unwrap()
            .is_some());
        assert!(manager
            .unregister_layout(&first, None, "extra-frame")
            .unwrap()
            .is_some());
        assert!(manager
            .get_portal_layout(&first, None, Some("extra-frame"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn saved_user_profile_is_seen_by_the_next_login() {
        let (_, _, manager) = setup();
        let session = InMemorySession::new();
        manager.login(&session, alice()).unwrap();
        manager
            .register_coplet_instance(&session, CopletInstanceData::new("news-3", "news"))
            .unwrap();

        manager.save_user_profile(&session).unwrap();
        manager.logout(&session);
        manager.login(&session, alice()).unwrap();

        let instances: Vec<String> = manager
            .get_coplet_instances_for(&session, "news")
            .unwrap()
            .iter()
            .map(|instance| instance.id.clone())
            .collect();
        assert_eq!(instances, vec!["news-1", "news-2", "news-3"]);
    }

    #[test]
    fn login_again_logs_out_the_previous_view() {
        let (_, adapter, manager) = setup();
        let session = InMemorySession::new();

        manager.login(&session, alice()).unwrap();
        manager.login(&session, alice()).unwrap();
        manager.logout(&session);

        let events = adapter.events();
        let logins = events.iter().filter(|e| e.starts_with("login:")).count();
        let logouts = events.iter().filter(|e| e.starts_with("logout:")).count();
        assert_eq!((logins, logouts), (6, 6));
        assert_eq!(
            events[3..6].to_vec(),
            vec!["logout:news-1", "logout:news-2", "logout:weather-1"]
        );
    }

    #[test]
    fn saved_user_profile_only_holds_what_differs_from_shared_tiers() {
        let (storage, _, manager) = setup();
        let session = InMemorySession::new();
        manager.login(&session, alice()).unwrap();
        manager.unregister_coplet_instance(&session, "weather-1").unwrap();

        manager.save_user_profile(&session).unwrap();

        let user_key = |profile_type| {
            ProfileKey::new("intranet", "portal", profile_type)
                .with_user(Some("alice"))
                .for_tier(Tier::User)
                .storage_key()
        };
        let saved = storage
            .load_profile(&user_key(ProfileType::CopletInstanceData))
            .unwrap();
        let saved = saved.as_coplet_instance_data().unwrap();
        assert_eq!(
            saved.entries().keys().collect::<Vec<_>>(),
            vec!["news-2", "weather-1"]
        );
        assert!(saved.get("weather-1").unwrap().removed);
        assert!(
            storage
                .load_profile(&user_key(ProfileType::Layout))
                .unwrap_err()
                .is_not_found()
        );

        // A later shared change still reaches instances the user kept as is.
        let global = ProfileKey::new("intranet", "portal", ProfileType::CopletInstanceData)
            .for_tier(Tier::Global)
            .storage_key();
        storage
            .insert(
                &global,
                Profile::CopletInstanceData(CopletInstanceDataManager::from_entries([
                    CopletInstanceData::new("news-1", "news")
                        .with_attribute("rows", serde_json::json!(5)),
                    CopletInstanceData::new("weather-1", "weather"),
                ])),
            )
            .unwrap();
        manager.logout(&session);
        manager.login(&session, alice()).unwrap();

        assert!(manager.get_coplet_instance_data(&session, "weather-1").unwrap().is_none());
        let news = manager.get_coplet_instance_data(&session, "news-1").unwrap().unwrap();
        assert_eq!(news.attributes.get("rows"), Some(&serde_json::json!(5)));
    }

    #[test]
    fn saving_without_user_fails() {
        let (_, _, manager) = setup();
        let session = InMemorySession::new();

        assert!(matches!(
            manager.save_user_profile(&session),
            Err(ProfileError::NotLoggedIn)
        ));
    }
}
