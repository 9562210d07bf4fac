//! Profile Orchestrator
//!
//! Owns the *active* profile id (the one the tunnel should be connected
//! with) and the *current* profile (the one loaded in the foreground).
//! Provider profiles are made ready, i.e. their provider infrastructure
//! is fetched, before they are exposed as current.
//!
//! Changes are queued as [`ProfileEvent`]s and drained in FIFO order by
//! the owner, which forwards them to the connection orchestrator.

use crate::builder::ConfigError;
use crate::error::{Error, Result};
use crate::preferences::Preferences;
use crate::profile::{Profile, unique_name};
use crate::provider::{CatalogError, ProviderCatalog};
use crate::store::{ProfileMap, ProfileStore};
use crate::vault::{SecretKey, SecretRef, SecretVault};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Change published by the profile orchestrator
#[derive(Debug, Clone, PartialEq)]
pub enum ProfileEvent {
    ActiveChanged(Option<Uuid>),
    CurrentChanged(Profile),
}

/// Outcome of a current profile switch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrentUpdate {
    /// The profile is now current
    Published,
    /// Provider data is being fetched, see [`ProfileOrchestrator::finish_loading`]
    Loading,
    /// Another switch is still loading
    Rejected,
    /// The profile already is current
    Unchanged,
}

/// Profile waiting for its provider data
struct PendingLoad {
    profile: Profile,
    fetch: JoinHandle<std::result::Result<(), CatalogError>>,
}

/// Owner of the active and current profiles
pub struct ProfileOrchestrator {
    store: Arc<dyn ProfileStore>,
    catalog: Arc<dyn ProviderCatalog>,
    vault: Arc<dyn SecretVault>,
    /// Persisted active profile id and log preferences
    preferences: Preferences,
    /// Store change feed
    feed: mpsc::UnboundedReceiver<ProfileMap>,
    active_profile_id: Option<Uuid>,
    /// In-memory current profile, possibly with unsaved edits
    current: Profile,
    /// Current profile switch waiting for a fetch
    pending: Option<PendingLoad>,
    /// Events not yet dispatched, oldest first
    events: VecDeque<ProfileEvent>,
}

impl ProfileOrchestrator {
    pub fn new(
        store: Arc<dyn ProfileStore>,
        catalog: Arc<dyn ProviderCatalog>,
        vault: Arc<dyn SecretVault>,
        mut preferences: Preferences,
    ) -> Self {
        let feed = store.subscribe();

        let mut active_profile_id = preferences.active_profile_id();
        if let Some(id) = active_profile_id {
            if !store.contains(id) {
                warn!("Active profile {} no longer exists", id);
                active_profile_id = None;
                if let Err(e) = preferences.set_active_profile_id(None) {
                    warn!("Unable to persist active profile: {}", e);
                }
            }
        }

        Self {
            store,
            catalog,
            vault,
            preferences,
            feed,
            active_profile_id,
            current: Profile::placeholder(),
            pending: None,
            events: VecDeque::new(),
        }
    }

    pub fn active_profile_id(&self) -> Option<Uuid> {
        self.active_profile_id
    }

    pub fn has_active_profile(&self) -> bool {
        self.active_profile_id.is_some()
    }

    pub fn is_active(&self, id: Uuid) -> bool {
        self.active_profile_id == Some(id)
    }

    pub fn active_profile(&self) -> Option<Profile> {
        self.live_profile(self.active_profile_id?).ok()
    }

    /// Current profile, the placeholder when none
    pub fn current_profile(&self) -> &Profile {
        &self.current
    }

    pub fn is_current(&self, id: Uuid) -> bool {
        !self.current.is_placeholder && self.current.id == id
    }

    pub fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    pub fn preferences_mut(&mut self) -> &mut Preferences {
        &mut self.preferences
    }

    pub fn profiles(&self) -> ProfileMap {
        self.store.all()
    }

    /// Next queued event
    pub fn next_event(&mut self) -> Option<ProfileEvent> {
        self.events.pop_front()
    }

    /// Set or clear the active profile
    ///
    /// Clearing is a no-op unless `id` is the active profile.
    pub fn activate(&mut self, id: Uuid, is_active: bool) -> Result<()> {
        if !is_active {
            if self.is_active(id) {
                self.set_active(None);
            }
            return Ok(());
        }

        match self.store.profile(id) {
            Some(profile) if !profile.is_placeholder => {
                self.set_active(Some(id));
                Ok(())
            }
            _ => Err(Error::ProfileNotFound(id)),
        }
    }

    fn set_active(&mut self, id: Option<Uuid>) {
        if self.active_profile_id == id {
            return;
        }
        info!("Active profile: {:?}", id);
        self.active_profile_id = id;
        if let Err(e) = self.preferences.set_active_profile_id(id) {
            warn!("Unable to persist active profile: {}", e);
        }
        self.events.push_back(ProfileEvent::ActiveChanged(id));
    }

    /// Profile by id, preferring the in-memory current copy
    pub fn live_profile(&self, id: Uuid) -> Result<Profile> {
        self.live_profile_ex(id).map(|(profile, _)| profile)
    }

    /// Profile by id along with its readiness
    pub fn live_profile_ex(&self, id: Uuid) -> Result<(Profile, bool)> {
        let profile = if self.is_current(id) {
            self.current.clone()
        } else {
            self.store.profile(id).ok_or(Error::ProfileNotFound(id))?
        };
        let is_ready = self.is_ready(&profile);
        Ok((profile, is_ready))
    }

    /// Host profiles are always ready, provider ones once fetched
    pub fn is_ready(&self, profile: &Profile) -> bool {
        match profile.provider_name() {
            Some(name) => self.catalog.is_available(name, profile.protocol()),
            None => true,
        }
    }

    /// Fetch provider data of `profile` unless present
    pub async fn make_ready(&self, profile: &Profile) -> Result<()> {
        let Some(name) = profile.provider_name() else {
            return Ok(());
        };
        if self.catalog.is_available(name, profile.protocol()) {
            return Ok(());
        }

        info!("Fetching {} data for {}", name, profile.log_description());
        self.catalog
            .fetch(name, profile.protocol())
            .await
            .map_err(|source| {
                warn!("Unable to fetch {} data: {}", name, source);
                Error::ProviderFetchFailed {
                    profile_id: profile.id,
                    source,
                }
            })
    }

    /// Make `id` the current profile
    ///
    /// Profiles that are not ready are published once their provider data
    /// has been fetched. Switches requested meanwhile are rejected.
    pub fn set_current(&mut self, id: Uuid) -> Result<CurrentUpdate> {
        if self.is_loading() {
            warn!("Already loading a profile, ignoring switch to {}", id);
            return Ok(CurrentUpdate::Rejected);
        }
        if self.is_current(id) {
            return Ok(CurrentUpdate::Unchanged);
        }

        let profile = self.store.profile(id).ok_or(Error::ProfileNotFound(id))?;
        self.save_former_current();

        let Some(provider_name) = profile.provider_name().map(str::to_string) else {
            self.publish_current(profile);
            return Ok(CurrentUpdate::Published);
        };
        if self.catalog.is_available(&provider_name, profile.protocol()) {
            self.publish_current(profile);
            return Ok(CurrentUpdate::Published);
        }

        info!("Loading {} before making it current", profile.log_description());
        let catalog = self.catalog.clone();
        let protocol = profile.protocol();
        let fetch = tokio::spawn(async move { catalog.fetch(&provider_name, protocol).await });
        self.pending = Some(PendingLoad { profile, fetch });
        Ok(CurrentUpdate::Loading)
    }

    /// Wait for the pending switch, if any
    pub async fn finish_loading(&mut self) -> Result<CurrentUpdate> {
        let Some(pending) = self.pending.take() else {
            return Ok(CurrentUpdate::Unchanged);
        };
        self.complete_loading(pending).await
    }

    /// Complete the pending switch if its fetch is done
    pub async fn poll_loading(&mut self) -> Option<Result<CurrentUpdate>> {
        if !self.pending.as_ref()?.fetch.is_finished() {
            return None;
        }
        let pending = self.pending.take()?;
        Some(self.complete_loading(pending).await)
    }

    async fn complete_loading(&mut self, pending: PendingLoad) -> Result<CurrentUpdate> {
        let profile_id = pending.profile.id;
        let source = match pending.fetch.await {
            Ok(Ok(())) => {
                // deleted while loading
                let Some(profile) = self.store.profile(profile_id) else {
                    return Err(Error::ProfileNotFound(profile_id));
                };
                self.publish_current(profile);
                return Ok(CurrentUpdate::Published);
            }
            Ok(Err(source)) => source,
            Err(e) => CatalogError::FetchFailed(e.to_string()),
        };
        warn!("Unable to load profile {}: {}", profile_id, source);
        Err(Error::ProviderFetchFailed { profile_id, source })
    }

    /// Edit the current profile in memory
    pub fn update_current(&mut self, change: impl FnOnce(&mut Profile)) {
        if self.current.is_placeholder {
            return;
        }
        let mut updated = self.current.clone();
        change(&mut updated);
        self.publish_current(updated);
    }

    fn publish_current(&mut self, profile: Profile) {
        if profile == self.current {
            return;
        }
        if profile.id != self.current.id {
            info!("Current profile: {}", profile.log_description());
        }
        self.current = profile;
        self.events
            .push_back(ProfileEvent::CurrentChanged(self.current.clone()));
    }

    fn save_former_current(&mut self) {
        if self.current.is_placeholder {
            return;
        }
        if let Err(e) = self.store.save(std::slice::from_ref(&self.current)) {
            warn!("Unable to save former current profile: {}", e);
        }
    }

    /// Save `profile`, the first one saved becomes active
    pub fn save(&mut self, mut profile: Profile) -> Result<()> {
        profile.header.last_update = SystemTime::now();
        self.store.save(std::slice::from_ref(&profile))?;
        debug!("Saved {}", profile.log_description());

        if self.active_profile_id.is_none() {
            self.set_active(Some(profile.id));
        }
        if self.is_current(profile.id) {
            self.publish_current(profile);
        }
        Ok(())
    }

    /// Save the in-memory current profile
    pub fn persist(&self) -> Result<()> {
        if self.current.is_placeholder {
            return Ok(());
        }
        self.store.save(std::slice::from_ref(&self.current))?;
        Ok(())
    }

    /// Copy a profile under a fresh id and a unique name
    pub fn duplicate(&mut self, id: Uuid, set_as_current: bool) -> Result<Profile> {
        let source = self.live_profile(id)?;
        let names: HashSet<String> = self
            .store
            .all()
            .into_values()
            .map(|p| p.header.name)
            .collect();
        let copy = source.with_new_id().renamed_uniquely(&names);
        info!("Duplicated {} as {}", source.log_description(), copy.log_description());

        if set_as_current && !self.is_loading() {
            self.save_former_current();
            self.publish_current(copy.clone());
        } else {
            self.store.save(std::slice::from_ref(&copy))?;
        }
        Ok(copy)
    }

    /// Delete profiles along with their passwords
    pub fn remove(&mut self, ids: &[Uuid]) {
        for id in ids {
            self.vault.remove_all(*id);
        }
        self.store.remove(ids);
    }

    /// Store the account password of `profile`, an empty one removes it
    pub fn save_password(&self, profile: &Profile, password: &str) -> Result<()> {
        if profile.account.username.is_empty() {
            return Ok(());
        }
        let key = SecretKey::new(profile.id, &profile.account.username);
        if password.is_empty() {
            self.vault.remove(&key);
            return Ok(());
        }
        self.vault
            .set(password, &key, &profile.header.name)
            .map_err(ConfigError::from)?;
        Ok(())
    }

    pub fn password_reference(&self, profile: &Profile) -> Option<SecretRef> {
        let key = SecretKey::new(profile.id, &profile.account.username);
        self.vault.reference(&key).ok()
    }

    /// Apply the latest store snapshot, returning whether there was one
    pub fn sync_store(&mut self) -> Result<bool> {
        let mut latest = None;
        while let Ok(snapshot) = self.feed.try_recv() {
            latest = Some(snapshot);
        }
        let Some(snapshot) = latest else {
            return Ok(false);
        };
        self.apply_store_change(snapshot)?;
        Ok(true)
    }

    /// Wait for the next store snapshot and apply it
    pub async fn wait_store_change(&mut self) -> Result<bool> {
        let Some(snapshot) = self.feed.recv().await else {
            return Ok(false);
        };
        self.apply_store_change(snapshot)?;
        Ok(true)
    }

    fn apply_store_change(&mut self, profiles: ProfileMap) -> Result<()> {
        debug!("Store changed ({} profiles)", profiles.len());
        if let Err(e) = self.fix_duplicate_names(&profiles) {
            warn!("Unable to rename duplicate profiles: {}", e);
        }

        if let Some(active) = self.active_profile_id {
            if !profiles.contains_key(&active) {
                info!("Active profile {} was deleted", active);
                self.set_active(None);
            }
        }

        if !self.current.is_placeholder {
            match profiles.get(&self.current.id) {
                None => {
                    info!("Current profile {} was deleted", self.current.id);
                    self.publish_current(Profile::placeholder());
                }
                Some(stored) if stored.header.last_update > self.current.header.last_update => {
                    debug!("Current profile updated in store");
                    self.publish_current(stored.clone());
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Rename profiles sharing a name, keeping the one with the smallest id
    fn fix_duplicate_names(&self, profiles: &ProfileMap) -> Result<()> {
        let mut by_name: HashMap<&str, Vec<&Profile>> = HashMap::new();
        for profile in profiles.values() {
            by_name.entry(profile.header.name.as_str()).or_default().push(profile);
        }

        let mut names: HashSet<String> = by_name.keys().map(|name| name.to_string()).collect();
        let mut duplicates: Vec<Vec<&Profile>> = by_name
            .into_values()
            .filter(|group| group.len() > 1)
            .collect();
        if duplicates.is_empty() {
            return Ok(());
        }
        duplicates.sort_by_key(|group| group.iter().map(|p| p.id).min());

        let mut renamed = Vec::new();
        for mut group in duplicates {
            group.sort_by_key(|p| p.id);
            for profile in group.into_iter().skip(1) {
                let name = unique_name(&profile.header.name, &names);
                names.insert(name.clone());
                info!("Renaming duplicate {} to '{}'", profile.log_description(), name);

                let mut copy = profile.clone();
                copy.header.name = name;
                copy.header.last_update = SystemTime::now();
                renamed.push(copy);
            }
        }
        self.store.save(&renamed)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{Account, Endpoint, OpenVpnSettings, ProtocolSettings};
    use crate::provider::StaticProviderCatalog;
    use crate::provider::tests::acme_index;
    use crate::store::{MemoryProfileStore, StoreError};
    use crate::vault::MemoryVault;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn host(name: &str) -> Profile {
        Profile::host(
            name,
            ProtocolSettings::OpenVpn(OpenVpnSettings {
                remotes: vec![Endpoint::new("1.2.3.4", 1194)],
                ..OpenVpnSettings::default()
            }),
        )
    }

    fn acme() -> Profile {
        Profile::provider(
            "Acme",
            "acme",
            ProtocolSettings::OpenVpn(OpenVpnSettings::default()),
            "nyc1",
        )
    }

    struct Fixture {
        store: Arc<MemoryProfileStore>,
        catalog: Arc<StaticProviderCatalog>,
        vault: Arc<MemoryVault>,
        profiles: ProfileOrchestrator,
    }

    fn fixture(profiles: Vec<Profile>) -> Fixture {
        fixture_with_catalog(profiles, StaticProviderCatalog::new(acme_index()))
    }

    fn fixture_with_catalog(profiles: Vec<Profile>, catalog: StaticProviderCatalog) -> Fixture {
        let store = Arc::new(MemoryProfileStore::with_profiles(profiles));
        let catalog = Arc::new(catalog);
        let vault = Arc::new(MemoryVault::new());
        let profiles = ProfileOrchestrator::new(
            store.clone(),
            catalog.clone(),
            vault.clone(),
            Preferences::in_memory(),
        );
        Fixture {
            store,
            catalog,
            vault,
            profiles,
        }
    }

    fn drain(profiles: &mut ProfileOrchestrator) -> Vec<ProfileEvent> {
        std::iter::from_fn(|| profiles.next_event()).collect()
    }

    #[test]
    fn test_activate_unknown_profile() {
        let mut f = fixture(Vec::new());
        let id = Uuid::new_v4();

        assert_eq!(f.profiles.activate(id, true), Err(Error::ProfileNotFound(id)));
        assert!(!f.profiles.has_active_profile());
    }

    #[test]
    fn test_activate_and_clear() {
        let home = host("Home");
        let work = host("Work");
        let mut f = fixture(vec![home.clone(), work.clone()]);

        f.profiles.activate(home.id, true).unwrap();
        f.profiles.activate(work.id, false).unwrap();
        assert!(f.profiles.is_active(home.id));

        f.profiles.activate(home.id, false).unwrap();
        assert!(!f.profiles.has_active_profile());
        assert_eq!(
            drain(&mut f.profiles),
            vec![
                ProfileEvent::ActiveChanged(Some(home.id)),
                ProfileEvent::ActiveChanged(None),
            ]
        );
    }

    #[test]
    fn test_single_active_profile() {
        let home = host("Home");
        let work = host("Work");
        let mut f = fixture(vec![home.clone(), work.clone()]);

        f.profiles.activate(home.id, true).unwrap();
        f.profiles.activate(work.id, true).unwrap();
        f.profiles.activate(work.id, true).unwrap();

        assert_eq!(f.profiles.active_profile_id(), Some(work.id));
        assert_eq!(drain(&mut f.profiles).len(), 2);
    }

    #[test]
    fn test_stale_active_id_dropped_at_start() {
        let store = Arc::new(MemoryProfileStore::new());
        let mut preferences = Preferences::in_memory();
        preferences.set_active_profile_id(Some(Uuid::new_v4())).unwrap();

        let profiles = ProfileOrchestrator::new(
            store,
            Arc::new(StaticProviderCatalog::new(acme_index())),
            Arc::new(MemoryVault::new()),
            preferences,
        );
        assert!(!profiles.has_active_profile());
        assert!(profiles.preferences().active_profile_id().is_none());
    }

    #[test]
    fn test_first_saved_profile_becomes_active() {
        let mut f = fixture(Vec::new());
        let home = host("Home");
        let work = host("Work");

        f.profiles.save(home.clone()).unwrap();
        f.profiles.save(work).unwrap();

        assert_eq!(f.profiles.active_profile_id(), Some(home.id));
        assert_eq!(f.profiles.preferences().active_profile_id(), Some(home.id));
    }

    #[test]
    fn test_set_current_host_profile() {
        let home = host("Home");
        let mut f = fixture(vec![home.clone()]);

        assert_eq!(f.profiles.set_current(home.id).unwrap(), CurrentUpdate::Published);
        assert_eq!(f.profiles.set_current(home.id).unwrap(), CurrentUpdate::Unchanged);
        assert!(f.profiles.is_current(home.id));
        assert_eq!(drain(&mut f.profiles), vec![ProfileEvent::CurrentChanged(home)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_current_fetches_provider_first() {
        let profile = acme();
        let home = host("Home");
        let catalog = StaticProviderCatalog::new(acme_index()).with_fetch_delay(Duration::from_secs(1));
        let mut f = fixture_with_catalog(vec![profile.clone(), home.clone()], catalog);

        assert_eq!(f.profiles.set_current(profile.id).unwrap(), CurrentUpdate::Loading);
        assert!(f.profiles.is_loading());
        assert!(!f.profiles.is_current(profile.id));

        assert_eq!(f.profiles.set_current(home.id).unwrap(), CurrentUpdate::Rejected);

        assert_eq!(f.profiles.finish_loading().await.unwrap(), CurrentUpdate::Published);
        assert!(f.profiles.is_current(profile.id));
        assert!(!f.profiles.is_loading());
        assert_eq!(f.catalog.fetch_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_current_fetch_failure() {
        let profile = acme();
        let mut f = fixture(vec![profile.clone()]);
        f.catalog.set_fails_fetch(true);

        assert_eq!(f.profiles.set_current(profile.id).unwrap(), CurrentUpdate::Loading);
        let result = f.profiles.finish_loading().await;

        assert!(matches!(result, Err(Error::ProviderFetchFailed { .. })));
        assert!(f.profiles.current_profile().is_placeholder);
        assert!(!f.profiles.is_loading());
    }

    #[test]
    fn test_live_profile_prefers_current_copy() {
        let home = host("Home");
        let mut f = fixture(vec![home.clone()]);
        f.profiles.set_current(home.id).unwrap();

        f.profiles.update_current(|p| p.header.name = "Edited".into());

        assert_eq!(f.profiles.live_profile(home.id).unwrap().header.name, "Edited");
        assert_eq!(f.store.profile(home.id).unwrap().header.name, "Home");

        f.profiles.persist().unwrap();
        assert_eq!(f.store.profile(home.id).unwrap().header.name, "Edited");
    }

    #[test]
    fn test_live_profile_ex_readiness() {
        let home = host("Home");
        let profile = acme();
        let f = fixture(vec![home.clone(), profile.clone()]);

        assert!(f.profiles.live_profile_ex(home.id).unwrap().1);
        assert!(!f.profiles.live_profile_ex(profile.id).unwrap().1);
    }

    #[test]
    fn test_switch_saves_former_current() {
        let home = host("Home");
        let work = host("Work");
        let mut f = fixture(vec![home.clone(), work.clone()]);
        f.profiles.set_current(home.id).unwrap();
        f.profiles.update_current(|p| p.network.mtu = Some(1300));

        f.profiles.set_current(work.id).unwrap();

        assert_eq!(f.store.profile(home.id).unwrap().network.mtu, Some(1300));
    }

    #[test]
    fn test_duplicate_gets_unique_name() {
        let home = host("Home");
        let mut f = fixture(vec![home.clone()]);

        let copy = f.profiles.duplicate(home.id, false).unwrap();
        let second = f.profiles.duplicate(home.id, false).unwrap();

        assert_ne!(copy.id, home.id);
        assert_eq!(copy.header.name, "Home (1)");
        assert_eq!(second.header.name, "Home (2)");
        assert!(f.store.contains(copy.id));
    }

    #[test]
    fn test_duplicate_as_current_is_transient() {
        let home = host("Home");
        let work = host("Work");
        let mut f = fixture(vec![home.clone(), work.clone()]);

        let copy = f.profiles.duplicate(home.id, true).unwrap();
        assert!(f.profiles.is_current(copy.id));
        assert!(!f.store.contains(copy.id));

        f.profiles.set_current(work.id).unwrap();
        assert!(f.store.contains(copy.id));
    }

    #[test]
    fn test_store_deletion_clears_active_and_current() {
        let home = host("Home");
        let mut f = fixture(vec![home.clone()]);
        f.profiles.activate(home.id, true).unwrap();
        f.profiles.set_current(home.id).unwrap();
        drain(&mut f.profiles);

        f.profiles.remove(&[home.id]);
        assert!(f.profiles.sync_store().unwrap());

        assert!(!f.profiles.has_active_profile());
        assert!(f.profiles.current_profile().is_placeholder);
        assert_eq!(
            drain(&mut f.profiles),
            vec![
                ProfileEvent::ActiveChanged(None),
                ProfileEvent::CurrentChanged(Profile::placeholder()),
            ]
        );
    }

    /// Store whose saves can be made to fail
    struct ReadOnlyStore {
        inner: MemoryProfileStore,
        read_only: AtomicBool,
    }

    impl ProfileStore for ReadOnlyStore {
        fn all(&self) -> ProfileMap {
            self.inner.all()
        }

        fn profile(&self, id: Uuid) -> Option<Profile> {
            self.inner.profile(id)
        }

        fn save(&self, profiles: &[Profile]) -> std::result::Result<(), StoreError> {
            if self.read_only.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable);
            }
            self.inner.save(profiles)
        }

        fn remove(&self, ids: &[Uuid]) {
            self.inner.remove(ids)
        }

        fn subscribe(&self) -> mpsc::UnboundedReceiver<ProfileMap> {
            self.inner.subscribe()
        }
    }

    #[test]
    fn test_deletion_handled_when_renaming_fails() {
        let home = host("Home");
        let mut a = host("Work");
        let mut b = host("Work");
        a.id = Uuid::from_u128(1);
        b.id = Uuid::from_u128(2);
        let store = Arc::new(ReadOnlyStore {
            inner: MemoryProfileStore::with_profiles(vec![home.clone(), a, b]),
            read_only: AtomicBool::new(false),
        });
        let mut profiles = ProfileOrchestrator::new(
            store.clone(),
            Arc::new(StaticProviderCatalog::new(acme_index())),
            Arc::new(MemoryVault::new()),
            Preferences::in_memory(),
        );
        profiles.activate(home.id, true).unwrap();
        profiles.set_current(home.id).unwrap();
        drain(&mut profiles);

        store.read_only.store(true, Ordering::SeqCst);
        profiles.remove(&[home.id]);
        assert!(profiles.sync_store().unwrap());

        assert!(!profiles.has_active_profile());
        assert!(profiles.current_profile().is_placeholder);
        assert_eq!(store.profile(Uuid::from_u128(2)).unwrap().header.name, "Work");
    }

    #[test]
    fn test_remote_update_refreshes_current() {
        let home = host("Home");
        let mut f = fixture(vec![home.clone()]);
        f.profiles.set_current(home.id).unwrap();

        let mut remote = home.clone();
        remote.header.name = "Remote".into();
        remote.header.last_update = home.header.last_update + Duration::from_secs(1);
        f.store.save(&[remote]).unwrap();
        f.profiles.sync_store().unwrap();

        assert_eq!(f.profiles.current_profile().header.name, "Remote");
    }

    #[test]
    fn test_duplicate_names_fixed_by_id_order() {
        let mut a = host("Home");
        let mut b = host("Home");
        let mut c = host("Home");
        a.id = Uuid::from_u128(1);
        b.id = Uuid::from_u128(2);
        c.id = Uuid::from_u128(3);
        let mut f = fixture(Vec::new());

        f.store.save(&[c.clone(), a.clone(), b.clone()]).unwrap();
        f.profiles.sync_store().unwrap();

        assert_eq!(f.store.profile(a.id).unwrap().header.name, "Home");
        assert_eq!(f.store.profile(b.id).unwrap().header.name, "Home (1)");
        assert_eq!(f.store.profile(c.id).unwrap().header.name, "Home (2)");

        // the renaming save is itself a change, with nothing left to fix
        assert!(f.profiles.sync_store().unwrap());
        assert!(!f.profiles.sync_store().unwrap());
    }

    #[test]
    fn test_passwords_follow_profile_lifecycle() {
        let mut home = host("Home");
        home.account = Account::new("alice", "");
        let mut f = fixture(vec![home.clone()]);

        f.profiles.save_password(&home, "hunter2").unwrap();
        let reference = f.profiles.password_reference(&home).unwrap();
        assert_eq!(f.vault.resolve(&reference).unwrap(), "hunter2");

        f.profiles.save_password(&home, "").unwrap();
        assert!(f.profiles.password_reference(&home).is_none());

        f.profiles.save_password(&home, "again").unwrap();
        f.profiles.remove(&[home.id]);
        assert!(f.vault.is_empty());
    }
}
